//! OAuth2 protocol helpers for Azure AD: PKCE, authorize/logout URLs, token
//! endpoint calls and id-token claim parsing.

use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfiguration;
use crate::error::ProviderError;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Scopes added to every request so an id token and refresh token come back.
pub const OIDC_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Token endpoint error codes meaning the user must sign in again.
const INTERACTION_ERRORS: [&str; 3] = ["invalid_grant", "interaction_required", "login_required"];

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// The code verifier (stored locally, sent in token exchange).
    pub verifier: String,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let verifier_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        let verifier = URL_SAFE_NO_PAD.encode(&verifier_bytes);

        // challenge = BASE64URL(SHA256(verifier))
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a random CSRF state value.
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let state_bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&state_bytes)
}

/// Requested scopes plus the OIDC scopes, without duplicates.
pub fn with_oidc_scopes(scopes: &[String]) -> Vec<String> {
    let mut all: Vec<String> = scopes.to_vec();
    for oidc in OIDC_SCOPES {
        if !all.iter().any(|s| s.eq_ignore_ascii_case(oidc)) {
            all.push(oidc.to_string());
        }
    }
    all
}

/// Extra parameters for the authorize request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthorizeOptions<'a> {
    pub login_hint: Option<&'a str>,
    pub prompt: Option<&'a str>,
}

/// OAuth2 client for one configured application.
pub struct OAuth2Client {
    config: ClientConfiguration,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client from configuration.
    pub fn new(config: ClientConfiguration) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                ProviderError::InvalidConfiguration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &ClientConfiguration {
        &self.config
    }

    /// Generate the authorization URL for browser-based sign-in.
    pub fn authorize_url(
        &self,
        scopes: &[String],
        pkce: &PkceChallenge,
        state: &str,
        options: AuthorizeOptions<'_>,
    ) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.config.auth_url())
            .map_err(|e| ProviderError::InvalidConfiguration(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("response_mode", "query")
                .append_pair("scope", &with_oidc_scopes(scopes).join(" "))
                .append_pair("state", state)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256");

            if let Some(hint) = options.login_hint.filter(|h| !h.is_empty()) {
                query.append_pair("login_hint", hint);
            }
            if let Some(prompt) = options.prompt {
                query.append_pair("prompt", prompt);
            }
        }

        Ok(url)
    }

    /// Generate the end-session URL for browser-based sign-out.
    pub fn logout_url(&self, logout_hint: Option<&str>) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.config.logout_url())
            .map_err(|e| ProviderError::InvalidConfiguration(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("post_logout_redirect_uri", &self.config.redirect_uri);
            if let Some(hint) = logout_hint.filter(|h| !h.is_empty()) {
                query.append_pair("logout_hint", hint);
            }
        }

        Ok(url)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, ProviderError> {
        let scope = with_oidc_scopes(scopes).join(" ");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("scope", scope.as_str()),
        ];

        self.post_token_request(&params).await
    }

    /// Redeem a refresh token for a new access token.
    pub async fn redeem_refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, ProviderError> {
        let scope = with_oidc_scopes(scopes).join(" ");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        self.post_token_request(&params).await
    }

    async fn post_token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, ProviderError> {
        let request_id = Uuid::new_v4().to_string();
        tracing::debug!(%request_id, "Calling token endpoint");

        let response = self
            .http_client
            .post(self.config.token_url())
            .header("client-request-id", &request_id)
            .form(params)
            .send()
            .await
            .map_err(|e| ProviderError::TokenExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            // Log error details for debugging (doesn't expose to user)
            tracing::error!(%request_id, "Token request failed: HTTP {} - {}", status, error_body);
            return Err(classify_token_error(status.as_u16(), &error_body));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ProviderError::TokenExchangeFailed(e.to_string()))
    }
}

/// Map a failed token endpoint response onto a provider error.
fn classify_token_error(status: u16, body: &str) -> ProviderError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) if INTERACTION_ERRORS.contains(&err.error.as_str()) => {
            ProviderError::InteractionRequired(err.error)
        }
        Ok(err) => ProviderError::TokenExchangeFailed(err.error),
        Err(_) => ProviderError::TokenExchangeFailed(format!("HTTP {}", status)),
    }
}

/// Token response from Azure AD.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
}

/// Claims read from an id token. The signature is not checked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    pub oid: Option<String>,
    pub sub: Option<String>,
    pub tid: Option<String>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub email: Option<String>,
}

impl IdTokenClaims {
    /// Decode the payload segment of a JWT.
    pub fn decode(id_token: &str) -> Result<Self, ProviderError> {
        let payload = id_token
            .split('.')
            .nth(1)
            .ok_or_else(|| ProviderError::TokenExchangeFailed("malformed id token".into()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ProviderError::TokenExchangeFailed(format!("id token: {}", e)))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::TokenExchangeFailed(format!("id token: {}", e)))
    }

    /// `{object id}.{tenant id}`, falling back to the subject.
    pub fn home_account_id(&self) -> String {
        let object_id = self.oid.as_deref().or(self.sub.as_deref()).unwrap_or_default();
        match self.tid.as_deref() {
            Some(tid) => format!("{}.{}", object_id, tid),
            None => object_id.to_string(),
        }
    }

    pub fn username(&self) -> String {
        self.preferred_username
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_default()
    }
}

/// Parse an OAuth callback URL to extract code and state.
pub fn parse_callback_url(url_string: &str) -> Result<(String, String), ProviderError> {
    let url = Url::parse(url_string).map_err(|_| ProviderError::InvalidAuthCode)?;

    let params: HashMap<_, _> = url.query_pairs().collect();

    if let Some(error) = params.get("error") {
        if error == "access_denied" {
            return Err(ProviderError::UserCancelled);
        }
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        return Err(ProviderError::OAuthFailed(description));
    }

    let code = params
        .get("code")
        .ok_or(ProviderError::InvalidAuthCode)?
        .to_string();

    let state = params
        .get("state")
        .ok_or(ProviderError::StateValidationFailed)?
        .to_string();

    Ok((code, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheLocation;

    fn client() -> OAuth2Client {
        OAuth2Client::new(ClientConfiguration {
            client_id: "client-123".into(),
            tenant_id: "contoso".into(),
            redirect_uri: "http://localhost:28491".into(),
            cache_location: CacheLocation::Session,
        })
        .unwrap()
    }

    #[test]
    fn test_pkce_generation() {
        let pkce = PkceChallenge::new();

        // 32 bytes base64url encoded without padding
        assert_eq!(pkce.verifier.len(), 43);
        assert!(!pkce.challenge.is_empty());
        assert_ne!(pkce.verifier, pkce.challenge);
    }

    #[test]
    fn test_with_oidc_scopes_no_duplicates() {
        let scopes = with_oidc_scopes(&["User.Read".into(), "OpenID".into()]);
        assert_eq!(scopes, vec!["User.Read", "OpenID", "profile", "offline_access"]);
    }

    #[test]
    fn test_authorize_url() {
        let pkce = PkceChallenge::new();
        let url = client()
            .authorize_url(
                &["User.Read".into()],
                &pkce,
                "state-1",
                AuthorizeOptions {
                    login_hint: Some("user@contoso.com"),
                    prompt: Some("select_account"),
                },
            )
            .unwrap();

        assert!(url
            .as_str()
            .starts_with("https://login.microsoftonline.com/contoso/oauth2/v2.0/authorize?"));

        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["redirect_uri"], "http://localhost:28491");
        assert_eq!(params["scope"], "User.Read openid profile offline_access");
        assert_eq!(params["state"], "state-1");
        assert_eq!(params["code_challenge"], pkce.challenge);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["login_hint"], "user@contoso.com");
        assert_eq!(params["prompt"], "select_account");
    }

    #[test]
    fn test_logout_url() {
        let url = client().logout_url(Some("user@contoso.com")).unwrap();
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/contoso/oauth2/v2.0/logout");
        assert_eq!(params["post_logout_redirect_uri"], "http://localhost:28491");
        assert_eq!(params["logout_hint"], "user@contoso.com");
    }

    #[test]
    fn test_classify_token_error() {
        let body = r#"{"error":"invalid_grant","error_description":"AADSTS70008: expired"}"#;
        assert!(matches!(
            classify_token_error(400, body),
            ProviderError::InteractionRequired(_)
        ));

        assert_eq!(
            classify_token_error(502, "<html>"),
            ProviderError::TokenExchangeFailed("HTTP 502".into())
        );
    }

    #[test]
    fn test_id_token_claims() {
        let payload = URL_SAFE_NO_PAD.encode(
            r#"{"oid":"o-1","tid":"t-1","name":"Jane Doe","preferred_username":"jane@contoso.com"}"#,
        );
        let token = format!("e30.{}.sig", payload);

        let claims = IdTokenClaims::decode(&token).unwrap();
        assert_eq!(claims.home_account_id(), "o-1.t-1");
        assert_eq!(claims.name.as_deref(), Some("Jane Doe"));
        assert_eq!(claims.username(), "jane@contoso.com");
    }

    #[test]
    fn test_id_token_malformed() {
        assert!(IdTokenClaims::decode("not-a-jwt").is_err());
    }

    #[test]
    fn test_parse_callback_success() {
        let url = "http://localhost:28491/?code=abc123&state=xyz789";
        let (code, state) = parse_callback_url(url).unwrap();
        assert_eq!(code, "abc123");
        assert_eq!(state, "xyz789");
    }

    #[test]
    fn test_parse_callback_error() {
        let url = "http://localhost:28491/?error=server_error&error_description=Boom";
        assert_eq!(
            parse_callback_url(url),
            Err(ProviderError::OAuthFailed("Boom".into()))
        );

        let url = "http://localhost:28491/?error=access_denied";
        assert_eq!(parse_callback_url(url), Err(ProviderError::UserCancelled));
    }

    #[test]
    fn test_parse_callback_missing_code() {
        let url = "http://localhost:28491/?state=xyz789";
        assert_eq!(parse_callback_url(url), Err(ProviderError::InvalidAuthCode));
    }
}
