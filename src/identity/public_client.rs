//! Azure AD public client application.
//!
//! Authorization code flow with PKCE over a loopback redirect. The system
//! browser plays the role of the popup window.

use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use url::Url;

use super::cache::{CachedAccessToken, TokenCache};
use super::callback_server::{CallbackListener, CallbackResult};
use super::oauth::{
    generate_state, parse_callback_url, AuthorizeOptions, IdTokenClaims, OAuth2Client,
    PkceChallenge, TokenResponse,
};
use super::secure::SecureString;
use super::{
    Account, AuthenticationResult, IdentityClient, IdentityLibrary, LoginRequest, TokenRequest,
};
use crate::config::{CacheLocation, ClientConfiguration};
use crate::error::ProviderError;

/// Constructs [`PublicClientApplication`]s.
#[derive(Debug, Clone, Default)]
pub struct PublicClientLibrary {
    local_cache_path: Option<PathBuf>,
}

impl PublicClientLibrary {
    /// `local_cache_path` is where a `Local` cache is written. Without it,
    /// clients configured for local caching fail to construct.
    pub fn new(local_cache_path: Option<PathBuf>) -> Self {
        Self { local_cache_path }
    }
}

impl IdentityLibrary for PublicClientLibrary {
    fn create_client(
        &self,
        config: &ClientConfiguration,
    ) -> Result<Arc<dyn IdentityClient>, ProviderError> {
        validate_configuration(config)?;

        let cache = match config.cache_location {
            CacheLocation::Session => TokenCache::session(),
            CacheLocation::Local => {
                let path = self.local_cache_path.clone().ok_or_else(|| {
                    ProviderError::InvalidConfiguration(
                        "no directory available for a local token cache".into(),
                    )
                })?;
                TokenCache::local(path)
            }
        };

        let client = PublicClientApplication {
            oauth: OAuth2Client::new(config.clone())?,
            cache,
        };

        info!(
            "Created public client for tenant {} ({} cache)",
            config.tenant_id, config.cache_location
        );
        Ok(Arc::new(client))
    }
}

/// Reject configurations the provider could never accept.
pub fn validate_configuration(config: &ClientConfiguration) -> Result<(), ProviderError> {
    if config.client_id.trim().is_empty() {
        return Err(ProviderError::InvalidConfiguration(
            "client id is empty".into(),
        ));
    }

    let tenant_ok = !config.tenant_id.is_empty()
        && config
            .tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !tenant_ok {
        return Err(ProviderError::InvalidConfiguration(format!(
            "invalid tenant '{}'",
            config.tenant_id
        )));
    }

    let redirect = Url::parse(&config.redirect_uri).map_err(|e| {
        ProviderError::InvalidConfiguration(format!(
            "invalid redirect URI '{}': {}",
            config.redirect_uri, e
        ))
    })?;
    if !redirect.has_host() {
        return Err(ProviderError::InvalidConfiguration(format!(
            "redirect URI '{}' has no host",
            config.redirect_uri
        )));
    }

    Ok(())
}

/// Identity client talking to Azure AD.
pub struct PublicClientApplication {
    oauth: OAuth2Client,
    cache: TokenCache,
}

impl PublicClientApplication {
    /// Open the browser and wait for the redirect, then redeem the code.
    async fn run_interactive(
        &self,
        scopes: &[String],
        options: AuthorizeOptions<'_>,
        fallback_account: Option<&Account>,
    ) -> Result<AuthenticationResult, ProviderError> {
        let pkce = PkceChallenge::new();
        let state = generate_state();
        let auth_url = self.oauth.authorize_url(scopes, &pkce, &state, options)?;

        let listener = CallbackListener::bind(&self.oauth.config().redirect_uri)?;
        // Dropping the sender (including when this future is dropped) stops the listener
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let waiter = tokio::task::spawn_blocking(move || listener.wait(cancel_rx));

        info!("Opening browser for interactive sign-in");
        if let Err(e) = open::that(auth_url.as_str()) {
            drop(cancel_tx);
            let _ = waiter.await;
            return Err(ProviderError::Browser(e.to_string()));
        }

        let outcome = waiter
            .await
            .map_err(|e| ProviderError::CallbackFailed(e.to_string()))?;
        drop(cancel_tx);

        let callback_url = match outcome {
            CallbackResult::Success(url) => url,
            CallbackResult::Cancelled => return Err(ProviderError::UserCancelled),
            CallbackResult::Error(e) => return Err(ProviderError::CallbackFailed(e)),
        };

        let (code, returned_state) = parse_callback_url(&callback_url)?;
        if returned_state != state {
            return Err(ProviderError::StateValidationFailed);
        }

        let tokens = self
            .oauth
            .exchange_code(&code, &pkce.verifier, scopes)
            .await?;

        self.store_tokens(tokens, scopes, fallback_account)
    }

    /// Cache a token response and turn it into an authentication result.
    fn store_tokens(
        &self,
        tokens: TokenResponse,
        requested: &[String],
        fallback_account: Option<&Account>,
    ) -> Result<AuthenticationResult, ProviderError> {
        let account = match tokens.id_token.as_deref() {
            Some(id_token) => {
                let claims = IdTokenClaims::decode(id_token)?;
                Account {
                    home_account_id: claims.home_account_id(),
                    name: claims.name.clone(),
                    username: claims.username(),
                }
            }
            None => fallback_account.cloned().ok_or_else(|| {
                ProviderError::TokenExchangeFailed("response carried no id token".into())
            })?,
        };

        let scopes: Vec<String> = if tokens.scope.is_empty() {
            requested.to_vec()
        } else {
            tokens.scope.split_whitespace().map(str::to_string).collect()
        };
        let expires_on = Utc::now() + Duration::seconds(tokens.expires_in as i64);
        let access_token = SecureString::new(tokens.access_token);

        self.cache.save(
            account.clone(),
            tokens.refresh_token.map(SecureString::new),
            CachedAccessToken {
                secret: access_token.clone(),
                scopes: scopes.clone(),
                expires_on,
            },
        );

        debug!("Cached token for {}, expires at {}", account.username, expires_on);

        Ok(AuthenticationResult {
            access_token,
            account,
            scopes,
            expires_on,
        })
    }
}

#[async_trait]
impl IdentityClient for PublicClientApplication {
    fn list_accounts(&self) -> Vec<Account> {
        self.cache.accounts()
    }

    async fn interactive_login(
        &self,
        request: &LoginRequest,
    ) -> Result<AuthenticationResult, ProviderError> {
        let options = AuthorizeOptions {
            login_hint: None,
            prompt: Some("select_account"),
        };
        self.run_interactive(&request.scopes, options, None).await
    }

    async fn interactive_logout(&self, account: &Account) -> Result<(), ProviderError> {
        self.cache.remove_account(&account.home_account_id);

        let logout_url = self.oauth.logout_url(Some(&account.username))?;
        info!("Opening browser for sign-out");
        open::that(logout_url.as_str()).map_err(|e| ProviderError::Browser(e.to_string()))
    }

    async fn silent_token(
        &self,
        request: &TokenRequest,
    ) -> Result<AuthenticationResult, ProviderError> {
        let account = request.account.as_ref().ok_or(ProviderError::NoAccount)?;

        if let Some(cached) = self
            .cache
            .find_access_token(&account.home_account_id, &request.scopes)
        {
            debug!("Serving access token from cache");
            return Ok(AuthenticationResult {
                access_token: cached.secret,
                account: account.clone(),
                scopes: cached.scopes,
                expires_on: cached.expires_on,
            });
        }

        let refresh_token = self
            .cache
            .refresh_token(&account.home_account_id)
            .ok_or_else(|| ProviderError::InteractionRequired("no refresh token cached".into()))?;

        let tokens = self
            .oauth
            .redeem_refresh_token(refresh_token.as_str(), &request.scopes)
            .await
            .inspect_err(|e| warn!("Silent token renewal failed: {}", e))?;

        self.store_tokens(tokens, &request.scopes, Some(account))
    }

    async fn interactive_token(
        &self,
        request: &TokenRequest,
    ) -> Result<AuthenticationResult, ProviderError> {
        let options = AuthorizeOptions {
            login_hint: request.account.as_ref().map(|a| a.username.as_str()),
            prompt: None,
        };
        self.run_interactive(&request.scopes, options, request.account.as_ref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfiguration {
        ClientConfiguration {
            client_id: "client-123".into(),
            tenant_id: "common".into(),
            redirect_uri: "http://localhost:28491".into(),
            cache_location: CacheLocation::Session,
        }
    }

    fn client() -> PublicClientApplication {
        PublicClientApplication {
            oauth: OAuth2Client::new(config()).unwrap(),
            cache: TokenCache::session(),
        }
    }

    fn account() -> Account {
        Account {
            home_account_id: "o-1.t-1".into(),
            name: Some("Jane Doe".into()),
            username: "jane@contoso.com".into(),
        }
    }

    #[test]
    fn test_validate_configuration() {
        assert!(validate_configuration(&config()).is_ok());

        let mut bad = config();
        bad.tenant_id = "bad tenant/..".into();
        assert!(matches!(
            validate_configuration(&bad),
            Err(ProviderError::InvalidConfiguration(_))
        ));

        let mut bad = config();
        bad.redirect_uri = "not a url".into();
        assert!(validate_configuration(&bad).is_err());

        let mut bad = config();
        bad.client_id = " ".into();
        assert!(validate_configuration(&bad).is_err());
    }

    #[test]
    fn test_library_rejects_local_cache_without_path() {
        let mut local = config();
        local.cache_location = CacheLocation::Local;

        let result = PublicClientLibrary::new(None).create_client(&local);
        assert!(matches!(result, Err(ProviderError::InvalidConfiguration(_))));

        let dir = tempfile::tempdir().unwrap();
        let library = PublicClientLibrary::new(Some(dir.path().join("cache.json")));
        let client = library.create_client(&local).unwrap();
        assert!(client.list_accounts().is_empty());
    }

    #[tokio::test]
    async fn test_silent_token_without_account() {
        let request = TokenRequest {
            scopes: vec!["User.Read".into()],
            account: None,
        };
        let result = client().silent_token(&request).await;
        assert!(matches!(result, Err(ProviderError::NoAccount)));
    }

    #[tokio::test]
    async fn test_silent_token_from_cache() {
        let client = client();
        client.cache.save(
            account(),
            None,
            CachedAccessToken {
                secret: SecureString::new("cached-at".into()),
                scopes: vec!["User.Read".into()],
                expires_on: Utc::now() + Duration::hours(1),
            },
        );

        let request = TokenRequest {
            scopes: vec!["User.Read".into()],
            account: Some(account()),
        };
        let result = client.silent_token(&request).await.unwrap();
        assert_eq!(result.access_token.as_str(), "cached-at");
        assert_eq!(client.list_accounts(), vec![account()]);
    }

    #[tokio::test]
    async fn test_silent_token_without_refresh_token_requires_interaction() {
        let request = TokenRequest {
            scopes: vec!["Files.ReadWrite".into()],
            account: Some(account()),
        };
        let result = client().silent_token(&request).await;
        assert!(matches!(result, Err(ProviderError::InteractionRequired(_))));
    }

    #[test]
    fn test_store_tokens_uses_fallback_account_without_id_token() {
        let client = client();
        let tokens = TokenResponse {
            access_token: "at".into(),
            token_type: "Bearer".into(),
            expires_in: 3600,
            refresh_token: Some("rt".into()),
            id_token: None,
            scope: "User.Read profile openid".into(),
        };

        let result = client
            .store_tokens(tokens, &["User.Read".into()], Some(&account()))
            .unwrap();

        assert_eq!(result.account, account());
        assert_eq!(result.scopes, vec!["User.Read", "profile", "openid"]);
        assert_eq!(
            client.cache.refresh_token("o-1.t-1").unwrap().as_str(),
            "rt"
        );
    }
}
