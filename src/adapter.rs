//! The sign-in adapter.
//!
//! Resolves configuration once, constructs the identity client at most once,
//! and delegates each operation to it. Every operation exists in every state;
//! degraded states reject async calls and return `None`/`false` from getters.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{AuthConfig, ClientConfiguration, InjectedValues};
use crate::error::{AdapterError, ProviderError};
use crate::identity::{
    AccountSummary, IdentityClient, IdentityLibrary, LoginRequest, TokenRequest,
};
use crate::overrides::{OverrideStore, CLIENT_ID_KEY, TENANT_ID_KEY};

/// Lifecycle state, fixed for the lifetime of an adapter.
pub enum AdapterState {
    /// No identity library was available.
    Unavailable,
    /// The client id is missing or the placeholder.
    Unconfigured,
    /// The library refused to construct a client.
    ConstructionFailed(ProviderError),
    /// Client constructed and usable.
    Ready(Arc<dyn IdentityClient>),
}

impl AdapterState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Unconfigured => "unconfigured",
            Self::ConstructionFailed(_) => "construction-failed",
            Self::Ready(_) => "ready",
        }
    }
}

impl fmt::Debug for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConstructionFailed(e) => f.debug_tuple("ConstructionFailed").field(e).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// Configured identity client plus the operations exposed to callers.
pub struct AuthConfigAdapter {
    config: ClientConfiguration,
    login_scopes: Vec<String>,
    store: Arc<dyn OverrideStore>,
    state: AdapterState,
}

impl AuthConfigAdapter {
    /// Resolve configuration and construct the client.
    ///
    /// Call once per process. A construction failure clears persisted
    /// overrides so the next start begins from a clean slate.
    pub fn initialize(
        library: Option<&dyn IdentityLibrary>,
        auth: &AuthConfig,
        injected: &InjectedValues,
        store: Arc<dyn OverrideStore>,
    ) -> Self {
        let config = ClientConfiguration::resolve(auth, injected, store.as_ref());

        let state = match library {
            None => {
                warn!("Identity library not loaded, sign-in disabled");
                AdapterState::Unavailable
            }
            Some(_) if config.is_placeholder() => {
                warn!("No client id configured, sign-in disabled");
                AdapterState::Unconfigured
            }
            Some(library) => match library.create_client(&config) {
                Ok(client) => {
                    info!("Identity client initialized for tenant {}", config.tenant_id);
                    AdapterState::Ready(client)
                }
                Err(e) => {
                    error!("Identity client initialization failed: {}", e);
                    clear_overrides(store.as_ref());
                    AdapterState::ConstructionFailed(e)
                }
            },
        };

        Self {
            config,
            login_scopes: auth.login.scopes.clone(),
            store,
            state,
        }
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    pub fn config(&self) -> &ClientConfiguration {
        &self.config
    }

    /// Persist a client id and optional tenant for the next start.
    ///
    /// Empty values are skipped. Takes effect only after re-initialization.
    pub fn set_client_id(&self, client_id: &str, tenant_id: Option<&str>) -> bool {
        let writes = [(CLIENT_ID_KEY, Some(client_id)), (TENANT_ID_KEY, tenant_id)];
        for (key, value) in writes {
            let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            if let Err(e) = self.store.set(key, value) {
                error!("Failed to persist {}: {}", key, e);
            }
        }
        info!("Saved client id override, restart to apply");
        true
    }

    /// The active client id, or `None` while it is the placeholder.
    pub fn client_id(&self) -> Option<&str> {
        if self.config.is_placeholder() {
            None
        } else {
            Some(&self.config.client_id)
        }
    }

    /// Remove persisted overrides.
    pub fn clear_client_id(&self) -> bool {
        clear_overrides(self.store.as_ref());
        true
    }

    /// True when a real client id is set and the client was constructed.
    pub fn is_configured(&self) -> bool {
        matches!(self.state, AdapterState::Ready(_))
    }

    /// Sign in interactively with the fixed login scopes.
    pub async fn login(&self) -> Result<AccountSummary, AdapterError> {
        let client = self.client()?;
        let request = LoginRequest {
            scopes: self.login_scopes.clone(),
        };

        let result = client.interactive_login(&request).await.map_err(|e| {
            error!("Login failed: {}", e);
            AdapterError::Provider(e)
        })?;

        info!("Signed in as {}", result.account.username);
        Ok(AccountSummary::from(&result.account))
    }

    /// Sign out the first account, if there is one.
    pub async fn logout(&self) -> Result<(), AdapterError> {
        let client = self.client()?;
        let Some(account) = client.list_accounts().into_iter().next() else {
            return Ok(());
        };

        client.interactive_logout(&account).await?;
        info!("Signed out {}", account.username);
        Ok(())
    }

    /// Summary of the first known account.
    pub fn account(&self) -> Option<AccountSummary> {
        match &self.state {
            AdapterState::Ready(client) => client
                .list_accounts()
                .first()
                .map(AccountSummary::from),
            _ => None,
        }
    }

    /// Get a bearer token for a single scope.
    ///
    /// Tries the silent path first. Any silent failure falls back to exactly
    /// one interactive request for the same scope.
    pub async fn acquire_token(&self, scope: &str) -> Result<String, AdapterError> {
        let client = self.client()?;
        let scopes = vec![scope.to_string()];

        let silent = TokenRequest {
            scopes: scopes.clone(),
            account: client.list_accounts().into_iter().next(),
        };

        let result = match client.silent_token(&silent).await {
            Ok(result) => result,
            Err(e) => {
                info!("Silent token acquisition failed ({}), falling back to interactive", e);
                let interactive = TokenRequest {
                    scopes,
                    account: None,
                };
                client.interactive_token(&interactive).await?
            }
        };

        Ok(result.access_token.as_str().to_string())
    }

    fn client(&self) -> Result<&Arc<dyn IdentityClient>, AdapterError> {
        match &self.state {
            AdapterState::Ready(client) => Ok(client),
            AdapterState::Unavailable => Err(AdapterError::LibraryUnavailable),
            AdapterState::Unconfigured => Err(AdapterError::NotConfigured),
            AdapterState::ConstructionFailed(e) => Err(AdapterError::ConstructionFailed(e.clone())),
        }
    }
}

fn clear_overrides(store: &dyn OverrideStore) {
    for key in [CLIENT_ID_KEY, TENANT_ID_KEY] {
        if let Err(e) = store.remove(key) {
            error!("Failed to clear {}: {}", key, e);
        }
    }
}
