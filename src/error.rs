//! Error types for the graphauth adapter.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Error returned by adapter operations.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("Identity library not loaded")]
    LibraryUnavailable,

    #[error("Identity client not configured")]
    NotConfigured,

    /// Client construction failed at startup; carries the original error.
    #[error("{0}")]
    ConstructionFailed(ProviderError),

    #[error("{0}")]
    Provider(#[from] ProviderError),
}

/// Errors raised by the identity provider client.
///
/// Cloneable so a construction failure can be replayed to every caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Invalid client configuration: {0}")]
    InvalidConfiguration(String),

    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Interaction required: {0}")]
    InteractionRequired(String),

    #[error("No signed-in account")]
    NoAccount,

    #[error("Failed to open browser: {0}")]
    Browser(String),

    #[error("Redirect listener failed: {0}")]
    CallbackFailed(String),

    #[error("User cancelled authentication")]
    UserCancelled,
}

/// Persistent storage errors (override file, token cache file).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Could not determine application directory")]
    NoAppDirectory,
}

impl AdapterError {
    /// Returns a user-friendly message for display.
    pub fn user_message(&self) -> &str {
        match self {
            Self::LibraryUnavailable => "Sign-in is unavailable: identity library not loaded.",
            Self::NotConfigured => "Sign-in is not configured. Set a client ID first.",
            Self::ConstructionFailed(_) => {
                "Sign-in configuration was invalid and has been reset. Restart to try again."
            }
            Self::Provider(ProviderError::UserCancelled) => "Sign-in was cancelled.",
            Self::Provider(ProviderError::StateValidationFailed) => {
                "Security error. Please try signing in again."
            }
            Self::Provider(ProviderError::InteractionRequired(_))
            | Self::Provider(ProviderError::NoAccount) => "Please sign in again.",
            Self::Provider(ProviderError::Browser(_)) => "Could not open the browser.",
            Self::Provider(ProviderError::TokenExchangeFailed(_)) => {
                "Network or server error while signing in."
            }
            Self::Provider(_) => "Sign-in failed. Please try again.",
        }
    }

    /// Returns true if this error means the user has to sign in interactively.
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError::InteractionRequired(_))
                | Self::Provider(ProviderError::NoAccount)
        )
    }
}
