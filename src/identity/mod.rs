//! Identity provider seam.
//!
//! The adapter talks to the provider only through [`IdentityLibrary`] and
//! [`IdentityClient`]. [`public_client::PublicClientLibrary`] is the Azure AD
//! implementation; tests use fakes.

pub mod cache;
pub mod callback_server;
pub mod oauth;
pub mod public_client;
pub mod secure;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfiguration;
use crate::error::ProviderError;
use secure::SecureString;

/// An account known to the identity client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identifier, `{object id}.{tenant id}` for Azure AD.
    pub home_account_id: String,
    /// Display name, when the provider returned one.
    pub name: Option<String>,
    /// Sign-in name, usually an email address. May be empty.
    pub username: String,
}

/// Name and email of an account, as handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub name: String,
    pub email: String,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            name: account.name.clone().unwrap_or_default(),
            email: account.username.clone(),
        }
    }
}

impl AccountSummary {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Interactive sign-in request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub scopes: Vec<String>,
}

/// Token request, silent or interactive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub scopes: Vec<String>,
    pub account: Option<Account>,
}

/// Successful outcome of a login or token request.
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    pub access_token: SecureString,
    pub account: Account,
    pub scopes: Vec<String>,
    pub expires_on: DateTime<Utc>,
}

/// A constructed identity provider client.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Accounts currently known to the client, in the client's order.
    fn list_accounts(&self) -> Vec<Account>;

    /// Run the interactive sign-in flow.
    async fn interactive_login(
        &self,
        request: &LoginRequest,
    ) -> Result<AuthenticationResult, ProviderError>;

    /// Run the interactive sign-out flow for `account`.
    async fn interactive_logout(&self, account: &Account) -> Result<(), ProviderError>;

    /// Acquire a token without user interaction.
    async fn silent_token(
        &self,
        request: &TokenRequest,
    ) -> Result<AuthenticationResult, ProviderError>;

    /// Acquire a token through the interactive flow.
    async fn interactive_token(
        &self,
        request: &TokenRequest,
    ) -> Result<AuthenticationResult, ProviderError>;
}

/// A loaded identity library able to construct clients.
pub trait IdentityLibrary: Send + Sync {
    fn create_client(
        &self,
        config: &ClientConfiguration,
    ) -> Result<Arc<dyn IdentityClient>, ProviderError>;
}
