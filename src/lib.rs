//! graphauth - Microsoft identity sign-in adapter.
//!
//! Resolves a client/tenant id, constructs an identity client once and exposes
//! login, logout, account lookup and token acquisition on top of it.

#![deny(clippy::all)]

pub mod adapter;
pub mod config;
pub mod error;
pub mod identity;
pub mod overrides;
pub mod settings;

pub use adapter::{AdapterState, AuthConfigAdapter};
pub use config::{ClientConfiguration, Config, InjectedValues};
pub use error::{AdapterError, ProviderError};
pub use identity::{AccountSummary, IdentityClient, IdentityLibrary};
