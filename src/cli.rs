//! Command-line surface over [`AuthConfigAdapter`].

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use graphauth::AuthConfigAdapter;

#[derive(Debug, Parser)]
#[command(name = "graphauth", version, about = "Sign in to Microsoft identity and fetch tokens")]
pub struct Cli {
    /// Start without loading the identity library
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Save a client id (and optional tenant) for the next start
    SetClientId {
        client_id: String,
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Print the active client id
    GetClientId,
    /// Remove saved client and tenant ids
    ClearClientId,
    /// Show configuration and client state
    Status,
    /// Sign in interactively
    Login,
    /// Sign out the current account
    Logout,
    /// Print the current account
    Account,
    /// Acquire an access token for one scope
    Token { scope: String },
}

/// Execute one command against an initialized adapter.
pub async fn run(adapter: &AuthConfigAdapter, command: Command) -> Result<()> {
    match command {
        Command::SetClientId { client_id, tenant } => {
            adapter.set_client_id(&client_id, tenant.as_deref());
            println!("Saved. The new client id applies on the next start.");
        }
        Command::GetClientId => match adapter.client_id() {
            Some(id) => println!("{}", id),
            None => println!("(not configured)"),
        },
        Command::ClearClientId => {
            adapter.clear_client_id();
            println!("Cleared saved client and tenant ids.");
        }
        Command::Status => {
            let config = adapter.config();
            println!("state:          {}", adapter.state().name());
            println!("configured:     {}", adapter.is_configured());
            println!("client id:      {}", adapter.client_id().unwrap_or("(not configured)"));
            println!("authority:      {}", config.authority());
            println!("redirect uri:   {}", config.redirect_uri);
            println!("cache location: {}", config.cache_location);
        }
        Command::Login => {
            let summary = adapter.login().await?;
            println!("{}", summary.to_json()?);
        }
        Command::Logout => {
            adapter.logout().await?;
            println!("Signed out.");
        }
        Command::Account => match adapter.account() {
            Some(summary) => println!("{}", summary.to_json()?),
            None => println!("null"),
        },
        Command::Token { scope } => {
            let token = adapter.acquire_token(&scope).await?;
            info!("Acquired token for {}", scope);
            println!("{}", token);
        }
    }

    Ok(())
}
