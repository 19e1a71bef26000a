//! Operator CLI: migrations, user provisioning, tokens and passwords.
//!
//! Every command prints one JSON object on stdout.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use budget_core::common::RequestScope;
use budget_core::domains::auth::data::UserData;
use budget_core::domains::auth::{build_provider, AuthService, Role, Roles};
use budget_core::kernel::{connect, CredentialStore};
use budget_core::Config;
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "budget_cli")]
#[command(about = "Budget server administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Create a user (`--user`) or a super administrator (`--admin`)
    Provision {
        #[arg(long, conflicts_with = "admin")]
        user: Option<String>,
        #[arg(long)]
        admin: Option<String>,
        /// Display name; defaults to the email
        #[arg(long)]
        name: Option<String>,
    },

    /// Issue a bearer token for an existing user
    Token {
        #[arg(long)]
        email: String,
    },

    /// Set a user's password; an empty password disables password login
    SetPassword {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize, Default)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

fn output(resp: &Response) -> Result<()> {
    println!("{}", serde_json::to_string(resp)?);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let store = connect(&config.database_url)
        .await
        .context("Failed to connect to credential store")?;

    let result = match cli.command {
        Commands::Migrate => cmd_migrate(store.as_ref()).await,
        Commands::Provision { user, admin, name } => {
            let auth = auth_service(&config, store)?;
            cmd_provision(&auth, user, admin, name).await
        }
        Commands::Token { email } => {
            let auth = auth_service(&config, store)?;
            cmd_token(&auth, &email).await
        }
        Commands::SetPassword { email, password } => {
            let auth = auth_service(&config, store)?;
            cmd_set_password(&auth, &email, &password).await
        }
    };

    match result {
        Ok(resp) => output(&resp),
        Err(e) => {
            output(&Response {
                success: false,
                message: Some(format!("{:#}", e)),
                ..Default::default()
            })?;
            std::process::exit(1);
        }
    }
}

fn auth_service(config: &Config, store: Arc<dyn CredentialStore>) -> Result<AuthService> {
    let provider = build_provider(&config.auth, store).context("Failed to build auth provider")?;
    Ok(AuthService::new(provider))
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_migrate(store: &dyn CredentialStore) -> Result<Response> {
    store.migrate().await.context("Failed to run migrations")?;
    Ok(Response {
        success: true,
        message: Some("migrations applied".to_string()),
        ..Default::default()
    })
}

async fn cmd_provision(
    auth: &AuthService,
    user: Option<String>,
    admin: Option<String>,
    name: Option<String>,
) -> Result<Response> {
    let (email, role) = match (user, admin) {
        (Some(email), None) => (email, Role::User),
        (None, Some(email)) => (email, Role::SuperAdmin),
        _ => bail!("pass exactly one of --user or --admin"),
    };
    let name = name.unwrap_or_else(|| email.clone());

    let scope = RequestScope::new();
    let created = auth
        .create_user(&scope, &email, &name, &Roles::from([role]))
        .await
        .with_context(|| format!("Failed to provision {}", email))?;

    Ok(Response {
        success: true,
        user: Some(UserData::from(created)),
        ..Default::default()
    })
}

async fn cmd_token(auth: &AuthService, email: &str) -> Result<Response> {
    let scope = RequestScope::new();
    let user = auth
        .get_user(&scope, email)
        .await
        .with_context(|| format!("Failed to get user {}", email))?;
    let token = auth
        .issue_token(&scope, &user)
        .await
        .context("Failed to issue token")?;

    Ok(Response {
        success: true,
        user: Some(UserData::from(user)),
        token: Some(token),
        ..Default::default()
    })
}

async fn cmd_set_password(auth: &AuthService, email: &str, password: &str) -> Result<Response> {
    let scope = RequestScope::new();
    let user = auth
        .get_user(&scope, email)
        .await
        .with_context(|| format!("Failed to get user {}", email))?;
    auth.set_password(&scope, &user, password)
        .await
        .with_context(|| format!("Failed to set password for {}", email))?;

    Ok(Response {
        success: true,
        message: Some(format!("password updated for {}", email)),
        ..Default::default()
    })
}
