//! Storefront command-line client
//!
//! Thin host around `storefront-auth`:
//! 1. Loads configuration and the persisted session file
//! 2. Runs one command through the authenticated client
//! 3. Prints the JSON result on stdout, logs on stderr

mod cli;
mod config;
mod error;
mod metrics;

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use storefront_auth::{
    Client, CredentialStore, FileStore, ReqwestTransport, RouteChannel, Session, SignupData,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, USAGE};
use crate::config::Config;

/// Route the CLI starts on; teardown moves it to the landing route.
const START_ROUTE: &str = "/session";

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match Cli::parse(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let prometheus = if cli.metrics {
        Some(metrics::install_recorder().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        session_file = %config.storage.session_file.display(),
        refresh_credential = ?config.auth.refresh_credential,
        "configuration loaded"
    );

    let file_store = FileStore::open(config.storage.session_file.clone()).with_context(|| {
        format!(
            "failed to open session file {}",
            config.storage.session_file.display()
        )
    })?;
    let store = CredentialStore::new(Arc::new(file_store));

    let transport = ReqwestTransport::new(
        config.api.base_url.clone(),
        Duration::from_secs(config.api.timeout_secs),
        config.auth.refresh_credential.uses_cookies(),
    )
    .context("failed to build HTTP client")?;

    let (routes, mut route_rx) = RouteChannel::new(START_ROUTE);
    let client = Client::new(Arc::new(transport), store, Arc::new(routes), &config.auth);
    let session = Session::new(client);

    if let Some(user) = session.restore() {
        info!(user_id = user.id, email = %user.email, "using stored session");
    }

    let outcome = run(&session, cli.command).await;

    // Teardown signals navigation; a CLI has no screen, so it is reported.
    if route_rx.has_changed().unwrap_or(false) {
        let route = route_rx.borrow_and_update().clone();
        warn!(%route, "session ended, sign in again");
    }

    if let Some(handle) = prometheus {
        eprintln!("{}", handle.render());
    }

    let output = outcome?;
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to encode output")?
    );
    Ok(())
}

async fn run(session: &Session, command: Command) -> Result<serde_json::Value> {
    let output = match command {
        Command::Login { email, password } => {
            let auth = session
                .login(&email, &password)
                .await
                .context("login failed")?;
            json!({ "message": auth.message, "user": auth.user })
        }
        Command::Register { email, password } => {
            let auth = session
                .register(&SignupData::new(email, password))
                .await
                .context("registration failed")?;
            json!({ "message": auth.message, "user": auth.user })
        }
        Command::Logout => {
            session.logout();
            json!({ "signed_out": true })
        }
        Command::Whoami => {
            if !session.is_authenticated() {
                anyhow::bail!("not signed in");
            }
            let user = session
                .current_user()
                .await
                .context("failed to fetch current user")?;
            json!(user)
        }
        Command::Get { path } => session
            .client()
            .get_json::<serde_json::Value>(&path)
            .await
            .with_context(|| format!("GET {path} failed"))?,
        Command::Refresh => {
            let token = session.refresh().await.context("refresh failed")?;
            json!({ "refreshed": true, "access_token_len": token.len() })
        }
    };
    Ok(output)
}
