use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use oauth_login::{
    FlowController, LoginConfig, MemorySession, MemoryStore, OAuthError, ProviderRegistry,
    check_provider_keys,
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "oauth-login",
    about = "Inspect oauth login provider configuration."
)]
struct Cli {
    /// Provider configuration file (TOML).
    #[arg(long, short, default_value = "oauth-login.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that every provider key in storage still has configuration.
    Check {
        /// A provider key found in stored connections. Repeatable.
        #[arg(long = "stored-key")]
        stored_keys: Vec<String>,
    },
    /// Print the login redirect URL for a provider.
    AuthorizeUrl {
        provider: String,
        /// Open the URL in the default browser.
        #[arg(long)]
        open: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, OAuthError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oauth_login=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = LoginConfig::from_path(&cli.config)?;
    let registry = ProviderRegistry::from_config(&config)?;

    match cli.command {
        Command::Check { stored_keys } => run_check(&config, stored_keys),
        Command::AuthorizeUrl { provider, open } => {
            run_authorize_url(config, registry, &provider, open)
        }
    }
}

fn run_check(config: &LoginConfig, stored_keys: Vec<String>) -> Result<ExitCode, OAuthError> {
    let stored: BTreeSet<String> = stored_keys.into_iter().collect();
    match check_provider_keys(&stored, config) {
        Some(drift) => {
            eprintln!("{drift}");
            Ok(ExitCode::FAILURE)
        }
        None => {
            info!(providers = config.providers.len(), "oauth configuration ok");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_authorize_url(
    config: LoginConfig,
    registry: ProviderRegistry,
    provider: &str,
    open: bool,
) -> Result<ExitCode, OAuthError> {
    let store = Arc::new(MemoryStore::new());
    let flow = FlowController::new(Arc::new(registry), store.clone(), store, config);
    let mut session = MemorySession::new();
    let url = flow.handle_login_request(provider, &mut session, None)?;

    println!("{url}");
    if open {
        if let Err(err) = webbrowser::open(&url) {
            warn!("failed to open browser automatically: {err}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
