//! KRI relay: entry point.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use kri_relay_server::{build_state, serve, RelayConfig};

#[derive(Parser)]
#[command(
    name = "kri-relay",
    about = "HTTP relay that logs into the KRI research portal and returns researcher records as JSON",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP relay (default).
    Serve {
        /// Listen address (host:port). Defaults to 0.0.0.0:$PORT.
        #[arg(long)]
        addr: Option<String>,

        /// Shared secret expected in the x-api-token header.
        /// Also reads from API_TOKEN env var.
        #[arg(long)]
        token: Option<String>,
    },

    /// Print the resolved configuration with secrets masked.
    CheckConfig,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   kri-relay completions bash > ~/.local/share/bash-completion/completions/kri-relay
    ///   kri-relay completions zsh > ~/.zfunc/_kri-relay
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Serve {
        addr: None,
        token: None,
    }) {
        Commands::Serve { addr, token } => {
            let config = RelayConfig::from_env()?.with_overrides(addr, token);

            tracing::info!("KRI relay v{}", env!("CARGO_PKG_VERSION"));
            tracing::info!("Portal: {}", config.portal_origin);
            if !config.credentials.is_complete() {
                tracing::warn!("Portal credentials are not set; logins will fail until KRI_ID_B64/KRI_PW_B64 or KRI_ID/KRI_PW are provided");
            }
            if config.api_token.is_none() {
                tracing::warn!("API_TOKEN is not set; every /kri route will answer 401");
            }

            let state = build_state(&config)?;
            serve(&config.addr, state).await?;
        }

        Commands::CheckConfig => {
            let config = RelayConfig::from_env()?;
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "kri-relay", &mut std::io::stdout());
        }
    }

    Ok(())
}
