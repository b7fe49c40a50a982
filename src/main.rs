use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use alert_sentinel::collab::generate_token;
use alert_sentinel::config::SentinelConfig;

/// Alert Sentinel - Webhook alert ingestion with live streaming
#[derive(Debug, Parser)]
#[command(name = "alert-sentinel", version, about)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "SENTINEL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// TOML config file (default: ./sentinel.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Host address to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config and PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print a fresh bot token
    Token,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut config = SentinelConfig::load(config.as_deref())?;
            config.apply_env()?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;

            tracing::info!(
                storage = ?config.storage.backend,
                signature = config.signature.enabled,
                "Starting alert-sentinel"
            );
            alert_sentinel::server::start(config).await?;
        }
        Commands::Token => {
            println!("{}", generate_token());
        }
    }

    Ok(())
}
