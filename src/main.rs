//! StreamTags - live stream tagging daemon
//!
#![doc = "StreamTags - live stream tagging daemon"]
#![doc = "Main entry point for the StreamTags application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use streamtags::cli::{Cli, Commands, CredentialCommand, SessionCommand};
use streamtags::commands;
use streamtags::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Run {
            events,
            attachments_dir,
        } => {
            tracing::info!("Starting tagging daemon");
            commands::run::run_daemon(config, events, attachments_dir).await?;
            Ok(())
        }
        Commands::Export {
            vod,
            format,
            output,
        } => {
            tracing::debug!(vod_id = %vod, format = %format, "Starting export");
            commands::export::run_export(config, vod, format, output).await?;
            Ok(())
        }
        Commands::Sessions { command } => match command {
            SessionCommand::List => {
                commands::sessions::list_sessions(&config).await?;
                Ok(())
            }
            SessionCommand::Show { id } => {
                commands::sessions::show_session(&config, &id).await?;
                Ok(())
            }
        },
        Commands::Credentials { command } => match command {
            CredentialCommand::Status => {
                commands::credentials::show_status(&config).await?;
                Ok(())
            }
            CredentialCommand::Refresh => {
                tracing::info!("Refreshing credentials on demand");
                commands::credentials::refresh(&config).await?;
                Ok(())
            }
            CredentialCommand::RotateKey { new_secret } => {
                tracing::info!("Rotating credential encryption key");
                commands::credentials::rotate_key(&config, &new_secret).await?;
                Ok(())
            }
        },
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "streamtags=debug"
    } else {
        "streamtags=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Logs go to stderr; stdout carries replies and exports.
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
