use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;
use votegate_common::load_config;
use votegate_events::MigrationOutcome;
use votegate_server::{Console, ConsoleHost, VoteGate};

#[derive(Parser)]
#[command(name = "votegate", about = "Gate commands behind a recent vote")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, env = "VOTEGATE_CONFIG", default_value = "./config/votegate.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Command {
    /// Read host events from stdin (default)
    Run,
    /// Print store and gate status
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Delete every vote record; requires `confirm`
    Wipe { token: Option<String> },
    /// Copy votes between the configured sqlite and mysql databases
    Migrate { from: String, to: String },
}

fn init_tracing(format: LogFormat, debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().with_writer(std::io::stderr).init(),
        LogFormat::Pretty => builder.with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "Could not load config {}. Create one or specify --config <path>",
            cli.config.display()
        )
    })?;
    init_tracing(cli.log_format, config.debug);
    tracing::info!(config = %cli.config.display(), "Starting votegate");

    let (host, mut main_rx) = ConsoleHost::new();
    let host = Arc::new(host);
    let app = VoteGate::init(config, host.clone())
        .await
        .context("Invalid configuration")?;

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let mut console = Console::new(&app, host, Some(cli.config.clone()), std::io::stdout());
            console
                .run(BufReader::new(tokio::io::stdin()), &mut main_rx)
                .await
        }
        Command::Info { json } => {
            let report = app.info().await;
            if json {
                serde_json::to_string_pretty(&report)
                    .map(|s| println!("{s}"))
                    .map_err(Into::into)
            } else {
                println!("{report}");
                Ok(())
            }
        }
        Command::Wipe { token } => app
            .wipe(token.as_deref().unwrap_or_default())
            .await
            .map(|deleted| println!("Wiped {deleted} vote records"))
            .map_err(Into::into),
        Command::Migrate { from, to } => match app.migrate(&from, &to).await {
            Ok(MigrationOutcome::Copied(n)) => {
                println!("Migrated {n} vote records from {from} to {to}");
                Ok(())
            }
            Ok(MigrationOutcome::Skipped) => {
                println!("Source and destination are the same database");
                Ok(())
            }
            Ok(MigrationOutcome::Failed(e)) => Err(e).context("Migration failed"),
            Err(e) => Err(e.into()),
        },
    };

    app.shutdown().await;
    result
}
