use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use failsafe_pipeline::{
    canonical::{AnalysisOptions, AnalyzeRequest},
    config::{Config, LogFormat},
    robustness::{AttackParams, AttackType},
    server::{FactCheckService, RpcServer},
    storage::SqliteStorage,
};

#[derive(Debug, Parser)]
#[command(name = "failsafe-pipeline", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve JSON-RPC requests on stdin/stdout (default)
    Serve,
    /// Analyze a single claim and print the report as JSON
    Analyze {
        /// Claim text
        text: Option<String>,
        /// Analyze the text behind this URL instead
        #[arg(long)]
        url: Option<String>,
        /// Language override (ISO 639-1)
        #[arg(long)]
        language: Option<String>,
        /// Leave the argument graph out of the report
        #[arg(long)]
        no_graph: bool,
        /// Session to attribute the analysis to
        #[arg(long)]
        session: Option<String>,
        /// User to attribute the analysis to
        #[arg(long)]
        user: Option<String>,
    },
    /// Run an adversarial robustness suite over the given claims
    Robustness {
        #[arg(required_unless_present = "synthetic")]
        inputs: Vec<String>,
        /// Run this many generated cases instead of the given claims
        #[arg(long, conflicts_with_all = ["inputs", "attacks"])]
        synthetic: Option<usize>,
        /// Attack families to run (default: all)
        #[arg(long, value_delimiter = ',')]
        attacks: Vec<AttackType>,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        detector_base_url = %config.detectors.base_url,
        "Claim analysis pipeline starting..."
    );

    let state = Arc::new(build_service(config).await?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let server = RpcServer::new(state);
            info!("Server ready, waiting for requests on stdin...");

            if let Err(e) = server.run().await {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
            info!("Server shutdown complete");
        }
        Command::Analyze {
            text,
            url,
            language,
            no_graph,
            session,
            user,
        } => {
            let request = AnalyzeRequest {
                text,
                url,
                language,
                options: AnalysisOptions {
                    include_graph: !no_graph,
                },
                session_id: session,
                user_id: user,
                ..Default::default()
            };
            let report = state.analyze(&request).await?;
            println!("{}", serde_json::to_string_pretty(report.as_ref())?);
        }
        Command::Robustness {
            synthetic: Some(count),
            seed,
            ..
        } => {
            let report = state.run_synthetic_robustness(count, seed).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Robustness {
            inputs,
            attacks,
            seed,
            synthetic: None,
        } => {
            let attacks = if attacks.is_empty() {
                AttackType::ALL.to_vec()
            } else {
                attacks
            };
            let params = AttackParams {
                seed,
                ..Default::default()
            };
            let report = state.run_robustness(&inputs, &attacks, &params).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Assemble the service, attaching and restoring durable storage when a
/// database path is configured.
async fn build_service(config: Config) -> anyhow::Result<FactCheckService> {
    let database = config.database.clone();
    let mut service = FactCheckService::from_config(config)?;

    if let Some(database) = database {
        let storage = match SqliteStorage::new(&database).await {
            Ok(s) => {
                info!(path = %database.path.display(), "Database initialized");
                s
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize database");
                return Err(e.into());
            }
        };
        service = service.with_storage(Arc::new(storage));
        service.restore().await?;
    }

    Ok(service)
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
