use std::path::Path;
use std::process::ExitCode;

use actix_web::{App, HttpServer, web};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod app;
mod db;
mod model;
mod queue;
mod retriever;
mod service;

use app::AppContext;
use model::{Config, Trigger};
use service::agent::{listen_for_triggers, publish_trigger};
use service::audit;
use service::ingestion::IngestionOptions;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Capacity of the in-process trigger channel
const TRIGGER_BUFFER: usize = 32;

#[derive(Debug, Parser)]
#[command(name = "safety-radar", version, about = "AI security research monitor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// HTTP API, queue worker, trigger listener and scheduled ingestion
    Serve,
    /// Run one ingestion pass and exit
    Ingest {
        #[arg(long)]
        days_back: Option<u32>,
        #[arg(long)]
        max_results: Option<usize>,
        /// Use in-memory backends; nothing is written to Redis
        #[arg(long)]
        dry_run: bool,
    },
    /// Ingest a larger window, optionally starting from a clean slate
    Backfill {
        #[arg(long)]
        days_back: u32,
        #[arg(long)]
        max_results: usize,
        #[arg(long)]
        dry_run: bool,
        /// Delete both streams and all dedup markers first
        #[arg(long)]
        reset: bool,
    },
    /// Run the curator once and exit
    Curate,
    /// Publish a manual trigger to running agents
    Trigger {
        /// ingest, process_batch or process_with_curator
        name: Trigger,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (ignore if missing)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // The audit directory comes from the config, so load it under a
    // temporary console subscriber before installing the real one
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt().with_env_filter(env_filter()).finish(),
        Config::from_env,
    );

    let audit_layer = match config.audit_dir.as_deref().map(Path::new) {
        Some(dir) => match audit::file_layer::<Registry>(dir) {
            Ok(layer) => Some(layer),
            Err(e) => {
                eprintln!("Audit log initialization failed for {}: {e}", dir.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };
    let (audit_layer, _audit_guard) = audit_layer.unzip();

    tracing_subscriber::registry()
        .with(audit_layer)
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(dir) = &config.audit_dir {
        tracing::info!(path = %Path::new(dir).join(audit::AUDIT_FILE_NAME).display(), "Audit log opened");
    }

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Ingest {
            days_back,
            max_results,
            dry_run,
        } => {
            let options = IngestionOptions {
                days_back: days_back.unwrap_or(config.ingestion.days_back),
                max_results: max_results.unwrap_or(config.ingestion.max_results),
            };
            ingest(config, options, dry_run, false).await
        }
        Command::Backfill {
            days_back,
            max_results,
            dry_run,
            reset,
        } => {
            let options = IngestionOptions {
                days_back,
                max_results,
            };
            ingest(config, options, dry_run, reset).await
        }
        Command::Curate => curate(config).await,
        Command::Trigger { name } => trigger(name).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "safety-radar failed");
            ExitCode::FAILURE
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

async fn serve(config: Config) -> Result<(), BoxError> {
    let bind_addr = config.bind_addr();
    let ctx = AppContext::new(config, false).await?;
    let agent = ctx.agent();

    let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_BUFFER);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(client) = ctx.backends.redis.clone() {
        let sender = trigger_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = listen_for_triggers(client, sender).await {
                tracing::error!(error = %e, "Trigger listener stopped");
            }
        });
    }

    let state = web::Data::new(ctx.api_state(trigger_tx));

    tracing::info!("Starting Safety Radar server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::health::configure)
            .configure(api::pipeline::configure)
            .configure(api::openapi::configure)
    })
    .bind(&bind_addr)?
    .run();
    let handle = server.handle();

    let server_task = async move {
        let result = server.await;
        let _ = shutdown_tx.send(true);
        result
    };
    let agent_task = async {
        let result = agent.run(trigger_rx, shutdown_rx).await;
        if result.is_err() {
            handle.stop(true).await;
        }
        result
    };

    let (server_result, agent_result) = tokio::join!(server_task, agent_task);
    agent_result?;
    server_result?;
    Ok(())
}

async fn ingest(
    config: Config,
    options: IngestionOptions,
    dry_run: bool,
    reset: bool,
) -> Result<(), BoxError> {
    let ctx = AppContext::new(config, dry_run).await?;
    let ingestion = ctx.ingestion();

    if reset {
        ingestion.reset().await?;
    }

    let summary = ingestion.run(options).await?;
    println!("{summary}");
    Ok(())
}

async fn curate(config: Config) -> Result<(), BoxError> {
    let ctx = AppContext::new(config, false).await?;
    let report = ctx.curator().run().await?;

    println!("# {}\n", report.briefing.briefing.headline);
    println!("{}", report.briefing.briefing.summary_markdown);
    if !report.stored {
        tracing::warn!("Briefing was not stored; the previous one is still published");
    }
    Ok(())
}

async fn trigger(name: Trigger) -> Result<(), BoxError> {
    let client = service::cache::connect_redis().await?;
    let receivers = publish_trigger(&client, name).await?;
    tracing::info!(trigger = %name, receivers = receivers, "Trigger published");
    if receivers == 0 {
        tracing::warn!("No agent is listening for triggers");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["safety-radar"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from([
            "safety-radar",
            "backfill",
            "--days-back",
            "7",
            "--max-results",
            "200",
            "--reset",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Backfill {
                days_back,
                max_results,
                dry_run,
                reset,
            }) => {
                assert_eq!((days_back, max_results), (7, 200));
                assert!(reset);
                assert!(!dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["safety-radar", "trigger", "process_batch"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Trigger {
                name: Trigger::ProcessBatch
            })
        ));

        assert!(Cli::try_parse_from(["safety-radar", "trigger", "reboot"]).is_err());
        assert!(Cli::try_parse_from(["safety-radar", "backfill", "--days-back", "7"]).is_err());
    }
}
