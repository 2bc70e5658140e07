use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use common::GradeJob;
use common::config::MqBackend;
use mq::{Publisher, RedisBroker};
use serde::Serialize;
use server::{IntakeService, LeaseSweeper, ProblemCatalogue, QueryService, ServerAppConfig};
use store::DbSubmissionStore;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Submission grading pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a submission and queue it for grading
    Submit {
        /// Submitting caller
        #[arg(long, env = "JUDGELINE_OWNER")]
        owner: String,
        #[arg(long)]
        problem: String,
        /// Source file, or "-" for stdin
        file: PathBuf,
    },
    /// Show one submission
    Status {
        #[arg(long, env = "JUDGELINE_OWNER")]
        owner: String,
        id: Uuid,
    },
    /// List submissions, newest first
    List {
        #[arg(long, env = "JUDGELINE_OWNER")]
        owner: String,
        #[arg(long)]
        page: Option<u64>,
        #[arg(long)]
        per_page: Option<u64>,
    },
    /// Grade a file locally without touching the queue or the database
    Grade {
        #[arg(long)]
        problem: String,
        /// Source file, or "-" for stdin
        file: PathBuf,
    },
    /// Run the lease sweeper until interrupted
    Sweep {
        /// Run a single scan and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    let config = ServerAppConfig::load().context("Failed to load config")?;

    match cli.command {
        Commands::Submit {
            owner,
            problem,
            file,
        } => {
            let code = read_source(&file).await?;
            let catalogue = ProblemCatalogue::discover(&config.problems.dir).with_context(|| {
                format!("Failed to read problems directory {}", config.problems.dir)
            })?;
            let store = Arc::new(DbSubmissionStore::connect(&config.database).await?);
            let intake = IntakeService::new(
                store,
                connect_publisher(&config).await?,
                catalogue,
                config.intake.clone(),
            );
            let submission = intake.submit(&owner, &problem, &code).await?;
            print_json(&submission)?;
        }
        Commands::Status { owner, id } => {
            let store = Arc::new(DbSubmissionStore::connect(&config.database).await?);
            let submission = QueryService::new(store).get(&owner, id).await?;
            print_json(&submission)?;
        }
        Commands::List {
            owner,
            page,
            per_page,
        } => {
            let store = Arc::new(DbSubmissionStore::connect(&config.database).await?);
            let list = QueryService::new(store).list(&owner, page, per_page).await?;
            info!(
                total = list.total,
                page = list.page,
                total_pages = list.total_pages,
                "Listed submissions"
            );
            print_json(&list.items)?;
        }
        Commands::Grade { problem, file } => {
            let code = read_source(&file).await?;
            let grader = worker::build_grader(&config.worker, &config.problems);
            let verdict = grader.grade(&problem, &code).await;
            print_json(&verdict)?;
        }
        Commands::Sweep { once } => {
            let store = Arc::new(DbSubmissionStore::connect(&config.database).await?);
            let sweeper = LeaseSweeper::new(
                store,
                connect_publisher(&config).await?,
                config.sweeper.clone(),
            );
            if once {
                let report = sweeper.sweep_once(chrono::Utc::now()).await?;
                info!(
                    requeued = report.requeued,
                    abandoned = report.abandoned,
                    failed = report.failed,
                    "Sweep finished"
                );
            } else {
                sweeper.run(shutdown_on_ctrl_c()).await;
            }
        }
    }

    Ok(())
}

async fn connect_publisher(
    config: &ServerAppConfig,
) -> anyhow::Result<Arc<dyn Publisher<GradeJob>>> {
    match config.mq.backend {
        MqBackend::Redis => Ok(Arc::new(
            RedisBroker::<GradeJob>::connect(&config.mq)
                .await
                .context("Failed to connect to broker")?,
        )),
        MqBackend::Memory => {
            bail!("the memory broker cannot reach separate workers, use mq.backend = \"redis\"")
        }
    }
}

async fn read_source(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut code = String::new();
        tokio::io::stdin()
            .read_to_string(&mut code)
            .await
            .context("Failed to read stdin")?;
        return Ok(code);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });
    shutdown
}
