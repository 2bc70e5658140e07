use std::sync::Arc;

use common::GradeJob;
use common::config::{MqBackend, ProblemsConfig};
use common::storage::FilesystemTestCaseStore;
use mq::{Consumer, RedisBroker};
use store::DbSubmissionStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{WorkerAppConfig, WorkerConfig};
use crate::error::{Result, WorkerError};
use crate::grader::Grader;
use crate::handlers::{GradeHandler, HandlerSettings};
use crate::sandbox::ProcessSandbox;

/// Grader wired to the filesystem test cases and the process sandbox.
pub fn build_grader(worker: &WorkerConfig, problems: &ProblemsConfig) -> Grader {
    let mut sandbox = ProcessSandbox::new(worker.interpreter.clone(), worker.interpreter_args.clone());
    if let Some(dir) = &worker.scratch_dir {
        sandbox = sandbox.with_scratch_dir(dir);
    }

    Grader::new(
        Arc::new(FilesystemTestCaseStore::new(&problems.dir)),
        Arc::new(sandbox),
    )
    .with_case_timeout(worker.case_timeout())
}

/// N concurrent graders fed by one consumer.
pub struct WorkerPool {
    consumer: Arc<dyn Consumer<GradeJob>>,
    handler: Arc<GradeHandler>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        consumer: Arc<dyn Consumer<GradeJob>>,
        handler: Arc<GradeHandler>,
        concurrency: usize,
    ) -> Self {
        Self {
            consumer,
            handler,
            concurrency,
        }
    }

    /// Run until `shutdown` is cancelled; jobs in hand are finished first.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(concurrency = self.concurrency, "Worker pool started");
        self.consumer
            .consume(self.handler.clone(), self.concurrency, shutdown)
            .await?;
        info!("Worker pool stopped");
        Ok(())
    }
}

/// Connect to the configured store and broker and run the pool.
pub async fn run(config: WorkerAppConfig, shutdown: CancellationToken) -> Result<()> {
    let store = Arc::new(DbSubmissionStore::connect(&config.database).await?);

    let consumer: Arc<dyn Consumer<GradeJob>> = match config.mq.backend {
        MqBackend::Redis => Arc::new(RedisBroker::<GradeJob>::connect(&config.mq).await?),
        MqBackend::Memory => {
            return Err(WorkerError::Unsupported(
                "the memory broker cannot be shared across processes, use mq.backend = \"redis\""
                    .into(),
            ));
        }
    };

    let grader = Arc::new(build_grader(&config.worker, &config.problems));
    let handler = Arc::new(GradeHandler::new(
        store,
        grader,
        HandlerSettings::from(&config.worker),
    ));

    WorkerPool::new(consumer, handler, config.worker.concurrency)
        .run(shutdown)
        .await
}
