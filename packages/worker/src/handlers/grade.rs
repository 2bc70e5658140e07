use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::retry::{BackoffPolicy, retry_with_backoff};
use common::{GradeJob, SubmissionState, Verdict};
use mq::{JobHandler, JobOutcome};
use store::{StoreError, SubmissionStore, TerminalWrite};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::grader::Grader;

/// Lease and write-retry settings for one worker.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub worker_id: String,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub write_policy: BackoffPolicy,
}

impl From<&WorkerConfig> for HandlerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            worker_id: config.id.clone(),
            lease_ttl: config.lease_ttl(),
            heartbeat_interval: config.heartbeat_interval(),
            write_policy: config.write_policy(),
        }
    }
}

/// Grades one submission per delivered [`GradeJob`] and records the verdict.
///
/// Reports `Failed` only for jobs that cannot succeed on redelivery; it
/// never panics and never leaves its heartbeat running.
pub struct GradeHandler {
    store: Arc<dyn SubmissionStore>,
    grader: Arc<Grader>,
    settings: HandlerSettings,
}

/// Stops the lease heartbeat when grading ends, however it ends.
struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl GradeHandler {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        grader: Arc<Grader>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            store,
            grader,
            settings,
        }
    }

    #[instrument(
        skip_all,
        fields(
            submission_id = %job.submission_id,
            job_id = %job.job_id,
            worker_id = %self.settings.worker_id,
        )
    )]
    pub async fn process(&self, job: GradeJob) -> JobOutcome {
        let id = job.submission_id;

        match self.store.get(id).await {
            Ok(None) => {
                warn!("Submission not found, dropping job");
                return JobOutcome::failed(format!("submission {id} not found"));
            }
            Ok(Some(s)) if s.state.is_terminal() => {
                info!(state = %s.state, "Submission already finalized, skipping");
                return JobOutcome::Completed;
            }
            Ok(Some(_)) => {}
            Err(e) => return self.fail(id, format!("failed to load submission: {e}")).await,
        }

        let submission = match self
            .store
            .claim(id, &self.settings.worker_id, self.settings.lease_ttl)
            .await
        {
            Ok(s) => s,
            Err(StoreError::Leased(_)) => {
                info!("Submission is being graded elsewhere, skipping");
                return JobOutcome::Completed;
            }
            Err(StoreError::AlreadyFinalized(_)) => {
                info!("Submission finalized before claim, skipping");
                return JobOutcome::Completed;
            }
            Err(StoreError::NotFound(_)) => {
                return JobOutcome::failed(format!("submission {id} not found"));
            }
            Err(e) => return self.fail(id, format!("failed to claim submission: {e}")).await,
        };

        info!(attempt = submission.attempts, "Grading submission");
        let _heartbeat = self.spawn_heartbeat(id, submission.attempts);

        let grading = tokio::spawn({
            let grader = Arc::clone(&self.grader);
            async move {
                grader
                    .grade(&submission.problem_id, &submission.code)
                    .await
            }
        });

        match grading.await {
            Ok(verdict) => self.finalize(id, verdict).await,
            Err(e) => {
                error!(error = %e, "Grading task failed");
                self.fail(id, format!("grading failed: {e}")).await
            }
        }
    }

    async fn finalize(&self, id: Uuid, verdict: Verdict) -> JobOutcome {
        let state = SubmissionState::from_verdict(verdict.status);
        let written = retry_with_backoff(
            self.settings.write_policy,
            || self.store.update_terminal(id, state, &verdict),
            StoreError::is_transient,
        )
        .await;

        match written {
            Ok(TerminalWrite::Applied) => {
                info!(state = %state, "Submission finalized");
                JobOutcome::Completed
            }
            Ok(TerminalWrite::Unchanged) => {
                debug!(state = %state, "Verdict already recorded");
                JobOutcome::Completed
            }
            Err(StoreError::AlreadyFinalized(_)) => {
                warn!(state = %state, "Submission finalized concurrently, keeping existing verdict");
                JobOutcome::Completed
            }
            Err(e) => self.fail(id, format!("failed to record verdict: {e}")).await,
        }
    }

    /// Best-effort `internal_error` write, then report the job as failed.
    async fn fail(&self, id: Uuid, reason: String) -> JobOutcome {
        let detail = Verdict::error(reason.clone());
        match self
            .store
            .update_terminal(id, SubmissionState::InternalError, &detail)
            .await
        {
            Ok(_) => warn!(reason = %reason, "Submission marked internal_error"),
            Err(StoreError::AlreadyFinalized(_)) => {
                debug!("Submission already finalized, fallback not needed");
            }
            Err(e) => error!(
                reason = %reason,
                error = %e,
                "Fallback write failed, submission left for the sweeper"
            ),
        }
        JobOutcome::Failed { reason }
    }

    fn spawn_heartbeat(&self, id: Uuid, attempt: u32) -> HeartbeatGuard {
        let store = Arc::clone(&self.store);
        let worker_id = self.settings.worker_id.clone();
        let lease_ttl = self.settings.lease_ttl;
        let interval = self.settings.heartbeat_interval;

        HeartbeatGuard(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.heartbeat(id, &worker_id, attempt, lease_ttl).await {
                    Ok(()) => debug!(submission_id = %id, "Lease extended"),
                    Err(StoreError::LeaseLost(_)) => {
                        warn!(submission_id = %id, "Lease lost while grading");
                        break;
                    }
                    Err(e) => warn!(submission_id = %id, error = %e, "Heartbeat failed"),
                }
            }
        }))
    }
}

#[async_trait]
impl JobHandler<GradeJob> for GradeHandler {
    async fn handle(&self, job: GradeJob) -> JobOutcome {
        self.process(job).await
    }
}
