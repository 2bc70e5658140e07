use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{GradeJob, Submission, SubmissionState, Verdict};
use mq::Publisher;
use store::{StoreError, SubmissionStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SweeperConfig;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub abandoned: usize,
    pub failed: usize,
}

/// Recovers submissions whose worker vanished or whose job never arrived.
///
/// Stale submissions are republished at most once per `pending_timeout`
/// until they have been claimed or republished `max_attempts` times, then
/// finalized as `internal_error`. Republishing is redelivery; workers drop
/// the duplicate if another one holds the lease.
pub struct LeaseSweeper {
    store: Arc<dyn SubmissionStore>,
    publisher: Arc<dyn Publisher<GradeJob>>,
    config: SweeperConfig,
}

impl LeaseSweeper {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        publisher: Arc<dyn Publisher<GradeJob>>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Scan every `scan_interval` until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            scan_interval_secs = self.config.scan_interval_secs,
            pending_timeout_secs = self.config.pending_timeout_secs,
            max_attempts = self.config.max_attempts,
            "Starting lease sweeper"
        );

        let mut interval = tokio::time::interval(self.config.scan_interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.sweep_once(Utc::now()).await {
                error!(error = %e, "Lease sweep failed");
            }
        }
        info!("Lease sweeper stopped");
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let pending_before = chrono::Duration::from_std(self.config.pending_timeout())
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self.store.list_stale(now, pending_before).await?;
        let mut report = SweepReport::default();
        if stale.is_empty() {
            return Ok(report);
        }

        info!(count = stale.len(), "Found stale submissions");
        for submission in stale {
            if submission.attempts >= self.config.max_attempts
                || submission.requeues >= self.config.max_attempts
            {
                self.abandon(&submission, &mut report).await;
            } else {
                self.requeue(&submission, now, &mut report).await;
            }
        }
        Ok(report)
    }

    async fn requeue(
        &self,
        submission: &Submission,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        match self
            .store
            .mark_requeued(submission.id, submission.requeues, now)
            .await
        {
            Ok(true) => {}
            Ok(false) | Err(StoreError::AlreadyFinalized(_)) => {
                debug!(submission_id = %submission.id, "Requeue already handled elsewhere");
                return;
            }
            Err(e) => {
                error!(submission_id = %submission.id, error = %e, "Failed to record requeue");
                report.failed += 1;
                return;
            }
        }

        match self
            .publisher
            .publish(&GradeJob::for_submission(submission))
            .await
        {
            Ok(()) => {
                info!(
                    submission_id = %submission.id,
                    state = %submission.state,
                    attempts = submission.attempts,
                    requeues = submission.requeues + 1,
                    "Republished stale submission"
                );
                report.requeued += 1;
            }
            Err(e) => {
                error!(submission_id = %submission.id, error = %e, "Failed to republish");
                report.failed += 1;
            }
        }
    }

    async fn abandon(&self, submission: &Submission, report: &mut SweepReport) {
        let detail = Verdict::error(format!(
            "abandoned after {} grading attempts and {} requeues",
            submission.attempts, submission.requeues
        ));
        match self
            .store
            .update_terminal(submission.id, SubmissionState::InternalError, &detail)
            .await
        {
            Ok(_) => {
                warn!(
                    submission_id = %submission.id,
                    attempts = submission.attempts,
                    requeues = submission.requeues,
                    "Abandoned submission marked internal_error"
                );
                report.abandoned += 1;
            }
            Err(StoreError::AlreadyFinalized(_)) => {}
            Err(e) => {
                error!(submission_id = %submission.id, error = %e, "Failed to abandon submission");
                report.failed += 1;
            }
        }
    }
}
