use std::sync::Arc;

use common::{GradeJob, Submission};
use mq::Publisher;
use store::SubmissionStore;
use tracing::{info, instrument, warn};

use crate::catalogue::ProblemCatalogue;
use crate::config::IntakeConfig;
use crate::error::IntakeError;

/// Validates submissions, records them as `pending` and enqueues one grade
/// job per submission.
pub struct IntakeService {
    store: Arc<dyn SubmissionStore>,
    publisher: Arc<dyn Publisher<GradeJob>>,
    catalogue: ProblemCatalogue,
    config: IntakeConfig,
    denylist: Vec<String>,
}

impl IntakeService {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        publisher: Arc<dyn Publisher<GradeJob>>,
        catalogue: ProblemCatalogue,
        config: IntakeConfig,
    ) -> Self {
        let denylist = config
            .denylist
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.to_lowercase())
            .collect();
        Self {
            store,
            publisher,
            catalogue,
            config,
            denylist,
        }
    }

    #[instrument(skip(self, code), fields(code_bytes = code.len()))]
    pub async fn submit(
        &self,
        owner_id: &str,
        problem_id: &str,
        code: &str,
    ) -> Result<Submission, IntakeError> {
        if let Err(e) = self.validate(problem_id, code) {
            info!(reason = %e, "Submission rejected");
            return Err(e);
        }

        let submission = Submission::new(problem_id, owner_id, code);
        self.store.create(&submission).await?;

        if let Err(e) = self
            .publisher
            .publish(&GradeJob::for_submission(&submission))
            .await
        {
            warn!(
                submission_id = %submission.id,
                error = %e,
                "Enqueue failed, submission left pending"
            );
            return Err(IntakeError::Enqueue {
                submission_id: submission.id,
                source: e,
            });
        }

        info!(submission_id = %submission.id, "Submission queued");
        Ok(submission)
    }

    fn validate(&self, problem_id: &str, code: &str) -> Result<(), IntakeError> {
        if !self.catalogue.contains(problem_id) {
            return Err(IntakeError::UnknownProblem(problem_id.to_string()));
        }
        if code.trim().is_empty() {
            return Err(IntakeError::EmptyCode);
        }
        if code.len() > self.config.max_code_bytes {
            return Err(IntakeError::CodeTooLarge {
                size: code.len(),
                limit: self.config.max_code_bytes,
            });
        }
        if self.config.denylist_enabled {
            let lowered = code.to_lowercase();
            if let Some(pattern) = self.denylist.iter().find(|p| lowered.contains(p.as_str())) {
                return Err(IntakeError::UnsafeCode(pattern.clone()));
            }
        }
        Ok(())
    }
}
