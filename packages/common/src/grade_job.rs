use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mq::Message;
use crate::submission::Submission;

/// A grading job message sent to the worker queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeJob {
    /// Job identifier (UUID). A republished submission gets a new one.
    pub job_id: String,
    /// Submission being graded
    pub submission_id: Uuid,
    /// Key into the test case store
    pub problem_id: String,
    /// Source code to run
    pub code: String,
}

impl GradeJob {
    /// Create a new grade job with a generated UUID.
    pub fn new(submission_id: Uuid, problem_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            submission_id,
            problem_id: problem_id.into(),
            code: code.into(),
        }
    }

    /// Build the job that grades an existing submission.
    pub fn for_submission(submission: &Submission) -> Self {
        Self::new(
            submission.id,
            submission.problem_id.clone(),
            submission.code.clone(),
        )
    }
}

impl Message for GradeJob {
    fn message_type() -> &'static str {
        "grade_job"
    }

    fn message_id(&self) -> &str {
        &self.job_id
    }
}
