use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::submission_status::SubmissionState;
use crate::verdict::Verdict;

/// One code payload bound to one problem, tracked through grading.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub problem_id: String,
    /// Caller that submitted the code. Only this caller may query it.
    pub owner_id: String,
    pub code: String,
    pub state: SubmissionState,
    /// Set exactly once, when the submission enters a terminal state.
    pub verdict_detail: Option<Verdict>,
    /// Number of times a worker has claimed this submission.
    pub attempts: u32,
    /// Worker currently holding the lease (while running).
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Times the sweeper has republished this submission.
    #[serde(default)]
    pub requeues: u32,
    #[serde(default)]
    pub requeued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Changes only on state transitions.
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    /// Create a pending submission with a fresh id.
    pub fn new(
        problem_id: impl Into<String>,
        owner_id: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            problem_id: problem_id.into(),
            owner_id: owner_id.into(),
            code: code.into(),
            state: SubmissionState::Pending,
            verdict_detail: None,
            attempts: 0,
            worker_id: None,
            lease_expires_at: None,
            requeues: 0,
            requeued_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True if the submission is running under a lease that has not expired.
    pub fn has_live_lease(&self, now: DateTime<Utc>) -> bool {
        self.state == SubmissionState::Running
            && self.lease_expires_at.is_some_and(|expires| expires > now)
    }
}
