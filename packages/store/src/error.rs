use common::SubmissionState;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Submission {0} not found")]
    NotFound(Uuid),

    #[error("Submission {0} already exists")]
    Conflict(Uuid),

    #[error("Submission {0} is already finalized")]
    AlreadyFinalized(Uuid),

    #[error("Cannot finalize into non-terminal state {0}")]
    InvalidTransition(SubmissionState),

    #[error("Submission {0} is leased by a running worker")]
    Leased(Uuid),

    #[error("Lease on submission {0} was lost")]
    LeaseLost(Uuid),

    #[error("Corrupt record for submission {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl StoreError {
    /// Errors worth retrying: the store could not be reached or the
    /// statement failed for reasons unrelated to the submission's state.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}
