use mq::MqError;
use store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Why a submission was not accepted for grading.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("unknown problem {0}")]
    UnknownProblem(String),

    #[error("Missing required parameters or empty code")]
    EmptyCode,

    #[error("code is {size} bytes, limit is {limit}")]
    CodeTooLarge { size: usize, limit: usize },

    #[error("code contains disallowed pattern {0:?}")]
    UnsafeCode(String),

    #[error("failed to record submission: {0}")]
    Store(#[from] StoreError),

    /// The submission exists in `pending`; the sweeper republishes it.
    #[error("submission {submission_id} recorded but not queued: {source}")]
    Enqueue {
        submission_id: Uuid,
        #[source]
        source: MqError,
    },
}

impl IntakeError {
    /// True for rejections caused by the request itself.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnknownProblem(_) | Self::EmptyCode | Self::CodeTooLarge { .. } | Self::UnsafeCode(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("submission {0} not found")]
    NotFound(Uuid),

    #[error("submission {0} belongs to another owner")]
    Forbidden(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}
