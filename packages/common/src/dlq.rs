use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::RetryAttempt;

/// Error codes for dead-lettered grade jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DlqErrorCode {
    /// The handler reported a failure it could not recover from.
    GradingFailed,
    /// The worker died mid-job on every delivery.
    RedeliveriesExhausted,
    /// Failed to deserialize message payload.
    DeserializationError,
}

impl DlqErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GradingFailed => "GRADING_FAILED",
            Self::RedeliveriesExhausted => "REDELIVERIES_EXHAUSTED",
            Self::DeserializationError => "DESERIALIZATION_ERROR",
        }
    }
}

impl std::fmt::Display for DlqErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Envelope for transporting failed messages to the DLQ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEnvelope {
    /// Original message ID (job_id).
    pub message_id: String,
    /// Message type of the failed payload (e.g. "grade_job").
    pub message_type: String,
    /// `None` when the payload could not be decoded far enough to tell.
    pub submission_id: Option<Uuid>,
    /// Full serialized message payload.
    pub payload: serde_json::Value,
    pub error_code: DlqErrorCode,
    pub error_message: String,
    /// Deliveries that failed before the message reached the DLQ.
    pub retry_history: Vec<RetryAttempt>,
}

impl DlqEnvelope {
    /// Extract `submission_id` from a raw payload, if present and well-formed.
    pub fn submission_id_of(payload: &serde_json::Value) -> Option<Uuid> {
        payload
            .get("submission_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}
