#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::verdict::VerdictStatus;

/// Lifecycle state of a submission.
///
/// `Pending -> Running -> {Accepted, WrongAnswer, RuntimeError, InternalError}`.
/// A pending submission may also be finalized directly (fallback writes).
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    /// Created by intake, waiting to be picked up by a worker.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "pending"))]
    Pending,
    /// Claimed by a worker holding a lease.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "running"))]
    Running,
    /// Every test case passed.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "accepted"))]
    Accepted,
    /// All cases ran cleanly but at least one output mismatched.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "wrong_answer"))]
    WrongAnswer,
    /// Program crashed or exited with non-zero code.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "runtime_error"))]
    RuntimeError,
    /// Execution fault, timeout, bad test data or infrastructure failure.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "internal_error"))]
    InternalError,
}

impl SubmissionState {
    /// Returns true if no further transition can occur.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Terminal state recorded for a verdict status.
    pub fn from_verdict(status: VerdictStatus) -> Self {
        match status {
            VerdictStatus::Ok => Self::Accepted,
            VerdictStatus::Fail => Self::WrongAnswer,
            VerdictStatus::Err => Self::InternalError,
        }
    }

    /// States a terminal write may start from.
    pub const OPEN: &'static [SubmissionState] = &[Self::Pending, Self::Running];

    /// All possible state values.
    pub const ALL: &'static [SubmissionState] = &[
        Self::Pending,
        Self::Running,
        Self::Accepted,
        Self::WrongAnswer,
        Self::RuntimeError,
        Self::InternalError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Accepted => "accepted",
            Self::WrongAnswer => "wrong_answer",
            Self::RuntimeError => "runtime_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for SubmissionState {
    fn default() -> Self {
        Self::Pending
    }
}

/// Error when parsing an invalid state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStateError {
    invalid: String,
}

impl fmt::Display for ParseStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid state '{}'. Valid values: {}",
            self.invalid,
            SubmissionState::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStateError {}

impl FromStr for SubmissionState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubmissionState::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| ParseStateError {
                invalid: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&SubmissionState::WrongAnswer).unwrap();
        assert_eq!(json, "\"wrong_answer\"");
        let parsed: SubmissionState = serde_json::from_str("\"internal_error\"").unwrap();
        assert_eq!(parsed, SubmissionState::InternalError);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "accepted".parse::<SubmissionState>().unwrap(),
            SubmissionState::Accepted
        );
        assert!("Accepted".parse::<SubmissionState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SubmissionState::Pending.is_terminal());
        assert!(!SubmissionState::Running.is_terminal());
        assert!(SubmissionState::Accepted.is_terminal());
        assert!(SubmissionState::RuntimeError.is_terminal());
    }

    #[test]
    fn test_verdict_mapping() {
        assert_eq!(
            SubmissionState::from_verdict(VerdictStatus::Ok),
            SubmissionState::Accepted
        );
        assert_eq!(
            SubmissionState::from_verdict(VerdictStatus::Fail),
            SubmissionState::WrongAnswer
        );
        assert_eq!(
            SubmissionState::from_verdict(VerdictStatus::Err),
            SubmissionState::InternalError
        );
    }
}
