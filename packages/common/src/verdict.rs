use serde::{Deserialize, Serialize};
use std::fmt;

/// Submission-level outcome vocabulary. Stable on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    /// Every case ran cleanly and matched.
    Ok,
    /// Every case ran cleanly, at least one mismatched.
    Fail,
    /// At least one case (or the setup) errored.
    Err,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Fail => "fail",
            Self::Err => "err",
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running one test case.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Input fed to the program.
    pub input: String,
    /// Expected output, edge-trimmed.
    pub expected: String,
    /// Edge-trimmed stdout, `None` when the case errored.
    pub actual: Option<String>,
    /// Error text, `None` when the program exited cleanly.
    pub error: Option<String>,
    #[serde(rename = "pass")]
    pub passed: bool,
}

impl ExecutionResult {
    pub fn errored(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregated grading outcome for one submission.
///
/// Serialized form is the contract exposed to presentation layers and the
/// value persisted as a submission's `verdict_detail`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    /// Present only when `status == err`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub results: Vec<ExecutionResult>,
}

impl Verdict {
    /// An `err` verdict with no executed cases.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Err,
            message: Some(message.into()),
            results: vec![],
        }
    }

    /// Derive the submission-level verdict from per-case results.
    ///
    /// Any error wins over mismatches, and the first error's text is
    /// surfaced as the message.
    pub fn from_results(results: Vec<ExecutionResult>) -> Self {
        if let Some(message) = results.iter().find_map(|r| r.error.clone()) {
            return Self {
                status: VerdictStatus::Err,
                message: Some(message),
                results,
            };
        }

        let status = if results.iter().all(|r| r.passed) {
            VerdictStatus::Ok
        } else {
            VerdictStatus::Fail
        };

        Self {
            status,
            message: None,
            results,
        }
    }
}
