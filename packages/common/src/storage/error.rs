use thiserror::Error;

/// Errors that can occur while loading test cases.
#[derive(Debug, Error)]
pub enum TestCaseError {
    /// No test case resource exists for the problem.
    #[error("test cases not found for problem {0}")]
    NotFound(String),
    /// The resource exists but cannot be parsed.
    #[error("test cases for problem {problem_id} are corrupt: {reason}")]
    Corrupt { problem_id: String, reason: String },
    /// The resource parsed to zero test cases.
    #[error("no test cases found for problem {0}")]
    Empty(String),
    #[error("error reading test cases: {0}")]
    Io(#[from] std::io::Error),
}
