use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::TestCaseError;

/// One `(input, expected_output)` pair of a problem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// Read-only source of hidden test cases.
#[async_trait]
pub trait TestCaseStore: Send + Sync {
    /// Load the ordered test cases of a problem.
    ///
    /// Never returns an empty vector: a problem without cases is
    /// [`TestCaseError::Empty`].
    async fn load(&self, problem_id: &str) -> Result<Vec<TestCase>, TestCaseError>;
}
