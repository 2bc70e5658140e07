use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::error::TestCaseError;
use super::traits::{TestCase, TestCaseStore};

/// File name holding a problem's cases inside its directory.
pub const TEST_CASES_FILE: &str = "testcases.txt";

/// Filesystem-backed test case store.
///
/// Cases live at `{base_path}/{problem_id}/testcases.txt` as alternating
/// input and expected-output lines.
#[derive(Debug, Clone)]
pub struct FilesystemTestCaseStore {
    base_path: PathBuf,
}

impl FilesystemTestCaseStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the cases file for `problem_id`, or `None` if the id could
    /// escape the base directory.
    pub fn cases_path(&self, problem_id: &str) -> Option<PathBuf> {
        if !is_safe_problem_id(problem_id) {
            return None;
        }
        Some(self.base_path.join(problem_id).join(TEST_CASES_FILE))
    }
}

/// Problem ids are restricted to `[A-Za-z0-9_-]+`.
pub fn is_safe_problem_id(problem_id: &str) -> bool {
    !problem_id.is_empty()
        && problem_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse the line-pair format.
///
/// Every line is trimmed; line `2k` is the input of case `k` and line
/// `2k + 1` its expected output. An unpaired trailing line is dropped.
pub fn parse_test_cases(content: &str) -> Vec<TestCase> {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    lines
        .chunks_exact(2)
        .map(|pair| TestCase::new(pair[0], pair[1]))
        .collect()
}

#[async_trait]
impl TestCaseStore for FilesystemTestCaseStore {
    async fn load(&self, problem_id: &str) -> Result<Vec<TestCase>, TestCaseError> {
        let path = self
            .cases_path(problem_id)
            .ok_or_else(|| TestCaseError::NotFound(problem_id.to_string()))?;

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TestCaseError::NotFound(problem_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let content = String::from_utf8(bytes).map_err(|e| TestCaseError::Corrupt {
            problem_id: problem_id.to_string(),
            reason: e.to_string(),
        })?;

        let cases = parse_test_cases(&content);
        if cases.is_empty() {
            return Err(TestCaseError::Empty(problem_id.to_string()));
        }

        debug!(problem_id, count = cases.len(), "Loaded test cases");
        Ok(cases)
    }
}
