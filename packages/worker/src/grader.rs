use std::sync::Arc;
use std::time::Duration;

use common::storage::{TestCase, TestCaseStore};
use common::{ExecutionResult, Verdict};
use tracing::{debug, instrument, warn};

use crate::sandbox::Sandbox;

/// Message for submissions with nothing to run.
pub const EMPTY_CODE_MESSAGE: &str = "Missing required parameters or empty code";

/// Default wall-clock limit per test case.
pub const DEFAULT_CASE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Drives the sandbox across a problem's test cases and folds the results
/// into a [`Verdict`]. Never fails: bad test data and program faults are
/// reported inside the verdict.
pub struct Grader {
    test_cases: Arc<dyn TestCaseStore>,
    sandbox: Arc<dyn Sandbox>,
    case_timeout: Duration,
}

impl Grader {
    pub fn new(test_cases: Arc<dyn TestCaseStore>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            test_cases,
            sandbox,
            case_timeout: DEFAULT_CASE_TIMEOUT,
        }
    }

    pub fn with_case_timeout(mut self, case_timeout: Duration) -> Self {
        self.case_timeout = case_timeout;
        self
    }

    #[instrument(skip(self, code))]
    pub async fn grade(&self, problem_id: &str, code: &str) -> Verdict {
        if code.trim().is_empty() {
            return Verdict::error(EMPTY_CODE_MESSAGE);
        }

        let cases = match self.test_cases.load(problem_id).await {
            Ok(cases) => cases,
            Err(e) => {
                warn!(error = %e, "Cannot grade without test cases");
                return Verdict::error(e.to_string());
            }
        };

        // Every case runs even after an error so the detail is complete.
        let mut results = Vec::with_capacity(cases.len());
        for case in &cases {
            results.push(self.run_case(code, case).await);
        }

        let verdict = Verdict::from_results(results);
        debug!(status = %verdict.status, cases = cases.len(), "Graded");
        verdict
    }

    async fn run_case(&self, code: &str, case: &TestCase) -> ExecutionResult {
        let expected = case.expected_output.trim().to_string();
        let stdin = format!("{}\n", case.input);

        match self.sandbox.run(code, &stdin, self.case_timeout).await {
            Ok(stdout) => {
                let actual = stdout.trim().to_string();
                ExecutionResult {
                    input: case.input.clone(),
                    passed: compare_output(&actual, &expected),
                    expected,
                    actual: Some(actual),
                    error: None,
                }
            }
            Err(e) => ExecutionResult {
                input: case.input.clone(),
                expected,
                actual: None,
                error: Some(e.to_string()),
                passed: false,
            },
        }
    }
}

/// Edge-trimmed exact comparison. No case folding, no numeric tolerance.
pub fn compare_output(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}
