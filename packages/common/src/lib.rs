pub mod config;
pub mod dlq;
pub mod grade_job;
pub mod mq;
pub mod retry;
pub mod storage;
pub mod submission;
pub mod submission_status;
pub mod verdict;

pub use grade_job::GradeJob;
pub use submission::Submission;
pub use submission_status::SubmissionState;
pub use verdict::{ExecutionResult, Verdict, VerdictStatus};
