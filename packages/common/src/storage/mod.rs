mod error;
mod traits;

pub mod filesystem;

pub use error::TestCaseError;
pub use filesystem::{FilesystemTestCaseStore, parse_test_cases};
pub use traits::{TestCase, TestCaseStore};
