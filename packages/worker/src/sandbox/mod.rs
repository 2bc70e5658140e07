mod error;
pub mod process;

use std::time::Duration;

use async_trait::async_trait;

pub use error::ExecutionError;
pub use process::ProcessSandbox;

/// Runs untrusted code against one input.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute `code` with `stdin` piped in, returning its stdout verbatim.
    ///
    /// Every call is independent: its own artifact, its own child process
    /// and its own timers. Nothing outlives the call.
    async fn run(&self, code: &str, stdin: &str, timeout: Duration)
    -> Result<String, ExecutionError>;
}
