use thiserror::Error;

/// Why one sandboxed run produced no usable stdout.
///
/// Display strings are what ends up in a case's `error` field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Execution timed out")]
    Timeout,

    /// Non-zero exit, signal death, or the interpreter could not be started.
    #[error("{0}")]
    RuntimeError(String),

    /// The sandbox itself failed (e.g. the artifact could not be written).
    #[error("{0}")]
    InternalError(String),
}
