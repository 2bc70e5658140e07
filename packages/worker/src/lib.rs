pub mod config;
pub mod error;
pub mod grader;
pub mod handlers;
pub mod pool;
pub mod sandbox;

pub use config::{WorkerAppConfig, WorkerConfig};
pub use error::{Result, WorkerError};
pub use grader::Grader;
pub use handlers::{GradeHandler, HandlerSettings};
pub use pool::{WorkerPool, build_grader};
pub use sandbox::{ExecutionError, ProcessSandbox, Sandbox};
