pub mod catalogue;
pub mod config;
pub mod error;
pub mod intake;
pub mod query;
pub mod sweeper;

pub use catalogue::ProblemCatalogue;
pub use config::{IntakeConfig, ServerAppConfig, SweeperConfig};
pub use error::{IntakeError, QueryError};
pub use intake::IntakeService;
pub use query::{QueryService, SubmissionList};
pub use sweeper::{LeaseSweeper, SweepReport};
