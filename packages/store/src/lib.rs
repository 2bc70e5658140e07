pub mod database;
pub mod db;
pub mod entity;
pub mod error;
pub mod memory;
pub mod traits;

pub use database::init_db;
pub use db::DbSubmissionStore;
pub use error::StoreError;
pub use memory::MemorySubmissionStore;
pub use traits::{SubmissionPage, SubmissionStore, TerminalWrite};
