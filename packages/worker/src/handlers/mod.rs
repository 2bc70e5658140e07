pub mod grade;

pub use grade::{GradeHandler, HandlerSettings};
