use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// Core trait for all queue messages
pub trait Message:
    Serialize + DeserializeOwned + Debug + Send + Sync + Clone + 'static
{
    fn message_type() -> &'static str
    where
        Self: Sized;

    /// Identifier used for redelivery tracking and dead-lettering.
    fn message_id(&self) -> &str;
}
