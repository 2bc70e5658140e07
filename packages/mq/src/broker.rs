use std::sync::Arc;

use async_trait::async_trait;
use common::mq::Message;
use tokio_util::sync::CancellationToken;

use crate::error::MqError;

/// What the handler reports back to the broker for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job is done (including "nothing to do"). Acknowledge it.
    Completed,
    /// The job cannot succeed on redelivery. Acknowledge and dead-letter it.
    Failed { reason: String },
}

impl JobOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Processes one delivered message.
///
/// A handler that panics is treated as a crashed worker: the message is
/// redelivered until the broker's redelivery budget is spent.
#[async_trait]
pub trait JobHandler<M: Message>: Send + Sync + 'static {
    async fn handle(&self, message: M) -> JobOutcome;
}

#[async_trait]
pub trait Publisher<M: Message>: Send + Sync {
    /// Enqueue `message`. Returns once the broker has accepted it.
    async fn publish(&self, message: &M) -> Result<(), MqError>;
}

#[async_trait]
pub trait Consumer<M: Message>: Send + Sync {
    /// Deliver messages to `handler` with at most `concurrency` in flight,
    /// until `shutdown` is cancelled. In-flight jobs run to completion
    /// before this returns.
    async fn consume(
        &self,
        handler: Arc<dyn JobHandler<M>>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Result<(), MqError>;
}
