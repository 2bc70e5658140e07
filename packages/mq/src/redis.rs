use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use broccoli_queue::brokers::broker::BrokerMessage;
use broccoli_queue::error::BroccoliError;
use broccoli_queue::queue::BroccoliQueue;
use common::config::MqAppConfig;
use common::dlq::DlqEnvelope;
use common::mq::Message;
use common::retry::RetryTracker;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{Consumer, JobHandler, Publisher};
use crate::dispatch::{Dispatcher, Disposition};
use crate::error::MqError;

/// Redis-backed broker built on broccoli_queue.
///
/// A handler crash is reported to broccoli as a job error, which requeues
/// the message, until `max_redeliveries` crashes of the same message id
/// send it to the DLQ instead. On shutdown, `consume` stops taking messages
/// and waits for the handlers already running.
pub struct RedisBroker<M> {
    queue: Arc<BroccoliQueue>,
    queue_name: String,
    dlq_queue_name: String,
    retries: Arc<Mutex<RetryTracker>>,
    _message: PhantomData<fn() -> M>,
}

impl<M: Message> RedisBroker<M> {
    pub async fn connect(config: &MqAppConfig) -> Result<Self, MqError> {
        let queue = BroccoliQueue::builder(&config.url)
            .pool_connections(config.pool_size)
            .build()
            .await
            .map_err(|e| MqError::Connect(e.to_string()))?;

        info!(
            queue_name = %config.queue_name,
            dlq_queue_name = %config.dlq_queue_name,
            max_redeliveries = config.max_redeliveries,
            "MQ connected"
        );

        Ok(Self {
            queue: Arc::new(queue),
            queue_name: config.queue_name.clone(),
            dlq_queue_name: config.dlq_queue_name.clone(),
            retries: Arc::new(Mutex::new(RetryTracker::new(config.max_redeliveries))),
            _message: PhantomData,
        })
    }
}

#[async_trait]
impl<M: Message> Publisher<M> for RedisBroker<M> {
    async fn publish(&self, message: &M) -> Result<(), MqError> {
        self.queue
            .publish(&self.queue_name, None, message, None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<M: Message> Consumer<M> for RedisBroker<M> {
    async fn consume(
        &self,
        handler: Arc<dyn JobHandler<M>>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Result<(), MqError> {
        let dispatcher = Dispatcher::new(handler, Arc::clone(&self.retries));
        let queue = Arc::clone(&self.queue);
        let dlq_queue = self.dlq_queue_name.clone();

        let processing = self.queue.process_messages(
            &self.queue_name,
            Some(concurrency.max(1)),
            None,
            {
                let dispatcher = dispatcher.clone();
                move |message: BrokerMessage<serde_json::Value>| {
                    let dispatcher = dispatcher.clone();
                    let queue = Arc::clone(&queue);
                    let dlq_queue = dlq_queue.clone();
                    async move {
                        let delivery = dispatcher.spawn({
                            let dispatcher = dispatcher.clone();
                            async move {
                                let disposition = dispatcher.dispatch(message.payload).await;
                                settle(disposition, &queue, &dlq_queue).await
                            }
                        });
                        delivery
                            .await
                            .map_err(|e| BroccoliError::Job(format!("delivery task failed: {e}")))?
                    }
                }
            },
        );

        let result = tokio::select! {
            result = processing => result.map_err(|e| MqError::Consume(e.to_string())),
            _ = shutdown.cancelled() => {
                info!("Consumer shutting down");
                Ok(())
            }
        };

        dispatcher.drain().await;
        result
    }
}

/// Map a disposition onto broccoli's ack (`Ok`) or retry (`Err`).
async fn settle(
    disposition: Disposition,
    queue: &BroccoliQueue,
    dlq_queue: &str,
) -> Result<(), BroccoliError> {
    match disposition {
        Disposition::Ack => Ok(()),
        Disposition::Redeliver { message_id, error } => {
            warn!(message_id = %message_id, "Leaving job for redelivery");
            Err(BroccoliError::Job(error))
        }
        Disposition::DeadLetter(envelope) => publish_dead_letter(queue, dlq_queue, &envelope).await,
    }
}

async fn publish_dead_letter(
    queue: &BroccoliQueue,
    dlq_queue: &str,
    envelope: &DlqEnvelope,
) -> Result<(), BroccoliError> {
    warn!(
        message_id = %envelope.message_id,
        error_code = %envelope.error_code,
        "Sending message to DLQ"
    );
    queue
        .publish(dlq_queue, None, envelope, None)
        .await
        .map_err(|e| {
            error!(message_id = %envelope.message_id, error = %e, "Failed to publish to DLQ");
            BroccoliError::Publish(format!("Failed to publish to DLQ: {e}"))
        })?;
    Ok(())
}
