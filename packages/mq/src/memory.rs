use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use common::dlq::DlqEnvelope;
use common::mq::Message;
use common::retry::RetryTracker;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::broker::{Consumer, JobHandler, Publisher};
use crate::dispatch::{Dispatcher, Disposition};
use crate::error::MqError;

/// Dead letters a [`MemoryBroker`] keeps before dropping the oldest.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1024;

/// Counters exposed for tests and diagnostics.
#[derive(Debug, Default)]
pub struct BrokerStats {
    published: AtomicU64,
    completed: AtomicU64,
    redelivered: AtomicU64,
    dead_lettered: AtomicU64,
}

impl BrokerStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
    pub fn redelivered(&self) -> u64 {
        self.redelivered.load(Ordering::Relaxed)
    }
    /// Every dead letter ever recorded, including ones since dropped.
    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }
}

struct Shared {
    receiver: Mutex<mpsc::UnboundedReceiver<serde_json::Value>>,
    retries: Arc<Mutex<RetryTracker>>,
    dead_letters: Mutex<VecDeque<DlqEnvelope>>,
    dead_letter_capacity: usize,
    stats: BrokerStats,
}

/// In-process broker over a tokio channel, for tests and single-process
/// embedding.
///
/// Messages travel serialized, so a payload that no longer decodes is
/// dead-lettered exactly as with the Redis broker. Dead letters are kept in
/// a bounded buffer instead of a durable queue. Clones share one queue.
pub struct MemoryBroker<M> {
    sender: mpsc::UnboundedSender<serde_json::Value>,
    shared: Arc<Shared>,
    _message: std::marker::PhantomData<fn() -> M>,
}

impl<M> Clone for MemoryBroker<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: Arc::clone(&self.shared),
            _message: std::marker::PhantomData,
        }
    }
}

impl<M: Message> MemoryBroker<M> {
    /// `max_redeliveries` bounds how often a message whose handler crashed
    /// is delivered again before it is dead-lettered.
    pub fn new(max_redeliveries: u8) -> Self {
        Self::with_dead_letter_capacity(max_redeliveries, DEFAULT_DEAD_LETTER_CAPACITY)
    }

    pub fn with_dead_letter_capacity(max_redeliveries: u8, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            shared: Arc::new(Shared {
                receiver: Mutex::new(receiver),
                retries: Arc::new(Mutex::new(RetryTracker::new(max_redeliveries))),
                dead_letters: Mutex::new(VecDeque::new()),
                dead_letter_capacity: capacity.max(1),
                stats: BrokerStats::default(),
            }),
            _message: std::marker::PhantomData,
        }
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.shared.stats
    }

    /// The most recent dead letters, oldest first.
    pub async fn dead_letters(&self) -> Vec<DlqEnvelope> {
        self.shared.dead_letters.lock().await.iter().cloned().collect()
    }

    /// Inject a raw payload, bypassing serialization.
    pub fn publish_raw(&self, payload: serde_json::Value) -> Result<(), MqError> {
        self.sender
            .send(payload)
            .map_err(|_| MqError::Publish("queue closed".into()))?;
        self.shared.stats.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn deliver(&self, dispatcher: &Dispatcher<M>, payload: serde_json::Value) {
        match dispatcher.dispatch(payload.clone()).await {
            Disposition::Ack => {
                self.shared.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Disposition::Redeliver { message_id, .. } => {
                self.shared.stats.redelivered.fetch_add(1, Ordering::Relaxed);
                if self.sender.send(payload).is_err() {
                    error!(message_id = %message_id, "Queue closed, dropping redelivery");
                }
            }
            Disposition::DeadLetter(envelope) => self.dead_letter(envelope).await,
        }
    }

    async fn dead_letter(&self, envelope: DlqEnvelope) {
        warn!(
            message_id = %envelope.message_id,
            error_code = %envelope.error_code,
            "Sending message to DLQ"
        );
        let mut dead_letters = self.shared.dead_letters.lock().await;
        if dead_letters.len() >= self.shared.dead_letter_capacity {
            dead_letters.pop_front();
        }
        dead_letters.push_back(envelope);
        self.shared.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl<M: Message> Publisher<M> for MemoryBroker<M> {
    async fn publish(&self, message: &M) -> Result<(), MqError> {
        self.publish_raw(serde_json::to_value(message)?)
    }
}

#[async_trait]
impl<M: Message> Consumer<M> for MemoryBroker<M> {
    async fn consume(
        &self,
        handler: Arc<dyn JobHandler<M>>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Result<(), MqError> {
        let dispatcher = Dispatcher::new(handler, Arc::clone(&self.shared.retries));
        let slots = Arc::new(Semaphore::new(concurrency.max(1)));

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => {
                    permit.map_err(|e| MqError::Consume(e.to_string()))?
                }
            };

            let payload = {
                let mut receiver = self.shared.receiver.lock().await;
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    payload = receiver.recv() => payload,
                }
            };
            let Some(payload) = payload else { break };

            let broker = self.clone();
            dispatcher.spawn({
                let dispatcher = dispatcher.clone();
                async move {
                    broker.deliver(&dispatcher, payload).await;
                    drop(permit);
                }
            });
        }

        dispatcher.drain().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::JobOutcome;
    use common::dlq::DlqErrorCode;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        job_id: String,
        n: u32,
    }

    impl Message for Ping {
        fn message_type() -> &'static str {
            "ping"
        }
        fn message_id(&self) -> &str {
            &self.job_id
        }
    }

    fn ping(n: u32) -> Ping {
        Ping {
            job_id: format!("job-{n}"),
            n,
        }
    }

    struct Recording {
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl JobHandler<Ping> for Recording {
        async fn handle(&self, message: Ping) -> JobOutcome {
            self.seen.lock().await.push(message.n);
            JobOutcome::Completed
        }
    }

    /// Panics on the first `crashes` deliveries, then completes.
    struct Flaky {
        crashes: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler<Ping> for Flaky {
        async fn handle(&self, _message: Ping) -> JobOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.crashes {
                panic!("worker died");
            }
            JobOutcome::Completed
        }
    }

    struct Refusing;

    #[async_trait]
    impl JobHandler<Ping> for Refusing {
        async fn handle(&self, _message: Ping) -> JobOutcome {
            JobOutcome::failed("state store unavailable")
        }
    }

    async fn run_until<F>(broker: &MemoryBroker<Ping>, handler: Arc<dyn JobHandler<Ping>>, done: F)
    where
        F: Fn(&BrokerStats) -> bool,
    {
        let shutdown = CancellationToken::new();
        let consumer = {
            let broker = broker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { broker.consume(handler, 2, shutdown).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(broker.stats()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("broker did not settle");

        shutdown.cancel();
        consumer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn delivers_every_published_message() {
        let broker = MemoryBroker::<Ping>::new(3);
        for n in 0..5 {
            broker.publish(&ping(n)).await.unwrap();
        }

        let handler = Arc::new(Recording {
            seen: Mutex::new(vec![]),
        });
        run_until(&broker, handler.clone(), |s| s.completed() == 5).await;

        let mut seen = handler.seen.lock().await.clone();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(broker.stats().published(), 5);
        assert!(broker.dead_letters().await.is_empty());
    }

    #[tokio::test]
    async fn crashed_handler_is_redelivered() {
        let broker = MemoryBroker::<Ping>::new(3);
        broker.publish(&ping(1)).await.unwrap();

        let handler = Arc::new(Flaky {
            crashes: 2,
            calls: AtomicU32::new(0),
        });
        run_until(&broker, handler.clone(), |s| s.completed() == 1).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(broker.stats().redelivered(), 2);
        assert!(broker.dead_letters().await.is_empty());
    }

    #[tokio::test]
    async fn exhausted_redeliveries_are_dead_lettered() {
        let broker = MemoryBroker::<Ping>::new(1);
        broker.publish(&ping(7)).await.unwrap();

        let handler = Arc::new(Flaky {
            crashes: u32::MAX,
            calls: AtomicU32::new(0),
        });
        run_until(&broker, handler.clone(), |s| s.dead_lettered() == 1).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        let dead = broker.dead_letters().await;
        assert_eq!(dead[0].message_id, "job-7");
        assert_eq!(dead[0].error_code, DlqErrorCode::RedeliveriesExhausted);
        assert_eq!(dead[0].retry_history.len(), 2);
    }

    #[tokio::test]
    async fn failed_outcome_is_dead_lettered_without_redelivery() {
        let broker = MemoryBroker::<Ping>::new(3);
        broker.publish(&ping(2)).await.unwrap();

        run_until(&broker, Arc::new(Refusing), |s| s.dead_lettered() == 1).await;

        let dead = broker.dead_letters().await;
        assert_eq!(dead[0].error_code, DlqErrorCode::GradingFailed);
        assert_eq!(dead[0].error_message, "state store unavailable");
        assert_eq!(broker.stats().redelivered(), 0);
    }

    #[tokio::test]
    async fn dead_letter_buffer_keeps_the_newest() {
        let broker = MemoryBroker::<Ping>::with_dead_letter_capacity(3, 2);
        for n in 0..3 {
            let payload = serde_json::json!({ "job_id": format!("bad-{n}") });
            broker
                .dead_letter(DlqEnvelope {
                    message_id: format!("bad-{n}"),
                    message_type: "ping".into(),
                    submission_id: None,
                    payload,
                    error_code: DlqErrorCode::DeserializationError,
                    error_message: "missing field `n`".into(),
                    retry_history: vec![],
                })
                .await;
        }

        let ids: Vec<String> = broker
            .dead_letters()
            .await
            .into_iter()
            .map(|d| d.message_id)
            .collect();
        assert_eq!(ids, vec!["bad-1", "bad-2"]);
        assert_eq!(broker.stats().dead_lettered(), 3);
    }

    #[tokio::test]
    async fn undecodable_payload_is_dead_lettered() {
        let broker = MemoryBroker::<Ping>::new(3);
        let submission_id = uuid::Uuid::new_v4();
        broker
            .publish_raw(serde_json::json!({
                "job_id": "bad-1",
                "submission_id": submission_id.to_string(),
            }))
            .unwrap();

        let handler = Arc::new(Recording {
            seen: Mutex::new(vec![]),
        });
        run_until(&broker, handler.clone(), |s| s.dead_lettered() == 1).await;

        let dead = broker.dead_letters().await;
        assert_eq!(dead[0].error_code, DlqErrorCode::DeserializationError);
        assert_eq!(dead[0].message_id, "bad-1");
        assert_eq!(dead[0].submission_id, Some(submission_id));
        assert!(handler.seen.lock().await.is_empty());
    }
}
