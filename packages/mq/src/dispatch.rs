use std::future::Future;
use std::sync::Arc;

use common::dlq::{DlqEnvelope, DlqErrorCode};
use common::mq::Message;
use common::retry::{RetryAttempt, RetryDecision, RetryTracker};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::broker::{JobHandler, JobOutcome};

/// What a broker should do with a delivered payload once its handler ran.
#[derive(Debug)]
pub(crate) enum Disposition {
    Ack,
    /// The handler crashed and the crash budget is not spent yet.
    Redeliver { message_id: String, error: String },
    DeadLetter(DlqEnvelope),
}

/// Runs handlers for one consumer and decides each delivery's fate.
///
/// Handler crashes are counted per message id against the broker's
/// redelivery budget. Every delivery runs on a tracked task, so `drain`
/// can wait for in-flight work after the consume loop stops.
pub(crate) struct Dispatcher<M> {
    handler: Arc<dyn JobHandler<M>>,
    retries: Arc<Mutex<RetryTracker>>,
    tasks: TaskTracker,
}

impl<M> Clone for Dispatcher<M> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            retries: Arc::clone(&self.retries),
            tasks: self.tasks.clone(),
        }
    }
}

impl<M: Message> Dispatcher<M> {
    pub(crate) fn new(
        handler: Arc<dyn JobHandler<M>>,
        retries: Arc<Mutex<RetryTracker>>,
    ) -> Self {
        Self {
            handler,
            retries,
            tasks: TaskTracker::new(),
        }
    }

    /// Run `delivery` on a task that `drain` waits for.
    pub(crate) fn spawn<F>(&self, delivery: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(delivery)
    }

    /// Stop accepting deliveries and wait for the ones still running.
    pub(crate) async fn drain(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            debug!(in_flight = self.tasks.len(), "Waiting for in-flight deliveries");
        }
        self.tasks.wait().await;
    }

    pub(crate) async fn dispatch(&self, payload: serde_json::Value) -> Disposition {
        let message: M = match serde_json::from_value(payload.clone()) {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "Failed to parse {}", M::message_type());
                let message_id = payload
                    .get("job_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                return Disposition::DeadLetter(envelope::<M>(
                    message_id,
                    payload,
                    DlqErrorCode::DeserializationError,
                    format!("Failed to parse {}: {e}", M::message_type()),
                    vec![],
                ));
            }
        };

        let message_id = message.message_id().to_string();
        let handler = Arc::clone(&self.handler);
        let job = self
            .tasks
            .spawn(async move { handler.handle(message).await });

        match job.await {
            Ok(JobOutcome::Completed) => {
                self.retries.lock().await.clear(&message_id);
                Disposition::Ack
            }
            Ok(JobOutcome::Failed { reason }) => {
                self.retries.lock().await.clear(&message_id);
                debug!(message_id = %message_id, reason = %reason, "Handler reported failure");
                Disposition::DeadLetter(envelope::<M>(
                    message_id,
                    payload,
                    DlqErrorCode::GradingFailed,
                    reason,
                    vec![],
                ))
            }
            Err(e) => {
                let error = format!("handler crashed: {e}");
                let decision = self.retries.lock().await.record_failure(&message_id, &error);
                match decision {
                    RetryDecision::Retry { attempt, .. } => {
                        warn!(message_id = %message_id, attempt, error = %error, "Redelivering");
                        Disposition::Redeliver { message_id, error }
                    }
                    RetryDecision::Exhausted { history } => {
                        error!(
                            message_id = %message_id,
                            retry_count = history.len(),
                            "Redeliveries exhausted, sending to DLQ"
                        );
                        Disposition::DeadLetter(envelope::<M>(
                            message_id,
                            payload,
                            DlqErrorCode::RedeliveriesExhausted,
                            error,
                            history,
                        ))
                    }
                }
            }
        }
    }
}

fn envelope<M: Message>(
    message_id: String,
    payload: serde_json::Value,
    error_code: DlqErrorCode,
    error_message: String,
    retry_history: Vec<RetryAttempt>,
) -> DlqEnvelope {
    DlqEnvelope {
        message_id,
        message_type: M::message_type().to_string(),
        submission_id: DlqEnvelope::submission_id_of(&payload),
        payload,
        error_code,
        error_message,
        retry_history,
    }
}
