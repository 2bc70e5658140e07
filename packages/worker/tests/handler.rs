//! Dispatch guard, lease and failure handling of the grade-job handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::retry::BackoffPolicy;
use common::storage::{TestCase, TestCaseError, TestCaseStore};
use common::{GradeJob, Submission, SubmissionState, Verdict, VerdictStatus};
use mq::JobOutcome;
use store::{
    MemorySubmissionStore, StoreError, SubmissionPage, SubmissionStore, TerminalWrite,
};
use uuid::Uuid;
use worker::{ExecutionError, GradeHandler, Grader, HandlerSettings, Sandbox};

fn db_down() -> StoreError {
    StoreError::Database(sea_orm::DbErr::Custom("connection refused".into()))
}

struct OneCase;

#[async_trait]
impl TestCaseStore for OneCase {
    async fn load(&self, _problem_id: &str) -> Result<Vec<TestCase>, TestCaseError> {
        Ok(vec![TestCase::new("3", "odd")])
    }
}

/// Prints "odd" after `delay`, counting runs.
struct SlowOdd {
    delay: Duration,
    runs: AtomicU32,
}

impl SlowOdd {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            runs: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Sandbox for SlowOdd {
    async fn run(
        &self,
        _code: &str,
        _stdin: &str,
        _timeout: Duration,
    ) -> Result<String, ExecutionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok("odd\n".into())
    }
}

struct Exploding;

#[async_trait]
impl Sandbox for Exploding {
    async fn run(
        &self,
        _code: &str,
        _stdin: &str,
        _timeout: Duration,
    ) -> Result<String, ExecutionError> {
        panic!("sandbox bug");
    }
}

/// Memory store whose terminal writes fail a configurable number of times.
struct FlakyStore {
    inner: MemorySubmissionStore,
    failing_writes: AtomicU32,
    write_attempts: AtomicU32,
}

impl FlakyStore {
    fn new(failing_writes: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: MemorySubmissionStore::new(),
            failing_writes: AtomicU32::new(failing_writes),
            write_attempts: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl SubmissionStore for FlakyStore {
    async fn create(&self, submission: &Submission) -> Result<(), StoreError> {
        self.inner.create(submission).await
    }
    async fn get(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        self.inner.get(id).await
    }
    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        lease_ttl: Duration,
    ) -> Result<Submission, StoreError> {
        self.inner.claim(id, worker_id, lease_ttl).await
    }
    async fn heartbeat(
        &self,
        id: Uuid,
        worker_id: &str,
        attempt: u32,
        lease_ttl: Duration,
    ) -> Result<(), StoreError> {
        self.inner.heartbeat(id, worker_id, attempt, lease_ttl).await
    }
    async fn mark_requeued(
        &self,
        id: Uuid,
        observed_requeues: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.mark_requeued(id, observed_requeues, now).await
    }
    async fn update_terminal(
        &self,
        id: Uuid,
        state: SubmissionState,
        detail: &Verdict,
    ) -> Result<TerminalWrite, StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(db_down());
        }
        self.inner.update_terminal(id, state, detail).await
    }
    async fn list_stale(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError> {
        self.inner.list_stale(now, pending_before).await
    }
    async fn list_by_owner(
        &self,
        owner_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<SubmissionPage, StoreError> {
        self.inner.list_by_owner(owner_id, offset, limit).await
    }
}

fn settings(worker_id: &str) -> HandlerSettings {
    HandlerSettings {
        worker_id: worker_id.into(),
        lease_ttl: Duration::from_secs(30),
        heartbeat_interval: Duration::from_secs(10),
        write_policy: BackoffPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
    }
}

fn handler(
    store: Arc<dyn SubmissionStore>,
    sandbox: Arc<dyn Sandbox>,
    settings: HandlerSettings,
) -> GradeHandler {
    GradeHandler::new(store, Arc::new(Grader::new(Arc::new(OneCase), sandbox)), settings)
}

async fn pending(store: &dyn SubmissionStore) -> (Submission, GradeJob) {
    let submission = Submission::new("1", "alice", "print('odd')");
    store.create(&submission).await.unwrap();
    let job = GradeJob::for_submission(&submission);
    (submission, job)
}

#[tokio::test]
async fn grades_and_finalizes_once() {
    let store = Arc::new(MemorySubmissionStore::new());
    let sandbox = SlowOdd::new(Duration::ZERO);
    let handler = handler(store.clone(), sandbox.clone(), settings("w1"));
    let (submission, job) = pending(store.as_ref()).await;

    assert_eq!(handler.process(job.clone()).await, JobOutcome::Completed);
    let done = store.get(submission.id).await.unwrap().unwrap();
    assert_eq!(done.state, SubmissionState::Accepted);
    assert_eq!(done.verdict_detail.unwrap().status, VerdictStatus::Ok);

    // Redelivery of a finished job is skipped without grading.
    assert_eq!(handler.process(job).await, JobOutcome::Completed);
    assert_eq!(sandbox.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_duplicate_delivery_grades_once() {
    let store = Arc::new(MemorySubmissionStore::new());
    let sandbox = SlowOdd::new(Duration::from_millis(200));
    let first = Arc::new(handler(store.clone(), sandbox.clone(), settings("w1")));
    let second = Arc::new(handler(store.clone(), sandbox.clone(), settings("w2")));
    let (submission, job) = pending(store.as_ref()).await;

    let (a, b) = tokio::join!(first.process(job.clone()), second.process(job));
    assert_eq!(a, JobOutcome::Completed);
    assert_eq!(b, JobOutcome::Completed);
    assert_eq!(sandbox.runs.load(Ordering::SeqCst), 1);

    let done = store.get(submission.id).await.unwrap().unwrap();
    assert_eq!(done.state, SubmissionState::Accepted);
    assert_eq!(done.attempts, 1);
}

#[tokio::test]
async fn heartbeat_keeps_the_lease_alive() {
    let store = Arc::new(MemorySubmissionStore::new());
    let sandbox = SlowOdd::new(Duration::from_millis(900));
    let short_lease = HandlerSettings {
        lease_ttl: Duration::from_millis(300),
        heartbeat_interval: Duration::from_millis(50),
        ..settings("w1")
    };
    let holder = Arc::new(handler(store.clone(), sandbox.clone(), short_lease));
    let latecomer = handler(store.clone(), sandbox.clone(), settings("w2"));
    let (submission, job) = pending(store.as_ref()).await;

    let running = tokio::spawn({
        let holder = Arc::clone(&holder);
        let job = job.clone();
        async move { holder.process(job).await }
    });

    // Well past the first lease, the holder must still own it.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(latecomer.process(job).await, JobOutcome::Completed);

    assert_eq!(running.await.unwrap(), JobOutcome::Completed);
    assert_eq!(sandbox.runs.load(Ordering::SeqCst), 1);
    let done = store.get(submission.id).await.unwrap().unwrap();
    assert_eq!(done.state, SubmissionState::Accepted);
    assert_eq!(done.attempts, 1);
}

#[tokio::test]
async fn missing_submission_fails_the_job() {
    let store = Arc::new(MemorySubmissionStore::new());
    let handler = handler(store.clone(), SlowOdd::new(Duration::ZERO), settings("w1"));
    let job = GradeJob::new(Uuid::new_v4(), "1", "print('odd')");

    assert!(matches!(handler.process(job).await, JobOutcome::Failed { .. }));
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn transient_write_failures_are_retried() {
    let store = FlakyStore::new(2);
    let handler = handler(store.clone(), SlowOdd::new(Duration::ZERO), settings("w1"));
    let (submission, job) = pending(store.as_ref()).await;

    assert_eq!(handler.process(job).await, JobOutcome::Completed);
    assert_eq!(store.write_attempts.load(Ordering::SeqCst), 3);
    let done = store.get(submission.id).await.unwrap().unwrap();
    assert_eq!(done.state, SubmissionState::Accepted);
}

#[tokio::test]
async fn unrecoverable_write_leaves_submission_for_the_sweeper() {
    let store = FlakyStore::new(u32::MAX);
    let handler = handler(store.clone(), SlowOdd::new(Duration::ZERO), settings("w1"));
    let (submission, job) = pending(store.as_ref()).await;

    match handler.process(job).await {
        JobOutcome::Failed { reason } => assert!(reason.contains("failed to record verdict")),
        other => panic!("expected failure, got {other:?}"),
    }
    let stuck = store.get(submission.id).await.unwrap().unwrap();
    assert_eq!(stuck.state, SubmissionState::Running);
    assert!(stuck.verdict_detail.is_none());
}

#[tokio::test]
async fn write_failure_falls_back_to_internal_error() {
    // Initial write plus both retries fail; the fallback write lands.
    let store = FlakyStore::new(3);
    let handler = handler(store.clone(), SlowOdd::new(Duration::ZERO), settings("w1"));
    let (submission, job) = pending(store.as_ref()).await;

    assert!(matches!(handler.process(job).await, JobOutcome::Failed { .. }));
    let done = store.get(submission.id).await.unwrap().unwrap();
    assert_eq!(done.state, SubmissionState::InternalError);
    let detail = done.verdict_detail.unwrap();
    assert_eq!(detail.status, VerdictStatus::Err);
    assert!(detail.message.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn grading_panic_is_recorded_as_internal_error() {
    let store = Arc::new(MemorySubmissionStore::new());
    let handler = handler(store.clone(), Arc::new(Exploding), settings("w1"));
    let (submission, job) = pending(store.as_ref()).await;

    assert!(matches!(handler.process(job).await, JobOutcome::Failed { .. }));
    let done = store.get(submission.id).await.unwrap().unwrap();
    assert_eq!(done.state, SubmissionState::InternalError);
    assert!(done.verdict_detail.unwrap().message.unwrap().contains("grading failed"));
}
