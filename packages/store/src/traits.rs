use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Submission, SubmissionState, Verdict};
use uuid::Uuid;

use crate::error::StoreError;

/// Result of a successful [`SubmissionStore::update_terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalWrite {
    /// This call moved the submission into its terminal state.
    Applied,
    /// The same terminal state and detail were already recorded.
    Unchanged,
}

/// One page of an owner's submissions, newest first.
#[derive(Debug, Clone)]
pub struct SubmissionPage {
    pub items: Vec<Submission>,
    pub total: u64,
}

/// Durable record of each submission's lifecycle.
///
/// Every state-changing operation is atomic with respect to concurrent
/// callers; `update_terminal` is the cross-worker coordination point.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert a new submission. Fails with `Conflict` if the id exists.
    async fn create(&self, submission: &Submission) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Submission>, StoreError>;

    /// Move a claimable submission to `running` under a lease held by
    /// `worker_id`, incrementing `attempts`.
    ///
    /// A submission is claimable when it is `pending`, or `running` with an
    /// expired lease. Fails with `Leased` while a live lease exists and with
    /// `AlreadyFinalized` once terminal.
    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        lease_ttl: Duration,
    ) -> Result<Submission, StoreError>;

    /// Extend the lease taken by `worker_id` on claim number `attempt`.
    ///
    /// Fails with `LeaseLost` once the submission is finalized or claimed
    /// again, even by a worker reusing the same id.
    async fn heartbeat(
        &self,
        id: Uuid,
        worker_id: &str,
        attempt: u32,
        lease_ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Record one sweeper republish of an open submission last seen with
    /// `observed_requeues` republishes.
    ///
    /// Returns `false` when another sweeper recorded it first. Fails with
    /// `AlreadyFinalized` once terminal.
    async fn mark_requeued(
        &self,
        id: Uuid,
        observed_requeues: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Atomically finalize a submission that is still `pending` or `running`.
    async fn update_terminal(
        &self,
        id: Uuid,
        state: SubmissionState,
        detail: &Verdict,
    ) -> Result<TerminalWrite, StoreError>;

    /// Running submissions whose lease expired before `now`, and pending
    /// ones created before `pending_before`. Submissions republished at or
    /// after `pending_before` are skipped.
    async fn list_stale(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError>;

    async fn list_by_owner(
        &self,
        owner_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<SubmissionPage, StoreError>;
}

/// Shared outcome check once a conditional terminal write matched nothing.
pub(crate) fn classify_finalized(
    current: Option<&Submission>,
    id: Uuid,
    state: SubmissionState,
    detail: &Verdict,
) -> Result<TerminalWrite, StoreError> {
    match current {
        None => Err(StoreError::NotFound(id)),
        Some(existing)
            if existing.state == state && existing.verdict_detail.as_ref() == Some(detail) =>
        {
            Ok(TerminalWrite::Unchanged)
        }
        Some(_) => Err(StoreError::AlreadyFinalized(id)),
    }
}

/// Outcome once a conditional requeue mark matched nothing.
pub(crate) fn classify_requeue_miss(
    current: Option<&Submission>,
    id: Uuid,
) -> Result<bool, StoreError> {
    match current {
        None => Err(StoreError::NotFound(id)),
        Some(s) if s.state.is_terminal() => Err(StoreError::AlreadyFinalized(id)),
        Some(_) => Ok(false),
    }
}

pub(crate) fn lease_deadline(now: DateTime<Utc>, lease_ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease_ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
