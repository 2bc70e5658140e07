use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Submission, SubmissionState, Verdict};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::traits::{
    SubmissionPage, SubmissionStore, TerminalWrite, classify_finalized, classify_requeue_miss,
    lease_deadline,
};

/// In-process store. Each operation runs under one lock, which makes every
/// compare-and-set trivially atomic.
#[derive(Debug, Default)]
pub struct MemorySubmissionStore {
    submissions: Mutex<HashMap<Uuid, Submission>>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.submissions.lock().await.len()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn create(&self, submission: &Submission) -> Result<(), StoreError> {
        let mut submissions = self.submissions.lock().await;
        if submissions.contains_key(&submission.id) {
            return Err(StoreError::Conflict(submission.id));
        }
        submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        Ok(self.submissions.lock().await.get(&id).cloned())
    }

    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        lease_ttl: Duration,
    ) -> Result<Submission, StoreError> {
        let mut submissions = self.submissions.lock().await;
        let submission = submissions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let now = Utc::now();

        if submission.state.is_terminal() {
            return Err(StoreError::AlreadyFinalized(id));
        }
        if submission.has_live_lease(now) {
            return Err(StoreError::Leased(id));
        }

        if submission.state == SubmissionState::Pending {
            submission.state = SubmissionState::Running;
            submission.updated_at = now;
        }
        submission.attempts += 1;
        submission.worker_id = Some(worker_id.to_string());
        submission.lease_expires_at = Some(lease_deadline(now, lease_ttl));
        Ok(submission.clone())
    }

    async fn heartbeat(
        &self,
        id: Uuid,
        worker_id: &str,
        attempt: u32,
        lease_ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut submissions = self.submissions.lock().await;
        match submissions.get_mut(&id) {
            Some(s)
                if s.state == SubmissionState::Running
                    && s.worker_id.as_deref() == Some(worker_id)
                    && s.attempts == attempt =>
            {
                s.lease_expires_at = Some(lease_deadline(Utc::now(), lease_ttl));
                Ok(())
            }
            _ => Err(StoreError::LeaseLost(id)),
        }
    }

    async fn mark_requeued(
        &self,
        id: Uuid,
        observed_requeues: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut submissions = self.submissions.lock().await;
        match submissions.get_mut(&id) {
            Some(s) if !s.state.is_terminal() && s.requeues == observed_requeues => {
                s.requeues += 1;
                s.requeued_at = Some(now);
                Ok(true)
            }
            current => classify_requeue_miss(current.as_deref(), id),
        }
    }

    async fn update_terminal(
        &self,
        id: Uuid,
        state: SubmissionState,
        detail: &Verdict,
    ) -> Result<TerminalWrite, StoreError> {
        if !state.is_terminal() {
            return Err(StoreError::InvalidTransition(state));
        }

        let mut submissions = self.submissions.lock().await;
        match submissions.get_mut(&id) {
            Some(s) if !s.state.is_terminal() => {
                s.state = state;
                s.verdict_detail = Some(detail.clone());
                s.worker_id = None;
                s.lease_expires_at = None;
                s.updated_at = Utc::now();
                Ok(TerminalWrite::Applied)
            }
            current => classify_finalized(current.as_deref(), id, state, detail),
        }
    }

    async fn list_stale(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError> {
        let submissions = self.submissions.lock().await;
        let mut stale: Vec<Submission> = submissions
            .values()
            .filter(|s| s.requeued_at.is_none_or(|at| at < pending_before))
            .filter(|s| match s.state {
                SubmissionState::Running => s.lease_expires_at.is_none_or(|at| at < now),
                SubmissionState::Pending => s.created_at < pending_before,
                _ => false,
            })
            .cloned()
            .collect();
        stale.sort_by_key(|s| s.created_at);
        Ok(stale)
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<SubmissionPage, StoreError> {
        let submissions = self.submissions.lock().await;
        let mut owned: Vec<&Submission> = submissions
            .values()
            .filter(|s| s.owner_id == owner_id)
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = owned.len() as u64;
        let items = owned
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(SubmissionPage { items, total })
    }
}
