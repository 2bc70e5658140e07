use std::sync::Arc;

use common::Submission;
use store::SubmissionStore;
use uuid::Uuid;

use crate::error::QueryError;

pub const DEFAULT_PER_PAGE: u64 = 20;
pub const MAX_PER_PAGE: u64 = 100;

/// One page of an owner's submissions, newest first.
#[derive(Debug, Clone)]
pub struct SubmissionList {
    pub items: Vec<Submission>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// Read access to submissions, scoped to their owner.
pub struct QueryService {
    store: Arc<dyn SubmissionStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, owner_id: &str, id: Uuid) -> Result<Submission, QueryError> {
        let submission = self
            .store
            .get(id)
            .await?
            .ok_or(QueryError::NotFound(id))?;

        if submission.owner_id != owner_id {
            return Err(QueryError::Forbidden(id));
        }
        Ok(submission)
    }

    /// Pages start at 1; `per_page` is clamped to `1..=100`.
    pub async fn list(
        &self,
        owner_id: &str,
        page: Option<u64>,
        per_page: Option<u64>,
    ) -> Result<SubmissionList, QueryError> {
        let page = page.unwrap_or(1).max(1);
        let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);

        let found = self
            .store
            .list_by_owner(owner_id, (page - 1).saturating_mul(per_page), per_page)
            .await?;

        Ok(SubmissionList {
            total_pages: found.total.div_ceil(per_page),
            items: found.items,
            total: found.total,
            page,
            per_page,
        })
    }
}
