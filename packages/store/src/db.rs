use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::DatabaseConfig;
use common::{Submission, SubmissionState, Verdict};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, SqlErr,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::database::init_db;
use crate::entity::submission;
use crate::error::StoreError;
use crate::traits::{
    SubmissionPage, SubmissionStore, TerminalWrite, classify_finalized, classify_requeue_miss,
    lease_deadline,
};

/// sea-orm backed store. State changes are conditional `UPDATE`s whose
/// `rows_affected` decides who won.
#[derive(Debug, Clone)]
pub struct DbSubmissionStore {
    db: DatabaseConnection,
}

impl DbSubmissionStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        Ok(Self::new(init_db(config).await?))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn to_domain(model: submission::Model) -> Result<Submission, StoreError> {
    let id = model.id;
    let verdict_detail = model
        .verdict_detail
        .map(serde_json::from_value::<Verdict>)
        .transpose()
        .map_err(|e| StoreError::Corrupt {
            id,
            reason: e.to_string(),
        })?;

    Ok(Submission {
        id,
        problem_id: model.problem_id,
        owner_id: model.owner_id,
        code: model.code,
        state: model.state,
        verdict_detail,
        attempts: u32::try_from(model.attempts).unwrap_or_default(),
        worker_id: model.worker_id,
        lease_expires_at: model.lease_expires_at,
        requeues: u32::try_from(model.requeues).unwrap_or_default(),
        requeued_at: model.requeued_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn detail_json(id: Uuid, detail: &Verdict) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(detail).map_err(|e| StoreError::Corrupt {
        id,
        reason: e.to_string(),
    })
}

#[async_trait]
impl SubmissionStore for DbSubmissionStore {
    async fn create(&self, s: &Submission) -> Result<(), StoreError> {
        let verdict_detail = s
            .verdict_detail
            .as_ref()
            .map(|v| detail_json(s.id, v))
            .transpose()?;

        let model = submission::ActiveModel {
            id: Set(s.id),
            problem_id: Set(s.problem_id.clone()),
            owner_id: Set(s.owner_id.clone()),
            code: Set(s.code.clone()),
            state: Set(s.state),
            verdict_detail: Set(verdict_detail),
            attempts: Set(s.attempts as i32),
            worker_id: Set(s.worker_id.clone()),
            lease_expires_at: Set(s.lease_expires_at),
            requeues: Set(s.requeues as i32),
            requeued_at: Set(s.requeued_at),
            created_at: Set(s.created_at),
            updated_at: Set(s.updated_at),
        };

        match submission::Entity::insert(model).exec(&self.db).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(StoreError::Conflict(s.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        submission::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(to_domain)
            .transpose()
    }

    #[instrument(skip(self, lease_ttl), fields(submission_id = %id))]
    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        lease_ttl: Duration,
    ) -> Result<Submission, StoreError> {
        let current = self.get(id).await?.ok_or(StoreError::NotFound(id))?;
        let now = Utc::now();

        if current.state.is_terminal() {
            return Err(StoreError::AlreadyFinalized(id));
        }
        if current.has_live_lease(now) {
            return Err(StoreError::Leased(id));
        }

        let attempts = current.attempts + 1;
        let lease_expires_at = lease_deadline(now, lease_ttl);
        let updated_at = if current.state == SubmissionState::Pending {
            now
        } else {
            current.updated_at
        };

        let result = submission::Entity::update_many()
            .col_expr(
                submission::Column::State,
                Expr::value(SubmissionState::Running),
            )
            .col_expr(submission::Column::Attempts, Expr::value(attempts as i32))
            .col_expr(
                submission::Column::WorkerId,
                Expr::value(Some(worker_id.to_string())),
            )
            .col_expr(
                submission::Column::LeaseExpiresAt,
                Expr::value(Some(lease_expires_at)),
            )
            .col_expr(submission::Column::UpdatedAt, Expr::value(updated_at))
            .filter(submission::Column::Id.eq(id))
            .filter(submission::Column::State.eq(current.state))
            .filter(submission::Column::Attempts.eq(current.attempts as i32))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            debug!("Lost claim race");
            return match self.get(id).await? {
                None => Err(StoreError::NotFound(id)),
                Some(s) if s.state.is_terminal() => Err(StoreError::AlreadyFinalized(id)),
                Some(_) => Err(StoreError::Leased(id)),
            };
        }

        Ok(Submission {
            state: SubmissionState::Running,
            attempts,
            worker_id: Some(worker_id.to_string()),
            lease_expires_at: Some(lease_expires_at),
            updated_at,
            ..current
        })
    }

    async fn heartbeat(
        &self,
        id: Uuid,
        worker_id: &str,
        attempt: u32,
        lease_ttl: Duration,
    ) -> Result<(), StoreError> {
        let result = submission::Entity::update_many()
            .col_expr(
                submission::Column::LeaseExpiresAt,
                Expr::value(Some(lease_deadline(Utc::now(), lease_ttl))),
            )
            .filter(submission::Column::Id.eq(id))
            .filter(submission::Column::State.eq(SubmissionState::Running))
            .filter(submission::Column::WorkerId.eq(worker_id))
            .filter(submission::Column::Attempts.eq(attempt as i32))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::LeaseLost(id));
        }
        Ok(())
    }

    #[instrument(skip(self, now), fields(submission_id = %id))]
    async fn mark_requeued(
        &self,
        id: Uuid,
        observed_requeues: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = submission::Entity::update_many()
            .col_expr(
                submission::Column::Requeues,
                Expr::value(observed_requeues as i32 + 1),
            )
            .col_expr(submission::Column::RequeuedAt, Expr::value(Some(now)))
            .filter(submission::Column::Id.eq(id))
            .filter(submission::Column::State.is_in(SubmissionState::OPEN.iter().copied()))
            .filter(submission::Column::Requeues.eq(observed_requeues as i32))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(true);
        }
        debug!("Requeue already recorded");
        let current = self.get(id).await?;
        classify_requeue_miss(current.as_ref(), id)
    }

    #[instrument(skip(self, detail), fields(submission_id = %id, state = %state))]
    async fn update_terminal(
        &self,
        id: Uuid,
        state: SubmissionState,
        detail: &Verdict,
    ) -> Result<TerminalWrite, StoreError> {
        if !state.is_terminal() {
            return Err(StoreError::InvalidTransition(state));
        }

        let result = submission::Entity::update_many()
            .col_expr(submission::Column::State, Expr::value(state))
            .col_expr(
                submission::Column::VerdictDetail,
                Expr::value(Some(detail_json(id, detail)?)),
            )
            .col_expr(
                submission::Column::WorkerId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                submission::Column::LeaseExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(submission::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(submission::Column::Id.eq(id))
            .filter(submission::Column::State.is_in(SubmissionState::OPEN.iter().copied()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(TerminalWrite::Applied);
        }

        let current = self.get(id).await?;
        classify_finalized(current.as_ref(), id, state, detail)
    }

    async fn list_stale(
        &self,
        now: DateTime<Utc>,
        pending_before: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError> {
        let running = submission::Column::State.eq(SubmissionState::Running);
        let expired = Condition::any()
            .add(submission::Column::LeaseExpiresAt.lt(now))
            .add(submission::Column::LeaseExpiresAt.is_null());

        let cooled_down = Condition::any()
            .add(submission::Column::RequeuedAt.is_null())
            .add(submission::Column::RequeuedAt.lt(pending_before));

        submission::Entity::find()
            .filter(
                Condition::any()
                    .add(Condition::all().add(running).add(expired))
                    .add(
                        Condition::all()
                            .add(submission::Column::State.eq(SubmissionState::Pending))
                            .add(submission::Column::CreatedAt.lt(pending_before)),
                    ),
            )
            .filter(cooled_down)
            .order_by_asc(submission::Column::CreatedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_domain)
            .collect()
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<SubmissionPage, StoreError> {
        let query = submission::Entity::find().filter(submission::Column::OwnerId.eq(owner_id));

        let total = query.clone().count(&self.db).await?;
        let items = query
            .order_by_desc(submission::Column::CreatedAt)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_domain)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SubmissionPage { items, total })
    }
}
