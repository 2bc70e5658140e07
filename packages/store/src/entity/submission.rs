use common::SubmissionState;
use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "submission")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub problem_id: String,

    #[sea_orm(indexed)]
    pub owner_id: String,

    #[sea_orm(column_type = "Text")]
    pub code: String,

    #[sea_orm(indexed)]
    pub state: SubmissionState,

    /// Serialized `Verdict`; NULL until the submission is terminal.
    #[sea_orm(column_type = "Json", nullable)]
    pub verdict_detail: Option<Json>,

    pub attempts: i32,

    pub worker_id: Option<String>,

    pub lease_expires_at: Option<DateTimeUtc>,

    #[sea_orm(default_value = 0)]
    pub requeues: i32,

    pub requeued_at: Option<DateTimeUtc>,

    #[sea_orm(indexed)]
    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
