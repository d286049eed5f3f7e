use sea_orm::entity::prelude::*;

/// Coordinator state for one `(scope, idempotency_key)` pair.
///
/// Uniqueness over `(scope, idempotency_key)` is a composite constraint,
/// created in the migration.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "idempotency_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub scope: String,
    pub idempotency_key: String,
    pub request_hash: String,
    pub status: String,
    pub http_status: Option<i16>,
    pub response_body: Option<String>,
    pub payment_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
