use sea_orm::entity::prelude::*;

/// Business fact of a single charge. Never updated, never deleted.
///
/// The unique `idempotency_key` column is the last line of defense against
/// double charges even if the coordinator logic is bypassed.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub idempotency_key: String,
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub payment_method_token: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
