use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Audit record for one authorization decision.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "access_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    /// User identifier extracted from the subject, when recognizable
    pub user_id: Option<String>,
    pub subject: String,
    pub object: String,
    pub action: String,
    pub allowed: i64, // 0 = denied, 1 = allowed
    pub reason: String,
    /// Request context serialized as JSON
    pub context: Option<String>,
    pub response_time_ms: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
