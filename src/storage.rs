use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::collections::HashSet;
use tracing::info;

use crate::authz::errors::AuthzError;
use crate::authz::repository::{columns_of, PolicyRepository};
use crate::authz::sanitize;
use crate::authz::types::{AuthorizationDecision, Effect, PolicyRule, RawPolicyRow};
use crate::entities;
use crate::errors::FulcrumError;
use crate::settings::Database as DbCfg;

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, FulcrumError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

/// Policy repository backed by the `policy_rules` table.
#[derive(Clone)]
pub struct SeaOrmPolicyRepository {
    db: DatabaseConnection,
}

impl SeaOrmPolicyRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn row_from_model(m: entities::policy_rule::Model) -> RawPolicyRow {
    RawPolicyRow {
        id: m.id,
        ptype: m.ptype,
        fields: [m.v0, m.v1, m.v2, m.v3, m.v4, m.v5],
    }
}

fn unavailable(e: sea_orm::DbErr) -> AuthzError {
    AuthzError::RepositoryUnavailable(e.to_string())
}

#[async_trait]
impl PolicyRepository for SeaOrmPolicyRepository {
    async fn list_all(&self) -> Result<Vec<RawPolicyRow>, AuthzError> {
        let models = entities::PolicyRule::find()
            .order_by_asc(entities::policy_rule::Column::Id)
            .all(&self.db)
            .await
            .map_err(unavailable)?;
        Ok(models.into_iter().map(row_from_model).collect())
    }

    async fn create(&self, rule: &PolicyRule) -> Result<PolicyRule, AuthzError> {
        let [v0, v1, v2, v3, v4, v5] = columns_of(rule);
        let active = entities::policy_rule::ActiveModel {
            ptype: Set(rule.kind.as_str().to_string()),
            v0: Set(v0),
            v1: Set(v1),
            v2: Set(v2),
            v3: Set(v3),
            v4: Set(v4),
            v5: Set(v5),
            ..Default::default()
        };
        let model = active.insert(&self.db).await.map_err(unavailable)?;

        let mut created = rule.clone();
        created.id = Some(model.id);
        Ok(created)
    }

    async fn update(&self, id: i64, rule: &PolicyRule) -> Result<(), AuthzError> {
        let model = entities::PolicyRule::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| AuthzError::InvalidRule(format!("policy rule {id} not found")))?;

        let [v0, v1, v2, v3, v4, v5] = columns_of(rule);
        let mut active = model.into_active_model();
        active.ptype = Set(rule.kind.as_str().to_string());
        active.v0 = Set(v0);
        active.v1 = Set(v1);
        active.v2 = Set(v2);
        active.v3 = Set(v3);
        active.v4 = Set(v4);
        active.v5 = Set(v5);
        active.update(&self.db).await.map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), AuthzError> {
        let result = entities::PolicyRule::delete_by_id(id)
            .exec(&self.db)
            .await
            .map_err(unavailable)?;
        if result.rows_affected == 0 {
            return Err(AuthzError::InvalidRule(format!(
                "policy rule {id} not found"
            )));
        }
        Ok(())
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Vec<RawPolicyRow>, AuthzError> {
        let models = entities::PolicyRule::find()
            .filter(entities::policy_rule::Column::V0.eq(subject))
            .order_by_asc(entities::policy_rule::Column::Id)
            .all(&self.db)
            .await
            .map_err(unavailable)?;
        Ok(models.into_iter().map(row_from_model).collect())
    }
}

/// Persist the audit record for one decision. The enforcer produces the
/// record; this is the collaborator that writes the row.
pub async fn record_access(
    db: &DatabaseConnection,
    subject: &str,
    object: &str,
    action: &str,
    decision: &AuthorizationDecision,
) -> Result<(), FulcrumError> {
    let user_id = subject
        .strip_prefix("user:")
        .map(str::to_string)
        .or_else(|| subject.contains('@').then(|| subject.to_string()));

    let ip_address = decision
        .context
        .get("ip")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let user_agent = decision
        .context
        .get("userAgent")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let log = entities::access_log::ActiveModel {
        user_id: Set(user_id),
        subject: Set(subject.to_string()),
        object: Set(object.to_string()),
        action: Set(action.to_string()),
        allowed: Set(decision.allowed as i64),
        reason: Set(decision.reason.clone()),
        context: Set(Some(serde_json::to_string(&decision.context)?)),
        response_time_ms: Set(decision.response_time_ms as i64),
        ip_address: Set(ip_address),
        user_agent: Set(user_agent),
        created_at: Set(decision.timestamp.timestamp()),
        ..Default::default()
    };
    log.insert(db).await?;
    Ok(())
}

/// Seed a minimal administrative rule set when the store is empty, so a
/// fresh deployment is governable. Returns the number of rules inserted.
pub async fn ensure_bootstrap_policies(db: &DatabaseConnection) -> Result<usize, FulcrumError> {
    let existing = entities::PolicyRule::find().count(db).await?;
    if existing > 0 {
        return Ok(0);
    }

    let repository = SeaOrmPolicyRepository::new(db.clone());
    let defaults = [
        PolicyRule::permission("admin", "*", "*", Effect::Allow, None),
        PolicyRule::permission("admin", "system:admin", "access", Effect::Allow, None),
    ];
    for rule in &defaults {
        repository.create(rule).await.map_err(FulcrumError::Authz)?;
    }

    info!(rules = defaults.len(), "seeded bootstrap policies");
    Ok(defaults.len())
}

/// Remove duplicate rules, keeping the lowest id of each
/// `(ptype, v0..v3)` group. Returns the number of rows removed.
pub async fn dedupe_policies(db: &DatabaseConnection) -> Result<usize, FulcrumError> {
    let rows = entities::PolicyRule::find()
        .order_by_asc(entities::policy_rule::Column::Id)
        .all(db)
        .await?;

    let mut seen = HashSet::new();
    let mut remove = Vec::new();
    for row in rows {
        let key = format!(
            "{}|{}|{}|{}|{}",
            row.ptype,
            row.v0.as_deref().unwrap_or_default(),
            row.v1.as_deref().unwrap_or_default(),
            row.v2.as_deref().unwrap_or_default(),
            row.v3.as_deref().unwrap_or_default(),
        );
        if !seen.insert(key) {
            remove.push(row.id);
        }
    }

    if remove.is_empty() {
        return Ok(0);
    }

    let removed = remove.len();
    entities::PolicyRule::delete_many()
        .filter(entities::policy_rule::Column::Id.is_in(remove))
        .exec(db)
        .await?;

    info!(removed, "removed duplicate policy rules");
    Ok(removed)
}

/// Walk every stored rule, apply the field sanitizer, and persist rows
/// that changed. Returns `(scanned, changed)`.
pub async fn sanitize_store(db: &DatabaseConnection) -> Result<(usize, usize), FulcrumError> {
    let rows = entities::PolicyRule::find()
        .order_by_asc(entities::policy_rule::Column::Id)
        .all(db)
        .await?;

    let scanned = rows.len();
    let mut changed = 0;

    for row in rows {
        let before = [
            row.v0.clone(),
            row.v1.clone(),
            row.v2.clone(),
            row.v3.clone(),
            row.v4.clone(),
            row.v5.clone(),
        ];
        let after: Vec<Option<String>> = before
            .iter()
            .map(|f| sanitize::sanitize(f.as_deref()))
            .collect();

        if after.as_slice() != before.as_slice() {
            let id = row.id;
            let mut active = row.into_active_model();
            active.v0 = Set(after[0].clone());
            active.v1 = Set(after[1].clone());
            active.v2 = Set(after[2].clone());
            active.v3 = Set(after[3].clone());
            active.v4 = Set(after[4].clone());
            active.v5 = Set(after[5].clone());
            active.update(db).await?;
            changed += 1;
            info!(rule_id = id, "sanitized policy rule");
        }
    }

    Ok((scanned, changed))
}
