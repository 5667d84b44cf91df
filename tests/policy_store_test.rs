//! End-to-end tests over the sqlite-backed policy store: repository
//! CRUD, enforcer reload with corrupt-row isolation, audit logging, and
//! the store maintenance sweeps.

mod helpers;

use std::sync::Arc;

use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

use fulcrum::authz::enforcer::Enforcer;
use fulcrum::authz::repository::PolicyRepository;
use fulcrum::authz::types::{reason, AttributeMap, AttributeValue, Effect, PolicyRule};
use fulcrum::entities;
use fulcrum::storage::{self, SeaOrmPolicyRepository};

use helpers::db::TestDb;

async fn seed_rule(repo: &SeaOrmPolicyRepository, rule: PolicyRule) -> i64 {
    repo.create(&rule)
        .await
        .expect("failed to seed rule")
        .id
        .expect("created rule has an id")
}

/// Insert a raw row directly, bypassing sanitization, the way legacy
/// writers did.
async fn insert_raw_row(
    db: &sea_orm::DatabaseConnection,
    ptype: &str,
    fields: [Option<&str>; 6],
) -> i64 {
    let [v0, v1, v2, v3, v4, v5] = fields.map(|f| f.map(str::to_string));
    let model = entities::policy_rule::ActiveModel {
        ptype: Set(ptype.to_string()),
        v0: Set(v0),
        v1: Set(v1),
        v2: Set(v2),
        v3: Set(v3),
        v4: Set(v4),
        v5: Set(v5),
        ..Default::default()
    };
    model.insert(db).await.expect("insert raw row").id
}

#[tokio::test]
async fn test_repository_crud_round_trip() {
    let test_db = TestDb::new().await;
    let repo = SeaOrmPolicyRepository::new(test_db.connection().clone());

    let id = seed_rule(
        &repo,
        PolicyRule::permission("alice@example.com", "doc1", "read", Effect::Allow, None),
    )
    .await;

    let rows = repo.list_all().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id);
    assert_eq!(rows[0].ptype, "p");
    assert_eq!(rows[0].fields[0].as_deref(), Some("alice@example.com"));
    assert_eq!(rows[0].fields[5], None);

    let updated = PolicyRule::permission("alice@example.com", "doc1", "write", Effect::Deny, None);
    repo.update(id, &updated).await.unwrap();
    let rows = repo.find_by_subject("alice@example.com").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].fields[2].as_deref(), Some("write"));
    assert_eq!(rows[0].fields[3].as_deref(), Some("deny"));

    assert!(repo.find_by_subject("bob@example.com").await.unwrap().is_empty());

    repo.delete(id).await.unwrap();
    assert!(repo.list_all().await.unwrap().is_empty());
    assert!(repo.delete(id).await.is_err());
}

#[tokio::test]
async fn test_reload_from_database_with_role_closure() {
    let test_db = TestDb::new().await;
    let repo = SeaOrmPolicyRepository::new(test_db.connection().clone());

    seed_rule(&repo, PolicyRule::grouping("alice@example.com", "admin")).await;
    seed_rule(
        &repo,
        PolicyRule::permission("admin", "admin:dashboard", "read", Effect::Allow, None),
    )
    .await;

    let enforcer = Enforcer::new(Arc::new(repo));
    let report = enforcer.reload().await.unwrap();
    assert_eq!(report.policy_count, 2);
    assert!(report.errors.is_empty());

    let decision = enforcer.check_permission_detailed(
        "alice@example.com",
        "admin:dashboard",
        "read",
        AttributeMap::new(),
    );
    assert!(decision.allowed);
    assert_eq!(decision.reason, reason::GRANTED_BY_POLICY);
    assert_eq!(decision.applied_policies.len(), 1);

    assert!(
        !enforcer
            .check_permission("mallory", "admin:dashboard", "read", AttributeMap::new())
            .allowed
    );
}

#[tokio::test]
async fn test_corrupt_row_isolation_through_reload() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let repo = SeaOrmPolicyRepository::new(db.clone());

    seed_rule(
        &repo,
        PolicyRule::permission("alice@example.com", "doc1", "read", Effect::Allow, None),
    )
    .await;
    // a legacy row whose v4 carries unbalanced embedded quoting
    let corrupt_id = insert_raw_row(
        db,
        "p",
        [
            Some("bob@example.com"),
            Some("doc2"),
            Some("read"),
            Some("allow"),
            Some(r#""{"office"#),
            None,
        ],
    )
    .await;
    seed_rule(&repo, PolicyRule::grouping("carol@example.com", "auditors")).await;

    let enforcer = Enforcer::new(Arc::new(repo));
    let report = enforcer.reload().await.unwrap();

    // policy count is total rows minus the corrupt one
    assert_eq!(report.policy_count, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].rule_id, corrupt_id);

    assert!(
        enforcer
            .check_permission("alice@example.com", "doc1", "read", AttributeMap::new())
            .allowed
    );
    assert!(
        !enforcer
            .check_permission("bob@example.com", "doc2", "read", AttributeMap::new())
            .allowed
    );
}

#[tokio::test]
async fn test_access_log_is_persisted() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let repo = SeaOrmPolicyRepository::new(db.clone());

    seed_rule(
        &repo,
        PolicyRule::permission("user:42", "report", "read", Effect::Allow, None),
    )
    .await;
    let enforcer = Enforcer::new(Arc::new(repo));
    enforcer.reload().await.unwrap();

    let mut context = AttributeMap::new();
    context.insert("ip".to_string(), AttributeValue::from("10.0.0.5"));
    context.insert("userAgent".to_string(), AttributeValue::from("integration-test"));

    let decision = enforcer.check_permission_detailed("user:42", "report", "read", context);
    assert!(decision.allowed);

    storage::record_access(db, "user:42", "report", "read", &decision)
        .await
        .unwrap();

    let logs = entities::AccessLog::find().all(db).await.unwrap();
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.user_id.as_deref(), Some("42"));
    assert_eq!(log.subject, "user:42");
    assert_eq!(log.allowed, 1);
    assert_eq!(log.reason, reason::GRANTED_BY_POLICY);
    assert_eq!(log.ip_address.as_deref(), Some("10.0.0.5"));
    assert_eq!(log.user_agent.as_deref(), Some("integration-test"));
    assert!(log.context.as_deref().unwrap().contains("10.0.0.5"));
}

#[tokio::test]
async fn test_bootstrap_policies_only_seed_empty_store() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let seeded = storage::ensure_bootstrap_policies(db).await.unwrap();
    assert!(seeded > 0);

    // a second run is a no-op
    assert_eq!(storage::ensure_bootstrap_policies(db).await.unwrap(), 0);

    // the seeded rules make an admin role useful out of the box
    let repo = SeaOrmPolicyRepository::new(db.clone());
    seed_rule(&repo, PolicyRule::grouping("root@example.com", "admin")).await;

    let enforcer = Enforcer::new(Arc::new(repo));
    enforcer.reload().await.unwrap();
    assert!(
        enforcer
            .check_permission("root@example.com", "system:admin", "access", AttributeMap::new())
            .allowed
    );
}

#[tokio::test]
async fn test_dedupe_keeps_lowest_id() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let first = insert_raw_row(
        db,
        "p",
        [Some("alice"), Some("doc1"), Some("read"), Some("allow"), None, None],
    )
    .await;
    let _dup = insert_raw_row(
        db,
        "p",
        [Some("alice"), Some("doc1"), Some("read"), Some("allow"), None, None],
    )
    .await;
    let other = insert_raw_row(
        db,
        "p",
        [Some("bob"), Some("doc1"), Some("read"), Some("allow"), None, None],
    )
    .await;

    let removed = storage::dedupe_policies(db).await.unwrap();
    assert_eq!(removed, 1);

    let mut remaining: Vec<i64> = entities::PolicyRule::find()
        .all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    remaining.sort_unstable();
    assert_eq!(remaining, vec![first, other]);

    // nothing left to remove
    assert_eq!(storage::dedupe_policies(db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_sanitize_store_persists_cleaned_fields() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    insert_raw_row(
        db,
        "p",
        [
            Some("alice\u{00A0}smith"),
            Some("  doc1 "),
            Some("re\u{0000}ad"),
            Some("allow"),
            None,
            None,
        ],
    )
    .await;
    insert_raw_row(
        db,
        "p",
        [Some("bob"), Some("doc2"), Some("read"), Some("allow"), None, None],
    )
    .await;

    let (scanned, changed) = storage::sanitize_store(db).await.unwrap();
    assert_eq!(scanned, 2);
    assert_eq!(changed, 1);

    let cleaned = entities::PolicyRule::find()
        .filter(entities::policy_rule::Column::V0.eq("alice smith"))
        .one(db)
        .await
        .unwrap()
        .expect("sanitized row present");
    assert_eq!(cleaned.v1.as_deref(), Some("doc1"));
    assert_eq!(cleaned.v2.as_deref(), Some("read"));

    // idempotent
    let (_, changed) = storage::sanitize_store(db).await.unwrap();
    assert_eq!(changed, 0);
}

#[tokio::test]
async fn test_deny_overrides_allow_through_store() {
    let test_db = TestDb::new().await;
    let repo = SeaOrmPolicyRepository::new(test_db.connection().clone());

    seed_rule(
        &repo,
        PolicyRule::permission("alice", "doc1", "read", Effect::Allow, None),
    )
    .await;
    seed_rule(
        &repo,
        PolicyRule::permission("alice", "doc1", "read", Effect::Deny, None),
    )
    .await;

    let enforcer = Enforcer::new(Arc::new(repo));
    enforcer.reload().await.unwrap();

    let decision =
        enforcer.check_permission_detailed("alice", "doc1", "read", AttributeMap::new());
    assert!(!decision.allowed);
    assert_eq!(decision.reason, reason::DENIED_BY_EXPLICIT_POLICY);
    assert_eq!(decision.applied_policies.len(), 2);
}

#[tokio::test]
async fn test_context_rule_through_store() {
    let test_db = TestDb::new().await;
    let repo = SeaOrmPolicyRepository::new(test_db.connection().clone());

    seed_rule(
        &repo,
        PolicyRule::permission(
            "finance-team",
            "invoice:*",
            "view",
            Effect::Allow,
            Some(r#"{"department":"finance"}"#.to_string()),
        ),
    )
    .await;
    seed_rule(&repo, PolicyRule::grouping("carol@example.com", "finance-team")).await;

    let enforcer = Enforcer::new(Arc::new(repo));
    enforcer.reload().await.unwrap();

    let mut context = AttributeMap::new();
    context.insert("department".to_string(), AttributeValue::from("finance"));
    assert!(
        enforcer
            .check_permission("carol@example.com", "invoice:2024-07", "view", context)
            .allowed
    );

    let mut wrong = AttributeMap::new();
    wrong.insert("department".to_string(), AttributeValue::from("hr"));
    assert!(
        !enforcer
            .check_permission("carol@example.com", "invoice:2024-07", "view", wrong)
            .allowed
    );
}
