//! Storage seam for policy rules.
//!
//! The enforcer only ever talks to this trait, so any backing store can
//! sit behind it. The sea-orm implementation lives in `crate::storage`;
//! the in-memory one here serves tests and ephemeral deployments.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::authz::errors::AuthzError;
use crate::authz::types::{PolicyRule, RawPolicyRow, MAX_FIELDS};

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Fetch every stored rule row, unsanitized, in id order.
    async fn list_all(&self) -> Result<Vec<RawPolicyRow>, AuthzError>;

    /// Persist a new rule and return it with its assigned id.
    async fn create(&self, rule: &PolicyRule) -> Result<PolicyRule, AuthzError>;

    /// Replace the fields of an existing rule.
    async fn update(&self, id: i64, rule: &PolicyRule) -> Result<(), AuthzError>;

    /// Remove a rule.
    async fn delete(&self, id: i64) -> Result<(), AuthzError>;

    /// Fetch the rows whose v0 equals `subject`.
    async fn find_by_subject(&self, subject: &str) -> Result<Vec<RawPolicyRow>, AuthzError>;
}

/// Spread a rule's fields into the six positional columns.
pub fn columns_of(rule: &PolicyRule) -> [Option<String>; MAX_FIELDS] {
    let mut columns: [Option<String>; MAX_FIELDS] = Default::default();
    for (i, slot) in columns.iter_mut().enumerate() {
        *slot = rule.fields.get(i).cloned().flatten();
    }
    columns
}

/// In-memory policy repository.
///
/// An optional fetch delay widens the reload window, which is what the
/// snapshot-atomicity tests lean on.
#[derive(Default)]
pub struct MemoryPolicyRepository {
    rows: Mutex<Vec<RawPolicyRow>>,
    next_id: AtomicI64,
    fetch_delay: Mutex<Option<Duration>>,
}

impl MemoryPolicyRepository {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        self.set_fetch_delay(Some(delay));
        self
    }

    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock().expect("repository lock poisoned") = delay;
    }

    /// Insert a raw row as-is, corruption included. Returns the row id.
    pub fn insert_raw(&self, ptype: &str, fields: [Option<String>; MAX_FIELDS]) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .expect("repository lock poisoned")
            .push(RawPolicyRow {
                id,
                ptype: ptype.to_string(),
                fields,
            });
        id
    }

    /// Replace the whole store, as a reconciliation script would.
    pub fn replace_all(&self, rules: &[PolicyRule]) {
        let mut rows = self.rows.lock().expect("repository lock poisoned");
        rows.clear();
        for rule in rules {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            rows.push(RawPolicyRow {
                id,
                ptype: rule.kind.as_str().to_string(),
                fields: columns_of(rule),
            });
        }
    }
}

#[async_trait]
impl PolicyRepository for MemoryPolicyRepository {
    async fn list_all(&self) -> Result<Vec<RawPolicyRow>, AuthzError> {
        let delay = *self.fetch_delay.lock().expect("repository lock poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.rows.lock().expect("repository lock poisoned").clone())
    }

    async fn create(&self, rule: &PolicyRule) -> Result<PolicyRule, AuthzError> {
        let id = self.insert_raw(rule.kind.as_str(), columns_of(rule));
        let mut created = rule.clone();
        created.id = Some(id);
        Ok(created)
    }

    async fn update(&self, id: i64, rule: &PolicyRule) -> Result<(), AuthzError> {
        let mut rows = self.rows.lock().expect("repository lock poisoned");
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AuthzError::InvalidRule(format!("policy rule {id} not found")))?;
        row.ptype = rule.kind.as_str().to_string();
        row.fields = columns_of(rule);
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), AuthzError> {
        let mut rows = self.rows.lock().expect("repository lock poisoned");
        let before = rows.len();
        rows.retain(|r| r.id != id);
        if rows.len() == before {
            return Err(AuthzError::InvalidRule(format!(
                "policy rule {id} not found"
            )));
        }
        Ok(())
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Vec<RawPolicyRow>, AuthzError> {
        Ok(self
            .rows
            .lock()
            .expect("repository lock poisoned")
            .iter()
            .filter(|r| r.fields[0].as_deref() == Some(subject))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::Effect;

    #[tokio::test]
    async fn test_memory_repository_crud() {
        let repo = MemoryPolicyRepository::new();

        let rule = PolicyRule::permission("alice", "doc1", "read", Effect::Allow, None);
        let created = repo.create(&rule).await.unwrap();
        let id = created.id.unwrap();

        let rows = repo.list_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields[0].as_deref(), Some("alice"));

        let updated = PolicyRule::permission("alice", "doc1", "write", Effect::Allow, None);
        repo.update(id, &updated).await.unwrap();
        let rows = repo.list_all().await.unwrap();
        assert_eq!(rows[0].fields[2].as_deref(), Some("write"));

        let by_subject = repo.find_by_subject("alice").await.unwrap();
        assert_eq!(by_subject.len(), 1);
        assert!(repo.find_by_subject("bob").await.unwrap().is_empty());

        repo.delete(id).await.unwrap();
        assert!(repo.list_all().await.unwrap().is_empty());
        assert!(repo.delete(id).await.is_err());
    }
}
