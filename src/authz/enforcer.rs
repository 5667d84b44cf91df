//! Policy load/reload orchestration and the decision API.
//!
//! The enforcer owns the current `PolicySnapshot` behind an `ArcSwap`:
//! decisions take a lock-free load of an immutable snapshot, while
//! `reload` builds a replacement fully off to the side and publishes it
//! with a single atomic store. Readers always see either the old or the
//! new snapshot in its entirety.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::authz::codec;
use crate::authz::errors::AuthzError;
use crate::authz::matcher::{self, RoleGraph};
use crate::authz::repository::PolicyRepository;
use crate::authz::sanitize;
use crate::authz::types::{
    reason, AttributeMap, AuthorizationDecision, AuthorizationRequest, PolicyRule, RawPolicyRow,
    ReloadError, ReloadReport, RuleKind,
};
use crate::authz::PolicySnapshot;

const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Enforcer {
    repository: Arc<dyn PolicyRepository>,
    snapshot: ArcSwap<PolicySnapshot>,
    dev_fallback: bool,
    reload_timeout: Duration,
}

impl Enforcer {
    /// Create an enforcer with an empty snapshot. Call `reload` to pull
    /// the stored rules in.
    pub fn new(repository: Arc<dyn PolicyRepository>) -> Self {
        Self {
            repository,
            snapshot: ArcSwap::from_pointee(PolicySnapshot::empty()),
            dev_fallback: false,
            reload_timeout: DEFAULT_RELOAD_TIMEOUT,
        }
    }

    /// Grant requests that match no rule at all. Strictly opt-in: this
    /// widens access and must never be on in production.
    pub fn with_dev_fallback(mut self, enabled: bool) -> Self {
        self.dev_fallback = enabled;
        self
    }

    pub fn with_reload_timeout(mut self, reload_timeout: Duration) -> Self {
        self.reload_timeout = reload_timeout;
        self
    }

    /// The repository behind this enforcer, for administration surfaces.
    pub fn repository(&self) -> Arc<dyn PolicyRepository> {
        self.repository.clone()
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.snapshot.load_full()
    }

    /// Rebuild the snapshot from the repository and publish it.
    ///
    /// Rows that fail sanitization/decoding/validation are reported in
    /// the result and excluded; one corrupt row never takes down the
    /// rest. On repository failure or timeout the previous snapshot
    /// stays authoritative and the error is returned.
    pub async fn reload(&self) -> Result<ReloadReport, AuthzError> {
        let seconds = self.reload_timeout.as_secs();
        let rows = timeout(self.reload_timeout, self.repository.list_all())
            .await
            .map_err(|_| AuthzError::ReloadTimeout { seconds })??;

        let total = rows.len();
        let (snapshot, errors) = build_snapshot(rows);
        let policy_count = snapshot.policy_count();
        self.snapshot.store(Arc::new(snapshot));

        info!(
            rows = total,
            policies = policy_count,
            skipped = errors.len(),
            "policy snapshot reloaded"
        );
        Ok(ReloadReport {
            policy_count,
            errors,
        })
    }

    /// Answer an authorization question against the current snapshot.
    /// Performs no I/O and is safe to call concurrently with `reload`.
    pub fn check_permission(
        &self,
        subject: &str,
        object: &str,
        action: &str,
        context: AttributeMap,
    ) -> AuthorizationDecision {
        let request = AuthorizationRequest {
            subject: subject.to_string(),
            object: object.to_string(),
            action: action.to_string(),
            context,
        };
        self.evaluate(&request)
    }

    /// Same as `check_permission`; the decision always carries the
    /// applied policies and timing, for admin and audit surfaces.
    pub fn check_permission_detailed(
        &self,
        subject: &str,
        object: &str,
        action: &str,
        context: AttributeMap,
    ) -> AuthorizationDecision {
        self.check_permission(subject, object, action, context)
    }

    fn evaluate(&self, request: &AuthorizationRequest) -> AuthorizationDecision {
        let snapshot = self.snapshot.load();
        let mut decision = matcher::evaluate(&snapshot, request);

        if self.dev_fallback && !decision.allowed && decision.reason == reason::NO_APPLICABLE_POLICY
        {
            warn!(
                subject = %request.subject,
                object = %request.object,
                action = %request.action,
                "dev fallback granted a request with no applicable rule"
            );
            decision.allowed = true;
            decision.reason = reason::DEV_FALLBACK.to_string();
        }

        decision
    }
}

/// Compile raw rows into a snapshot, collecting per-row errors.
fn build_snapshot(rows: Vec<RawPolicyRow>) -> (PolicySnapshot, Vec<ReloadError>) {
    let mut rules = Vec::new();
    let mut roles = RoleGraph::new();
    let mut errors = Vec::new();

    for row in rows {
        match compile_row(&row) {
            Ok(rule) => match rule.kind {
                RuleKind::P => rules.push(rule),
                RuleKind::G => {
                    // validated: both fields present
                    if let (Some(member), Some(role)) = (rule.member(), rule.role()) {
                        roles.add(member, role);
                    }
                }
            },
            Err(e) => {
                warn!(
                    rule_id = row.id,
                    error = %e,
                    raw = ?row.fields,
                    "excluding policy row from snapshot"
                );
                errors.push(ReloadError {
                    rule_id: row.id,
                    message: e.to_string(),
                });
            }
        }
    }

    (
        PolicySnapshot {
            rules,
            roles,
            loaded_at: Utc::now(),
        },
        errors,
    )
}

/// Sanitize a stored row, round-trip it through the line codec the way
/// the external engine reads it, and validate the result.
fn compile_row(row: &RawPolicyRow) -> Result<PolicyRule, AuthzError> {
    let sanitized: Vec<Option<String>> = row
        .fields
        .iter()
        .map(|f| sanitize::sanitize(f.as_deref()))
        .collect();

    let line = codec::row_line(&row.ptype, &sanitized);
    let rule = codec::decode_row(&line, Some(row.id))?;
    rule.validate()
        .map_err(AuthzError::InvalidRule)?;
    Ok(rule)
}
