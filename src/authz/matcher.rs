//! Request evaluation against a policy snapshot.
//!
//! A permission rule applies when its subject matches the request
//! subject (string identity, role-graph closure, or segment pattern),
//! its object and action match (identity or pattern), and its context
//! expression holds. Effects combine as some-allow-and-no-deny: an
//! explicit deny always overrides any allow.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::Utc;
use tracing::warn;

use crate::authz::context;
use crate::authz::errors::AuthzError;
use crate::authz::types::{
    reason, AuthorizationDecision, AuthorizationRequest, Effect, PolicyRule,
};
use crate::authz::PolicySnapshot;

const MAX_ROLE_DEPTH: usize = 10;

/// Role membership graph built from all `g` rules. Membership may be
/// multi-level (a member can itself be a role name).
#[derive(Debug, Default)]
pub struct RoleGraph {
    memberships: HashMap<String, Vec<String>>,
    edge_count: usize,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, member: &str, role: &str) {
        self.memberships
            .entry(member.to_string())
            .or_default()
            .push(role.to_string());
        self.edge_count += 1;
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// True when `member` is inside `role`'s closure. A name is trivially
    /// a member of itself. Traversal is capped so membership cycles in
    /// stored data cannot hang evaluation.
    pub fn is_member(&self, member: &str, role: &str) -> bool {
        let mut visited = HashSet::new();
        self.walk(member, role, &mut visited, 0)
    }

    fn walk(&self, current: &str, target: &str, visited: &mut HashSet<String>, depth: usize) -> bool {
        if current == target {
            return true;
        }
        if depth >= MAX_ROLE_DEPTH {
            return false;
        }
        if !visited.insert(current.to_string()) {
            return false;
        }
        self.memberships
            .get(current)
            .map(|roles| {
                roles
                    .iter()
                    .any(|role| self.walk(role, target, visited, depth + 1))
            })
            .unwrap_or(false)
    }
}

/// Segment-wise pattern matching for subject/object/action fields.
///
/// `*` alone matches any non-empty value. Otherwise the pattern is split
/// on `:` and `/`; a `*` segment matches exactly one value segment, and
/// a trailing `*` matches the whole remainder (at least one segment), so
/// `admin:*` matches both `admin:users` and `admin:users:list`.
pub fn key_match(value: &str, pattern: &str) -> bool {
    if value == pattern {
        return true;
    }
    if pattern == "*" {
        return !value.is_empty();
    }
    if !pattern.contains('*') {
        return false;
    }

    let pattern_segments: Vec<&str> = pattern.split([':', '/']).collect();
    let value_segments: Vec<&str> = value.split([':', '/']).collect();

    for (i, pseg) in pattern_segments.iter().enumerate() {
        let Some(vseg) = value_segments.get(i) else {
            return false;
        };
        if *pseg == "*" {
            if i == pattern_segments.len() - 1 {
                // trailing wildcard consumes the remainder
                return value_segments.len() >= pattern_segments.len();
            }
            continue;
        }
        if pseg != vseg {
            return false;
        }
    }

    value_segments.len() == pattern_segments.len()
}

/// Evaluate a request against the snapshot and produce a decision with
/// audit evidence. Never fails: per-rule problems exclude only that rule.
pub fn evaluate(snapshot: &PolicySnapshot, request: &AuthorizationRequest) -> AuthorizationDecision {
    let started = Instant::now();
    let timestamp = Utc::now();

    // No rule may grant access to an anonymous subject, wildcards included.
    if request.subject.trim().is_empty() {
        return AuthorizationDecision {
            allowed: false,
            reason: reason::EMPTY_SUBJECT.to_string(),
            applied_policies: Vec::new(),
            context: request.context.clone(),
            timestamp,
            response_time_ms: elapsed_ms(started),
        };
    }

    let mut applied = Vec::new();
    let mut any_allow = false;
    let mut any_deny = false;

    for rule in &snapshot.rules {
        match rule_applies(snapshot, rule, request) {
            Ok(true) => {
                match rule.effect() {
                    Effect::Allow => any_allow = true,
                    Effect::Deny => any_deny = true,
                }
                applied.push(rule.clone());
            }
            Ok(false) => {}
            Err(message) => {
                let e = AuthzError::PolicyEval {
                    rule_id: rule.id,
                    message,
                };
                warn!(error = %e, rule_id = ?rule.id, "excluding rule from evaluation");
            }
        }
    }

    let allowed = any_allow && !any_deny;
    let reason = if any_deny {
        reason::DENIED_BY_EXPLICIT_POLICY
    } else if any_allow {
        reason::GRANTED_BY_POLICY
    } else {
        reason::NO_APPLICABLE_POLICY
    };

    AuthorizationDecision {
        allowed,
        reason: reason.to_string(),
        applied_policies: applied,
        context: request.context.clone(),
        timestamp,
        response_time_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn rule_applies(
    snapshot: &PolicySnapshot,
    rule: &PolicyRule,
    request: &AuthorizationRequest,
) -> Result<bool, String> {
    let subject = rule.subject().ok_or("rule has no subject")?;
    let object = rule.object().ok_or("rule has no object")?;
    let action = rule.action().ok_or("rule has no action")?;

    let subject_matches = request.subject == subject
        || snapshot.roles.is_member(&request.subject, subject)
        || key_match(&request.subject, subject);
    if !subject_matches {
        return Ok(false);
    }

    if request.object != object && !key_match(&request.object, object) {
        return Ok(false);
    }
    if request.action != action && !key_match(&request.action, action) {
        return Ok(false);
    }

    context::matches(rule.context_expr(), &request.context, Utc::now())
}
