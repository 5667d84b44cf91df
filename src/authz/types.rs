use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum positional fields a rule may carry (v0..v5).
pub const MAX_FIELDS: usize = 6;

/// Fixed, machine-readable decision reasons.
pub mod reason {
    pub const GRANTED_BY_POLICY: &str = "granted_by_policy";
    pub const DENIED_BY_EXPLICIT_POLICY: &str = "denied_by_explicit_policy";
    pub const NO_APPLICABLE_POLICY: &str = "no_applicable_policy";
    pub const EMPTY_SUBJECT: &str = "empty_subject";
    pub const DEV_FALLBACK: &str = "dev_fallback";
}

/// Rule discriminator, the `ptype` column of a stored rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    /// Permission rule: (subject, object, action, effect, context?)
    #[serde(rename = "p")]
    P,
    /// Grouping rule: (member, role)
    #[serde(rename = "g")]
    G,
}

impl RuleKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "p" => Some(RuleKind::P),
            "g" => Some(RuleKind::G),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::P => "p",
            RuleKind::G => "g",
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effect of a permission rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Effect::Allow),
            "deny" => Some(Effect::Deny),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

/// A single policy rule: a permission statement or a role membership.
///
/// `fields` are the positional values v0..v5. A field is either `None`
/// (absent) or a non-empty sanitized string; trailing `None`s are never
/// kept, interior `None`s are (position is meaningful).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: Option<i64>,
    #[serde(rename = "ptype")]
    pub kind: RuleKind,
    pub fields: Vec<Option<String>>,
}

impl PolicyRule {
    pub fn new(kind: RuleKind, mut fields: Vec<Option<String>>) -> Self {
        while matches!(fields.last(), Some(None)) {
            fields.pop();
        }
        Self {
            id: None,
            kind,
            fields,
        }
    }

    /// Build a permission rule.
    pub fn permission(
        subject: &str,
        object: &str,
        action: &str,
        effect: Effect,
        context: Option<String>,
    ) -> Self {
        Self::new(
            RuleKind::P,
            vec![
                Some(subject.to_string()),
                Some(object.to_string()),
                Some(action.to_string()),
                Some(effect.as_str().to_string()),
                context,
            ],
        )
    }

    /// Build a grouping (role membership) rule.
    pub fn grouping(member: &str, role: &str) -> Self {
        Self::new(
            RuleKind::G,
            vec![Some(member.to_string()), Some(role.to_string())],
        )
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).and_then(|f| f.as_deref())
    }

    pub fn subject(&self) -> Option<&str> {
        self.field(0)
    }

    pub fn object(&self) -> Option<&str> {
        self.field(1)
    }

    pub fn action(&self) -> Option<&str> {
        self.field(2)
    }

    pub fn effect_field(&self) -> Option<&str> {
        self.field(3)
    }

    pub fn context_expr(&self) -> Option<&str> {
        self.field(4)
    }

    /// Member subject of a grouping rule (v0).
    pub fn member(&self) -> Option<&str> {
        self.field(0)
    }

    /// Role name of a grouping rule (v1).
    pub fn role(&self) -> Option<&str> {
        self.field(1)
    }

    /// Effect of a permission rule. A missing effect field defaults to
    /// allow, matching the evaluation engine's default.
    pub fn effect(&self) -> Effect {
        self.effect_field()
            .and_then(Effect::parse)
            .unwrap_or(Effect::Allow)
    }

    /// Structural validation applied when a rule enters a snapshot.
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            RuleKind::P => {
                if self.subject().is_none() {
                    return Err("permission rule has no subject".to_string());
                }
                if self.object().is_none() {
                    return Err("permission rule has no object".to_string());
                }
                if self.action().is_none() {
                    return Err("permission rule has no action".to_string());
                }
                if let Some(effect) = self.effect_field() {
                    if Effect::parse(effect).is_none() {
                        return Err(format!("unknown effect `{effect}`"));
                    }
                }
            }
            RuleKind::G => {
                if self.member().is_none() {
                    return Err("grouping rule has no member".to_string());
                }
                if self.role().is_none() {
                    return Err("grouping rule has no role".to_string());
                }
            }
        }
        Ok(())
    }
}

/// A policy row as fetched from the repository, before sanitization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPolicyRow {
    pub id: i64,
    pub ptype: String,
    pub fields: [Option<String>; MAX_FIELDS],
}

/// A typed contextual attribute supplied with an authorization request.
///
/// Deserialization is untagged: JSON booleans and numbers map directly,
/// RFC 3339 strings become timestamps, everything else stays a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    String(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// An authorization question: may `subject` perform `action` on `object`
/// given `context`?
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationRequest {
    pub subject: String,
    pub object: String,
    pub action: String,
    #[serde(default)]
    pub context: AttributeMap,
}

/// The answer, with audit evidence. Serializes to the wire shape
/// `{allowed, reason, appliedPolicies, context, timestamp, responseTime}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationDecision {
    pub allowed: bool,
    pub reason: String,
    pub applied_policies: Vec<PolicyRule>,
    pub context: AttributeMap,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "responseTime")]
    pub response_time_ms: u64,
}

/// Outcome of a policy reload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadReport {
    pub policy_count: usize,
    pub errors: Vec<ReloadError>,
}

/// A row excluded from the snapshot during reload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadError {
    pub rule_id: i64,
    pub message: String,
}
