//! Context predicate evaluation.
//!
//! A permission rule may carry a context expression in v4: a JSON object
//! of attribute conditions that must all hold against the request
//! context. Recognized keys get dedicated semantics (`time`, `location`,
//! `department`, `ip`); any other key compares for equality.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde_json::Value;

use crate::authz::types::{AttributeMap, AttributeValue};

/// Evaluate a rule's context expression against the request context.
///
/// An absent expression or the wildcard `"*"` always matches. Returns
/// `Err` when the expression itself is unusable (not JSON, not an
/// object); the caller excludes just that rule and keeps evaluating.
pub fn matches(
    policy_ctx: Option<&str>,
    request_ctx: &AttributeMap,
    now: DateTime<Utc>,
) -> Result<bool, String> {
    let Some(raw) = policy_ctx else {
        return Ok(true);
    };
    if raw == "*" {
        return Ok(true);
    }

    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| format!("context expression is not valid JSON: {e}"))?;
    let Value::Object(conditions) = parsed else {
        return Err("context expression must be a JSON object".to_string());
    };

    for (key, required) in &conditions {
        let ok = match key.as_str() {
            "time" => time_condition(request_ctx.get("time"), required, now),
            "location" => location_condition(request_ctx.get("location"), required),
            "ip" => ip_condition(request_ctx.get("ip"), required),
            _ => attribute_equals(request_ctx.get(key), required),
        };
        if !ok {
            return Ok(false);
        }
    }

    Ok(true)
}

/// `"business_hours"` means Monday through Friday, hour 9..=18, judged
/// from the request's `time` attribute or the evaluation wall clock.
/// Other policy time values are accepted as matching.
fn time_condition(attr: Option<&AttributeValue>, required: &Value, now: DateTime<Utc>) -> bool {
    let Value::String(required) = required else {
        return false;
    };
    if required != "business_hours" {
        return true;
    }

    let when = match attr {
        Some(AttributeValue::Timestamp(t)) => *t,
        Some(AttributeValue::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(t) => t.with_timezone(&Utc),
            // an unreadable request time never qualifies as business hours
            Err(_) => return false,
        },
        Some(AttributeValue::Number(n)) => match Utc.timestamp_opt(*n as i64, 0) {
            chrono::LocalResult::Single(t) => t,
            _ => return false,
        },
        Some(AttributeValue::Bool(_)) => return false,
        None => now,
    };

    let weekday = when.weekday().number_from_monday();
    let hour = when.hour();
    (1..=5).contains(&weekday) && (9..=18).contains(&hour)
}

/// Location matches exactly, or by `*` wildcard within the policy value.
fn location_condition(attr: Option<&AttributeValue>, required: &Value) -> bool {
    let Some(AttributeValue::String(location)) = attr else {
        return false;
    };
    let Value::String(required) = required else {
        return false;
    };
    if required.contains('*') {
        wildcard_match(location, required)
    } else {
        location == required
    }
}

/// IP matches exactly. A policy value carrying a CIDR suffix is accepted
/// as matching.
/// TODO: real CIDR containment (parse the prefix and compare networks).
fn ip_condition(attr: Option<&AttributeValue>, required: &Value) -> bool {
    let Some(AttributeValue::String(ip)) = attr else {
        return false;
    };
    let Value::String(required) = required else {
        return false;
    };
    if required.contains('/') {
        return true;
    }
    ip == required
}

/// Direct equality between a request attribute and a policy JSON value.
fn attribute_equals(attr: Option<&AttributeValue>, required: &Value) -> bool {
    let Some(attr) = attr else {
        return false;
    };
    match (attr, required) {
        (AttributeValue::String(s), Value::String(v)) => s == v,
        (AttributeValue::Bool(b), Value::Bool(v)) => b == v,
        (AttributeValue::Number(n), Value::Number(v)) => {
            v.as_f64().map(|f| f == *n).unwrap_or(false)
        }
        (AttributeValue::Timestamp(t), Value::String(v)) => DateTime::parse_from_rfc3339(v)
            .map(|p| p.with_timezone(&Utc) == *t)
            .unwrap_or(false),
        _ => false,
    }
}

/// Character-level wildcard match where `*` spans any run of characters.
fn wildcard_match(value: &str, pattern: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return true;
    };
    if !value.starts_with(first) {
        return false;
    }
    let mut rest = &value[first.len()..];

    let mut segments: Vec<&str> = parts.collect();
    let last = segments.pop();
    for seg in segments {
        match rest.find(seg) {
            Some(idx) => rest = &rest[idx + seg.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) => rest.ends_with(last),
        // pattern had no `*` at all; already covered by starts_with
        None => rest.is_empty(),
    }
}
