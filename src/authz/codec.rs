//! Policy line codec.
//!
//! Policy rules travel as delimited text lines, the format shared with
//! the external policy-evaluation engine and used for CSV export:
//! `ptype, v0, .., v5` with trailing absent fields omitted. A field
//! containing a comma, whitespace or any of `{}()[]` is wrapped in
//! double quotes with internal quotes doubled.

use crate::authz::errors::AuthzError;
use crate::authz::types::{PolicyRule, RuleKind, MAX_FIELDS};

fn needs_quoting(field: &str) -> bool {
    field
        .chars()
        .any(|c| c == ',' || c.is_whitespace() || matches!(c, '{' | '}' | '(' | ')' | '[' | ']'))
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Encode a rule into its canonical line form.
///
/// Trailing `None`s are dropped; interior `None`s are kept as empty
/// fields because position is semantically meaningful (a present v3
/// with absent v1/v2 must decode back to the same positions).
pub fn encode(kind: RuleKind, fields: &[Option<String>]) -> String {
    let mut upto = fields.len().min(MAX_FIELDS);
    while upto > 0 && fields[upto - 1].is_none() {
        upto -= 1;
    }

    let mut parts = Vec::with_capacity(upto + 1);
    parts.push(kind.as_str().to_string());
    for field in &fields[..upto] {
        match field {
            Some(v) if needs_quoting(v) => parts.push(quote(v)),
            Some(v) => parts.push(v.clone()),
            None => parts.push(String::new()),
        }
    }
    parts.join(",")
}

pub fn encode_rule(rule: &PolicyRule) -> String {
    encode(rule.kind, &rule.fields)
}

/// Assemble the wire line for a stored row.
///
/// Unlike `encode`, a field that already begins with a double quote is
/// trusted to carry its own quoting and passes through verbatim; rows
/// written by older adapters store their quoting inside the column
/// value, and `decode` is what validates the result. Everything else is
/// quoted as needed.
pub fn row_line(ptype: &str, fields: &[Option<String>]) -> String {
    let mut upto = fields.len().min(MAX_FIELDS);
    while upto > 0 && fields[upto - 1].is_none() {
        upto -= 1;
    }

    let mut parts = Vec::with_capacity(upto + 1);
    parts.push(ptype.to_string());
    for field in &fields[..upto] {
        match field {
            Some(v) if v.starts_with('"') => parts.push(v.clone()),
            Some(v) if needs_quoting(v) => parts.push(quote(v)),
            Some(v) => parts.push(v.clone()),
            None => parts.push(String::new()),
        }
    }
    parts.join(",")
}

/// Decode a policy line.
pub fn decode(line: &str) -> Result<PolicyRule, AuthzError> {
    decode_row(line, None)
}

/// Decode a policy line that came from a stored row, tagging errors
/// with the row id.
pub fn decode_row(line: &str, rule_id: Option<i64>) -> Result<PolicyRule, AuthzError> {
    let malformed = |message: String| AuthzError::MalformedPolicyLine {
        rule_id,
        line: line.to_string(),
        message,
    };

    let tokens = tokenize(line).map_err(|m| malformed(m))?;

    let mut iter = tokens.into_iter();
    let ptype = match iter.next() {
        Some(t) if !t.is_empty() => t,
        _ => return Err(malformed("missing ptype".to_string())),
    };
    let kind = RuleKind::parse(&ptype)
        .ok_or_else(|| malformed(format!("unknown ptype `{ptype}`")))?;

    let mut fields: Vec<Option<String>> = iter
        .map(|t| if t.is_empty() { None } else { Some(t) })
        .collect();
    if fields.len() > MAX_FIELDS {
        return Err(malformed(format!(
            "too many fields ({}, expected at most {MAX_FIELDS})",
            fields.len()
        )));
    }
    while matches!(fields.last(), Some(None)) {
        fields.pop();
    }

    let mut rule = PolicyRule::new(kind, fields);
    rule.id = rule_id;
    Ok(rule)
}

/// Split a line on top-level commas, honoring quoted segments with
/// doubled-quote escapes. Unquoted tokens are trimmed.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c != ',' && c.is_whitespace()) {
            chars.next();
        }

        let token = if chars.peek() == Some(&'"') {
            chars.next();
            let mut t = String::new();
            loop {
                match chars.next() {
                    None => return Err("unbalanced quote".to_string()),
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        t.push('"');
                    }
                    Some('"') => break,
                    Some(c) => t.push(c),
                }
            }
            while matches!(chars.peek(), Some(c) if *c != ',' && c.is_whitespace()) {
                chars.next();
            }
            match chars.peek() {
                None | Some(',') => {}
                Some(c) => return Err(format!("unexpected `{c}` after closing quote")),
            }
            t
        } else {
            let mut t = String::new();
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                t.push(*c);
                chars.next();
            }
            t.trim_end().to_string()
        };
        tokens.push(token);

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(other) => return Err(format!("unexpected `{other}`")),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::Effect;

    #[test]
    fn test_encode_plain_rule() {
        let rule = PolicyRule::permission("alice", "doc1", "read", Effect::Allow, None);
        assert_eq!(encode_rule(&rule), "p,alice,doc1,read,allow");
    }

    #[test]
    fn test_encode_quotes_special_fields() {
        let rule = PolicyRule::permission(
            "alice",
            "doc1",
            "read",
            Effect::Allow,
            Some(r#"{"time":"*"}"#.to_string()),
        );
        assert_eq!(
            encode_rule(&rule),
            r#"p,alice,doc1,read,allow,"{""time"":""*""}""#
        );
    }

    #[test]
    fn test_quoting_correctness() {
        // `a,b "c"` must encode to `"a,b ""c"""`
        let encoded = encode(RuleKind::P, &[Some(r#"a,b "c""#.to_string())]);
        assert_eq!(encoded, r#"p,"a,b ""c""""#);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.field(0), Some(r#"a,b "c""#));
    }

    #[test]
    fn test_interior_absent_fields_are_preserved() {
        let fields = vec![
            Some("alice".to_string()),
            None,
            None,
            Some("deny".to_string()),
        ];
        let encoded = encode(RuleKind::P, &fields);
        assert_eq!(encoded, "p,alice,,,deny");

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.fields, fields);
    }

    #[test]
    fn test_trailing_absent_fields_are_dropped() {
        let encoded = encode(
            RuleKind::G,
            &[Some("alice".to_string()), Some("admin".to_string()), None, None],
        );
        assert_eq!(encoded, "g,alice,admin");

        let decoded = decode("g,alice,admin,,").unwrap();
        assert_eq!(
            decoded.fields,
            vec![Some("alice".to_string()), Some("admin".to_string())]
        );
    }

    #[test]
    fn test_round_trip_law() {
        let rules = vec![
            PolicyRule::permission("alice", "doc1", "read", Effect::Allow, None),
            PolicyRule::permission("admin:*", "admin:dashboard", "*", Effect::Deny, None),
            PolicyRule::permission(
                "bob@example.com",
                "report/2024",
                "export",
                Effect::Allow,
                Some(r#"{"department":"finance","time":"business_hours"}"#.to_string()),
            ),
            PolicyRule::grouping("alice", "admin"),
            PolicyRule::new(
                RuleKind::P,
                vec![
                    Some("x".to_string()),
                    None,
                    Some(r#"we"ird, (value)"#.to_string()),
                ],
            ),
        ];
        for rule in rules {
            let decoded = decode(&encode_rule(&rule)).unwrap();
            assert_eq!(decoded.kind, rule.kind);
            assert_eq!(decoded.fields, rule.fields);
        }
    }

    #[test]
    fn test_decode_tolerates_spaces_after_commas() {
        let decoded = decode("p, alice, doc1, read, allow").unwrap();
        assert_eq!(decoded.subject(), Some("alice"));
        assert_eq!(decoded.effect_field(), Some("allow"));
    }

    #[test]
    fn test_unbalanced_quote_is_malformed() {
        let err = decode(r#"p,alice,doc1,read,allow,"{"time""#).unwrap_err();
        match err {
            AuthzError::MalformedPolicyLine { message, .. } => {
                assert!(message.contains("quote") || message.contains("unexpected"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_ptype_is_malformed() {
        assert!(matches!(
            decode("x,alice,doc1"),
            Err(AuthzError::MalformedPolicyLine { .. })
        ));
    }

    #[test]
    fn test_too_many_fields_is_malformed() {
        assert!(matches!(
            decode("p,a,b,c,d,e,f,g"),
            Err(AuthzError::MalformedPolicyLine { .. })
        ));
    }

    #[test]
    fn test_row_line_trusts_embedded_quoting() {
        // a row written by an older adapter with its own (broken) quoting
        let fields = [
            Some("alice".to_string()),
            Some("doc1".to_string()),
            Some("read".to_string()),
            Some("allow".to_string()),
            Some(r#""{"office"#.to_string()),
            None,
        ];
        let line = row_line("p", &fields);
        assert!(decode(&line).is_err());

        // well-formed embedded quoting round-trips
        let fields = [
            Some("alice".to_string()),
            Some(r#""a,b""#.to_string()),
            None,
            None,
            None,
            None,
        ];
        let line = row_line("p", &fields);
        let decoded = decode(&line).unwrap();
        assert_eq!(decoded.field(1), Some("a,b"));
    }
}
