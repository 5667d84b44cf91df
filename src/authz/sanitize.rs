//! Policy field sanitization.
//!
//! Stored policy fields arrive from admin tooling, bootstrap scripts and
//! older writers, and have been observed carrying non-breaking spaces,
//! control characters and broken JSON context blobs. Everything that
//! enters the store or the matcher goes through `sanitize` first.

use tracing::warn;

/// Normalize one raw policy field.
///
/// Returns `None` for absent input or input that is empty after cleanup.
/// Non-breaking spaces become ordinary spaces, C0 control characters
/// (except tab, LF, CR) and DEL are removed, and runs of horizontal
/// whitespace collapse to a single space before trimming.
///
/// A surviving value that looks like JSON (starts with `{` or `[`) is
/// probed with a real parse; if the parse fails the embedded quotes are
/// escaped so the value can never break line tokenization downstream.
/// Corrupt context JSON degrades, it does not reject the record.
pub fn sanitize(raw: Option<&str>) -> Option<String> {
    let raw = raw?;

    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let ch = if ch == '\u{00A0}' { ' ' } else { ch };
        match ch {
            '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}' => {}
            _ => cleaned.push(ch),
        }
    }

    let mut collapsed = String::with_capacity(cleaned.len());
    let mut in_run = false;
    for ch in cleaned.chars() {
        if ch == ' ' || ch == '\t' {
            if !in_run {
                collapsed.push(' ');
                in_run = true;
            }
        } else {
            collapsed.push(ch);
            in_run = false;
        }
    }

    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut value = trimmed.to_string();
    if value.starts_with('{') || value.starts_with('[') {
        if serde_json::from_str::<serde_json::Value>(&value).is_err() {
            warn!(field = %value, "context field is not valid JSON, degrading to escaped literal");
            value = value.replace('"', "\\\"");
        }
    }

    Some(value)
}

/// Sanitize a positional field list and drop absent results, the shape
/// used when assembling a policy line for persistence or export.
pub fn sanitize_array(fields: &[Option<String>]) -> Vec<String> {
    fields
        .iter()
        .filter_map(|f| sanitize(f.as_deref()))
        .collect()
}
