//! Input validation (§4.D): ID syntax check and recursive payload
//! sanitization (depth, key-length, string-length caps).

use serde_json::{Map, Value};

use crate::strings::{floor_char_boundary, TRUNCATE_SUFFIX};

/// `[A-Za-z0-9._-]{1,maxLen}`, non-empty.
pub fn is_valid_id(s: &str, max_len: usize) -> bool {
    !s.is_empty()
        && s.len() <= max_len
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Limits applied by [`sanitize_map_recursively`].
#[derive(Debug, Clone, Copy)]
pub struct SanitizeLimits {
    pub max_depth: usize,
    pub max_key_len: usize,
    pub max_str_len: usize,
}

/// Describes what was dropped or truncated while sanitizing a payload.
/// Callers may proceed with the returned (partially) sanitized value
/// regardless of whether this is `Some`.
#[derive(Debug, Default, Clone)]
pub struct SanitizeReport {
    pub truncated_strings: u32,
    pub dropped_keys: u32,
    pub dropped_subtrees: u32,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        self.truncated_strings == 0 && self.dropped_keys == 0 && self.dropped_subtrees == 0
    }
}

/// Recursively sanitize a JSON value, truncating over-long strings and
/// dropping over-long keys or over-deep subtrees. Always returns a usable
/// value plus a report of what it had to change.
pub fn sanitize_map_recursively(value: &Value, limits: SanitizeLimits) -> (Value, SanitizeReport) {
    let mut report = SanitizeReport::default();
    let sanitized = sanitize(value, limits, 0, &mut report);
    (sanitized, report)
}

fn sanitize(value: &Value, limits: SanitizeLimits, depth: usize, report: &mut SanitizeReport) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_str(s, limits.max_str_len, report)),
        Value::Array(items) => {
            if depth >= limits.max_depth {
                report.dropped_subtrees += 1;
                return Value::Array(Vec::new());
            }
            Value::Array(
                items
                    .iter()
                    .map(|v| sanitize(v, limits, depth + 1, report))
                    .collect(),
            )
        }
        Value::Object(map) => {
            if depth >= limits.max_depth {
                report.dropped_subtrees += 1;
                return Value::Object(Map::new());
            }
            let mut out = Map::new();
            for (k, v) in map {
                if k.len() > limits.max_key_len {
                    report.dropped_keys += 1;
                    continue;
                }
                out.insert(k.clone(), sanitize(v, limits, depth + 1, report));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn truncate_str(s: &str, max_len: usize, report: &mut SanitizeReport) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    report.truncated_strings += 1;
    // Too small a budget to fit the suffix at all — hard-truncate instead.
    if max_len <= TRUNCATE_SUFFIX.len() {
        let cut = floor_char_boundary(s, max_len);
        return s[..cut].to_string();
    }
    let budget = max_len - TRUNCATE_SUFFIX.len();
    let cut = floor_char_boundary(s, budget);
    format!("{}{}", &s[..cut], TRUNCATE_SUFFIX)
}
