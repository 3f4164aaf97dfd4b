//! Anchor-based field lookup over projected text
//!
//! Lookups never parse the text as a whole. They find the select marker of a
//! collection, then the first occurrence of a quoted field name after it, then
//! that field's value.

use serde::{Deserialize, Serialize};

/// Returned by [`extract_hostname`] when the hostname cannot be located.
pub const HOSTNAME_SENTINEL: &str = "Error";

/// Alerts returned in full; the rest are only counted.
pub const MAX_ALERTS: usize = 3;

const SETTING_COLLECTION: &str = "setting";
const ALERT_COLLECTION: &str = "alert";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub key: String,
    pub time: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub alerts: Vec<Alert>,
    /// Alerts found past [`MAX_ALERTS`].
    pub remaining: usize,
}

/// The rendered select command that precedes a collection's documents.
pub fn select_marker(collection: &str) -> String {
    format!(r#"{{ "__cmd" : "select", "collection" : "{collection}" }}"#)
}

/// Value of the first `field` after `collection`'s select marker.
pub fn find_field(text: &str, collection: &str, field: &str) -> Option<String> {
    let marker = select_marker(collection);
    let start = text.find(&marker)? + marker.len();
    read_field(text, start, field).map(|(value, _)| value)
}

/// [`find_field`] for many `(collection, field)` pairs; misses are skipped.
pub fn search_fields(text: &str, pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .filter_map(|(collection, field)| {
            find_field(text, collection, field).map(|value| (field.to_string(), value))
        })
        .collect()
}

pub fn extract_hostname(text: &str) -> String {
    find_field(text, SETTING_COLLECTION, "hostname")
        .unwrap_or_else(|| HOSTNAME_SENTINEL.to_string())
}

pub fn extract_alerts(text: &str) -> AlertSummary {
    let mut summary = AlertSummary::default();

    let marker = select_marker(ALERT_COLLECTION);
    let Some(found) = text.find(&marker) else {
        return summary;
    };

    let mut cursor = found + marker.len();
    while let Some((key, after_key)) = read_field(text, cursor, "key") {
        let Some((time, after_time)) = read_field(text, after_key, "time") else {
            break;
        };

        if summary.alerts.len() < MAX_ALERTS {
            summary.alerts.push(Alert { key, time });
        } else {
            summary.remaining += 1;
        }
        cursor = after_time;
    }

    summary
}

/// Locate `"field"` at or after `from` and read its value. Returns the value
/// and the offset just past it.
fn read_field(text: &str, from: usize, field: &str) -> Option<(String, usize)> {
    let token = format!("\"{field}\"");
    let at = from + text.get(from..)?.find(&token)?;
    let after_token = at + token.len();

    let rest = &text[after_token..];
    let trimmed = rest.trim_start();
    if let Some(after_colon) = trimmed.strip_prefix(':') {
        let value = after_colon.trim_start();
        let value_at = text.len() - value.len();

        if value.starts_with('"') {
            return read_quoted(text, value_at);
        }
        if let Some((scalar, len)) = read_scalar(value) {
            return Some((scalar, value_at + len));
        }
    }

    // fall back to the next quoted string anywhere after the field name
    let quote = after_token + rest.find('"')?;
    read_quoted(text, quote)
}

/// Read the JSON string whose opening quote sits at `at`.
fn read_quoted(text: &str, at: usize) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut chars = text[at + 1..].char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((value, at + 1 + i + 1)),
            '\\' => {
                let (_, escaped) = chars.next()?;
                match escaped {
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    'b' => value.push('\u{08}'),
                    'f' => value.push('\u{0c}'),
                    'u' => {
                        let hex: String = (0..4).filter_map(|_| chars.next().map(|(_, h)| h)).collect();
                        let code = u32::from_str_radix(&hex, 16).ok()?;
                        value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    other => value.push(other),
                }
            }
            c => value.push(c),
        }
    }

    None
}

/// Bare scalars that may follow a field's colon: `NumberLong(n)`,
/// `ISODate("...")`, numbers, `true`, `false`, `null`.
fn read_scalar(value: &str) -> Option<(String, usize)> {
    for (prefix, close) in [("NumberLong(", ")"), ("ISODate(\"", "\")")] {
        if let Some(inner) = value.strip_prefix(prefix) {
            let end = inner.find(close)?;
            return Some((inner[..end].to_string(), prefix.len() + end + close.len()));
        }
    }

    for word in ["true", "false", "null"] {
        if value.starts_with(word) {
            return Some((word.to_string(), word.len()));
        }
    }

    let len = value
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')))
        .unwrap_or(value.len());
    let number = &value[..len];
    if number.parse::<f64>().is_ok() {
        return Some((number.to_string(), len));
    }

    None
}
