//! AutoDiscovery.
//!
//! A pure, stateless function classifying a `(field_name, value)` pair from a
//! CDC row into a semantic [`FieldKind`]. Regexes are compiled once into
//! process-wide statics via `OnceLock`, the teacher's pattern for avoiding
//! per-call compilation of fixed patterns.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Status,
    Timestamp,
    Id,
    Text,
    Boolean,
    Unknown,
}

/// Lowercased tokens recognized as status values regardless of field name —
/// Third classification rule.
const STATUS_TOKENS: &[&str] = &[
    "pending", "active", "completed", "cancelled", "canceled", "failed", "open", "closed",
    "high", "medium", "low", "critical", "success", "error", "warning", "info", "inactive",
    "enabled", "disabled", "suspended", "archived", "draft", "published", "approved",
    "rejected",
];

struct Patterns {
    numeric: Regex,
    status: Regex,
    timestamp: Regex,
    id: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // Commerce / statistics suffixes and prefixes.
        numeric: Regex::new(
            r"(?i)(_amount|_total|_price|_cost|_qty|_quantity|_count|_sum|_avg|_rate|_pct|_percent|_score|_balance|_fee|^num_|^total_|^avg_|^count_|^sum_)",
        )
        .expect("static regex"),
        // status|state|type|kind suffix/prefix family.
        status: Regex::new(
            r"(?i)(^status$|^state$|^type$|^kind$|_status$|_state$|_type$|_kind$|^is_|^has_|^can_)",
        )
        .expect("static regex"),
        // _at / _date suffixes plus canonical names.
        timestamp: Regex::new(
            r"(?i)(_at$|_date$|_time$|^timestamp$|^created_at$|^updated_at$|^deleted_at$)",
        )
        .expect("static regex"),
        // id/uuid/guid family.
        id: Regex::new(r"(?i)(^id$|^uuid$|^guid$|_id$|_uuid$|_guid$)").expect("static regex"),
    })
}

/// Classify a `(field_name, value)` pair in precedence order.
pub fn classify(field_name: &str, value: &Value) -> FieldKind {
    match value {
        // Rule 1: booleans first, regardless of field name.
        Value::Bool(_) => FieldKind::Boolean,

        // Rule 2: numeric values — `id` if the field name matches id patterns,
        // else `numeric`.
        Value::Number(_) => {
            if patterns().id.is_match(field_name) {
                FieldKind::Id
            } else {
                FieldKind::Numeric
            }
        }

        // Rule 3: strings.
        Value::String(s) => {
            if STATUS_TOKENS.contains(&s.to_ascii_lowercase().as_str()) {
                FieldKind::Status
            } else if patterns().status.is_match(field_name) {
                FieldKind::Status
            } else if patterns().timestamp.is_match(field_name) {
                FieldKind::Timestamp
            } else if patterns().id.is_match(field_name) {
                FieldKind::Id
            } else {
                FieldKind::Text
            }
        }

        // Rule 4: null/absent — classify by field name alone.
        Value::Null => classify_by_name(field_name),
        Value::Array(_) | Value::Object(_) => FieldKind::Unknown,
    }
}

fn classify_by_name(field_name: &str) -> FieldKind {
    let p = patterns();
    if p.status.is_match(field_name) {
        FieldKind::Status
    } else if p.timestamp.is_match(field_name) {
        FieldKind::Timestamp
    } else if p.id.is_match(field_name) {
        FieldKind::Id
    } else {
        FieldKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boolean_always_wins() {
        assert_eq!(classify("is_active", &json!(true)), FieldKind::Boolean);
        assert_eq!(classify("total_amount", &json!(false)), FieldKind::Boolean);
    }

    #[test]
    fn numeric_id_field_name() {
        assert_eq!(classify("user_id", &json!(42)), FieldKind::Id);
        assert_eq!(classify("id", &json!(1)), FieldKind::Id);
    }

    #[test]
    fn numeric_otherwise() {
        assert_eq!(classify("total_amount", &json!(99.5)), FieldKind::Numeric);
        assert_eq!(classify("quantity", &json!(3)), FieldKind::Numeric);
    }

    #[test]
    fn string_status_token_wins_over_field_name() {
        assert_eq!(classify("description", &json!("pending")), FieldKind::Status);
    }

    #[test]
    fn string_status_field_name() {
        assert_eq!(classify("order_status", &json!("shipped")), FieldKind::Status);
        assert_eq!(classify("is_verified", &json!("yes")), FieldKind::Status);
    }

    #[test]
    fn string_timestamp_field_name() {
        assert_eq!(classify("created_at", &json!("2024-01-01")), FieldKind::Timestamp);
    }

    #[test]
    fn string_id_field_name() {
        assert_eq!(classify("customer_id", &json!("abc-123")), FieldKind::Id);
    }

    #[test]
    fn string_text_fallback() {
        assert_eq!(classify("notes", &json!("hello world")), FieldKind::Text);
    }

    #[test]
    fn null_classified_by_name_only() {
        assert_eq!(classify("order_status", &json!(null)), FieldKind::Status);
        assert_eq!(classify("completed_at", &json!(null)), FieldKind::Timestamp);
        assert_eq!(classify("order_id", &json!(null)), FieldKind::Id);
        assert_eq!(classify("notes", &json!(null)), FieldKind::Unknown);
    }

    #[test]
    fn composite_values_are_unknown() {
        assert_eq!(classify("payload", &json!({"a": 1})), FieldKind::Unknown);
        assert_eq!(classify("tags", &json!([1, 2])), FieldKind::Unknown);
    }

    #[test]
    fn classification_is_pure() {
        let v = json!("active");
        let a = classify("status", &v);
        let b = classify("status", &v);
        assert_eq!(a, b);
    }
}
