//! # Opaque Documents
//!
//! The sync layer treats every record as an opaque JSON object. Only two
//! fields are ever interpreted:
//!
//! - `id` - the server identity (string or number, compared as a string)
//! - `updatedAt` - last modification time (epoch milliseconds or RFC 3339)

use chrono::DateTime;
use serde_json::Value;

/// A synchronized record.
pub type Document = Value;

/// Field carrying a document's server identity.
pub const ID_FIELD: &str = "id";

/// Field carrying a document's modification time.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Returns the document's `id` as a string, if present.
///
/// Numeric ids are rendered in their JSON form so `5` and `"5"` address the
/// same entity.
pub fn doc_id(doc: &Value) -> Option<String> {
    match doc.get(ID_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Sets the document's `id`. No-op for non-object documents.
pub fn set_doc_id(doc: &mut Value, id: &str) {
    if let Value::Object(map) = doc {
        map.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    }
}

/// Returns `updatedAt` in epoch milliseconds.
pub fn updated_at_millis(doc: &Value) -> Option<i64> {
    match doc.get(UPDATED_AT_FIELD)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_doc_id_accepts_strings_and_numbers() {
        assert_eq!(doc_id(&json!({"id": "bk-1"})), Some("bk-1".to_string()));
        assert_eq!(doc_id(&json!({"id": 5})), Some("5".to_string()));
        assert_eq!(doc_id(&json!({"id": ""})), None);
        assert_eq!(doc_id(&json!({"id": null})), None);
        assert_eq!(doc_id(&json!({"name": "bay 3"})), None);
    }

    #[test]
    fn test_updated_at_formats() {
        assert_eq!(updated_at_millis(&json!({"updatedAt": 1700000000000_i64})), Some(1700000000000));
        assert_eq!(
            updated_at_millis(&json!({"updatedAt": "1970-01-01T00:00:01Z"})),
            Some(1000)
        );
        assert_eq!(updated_at_millis(&json!({"updatedAt": "yesterday"})), None);
        assert_eq!(updated_at_millis(&json!({})), None);
    }

    #[test]
    fn test_set_doc_id() {
        let mut doc = json!({"name": "Lane 2"});
        set_doc_id(&mut doc, "srv-9");
        assert_eq!(doc_id(&doc), Some("srv-9".to_string()));
    }
}
