//! Parsed API response documents.
//!
//! The provider nests most resources as lists of single-key fragments
//! (`[{"team_key": ..}, {"name": ..}]`) and collapses collections into
//! `{"0": {..}, "1": {..}, "count": 2}` maps, or into a bare object when there
//! is only one element. `Document` hides that shape: [`Document::field`] looks
//! through fragment lists and numbered entries, and [`Document::items`] is the
//! explicit coerce-to-array step. Endpoint parsers in [`crate::parse`] are the
//! only consumers; nothing past them sees untyped JSON.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    value: Value,
}

impl Document {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Parse a response body.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body).map(Self::new)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// The `fantasy_content` envelope, or the document itself when absent.
    pub fn content(&self) -> Document {
        self.field("fantasy_content").unwrap_or_else(|| self.clone())
    }

    /// Look up `key`, searching fragment lists and numbered entries.
    pub fn field(&self, key: &str) -> Option<Document> {
        find(&self.value, key).map(|v| Document::new(v.clone()))
    }

    /// Coerce the collection under `key` into a list of elements.
    pub fn items(&self, key: &str) -> Vec<Document> {
        match find(&self.value, key) {
            Some(v) => coerce_list(v).into_iter().map(|v| Document::new(v.clone())).collect(),
            None => Vec::new(),
        }
    }

    /// Coerce this document itself into a list of elements.
    pub fn as_list(&self) -> Vec<Document> {
        coerce_list(&self.value)
            .into_iter()
            .map(|v| Document::new(v.clone()))
            .collect()
    }

    pub fn str(&self, key: &str) -> Option<String> {
        self.field(key).and_then(|d| d.as_string())
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.field(key).and_then(|d| d.as_i64())
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.field(key).and_then(|d| d.as_f64())
    }

    /// Provider flags arrive as `1`, `"1"`, `true` or are simply absent.
    pub fn flag(&self, key: &str) -> bool {
        self.field(key).map(|d| d.as_flag()).unwrap_or(false)
    }

    pub fn as_string(&self) -> Option<String> {
        match &self.value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64().map(|v| v != 0).unwrap_or(false),
            Value::String(s) => matches!(s.trim(), "1" | "true" | "yes"),
            _ => false,
        }
    }
}

fn is_index_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

fn find<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(key) {
                return Some(v);
            }
            map.iter()
                .filter(|(k, _)| is_index_key(k))
                .find_map(|(_, v)| find(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find(v, key)),
        _ => None,
    }
}

fn coerce_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) if map.keys().any(|k| is_index_key(k)) => {
            let mut indexed: Vec<(u64, &Value)> = map
                .iter()
                .filter_map(|(k, v)| k.parse::<u64>().ok().map(|i| (i, v)))
                .collect();
            indexed.sort_by_key(|(i, _)| *i);
            indexed.into_iter().map(|(_, v)| v).collect()
        }
        Value::Object(map) if map.is_empty() => Vec::new(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_sees_through_fragment_lists() {
        let doc = Document::new(json!({
            "fantasy_content": {
                "league": [
                    { "league_key": "423.l.77" },
                    { "name": "Sunday League" },
                    { "season": 2023 }
                ]
            }
        }));
        let league = doc.content().field("league").unwrap();
        assert_eq!(league.str("league_key").as_deref(), Some("423.l.77"));
        assert_eq!(league.str("season").as_deref(), Some("2023"));
    }

    #[test]
    fn items_coerces_numbered_maps_in_index_order() {
        let doc = Document::new(json!({
            "teams": { "1": { "team": "b" }, "0": { "team": "a" }, "count": 2 }
        }));
        let names: Vec<_> = doc
            .items("teams")
            .iter()
            .filter_map(|t| t.str("team"))
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn items_wraps_a_lone_object() {
        let doc = Document::new(json!({ "matchups": { "matchup": { "week": "3" } } }));
        let items = doc.items("matchups");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].field("matchup").and_then(|m| m.i64("week")), Some(3));
    }

    #[test]
    fn missing_or_empty_collections_are_empty() {
        let doc = Document::new(json!({ "draft_results": [], "transactions": {} }));
        assert!(doc.items("draft_results").is_empty());
        assert!(doc.items("transactions").is_empty());
        assert!(doc.items("players").is_empty());
    }

    #[test]
    fn scalars_coerce_from_strings() {
        let doc = Document::new(json!({ "total": "101.25", "week": "4", "is_tied": "1", "x": 0 }));
        assert_eq!(doc.f64("total"), Some(101.25));
        assert_eq!(doc.i64("week"), Some(4));
        assert!(doc.flag("is_tied"));
        assert!(!doc.flag("x"));
        assert!(!doc.flag("absent"));
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(Document::parse("<fantasy_content/>").is_err());
    }
}
