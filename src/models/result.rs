use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result body exactly as the service returned it.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RawPayload {
    pub fn new(content_type: Option<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type,
            body: body.into(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
    }

    /// File extension used when persisting the payload.
    pub fn extension(&self) -> &'static str {
        if self.is_json() { "json" } else { "csv" }
    }
}

/// One result row keyed by whatever column names the service used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawResultRow(Map<String, Value>);

impl RawResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.0.insert(column.into(), value);
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value.into());
        self
    }

    /// Text form of a cell, or `None` when the cell is absent, null, or blank.
    /// Nested values are never treated as a usable scalar.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.0.get(column)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// First candidate column that carries a usable value.
    pub fn first_text(&self, candidates: &[&str]) -> Option<String> {
        candidates.iter().find_map(|column| self.text(column))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for RawResultRow {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_text_skips_blank_and_null_cells() {
        let row = RawResultRow::new()
            .with("Buybox Price", "  ")
            .with("Buybox Price New", Value::Null)
            .with("Lowest Price New FBA", 12.5);
        assert_eq!(
            row.first_text(&["Buybox Price", "Buybox Price New", "Lowest Price New FBA"]),
            Some("12.5".to_string())
        );
        assert_eq!(row.first_text(&["Missing"]), None);
    }

    #[test]
    fn nested_values_are_not_scalars() {
        let row = RawResultRow::new().with("Weight", json!({"value": 1}));
        assert_eq!(row.text("Weight"), None);
    }

    #[test]
    fn payload_kind_follows_content_type() {
        let json = RawPayload::new(Some("application/json; charset=utf-8".into()), "[]");
        let csv = RawPayload::new(Some("text/csv".into()), "a\n");
        assert_eq!(json.extension(), "json");
        assert_eq!(csv.extension(), "csv");
        assert!(!RawPayload::new(None, "").is_json());
    }
}
