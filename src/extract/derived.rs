use crate::models::{value_text, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A field built by joining other fields of the same record.
///
/// A part is either a field name or `array[].key`, which expands to the
/// non-empty `key` values of every object in `array`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedField {
    pub name: String,
    pub parts: Vec<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    " ".to_string()
}

impl DerivedField {
    pub fn new(name: &str, parts: &[&str], separator: &str) -> Self {
        Self {
            name: name.to_string(),
            parts: parts.iter().map(|p| p.to_string()).collect(),
            separator: separator.to_string(),
        }
    }

    /// Set the derived value. An existing value is kept when every part is empty.
    pub fn apply(&self, record: &mut Record) {
        let pieces: Vec<String> = self
            .parts
            .iter()
            .flat_map(|part| part_values(record, part))
            .filter(|piece| !piece.is_empty())
            .collect();

        if pieces.is_empty() && record.is_filled(&self.name) {
            return;
        }

        record.set(self.name.clone(), Value::String(pieces.join(&self.separator)));
    }
}

fn part_values(record: &Record, part: &str) -> Vec<String> {
    match part.split_once("[].") {
        Some((array, key)) => match record.get(array) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.get(key))
                .map(|v| value_text(v).trim().to_string())
                .collect(),
            _ => Vec::new(),
        },
        None => record
            .get(part)
            .map(|v| vec![value_text(v).trim().to_string()])
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_joins_fields_skipping_blanks() {
        let mut record =
            Record::try_from(json!({"address": "964 Myers Point Drive", "address2": ""})).unwrap();
        DerivedField::new("title", &["address", "address2"], " ").apply(&mut record);
        assert_eq!(record.get_str("title"), Some("964 Myers Point Drive"));
    }

    #[test]
    fn test_expands_array_parts() {
        let mut record = Record::try_from(json!({
            "builder": "M/I Homes",
            "promotions": [
                {"promo_title": "Built for You"},
                {"promo_title": ""},
                {"promo_title": "Second Promo"}
            ]
        }))
        .unwrap();
        DerivedField::new("content", &["promotions[].promo_title", "builder"], " ")
            .apply(&mut record);
        assert_eq!(
            record.get_str("content"),
            Some("Built for You Second Promo M/I Homes")
        );
    }

    #[test]
    fn test_non_string_parts_use_json_text() {
        let mut record = Record::try_from(json!({"Latitude": 35.7, "Longitude": -78.8})).unwrap();
        DerivedField::new("location", &["Latitude", "Longitude"], ",").apply(&mut record);
        assert_eq!(record.get_str("location"), Some("35.7,-78.8"));
    }

    #[test]
    fn test_keeps_existing_value_when_parts_missing() {
        let mut record = Record::try_from(json!({"title": "Kept"})).unwrap();
        DerivedField::new("title", &["address"], " ").apply(&mut record);
        assert_eq!(record.get_str("title"), Some("Kept"));
    }
}
