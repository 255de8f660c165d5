use super::parse_selector;
use crate::error::Result;
use crate::models::Record;
use indexmap::{IndexMap, IndexSet};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Rule for a JSON document embedded in a `<script>` tag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedJsonRule {
    /// Selects the script element holding the JSON
    pub script_selector: String,
    /// Top-level keys copied verbatim when present
    #[serde(default)]
    pub fields: Vec<String>,
    /// New field name -> name of a copied field whose value it mirrors
    #[serde(default)]
    pub aliases: IndexMap<String, String>,
    /// Fixed string fields added to every extracted record
    #[serde(default)]
    pub constants: IndexMap<String, String>,
    /// Key path to image URLs; arrays along the way are walked element by element
    #[serde(default)]
    pub images_path: Vec<String>,
}

#[derive(Debug)]
pub struct CompiledEmbeddedRule {
    selector: Selector,
    rule: EmbeddedJsonRule,
}

impl EmbeddedJsonRule {
    pub fn compile(&self) -> Result<CompiledEmbeddedRule> {
        Ok(CompiledEmbeddedRule {
            selector: parse_selector(&self.script_selector)?,
            rule: self.clone(),
        })
    }
}

impl CompiledEmbeddedRule {
    /// Returns `None` when the script is missing or does not hold valid JSON
    pub fn extract(&self, document: &Html) -> Option<Record> {
        let Some(script) = document.select(&self.selector).next() else {
            warn!("No embedded data found for {}", self.rule.script_selector);
            return None;
        };

        let text = script.text().collect::<String>();
        let data: Value = match serde_json::from_str(text.trim()) {
            Ok(data) => data,
            Err(e) => {
                warn!("Error parsing embedded JSON: {}", e);
                return None;
            }
        };

        Some(self.extract_value(&data))
    }

    pub fn extract_value(&self, data: &Value) -> Record {
        let mut record = Record::new();

        for field in &self.rule.fields {
            if let Some(value) = data.get(field) {
                record.set(field.clone(), value.clone());
            }
        }

        for (alias, source) in &self.rule.aliases {
            if let Some(value) = record.get(source).cloned() {
                record.set(alias.clone(), value);
            }
        }

        for (name, value) in &self.rule.constants {
            record.set(name.clone(), Value::String(value.clone()));
        }

        if !self.rule.images_path.is_empty() {
            let mut urls = IndexSet::new();
            collect_strings(data, &self.rule.images_path, &mut urls);
            record.set(
                "images",
                Value::Array(urls.into_iter().map(Value::String).collect()),
            );
        }

        record
    }
}

fn collect_strings(value: &Value, path: &[String], out: &mut IndexSet<String>) {
    match (value, path.split_first()) {
        (Value::Array(items), _) => {
            for item in items {
                collect_strings(item, path, out);
            }
        }
        (Value::String(s), None) => {
            if !s.is_empty() {
                out.insert(s.clone());
            }
        }
        (Value::Object(map), Some((key, rest))) => {
            if let Some(next) = map.get(key) {
                collect_strings(next, rest, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule() -> EmbeddedJsonRule {
        EmbeddedJsonRule {
            script_selector: "script[data-component='fullImageViewerData']".to_string(),
            fields: vec!["CommunityId".into(), "Price".into(), "Zip".into()],
            aliases: IndexMap::from([("property_price".to_string(), "Price".to_string())]),
            constants: IndexMap::from([("country".to_string(), "US".to_string())]),
            images_path: vec!["Collections".into(), "Elements".into(), "Url".into()],
        }
    }

    #[test]
    fn test_extracts_fields_aliases_and_images() {
        let html = r#"<html><head>
            <script data-component="fullImageViewerData">
            {"CommunityId": 42, "Price": "From $500k", "Other": 1,
             "Collections": [
                {"Elements": [{"Url": "https://img/1/100-a.jpg"}, {"Url": "https://img/1/101-b.jpg"}]},
                {"Elements": [{"Url": "https://img/1/100-a.jpg"}, {"ThumbnailUrl": "t.jpg"}]}
             ]}
            </script></head><body></body></html>"#;
        let compiled = rule().compile().unwrap();
        let record = compiled.extract(&Html::parse_document(html)).unwrap();

        assert_eq!(record.get("CommunityId"), Some(&json!(42)));
        assert_eq!(record.get_str("property_price"), Some("From $500k"));
        assert_eq!(record.get_str("country"), Some("US"));
        assert!(!record.contains("Other"));
        assert!(!record.contains("Zip"));
        assert_eq!(
            record.images(),
            vec!["https://img/1/100-a.jpg", "https://img/1/101-b.jpg"]
        );
    }

    #[test]
    fn test_missing_or_malformed_script() {
        let compiled = rule().compile().unwrap();
        assert!(compiled
            .extract(&Html::parse_document("<html><body></body></html>"))
            .is_none());

        let broken = r#"<script data-component="fullImageViewerData">{not json</script>"#;
        assert!(compiled.extract(&Html::parse_document(broken)).is_none());
    }
}
