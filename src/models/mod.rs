use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One scraped listing.
///
/// Fields accumulate across passes: listing pages contribute the basic card
/// fields, detail pages add images, promotions and the embedded community data.
/// Nothing is required, an absent field just means it has not been collected yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

/// A special offer attached to a listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    #[serde(default)]
    pub promo_title: String,
    #[serde(default)]
    pub promo_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_link: Option<String>,
}

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String value of a field, if it is a string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Natural identifier stored under `id_field`; blank ids count as missing
    pub fn id(&self, id_field: &str) -> Option<&str> {
        self.get_str(id_field)
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// True when the field is present and carries something: not null, not an
    /// empty string, array or object.
    pub fn is_filled(&self, field: &str) -> bool {
        match self.0.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }

    /// Overlay every field of `other` onto this record
    pub fn overlay(&mut self, other: Record) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }

    /// Image URLs listed under `images`, skipping non-string entries
    pub fn images(&self) -> Vec<&str> {
        match self.0.get("images") {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn promotions(&self) -> Vec<Promotion> {
        match self.0.get("promotions") {
            Some(Value::Array(items)) => items
                .iter()
                .filter(|item| item.is_object())
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

/// Render a JSON value as flat text: strings as-is, null as blank, the rest as JSON
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Last non-empty path segment of a URL, used to name per-listing directories and files
pub fn last_segment(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').find(|segment| !segment.is_empty())
}
