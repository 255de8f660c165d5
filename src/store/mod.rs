//! Record storage.
//!
//! The store keeps every record keyed by its natural identifier and rewrites
//! the full set on flush, so the file on disk is always a complete, loadable
//! snapshot and an interrupted run can pick up where it stopped.

mod json_file;

pub use json_file::JsonFileStore;

use crate::error::{HarvestError, Result};
use crate::models::Record;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Keyed record storage
pub trait RecordStore {
    fn get(&self, id: &str) -> Option<&Record>;

    /// Insert or replace the record stored under `id`
    fn upsert(&mut self, id: &str, record: Record) -> Result<()>;

    /// Write pending changes; a no-op when nothing changed
    fn flush(&mut self) -> Result<()>;
}

/// Result of merging a freshly scraped record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First sighting, the record was stored
    Inserted,
    /// Already known, the stored entry was left untouched
    Existing,
    /// No identifier, nothing stored
    Skipped,
}

/// Decides whether a stored record still needs its detail page fetched.
///
/// A record needs an update while any designated detail field is missing,
/// null or empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePredicate {
    detail_fields: Vec<String>,
}

impl UpdatePredicate {
    pub fn new<I, S>(detail_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            detail_fields: detail_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn needs_update(&self, record: &Record) -> bool {
        self.detail_fields.iter().any(|field| !record.is_filled(field))
    }
}

impl Default for UpdatePredicate {
    fn default() -> Self {
        Self::new(["images", "promotions"])
    }
}

/// Serialize `value` as pretty JSON and move it over `path` in one rename
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(value).map_err(|e| HarvestError::json(path, e))?;
    let tmp = temp_path(path);
    fs::write(&tmp, json).map_err(|e| HarvestError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| HarvestError::io(path, e))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read a JSON file holding either an array of records or a single record.
/// Array entries that are not objects are dropped.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let raw = fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| HarvestError::json(path, e))?;

    let records = match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| Record::try_from(item).ok())
            .collect(),
        Value::Object(map) => vec![Record::from(map)],
        _ => Vec::new(),
    };

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_update_predicate_scenario() {
        let predicate = UpdatePredicate::default();
        let mut record = Record::try_from(json!({"link": "A"})).unwrap();
        assert!(predicate.needs_update(&record));

        record.set("images", json!(["x.jpg"]));
        assert!(predicate.needs_update(&record));

        record.set("promotions", json!([{"promo_title": "Save"}]));
        assert!(!predicate.needs_update(&record));
    }

    #[test]
    fn test_write_json_atomic_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");

        write_json_atomic(&path, &json!([{"title": "Café Åby"}])).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("Café Åby"));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_load_records_accepts_single_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.json");
        fs::write(&path, r#"{"link": "https://x/1"}"#).unwrap();

        let records = load_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id("link"), Some("https://x/1"));
    }

    #[test]
    fn test_load_records_reports_malformed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "[{").unwrap();

        assert!(matches!(load_records(&path), Err(HarvestError::Json { .. })));
    }
}
