use super::{load_records, write_json_atomic, MergeOutcome, RecordStore, UpdatePredicate};
use crate::error::Result;
use crate::models::Record;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Record store backed by a pretty-printed JSON array on disk.
///
/// Insertion order is preserved so repeated runs produce stable files.
/// Mutations are counted and written out either on an explicit [`flush`]
/// or automatically every `flush_every` mutations (0 disables that).
///
/// [`flush`]: RecordStore::flush
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    id_field: String,
    records: IndexMap<String, Record>,
    pending: usize,
    flush_every: usize,
}

impl JsonFileStore {
    /// Open the store at `path`, loading previous output if the file exists
    pub fn open(path: impl Into<PathBuf>, id_field: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let id_field = id_field.into();
        let mut records = IndexMap::new();

        if path.exists() {
            info!("Loading existing data from {}", path.display());
            let mut without_id = 0;
            for record in load_records(&path)? {
                match record.id(&id_field) {
                    Some(id) => {
                        records.insert(id.to_string(), record);
                    }
                    None => without_id += 1,
                }
            }
            if without_id > 0 {
                warn!(
                    "Dropped {} records without `{}` from {}",
                    without_id,
                    id_field,
                    path.display()
                );
            }
            info!("Loaded {} existing records", records.len());
        } else {
            debug!("No existing data at {}, starting empty", path.display());
        }

        Ok(Self {
            path,
            id_field,
            records,
            pending: 0,
            flush_every: 0,
        })
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Identifiers in insertion order
    pub fn ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Store a record seen for the first time; known identifiers are left untouched
    pub fn merge(&mut self, record: Record) -> Result<MergeOutcome> {
        let Some(id) = record.id(&self.id_field).map(str::to_string) else {
            return Ok(MergeOutcome::Skipped);
        };

        if self.records.contains_key(&id) {
            debug!("Record already exists: {}", id);
            return Ok(MergeOutcome::Existing);
        }

        debug!("New record found: {}", id);
        self.upsert(&id, record)?;
        Ok(MergeOutcome::Inserted)
    }

    /// Unknown identifiers always need an update
    pub fn needs_update(&self, id: &str, predicate: &UpdatePredicate) -> bool {
        self.records
            .get(id)
            .map_or(true, |record| predicate.needs_update(record))
    }

    /// Overlay detail fields onto a stored record, let `finish` adjust the
    /// merged result, then upsert it. Returns false for unknown ids.
    pub fn apply_detail<F>(&mut self, id: &str, detail: Record, finish: F) -> Result<bool>
    where
        F: FnOnce(&mut Record),
    {
        let Some(existing) = self.records.get(id) else {
            return Ok(false);
        };

        let mut updated = existing.clone();
        updated.overlay(detail);
        finish(&mut updated);
        self.upsert(id, updated)?;
        Ok(true)
    }

    /// Write the whole set regardless of pending changes
    pub fn persist(&mut self) -> Result<()> {
        let snapshot: Vec<&Record> = self.records.values().collect();
        write_json_atomic(&self.path, &snapshot)?;
        self.pending = 0;
        debug!("Saved {} records to {}", snapshot.len(), self.path.display());
        Ok(())
    }
}

impl RecordStore for JsonFileStore {
    fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    fn upsert(&mut self, id: &str, record: Record) -> Result<()> {
        self.records.insert(id.to_string(), record);
        self.pending += 1;

        if self.flush_every > 0 && self.pending >= self.flush_every {
            self.persist()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        self.persist()
    }
}
