use crate::error::{HarvestError, Result};
use crate::models::{value_text, Record};
use chrono::Local;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const MAPPING_HEADER: [&str; 14] = [
    "Download Time",
    "Original URL",
    "Local Path",
    "Community ID",
    "Community Name",
    "Builder ID",
    "Market ID",
    "Market Name",
    "State",
    "City",
    "Address",
    "Price",
    "Details",
    "Builder",
];

/// Listing fields copied into each mapping row, in header order after the path
const METADATA_FIELDS: [&str; 11] = [
    "CommunityId",
    "CommunityName",
    "BuilderId",
    "MarketId",
    "MarketName",
    "StateAbbr",
    "City",
    "address",
    "price",
    "details",
    "builder",
];

/// Append-only TSV table of downloaded media: URL -> local path plus listing metadata
#[derive(Debug)]
pub struct MediaMapping {
    path: PathBuf,
    entries: HashMap<String, PathBuf>,
}

impl MediaMapping {
    /// Load previous downloads. A missing file is an empty mapping; an
    /// unreadable one is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries = HashMap::new();

        if path.exists() {
            match read_entries(&path) {
                Ok(loaded) => {
                    entries = loaded;
                    info!("Found {} previously downloaded files", entries.len());
                }
                Err(e) => error!("Error loading existing downloads: {}", e),
            }
        }

        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, url: &str) -> Option<&Path> {
        self.entries.get(url).map(PathBuf::as_path)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// Every mapped `(url, local path)` pair
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries
            .iter()
            .map(|(url, path)| (url.as_str(), path.as_path()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map `url` to `local` and append a row describing it
    pub fn record(&mut self, url: &str, local: &Path, owner: &Record) -> Result<()> {
        let is_new_file = std::fs::metadata(&self.path).map_or(true, |m| m.len() == 0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| HarvestError::io(&self.path, e))?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(file);

        if is_new_file {
            writer.write_record(MAPPING_HEADER)?;
        }

        let mut row = vec![
            Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            escape_field(url),
            escape_field(&local.to_string_lossy()),
        ];
        row.extend(
            METADATA_FIELDS
                .iter()
                .map(|field| escape_field(&owner.get(field).map(value_text).unwrap_or_default())),
        );
        writer.write_record(&row)?;
        writer.flush().map_err(|e| HarvestError::io(&self.path, e))?;

        self.entries.insert(url.to_string(), local.to_path_buf());
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<HashMap<String, PathBuf>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut entries = HashMap::new();
    for row in reader.records() {
        let row = row?;
        if row.len() >= 3 {
            entries.insert(row[1].to_string(), PathBuf::from(&row[2]));
        }
    }
    Ok(entries)
}

/// Tabs and line breaks would split rows, flatten them to spaces
fn escape_field(field: &str) -> String {
    field.replace(['\t', '\n', '\r'], " ")
}
