//! Media download pass.
//!
//! Collects the image URLs referenced by stored records, fetches each unique
//! URL at most once, and records where it landed. URLs already in the
//! mapping or already on disk are never requested again.

mod mapping;
mod naming;

pub use mapping::{MediaMapping, MAPPING_HEADER};
pub use naming::{file_extension, hashed_file_name, listing_dir_name, media_file_name, media_path};

use crate::config::MediaConfig;
use crate::error::{HarvestError, Result};
use crate::models::Record;
use crate::scrapers::{build_client, HttpConfig};
use crate::store::{load_records, write_json_atomic};
use async_trait::async_trait;
use chrono::{Datelike, Local};
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where media bytes come from
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpMediaSource {
    client: Client,
}

impl HttpMediaSource {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config, &config.media_headers)?,
        })
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(HarvestError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Outcome of a media pass
#[derive(Debug, Default)]
pub struct MediaReport {
    pub unique_urls: usize,
    pub downloaded: usize,
    pub already_mapped: usize,
    pub already_on_disk: usize,
    pub failed: Vec<String>,
    /// Resolved local path of every URL that is now available
    pub paths: HashMap<String, PathBuf>,
}

/// A unique URL together with the first record that referenced it
#[derive(Debug, Clone)]
struct MediaJob {
    url: String,
    path: PathBuf,
    owner: Record,
}

pub struct MediaFetcher<S> {
    source: S,
    dest: PathBuf,
    concurrency: usize,
    extensions: Vec<String>,
    id_field: String,
}

impl<S: MediaSource> MediaFetcher<S> {
    pub fn new(source: S, dest: impl Into<PathBuf>, config: &MediaConfig, id_field: &str) -> Self {
        Self {
            source,
            dest: dest.into(),
            concurrency: config.concurrency.max(1),
            extensions: config.extensions.clone(),
            id_field: id_field.to_string(),
        }
    }

    /// Unique, downloadable URLs in first-seen order.
    ///
    /// Every URL gets a path no other URL uses. Paths already claimed in the
    /// mapping count as taken, and a short name that collides falls back to
    /// the hashed name.
    fn plan(&self, records: &[Record], mapping: &MediaMapping) -> Vec<MediaJob> {
        let mut jobs: IndexMap<String, MediaJob> = IndexMap::new();
        let mut claimed: HashMap<PathBuf, String> = mapping
            .entries()
            .map(|(url, path)| (path.to_path_buf(), url.to_string()))
            .collect();

        for record in records {
            let listing_dir = listing_dir_name(record, &self.id_field);
            for url in record.images() {
                if !is_media_url(url, &self.extensions) || jobs.contains_key(url) {
                    continue;
                }

                let path = match mapping.get(url) {
                    Some(existing) => existing.to_path_buf(),
                    None => {
                        let short = media_path(&self.dest, &listing_dir, url);
                        match claimed.get(&short) {
                            Some(owner) if owner != url => {
                                debug!("{} is taken by {}, using hashed name", short.display(), owner);
                                self.dest.join(&listing_dir).join(hashed_file_name(url))
                            }
                            _ => short,
                        }
                    }
                };
                claimed.insert(path.clone(), url.to_string());

                jobs.insert(
                    url.to_string(),
                    MediaJob {
                        url: url.to_string(),
                        path,
                        owner: record.clone(),
                    },
                );
            }
        }

        jobs.into_values().collect()
    }

    pub async fn fetch_all(
        &self,
        records: &[Record],
        mapping: &mut MediaMapping,
    ) -> Result<MediaReport> {
        let jobs = self.plan(records, mapping);
        let mut report = MediaReport {
            unique_urls: jobs.len(),
            ..Default::default()
        };
        info!("Found {} unique media files", jobs.len());

        let mut pending = Vec::new();
        for job in jobs {
            if let Some(existing) = mapping.get(&job.url) {
                debug!("Skip already downloaded: {}", job.url);
                report.paths.insert(job.url.clone(), existing.to_path_buf());
                report.already_mapped += 1;
            } else if job.path.exists() {
                debug!("File already exists: {}", job.path.display());
                mapping.record(&job.url, &job.path, &job.owner)?;
                report.paths.insert(job.url.clone(), job.path.clone());
                report.already_on_disk += 1;
            } else {
                pending.push(job);
            }
        }

        let source = &self.source;
        let mut downloads = stream::iter(pending)
            .map(move |job| async move {
                let result = download(source, &job).await;
                (job, result)
            })
            .buffer_unordered(self.concurrency);

        // Single writer: mapping rows are appended as downloads complete
        while let Some((job, result)) = downloads.next().await {
            match result {
                Ok(()) => {
                    info!("Successfully downloaded: {}", job.path.display());
                    mapping.record(&job.url, &job.path, &job.owner)?;
                    report.paths.insert(job.url, job.path);
                    report.downloaded += 1;
                }
                Err(e) => {
                    warn!("Failed to download {}: {}", job.url, e);
                    report.failed.push(job.url);
                }
            }
        }

        Ok(report)
    }
}

async fn download<S: MediaSource>(source: &S, job: &MediaJob) -> Result<()> {
    let bytes = source.fetch(&job.url).await?;
    if let Some(parent) = job.path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| HarvestError::io(parent, e))?;
    }
    tokio::fs::write(&job.path, bytes)
        .await
        .map_err(|e| HarvestError::io(&job.path, e))
}

fn is_media_url(url: &str, extensions: &[String]) -> bool {
    if url.trim().is_empty() {
        return false;
    }
    let lower = url.to_lowercase();
    extensions.iter().any(|ext| lower.contains(&ext.to_lowercase()))
}

/// Store the resolved local paths of each record's images under `local_image_paths`
pub fn attach_local_paths(records: &mut [Record], report: &MediaReport, extensions: &[String]) {
    for record in records.iter_mut() {
        if !matches!(record.get("images"), Some(Value::Array(_))) {
            continue;
        }
        let local: Vec<Value> = record
            .images()
            .into_iter()
            .filter(|url| is_media_url(url, extensions))
            .filter_map(|url| report.paths.get(url))
            .map(|path| Value::String(path.to_string_lossy().into_owned()))
            .collect();
        record.set("local_image_paths", Value::Array(local));
    }
}

/// `<records dir>/photo/<YYYY>/<MM>`
pub fn default_media_dir(records_path: &Path) -> PathBuf {
    let now = Local::now();
    records_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join("photo")
        .join(now.year().to_string())
        .join(format!("{:02}", now.month()))
}

/// Run the whole media pass for a records file: download, write the mapping
/// and failure list, and save the records back with their local paths
pub async fn harvest_media<S: MediaSource>(
    records_path: &Path,
    dest: &Path,
    config: &MediaConfig,
    id_field: &str,
    source: S,
) -> Result<MediaReport> {
    let mut records = load_records(records_path)?;
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| HarvestError::io(dest, e))?;

    let mut mapping = MediaMapping::load(dest.join(&config.mapping_file));
    let previously_mapped = mapping.len();

    let fetcher = MediaFetcher::new(source, dest, config, id_field);
    let report = fetcher.fetch_all(&records, &mut mapping).await?;

    attach_local_paths(&mut records, &report, &config.extensions);
    write_json_atomic(records_path, &records)?;

    if !report.failed.is_empty() {
        let failed_path = dest.join(&config.failed_file);
        let mut contents = report.failed.join("\n");
        contents.push('\n');
        tokio::fs::write(&failed_path, contents)
            .await
            .map_err(|e| HarvestError::io(&failed_path, e))?;
        warn!(
            "{} downloads failed, URLs saved to {}",
            report.failed.len(),
            failed_path.display()
        );
    }

    info!(
        unique = report.unique_urls,
        downloaded = report.downloaded,
        on_disk = report.already_on_disk,
        mapped = report.already_mapped,
        previously_mapped,
        "Media download complete, mapping saved to {}",
        mapping.path().display()
    );
    Ok(report)
}
