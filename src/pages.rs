//! One-file-per-page scraping, for a single URL or a batch from a links file.

use crate::error::{HarvestError, Result};
use crate::extract::DetailExtractor;
use crate::models::last_segment;
use crate::scrapers::PageFetcher;
use crate::store::write_json_atomic;
use crate::throttle::Throttle;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<String>,
}

/// `<out_dir>/<prefix>_<last url segment>.json`, dots in the segment become underscores
pub fn page_output_path(out_dir: &Path, prefix: &str, url: &str) -> PathBuf {
    let name = last_segment(url).unwrap_or("index").replace('.', "_");
    out_dir.join(format!("{}_{}.json", prefix, name))
}

/// Read a JSON array of URLs
pub fn load_links(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
    let links: Vec<String> = serde_json::from_str(&raw).map_err(|e| HarvestError::json(path, e))?;
    Ok(links)
}

pub struct PageScraper<'a> {
    fetcher: &'a dyn PageFetcher,
    extractor: &'a DetailExtractor,
    out_dir: PathBuf,
    prefix: String,
}

impl<'a> PageScraper<'a> {
    pub fn new(
        fetcher: &'a dyn PageFetcher,
        extractor: &'a DetailExtractor,
        out_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            out_dir: out_dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Fetch, extract and save one page
    pub async fn scrape(&self, url: &str) -> Result<PathBuf> {
        info!("Processing URL: {}", url);
        let html = self.fetcher.fetch(url).await?;

        let mut record = self.extractor.extract(&html);
        record.set("url", Value::String(url.to_string()));
        record.set("timestamp", Value::String(Utc::now().to_rfc3339()));
        self.extractor.derive(&mut record);

        let path = page_output_path(&self.out_dir, &self.prefix, url);
        write_json_atomic(&path, &record)?;
        info!("Data saved to {}", path.display());
        Ok(path)
    }

    /// Scrape every URL in turn; a failed page is logged and skipped
    pub async fn scrape_all(&self, urls: &[String], throttle: &Throttle) -> PageSummary {
        let mut summary = PageSummary::default();
        info!("Found {} URLs to process", urls.len());

        for (i, url) in urls.iter().enumerate() {
            if i > 0 {
                throttle.pause().await;
            }
            info!("Processing URL {}/{}", i + 1, urls.len());

            match self.scrape(url).await {
                Ok(path) => {
                    throttle.record_success();
                    summary.written.push(path);
                }
                Err(e) => {
                    error!("Failed to process URL {}: {}", url, e);
                    throttle.record_failure();
                    summary.failed.push(url.clone());
                }
            }
        }

        summary
    }
}
