use crate::error::Result;
use async_trait::async_trait;

/// Common trait for anything that can turn a page URL into HTML.
/// Lets the harvester run against plain HTTP, headless Chrome, or a test double.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the page and return its HTML
    async fn fetch(&self, url: &str) -> Result<String>;

    /// Get the name of the fetcher backend
    fn source_name(&self) -> &'static str;
}
