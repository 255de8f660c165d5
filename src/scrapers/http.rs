use crate::error::{HarvestError, Result};
use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::HttpConfig;
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Build a reqwest client with the configured user agent, timeout and headers
pub fn build_client(config: &HttpConfig, headers: &IndexMap<String, String>) -> Result<Client> {
    let mut default_headers = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HarvestError::Config(format!("invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HarvestError::Config(format!("invalid header value for {}: {}", name, e)))?;
        default_headers.insert(name, value);
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str())
        .default_headers(default_headers)
        .build()?;

    Ok(client)
}

/// Plain HTTP page fetcher for statically rendered pages
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config, &config.headers)?,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!("Fetching URL: {}", url);

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            warn!("{} returned status: {}", url, response.status());
            return Err(HarvestError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let html = response.text().await?;
        debug!("Downloaded {} bytes of HTML", html.len());
        Ok(html)
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}
