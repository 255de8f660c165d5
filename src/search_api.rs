//! Detail-link discovery through a JSON search endpoint.

use crate::config::SearchApiConfig;
use crate::error::{HarvestError, Result};
use crate::scrapers::{build_client, HttpConfig};
use crate::store::write_json_atomic;
use indexmap::IndexSet;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Follow a dot-separated key path through nested objects
fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|key| !key.is_empty())
        .try_fold(value, |current, key| current.get(key))
}

/// Pull unique links out of a search response, keeping first-seen order
pub fn extract_links(response: &Value, config: &SearchApiConfig) -> Vec<String> {
    let Some(results) = response.get("results").and_then(Value::as_array) else {
        warn!("Search response has no results array");
        return Vec::new();
    };

    let mut links = IndexSet::new();
    for result in results {
        let Some(link) = value_at(result, &config.link_path).and_then(Value::as_str) else {
            continue;
        };
        if link.is_empty() {
            continue;
        }
        let full = if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}{}", config.link_prefix.trim_end_matches('/'), link)
        };
        debug!("Found link: {}", full);
        links.insert(full);
    }

    links.into_iter().collect()
}

async fn query(config: &SearchApiConfig, http: &HttpConfig) -> Result<Value> {
    let client = build_client(http, &config.headers)?;
    let response = client
        .post(&config.endpoint)
        .json(&config.payload)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(HarvestError::Status {
            url: config.endpoint.clone(),
            status: response.status().as_u16(),
        });
    }

    Ok(response.json::<Value>().await?)
}

/// Query the endpoint and collect links. Request or decode failures are
/// logged and yield an empty list.
pub async fn fetch_links(config: &SearchApiConfig, http: &HttpConfig) -> Vec<String> {
    match query(config, http).await {
        Ok(response) => extract_links(&response, config),
        Err(e) => {
            error!("Search API request failed: {}", e);
            Vec::new()
        }
    }
}

/// Fetch links and save them as a JSON array
pub async fn collect_links(
    config: &SearchApiConfig,
    http: &HttpConfig,
    output: &Path,
) -> Result<Vec<String>> {
    let links = fetch_links(config, http).await;
    write_json_atomic(output, &links)?;
    info!("Saved {} links to {}", links.len(), output.display());
    Ok(links)
}
