use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP client settings shared by page, API and media requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// User agent sent with every request
    pub user_agent: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Extra headers sent with page requests
    pub headers: IndexMap<String, String>,
    /// Extra headers sent with media requests
    pub media_headers: IndexMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            headers: IndexMap::from([(
                "Accept-Language".to_string(),
                "en-US,en;q=0.9".to_string(),
            )]),
            media_headers: IndexMap::from([
                (
                    "Accept".to_string(),
                    "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8".to_string(),
                ),
                ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
                (
                    "Referer".to_string(),
                    "https://www.newhomesource.com/".to_string(),
                ),
                (
                    "Origin".to_string(),
                    "https://www.newhomesource.com".to_string(),
                ),
            ]),
        }
    }
}

/// Headless Chrome settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Seconds to let client-side rendering settle after navigation
    pub settle_secs: u64,
    /// Scroll to the bottom until the page height stops growing
    pub scroll_to_end: bool,
    /// Upper bound on scroll rounds
    pub max_scrolls: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            settle_secs: 8,
            scroll_to_end: true,
            max_scrolls: 20,
        }
    }
}
