use crate::error::{HarvestError, Result};
use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::BrowserConfig;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const ACCEPT_COOKIES_JS: &str = r#"
    const button = document.querySelector('button[id*="accept"], button[id*="onetrust-accept"]');
    if (button) button.click();
"#;

/// Page fetcher for dynamically rendered pages using headless Chrome
pub struct BrowserFetcher {
    browser: Browser,
    config: BrowserConfig,
}

impl BrowserFetcher {
    /// Launch a Chrome instance
    pub fn new(config: BrowserConfig) -> Result<Self> {
        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .build()
            .map_err(|e| HarvestError::Browser(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(options)
            .map_err(|e| HarvestError::Browser(format!("Failed to launch Chrome browser: {}", e)))?;

        Ok(Self { browser, config })
    }

    /// Blocking render of one page, run off the async executor
    fn render(browser: &Browser, config: &BrowserConfig, url: &str) -> Result<String> {
        let tab = browser.new_tab().map_err(browser_error)?;

        tab.navigate_to(url).map_err(browser_error)?;
        tab.wait_until_navigated().map_err(browser_error)?;

        debug!("Waiting {}s for {} to render", config.settle_secs, url);
        thread::sleep(Duration::from_secs(config.settle_secs));

        // Dismiss cookie banners if present
        let _ = tab.evaluate(ACCEPT_COOKIES_JS, false);

        if config.scroll_to_end {
            scroll_to_end(&tab, config.max_scrolls);
        }

        let html_result = tab
            .evaluate("document.documentElement.outerHTML", false)
            .map_err(browser_error)?;
        let html = html_result
            .value
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();

        if let Err(e) = tab.close(true) {
            warn!("Failed to close tab for {}: {}", url, e);
        }

        if html.is_empty() {
            return Err(HarvestError::Browser(format!("Empty page HTML for {}", url)));
        }

        debug!("Rendered {} bytes of HTML", html.len());
        Ok(html)
    }
}

/// Scroll until the document height stops growing so lazy content loads
fn scroll_to_end(tab: &Arc<Tab>, max_scrolls: u32) {
    let height = |tab: &Arc<Tab>| {
        tab.evaluate("document.body.scrollHeight", false)
            .ok()
            .and_then(|r| r.value)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    };

    let mut last_height = height(tab);
    for _ in 0..max_scrolls {
        let _ = tab.evaluate("window.scrollTo(0, document.body.scrollHeight);", false);
        thread::sleep(Duration::from_secs(2));

        let new_height = height(tab);
        if new_height <= last_height {
            break;
        }
        last_height = new_height;
    }
}

fn browser_error(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::Browser(e.to_string())
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        info!("Opening {} in headless Chrome", url);

        let browser = self.browser.clone();
        let config = self.config.clone();
        let url = url.to_string();

        tokio::task::spawn_blocking(move || Self::render(&browser, &config, &url))
            .await
            .map_err(|e| HarvestError::Browser(format!("Render task failed: {}", e)))?
    }

    fn source_name(&self) -> &'static str {
        "headless_chrome"
    }
}
