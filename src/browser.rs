use crate::fetcher::{Backoff, PageFetcher};
use crate::rate_limit::RateLimiter;
use crate::{PageContent, Result, ScraperConfig, ScraperError};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::spawn_blocking;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// Loads pages in a headless Chrome and returns the rendered HTML.
///
/// The browser process is started on first use and shared by every fetch
/// of the run. Dropping the fetcher shuts it down.
pub struct BrowserFetcher {
    browser: OnceCell<Browser>,
    rate_limiter: Arc<RateLimiter>,
    user_agent: String,
    wait_selector: String,
    wait_timeout: Duration,
    max_retries: u32,
    backoff: Backoff,
}

impl BrowserFetcher {
    pub fn new(config: &ScraperConfig, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            browser: OnceCell::new(),
            rate_limiter,
            user_agent: config.user_agent.clone(),
            wait_selector: config.browser.wait_selector.clone(),
            wait_timeout: config.browser.wait_timeout(),
            max_retries: config.retry.max_retries,
            backoff: Backoff::from_policy(&config.retry),
        }
    }

    /// Whether the browser process has been started.
    pub fn is_launched(&self) -> bool {
        self.browser.initialized()
    }

    async fn browser(&self) -> Result<Browser> {
        let browser = self
            .browser
            .get_or_try_init(|| async {
                info!("Launching headless browser");
                spawn_blocking(launch)
                    .await
                    .map_err(|e| ScraperError::BrowserError(e.to_string()))?
            })
            .await?;
        Ok(browser.clone())
    }

    async fn render(&self, browser: Browser, url: &Url) -> Result<String> {
        let url = url.to_string();
        let user_agent = self.user_agent.clone();
        let wait_selector = self.wait_selector.clone();
        let wait_timeout = self.wait_timeout;

        spawn_blocking(move || {
            let tab = browser.new_tab().map_err(browser_error)?;
            tab.set_user_agent(&user_agent, None, None)
                .map_err(browser_error)?;
            tab.navigate_to(&url).map_err(browser_error)?;
            tab.wait_until_navigated().map_err(browser_error)?;

            if let Err(e) = tab.wait_for_element_with_custom_timeout(&wait_selector, wait_timeout) {
                debug!(url = %url, selector = %wait_selector, "Wait condition not met: {}", e);
            }
            let html = tab.get_content().map_err(browser_error)?;

            if let Err(e) = tab.close(true) {
                debug!(url = %url, "Closing tab failed: {}", e);
            }
            Ok(html)
        })
        .await
        .map_err(|e| ScraperError::BrowserError(e.to_string()))?
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &Url) -> Result<PageContent> {
        let browser = self.browser().await?;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.rate_limiter.throttle().await;

            match self.render(browser.clone(), url).await {
                Ok(html) => {
                    info!(url = %url, attempt, backend = "browser", "Fetched page");
                    return Ok(PageContent {
                        url: url.clone(),
                        html,
                        status: 200,
                    });
                }
                Err(e) if attempt > self.max_retries => {
                    warn!(url = %url, attempts = attempt, "Browser retries exhausted: {}", e);
                    return Err(ScraperError::NetworkError {
                        url: url.to_string(),
                        attempts: attempt,
                        status: None,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "Browser fetch failed: {}", e);
                    sleep(delay).await;
                }
            }
        }
    }

    fn backend(&self) -> &'static str {
        "browser"
    }
}

fn launch() -> Result<Browser> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(false)
        .idle_browser_timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| ScraperError::BrowserError(e.to_string()))?;
    Browser::new(options).map_err(browser_error)
}

fn browser_error(e: impl std::fmt::Display) -> ScraperError {
    ScraperError::BrowserError(e.to_string())
}
