use crate::{Result, ScraperError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// The `ScraperConfig` struct holds the configuration settings for a crawl run.
/// It covers the target site, fetch behaviour (timeouts, retries, pacing), the
/// browser fallback, and where the CSV ends up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// The site root, e.g. `https://www.example.com`.
    pub base_url: String,
    /// The path of the page whose navigation lists the categories.
    pub root_path: String,
    /// Categories to walk when navigation parsing finds none.
    pub fallback_categories: Vec<FallbackCategory>,
    /// The per-request timeout, in seconds.
    pub timeout_secs: u64,
    /// The user agent string to be used in HTTP requests.
    pub user_agent: String,
    /// Retry and backoff settings for failed fetches.
    pub retry: RetryPolicy,
    /// The delay range applied before every fetch attempt.
    pub rate_limit: RateLimit,
    /// The pagination safety cap per category.
    pub max_pages: u32,
    /// Stop after this many unique records.
    pub limit: Option<usize>,
    /// Where the CSV is written. `None` picks a timestamped name.
    pub output_path: Option<String>,
    /// Whether each product's detail page is fetched to enrich the record.
    pub fetch_details: bool,
    /// The brand used when neither listing nor detail page names one.
    pub default_brand: String,
    /// Headless browser backend settings.
    pub browser: BrowserConfig,
}

/// A category to walk when the root navigation yields nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackCategory {
    pub name: String,
    pub url: String,
}

/// The `RetryPolicy` struct controls how failed fetches are retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `3` means at most four requests.
    pub max_retries: u32,
    /// The delay before the first retry, in milliseconds.
    pub base_backoff_ms: u64,
    /// The ceiling for any single backoff, in milliseconds.
    pub max_backoff_ms: u64,
}

/// The `RateLimit` struct holds the pause range inserted before each request.
/// A pseudo-random delay in `[min_delay_ms, max_delay_ms]` is drawn every time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// The `BrowserConfig` struct holds the settings for the headless browser backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Re-fetch a listing page in the browser when the static HTML has too few product cards.
    pub enabled_fallback: bool,
    /// Fewer product cards than this on a static listing page triggers the fallback.
    pub min_product_nodes: usize,
    /// A CSS selector the rendered page must contain before its HTML is taken.
    pub wait_selector: String,
    /// How long to wait for `wait_selector`, in seconds.
    pub wait_timeout_secs: u64,
}

impl Default for ScraperConfig {
    /// Provides default values for the `ScraperConfig` struct.
    ///
    /// # Returns
    ///
    /// A `ScraperConfig` instance with default settings.
    fn default() -> Self {
        Self {
            base_url: String::from("https://www.hyperpure.com"),
            root_path: String::from("/in/Menu-Addons"),
            fallback_categories: Vec::new(),
            timeout_secs: crate::DEFAULT_TIMEOUT.as_secs(),
            user_agent: String::from(crate::DEFAULT_USER_AGENT),
            retry: RetryPolicy::default(),
            rate_limit: RateLimit::default(),
            max_pages: crate::DEFAULT_MAX_PAGES,
            limit: None,
            output_path: None,
            fetch_details: true,
            default_brand: String::from("Hyperpure"),
            browser: BrowserConfig::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::DEFAULT_MAX_RETRIES,
            base_backoff_ms: crate::DEFAULT_BASE_BACKOFF.as_millis() as u64,
            max_backoff_ms: crate::DEFAULT_MAX_BACKOFF.as_millis() as u64,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 3_000,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled_fallback: false,
            min_product_nodes: 1,
            wait_selector: String::from("body"),
            wait_timeout_secs: 10,
        }
    }
}

impl ScraperConfig {
    /// Loads configuration from an optional file, layered under `SHELFWALK__*`
    /// environment variables.
    ///
    /// A missing file is not an error; an unreadable or malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        builder = match path {
            Some(path) => builder.add_source(::config::File::from(path).required(true)),
            None => builder.add_source(::config::File::with_name("shelfwalk").required(false)),
        };

        let config: ScraperConfig = builder
            .add_source(
                ::config::Environment::with_prefix("SHELFWALK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Rejects configurations a run cannot start with.
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url()?;
        if base.cannot_be_a_base() {
            return Err(ScraperError::FatalSetup(format!(
                "base_url `{}` cannot be used as a base for relative links",
                self.base_url
            )));
        }
        if self.max_pages == 0 {
            return Err(ScraperError::FatalSetup("max_pages must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ScraperError::FatalSetup("timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// The parsed site root.
    pub fn base_url(&self) -> Result<Url> {
        if self.base_url.trim().is_empty() {
            return Err(ScraperError::FatalSetup("base_url is not configured".into()));
        }
        Url::parse(&self.base_url)
            .map_err(|e| ScraperError::FatalSetup(format!("invalid base_url `{}`: {e}", self.base_url)))
    }

    /// The page the category discoverer starts from.
    pub fn root_url(&self) -> Result<Url> {
        let base = self.base_url()?;
        base.join(&self.root_path)
            .map_err(|e| ScraperError::FatalSetup(format!("invalid root_path `{}`: {e}", self.root_path)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The output path, or a timestamped default.
    pub fn resolved_output_path(&self) -> String {
        self.output_path.clone().unwrap_or_else(|| {
            format!("products_{}.csv", chrono::Local::now().format("%Y%m%d_%H%M%S"))
        })
    }
}

impl RetryPolicy {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl BrowserConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}
