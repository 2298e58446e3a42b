use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod discovery;
pub mod extractor;
pub mod fetcher;
pub mod normalize;
pub mod pagination;
pub mod pipeline;
pub mod rate_limit;
pub mod sink;
pub mod types;

#[cfg(feature = "browser")]
pub mod browser;

// Re-export commonly used types
pub use config::ScraperConfig;
pub use types::{CategoryRef, DetailFields, PageContent, ProductRecord, RawProductFields};

/// The `ScraperError` enum represents the failures a crawl run can run into.
///
/// Only [`ScraperError::FatalSetup`] is meant to end a run; everything else is
/// scoped to a page, a product or a category by the pipeline.
#[derive(Error, Debug)]
pub enum ScraperError {
    /// An HTTP client error that happened outside the retry loop (client setup, body decoding).
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// A fetch gave up, either after exhausting its retries or on a non-transient status.
    #[error("Fetching {url} failed after {attempts} attempt(s){}: {message}", status_suffix(.status))]
    NetworkError {
        url: String,
        attempts: u32,
        status: Option<u16>,
        message: String,
    },
    /// An expected node or value was absent from a page.
    #[error("Could not parse {field} from {url}")]
    ParseError { url: String, field: String },
    /// The run cannot start: root unreachable, required configuration missing or invalid.
    #[error("Setup failed: {0}")]
    FatalSetup(String),
    /// The headless browser backend failed to launch or render.
    #[error("Browser backend failed: {0}")]
    BrowserError(String),
    /// Writing or reading the CSV output failed.
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    /// Configuration sources could not be merged or deserialized.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ::config::ConfigError),
}

impl ScraperError {
    /// Whether this error should abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScraperError::FatalSetup(_) | ScraperError::ConfigError(_))
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" (last status {code})"))
        .unwrap_or_default()
}

/// A type alias for `Result` with the `ScraperError` error type.
pub type Result<T> = std::result::Result<T, ScraperError>;

// Constants

/// The default timeout for a single HTTP request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// The default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// The default delay before the first retry; doubled on every further attempt.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);
/// The ceiling for any single backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
/// The default pagination safety cap per category.
pub const DEFAULT_MAX_PAGES: u32 = 50;
/// The user agent sent with every static request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";
