use crate::config::{RetryPolicy, ScraperConfig};
use crate::extractor::ProductExtractor;
use crate::rate_limit::RateLimiter;
use crate::{PageContent, Result, ScraperError};
use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, RETRY_AFTER,
};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// A backend able to turn a URL into HTML.
///
/// Implementations own their retry policy and must throttle through the
/// shared [`RateLimiter`] before every attempt.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<PageContent>;

    /// A short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Exponential backoff: `base * 2^(retry - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self::new(policy.base_backoff(), policy.max_backoff())
    }

    /// The delay before the `retry`-th retry (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// The delay before a retry the server asked us to postpone.
    pub fn delay_with_hint(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.delay(retry);
        match retry_after {
            Some(hint) => hint.max(computed).min(self.max),
            None => computed,
        }
    }
}

/// How a response status is handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 5xx: transient, retry with backoff.
    Retryable,
    /// 429: retry, honouring `Retry-After` when present.
    RateLimited,
    /// Other 4xx (and unfollowed 3xx): fail immediately.
    Permanent,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        StatusClass::RateLimited
    } else if status.is_server_error() {
        StatusClass::Retryable
    } else {
        StatusClass::Permanent
    }
}

enum Attempt {
    Done(PageContent),
    Retry {
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },
    GiveUp {
        status: Option<u16>,
        message: String,
    },
}

/// The static fetch backend: one pooled `reqwest` session per run.
pub struct HttpFetcher {
    /// The HTTP client used for making requests.
    client: Client,
    /// The shared per-request pacing.
    rate_limiter: Arc<RateLimiter>,
    max_retries: u32,
    backoff: Backoff,
}

impl HttpFetcher {
    /// Creates a new `HttpFetcher` with browser-like default headers.
    ///
    /// # Arguments
    ///
    /// * `config` - The run configuration (user agent, timeout, retry policy).
    /// * `rate_limiter` - The limiter every attempt waits on.
    pub fn new(config: &ScraperConfig, rate_limiter: Arc<RateLimiter>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert("dnt", HeaderValue::from_static("1"));
        headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.timeout())
            .gzip(true)
            .build()
            .map_err(ScraperError::RequestError)?;

        Ok(Self {
            client,
            rate_limiter,
            max_retries: config.retry.max_retries,
            backoff: Backoff::from_policy(&config.retry),
        })
    }

    async fn attempt(&self, url: &Url) -> Attempt {
        let response = match self.client.get(url.as_str()).send().await {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry {
                    status: e.status().map(|s| s.as_u16()),
                    message: e.to_string(),
                    retry_after: None,
                }
            }
        };

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Response received");

        match classify_status(status) {
            StatusClass::Success => {
                let final_url = response.url().clone();
                match response.text().await {
                    Ok(html) => Attempt::Done(PageContent {
                        url: final_url,
                        html,
                        status: status.as_u16(),
                    }),
                    Err(e) => Attempt::Retry {
                        status: Some(status.as_u16()),
                        message: format!("failed to read body: {e}"),
                        retry_after: None,
                    },
                }
            }
            StatusClass::RateLimited => Attempt::Retry {
                status: Some(status.as_u16()),
                message: "rate limited by server".to_string(),
                retry_after: parse_retry_after(response.headers().get(RETRY_AFTER)),
            },
            StatusClass::Retryable => Attempt::Retry {
                status: Some(status.as_u16()),
                message: format!("server error {status}"),
                retry_after: None,
            },
            StatusClass::Permanent => Attempt::GiveUp {
                status: Some(status.as_u16()),
                message: format!("non-retryable status {status}"),
            },
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    /// Fetches a URL, retrying transient failures with exponential backoff.
    ///
    /// Makes at most `max_retries + 1` requests. 4xx responses other than 429
    /// fail on the first attempt.
    async fn fetch(&self, url: &Url) -> Result<PageContent> {
        let mut attempts = 0;

        loop {
            self.rate_limiter.throttle().await;
            attempts += 1;

            match self.attempt(url).await {
                Attempt::Done(page) => {
                    info!(url = %url, attempt = attempts, "Fetched page");
                    return Ok(page);
                }
                Attempt::GiveUp { status, message } => {
                    warn!(url = %url, attempt = attempts, ?status, "Giving up: {}", message);
                    return Err(ScraperError::NetworkError {
                        url: url.to_string(),
                        attempts,
                        status,
                        message,
                    });
                }
                Attempt::Retry {
                    status,
                    message,
                    retry_after,
                } => {
                    let retry = attempts;
                    if retry > self.max_retries {
                        warn!(url = %url, attempts, ?status, "Retries exhausted: {}", message);
                        return Err(ScraperError::NetworkError {
                            url: url.to_string(),
                            attempts,
                            status,
                            message,
                        });
                    }
                    let delay = self.backoff.delay_with_hint(retry, retry_after);
                    warn!(
                        url = %url,
                        attempt = attempts,
                        ?status,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying: {}",
                        message
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    fn backend(&self) -> &'static str {
        "http"
    }
}

/// Reads a `Retry-After` header given in seconds.
fn parse_retry_after(value: Option<&HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Fetches listing pages statically and re-renders them in a browser when
/// the static HTML carries too few product cards.
///
/// A page is either entirely static or entirely rendered.
pub struct FallbackFetcher {
    primary: Arc<dyn PageFetcher>,
    fallback: Option<Arc<dyn PageFetcher>>,
    extractor: Arc<ProductExtractor>,
    min_product_nodes: usize,
}

impl FallbackFetcher {
    pub fn new(
        primary: Arc<dyn PageFetcher>,
        fallback: Option<Arc<dyn PageFetcher>>,
        extractor: Arc<ProductExtractor>,
        min_product_nodes: usize,
    ) -> Self {
        Self {
            primary,
            fallback,
            extractor,
            min_product_nodes,
        }
    }
}

#[async_trait]
impl PageFetcher for FallbackFetcher {
    async fn fetch(&self, url: &Url) -> Result<PageContent> {
        let page = self.primary.fetch(url).await?;

        let Some(fallback) = &self.fallback else {
            return Ok(page);
        };

        let found = self.extractor.count_product_nodes(&page.html);
        if found >= self.min_product_nodes {
            return Ok(page);
        }

        info!(
            url = %url,
            found,
            threshold = self.min_product_nodes,
            backend = fallback.backend(),
            "Too few product cards in static HTML, re-rendering"
        );
        match fallback.fetch(url).await {
            Ok(rendered) => Ok(rendered),
            Err(e) => {
                warn!(url = %url, "Rendered fetch failed, keeping static HTML: {}", e);
                Ok(page)
            }
        }
    }

    fn backend(&self) -> &'static str {
        self.primary.backend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(5));
        assert_eq!(backoff.delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_is_non_decreasing() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(30));
        let delays: Vec<_> = (1..=12).map(|r| backoff.delay(r)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_retry_after_hint_is_honoured_but_capped() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(
            backoff.delay_with_hint(1, Some(Duration::from_secs(4))),
            Duration::from_secs(4)
        );
        assert_eq!(
            backoff.delay_with_hint(1, Some(Duration::from_secs(120))),
            Duration::from_secs(10)
        );
        assert_eq!(backoff.delay_with_hint(2, None), Duration::from_secs(2));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Success);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), StatusClass::Retryable);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::RateLimited
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusClass::Permanent);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), StatusClass::Permanent);
    }

    fn fast_config(max_retries: u32) -> ScraperConfig {
        ScraperConfig {
            retry: RetryPolicy {
                max_retries,
                base_backoff_ms: 1,
                max_backoff_ms: 4,
            },
            rate_limit: RateLimit {
                min_delay_ms: 0,
                max_delay_ms: 0,
            },
            ..ScraperConfig::default()
        }
    }

    fn fetcher(max_retries: u32) -> HttpFetcher {
        HttpFetcher::new(&fast_config(max_retries), Arc::new(RateLimiter::disabled())).unwrap()
    }

    #[tokio::test]
    async fn test_server_errors_retry_until_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(4)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/flaky", server.url())).unwrap();
        let err = fetcher(3).fetch(&url).await.unwrap_err();

        match err {
            ScraperError::NetworkError {
                attempts, status, ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(status, Some(503));
            }
            other => panic!("unexpected error: {other}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/missing", server.url())).unwrap();
        let err = fetcher(3).fetch(&url).await.unwrap_err();

        assert!(matches!(
            err,
            ScraperError::NetworkError {
                attempts: 1,
                status: Some(404),
                ..
            }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_too_many_requests_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/busy")
            .with_status(429)
            .with_header("retry-after", "0")
            .expect(3)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/busy", server.url())).unwrap();
        let err = fetcher(2).fetch(&url).await.unwrap_err();

        assert!(matches!(
            err,
            ScraperError::NetworkError {
                attempts: 3,
                status: Some(429),
                ..
            }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_success_returns_body_and_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ok")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body>hello</body></html>")
            .expect(1)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/ok", server.url())).unwrap();
        let page = fetcher(3).fetch(&url).await.unwrap();

        assert_eq!(page.status, 200);
        assert!(page.html.contains("hello"));
        mock.assert_async().await;
    }

    struct CannedFetcher {
        html: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for CannedFetcher {
        async fn fetch(&self, url: &Url) -> Result<PageContent> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PageContent {
                url: url.clone(),
                html: self.html.to_string(),
                status: 200,
            })
        }

        fn backend(&self) -> &'static str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_fallback_only_when_static_html_is_thin() {
        let empty = Arc::new(CannedFetcher {
            html: "<html><body><div id='app'></div></body></html>",
            calls: AtomicUsize::new(0),
        });
        let rendered = Arc::new(CannedFetcher {
            html: r#"<div class="product-card"><a href="/p/a">A</a></div>"#,
            calls: AtomicUsize::new(0),
        });
        let fetcher = FallbackFetcher::new(
            empty.clone(),
            Some(rendered.clone()),
            Arc::new(ProductExtractor::default()),
            1,
        );

        let url = Url::parse("https://shop.test/in/cheese").unwrap();
        let page = fetcher.fetch(&url).await.unwrap();

        assert!(page.html.contains("product-card"));
        assert_eq!(empty.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rendered.calls.load(Ordering::SeqCst), 1);

        let populated = Arc::new(CannedFetcher {
            html: r#"<div class="product-card"><a href="/p/a">A</a></div>"#,
            calls: AtomicUsize::new(0),
        });
        let fetcher = FallbackFetcher::new(
            populated,
            Some(rendered.clone()),
            Arc::new(ProductExtractor::default()),
            1,
        );
        fetcher.fetch(&url).await.unwrap();
        assert_eq!(rendered.calls.load(Ordering::SeqCst), 1);
    }
}
