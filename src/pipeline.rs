use crate::discovery::{name_from_url, CategoryDiscoverer};
use crate::extractor::ProductExtractor;
use crate::fetcher::{FallbackFetcher, HttpFetcher, PageFetcher};
use crate::normalize::RecordNormalizer;
use crate::pagination::{PaginationWalker, WalkEnd};
use crate::rate_limit::RateLimiter;
use crate::sink::{CsvSink, RecordSet};
use crate::{CategoryRef, DetailFields, Result, ScraperConfig, ScraperError};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Everything a run shares: configuration, the HTTP session and, when
/// enabled, the browser. Both fetchers pace through one rate limiter.
///
/// Fetchers are acquired once here and released when the context is dropped.
pub struct RunContext {
    pub config: ScraperConfig,
    pub extractor: Arc<ProductExtractor>,
    /// Fetches the root and listing pages.
    pub pages: Arc<dyn PageFetcher>,
    /// Fetches product detail pages.
    pub details: Arc<dyn PageFetcher>,
}

impl RunContext {
    /// Validates `config` and builds the fetchers for a run.
    ///
    /// With `force_browser`, every page is rendered in the headless browser.
    /// Otherwise the browser only re-renders listing pages whose static HTML
    /// shows too few product cards, if `browser.enabled_fallback` is set.
    pub fn new(config: ScraperConfig, force_browser: bool) -> Result<Self> {
        config.validate()?;
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let extractor = Arc::new(ProductExtractor::default());
        let http: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config, rate_limiter.clone())?);
        let browser = browser_backend(&config, force_browser, &rate_limiter)?;

        let (pages, details): (Arc<dyn PageFetcher>, Arc<dyn PageFetcher>) = match browser {
            Some(browser) if force_browser => (browser.clone(), browser),
            fallback => (
                Arc::new(FallbackFetcher::new(
                    http.clone(),
                    fallback,
                    extractor.clone(),
                    config.browser.min_product_nodes,
                )),
                http,
            ),
        };
        info!(backend = pages.backend(), "Fetch backend ready");

        Ok(Self {
            config,
            extractor,
            pages,
            details,
        })
    }
}

#[cfg(feature = "browser")]
fn browser_backend(
    config: &ScraperConfig,
    force_browser: bool,
    rate_limiter: &Arc<RateLimiter>,
) -> Result<Option<Arc<dyn PageFetcher>>> {
    if !force_browser && !config.browser.enabled_fallback {
        return Ok(None);
    }
    Ok(Some(Arc::new(crate::browser::BrowserFetcher::new(
        config,
        rate_limiter.clone(),
    ))))
}

#[cfg(not(feature = "browser"))]
fn browser_backend(
    config: &ScraperConfig,
    force_browser: bool,
    _rate_limiter: &Arc<RateLimiter>,
) -> Result<Option<Arc<dyn PageFetcher>>> {
    if force_browser {
        return Err(ScraperError::FatalSetup(
            "browser backend requested but shelfwalk was built without the `browser` feature".into(),
        ));
    }
    if config.browser.enabled_fallback {
        warn!("browser.enabled_fallback is set but the `browser` feature is not compiled in; using static fetches only");
    }
    Ok(None)
}

/// Hands out record timestamps that never go backwards within a run.
#[derive(Debug, Default)]
pub struct RunClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl RunClock {
    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let now = match *last {
            Some(previous) => Utc::now().max(previous),
            None => Utc::now(),
        };
        *last = Some(now);
        now
    }
}

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub categories: usize,
    pub pages: usize,
    pub records: usize,
    /// Categories whose walk ended on a failed page fetch.
    pub failed_categories: usize,
    pub detail_failures: usize,
    /// Unique records per `category` column value.
    pub per_category: BTreeMap<String, usize>,
    pub output_path: PathBuf,
    /// The run was cancelled; the file holds what was gathered until then.
    pub interrupted: bool,
}

/// The crawl-and-extract pipeline: discover categories, walk their pages,
/// extract and normalize products, write the CSV.
pub struct Pipeline {
    ctx: RunContext,
    normalizer: RecordNormalizer,
    clock: RunClock,
}

impl Pipeline {
    pub fn new(ctx: RunContext) -> Self {
        let normalizer = RecordNormalizer::default().with_default_brand(ctx.config.default_brand.clone());
        Self {
            ctx,
            normalizer,
            clock: RunClock::default(),
        }
    }

    /// Runs the crawl until it completes or `shutdown` resolves.
    ///
    /// Records gathered so far are written in both cases. Only a fatal setup
    /// error (root page unreachable, bad configuration) returns `Err`, and
    /// then no file is written.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<RunSummary> {
        let output_path = PathBuf::from(self.ctx.config.resolved_output_path());
        let mut records = RecordSet::new();
        let mut summary = RunSummary {
            output_path: output_path.clone(),
            ..RunSummary::default()
        };

        let progress = spinner();
        let outcome = tokio::select! {
            result = self.crawl(&mut records, &mut summary, &progress) => result.map(|()| false),
            _ = shutdown => Ok(true),
        };

        match outcome {
            Ok(true) => {
                warn!(records = records.len(), "Interrupted, writing partial output");
                summary.interrupted = true;
            }
            Ok(false) => {}
            Err(e) => {
                progress.abandon_with_message(format!("Failed: {e}"));
                error!("Run aborted: {}", e);
                return Err(e);
            }
        }

        summary.records = CsvSink::new(&output_path).write(&records)?;
        log_fill_counts(&records);
        progress.finish_with_message(format!(
            "Wrote {} products from {} pages to {}",
            summary.records,
            summary.pages,
            output_path.display()
        ));
        Ok(summary)
    }

    async fn crawl(
        &self,
        records: &mut RecordSet,
        summary: &mut RunSummary,
        progress: &ProgressBar,
    ) -> Result<()> {
        let root = self.ctx.config.root_url()?;
        let categories = self.categories(&root).await?;
        summary.categories = categories.len();

        let walker = PaginationWalker::new(self.ctx.pages.clone(), self.ctx.config.max_pages);

        'categories: for category in &categories {
            if self.limit_reached(records) {
                break;
            }
            info!(category = %category.name, parent = %category.parent, url = %category.url, "Category started");

            let mut walk = match walker.walk(category) {
                Ok(walk) => walk,
                Err(e) => {
                    warn!(category = %category.name, "Skipping category: {}", e);
                    summary.failed_categories += 1;
                    continue;
                }
            };

            while let Some(page) = walk.next_page().await {
                summary.pages += 1;
                progress.set_message(format!(
                    "{} page {} ({} products)",
                    category.name,
                    page.number,
                    records.len()
                ));

                let products = self.ctx.extractor.extract_products(&page.content);
                if products.is_empty() {
                    info!(category = %category.name, page = page.number, "No products on page");
                    if page.number > 1 {
                        walk.stop(WalkEnd::EmptyPage);
                    }
                    continue;
                }

                for mut raw in products {
                    if self.limit_reached(records) {
                        info!(limit = ?self.ctx.config.limit, "Record limit reached");
                        break 'categories;
                    }
                    raw.category = category.category().to_string();
                    raw.subcategory = category.subcategory().to_string();

                    let detail = if self.ctx.config.fetch_details
                        && !raw.page_url.is_empty()
                        && !records.contains_url(&raw.page_url)
                    {
                        self.fetch_detail(&raw.page_url, summary).await
                    } else {
                        None
                    };

                    let record = self.normalizer.normalize(&raw, detail.as_ref(), self.clock.now());
                    let category_column = record.category.clone();
                    if records.insert(record) {
                        *summary.per_category.entry(category_column).or_default() += 1;
                        info!(name = %raw.name, url = %raw.page_url, "Product extracted");
                    }
                }
            }

            if walk.end_reason() == Some(WalkEnd::FetchFailed) {
                summary.failed_categories += 1;
            }
            info!(
                category = %category.name,
                pages = walk.pages_fetched(),
                end = ?walk.end_reason(),
                records = records.len(),
                "Category finished"
            );
        }

        Ok(())
    }

    /// The categories to walk: discovered ones, else the configured fallback
    /// list, else the root page itself.
    async fn categories(&self, root: &Url) -> Result<Vec<CategoryRef>> {
        let discoverer = CategoryDiscoverer::new(self.ctx.pages.clone(), self.ctx.extractor.clone());
        let discovered = discoverer.discover_categories(root).await.map_err(|e| {
            ScraperError::FatalSetup(format!("root page {root} is unreachable: {e}"))
        })?;
        if !discovered.is_empty() {
            return Ok(discovered);
        }

        let base = self.ctx.config.base_url()?;
        let fallback: Vec<CategoryRef> = self
            .ctx
            .config
            .fallback_categories
            .iter()
            .filter_map(|c| match base.join(&c.url) {
                Ok(url) => Some(CategoryRef::new(url.to_string(), c.name.clone())),
                Err(e) => {
                    warn!(url = %c.url, "Ignoring fallback category: {}", e);
                    None
                }
            })
            .collect();

        if fallback.is_empty() {
            warn!(url = %root, "No fallback categories configured, walking the root page");
            Ok(vec![CategoryRef::new(root.to_string(), name_from_url(root))])
        } else {
            info!(count = fallback.len(), "Using fallback categories");
            Ok(fallback)
        }
    }

    async fn fetch_detail(&self, page_url: &str, summary: &mut RunSummary) -> Option<DetailFields> {
        let url = Url::parse(page_url).ok()?;
        match self.ctx.details.fetch(&url).await {
            Ok(page) => Some(self.ctx.extractor.extract_detail(&page)),
            Err(e) => {
                warn!(url = %url, "Detail page failed, keeping listing fields: {}", e);
                summary.detail_failures += 1;
                None
            }
        }
    }

    fn limit_reached(&self, records: &RecordSet) -> bool {
        self.ctx.config.limit.is_some_and(|limit| records.len() >= limit)
    }
}

fn spinner() -> ProgressBar {
    let progress = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        progress.set_style(style);
    }
    progress.enable_steady_tick(Duration::from_millis(120));
    progress.set_message("Discovering categories...");
    progress
}

fn log_fill_counts(records: &RecordSet) {
    let total = records.len();
    let counts = records.fill_counts();
    for &(column, filled) in &counts {
        debug!(column, filled, total, "Column coverage");
    }
    let blank: Vec<&str> = counts
        .iter()
        .filter(|(_, filled)| *filled == 0)
        .map(|(column, _)| *column)
        .collect();
    info!(records = total, empty_columns = ?blank, "Data quality");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = RunClock::default();
        let mut previous = clock.now();
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = ScraperConfig {
            base_url: String::new(),
            ..ScraperConfig::default()
        };
        let result = RunContext::new(config, false);
        assert!(matches!(result, Err(ScraperError::FatalSetup(_))));
    }

    #[cfg(not(feature = "browser"))]
    #[test]
    fn test_forced_browser_without_feature_is_fatal() {
        let result = RunContext::new(ScraperConfig::default(), true);
        assert!(matches!(result, Err(ScraperError::FatalSetup(_))));
    }

    #[test]
    fn test_static_backend_by_default() {
        let ctx = RunContext::new(ScraperConfig::default(), false).unwrap();
        assert_eq!(ctx.pages.backend(), "http");
        assert_eq!(ctx.details.backend(), "http");
    }
}
