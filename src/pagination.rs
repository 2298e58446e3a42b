use crate::extractor::{element_text, resolve};
use crate::fetcher::PageFetcher;
use crate::types::CategoryPage;
use crate::{CategoryRef, PageContent, Result, ScraperError};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Markup that points at the following listing page.
const NEXT_SELECTORS: [&str; 9] = [
    "a[rel='next']",
    "link[rel='next']",
    ".pagination .next a",
    "li.next a",
    "a.next",
    "a[aria-label*='Next']",
    "a[aria-label*='next']",
    "a[class*='next']",
    "button[class*='next']",
];

const NEXT_LINK_TEXT: [&str; 5] = ["next", "next page", "›", "»", ">"];

/// Why a category walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    /// The last page had no next-page affordance.
    NoNextPage,
    /// The configured page cap was reached.
    PageLimit,
    /// A page could not be fetched after retries; earlier pages are kept.
    FetchFailed,
    /// A page after the first yielded no products.
    EmptyPage,
}

/// Walks a category's listing pages in order, starting at page 1.
pub struct PaginationWalker {
    fetcher: Arc<dyn PageFetcher>,
    max_pages: u32,
    next_selectors: Vec<Selector>,
    pager_selector: Option<Selector>,
    link_selector: Option<Selector>,
    page_count: Option<Regex>,
}

impl PaginationWalker {
    pub fn new(fetcher: Arc<dyn PageFetcher>, max_pages: u32) -> Self {
        Self {
            fetcher,
            max_pages,
            next_selectors: NEXT_SELECTORS
                .iter()
                .filter_map(|s| Selector::parse(s).ok())
                .collect(),
            pager_selector: Selector::parse("[class*='pagination'] a, [class*='pager'] a").ok(),
            link_selector: Selector::parse("a").ok(),
            page_count: Regex::new(r"(?i)page\s+(\d+)\s+of\s+(\d+)").ok(),
        }
    }

    /// Starts a fresh walk over `category`. Each call restarts from page 1.
    pub fn walk(&self, category: &CategoryRef) -> Result<CategoryWalk<'_>> {
        let start = Url::parse(&category.url).map_err(|_| ScraperError::ParseError {
            url: category.url.clone(),
            field: "category url".into(),
        })?;

        Ok(CategoryWalk {
            walker: self,
            category: category.clone(),
            next_url: Some(start),
            visited: HashSet::new(),
            fetched: 0,
            end: None,
        })
    }

    /// Finds the URL of the page after `current` (1-based), if the content
    /// offers one.
    ///
    /// An explicit next link wins. A next control without an href, or a
    /// "Page X of Y" indicator with X < Y, yields a synthesized `page=N` URL.
    pub fn next_page_url(&self, page: &PageContent, current: u32) -> Option<Url> {
        let document = Html::parse_document(&page.html);
        let following = current + 1;

        for selector in &self.next_selectors {
            if let Some(element) = document.select(selector).find(|e| !is_disabled(*e)) {
                let href = element.value().attr("href").and_then(|h| resolve(&page.url, h));
                debug!(?selector, ?href, "Found next-page control");
                return match href {
                    Some(href) => Url::parse(&href).ok(),
                    None => Some(page_url(&page.url, following)),
                };
            }
        }

        if let Some(links) = &self.link_selector {
            let by_text = document.select(links).find(|a| {
                let text = element_text(*a).to_lowercase();
                NEXT_LINK_TEXT.contains(&text.as_str()) && !is_disabled(*a)
            });
            if let Some(href) = by_text
                .and_then(|a| a.value().attr("href"))
                .and_then(|h| resolve(&page.url, h))
            {
                return Url::parse(&href).ok();
            }
        }

        // A numbered pager link to the following page.
        if let Some(pager) = &self.pager_selector {
            let numbered = document
                .select(pager)
                .find(|a| element_text(*a) == following.to_string());
            if let Some(href) = numbered
                .and_then(|a| a.value().attr("href"))
                .and_then(|h| resolve(&page.url, h))
            {
                return Url::parse(&href).ok();
            }
        }

        let text = document.root_element().text().collect::<String>();
        let (shown, total) = self.page_count.as_ref().and_then(|re| {
            let caps = re.captures(&text)?;
            Some((caps[1].parse::<u32>().ok()?, caps[2].parse::<u32>().ok()?))
        })?;
        (shown < total).then(|| page_url(&page.url, shown.max(current) + 1))
    }
}

/// An in-progress walk over one category, pulled one page at a time.
pub struct CategoryWalk<'a> {
    walker: &'a PaginationWalker,
    category: CategoryRef,
    next_url: Option<Url>,
    visited: HashSet<String>,
    fetched: u32,
    end: Option<WalkEnd>,
}

impl CategoryWalk<'_> {
    /// Fetches the next page, or returns `None` once the walk has ended.
    ///
    /// A failed fetch ends the walk for this category only.
    pub async fn next_page(&mut self) -> Option<CategoryPage> {
        if self.end.is_some() {
            return None;
        }
        let Some(url) = self.next_url.take() else {
            return self.finish(WalkEnd::NoNextPage);
        };
        if self.fetched >= self.walker.max_pages {
            info!(category = %self.category.name, max_pages = self.walker.max_pages, "Reached page cap");
            return self.finish(WalkEnd::PageLimit);
        }

        let number = self.fetched + 1;
        let content = match self.walker.fetcher.fetch(&url).await {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    category = %self.category.name,
                    page = number,
                    url = %url,
                    error = %e,
                    "Page fetch failed, ending category walk"
                );
                return self.finish(WalkEnd::FetchFailed);
            }
        };

        self.fetched = number;
        self.visited.insert(url.to_string());
        self.visited.insert(content.url.to_string());
        info!(category = %self.category.name, page = number, url = %content.url, "Fetched listing page");

        self.next_url = self
            .walker
            .next_page_url(&content, number)
            .filter(|next| !self.visited.contains(next.as_str()));

        Some(CategoryPage {
            category: self.category.clone(),
            number,
            content,
        })
    }

    /// Ends the walk early, e.g. when a page turned out empty.
    pub fn stop(&mut self, reason: WalkEnd) {
        self.end.get_or_insert(reason);
    }

    pub fn end_reason(&self) -> Option<WalkEnd> {
        self.end
    }

    pub fn pages_fetched(&self) -> u32 {
        self.fetched
    }

    fn finish(&mut self, reason: WalkEnd) -> Option<CategoryPage> {
        debug!(category = %self.category.name, ?reason, pages = self.fetched, "Category walk ended");
        self.end = Some(reason);
        None
    }
}

/// `url` with its `page` query parameter set to `number`.
pub fn page_url(url: &Url, number: u32) -> Url {
    let mut next = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    next.set_fragment(None);
    next.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("page", &number.to_string());
    next
}

fn is_disabled(element: ElementRef) -> bool {
    let value = element.value();
    value.attr("disabled").is_some()
        || value.attr("aria-disabled") == Some("true")
        || value
            .attr("class")
            .is_some_and(|c| c.to_lowercase().contains("disabled"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves a fixed number of pages, each linking to the next.
    struct PagedSite {
        pages: u32,
        fail_on: Option<u32>,
        requested: Mutex<Vec<String>>,
    }

    impl PagedSite {
        fn new(pages: u32) -> Self {
            Self {
                pages,
                fail_on: None,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for PagedSite {
        async fn fetch(&self, url: &Url) -> Result<PageContent> {
            self.requested.lock().unwrap().push(url.to_string());
            let number: u32 = url
                .query_pairs()
                .find(|(k, _)| k == "page")
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(1);
            if Some(number) == self.fail_on {
                return Err(ScraperError::NetworkError {
                    url: url.to_string(),
                    attempts: 4,
                    status: Some(500),
                    message: "server error".into(),
                });
            }
            let next = if number < self.pages {
                format!(r#"<a rel="next" href="?page={}">Next</a>"#, number + 1)
            } else {
                String::new()
            };
            Ok(PageContent {
                url: url.clone(),
                html: format!("<html><body><p>Page {number}</p>{next}</body></html>"),
                status: 200,
            })
        }

        fn backend(&self) -> &'static str {
            "paged"
        }
    }

    fn category() -> CategoryRef {
        CategoryRef::new("https://shop.test/in/frozen", "Frozen")
    }

    fn content(html: &str) -> PageContent {
        PageContent {
            url: Url::parse("https://shop.test/in/frozen?sort=new").unwrap(),
            html: html.to_string(),
            status: 200,
        }
    }

    #[tokio::test]
    async fn test_walk_stops_without_next_link() {
        let site = Arc::new(PagedSite::new(3));
        let walker = PaginationWalker::new(site.clone(), 50);
        let mut walk = walker.walk(&category()).unwrap();

        let mut numbers = Vec::new();
        while let Some(page) = walk.next_page().await {
            numbers.push(page.number);
        }

        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(walk.end_reason(), Some(WalkEnd::NoNextPage));
        assert_eq!(site.requested.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_walk_never_exceeds_page_cap() {
        for cap in 1..=4 {
            let site = Arc::new(PagedSite::new(100));
            let walker = PaginationWalker::new(site.clone(), cap);
            let mut walk = walker.walk(&category()).unwrap();
            while walk.next_page().await.is_some() {}

            assert_eq!(walk.pages_fetched(), cap);
            assert_eq!(walk.end_reason(), Some(WalkEnd::PageLimit));
            assert_eq!(site.requested.lock().unwrap().len() as u32, cap);
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_earlier_pages() {
        let site = Arc::new(PagedSite {
            fail_on: Some(3),
            ..PagedSite::new(5)
        });
        let walker = PaginationWalker::new(site, 50);
        let mut walk = walker.walk(&category()).unwrap();

        let mut numbers = Vec::new();
        while let Some(page) = walk.next_page().await {
            numbers.push(page.number);
        }

        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(walk.end_reason(), Some(WalkEnd::FetchFailed));
    }

    #[tokio::test]
    async fn test_walk_is_restartable() {
        let site = Arc::new(PagedSite::new(2));
        let walker = PaginationWalker::new(site.clone(), 50);
        for _ in 0..2 {
            let mut walk = walker.walk(&category()).unwrap();
            let first = walk.next_page().await.unwrap();
            assert_eq!(first.number, 1);
            assert_eq!(first.content.url.as_str(), "https://shop.test/in/frozen");
        }
    }

    #[test]
    fn test_next_page_detection() {
        let walker = PaginationWalker::new(Arc::new(PagedSite::new(1)), 50);

        let explicit = content(r#"<a class="next" href="/in/frozen/page/2">Next</a>"#);
        assert_eq!(
            walker.next_page_url(&explicit, 1).unwrap().as_str(),
            "https://shop.test/in/frozen/page/2"
        );

        let button = content(r#"<button class="pager-next">›</button>"#);
        assert_eq!(
            walker.next_page_url(&button, 1).unwrap().as_str(),
            "https://shop.test/in/frozen?sort=new&page=2"
        );

        let disabled = content(r##"<a class="next disabled" href="#">Next</a>"##);
        assert!(walker.next_page_url(&disabled, 4).is_none());

        let numbered = content(
            r#"<div class="pagination"><a href="?page=1">1</a><a href="?page=2">2</a></div>"#,
        );
        assert_eq!(
            walker.next_page_url(&numbered, 1).unwrap().as_str(),
            "https://shop.test/in/frozen?page=2"
        );

        let counter = content("<span>Page 2 of 3</span>");
        assert_eq!(
            walker.next_page_url(&counter, 2).unwrap().as_str(),
            "https://shop.test/in/frozen?sort=new&page=3"
        );
        assert!(walker.next_page_url(&content("<span>Page 3 of 3</span>"), 3).is_none());
        assert!(walker.next_page_url(&content("<p>No pager</p>"), 1).is_none());
    }

    #[test]
    fn test_page_url_replaces_existing_parameter() {
        let url = Url::parse("https://shop.test/in/frozen?page=2&sort=new").unwrap();
        assert_eq!(page_url(&url, 3).as_str(), "https://shop.test/in/frozen?sort=new&page=3");
    }
}
