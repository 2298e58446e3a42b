use crate::extractor::{element_text, resolve, ProductExtractor};
use crate::fetcher::PageFetcher;
use crate::{CategoryRef, PageContent, Result};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Containers that hold the site's category navigation.
const NAV_CONTAINERS: [&str; 6] = [
    "nav",
    "header",
    "[role='navigation']",
    "[class*='menu']",
    "[class*='nav']",
    "[class*='categor']",
];

/// Navigation entries that never lead to a product listing.
const SKIPPED_WORDS: [&str; 7] = [
    "home", "cart", "login", "register", "contact", "about", "signin",
];

/// The `CategoryDiscoverer` enumerates category and subcategory pages from
/// the navigation of a site's root page.
pub struct CategoryDiscoverer {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<ProductExtractor>,
    containers: Vec<Selector>,
    item: Option<Selector>,
    link: Option<Selector>,
    nested_list: Option<Selector>,
    image: Option<Selector>,
}

impl CategoryDiscoverer {
    pub fn new(fetcher: Arc<dyn PageFetcher>, extractor: Arc<ProductExtractor>) -> Self {
        Self {
            fetcher,
            extractor,
            containers: NAV_CONTAINERS
                .iter()
                .filter_map(|s| Selector::parse(s).ok())
                .collect(),
            item: Selector::parse("li").ok(),
            link: Selector::parse("a[href]").ok(),
            nested_list: Selector::parse("ul, ol").ok(),
            image: Selector::parse("img[alt]").ok(),
        }
    }

    /// Fetches `root_url` and returns the categories its navigation links to.
    ///
    /// Fails only when the root page cannot be fetched. A page without usable
    /// navigation yields an empty list and a warning.
    #[instrument(skip(self), fields(root = %root_url))]
    pub async fn discover_categories(&self, root_url: &Url) -> Result<Vec<CategoryRef>> {
        let root = self.fetcher.fetch(root_url).await?;
        let categories = self.parse_categories(&root);

        if categories.is_empty() {
            warn!(url = %root.url, "No categories found in navigation");
        } else {
            info!(count = categories.len(), "Discovered categories");
        }
        Ok(categories)
    }

    /// Reads categories from an already fetched root page, deduplicated by URL.
    ///
    /// Entries nested under another navigation item become subcategories of
    /// it. Links of product cards shown on the page are not categories.
    pub fn parse_categories(&self, root: &PageContent) -> Vec<CategoryRef> {
        let document = Html::parse_document(&root.html);
        let product_urls: HashSet<String> = self
            .extractor
            .extract_products(root)
            .into_iter()
            .map(|p| p.page_url)
            .filter(|u| !u.is_empty())
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(root.url.to_string());
        seen.extend(product_urls);
        let mut categories = Vec::new();

        let mut push = |category: CategoryRef, categories: &mut Vec<CategoryRef>| {
            if seen.insert(category.url.clone()) {
                debug!(url = %category.url, name = %category.name, parent = %category.parent, "Category");
                categories.push(category);
            }
        };

        let containers: Vec<ElementRef> = self
            .containers
            .iter()
            .flat_map(|selector| document.select(selector))
            .collect();

        // Nested lists first, so an entry is recorded with its parent before
        // the flat pass sees it.
        if let (Some(item), Some(nested_list)) = (&self.item, &self.nested_list) {
            for container in &containers {
                for entry in container.select(item) {
                    let Some(own_link) = entry
                        .children()
                        .filter_map(ElementRef::wrap)
                        .find(|c| c.value().name() == "a")
                    else {
                        continue;
                    };
                    let Some(parent) = self.candidate(root, own_link) else {
                        continue;
                    };
                    let Some(sublist) = entry.select(nested_list).next() else {
                        continue;
                    };

                    let children: Vec<CategoryRef> = self
                        .links_in(sublist)
                        .filter_map(|a| self.candidate(root, a))
                        .map(|child| child.with_parent(parent.name.clone()))
                        .collect();
                    push(parent, &mut categories);
                    for child in children {
                        push(child, &mut categories);
                    }
                }
            }
        }

        for container in &containers {
            for link in self.links_in(*container) {
                if let Some(category) = self.candidate(root, link) {
                    push(category, &mut categories);
                }
            }
        }

        // Category tiles outside any navigation block, e.g. image links on a landing page.
        if let Some(image) = &self.image {
            for link in self.links_in(document.root_element()) {
                if link.select(image).next().is_some() {
                    if let Some(category) = self.candidate(root, link) {
                        push(category, &mut categories);
                    }
                }
            }
        }

        categories
    }

    fn links_in<'a>(&'a self, scope: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        self.link.iter().flat_map(move |link| scope.select(link))
    }

    /// Turns a navigation link into a category, or rejects it.
    fn candidate(&self, root: &PageContent, link: ElementRef) -> Option<CategoryRef> {
        let href = resolve(&root.url, link.value().attr("href")?)?;
        let url = Url::parse(&href).ok()?;
        if url.host_str() != root.url.host_str() || url.path() == "/" {
            return None;
        }

        let name = self
            .image
            .as_ref()
            .and_then(|image| link.select(image).next())
            .and_then(|img| img.value().attr("alt"))
            .map(|alt| alt.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|alt| !alt.is_empty())
            .unwrap_or_else(|| element_text(link));

        if name.chars().count() <= 2 || is_skipped(&name, &url) {
            return None;
        }
        Some(CategoryRef::new(href, name))
    }
}

/// A display name for a category known only by its URL, e.g.
/// `/in/Menu-Addons` -> `Menu Addons`.
pub fn name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| segment.replace(['-', '_'], " "))
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| url.host_str().unwrap_or_default().to_string())
}

fn is_skipped(name: &str, url: &Url) -> bool {
    let name = name.to_lowercase();
    let path = url.path().to_lowercase();
    name.split(|c: char| !c.is_alphanumeric())
        .chain(path.split(|c: char| !c.is_alphanumeric()))
        .any(|word| SKIPPED_WORDS.contains(&word))
}
