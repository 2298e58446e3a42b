use crate::{DetailFields, PageContent, RawProductFields};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, instrument};
use url::Url;

/// Phrases that mark a product as unavailable.
pub const OUT_OF_STOCK_PHRASES: [&str; 4] = [
    "out of stock",
    "sold out",
    "currently unavailable",
    "unavailable",
];

/// The `ProductExtractor` struct pulls product cards from listing pages and
/// product fields from detail pages using prioritized CSS selector lists.
pub struct ProductExtractor {
    /// Candidate selectors for a repeating product card, most specific first.
    card_selectors: Vec<Selector>,
    card: CardSelectors,
    detail: DetailSelectors,
}

struct CardSelectors {
    name: Vec<Selector>,
    price: Vec<Selector>,
    struck_price: Vec<Selector>,
    description: Vec<Selector>,
    image: Vec<Selector>,
    link: Selector,
    availability: Vec<Selector>,
    badges: Vec<Selector>,
}

struct DetailSelectors {
    name: Vec<Selector>,
    title: Selector,
    description: Vec<Selector>,
    price: Vec<Selector>,
    struck_price: Vec<Selector>,
    image: Vec<Selector>,
    brand: Vec<Selector>,
    breadcrumb: Vec<Selector>,
    breadcrumb_item: Selector,
    label: Selector,
    ingredients: Vec<Selector>,
    nutrition: Vec<Selector>,
    product_id: Vec<Selector>,
    sku: Vec<Selector>,
    rating: Vec<Selector>,
    review_count: Vec<Selector>,
    availability: Vec<Selector>,
    body: Selector,
}

fn parse_all(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
}

fn parse_one(selector: &str) -> Selector {
    // Only called with literals below; `*` matches every element if one ever fails.
    Selector::parse(selector)
        .or_else(|_| Selector::parse("*"))
        .unwrap_or_else(|_| unreachable!("`*` is a valid selector"))
}

impl Default for ProductExtractor {
    /// Provides the selector sets tuned for typical storefront markup.
    fn default() -> Self {
        let card_selectors = [
            "[data-testid='product-card']",
            "[data-product-id]",
            ".product-card",
            "div[class*='product-card']",
            "div[class*='ProductCard']",
            "li.product",
            "article[class*='product']",
            "[class*='product'][class*='item']",
            "div[class*='product']",
            "[class*='item']",
            "[class*='card']",
            "article",
        ];

        Self::new(card_selectors)
    }
}

impl ProductExtractor {
    /// Creates a new `ProductExtractor` with the given card selector candidates.
    ///
    /// Unparseable selectors are dropped.
    pub fn new(card_selectors: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let card_selectors = card_selectors
            .into_iter()
            .filter_map(|s| Selector::parse(s.as_ref()).ok())
            .collect();

        let card = CardSelectors {
            name: parse_all(&[
                "[class*='product-name']",
                "[class*='productName']",
                "[class*='name']",
                "[class*='title']",
                "h2",
                "h3",
                "h4",
            ]),
            price: parse_all(&["[class*='price']", "[class*='Price']", "[class*='amount']"]),
            struck_price: parse_all(&[
                "s",
                "del",
                "strike",
                "[style*='line-through']",
                "[class*='strike']",
                "[class*='mrp']",
                "[class*='original']",
            ]),
            description: parse_all(&["[class*='description']", "[class*='desc']", "p"]),
            image: parse_all(&["img"]),
            link: parse_one("a[href]"),
            availability: parse_all(&[
                "[class*='stock']",
                "[class*='availability']",
                "[class*='sold-out']",
            ]),
            badges: parse_all(&[
                "[class*='badge']",
                "[class*='tag']",
                "[class*='dietary']",
                "img[alt*='dietary']",
            ]),
        };

        let detail = DetailSelectors {
            name: parse_all(&["h1", "[itemprop='name']"]),
            title: parse_one("title"),
            description: parse_all(&[
                "[itemprop='description']",
                "[class*='product-description']",
                "[class*='description']",
                "[class*='product-detail']",
                "meta[name='description']",
            ]),
            price: parse_all(&["[itemprop='price']", "[class*='price']", "[class*='Price']"]),
            struck_price: parse_all(&[
                "s",
                "del",
                "strike",
                "[style*='line-through']",
                "[class*='mrp']",
            ]),
            image: parse_all(&[
                "img[src*='product']",
                "img[data-src*='product']",
                "[class*='product-image'] img",
                "[class*='image'] img",
                "meta[property='og:image']",
            ]),
            brand: parse_all(&["[itemprop='brand']", "[class*='brand']"]),
            breadcrumb: parse_all(&[
                "nav[class*='breadcrumb']",
                "ol[class*='breadcrumb']",
                "ul[class*='breadcrumb']",
                "[aria-label='breadcrumb']",
            ]),
            breadcrumb_item: parse_one("li, a"),
            label: parse_one("h2, h3, h4, h5, h6, dt, strong, b, span, p, div, li"),
            ingredients: parse_all(&["[class*='ingredient']", "[itemprop='ingredients']"]),
            nutrition: parse_all(&["[class*='nutrition']", "[itemprop='nutrition']"]),
            product_id: parse_all(&["[data-product-id]", "[itemprop='productID']"]),
            sku: parse_all(&["[data-sku]", "[itemprop='sku']"]),
            rating: parse_all(&["[itemprop='ratingValue']", "[class*='rating']", "[class*='star']"]),
            review_count: parse_all(&["[itemprop='reviewCount']", "[class*='review']"]),
            availability: parse_all(&[
                "[itemprop='availability']",
                "[class*='stock']",
                "[class*='availability']",
            ]),
            body: parse_one("body"),
        };

        Self {
            card_selectors,
            card,
            detail,
        }
    }

    /// Counts the product cards the winning selector finds in `html`.
    pub fn count_product_nodes(&self, html: &str) -> usize {
        let document = Html::parse_document(html);
        self.find_cards(&document).len()
    }

    /// Extracts one [`RawProductFields`] per product card on a listing page.
    ///
    /// Category columns are left blank; the caller knows which category the
    /// page belongs to.
    #[instrument(skip(self, page), fields(url = %page.url, html_length = page.html.len()))]
    pub fn extract_products(&self, page: &PageContent) -> Vec<RawProductFields> {
        let document = Html::parse_document(&page.html);
        let cards = self.find_cards(&document);

        let products: Vec<RawProductFields> = cards
            .into_iter()
            .map(|card| self.extract_card(card, &page.url))
            .filter(|raw| !raw.name.is_empty() || !raw.page_url.is_empty())
            .collect();

        debug!(count = products.len(), "Extracted product cards");
        products
    }

    /// Extracts the fields only a product's own page carries.
    #[instrument(skip(self, page), fields(url = %page.url, html_length = page.html.len()))]
    pub fn extract_detail(&self, page: &PageContent) -> DetailFields {
        let document = Html::parse_document(&page.html);
        let root = document.root_element();
        let sel = &self.detail;

        let mut name = first_text(root, &sel.name);
        if name.is_empty() {
            name = document
                .select(&sel.title)
                .next()
                .map(|title| strip_title_suffix(&element_text(title)))
                .unwrap_or_default();
        }
        if name.is_empty() {
            debug!(field = "name", "Detail page has no product name");
        }

        let full_text = document
            .select(&sel.body)
            .next()
            .map(element_text)
            .unwrap_or_default();

        let ingredients = first_text_without_label(root, &sel.ingredients, &["ingredients"])
            .or_else(|| self.labeled_value(&document, &["ingredients"]))
            .unwrap_or_default();
        let nutritional_info = first_text_without_label(
            root,
            &sel.nutrition,
            &["nutritional information", "nutritional info", "nutrition facts", "nutrition"],
        )
        .or_else(|| {
            self.labeled_value(
                &document,
                &["nutritional information", "nutritional info", "nutrition facts", "nutrition"],
            )
        })
        .unwrap_or_default();

        let product_id = first_attr_or_text(root, &sel.product_id, "data-product-id")
            .or_else(|| self.labeled_value(&document, &["product id", "item code"]))
            .unwrap_or_default();
        let sku = first_attr_or_text(root, &sel.sku, "data-sku")
            .or_else(|| self.labeled_value(&document, &["sku"]))
            .unwrap_or_default();

        let availability_text = first_attr_or_text(root, &sel.availability, "content")
            .or_else(|| find_phrase(&full_text, &OUT_OF_STOCK_PHRASES))
            .unwrap_or_default();

        DetailFields {
            name,
            description: first_attr_or_text(root, &sel.description, "content").unwrap_or_default(),
            price_text: first_text(root, &sel.price),
            struck_price_text: first_text(root, &sel.struck_price),
            image_url: first_image(root, &sel.image, &page.url),
            brand: first_text(root, &sel.brand),
            breadcrumb_category: self.breadcrumb_category(&document),
            ingredients,
            nutritional_info,
            cooking_instructions: self
                .labeled_value(&document, &["cooking instructions", "how to cook", "cooking"])
                .unwrap_or_default(),
            thawing_instructions: self
                .labeled_value(&document, &["thawing instructions", "thawing"])
                .unwrap_or_default(),
            product_id,
            sku,
            rating: first_attr_or_text(root, &sel.rating, "content").unwrap_or_default(),
            review_count: first_attr_or_text(root, &sel.review_count, "content").unwrap_or_default(),
            availability_text,
            full_text,
        }
    }

    /// Applies the card selector candidates in order; the first that yields
    /// at least one plausible card wins.
    fn find_cards<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        for selector in &self.card_selectors {
            let matched: Vec<ElementRef<'a>> = document
                .select(selector)
                .filter(|element| self.looks_like_card(*element))
                .collect();

            let cards = outermost(self.without_containers(matched));
            if !cards.is_empty() {
                debug!(selector = ?selector, count = cards.len(), "Card selector matched");
                return cards;
            }
        }
        Vec::new()
    }

    /// Drops matches that wrap other matches linking to different products.
    /// Broad selectors such as `[class*='item']` hit both `ul.items` and its
    /// `li.item` rows; the rows are the cards.
    fn without_containers<'a>(&self, matched: Vec<ElementRef<'a>>) -> Vec<ElementRef<'a>> {
        let ids: HashSet<_> = matched.iter().map(|e| e.id()).collect();
        let holds_several_cards = |element: ElementRef<'a>| {
            let mut links = HashSet::new();
            element
                .descendants()
                .skip(1)
                .filter(|node| ids.contains(&node.id()))
                .filter_map(ElementRef::wrap)
                .filter_map(|inner| self.card_href(inner))
                .any(|href| links.insert(href) && links.len() > 1)
        };

        matched
            .iter()
            .copied()
            .filter(|element| !holds_several_cards(*element))
            .collect()
    }

    /// The card's first link target, fragment stripped.
    fn card_href<'a>(&self, element: ElementRef<'a>) -> Option<&'a str> {
        let href = if element.value().name() == "a" {
            element.value().attr("href")
        } else {
            element
                .select(&self.card.link)
                .find_map(|a| a.value().attr("href"))
        }?;
        href.split('#').next()
    }

    /// A card links somewhere or shows a price.
    fn looks_like_card(&self, element: ElementRef) -> bool {
        if element.value().name() == "a" && element.value().attr("href").is_some() {
            return true;
        }
        element.select(&self.card.link).next().is_some()
            || element.text().any(|t| t.contains('₹') || t.contains("Rs"))
    }

    fn extract_card(&self, card: ElementRef, base: &Url) -> RawProductFields {
        let sel = &self.card;

        let mut name = first_text(card, &sel.name);
        if name.is_empty() {
            name = card
                .select(&sel.link)
                .find_map(|a| a.value().attr("title").map(str::to_string))
                .or_else(|| {
                    sel.image
                        .iter()
                        .flat_map(|selector| card.select(selector))
                        .find_map(|img| img.value().attr("alt").map(str::to_string))
                })
                .or_else(|| {
                    card.select(&sel.link)
                        .map(element_text)
                        .find(|t| !t.is_empty())
                })
                .unwrap_or_default();
        }

        let price_text = sel
            .price
            .iter()
            .find_map(|selector| {
                let texts: Vec<String> = card
                    .select(selector)
                    .map(element_text)
                    .filter(|t| !t.is_empty())
                    .collect();
                (!texts.is_empty()).then(|| texts.join(" "))
            })
            .unwrap_or_default();

        let page_url = if card.value().name() == "a" {
            card.value().attr("href").and_then(|href| resolve(base, href))
        } else {
            card.select(&sel.link)
                .filter_map(|a| a.value().attr("href"))
                .find_map(|href| resolve(base, href))
        }
        .unwrap_or_default();

        let card_text = element_text(card);
        let availability_text = first_text_opt(card, &sel.availability)
            .or_else(|| find_phrase(&card_text, &OUT_OF_STOCK_PHRASES))
            .unwrap_or_default();

        RawProductFields {
            name,
            category: String::new(),
            subcategory: String::new(),
            price_text,
            struck_price_text: first_text(card, &sel.struck_price),
            description: first_text(card, &sel.description),
            image_url: first_image(card, &sel.image, base),
            page_url,
            availability_text,
            badges: self.badges(card),
        }
    }

    fn badges(&self, card: ElementRef) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut badges = Vec::new();
        for selector in &self.card.badges {
            for element in card.select(selector) {
                let text = if element.value().name() == "img" {
                    element.value().attr("alt").unwrap_or_default().trim().to_string()
                } else {
                    element_text(element)
                };
                if text.chars().count() > 2 && seen.insert(text.to_lowercase()) {
                    badges.push(text);
                }
            }
        }
        badges
    }

    /// The second-to-last breadcrumb entry (the last is the product itself).
    fn breadcrumb_category(&self, document: &Html) -> String {
        for selector in &self.detail.breadcrumb {
            if let Some(trail) = document.select(selector).next() {
                let mut items: Vec<String> = trail
                    .select(&self.detail.breadcrumb_item)
                    .map(element_text)
                    .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("home"))
                    .collect();
                items.dedup();
                return match items.len() {
                    0 => String::new(),
                    1 | 2 => items[0].clone(),
                    n => items[n - 2].clone(),
                };
            }
        }
        String::new()
    }

    /// Finds `Label: value` text, or a label element followed by a value element.
    fn labeled_value(&self, document: &Html, labels: &[&str]) -> Option<String> {
        for element in document.select(&self.detail.label) {
            let text = own_text(element);
            for label in labels {
                let Some(rest) = strip_label(&text, label) else {
                    continue;
                };
                if !rest.is_empty() {
                    return Some(rest);
                }
                let sibling = element
                    .next_siblings()
                    .map(|node| match ElementRef::wrap(node) {
                        Some(el) => element_text(el),
                        None => node
                            .value()
                            .as_text()
                            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
                            .unwrap_or_default(),
                    })
                    .find(|t| !t.is_empty());
                if sibling.is_some() {
                    return sibling;
                }
            }
        }
        None
    }
}

/// Drops matches nested inside other matches.
fn outermost(elements: Vec<ElementRef<'_>>) -> Vec<ElementRef<'_>> {
    let ids: HashSet<_> = elements.iter().map(|e| e.id()).collect();
    elements
        .into_iter()
        .filter(|e| !e.ancestors().any(|a| ids.contains(&a.id())))
        .collect()
}

/// Visible text of an element with whitespace collapsed.
pub(crate) fn element_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the element's direct text children only.
fn own_text(element: ElementRef) -> String {
    element
        .children()
        .filter_map(|child| child.value().as_text().map(|t| t.to_string()))
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text_opt(scope: ElementRef, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|selector| {
        scope
            .select(selector)
            .map(element_text)
            .find(|t| !t.is_empty())
    })
}

fn first_text(scope: ElementRef, selectors: &[Selector]) -> String {
    first_text_opt(scope, selectors).unwrap_or_default()
}

/// Like [`first_text`], but prefers the named attribute (e.g. `content` on `<meta>`).
fn first_attr_or_text(scope: ElementRef, selectors: &[Selector], attr: &str) -> Option<String> {
    selectors.iter().find_map(|selector| {
        scope.select(selector).find_map(|element| {
            let value = element
                .value()
                .attr(attr)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| element_text(element));
            (!value.is_empty()).then_some(value)
        })
    })
}

/// Section text with a leading label (e.g. "Ingredients:") removed.
fn first_text_without_label(
    scope: ElementRef,
    selectors: &[Selector],
    labels: &[&str],
) -> Option<String> {
    selectors.iter().find_map(|selector| {
        scope.select(selector).find_map(|element| {
            let text = element_text(element);
            let value = labels
                .iter()
                .find_map(|label| strip_label(&text, label))
                .unwrap_or(text);
            (!value.is_empty()).then_some(value)
        })
    })
}

fn first_image(scope: ElementRef, selectors: &[Selector], base: &Url) -> String {
    selectors
        .iter()
        .find_map(|selector| {
            scope.select(selector).find_map(|element| {
                let value = element.value();
                ["src", "data-src", "data-lazy-src", "content"]
                    .iter()
                    .filter_map(|attr| value.attr(attr))
                    .find(|src| !src.trim().is_empty() && !src.starts_with("data:"))
                    .and_then(|src| resolve(base, src))
            })
        })
        .unwrap_or_default()
}

/// Resolves `href` against `base`, dropping fragments and non-navigable links.
pub(crate) fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    Some(url.to_string())
}

/// If `text` starts with `label` (ASCII case-insensitive), returns the rest
/// with separators trimmed.
fn strip_label(text: &str, label: &str) -> Option<String> {
    let head = text.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = &text[label.len()..];
    if rest.chars().next().is_some_and(|c| c.is_alphanumeric()) {
        return None;
    }
    Some(
        rest.trim_start_matches(|c: char| c == ':' || c == '-' || c.is_whitespace())
            .trim()
            .to_string(),
    )
}

fn find_phrase(text: &str, phrases: &[&str]) -> Option<String> {
    let lower = text.to_lowercase();
    phrases
        .iter()
        .find(|phrase| lower.contains(*phrase))
        .map(|phrase| phrase.to_string())
}

/// "Walnut Brownie | Shop" / "Walnut Brownie Wholesalers in ..." -> "Walnut Brownie".
fn strip_title_suffix(title: &str) -> String {
    let cut = [" | ", " - ", " Wholesalers"]
        .iter()
        .filter_map(|sep| title.find(sep))
        .min()
        .unwrap_or(title.len());
    title[..cut].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, html: &str) -> PageContent {
        PageContent {
            url: Url::parse(url).unwrap(),
            html: html.to_string(),
            status: 200,
        }
    }

    const LISTING: &str = r#"
        <html><body>
          <div class="grid">
            <div class="product-card">
              <a href="/in/walnut-brownie"><img src="/images/products/walnut.jpg" alt="Walnut Brownie"></a>
              <h3 class="product-name">Walnut Brownie (80 gm/pc), 720 gm (Frozen)</h3>
              <div class="price"><span class="current">₹190</span> <s>₹220</s></div>
              <p class="desc">Rich &amp; fudgy, handcrafted.</p>
              <span class="badge">Bestseller</span>
            </div>
            <div class="product-card">
              <a href="https://shop.test/in/veg-burger-patty#reviews" title="Veg Burger Patty"></a>
              <div class="price">₹310</div>
              <div class="stock-label">Out of stock</div>
            </div>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_listing_cards_are_extracted() {
        let extractor = ProductExtractor::default();
        let products = extractor.extract_products(&page("https://shop.test/in/desserts", LISTING));

        assert_eq!(products.len(), 2);

        let brownie = &products[0];
        assert_eq!(brownie.name, "Walnut Brownie (80 gm/pc), 720 gm (Frozen)");
        assert_eq!(brownie.page_url, "https://shop.test/in/walnut-brownie");
        assert_eq!(brownie.image_url, "https://shop.test/images/products/walnut.jpg");
        assert!(brownie.price_text.contains("₹190"));
        assert!(brownie.price_text.contains("₹220"));
        assert_eq!(brownie.struck_price_text, "₹220");
        assert_eq!(brownie.description, "Rich & fudgy, handcrafted.");
        assert_eq!(brownie.badges, vec!["Bestseller".to_string()]);
        assert_eq!(brownie.availability_text, "");

        let patty = &products[1];
        assert_eq!(patty.name, "Veg Burger Patty");
        assert_eq!(patty.page_url, "https://shop.test/in/veg-burger-patty");
        assert_eq!(patty.description, "");
        assert_eq!(patty.image_url, "");
        assert_eq!(patty.availability_text, "Out of stock");
    }

    #[test]
    fn test_later_candidates_used_when_earlier_miss() {
        let html = r#"
            <ul>
              <li class="item"><a href="/p/1">Paneer Block 1 Kg</a><span>₹420</span></li>
              <li class="item"><a href="/p/2">Malai Paneer 200 gm</a><span>₹95</span></li>
            </ul>
        "#;
        let extractor = ProductExtractor::default();
        let products = extractor.extract_products(&page("https://shop.test/in/paneer", html));
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].name, "Paneer Block 1 Kg");
        assert_eq!(products[1].page_url, "https://shop.test/p/2");
    }

    #[test]
    fn test_custom_card_selectors() {
        let html = r#"<section><div class="tile"><a href="/x">X</a></div></section>"#;
        let extractor = ProductExtractor::new(["div.tile"]);
        assert_eq!(extractor.count_product_nodes(html), 1);
        assert_eq!(extractor.count_product_nodes("<html><body></body></html>"), 0);
    }

    #[test]
    fn test_nested_matches_are_collapsed() {
        let html = r#"
            <div class="product-wrapper">
              <div class="product-inner"><a href="/p/1">One</a></div>
            </div>
        "#;
        let extractor = ProductExtractor::new(["div[class*='product']"]);
        assert_eq!(extractor.count_product_nodes(html), 1);
    }

    #[test]
    fn test_product_containers_do_not_swallow_their_cards() {
        let html = r#"
            <div class="products">
              <div class="product-tile"><a href="/p/a">Alpha Cheese 200 gm</a><span class="price">₹120</span></div>
              <div class="product-tile"><a href="/p/b">Bravo Butter 500 gm</a><span class="price">₹260</span></div>
              <div class="product-tile"><a href="/p/c">Charlie Cream 1 ltr</a><span class="price">₹310</span></div>
            </div>
        "#;
        let extractor = ProductExtractor::default();
        let products = extractor.extract_products(&page("https://shop.test/in/dairy", html));

        assert_eq!(products.len(), 3);
        assert_eq!(products[0].name, "Alpha Cheese 200 gm");
        assert_eq!(products[0].page_url, "https://shop.test/p/a");
        assert_eq!(products[0].price_text, "₹120");
        assert_eq!(products[2].page_url, "https://shop.test/p/c");
    }

    #[test]
    fn test_item_list_yields_one_record_per_row() {
        let html = r#"
            <ul class="items">
              <li class="item"><a href="/p/1">Paneer Block 1 Kg</a><span>₹420</span></li>
              <li class="item"><a href="/p/2#reviews">Malai Paneer 200 gm</a><span>₹95</span></li>
            </ul>
        "#;
        let extractor = ProductExtractor::default();
        let products = extractor.extract_products(&page("https://shop.test/in/paneer", html));

        assert_eq!(products.len(), 2);
        assert_eq!(products[1].name, "Malai Paneer 200 gm");
    }

    #[test]
    fn test_card_with_inner_matches_stays_whole() {
        let html = r#"
            <div class="product-box">
              <a href="/p/1"><img src="/i/1.jpg" alt="Gouda"></a>
              <div class="product-name"><a href="/p/1#top">Gouda Wheel 2 kg</a></div>
              <div class="product-price">₹1,450</div>
            </div>
        "#;
        let extractor = ProductExtractor::new(["div[class*='product']"]);
        let products = extractor.extract_products(&page("https://shop.test/in/cheese", html));

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "Gouda Wheel 2 kg");
        assert_eq!(products[0].price_text, "₹1,450");
    }

    #[test]
    fn test_detail_fields() {
        let html = r#"
            <html>
              <head>
                <title>Walnut Brownie Wholesalers in India</title>
                <meta name="description" content="A dense walnut brownie.">
              </head>
              <body>
                <nav class="breadcrumb"><a>Home</a> &gt; <a>Desserts</a> &gt; <a>Walnut Brownie</a></nav>
                <h1>Walnut Brownie 720 gm</h1>
                <div data-product-id="HP-1042" class="price">₹190 <del>₹220</del></div>
                <div class="brand-name">Hyperpure</div>
                <h3>Ingredients</h3>
                <p>Refined flour, sugar, walnuts (12%), cocoa</p>
                <p><strong>Nutritional Info:</strong> Energy 450 kcal per 100 g</p>
                <h4>Thawing Instructions</h4>
                <div>Thaw in refrigerator for 2 hours before serving.</div>
                <span class="rating">4.5 out of 5</span>
                <span class="review-count">(128 reviews)</span>
              </body>
            </html>
        "#;
        let extractor = ProductExtractor::default();
        let detail = extractor.extract_detail(&page("https://shop.test/in/walnut-brownie", html));

        assert_eq!(detail.name, "Walnut Brownie 720 gm");
        assert_eq!(detail.description, "A dense walnut brownie.");
        assert_eq!(detail.breadcrumb_category, "Desserts");
        assert_eq!(detail.product_id, "HP-1042");
        assert_eq!(detail.brand, "Hyperpure");
        assert_eq!(detail.struck_price_text, "₹220");
        assert!(detail.price_text.contains("₹190"));
        assert_eq!(detail.ingredients, "Refined flour, sugar, walnuts (12%), cocoa");
        assert_eq!(detail.nutritional_info, "Energy 450 kcal per 100 g");
        assert_eq!(
            detail.thawing_instructions,
            "Thaw in refrigerator for 2 hours before serving."
        );
        assert_eq!(detail.cooking_instructions, "");
        assert_eq!(detail.rating, "4.5 out of 5");
        assert_eq!(detail.review_count, "(128 reviews)");
        assert!(detail.full_text.contains("Walnut Brownie 720 gm"));
    }

    #[test]
    fn test_detail_name_falls_back_to_title() {
        let html = "<html><head><title>Malai Paneer | Shop</title></head><body></body></html>";
        let detail = ProductExtractor::default().extract_detail(&page("https://shop.test/p/1", html));
        assert_eq!(detail.name, "Malai Paneer");
        assert_eq!(detail.ingredients, "");
    }

    #[test]
    fn test_resolve_skips_non_links() {
        let base = Url::parse("https://shop.test/in/a/").unwrap();
        assert_eq!(resolve(&base, "javascript:void(0)"), None);
        assert_eq!(resolve(&base, "#top"), None);
        assert_eq!(resolve(&base, "b?x=1#frag").as_deref(), Some("https://shop.test/in/a/b?x=1"));
    }

    #[test]
    fn test_strip_label() {
        assert_eq!(strip_label("Ingredients: milk", "ingredients").as_deref(), Some("milk"));
        assert_eq!(strip_label("INGREDIENTS", "ingredients").as_deref(), Some(""));
        assert_eq!(strip_label("Ingredientsx", "ingredients"), None);
        assert_eq!(strip_label("Cook", "cooking"), None);
    }
}
