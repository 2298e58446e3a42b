use chrono::{DateTime, Utc};
use url::Url;

/// A listing section of the site: its URL, its display name and, for
/// subcategories, the name of the enclosing category (empty otherwise).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRef {
    pub url: String,
    pub name: String,
    pub parent: String,
}

impl CategoryRef {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            parent: String::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = parent.into();
        self
    }

    /// The value for the record's `category` column.
    pub fn category(&self) -> &str {
        if self.parent.is_empty() {
            &self.name
        } else {
            &self.parent
        }
    }

    /// The value for the record's `subcategory` column.
    pub fn subcategory(&self) -> &str {
        if self.parent.is_empty() {
            ""
        } else {
            &self.name
        }
    }
}

/// One fetched HTML document.
#[derive(Debug, Clone)]
pub struct PageContent {
    /// The URL the document was served from (after redirects).
    pub url: Url,
    pub html: String,
    pub status: u16,
}

/// A listing page produced by the pagination walker.
#[derive(Debug, Clone)]
pub struct CategoryPage {
    pub category: CategoryRef,
    /// 1-based page number within the category.
    pub number: u32,
    pub content: PageContent,
}

/// Fields pulled from one product card on a listing page.
///
/// Every field is a string; a field the markup did not provide is empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProductFields {
    pub name: String,
    pub category: String,
    pub subcategory: String,
    /// All text of the card's price element, possibly holding two amounts.
    pub price_text: String,
    /// Text of a struck-through price inside the card, if any.
    pub struck_price_text: String,
    pub description: String,
    pub image_url: String,
    pub page_url: String,
    /// Stock notice text found on the card, e.g. "Out of stock".
    pub availability_text: String,
    /// Text of badge, tag or dietary elements, in document order.
    pub badges: Vec<String>,
}

/// Fields only a product's own page carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailFields {
    pub name: String,
    pub description: String,
    pub price_text: String,
    pub struck_price_text: String,
    pub image_url: String,
    pub brand: String,
    pub breadcrumb_category: String,
    pub ingredients: String,
    pub nutritional_info: String,
    pub cooking_instructions: String,
    pub thawing_instructions: String,
    pub product_id: String,
    pub sku: String,
    pub rating: String,
    pub review_count: String,
    pub availability_text: String,
    /// The page's whole visible text; the last place packaging keywords are looked for.
    pub full_text: String,
}

/// The fixed-schema output row.
///
/// Blank strings stand for values that could not be determined.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub name: String,
    pub category: String,
    pub subcategory: String,
    pub price_current: String,
    pub price_original: String,
    pub discount_percentage: String,
    pub description: String,
    pub image_url: String,
    pub page_url: String,
    pub availability_status: String,
    pub brand: String,
    pub unit_size: String,
    pub packaging_type: String,
    pub nutritional_info: String,
    pub ingredients: String,
    pub product_id: String,
    pub sku: String,
    pub rating: String,
    pub review_count: String,
    pub tags: Vec<String>,
    pub scraped_at: DateTime<Utc>,
}

impl ProductRecord {
    /// An all-blank record stamped with `scraped_at`.
    pub fn blank(scraped_at: DateTime<Utc>) -> Self {
        Self {
            name: String::new(),
            category: String::new(),
            subcategory: String::new(),
            price_current: String::new(),
            price_original: String::new(),
            discount_percentage: String::new(),
            description: String::new(),
            image_url: String::new(),
            page_url: String::new(),
            availability_status: String::new(),
            brand: String::new(),
            unit_size: String::new(),
            packaging_type: String::new(),
            nutritional_info: String::new(),
            ingredients: String::new(),
            product_id: String::new(),
            sku: String::new(),
            rating: String::new(),
            review_count: String::new(),
            tags: Vec::new(),
            scraped_at,
        }
    }

    /// Copies `other`'s values into the fields of `self` that are still blank.
    ///
    /// Non-blank fields are never overwritten, and `scraped_at` keeps the
    /// earlier stamp. Tags from `other` are appended if not already present.
    pub fn fill_blanks_from(&mut self, other: &ProductRecord) {
        fn fill(target: &mut String, source: &str) {
            if target.trim().is_empty() && !source.trim().is_empty() {
                *target = source.to_string();
            }
        }

        fill(&mut self.name, &other.name);
        fill(&mut self.category, &other.category);
        fill(&mut self.subcategory, &other.subcategory);
        fill(&mut self.price_current, &other.price_current);
        fill(&mut self.price_original, &other.price_original);
        fill(&mut self.discount_percentage, &other.discount_percentage);
        fill(&mut self.description, &other.description);
        fill(&mut self.image_url, &other.image_url);
        fill(&mut self.page_url, &other.page_url);
        fill(&mut self.availability_status, &other.availability_status);
        fill(&mut self.brand, &other.brand);
        fill(&mut self.unit_size, &other.unit_size);
        fill(&mut self.packaging_type, &other.packaging_type);
        fill(&mut self.nutritional_info, &other.nutritional_info);
        fill(&mut self.ingredients, &other.ingredients);
        fill(&mut self.product_id, &other.product_id);
        fill(&mut self.sku, &other.sku);
        fill(&mut self.rating, &other.rating);
        fill(&mut self.review_count, &other.review_count);

        for tag in &other.tags {
            if !self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                self.tags.push(tag.clone());
            }
        }
    }
}
