use crate::{DetailFields, ProductRecord, RawProductFields, ScraperError};
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, instrument};
use url::Url;

/// Feature keywords turned into tags, in output order.
const TAG_VOCABULARY: [(&str, &str); 7] = [
    ("Premium", r"(?i)\bpremium\b"),
    ("Imported", r"(?i)\bimported\b"),
    ("Handcrafted", r"(?i)\bhand[\s-]?crafted\b"),
    ("Organic", r"(?i)\borganic\b"),
    ("Eggless", r"(?i)\beggless\b"),
    ("Vegan", r"(?i)\bvegan\b"),
    ("Frozen", r"(?i)\bfrozen\b"),
];

/// Storage/packaging classes; the first one mentioned wins.
const PACKAGING_TYPES: [(&str, &str); 5] = [
    ("Frozen", r"(?i)\bfrozen\b"),
    ("Fresh", r"(?i)\bfresh\b"),
    ("Chilled", r"(?i)\bchilled\b"),
    ("Ambient", r"(?i)\bambient\b"),
    ("Dry", r"(?i)\bdry\b"),
];

/// Pack-size patterns, tried in order. Each captures (amount, unit).
/// Amounts may carry thousands separators ("1,000 gm").
const UNIT_PATTERNS: [&str; 4] = [
    // "Walnut Brownie (80 gm/pc), 720 gm" - the size after the comma is the pack size.
    // The comma must not sit between digits.
    r"(?i)(?:^|\D),\s*(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s*(kg|gm|g|ml|ltr|litre|l|pcs|pc)\b",
    // A size closing the name or followed by a parenthesised note.
    r"(?i)\b(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s*(kg|gm|g|ml|ltr|litre|l)\s*(?:\(|,|$)",
    r"(?i)\((\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s*(kg|gm|g|ml|ltr|l)\)",
    r"(?i)\b(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s*(kg|gms|gm|grams|gram|g|ml|ltr|litres|litre|liters|liter|l|pcs|pc|pieces|piece|packs|pack)\b",
];

const CURRENCY_AMOUNT: &str =
    r"(?i)(?:₹|\brs\.?|\binr)\s*([0-9][0-9,]*(?:\.[0-9]+)?)|([0-9][0-9,]*(?:\.[0-9]+)?)\s*₹";

/// A parsed pair of listing prices.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PricePair {
    pub current: Option<f64>,
    pub original: Option<f64>,
}

impl PricePair {
    /// `(original - current) / original`, as a percentage with one decimal.
    ///
    /// Blank unless both prices are present and the original is the larger.
    pub fn discount_percentage(&self) -> String {
        match (self.current, self.original) {
            (Some(current), Some(original)) if original > current && current > 0.0 => {
                format!("{:.1}%", (original - current) / original * 100.0)
            }
            _ => String::new(),
        }
    }
}

/// The `RecordNormalizer` turns raw listing/detail fields into a [`ProductRecord`].
///
/// Nothing here fails: a value that cannot be parsed is left blank and logged.
pub struct RecordNormalizer {
    currency: Option<Regex>,
    unit_patterns: Vec<Regex>,
    tag_vocabulary: Vec<(&'static str, Regex)>,
    packaging_types: Vec<(&'static str, Regex)>,
    number: Option<Regex>,
    default_brand: String,
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self {
            currency: Regex::new(CURRENCY_AMOUNT).ok(),
            unit_patterns: UNIT_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            tag_vocabulary: compile_labeled(&TAG_VOCABULARY[..]),
            packaging_types: compile_labeled(&PACKAGING_TYPES[..]),
            number: Regex::new(r"\d+(?:[.,]\d+)*").ok(),
            default_brand: String::new(),
        }
    }
}

impl RecordNormalizer {
    /// Uses `brand` for records whose pages name none.
    pub fn with_default_brand(mut self, brand: impl Into<String>) -> Self {
        self.default_brand = brand.into();
        self
    }

    /// Builds the output record for one product.
    ///
    /// Listing values always win; detail values only fill what the listing left
    /// blank.
    #[instrument(skip_all, fields(url = %raw.page_url))]
    pub fn normalize(
        &self,
        raw: &RawProductFields,
        detail: Option<&DetailFields>,
        scraped_at: DateTime<Utc>,
    ) -> ProductRecord {
        let (mut record, listing_prices) = self.from_listing(raw, scraped_at);
        let mut prices = listing_prices;

        if let Some(detail) = detail {
            let (detail_record, detail_prices) = self.from_detail(detail, scraped_at);
            record.fill_blanks_from(&detail_record);
            prices.current = prices.current.or(detail_prices.current);
            prices.original = prices.original.or(detail_prices.original);
        }

        record.price_current = prices.current.map(format_price).unwrap_or_default();
        record.price_original = prices.original.map(format_price).unwrap_or_default();
        record.discount_percentage = prices.discount_percentage();

        if record.sku.is_empty() {
            record.sku = sku_from_url(&record.page_url);
        }
        if record.availability_status.is_empty() {
            record.availability_status = String::from("In Stock");
        }
        if record.brand.is_empty() {
            record.brand = self.default_brand.clone();
        }
        if !record.packaging_type.is_empty()
            && !record.tags.iter().any(|t| t.eq_ignore_ascii_case(&record.packaging_type))
        {
            record.tags.push(record.packaging_type.clone());
        }

        record
    }

    fn from_listing(&self, raw: &RawProductFields, scraped_at: DateTime<Utc>) -> (ProductRecord, PricePair) {
        let mut record = ProductRecord::blank(scraped_at);
        record.name = clean_text(&raw.name);
        record.category = clean_text(&raw.category);
        record.subcategory = clean_text(&raw.subcategory);
        record.description = clean_text(&raw.description);
        record.image_url = raw.image_url.trim().to_string();
        record.page_url = raw.page_url.trim().to_string();
        record.availability_status = availability_status(&raw.availability_text);

        let searchable = format!("{} {}", record.name, record.description);
        record.unit_size = self.unit_size(&record.name, &record.description);
        record.packaging_type = self.packaging_type(&searchable);

        let mut tags: Vec<String> = raw.badges.iter().map(|b| clean_text(b)).collect();
        tags.extend(self.tags(&searchable));
        record.tags = dedup_tags(tags);

        let prices = self.price_pair(&raw.price_text, &raw.struck_price_text);
        if prices.current.is_none() && !raw.price_text.trim().is_empty() {
            let err = ScraperError::ParseError {
                url: raw.page_url.clone(),
                field: "price_current".into(),
            };
            debug!(text = %raw.price_text, "{}", err);
        }

        (record, prices)
    }

    fn from_detail(&self, detail: &DetailFields, scraped_at: DateTime<Utc>) -> (ProductRecord, PricePair) {
        let mut record = ProductRecord::blank(scraped_at);
        record.name = clean_text(&detail.name);
        record.category = clean_text(&detail.breadcrumb_category);
        record.description = clean_text(&detail.description);
        record.image_url = detail.image_url.trim().to_string();
        record.brand = clean_text(&detail.brand);
        record.ingredients = clean_text(&detail.ingredients);
        record.nutritional_info = clean_text(&detail.nutritional_info);
        record.product_id = clean_text(&detail.product_id);
        record.sku = clean_text(&detail.sku);
        record.rating = self.first_number(&detail.rating);
        record.review_count = self
            .first_number(&detail.review_count)
            .replace([',', '.'], "");
        record.availability_status = availability_status(&detail.availability_text);
        record.unit_size = self.unit_size(&record.name, &record.description);

        let searchable = format!(
            "{} {} {} {}",
            record.name,
            record.description,
            clean_text(&detail.thawing_instructions),
            clean_text(&detail.cooking_instructions),
        );
        record.packaging_type = self.packaging_type(&searchable);
        if record.packaging_type.is_empty() {
            record.packaging_type = self.packaging_type(&detail.full_text);
        }
        record.tags = dedup_tags(self.tags(&searchable));

        (record, self.price_pair(&detail.price_text, &detail.struck_price_text))
    }

    /// Extracts all positive currency amounts from `text`, in order, without duplicates.
    pub fn amounts(&self, text: &str) -> Vec<f64> {
        let Some(currency) = &self.currency else {
            return Vec::new();
        };
        let mut amounts: Vec<f64> = Vec::new();
        for caps in currency.captures_iter(text) {
            let Some(number) = caps.get(1).or_else(|| caps.get(2)) else {
                continue;
            };
            let Ok(value) = number.as_str().replace(',', "").parse::<f64>() else {
                continue;
            };
            if value > 0.0 && !amounts.iter().any(|a| (a - value).abs() < f64::EPSILON) {
                amounts.push(value);
            }
        }
        amounts
    }

    /// Splits a card's price text into current and original price.
    ///
    /// A struck-through amount is the original price; otherwise, with two
    /// amounts, the larger one is. Either way the original is never smaller.
    pub fn price_pair(&self, price_text: &str, struck_text: &str) -> PricePair {
        let struck = self.amounts(struck_text).into_iter().next();
        let amounts = self.amounts(price_text);

        let (first, second) = match struck {
            Some(original) => (
                amounts
                    .iter()
                    .copied()
                    .find(|a| (a - original).abs() >= f64::EPSILON),
                Some(original),
            ),
            None => (amounts.first().copied(), amounts.get(1).copied()),
        };

        match (first, second) {
            (Some(a), Some(b)) if a > b => PricePair {
                current: Some(b),
                original: Some(a),
            },
            (Some(a), Some(b)) => PricePair {
                current: Some(a),
                original: Some(b),
            },
            (Some(a), None) => PricePair {
                current: Some(a),
                original: None,
            },
            (None, Some(b)) => PricePair {
                current: Some(b),
                original: None,
            },
            (None, None) => PricePair::default(),
        }
    }

    /// The first pack size in the name, else in the description.
    pub fn unit_size(&self, name: &str, description: &str) -> String {
        [name, description]
            .iter()
            .find_map(|text| {
                self.unit_patterns.iter().find_map(|pattern| {
                    pattern
                        .captures(text)
                        .map(|caps| format!("{} {}", &caps[1], &caps[2]))
                })
            })
            .unwrap_or_default()
    }

    /// Vocabulary tags mentioned in `text`, in vocabulary order.
    pub fn tags(&self, text: &str) -> Vec<String> {
        self.tag_vocabulary
            .iter()
            .filter(|(_, pattern)| pattern.is_match(text))
            .map(|(label, _)| label.to_string())
            .collect()
    }

    pub fn packaging_type(&self, text: &str) -> String {
        self.packaging_types
            .iter()
            .filter_map(|(label, pattern)| pattern.find(text).map(|m| (m.start(), *label)))
            .min_by_key(|(start, _)| *start)
            .map(|(_, label)| label.to_string())
            .unwrap_or_default()
    }

    fn first_number(&self, text: &str) -> String {
        self.number
            .as_ref()
            .and_then(|re| re.find(text))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }
}

fn compile_labeled(table: &[(&'static str, &str)]) -> Vec<(&'static str, Regex)> {
    table
        .iter()
        .filter_map(|(label, pattern)| Regex::new(pattern).ok().map(|re| (*label, re)))
        .collect()
}

/// Collapses whitespace.
///
/// Input comes from the parsed DOM, where entities are already decoded; a
/// literal "&amp;" left in the text was written that way by the page.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `220.0` -> `₹220`, `99.5` -> `₹99.50`.
pub fn format_price(value: f64) -> String {
    if value.fract().abs() < f64::EPSILON {
        format!("₹{}", value as u64)
    } else {
        format!("₹{value:.2}")
    }
}

fn availability_status(text: &str) -> String {
    let lower = text.to_lowercase();
    if crate::extractor::OUT_OF_STOCK_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
        || lower.contains("outofstock")
    {
        String::from("Out of Stock")
    } else if lower.contains("in stock") || lower.contains("instock") || lower.contains("available") {
        String::from("In Stock")
    } else {
        String::new()
    }
}

/// The last path segment of a product URL, e.g. `.../in/walnut-brownie` -> `walnut-brownie`.
fn sku_from_url(page_url: &str) -> String {
    Url::parse(page_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .unwrap_or_default()
}

fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !tag.is_empty() && !out.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            out.push(tag);
        }
    }
    out
}
