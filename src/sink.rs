use crate::{ProductRecord, Result};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Output header, in column order.
pub const CSV_COLUMNS: [&str; 21] = [
    "product_name",
    "category",
    "subcategory",
    "price_current",
    "price_original",
    "discount_percentage",
    "product_description",
    "product_image_url",
    "product_page_url",
    "availability_status",
    "brand_name",
    "unit_size",
    "packaging_type",
    "nutritional_info",
    "ingredients",
    "product_id",
    "sku_code",
    "rating",
    "review_count",
    "tags",
    "scraped_timestamp",
];

pub const TAG_DELIMITER: &str = ";";

/// One CSV line. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvRow {
    pub product_name: String,
    pub category: String,
    pub subcategory: String,
    pub price_current: String,
    pub price_original: String,
    pub discount_percentage: String,
    pub product_description: String,
    pub product_image_url: String,
    pub product_page_url: String,
    pub availability_status: String,
    pub brand_name: String,
    pub unit_size: String,
    pub packaging_type: String,
    pub nutritional_info: String,
    pub ingredients: String,
    pub product_id: String,
    pub sku_code: String,
    pub rating: String,
    pub review_count: String,
    pub tags: String,
    pub scraped_timestamp: String,
}

impl CsvRow {
    /// Cell values in column order.
    pub fn values(&self) -> [&str; 21] {
        [
            &self.product_name,
            &self.category,
            &self.subcategory,
            &self.price_current,
            &self.price_original,
            &self.discount_percentage,
            &self.product_description,
            &self.product_image_url,
            &self.product_page_url,
            &self.availability_status,
            &self.brand_name,
            &self.unit_size,
            &self.packaging_type,
            &self.nutritional_info,
            &self.ingredients,
            &self.product_id,
            &self.sku_code,
            &self.rating,
            &self.review_count,
            &self.tags,
            &self.scraped_timestamp,
        ]
    }
}

impl From<&ProductRecord> for CsvRow {
    fn from(record: &ProductRecord) -> Self {
        Self {
            product_name: record.name.clone(),
            category: record.category.clone(),
            subcategory: record.subcategory.clone(),
            price_current: record.price_current.clone(),
            price_original: record.price_original.clone(),
            discount_percentage: record.discount_percentage.clone(),
            product_description: record.description.clone(),
            product_image_url: record.image_url.clone(),
            product_page_url: record.page_url.clone(),
            availability_status: record.availability_status.clone(),
            brand_name: record.brand.clone(),
            unit_size: record.unit_size.clone(),
            packaging_type: record.packaging_type.clone(),
            nutritional_info: record.nutritional_info.clone(),
            ingredients: record.ingredients.clone(),
            product_id: record.product_id.clone(),
            sku_code: record.sku.clone(),
            rating: record.rating.clone(),
            review_count: record.review_count.clone(),
            tags: record.tags.join(TAG_DELIMITER),
            scraped_timestamp: record
                .scraped_at
                .to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

/// The run's in-progress output, unique by page URL.
///
/// The first record seen for a URL keeps its position and its non-blank
/// values; later records for the same URL only fill its blanks.
#[derive(Debug, Default)]
pub struct RecordSet {
    records: Vec<ProductRecord>,
    by_url: HashMap<String, usize>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `record`, or merges it into the existing record with the same
    /// page URL. Returns `true` if a new row was added.
    pub fn insert(&mut self, record: ProductRecord) -> bool {
        let key = record.page_url.trim().to_string();
        if key.is_empty() {
            self.records.push(record);
            return true;
        }

        match self.by_url.get(&key) {
            Some(&index) => {
                debug!(url = %key, "Merging duplicate product into first-seen row");
                self.records[index].fill_blanks_from(&record);
                false
            }
            None => {
                self.by_url.insert(key, self.records.len());
                self.records.push(record);
                true
            }
        }
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.by_url.contains_key(url.trim())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    /// Number of non-blank cells per column.
    pub fn fill_counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts = [0usize; 21];
        for record in &self.records {
            let row = CsvRow::from(record);
            for (count, value) in counts.iter_mut().zip(row.values()) {
                if !value.trim().is_empty() {
                    *count += 1;
                }
            }
        }
        CSV_COLUMNS.into_iter().zip(counts).collect()
    }
}

/// Writes records to a UTF-8 CSV file with the fixed column order.
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writes the header and one row per record, replacing any existing file.
    ///
    /// The header is written even when there are no records.
    pub fn write(&self, records: &RecordSet) -> Result<usize> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&self.path)?;
        writer.write_record(CSV_COLUMNS)?;
        for record in records.records() {
            writer.serialize(CsvRow::from(record))?;
        }
        writer.flush()?;

        info!(path = %self.path.display(), rows = records.len(), "Wrote CSV");
        Ok(records.len())
    }

    /// Reads back a file produced by [`CsvSink::write`].
    pub fn read(path: impl AsRef<Path>) -> Result<Vec<CsvRow>> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize::<CsvRow>()
            .collect::<std::result::Result<Vec<_>, csv::Error>>()?;
        Ok(rows)
    }

    /// Reads the header line of a written file.
    pub fn read_header(path: impl AsRef<Path>) -> Result<Vec<String>> {
        let mut reader = csv::Reader::from_path(path)?;
        Ok(reader.headers()?.iter().map(str::to_string).collect())
    }
}
