use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// One listing item as it appears in the page, before dates are parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBookEntry {
    pub title: String,
    pub source_url: String,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub raw_date: Option<String>,
    pub price: Option<u32>,
    pub discount: Option<u8>,
    pub cover_image_url: Option<String>,
    pub category: String,
    pub is_preorder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image_url: Option<String>,
    pub category: String,
    pub source_url: String,
    #[serde(default)]
    pub is_preorder: bool,
}

impl Book {
    /// `79折 379元`, or `379元` without a discount.
    pub fn price_label(&self) -> Option<String> {
        let price = self.price?;
        Some(match self.discount {
            Some(discount) => format!("{discount}折 {price}元"),
            None => format!("{price}元"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category_code: String,
    pub category_label: String,
    pub books: Vec<Book>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFailure {
    pub category_code: String,
    pub category_label: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub generated_at: DateTime<FixedOffset>,
    pub categories: Vec<CategoryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preorders: Option<CategoryResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<CategoryFailure>,
    /// Listing items that could not be read and were left out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunResult {
    /// Category results in output order, pre-orders last.
    pub fn sections(&self) -> impl Iterator<Item = &CategoryResult> {
        self.categories.iter().chain(self.preorders.iter())
    }

    pub fn total_books(&self) -> usize {
        self.sections().map(|section| section.books.len()).sum()
    }

    /// True when listings were requested and none of them could be scraped.
    pub fn all_failed(&self) -> bool {
        !self.failures.is_empty() && self.categories.is_empty() && self.preorders.is_none()
    }

    pub fn date(&self) -> NaiveDate {
        self.generated_at.date_naive()
    }
}
