use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{Days, NaiveDate};
use regex::Regex;
use sha2::Digest as _;

use crate::model::{Book, RawBookEntry};

static DATE_PARTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})\s*[-/.年]\s*(\d{1,2})\s*[-/.月]\s*(\d{1,2})\s*日?$").expect("date regex")
});

/// What to do with non-preorder entries whose date is missing or unparseable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndatedPolicy {
    #[default]
    Drop,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyWindow {
    pub days: u32,
    pub today: NaiveDate,
    pub undated: UndatedPolicy,
}

impl RecencyWindow {
    pub fn new(days: u32, today: NaiveDate) -> Self {
        Self {
            days,
            today,
            undated: UndatedPolicy::default(),
        }
    }

    pub fn with_undated(mut self, undated: UndatedPolicy) -> Self {
        self.undated = undated;
        self
    }

    pub fn start(&self) -> NaiveDate {
        self.today
            .checked_sub_days(Days::new(u64::from(self.days)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Inclusive on both ends: `[today - days, today]`.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start() <= date && date <= self.today
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let caps = DATE_PARTS_RE.captures(raw.trim())?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Stable identifier over normalized (title, author, source url).
pub fn book_id(title: &str, author: Option<&str>, source_url: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(fold(title).as_bytes());
    hasher.update(b"\x1f");
    hasher.update(fold(author.unwrap_or_default()).as_bytes());
    hasher.update(b"\x1f");
    hasher.update(source_url.trim().trim_end_matches('/').as_bytes());
    let digest = hasher.finalize();
    format!("b_{}", hex::encode(&digest[..12]))
}

fn fold(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parses dates, drops duplicates and applies the recency window to
/// non-preorder entries. Duplicates are dropped before the window, so only the
/// first listing of a book is ever considered. Surviving entries keep input order.
pub fn normalize(entries: Vec<RawBookEntry>, window: &RecencyWindow) -> Vec<Book> {
    let mut seen = HashSet::new();
    let mut books = Vec::with_capacity(entries.len());
    let mut dropped_old = 0_usize;
    let mut dropped_undated = 0_usize;

    for entry in entries {
        let id = book_id(&entry.title, entry.author.as_deref(), &entry.source_url);
        if !seen.insert(id.clone()) {
            tracing::debug!(%id, title = %entry.title, "duplicate listing entry");
            continue;
        }

        let published_date = entry.raw_date.as_deref().and_then(parse_date);
        if let (Some(raw), None) = (entry.raw_date.as_deref(), published_date) {
            tracing::debug!(raw, title = %entry.title, "unparseable publication date");
        }

        if !entry.is_preorder {
            match published_date {
                Some(date) if !window.contains(date) => {
                    dropped_old += 1;
                    continue;
                }
                None if window.undated == UndatedPolicy::Drop => {
                    dropped_undated += 1;
                    continue;
                }
                _ => {}
            }
        }

        books.push(Book {
            id,
            title: entry.title,
            author: entry.author,
            publisher: entry.publisher,
            published_date,
            price: entry.price,
            discount: entry.discount,
            cover_image_url: entry.cover_image_url,
            category: entry.category,
            source_url: entry.source_url,
            is_preorder: entry.is_preorder,
        });
    }

    tracing::info!(
        kept = books.len(),
        outside_window = dropped_old,
        undated = dropped_undated,
        since = %window.start(),
        "filtered listing"
    );
    books
}
