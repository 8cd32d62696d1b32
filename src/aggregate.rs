use chrono::{DateTime, FixedOffset};
use url::Url;

use crate::config::{self, PREORDER_LABEL, SiteConfig};
use crate::error::Result;
use crate::extract::{self, Listing};
use crate::fetch::Fetcher;
use crate::model::{CategoryFailure, CategoryResult, RunResult};
use crate::normalize::{self, RecencyWindow};

pub const PREORDER_CODE: &str = "preorder";

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub include_preorders: bool,
    pub window: RecencyWindow,
}

/// Drives fetch, extract and normalize for each requested listing, one at a time.
pub struct Aggregator<'a, F: Fetcher> {
    fetcher: &'a F,
    site: &'a SiteConfig,
}

impl<'a, F: Fetcher> Aggregator<'a, F> {
    pub fn new(fetcher: &'a F, site: &'a SiteConfig) -> Self {
        Self { fetcher, site }
    }

    /// Every code is validated before the first request. Per-listing network
    /// and extraction failures are recorded in [`RunResult::failures`].
    pub fn run<S: AsRef<str>>(
        &self,
        codes: &[S],
        options: &RunOptions,
        generated_at: DateTime<FixedOffset>,
    ) -> Result<RunResult> {
        let categories = config::resolve_categories(codes)?;

        let mut listings = Vec::with_capacity(categories.len() + 1);
        for category in &categories {
            let listing = Listing {
                code: category.code,
                label: category.label,
                is_preorder: false,
            };
            listings.push((listing, self.site.new_books_url(category)?));
        }
        if options.include_preorders {
            let listing = Listing {
                code: PREORDER_CODE,
                label: PREORDER_LABEL,
                is_preorder: true,
            };
            listings.push((listing, self.site.preorder_url()?));
        }

        let mut result = RunResult {
            generated_at,
            categories: Vec::with_capacity(categories.len()),
            preorders: None,
            failures: Vec::new(),
            warnings: Vec::new(),
        };

        for (idx, (listing, url)) in listings.into_iter().enumerate() {
            if idx > 0 && !self.site.request_delay.is_zero() {
                std::thread::sleep(self.site.request_delay);
            }

            tracing::info!(category = listing.code, label = listing.label, %url, "fetch listing");
            match self.scrape_listing(listing, &url, &options.window) {
                Ok((section, warnings)) => {
                    result.warnings.extend(warnings);
                    if listing.is_preorder {
                        result.preorders = Some(section);
                    } else {
                        result.categories.push(section);
                    }
                }
                Err(err) if err.is_recoverable() => {
                    tracing::warn!(category = listing.code, label = listing.label, %err, "listing failed; continuing");
                    result.failures.push(CategoryFailure {
                        category_code: listing.code.to_owned(),
                        category_label: listing.label.to_owned(),
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            books = result.total_books(),
            categories = result.categories.len(),
            failures = result.failures.len(),
            skipped_items = result.warnings.len(),
            "scrape finished"
        );
        Ok(result)
    }

    fn scrape_listing(
        &self,
        listing: Listing<'_>,
        url: &Url,
        window: &RecencyWindow,
    ) -> Result<(CategoryResult, Vec<String>)> {
        let markup = self.fetcher.fetch(url)?;
        let extracted = extract::extract(&markup, listing, &self.site.base_url)?;
        let books = normalize::normalize(extracted.entries, window);

        let section = CategoryResult {
            category_code: listing.code.to_owned(),
            category_label: listing.label.to_owned(),
            books,
        };
        Ok((section, extracted.warnings))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;
    use crate::error::Error;

    struct FakeFetcher {
        pages: HashMap<String, String>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(pages: &[(&str, String)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, body)| ((*url).to_owned(), body.clone()))
                    .collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Fetcher for FakeFetcher {
        fn fetch(&self, url: &Url) -> Result<String> {
            self.calls.borrow_mut().push(url.to_string());
            self.pages
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| Error::Network {
                    url: url.to_string(),
                    message: "connection refused".to_owned(),
                })
        }
    }

    fn listing_page(heading: &str, books: &[(&str, &str)]) -> String {
        let items = books
            .iter()
            .map(|(id, date)| {
                format!(
                    r#"<div class="item"><h4><a href="/products/{id}">Book {id}</a></h4>
                    <ul><li class="info">出版日期：{date}</li></ul></div>"#
                )
            })
            .collect::<String>();
        format!(r#"<html><body><div class="mod_a"><h3>{heading}</h3>{items}</div></body></html>"#)
    }

    fn site() -> SiteConfig {
        let mut site = SiteConfig::new("https://books.test").expect("site");
        site.request_delay = Duration::ZERO;
        site
    }

    fn options(include_preorders: bool) -> RunOptions {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).expect("date");
        RunOptions {
            include_preorders,
            window: RecencyWindow::new(7, today),
        }
    }

    fn generated_at() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2026-03-10T08:00:00+08:00").expect("timestamp")
    }

    #[test]
    fn output_order_follows_request_order() -> anyhow::Result<()> {
        let fetcher = FakeFetcher::new(&[
            (
                "https://books.test/web/books_nbtopm_02",
                listing_page("近期新書", &[("a", "2026-03-09")]),
            ),
            (
                "https://books.test/web/books_nbtopm_19",
                listing_page("近期新書", &[("b", "2026-03-08")]),
            ),
        ]);
        let site = site();
        let run = Aggregator::new(&fetcher, &site).run(&["19", "02"], &options(false), generated_at())?;

        let codes = run
            .categories
            .iter()
            .map(|c| c.category_code.as_str())
            .collect::<Vec<_>>();
        assert_eq!(codes, vec!["19", "02"]);
        assert_eq!(run.categories[0].category_label, "電腦資訊");
        assert!(run.preorders.is_none());
        Ok(())
    }

    #[test]
    fn one_failed_category_does_not_abort_the_run() -> anyhow::Result<()> {
        let fetcher = FakeFetcher::new(&[(
            "https://books.test/web/books_nbtopm_02",
            listing_page("近期新書", &[("a", "2026-03-09")]),
        )]);
        let site = site();
        let run = Aggregator::new(&fetcher, &site).run(&["19", "02"], &options(false), generated_at())?;

        assert_eq!(run.categories.len(), 1);
        assert_eq!(run.categories[0].category_code, "02");
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].category_code, "19");
        assert!(!run.all_failed());
        Ok(())
    }

    #[test]
    fn page_without_listing_block_is_recorded_as_failure() -> anyhow::Result<()> {
        let fetcher = FakeFetcher::new(&[(
            "https://books.test/web/books_nbtopm_02",
            "<html><body>系統維護中</body></html>".to_owned(),
        )]);
        let site = site();
        let run = Aggregator::new(&fetcher, &site).run(&["02"], &options(false), generated_at())?;

        assert!(run.categories.is_empty());
        assert!(run.all_failed());
        assert!(run.failures[0].message.contains("extraction"));
        Ok(())
    }

    #[test]
    fn skipped_items_are_kept_in_the_run() -> anyhow::Result<()> {
        let page = r#"<html><body><div class="mod_a"><h3>近期新書</h3>
            <div class="item"><h4>No link</h4></div>
            <div class="item"><h4><a href="/products/ok">Book ok</a></h4>
            <ul><li class="info">出版日期：2026-03-09</li></ul></div>
            </div></body></html>"#;
        let fetcher = FakeFetcher::new(&[("https://books.test/web/books_nbtopm_02", page.to_owned())]);
        let site = site();
        let run = Aggregator::new(&fetcher, &site).run(&["02"], &options(false), generated_at())?;

        assert_eq!(run.categories[0].books.len(), 1);
        assert_eq!(run.warnings.len(), 1);
        assert!(run.warnings[0].contains("category 02"));
        assert!(run.failures.is_empty());
        Ok(())
    }

    #[test]
    fn invalid_code_fails_before_any_fetch() {
        let fetcher = FakeFetcher::new(&[]);
        let site = site();
        let err = Aggregator::new(&fetcher, &site)
            .run(&["02", "99"], &options(true), generated_at())
            .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
        assert!(fetcher.calls.borrow().is_empty());
    }

    #[test]
    fn preorders_are_tagged_and_unfiltered() -> anyhow::Result<()> {
        let fetcher = FakeFetcher::new(&[
            (
                "https://books.test/web/books_nbtopm_02",
                listing_page("近期新書", &[("old", "2025-01-01"), ("new", "2026-03-10")]),
            ),
            (
                "https://books.test/web/sys_prebooks/books/",
                listing_page("預購書", &[("soon", "2026-06-01")]),
            ),
        ]);
        let site = site();
        let run = Aggregator::new(&fetcher, &site).run(&["02"], &options(true), generated_at())?;

        assert_eq!(run.categories[0].books.len(), 1);
        assert_eq!(run.categories[0].books[0].title, "Book new");

        let preorders = run.preorders.as_ref().expect("preorders");
        assert_eq!(preorders.category_code, PREORDER_CODE);
        assert_eq!(preorders.books.len(), 1);
        assert!(preorders.books[0].is_preorder);
        assert_eq!(fetcher.calls.borrow().len(), 2);
        Ok(())
    }
}
