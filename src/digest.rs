//! Email digest rendering.
//!
//! Output depends only on the [`RunResult`] and [`DigestOptions`], never on
//! the wall clock, so rendering the same run twice yields identical bytes.

use std::fmt::Write as _;

use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

use crate::model::{Book, CategoryResult, RunResult};
use crate::pages;

pub const DEFAULT_MAX_PER_CATEGORY: usize = 5;
pub const SUBJECT_PREFIX: &str = "博客來新書通知";

#[derive(Debug, Clone)]
pub struct DigestOptions {
    /// Public root of the published pages, e.g. `https://example.github.io/books`.
    pub pages_url: Option<String>,
    /// Page written for this run, relative to `pages_url`. Falls back to
    /// [`pages::snapshot_href`].
    pub snapshot_href: Option<String>,
    pub max_per_category: usize,
}

impl Default for DigestOptions {
    fn default() -> Self {
        Self {
            pages_url: None,
            snapshot_href: None,
            max_per_category: DEFAULT_MAX_PER_CATEGORY,
        }
    }
}

impl DigestOptions {
    fn pages_root(&self) -> Option<&str> {
        self.pages_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
    }

    fn full_list_url(&self, run: &RunResult) -> Option<String> {
        let href = self
            .snapshot_href
            .clone()
            .unwrap_or_else(|| pages::snapshot_href(run));
        self.pages_root().map(|root| format!("{root}/{href}"))
    }
}

pub fn subject(run: &RunResult) -> String {
    format!("{SUBJECT_PREFIX} - {}", run.date().format("%Y-%m-%d"))
}

pub fn render_email(run: &RunResult, options: &DigestOptions) -> String {
    let full_list_url = options.full_list_url(run);
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"></head>\n");
    html.push_str(
        "<body style=\"font-family:sans-serif;max-width:800px;margin:auto;padding:16px;\">\n",
    );
    let _ = writeln!(
        html,
        "<h1 style=\"color:#333;margin-bottom:4px;\">{}</h1>",
        text(SUBJECT_PREFIX)
    );
    let _ = writeln!(
        html,
        "<p style=\"color:#666;margin-bottom:12px;\">{} ・ 共 {} 本書</p>",
        run.date().format("%Y-%m-%d"),
        run.total_books()
    );
    if let Some(url) = &full_list_url {
        let _ = writeln!(
            html,
            "<p style=\"margin-bottom:20px;\"><a href=\"{}\" style=\"display:inline-block;\
background:#e63946;color:#fff;padding:8px 20px;border-radius:4px;text-decoration:none;\
font-weight:bold;\">查看完整書單</a></p>",
            attr(url)
        );
    }

    for section in run.sections() {
        render_section(&mut html, section, options, full_list_url.as_deref());
    }

    if !run.failures.is_empty() {
        html.push_str("<p style=\"font-size:12px;color:#b00;\">未能取得：");
        let names = run
            .failures
            .iter()
            .map(|f| format!("{}（{}）", text(&f.category_label), text(&f.category_code)))
            .collect::<Vec<_>>();
        html.push_str(&names.join("、"));
        html.push_str("</p>\n");
    }
    if !run.warnings.is_empty() {
        let _ = writeln!(
            html,
            "<p style=\"font-size:12px;color:#999;\">略過 {} 筆無法解析的項目</p>",
            run.warnings.len()
        );
    }

    if let Some(root) = options.pages_root() {
        let _ = writeln!(
            html,
            "<hr style=\"border:none;border-top:1px solid #eee;margin:24px 0 12px;\">\
<p style=\"font-size:12px;color:#aaa;text-align:center;\">\
<a href=\"{}\" style=\"color:#aaa;\">歷史書單</a></p>",
            attr(&format!("{root}/index.html"))
        );
    }
    html.push_str("</body></html>\n");
    html
}

fn render_section(
    html: &mut String,
    section: &CategoryResult,
    options: &DigestOptions,
    full_list_url: Option<&str>,
) {
    let _ = writeln!(
        html,
        "<h2 style=\"border-bottom:2px solid #e63946;padding-bottom:4px;font-size:16px;\">\
{}（{} 本）</h2>",
        text(&section.category_label),
        section.books.len()
    );

    if section.books.is_empty() {
        html.push_str("<p style=\"font-size:13px;color:#999;\">本期沒有新書</p>\n");
        return;
    }

    let shown = section.books.len().min(options.max_per_category);
    for book in &section.books[..shown] {
        render_book(html, book);
    }

    let remaining = section.books.len() - shown;
    if remaining > 0 {
        match full_list_url {
            Some(url) => {
                let _ = writeln!(
                    html,
                    "<p style=\"margin:8px 0 16px;\"><a href=\"{}\" \
style=\"color:#e63946;font-size:13px;\">還有 {remaining} 本 →</a></p>",
                    attr(url)
                );
            }
            None => {
                let _ = writeln!(
                    html,
                    "<p style=\"margin:8px 0 16px;color:#e63946;font-size:13px;\">還有 {remaining} 本</p>"
                );
            }
        }
    }
}

fn render_book(html: &mut String, book: &Book) {
    html.push_str(
        "<table role=\"presentation\" style=\"margin:8px 0;border-bottom:1px solid #f0f0f0;\
width:100%;\"><tr>",
    );
    if let Some(cover) = &book.cover_image_url {
        let _ = write!(
            html,
            "<td style=\"width:64px;vertical-align:top;\"><img src=\"{}\" alt=\"\" width=\"60\" \
style=\"border-radius:3px;\"></td>",
            attr(cover)
        );
    }
    html.push_str("<td style=\"vertical-align:top;\">");
    let _ = write!(
        html,
        "<a href=\"{}\" style=\"font-size:14px;color:#1d3557;text-decoration:none;\
font-weight:bold;\">{}</a><br>",
        attr(&book.source_url),
        text(&book.title)
    );

    let mut meta = Vec::new();
    if let Some(author) = &book.author {
        meta.push(author.clone());
    }
    if let Some(publisher) = &book.publisher {
        meta.push(publisher.clone());
    }
    if let Some(date) = book.published_date {
        meta.push(date.format("%Y-%m-%d").to_string());
    }
    if let Some(price) = book.price_label() {
        meta.push(price);
    }
    let _ = write!(
        html,
        "<span style=\"font-size:12px;color:#888;\">{}</span>",
        text(&meta.join(" / "))
    );
    html.push_str("</td></tr></table>\n");
}

/// Plain-text alternative part for clients that do not render HTML.
pub fn render_text(run: &RunResult, options: &DigestOptions) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", subject(run));
    let _ = writeln!(out, "共 {} 本書\n", run.total_books());

    for section in run.sections() {
        let _ = writeln!(out, "## {}（{} 本）", section.category_label, section.books.len());
        for book in &section.books {
            let _ = writeln!(out, "- {} <{}>", book.title, book.source_url);
        }
        out.push('\n');
    }

    if let Some(url) = options.full_list_url(run) {
        let _ = writeln!(out, "完整書單：{url}");
    }
    out
}
