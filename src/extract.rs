use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{Error, Result};
use crate::html::{BlockMarker, Document, NodeQuery, StructuralQuery};
use crate::model::RawBookEntry;

const NEW_ARRIVALS: BlockMarker<'static> = BlockMarker {
    heading: "h3",
    heading_texts: &["近期新書"],
    container_tag: "div",
    container_class: "mod_a",
};

const PREORDERS: BlockMarker<'static> = BlockMarker {
    heading: "h3",
    heading_texts: &["近期新書", "預購"],
    container_tag: "div",
    container_class: "mod_a",
};

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"出版日期\s*[：:]\s*(\d{4}\s*[-/.年]\s*\d{1,2}\s*[-/.月]\s*\d{1,2}\s*日?)")
        .expect("date regex")
});
static DISCOUNT_PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*折\s*(\d+)\s*元").expect("discount price regex"));
static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*元").expect("price regex"));

/// Which listing a page belongs to; carried onto every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listing<'a> {
    pub code: &'a str,
    pub label: &'a str,
    pub is_preorder: bool,
}

#[derive(Debug, Default)]
pub struct Extracted {
    pub entries: Vec<RawBookEntry>,
    pub warnings: Vec<String>,
}

/// Pulls book entries out of one listing page.
///
/// Fails only when the listing block itself is missing. Items without a
/// product link are skipped and reported in [`Extracted::warnings`].
pub fn extract(markup: &str, listing: Listing<'_>, base_url: &Url) -> Result<Extracted> {
    let document = Document::parse(markup);
    extract_from(&document, listing, base_url)
}

pub fn extract_from<Q: StructuralQuery>(
    document: &Q,
    listing: Listing<'_>,
    base_url: &Url,
) -> Result<Extracted> {
    let marker = if listing.is_preorder {
        &PREORDERS
    } else {
        &NEW_ARRIVALS
    };
    let block = document.find_block(marker).ok_or_else(|| {
        Error::Extraction(format!(
            "listing block {:?} not found for category {}",
            marker.heading_texts, listing.code
        ))
    })?;

    let mut out = Extracted::default();
    for (idx, item) in block.select_all("div.item").into_iter().enumerate() {
        match extract_item(&item, listing, base_url) {
            Ok(entry) => out.entries.push(entry),
            Err(reason) => {
                tracing::warn!(category = listing.code, item = idx, reason, "skip listing item");
                out.warnings
                    .push(format!("category {} item {idx}: {reason}", listing.code));
            }
        }
    }

    tracing::info!(
        category = listing.code,
        books = out.entries.len(),
        skipped = out.warnings.len(),
        "parsed listing"
    );
    Ok(out)
}

fn extract_item<N: NodeQuery>(
    item: &N,
    listing: Listing<'_>,
    base_url: &Url,
) -> std::result::Result<RawBookEntry, &'static str> {
    let heading = item.select_first("h4").ok_or("missing title heading")?;
    let link = heading
        .select_first(r#"a[href*="/products/"]"#)
        .ok_or("missing product link")?;
    let title = link.text();
    if title.is_empty() {
        return Err("empty title");
    }
    let href = link.attr("href").ok_or("product link without href")?;
    let source_url = resolve_product_url(base_url, &href).ok_or("unresolvable product link")?;

    let author = item
        .select_first(r#"a[href*="adv_author"]"#)
        .map(|a| a.text())
        .filter(|s| !s.is_empty());

    let info = item.select_first("li.info");
    let publisher = info
        .as_ref()
        .and_then(|li| li.select_first(r#"a[href*="pubid"]"#))
        .map(|a| a.text())
        .filter(|s| !s.is_empty());
    let raw_date = info.as_ref().and_then(|li| {
        DATE_RE
            .captures(&li.text())
            .map(|caps| caps[1].to_owned())
    });

    let price_text = item
        .select_first(".price_box")
        .map(|el| el.text())
        .unwrap_or_else(|| item.text());
    let (discount, price) = parse_price(&price_text);

    let cover_image_url = item.select_first("img.cover").and_then(|img| {
        img.attr("src")
            .filter(|src| !src.trim().is_empty())
            .or_else(|| img.attr("data-src"))
            .and_then(|src| resolve_asset_url(base_url, &src))
    });

    Ok(RawBookEntry {
        title,
        source_url,
        author,
        publisher,
        raw_date,
        price,
        discount,
        cover_image_url,
        category: listing.code.to_owned(),
        is_preorder: listing.is_preorder,
    })
}

fn parse_price(text: &str) -> (Option<u8>, Option<u32>) {
    if let Some(caps) = DISCOUNT_PRICE_RE.captures(text) {
        return (caps[1].parse().ok(), caps[2].parse().ok());
    }
    let price = PRICE_RE
        .captures(text)
        .and_then(|caps| caps[1].parse().ok());
    (None, price)
}

/// Product links without query or fragment, so tracking parameters do not
/// split one book into several.
fn resolve_product_url(base_url: &Url, href: &str) -> Option<String> {
    let mut url = resolve(base_url, href)?;
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

fn resolve_asset_url(base_url: &Url, src: &str) -> Option<String> {
    resolve(base_url, src).map(|url| url.to_string())
}

fn resolve(base_url: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if let Some(rest) = href.strip_prefix("//") {
        return Url::parse(&format!("https://{rest}")).ok();
    }
    base_url.join(href).ok()
}
