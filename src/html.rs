//! Structural queries over listing markup.
//!
//! The extractor only talks to [`StructuralQuery`] and [`NodeQuery`], so the
//! concrete HTML parser stays behind this module.

use scraper::{ElementRef, Html, Selector};

/// Locates a listing block by the text of its heading and the class of the
/// enclosing container, independent of exact DOM depth.
#[derive(Debug, Clone, Copy)]
pub struct BlockMarker<'m> {
    pub heading: &'m str,
    pub heading_texts: &'m [&'m str],
    pub container_tag: &'m str,
    pub container_class: &'m str,
}

pub trait StructuralQuery {
    type Node<'a>: NodeQuery
    where
        Self: 'a;

    fn find_block(&self, marker: &BlockMarker<'_>) -> Option<Self::Node<'_>>;
}

pub trait NodeQuery: Sized {
    fn select_all(&self, css: &str) -> Vec<Self>;

    fn select_first(&self, css: &str) -> Option<Self> {
        self.select_all(css).into_iter().next()
    }

    /// Descendant text with runs of whitespace collapsed to one space.
    fn text(&self) -> String;

    fn attr(&self, name: &str) -> Option<String>;
}

pub struct Document {
    html: Html,
}

impl Document {
    pub fn parse(markup: &str) -> Self {
        Self {
            html: Html::parse_document(markup),
        }
    }

    pub fn select_all(&self, css: &str) -> Vec<ElementRef<'_>> {
        let Some(selector) = parse_selector(css) else {
            return Vec::new();
        };
        self.html.select(&selector).collect()
    }

    /// Unmodified text of the first match, e.g. the body of a data `<script>`.
    pub fn raw_text(&self, css: &str) -> Option<String> {
        self.select_all(css)
            .into_iter()
            .next()
            .map(|el| el.text().collect::<String>())
    }
}

impl StructuralQuery for Document {
    type Node<'a> = ElementRef<'a>;

    fn find_block(&self, marker: &BlockMarker<'_>) -> Option<ElementRef<'_>> {
        let heading = self.select_all(marker.heading).into_iter().find(|el| {
            let text = NodeQuery::text(el);
            marker.heading_texts.iter().any(|t| text.contains(t))
        })?;

        heading
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| {
                el.value().name() == marker.container_tag
                    && el
                        .value()
                        .attr("class")
                        .is_some_and(|class| class.contains(marker.container_class))
            })
    }
}

impl NodeQuery for ElementRef<'_> {
    fn select_all(&self, css: &str) -> Vec<Self> {
        let Some(selector) = parse_selector(css) else {
            return Vec::new();
        };
        self.select(&selector).collect()
    }

    fn text(&self) -> String {
        let joined = ElementRef::text(self).collect::<String>();
        joined.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn attr(&self, name: &str) -> Option<String> {
        self.value().attr(name).map(str::to_owned)
    }
}

fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(err) => {
            tracing::warn!(css, ?err, "invalid css selector");
            None
        }
    }
}
