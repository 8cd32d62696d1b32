use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://www.books.com.tw";

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub const PREORDER_LABEL: &str = "預購書";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category {
    pub code: &'static str,
    pub label: &'static str,
}

pub const CATEGORIES: &[Category] = &[
    Category { code: "02", label: "商業理財" },
    Category { code: "03", label: "藝術設計" },
    Category { code: "04", label: "人文社科" },
    Category { code: "06", label: "自然科普" },
    Category { code: "07", label: "心理勵志" },
    Category { code: "08", label: "醫療保健" },
    Category { code: "09", label: "飲食" },
    Category { code: "10", label: "生活風格" },
    Category { code: "11", label: "旅遊" },
    Category { code: "12", label: "宗教命理" },
    Category { code: "13", label: "親子教養" },
    Category { code: "14", label: "童書/青少年文學" },
    Category { code: "17", label: "語言學習" },
    Category { code: "18", label: "考試用書" },
    Category { code: "19", label: "電腦資訊" },
    Category { code: "20", label: "專業/教科書/政府出版品" },
    Category { code: "22", label: "影視偶像" },
    Category { code: "24", label: "國中小參考書" },
];

pub fn category(code: &str) -> Result<&'static Category> {
    CATEGORIES
        .iter()
        .find(|c| c.code == code)
        .ok_or_else(|| Error::Configuration(format!("unknown category code: {code}")))
}

/// Resolves requested codes in request order; an empty request selects every category.
pub fn resolve_categories<S: AsRef<str>>(codes: &[S]) -> Result<Vec<&'static Category>> {
    if codes.is_empty() {
        return Ok(CATEGORIES.iter().collect());
    }
    codes.iter().map(|code| category(code.as_ref())).collect()
}

/// Immutable description of the catalog site, built once per process.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub base_url: Url,
    pub user_agent: String,
    pub timeout: Duration,
    pub request_delay: Duration,
}

impl SiteConfig {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|err| Error::Configuration(format!("invalid base url {base_url}: {err}")))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(Error::Configuration(format!(
                "base url must be http/https: {base_url}"
            )));
        }

        Ok(Self {
            base_url,
            user_agent: USER_AGENT.to_owned(),
            timeout: Duration::from_secs(30),
            request_delay: Duration::from_millis(1500),
        })
    }

    pub fn new_books_url(&self, category: &Category) -> Result<Url> {
        self.join(&format!("/web/books_nbtopm_{}", category.code))
    }

    pub fn preorder_url(&self) -> Result<Url> {
        self.join("/web/sys_prebooks/books/")
    }

    pub fn join(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|err| Error::Configuration(format!("join {path} onto base url: {err}")))
    }
}
