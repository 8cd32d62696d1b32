use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("smtp authentication failed: {0}")]
    Authentication(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt snapshot {path}: {message}")]
    Snapshot { path: String, message: String },
}

impl Error {
    /// Per-listing failures that the aggregator records and skips past.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Network { .. } | Error::Extraction(_))
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
