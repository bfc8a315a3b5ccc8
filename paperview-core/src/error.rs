use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::location::Location;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("page {location} is unavailable: {reason}")]
    PageUnavailable { location: Location, reason: String },

    #[error("all {capacity} page cache slots are busy rendering (waited {waited:?})")]
    CacheBackpressure { capacity: usize, waited: Duration },

    #[error("location {0} is outside the document")]
    InvalidLocation(Location),

    #[error("document has no pages")]
    EmptyDocument,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start the render pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ViewerError {
    pub fn is_page_unavailable(&self) -> bool {
        matches!(self, ViewerError::PageUnavailable { .. })
    }

    pub fn is_backpressure(&self) -> bool {
        matches!(self, ViewerError::CacheBackpressure { .. })
    }
}
