use std::time::Duration;
use thiserror::Error;

/// The map surface could not reach the requested view state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavigationFailure {
    #[error("map surface detached: {0}")]
    Detached(String),

    #[error("target unreachable: {0}")]
    Unreachable(String),

    #[error("zoom level {target} not reached (last seen {last_seen:?})")]
    ZoomNotReached { target: u8, last_seen: Option<f64> },
}

/// A single detail fetch failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchFailure {
    #[error("detail fetch for article {article_id} timed out after {after:?}")]
    Timeout { article_id: String, after: Duration },

    #[error("detail page for article {0} not found")]
    NotFound(String),

    #[error("detail fetch for article {article_id} failed: {message}")]
    Surface { article_id: String, message: String },

    #[error("could not open fetch handle: {0}")]
    HandleUnavailable(String),
}

/// Errors surfaced by a crawl session.
///
/// Only `Configuration`, `SurfaceLost` and `Output` end a run; everything
/// else is counted in the run summary and the crawl continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrawlError {
    #[error(transparent)]
    Navigation(#[from] NavigationFailure),

    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error("malformed payload for article {article_id}: missing {field}")]
    MalformedPayload { article_id: String, field: &'static str },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("automation surface lost: {0}")]
    SurfaceLost(String),

    #[error("could not write results: {0}")]
    Output(String),
}

impl CrawlError {
    /// Whether this error aborts the whole session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlError::Configuration(_) | CrawlError::SurfaceLost(_) | CrawlError::Output(_)
        )
    }
}

pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
