//! Typed errors for the crawl pipeline.
//!
//! Each stage has its own enum; `CrawlError` is what scheduler-facing
//! operations return.

use thiserror::Error;

use crate::models::{QueryId, SiteId};

/// A submitted URL does not describe a valid query of its kind.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL is not valid: {0}")]
    InvalidUrl(String),

    #[error("URL origin must match root URL.")]
    OriginMismatch,

    #[error("Parameter \"{0}\" is not allowed.")]
    NotAllowed(String),

    #[error("Value of parameter \"{0}\" must be single.")]
    MustBeSingle(String),
}

/// Transport-level failure while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("browser fetch of {url} failed: {reason}")]
    Browser { url: String, reason: String },
}

/// A page did not have the structure the extractor relies on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("page landmark not found: {0}")]
    MissingLandmark(&'static str),

    #[error("ad card link carries no usable id (href: {href:?})")]
    MissingSiteId { href: Option<String> },

    #[error("ad detail page has no price")]
    MissingPrice,
}

/// Storage failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("stored parameters are malformed: {0}")]
    Parameters(#[from] serde_json::Error),

    /// A concurrent writer created or removed one of the chunk's ads first.
    #[error("chunk for query {query_id} raced with a concurrent writer")]
    Conflict { query_id: QueryId },

    #[error("search query {0} not found")]
    QueryNotFound(QueryId),

    #[error("ad {0} not found")]
    AdNotFound(SiteId),
}

/// Failure of a scheduler-facing operation.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
