//! Error types shared across the pipeline stages.

use thiserror::Error;

/// Failure talking to the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema check failed, missing tables: {}", .0.join(", "))]
    MissingTables(Vec<String>),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row in `{table}`: {message}")]
    Corrupt { table: &'static str, message: String },
}

/// Failure computing ImpactRank for a single article.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    #[error("factor `{0}` is not a finite number")]
    NonFinite(&'static str),

    #[error("scoring context lookup failed: {0}")]
    Lookup(#[source] StoreError),
}

/// Failure fetching or parsing one feed. Never aborts a batch.
#[derive(Debug, Error)]
pub enum FeedFetchError {
    #[error("feed `{feed}`: request failed: {message}")]
    Http { feed: String, message: String },

    #[error("feed `{feed}`: HTTP status {status}")]
    Status { feed: String, status: u16 },

    #[error("feed `{feed}`: timed out after {secs}s")]
    Timeout { feed: String, secs: u64 },

    #[error("feed `{feed}`: parse error: {message}")]
    Parse { feed: String, message: String },

    #[error("adapter `{adapter}` failed: {message}")]
    Adapter { adapter: String, message: String },
}

impl FeedFetchError {
    pub fn feed(&self) -> &str {
        match self {
            FeedFetchError::Http { feed, .. }
            | FeedFetchError::Status { feed, .. }
            | FeedFetchError::Timeout { feed, .. }
            | FeedFetchError::Parse { feed, .. } => feed,
            FeedFetchError::Adapter { adapter, .. } => adapter,
        }
    }
}

/// Failure of the inline Dedup → Score → Route → Push sequence for one item.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error("persisting article failed: {0}")]
    Store(#[from] StoreError),
}
