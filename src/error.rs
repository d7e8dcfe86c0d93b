//! Error Taxonomy
//!
//! Domain errors for each collaborator boundary. Classification into
//! transient / not-applicable / malformed / fatal happens here so the
//! scanner can decide skip-vs-retry without matching on transport details.
//!
//! - Transient: rate limit, timeout, 5xx, undecodable body → retried
//! - NotApplicable: not an error, see `chain::MethodOutcome`
//! - Malformed: `ParseError`, `CellError` → transaction skipped
//! - Fatal: configuration, surfaced through `anyhow` at startup
//!
//! Created: 2026-03-03

use std::path::PathBuf;
use thiserror::Error;

pub use crate::address::AddressError;

/// Failure talking to the chain-indexing API.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rate limited by indexer")]
    RateLimited,

    #[error("indexer request timed out")]
    Timeout,

    #[error("indexer returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed indexer response: {0}")]
    Malformed(String),

    #[error("indexer request failed: {0}")]
    Request(String),

    #[error("indexer rejected request: {0}")]
    Rejected(String),
}

impl ChainError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::RateLimited
            | ChainError::Timeout
            | ChainError::Malformed(_)
            | ChainError::Request(_) => true,
            ChainError::Status { status, .. } => *status >= 500,
            ChainError::Rejected(_) => false,
        }
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChainError::Timeout
        } else if e.is_decode() {
            ChainError::Malformed(e.to_string())
        } else {
            ChainError::Request(e.to_string())
        }
    }
}

/// Sale stack could not be turned into a `SaleRecord`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("stack too short: {len} items, need {need}")]
    TooShort { len: usize, need: usize },

    #[error("malformed sale stack: bad {field}")]
    Malformed { field: &'static str },
}

/// Bag-of-cells could not be read as an address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CellError {
    #[error("bag of cells truncated")]
    Truncated,

    #[error("unknown bag-of-cells magic")]
    Magic,

    #[error("invalid bag-of-cells header: {0}")]
    Header(&'static str),

    #[error("exotic root cell")]
    Exotic,

    #[error("unsupported address: {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("watermark io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Metadata or floor lookup failure. Callers treat these as "no data".
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment request timed out")]
    Timeout,

    #[error("enrichment returned HTTP {0}")]
    Status(u16),

    #[error("enrichment request failed: {0}")]
    Request(String),

    #[error("malformed enrichment response: {0}")]
    Malformed(String),

    #[error("enrichment request rejected: {0}")]
    Rejected(String),
}

impl EnrichmentError {
    /// Same classification as `ChainError::is_transient`: 429 and 5xx retry, other statuses do not.
    pub fn is_transient(&self) -> bool {
        match self {
            EnrichmentError::Timeout | EnrichmentError::Request(_) | EnrichmentError::Malformed(_) => true,
            EnrichmentError::Status(status) => *status == 429 || *status >= 500,
            EnrichmentError::Rejected(_) => false,
        }
    }
}

impl From<reqwest::Error> for EnrichmentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EnrichmentError::Timeout
        } else if e.is_decode() {
            EnrichmentError::Malformed(e.to_string())
        } else {
            EnrichmentError::Request(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("notification sink returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("notification delivery timed out")]
    Timeout,
}
