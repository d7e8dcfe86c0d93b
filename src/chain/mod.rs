//! Chain-Indexing API
//!
//! The two reads the scanner needs from an indexer:
//! - list transactions touching an address
//! - run a read-only get-method and return its raw stack
//!
//! "Contract has no such method" is `MethodOutcome::NotApplicable`, a normal
//! result. Transport trouble is a `ChainError`, classified by `is_transient()`.
//!
//! Created: 2026-03-04

pub mod rate_limit;
pub mod retry;
pub mod tonapi;

use async_trait::async_trait;

use crate::address::TonAddress;
use crate::error::ChainError;
use crate::stack::WireValue;
use crate::types::TransactionSummary;

pub use rate_limit::RateLimiter;
pub use retry::{retry, Backoff, RetryPolicy};
pub use tonapi::TonApiClient;

/// Result of a get-method call that reached the contract.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodOutcome {
    Stack(Vec<WireValue>),
    /// Method missing or contract not deployed: expected for most counterparties
    NotApplicable,
}

/// One page of a newest-first transaction listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPage {
    /// Transactions newer than `since`, newest first
    pub transactions: Vec<TransactionSummary>,
    /// Cursor for the next older page. `None` once the listing reached `since` or ran dry.
    pub next_before_lt: Option<u64>,
}

impl TransactionPage {
    /// Build a page from `raw`, the indexer's answer to a `limit`-sized request.
    /// Another page is needed only if `raw` was full and still entirely newer than `since`.
    pub fn new(raw: Vec<TransactionSummary>, since: u64, limit: u32) -> Self {
        let full = raw.len() >= limit as usize && !raw.is_empty();
        let reached_since = raw.iter().any(|tx| tx.utime <= since);
        let next_before_lt = if full && !reached_since {
            raw.iter().map(|tx| tx.lt).min()
        } else {
            None
        };
        Self {
            transactions: raw.into_iter().filter(|tx| tx.utime > since).collect(),
            next_before_lt,
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// One page of `address` transactions newer than `since`, at most `limit`,
    /// strictly older than `before_lt` when given.
    async fn list_transactions(
        &self,
        address: &TonAddress,
        since: u64,
        limit: u32,
        before_lt: Option<u64>,
    ) -> Result<TransactionPage, ChainError>;

    async fn invoke_read_method(
        &self,
        address: &TonAddress,
        method: &str,
    ) -> Result<MethodOutcome, ChainError>;
}
