//! TonAPI v2 Adapter
//!
//! Endpoints:
//!   GET /blockchain/accounts/{addr}/transactions?limit=N[&before_lt=LT]
//!   GET /blockchain/accounts/{addr}/methods/{method}
//!   GET /nfts/{addr}
//!
//! Status mapping:
//! - 429 → RateLimited, 5xx → Status (transient)
//! - other 4xx → NotApplicable for get-methods, Rejected for listings
//! - `success: false` get-method result → NotApplicable
//!
//! Every request goes through the shared `RateLimiter`.
//!
//! Created: 2026-03-04

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{ChainClient, MethodOutcome, RateLimiter, TransactionPage};
use crate::address::TonAddress;
use crate::error::ChainError;
use crate::stack::wire_stack;
use crate::types::{NftMetadata, TransactionSummary};

pub const DEFAULT_BASE_URL: &str = "https://tonapi.io/v2";

/// Longest error body kept in `ChainError::Status`
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    lt: u64,
    #[serde(default)]
    utime: u64,
    #[serde(default)]
    in_msg: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    source: Option<AccountRef>,
}

#[derive(Debug, Deserialize)]
struct AccountRef {
    address: String,
}

#[derive(Debug, Deserialize)]
struct MethodResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    stack: Value,
}

#[derive(Debug, Deserialize)]
struct NftResponse {
    #[serde(default)]
    collection: Option<AccountRef>,
    #[serde(default)]
    owner: Option<AccountRef>,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    previews: Vec<Preview>,
}

#[derive(Debug, Deserialize)]
struct Preview {
    #[serde(default)]
    resolution: String,
    url: String,
}

/// Non-success status outcome of a get-method call.
#[derive(Debug, PartialEq)]
enum StatusClass {
    NotApplicable,
    Error,
}

#[derive(Clone)]
pub struct TonApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    limiter: Arc<RateLimiter>,
}

impl TonApiClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            limiter,
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response, ChainError> {
        self.limiter.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        debug!("GET {}", url);
        Ok(req.send().await?)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ChainError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ChainError::Malformed(e.to_string()))
    }

    /// NFT item lookup. `Ok(None)` when TonAPI does not know the item.
    pub async fn nft_item(&self, nft: &TonAddress) -> Result<Option<NftMetadata>, ChainError> {
        let response = self.get(&format!("/nfts/{}", nft.to_raw()), &[]).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }
        let body: NftResponse = Self::read_json(response).await?;
        Ok(Some(nft_metadata(body)))
    }
}

#[async_trait]
impl ChainClient for TonApiClient {
    async fn list_transactions(
        &self,
        address: &TonAddress,
        since: u64,
        limit: u32,
        before_lt: Option<u64>,
    ) -> Result<TransactionPage, ChainError> {
        let path = format!("/blockchain/accounts/{}/transactions", address.to_raw());
        let mut query = vec![("limit", limit.to_string()), ("sort_order", "desc".to_string())];
        if let Some(lt) = before_lt {
            query.push(("before_lt", lt.to_string()));
        }
        let response = self.get(&path, &query).await?;

        // listings have no not-applicable case: every non-2xx is an error
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }

        let body: TransactionsResponse = Self::read_json(response).await?;
        Ok(TransactionPage::new(summaries(body), since, limit))
    }

    async fn invoke_read_method(
        &self,
        address: &TonAddress,
        method: &str,
    ) -> Result<MethodOutcome, ChainError> {
        let path = format!("/blockchain/accounts/{}/methods/{}", address.to_raw(), method);
        let response = self.get(&path, &[]).await?;

        let status = response.status();
        if !status.is_success() {
            if method_status_class(status) == StatusClass::NotApplicable {
                debug!("{} on {}: HTTP {} (not applicable)", method, address.short(), status.as_u16());
                return Ok(MethodOutcome::NotApplicable);
            }
            return Err(status_error(status, response).await);
        }

        let body: MethodResponse = Self::read_json(response).await?;
        Ok(method_outcome(body))
    }
}

fn method_status_class(status: StatusCode) -> StatusClass {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusClass::Error
    } else if status.is_client_error() {
        StatusClass::NotApplicable
    } else {
        StatusClass::Error
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> ChainError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ChainError::RateLimited;
    }
    let mut body = response.text().await.unwrap_or_default();
    body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
    if status.is_server_error() {
        ChainError::Status {
            status: status.as_u16(),
            body,
        }
    } else {
        ChainError::Rejected(format!("HTTP {}: {}", status.as_u16(), body))
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

/// Every transaction in the response, normalised, in response order.
fn summaries(body: TransactionsResponse) -> Vec<TransactionSummary> {
    body.transactions
        .into_iter()
        .map(|tx| {
            let source = tx
                .in_msg
                .and_then(|m| m.source)
                .and_then(|s| match s.address.parse::<TonAddress>() {
                    Ok(addr) => Some(addr),
                    Err(e) => {
                        debug!("Unreadable source address in tx {}: {}", tx.hash, e);
                        None
                    }
                });
            TransactionSummary {
                id: tx.hash,
                lt: tx.lt,
                utime: tx.utime,
                source,
            }
        })
        .collect()
}

fn method_outcome(body: MethodResponse) -> MethodOutcome {
    if !body.success {
        return MethodOutcome::NotApplicable;
    }
    MethodOutcome::Stack(wire_stack(&body.stack))
}

fn nft_metadata(body: NftResponse) -> NftMetadata {
    let parse = |r: Option<AccountRef>| r.and_then(|a| a.address.parse::<TonAddress>().ok());

    let name = body
        .metadata
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string);

    // largest preview first, then the raw metadata image
    let image_url = body
        .previews
        .iter()
        .max_by_key(|p| preview_width(&p.resolution))
        .map(|p| p.url.clone())
        .or_else(|| {
            body.metadata
                .get("image")
                .and_then(Value::as_str)
                .map(str::to_string)
        });

    NftMetadata {
        collection: parse(body.collection),
        owner: parse(body.owner),
        name,
        image_url,
    }
}

fn preview_width(resolution: &str) -> u32 {
    resolution
        .split('x')
        .next()
        .and_then(|w| w.parse().ok())
        .unwrap_or(0)
}
