//! Getgems Floor Lookup
//!
//! Cheapest on-sale fixed-price listing of a collection, via the public
//! GraphQL `alphaNftItemSearch` query sorted on-sale first, then price
//! ascending. Only `NftSaleFixPrice` listings carry `fullPrice`; the first
//! edge that has one is the floor.
//!
//! Created: 2026-03-05

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::address::TonAddress;
use crate::chain::RateLimiter;
use crate::error::EnrichmentError;
use crate::stack::codec::parse_int;
use crate::types::{FloorPrice, NANO_SCALE};

pub const DEFAULT_API_URL: &str = "https://api.getgems.io/graphql";
pub const NFT_LINK_PREFIX: &str = "https://getgems.io/nft/";

/// Listings fetched per floor query
const SEARCH_COUNT: u32 = 30;

const FLOOR_QUERY: &str = r#"
query nftSearch($count: Int!, $cursor: String, $query: String, $sort: String) {
  alphaNftItemSearch(first: $count, after: $cursor, query: $query, sort: $sort) {
    edges {
      node {
        address
        sale {
          ... on NftSaleFixPrice {
            fullPrice
          }
        }
      }
    }
  }
}
"#;

const FLOOR_SORT: &str =
    r#"[{"isOnSale":{"order":"desc"}},{"price":{"order":"asc"}},{"index":{"order":"asc"}}]"#;

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    #[serde(rename = "operationName")]
    operation_name: &'a str,
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(rename = "alphaNftItemSearch", default)]
    search: Option<SearchConnection>,
}

#[derive(Debug, Deserialize)]
struct SearchConnection {
    #[serde(default)]
    edges: Vec<SearchEdge>,
}

#[derive(Debug, Deserialize)]
struct SearchEdge {
    node: SearchNode,
}

#[derive(Debug, Deserialize)]
struct SearchNode {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    sale: Option<SaleNode>,
}

#[derive(Debug, Deserialize)]
struct SaleNode {
    /// nanotons, string or number depending on the API revision
    #[serde(rename = "fullPrice", default)]
    full_price: Option<serde_json::Value>,
}

pub struct GetgemsClient {
    client: reqwest::Client,
    api_url: String,
    limiter: Option<Arc<RateLimiter>>,
}

impl GetgemsClient {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, EnrichmentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            limiter: None,
        })
    }

    /// Space Getgems requests with the given limiter.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub async fn floor_price(&self, collection: &TonAddress) -> Result<Option<FloorPrice>, EnrichmentError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let request = floor_request(collection);
        let response = self.client.post(&self.api_url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status(status.as_u16()));
        }
        let body: SearchResponse = response.json().await?;
        Ok(floor_from_response(body))
    }
}

fn floor_request(collection: &TonAddress) -> GraphQlRequest<'static> {
    let filter = format!(
        r#"{{"$and":[{{"collectionAddress":"{}"}}]}}"#,
        collection.to_friendly(true)
    );
    GraphQlRequest {
        operation_name: "nftSearch",
        query: FLOOR_QUERY,
        variables: json!({
            "count": SEARCH_COUNT,
            "query": filter,
            "sort": FLOOR_SORT,
        }),
    }
}

fn floor_from_response(body: SearchResponse) -> Option<FloorPrice> {
    let edges = body.data?.search?.edges;
    edges.into_iter().find_map(|edge| {
        let nano = match edge.node.sale?.full_price? {
            serde_json::Value::String(s) => parse_int(&s),
            serde_json::Value::Number(n) => n.as_i64()? as i128,
            _ => return None,
        };
        if nano <= 0 {
            return None;
        }
        let price = Decimal::try_from_i128_with_scale(nano, NANO_SCALE).ok()?;
        let link = edge
            .node
            .address
            .filter(|a| !a.is_empty())
            .map(|a| format!("{}{}", NFT_LINK_PREFIX, a));
        Some(FloorPrice { price, link })
    })
}
