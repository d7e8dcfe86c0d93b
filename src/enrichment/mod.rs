//! Sale Enrichment
//!
//! NFT metadata (collection, owner, name, image) and collection floor price.
//! Metadata gates notification (collection membership); floor is
//! best-effort and never blocks one.
//!
//! Items the indexer does not know yet fall back to the item contract's own
//! `get_nft_data` get-method: `[init, index, collection, owner, content]`.
//!
//! Created: 2026-03-05

pub mod getgems;

use async_trait::async_trait;
use tracing::debug;

use crate::address::TonAddress;
use crate::chain::{ChainClient, MethodOutcome, TonApiClient};
use crate::error::{ChainError, EnrichmentError};
use crate::stack::{StackCodec, StackValue};
use crate::types::{FloorPrice, NftMetadata};

pub use getgems::GetgemsClient;

pub const NFT_DATA_METHOD: &str = "get_nft_data";

const NFT_DATA_LEN: usize = 5;

#[async_trait]
pub trait EnrichmentGateway: Send + Sync {
    /// `Ok(None)` when the item is unknown to the indexer.
    async fn nft_metadata(&self, nft: &TonAddress) -> Result<Option<NftMetadata>, EnrichmentError>;

    /// `Ok(None)` when the collection has no fixed-price listing.
    async fn floor_price(&self, collection: &TonAddress) -> Result<Option<FloorPrice>, EnrichmentError>;
}

/// TonAPI for metadata, Getgems for floor.
pub struct HttpEnrichment {
    tonapi: TonApiClient,
    getgems: GetgemsClient,
    codec: StackCodec,
}

impl HttpEnrichment {
    pub fn new(tonapi: TonApiClient, getgems: GetgemsClient) -> Self {
        Self {
            tonapi,
            getgems,
            codec: StackCodec::default(),
        }
    }
}

#[async_trait]
impl EnrichmentGateway for HttpEnrichment {
    async fn nft_metadata(&self, nft: &TonAddress) -> Result<Option<NftMetadata>, EnrichmentError> {
        if let Some(meta) = self.tonapi.nft_item(nft).await? {
            return Ok(Some(meta));
        }
        debug!("NFT {} unknown to indexer, asking the item contract", nft.short());
        Ok(nft_data_via_get_method(&self.tonapi, &self.codec, nft).await?)
    }

    async fn floor_price(&self, collection: &TonAddress) -> Result<Option<FloorPrice>, EnrichmentError> {
        self.getgems.floor_price(collection).await
    }
}

/// Collection and owner straight from the item contract. Name and image
/// live in off-chain content and stay `None`.
pub async fn nft_data_via_get_method(
    chain: &dyn ChainClient,
    codec: &StackCodec,
    nft: &TonAddress,
) -> Result<Option<NftMetadata>, ChainError> {
    match chain.invoke_read_method(nft, NFT_DATA_METHOD).await? {
        MethodOutcome::Stack(stack) => Ok(metadata_from_nft_data(&codec.decode_stack(&stack))),
        MethodOutcome::NotApplicable => Ok(None),
    }
}

fn metadata_from_nft_data(stack: &[StackValue]) -> Option<NftMetadata> {
    if stack.len() < NFT_DATA_LEN {
        return None;
    }
    Some(NftMetadata {
        collection: Some(stack[2].as_address()?),
        owner: stack[3].as_address(),
        name: None,
        image_url: None,
    })
}

impl From<ChainError> for EnrichmentError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Timeout => EnrichmentError::Timeout,
            ChainError::Status { status, .. } => EnrichmentError::Status(status),
            ChainError::RateLimited => EnrichmentError::Status(429),
            ChainError::Malformed(msg) => EnrichmentError::Malformed(msg),
            ChainError::Request(msg) => EnrichmentError::Request(msg),
            ChainError::Rejected(msg) => EnrichmentError::Rejected(msg),
        }
    }
}
