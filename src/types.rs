// Core data structures shared by the scanner and its collaborators

use crate::address::TonAddress;
use crate::enrichment::getgems::NFT_LINK_PREFIX;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanotons per TON
pub const NANO_SCALE: u32 = 9;

/// Sale contract flavours we can decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SaleKind {
    FixedPrice,
    Auction,
    Offer,
}

impl fmt::Display for SaleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaleKind::FixedPrice => write!(f, "Sale"),
            SaleKind::Auction => write!(f, "Auction"),
            SaleKind::Offer => write!(f, "Offer"),
        }
    }
}

/// Auction-only fields. Amounts in TON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuctionDetails {
    pub min_bid: Option<Decimal>,
    pub max_bid: Option<Decimal>,
    pub min_step: Option<Decimal>,
    pub last_bid: Decimal,
    pub last_bidder: Option<TonAddress>,
    pub last_bid_at: u64,
    pub end_time: u64,
    pub is_canceled: bool,
}

/// Canonical view of one sale contract's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleRecord {
    pub kind: SaleKind,
    pub is_complete: bool,
    pub created_at: u64,
    pub marketplace: Option<TonAddress>,
    pub nft: TonAddress,
    /// Owner (fixed price), bidder/owner (auction) or offerer (offer)
    pub counterparty: Option<TonAddress>,
    /// Settlement price in TON. For auctions this is the last bid.
    pub price: Decimal,
    pub auction: Option<AuctionDetails>,
}

impl SaleRecord {
    /// Completed and not canceled: the only state worth a notification.
    pub fn is_settled(&self) -> bool {
        self.is_complete && !self.auction.as_ref().map_or(false, |a| a.is_canceled)
    }
}

/// One transaction as the scanner needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSummary {
    /// Opaque identifier (transaction hash)
    pub id: String,
    /// Logical time, used as the listing cursor
    pub lt: u64,
    pub utime: u64,
    /// Source of the inbound message; absent for external messages
    pub source: Option<TonAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NftMetadata {
    pub collection: Option<TonAddress>,
    pub owner: Option<TonAddress>,
    pub name: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloorPrice {
    pub price: Decimal,
    pub link: Option<String>,
}

/// Everything a notifier receives for one sale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleNotification {
    pub kind: SaleKind,
    pub marketplace: Option<TonAddress>,
    pub nft: TonAddress,
    pub counterparty: Option<TonAddress>,
    pub owner: Option<TonAddress>,
    pub price: Decimal,
    pub nft_name: Option<String>,
    pub nft_image_url: Option<String>,
    pub floor_price: Option<Decimal>,
    pub floor_link: Option<String>,
}

impl SaleNotification {
    pub fn new(record: &SaleRecord, meta: &NftMetadata, floor: Option<&FloorPrice>) -> Self {
        Self {
            kind: record.kind,
            marketplace: record.marketplace,
            nft: record.nft,
            counterparty: record.counterparty,
            owner: meta.owner,
            price: record.price,
            nft_name: meta.name.clone(),
            nft_image_url: meta.image_url.clone(),
            floor_price: floor.map(|f| f.price),
            floor_link: floor.and_then(|f| f.link.clone()),
        }
    }

    /// Display name, falling back to the short address.
    pub fn title(&self) -> String {
        self.nft_name.clone().unwrap_or_else(|| self.nft.short())
    }

    /// Plain-text summary shared by all sinks.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("{}: {}", self.kind, self.title()),
            format!("Price: {} TON", self.price.normalize()),
        ];
        if let Some(floor) = self.floor_price {
            lines.push(format!("Floor: {} TON", floor.normalize()));
        }
        if let Some(owner) = self.owner.or(self.counterparty) {
            lines.push(format!("Buyer: {}", owner.to_friendly(false)));
        }
        lines.push(format!("NFT: {}", self.item_link()));
        lines
    }

    /// Marketplace page of the sold item.
    pub fn item_link(&self) -> String {
        format!("{}{}", NFT_LINK_PREFIX, self.nft.to_friendly(true))
    }
}
