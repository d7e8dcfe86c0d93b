//! Sale Record Parser
//!
//! Classifies a decoded `get_sale_data` / `get_offer_data` stack and reads
//! its fields at the positions the marketplace contracts return them.
//!
//! Layouts (index: field):
//! - FixedPrice (>= 7): 0 kind, 1 is_complete, 2 created_at, 3 marketplace,
//!   4 nft, 5 owner, 6 price
//! - Offer (>= 8): 0 kind, 1 is_complete, 2 created_at, 3 reserved,
//!   4 marketplace, 5 nft, 6 offerer, 7 price
//! - Auction (>= 20): 0 kind, 1 end, 2 end_time, 3 marketplace, 4 nft,
//!   5 owner, 6 last_bid, 7 last_bidder, 8 min_step, 15 max_bid,
//!   16 min_bid, 17 created_at, 18 last_bid_at, 19 is_canceled
//!
//! Created: 2026-03-03

use rust_decimal::Decimal;

use super::codec::StackValue;
use super::wire::WireValue;
use crate::address::TonAddress;
use crate::error::ParseError;
use crate::types::{AuctionDetails, SaleKind, SaleRecord, NANO_SCALE};

const MIN_STACK_LEN: usize = 7;
const OFFER_STACK_LEN: usize = 8;
const AUCTION_STACK_LEN: usize = 20;

const AUCTION_TAG: &[u8] = b"AUC";
const OFFER_TAG: &[u8] = b"OFFER";
const AUCTION_HEX: &str = "415543";
const OFFER_HEX: &str = "4F46464552";

/// Parse a decoded sale stack. Returns the whole record or an error, never a partial one.
pub fn parse_sale(stack: &[StackValue]) -> Result<SaleRecord, ParseError> {
    parse_sale_with_kind(stack, None)
}

/// Like `parse_sale`, but a `kind` read from the raw discriminator wins over
/// the decoded integer. See `classify_wire_kind`.
pub fn parse_sale_with_kind(stack: &[StackValue], kind: Option<SaleKind>) -> Result<SaleRecord, ParseError> {
    if stack.len() < MIN_STACK_LEN {
        return Err(ParseError::TooShort {
            len: stack.len(),
            need: MIN_STACK_LEN,
        });
    }

    let kind = match kind {
        Some(kind) => kind,
        None => stack[0]
            .as_int()
            .map(classify_kind)
            .ok_or(ParseError::Malformed { field: "kind" })?,
    };

    match kind {
        SaleKind::FixedPrice => parse_fixed_price(stack),
        SaleKind::Offer => parse_offer(stack),
        SaleKind::Auction => parse_auction(stack),
    }
}

/// Match the discriminator's bytes against known tags; anything else is a fixed-price sale.
pub fn classify_kind(tag: i128) -> SaleKind {
    let bytes = tag.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let bytes = &bytes[start..];

    if contains(bytes, OFFER_TAG) {
        SaleKind::Offer
    } else if contains(bytes, AUCTION_TAG) {
        SaleKind::Auction
    } else {
        SaleKind::FixedPrice
    }
}

/// Kind from the discriminator's raw text, for tags the integer decoding
/// cannot carry (text payloads, hex wider than 128 bits). `None` when the
/// text names no known tag.
pub fn classify_wire_kind(item: &WireValue) -> Option<SaleKind> {
    let text = raw_text(item)?.trim().to_ascii_uppercase();
    let hex = text.strip_prefix("-").unwrap_or(&text).strip_prefix("0X");

    let (offer, auction) = match hex {
        Some(digits) => (digits.contains(OFFER_HEX), digits.contains(AUCTION_HEX)),
        None => (text.contains("OFFER"), text.contains("AUC")),
    };
    if offer {
        Some(SaleKind::Offer)
    } else if auction {
        Some(SaleKind::Auction)
    } else {
        None
    }
}

fn raw_text(item: &WireValue) -> Option<String> {
    fn scalar(value: &serde_json::Value) -> Option<String> {
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
    match item {
        WireValue::Tagged(tagged) => tagged.payload().and_then(scalar),
        WireValue::Pair(_, payload) => scalar(payload),
        WireValue::Text(s) => Some(s.clone()),
        WireValue::Number(n) => Some(n.to_string()),
        WireValue::Flag(_) | WireValue::Other(_) => None,
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn parse_fixed_price(stack: &[StackValue]) -> Result<SaleRecord, ParseError> {
    Ok(SaleRecord {
        kind: SaleKind::FixedPrice,
        is_complete: required_flag(&stack[1], "is_complete")?,
        created_at: timestamp(&stack[2]),
        marketplace: stack[3].as_address(),
        nft: required_address(&stack[4], "nft")?,
        counterparty: stack[5].as_address(),
        price: required_amount(&stack[6], "price")?,
        auction: None,
    })
}

fn parse_offer(stack: &[StackValue]) -> Result<SaleRecord, ParseError> {
    require_len(stack, OFFER_STACK_LEN)?;
    Ok(SaleRecord {
        kind: SaleKind::Offer,
        is_complete: required_flag(&stack[1], "is_complete")?,
        created_at: timestamp(&stack[2]),
        marketplace: stack[4].as_address(),
        nft: required_address(&stack[5], "nft")?,
        counterparty: stack[6].as_address(),
        price: required_amount(&stack[7], "price")?,
        auction: None,
    })
}

fn parse_auction(stack: &[StackValue]) -> Result<SaleRecord, ParseError> {
    require_len(stack, AUCTION_STACK_LEN)?;

    let is_end = required_flag(&stack[1], "is_end")?;
    let nft = required_address(&stack[4], "nft")?;
    let last_bid = required_amount(&stack[6], "last_bid")?;

    let details = AuctionDetails {
        min_bid: amount(&stack[16]),
        max_bid: amount(&stack[15]),
        min_step: amount(&stack[8]),
        last_bid,
        last_bidder: stack[7].as_address(),
        last_bid_at: timestamp(&stack[18]),
        end_time: timestamp(&stack[2]),
        is_canceled: stack[19].as_int().map_or(false, |v| v != 0),
    };

    Ok(SaleRecord {
        kind: SaleKind::Auction,
        is_complete: is_end,
        created_at: timestamp(&stack[17]),
        marketplace: stack[3].as_address(),
        nft,
        counterparty: stack[5].as_address(),
        price: last_bid,
        auction: Some(details),
    })
}

fn require_len(stack: &[StackValue], need: usize) -> Result<(), ParseError> {
    if stack.len() < need {
        return Err(ParseError::TooShort {
            len: stack.len(),
            need,
        });
    }
    Ok(())
}

/// TVM booleans are 0 / -1; any non-zero counts as true.
fn required_flag(value: &StackValue, field: &'static str) -> Result<bool, ParseError> {
    value
        .as_int()
        .map(|v| v != 0)
        .ok_or(ParseError::Malformed { field })
}

fn required_address(value: &StackValue, field: &'static str) -> Result<TonAddress, ParseError> {
    value.as_address().ok_or(ParseError::Malformed { field })
}

fn required_amount(value: &StackValue, field: &'static str) -> Result<Decimal, ParseError> {
    amount(value).ok_or(ParseError::Malformed { field })
}

/// Nano amount → TON. Negative or out-of-range values are rejected.
fn amount(value: &StackValue) -> Option<Decimal> {
    let nano = value.as_int().filter(|v| *v >= 0)?;
    Decimal::try_from_i128_with_scale(nano, NANO_SCALE).ok()
}

fn timestamp(value: &StackValue) -> u64 {
    value
        .as_int()
        .and_then(|v| u64::try_from(v).ok())
        .unwrap_or(0)
}
