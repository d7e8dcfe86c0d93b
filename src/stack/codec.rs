//! Stack Codec
//!
//! Turns one `WireValue` into a `StackValue`. Decoding is total: integers
//! that cannot be read become 0, payloads that are neither integer nor
//! cell become `Unknown`. Nothing here returns an error.
//!
//! Integer payloads: `0x`-prefixed hex, decimal, then unprefixed hex.
//! Cell payloads: hex BOC, base64 BOC, or a literal address string.
//!
//! Created: 2026-03-03

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde_json::Value;
use std::sync::Arc;

use super::boc::BocAddressParser;
use super::wire::{WireTag, WireValue};
use crate::address::TonAddress;
use crate::error::CellError;

/// Extracts a wallet address from a serialized bag of cells.
/// `Ok(None)` is a well-formed `addr_none`.
pub trait CellAddressParser: Send + Sync {
    fn parse_address(&self, boc: &[u8]) -> Result<Option<TonAddress>, CellError>;
}

/// One decoded stack item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackValue {
    Integer(i128),
    Address(Option<TonAddress>),
    RawCell(Vec<u8>),
    Unknown,
}

impl StackValue {
    pub fn as_int(&self) -> Option<i128> {
        match self {
            StackValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Address carried by the item, if one could be extracted.
    pub fn as_address(&self) -> Option<TonAddress> {
        match self {
            StackValue::Address(addr) => *addr,
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct StackCodec {
    cell_parser: Option<Arc<dyn CellAddressParser>>,
}

impl Default for StackCodec {
    fn default() -> Self {
        Self::new(Some(Arc::new(BocAddressParser)))
    }
}

impl StackCodec {
    pub fn new(cell_parser: Option<Arc<dyn CellAddressParser>>) -> Self {
        Self { cell_parser }
    }

    /// Codec with no cell parser: serialized cells stay `RawCell`.
    pub fn without_cell_parser() -> Self {
        Self::new(None)
    }

    pub fn decode_stack(&self, items: &[WireValue]) -> Vec<StackValue> {
        items.iter().map(|item| self.decode(item)).collect()
    }

    pub fn decode(&self, item: &WireValue) -> StackValue {
        match item {
            WireValue::Tagged(tagged) => match tagged.payload() {
                Some(payload) => self.decode_tagged(&tagged.tag, payload),
                None => StackValue::Unknown,
            },
            WireValue::Pair(tag, payload) => self.decode_tagged(tag, payload),
            WireValue::Number(n) => StackValue::Integer(number_to_int(n)),
            WireValue::Text(s) => match s.parse::<TonAddress>() {
                Ok(addr) => StackValue::Address(Some(addr)),
                Err(_) => StackValue::Integer(parse_int(s)),
            },
            WireValue::Flag(b) => StackValue::Integer(*b as i128),
            WireValue::Other(_) => StackValue::Unknown,
        }
    }

    fn decode_tagged(&self, tag: &str, payload: &Value) -> StackValue {
        match WireTag::classify(tag) {
            WireTag::Num => match payload {
                Value::String(s) => StackValue::Integer(parse_int(s)),
                Value::Number(n) => StackValue::Integer(number_to_int(n)),
                Value::Bool(b) => StackValue::Integer(*b as i128),
                _ => StackValue::Integer(0),
            },
            WireTag::Cell => match cell_payload(payload) {
                Some(s) => self.decode_cell(s),
                None => StackValue::Unknown,
            },
            WireTag::Unknown => StackValue::Unknown,
        }
    }

    fn decode_cell(&self, payload: &str) -> StackValue {
        let payload = payload.trim();
        if let Ok(addr) = payload.parse::<TonAddress>() {
            return StackValue::Address(Some(addr));
        }

        let Some(boc) = decode_boc_bytes(payload) else {
            return StackValue::Unknown;
        };

        match &self.cell_parser {
            Some(parser) => match parser.parse_address(&boc) {
                Ok(addr) => StackValue::Address(addr),
                Err(_) => StackValue::RawCell(boc),
            },
            None => StackValue::RawCell(boc),
        }
    }
}

/// Cell payload string, either bare or wrapped as `{"bytes": ...}` (tonlib).
fn cell_payload(payload: &Value) -> Option<&str> {
    match payload {
        Value::String(s) => Some(s),
        Value::Object(map) => map
            .get("bytes")
            .or_else(|| map.get("b64"))
            .and_then(Value::as_str),
        _ => None,
    }
}

fn decode_boc_bytes(payload: &str) -> Option<Vec<u8>> {
    if payload.is_empty() {
        return None;
    }
    if payload.len() % 2 == 0 && payload.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(payload) {
            return Some(bytes);
        }
    }
    STANDARD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()
}

/// Best-effort integer parse. Never fails; unreadable input is 0.
pub fn parse_int(raw: &str) -> i128 {
    let s = raw.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let magnitude = if let Some(hex_digits) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i128::from_str_radix(hex_digits, 16).ok()
    } else {
        digits
            .parse::<i128>()
            .ok()
            .or_else(|| i128::from_str_radix(digits, 16).ok())
    };

    match magnitude {
        Some(v) if negative => -v,
        Some(v) => v,
        None => 0,
    }
}

fn number_to_int(n: &serde_json::Number) -> i128 {
    if let Some(v) = n.as_i64() {
        v as i128
    } else if let Some(v) = n.as_u64() {
        v as i128
    } else {
        match n.as_f64() {
            Some(f) if f.is_finite() && f.fract() == 0.0 => f as i128,
            _ => 0,
        }
    }
}
