//! Canonical TON Addresses
//!
//! Every address that enters the bot (config, indexer responses, decoded
//! stack cells) is normalised into [`TonAddress`] and compared in that form.
//! The canonical string form is raw `workchain:hex64`, lowercase.
//!
//! Accepted inputs:
//! - raw:           `0:68f3a076...`
//! - user-friendly: 48 chars, base64 or base64url, `EQ...` / `UQ...` / `kQ...` / `0Q...`
//!
//! Created: 2026-03-02

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tag byte of a bounceable user-friendly address
const TAG_BOUNCEABLE: u8 = 0x11;
/// Tag byte of a non-bounceable user-friendly address
const TAG_NON_BOUNCEABLE: u8 = 0x51;
/// Flag OR-ed into the tag byte for testnet-only addresses
const TAG_TESTNET: u8 = 0x80;

/// Length of a user-friendly address string (36 bytes, base64)
const FRIENDLY_LEN: usize = 48;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("empty address")]
    Empty,
    #[error("invalid workchain in '{0}'")]
    Workchain(String),
    #[error("account id must be 64 hex chars, got '{0}'")]
    AccountId(String),
    #[error("not a base64 address: '{0}'")]
    Encoding(String),
    #[error("unknown address tag 0x{0:02x}")]
    Tag(u8),
    #[error("checksum mismatch for '{0}'")]
    Checksum(String),
}

/// A standard (`addr_std`) account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TonAddress {
    workchain: i32,
    hash: [u8; 32],
}

impl TonAddress {
    pub fn new(workchain: i32, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    pub fn workchain(&self) -> i32 {
        self.workchain
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Raw `wc:hex` form. Same as `Display`.
    pub fn to_raw(&self) -> String {
        self.to_string()
    }

    /// User-friendly base64url form (mainnet), for links shown to people.
    pub fn to_friendly(&self, bounceable: bool) -> String {
        let mut bytes = [0u8; 36];
        bytes[0] = if bounceable { TAG_BOUNCEABLE } else { TAG_NON_BOUNCEABLE };
        bytes[1] = self.workchain as i8 as u8;
        bytes[2..34].copy_from_slice(&self.hash);
        let crc = crc16(&bytes[..34]);
        bytes[34..].copy_from_slice(&crc.to_be_bytes());
        URL_SAFE.encode(bytes)
    }

    /// Short tail used in log lines (`...c49bf02c`).
    pub fn short(&self) -> String {
        format!("...{}", hex::encode(&self.hash[28..]))
    }

    /// File-name-safe key, used by the watermark store.
    pub fn storage_key(&self) -> String {
        let wc = if self.workchain < 0 {
            format!("m{}", self.workchain.unsigned_abs())
        } else {
            self.workchain.to_string()
        };
        format!("{}_{}", wc, hex::encode(self.hash))
    }

    fn parse_raw(s: &str) -> Result<Self, AddressError> {
        let (wc, id) = s
            .split_once(':')
            .ok_or_else(|| AddressError::Workchain(s.to_string()))?;
        let workchain: i32 = wc
            .trim()
            .parse()
            .map_err(|_| AddressError::Workchain(s.to_string()))?;

        let id = id.trim();
        if id.len() != 64 {
            return Err(AddressError::AccountId(id.to_string()));
        }
        let mut hash = [0u8; 32];
        hex::decode_to_slice(id, &mut hash).map_err(|_| AddressError::AccountId(id.to_string()))?;

        Ok(Self { workchain, hash })
    }

    fn parse_friendly(s: &str) -> Result<Self, AddressError> {
        let bytes = URL_SAFE
            .decode(s)
            .or_else(|_| STANDARD.decode(s))
            .map_err(|_| AddressError::Encoding(s.to_string()))?;
        if bytes.len() != 36 {
            return Err(AddressError::Encoding(s.to_string()));
        }

        let tag = bytes[0] & !TAG_TESTNET;
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return Err(AddressError::Tag(bytes[0]));
        }

        let expected = u16::from_be_bytes([bytes[34], bytes[35]]);
        if crc16(&bytes[..34]) != expected {
            return Err(AddressError::Checksum(s.to_string()));
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok(Self {
            workchain: bytes[1] as i8 as i32,
            hash,
        })
    }
}

impl FromStr for TonAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        if s.contains(':') {
            Self::parse_raw(s)
        } else if s.len() == FRIENDLY_LEN {
            Self::parse_friendly(s)
        } else {
            Err(AddressError::Encoding(s.to_string()))
        }
    }
}

impl fmt::Display for TonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workchain, hex::encode(self.hash))
    }
}

impl fmt::Debug for TonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TonAddress({})", self)
    }
}

impl Serialize for TonAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TonAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// CRC-16/XMODEM (poly 0x1021, init 0), the checksum of user-friendly addresses.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Parse a comma-separated address list (env var form). Blank entries are skipped.
pub fn parse_address_list(raw: &str) -> Result<Vec<TonAddress>, AddressError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(TonAddress::from_str)
        .collect()
}
