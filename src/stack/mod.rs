//! Get-Method Stack Decoding
//!
//! wire (indexer JSON) → codec (`StackValue`) → parser (`SaleRecord`).
//! `boc` is the cell-parsing capability the codec uses for address cells.
//!
//! Created: 2026-03-03

pub mod boc;
pub mod codec;
pub mod parser;
pub mod wire;

pub use boc::BocAddressParser;
pub use codec::{CellAddressParser, StackCodec, StackValue};
pub use parser::{classify_kind, classify_wire_kind, parse_sale, parse_sale_with_kind};
pub use wire::{wire_stack, WireValue};
