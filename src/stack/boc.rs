//! Bag-of-Cells Address Reader
//!
//! Minimal BOC deserializer: locates the root cell of a serialized bag of
//! cells and reads a `MsgAddressInt` from its data bits. This is all the
//! sale probe needs; refs and exotic cells are never followed.
//!
//! Layout (generic magic `b5ee9c72`):
//!   magic(4) | flags(1) | off_bytes(1) | cells | roots | absent | tot_cells_size
//!   | root_list | [index] | cell_data | [crc32c]
//!
//! Created: 2026-03-03

use super::codec::CellAddressParser;
use crate::error::CellError;
use crate::address::TonAddress;

const BOC_GENERIC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];
const BOC_INDEXED_MAGIC: [u8; 4] = [0x68, 0xff, 0x65, 0xf3];
const BOC_INDEXED_CRC_MAGIC: [u8; 4] = [0xac, 0xc3, 0xa7, 0x28];

/// Bits in an `addr_std` without anycast: tag(2) + anycast(1) + workchain(8) + hash(256)
const ADDR_STD_BITS: usize = 267;

/// Default cell-parsing capability injected into the stack codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct BocAddressParser;

impl CellAddressParser for BocAddressParser {
    fn parse_address(&self, boc: &[u8]) -> Result<Option<TonAddress>, CellError> {
        let root = root_cell(boc)?;
        read_msg_address(&root)
    }
}

/// Data bits of one ordinary cell.
#[derive(Debug)]
struct CellBits<'a> {
    data: &'a [u8],
    bit_len: usize,
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CellError> {
        let end = self.pos.checked_add(n).ok_or(CellError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(CellError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, CellError> {
        Ok(self.take(1)?[0])
    }

    /// Big-endian unsigned integer of `n` bytes (n <= 8).
    fn uint(&mut self, n: usize) -> Result<usize, CellError> {
        let bytes = self.take(n)?;
        let mut value: u64 = 0;
        for &b in bytes {
            value = (value << 8) | b as u64;
        }
        usize::try_from(value).map_err(|_| CellError::Header("integer overflow"))
    }
}

fn root_cell(boc: &[u8]) -> Result<CellBits<'_>, CellError> {
    let mut r = ByteReader::new(boc);

    let magic: [u8; 4] = r
        .take(4)?
        .try_into()
        .map_err(|_| CellError::Truncated)?;

    let (has_idx, ref_size) = match magic {
        BOC_GENERIC_MAGIC => {
            let flags = r.byte()?;
            (flags & 0x80 != 0, (flags & 0x07) as usize)
        }
        BOC_INDEXED_MAGIC | BOC_INDEXED_CRC_MAGIC => (true, r.byte()? as usize),
        _ => return Err(CellError::Magic),
    };
    if !(1..=4).contains(&ref_size) {
        return Err(CellError::Header("ref size"));
    }

    let off_bytes = r.byte()? as usize;
    if !(1..=8).contains(&off_bytes) {
        return Err(CellError::Header("offset size"));
    }

    let cell_count = r.uint(ref_size)?;
    let root_count = r.uint(ref_size)?;
    let _absent = r.uint(ref_size)?;
    let total_size = r.uint(off_bytes)?;

    if root_count == 0 || cell_count == 0 {
        return Err(CellError::Header("no root cell"));
    }

    let root_index = if magic == BOC_GENERIC_MAGIC {
        let first = r.uint(ref_size)?;
        // remaining roots are irrelevant
        r.take((root_count - 1) * ref_size)?;
        first
    } else {
        0
    };
    if root_index >= cell_count {
        return Err(CellError::Header("root index out of range"));
    }

    if has_idx {
        r.take(cell_count * off_bytes)?;
    }

    let cell_data = r.take(total_size)?;
    let mut cells = ByteReader::new(cell_data);
    for _ in 0..root_index {
        read_cell(&mut cells, ref_size)?;
    }
    read_cell(&mut cells, ref_size)
}

fn read_cell<'a>(r: &mut ByteReader<'a>, ref_size: usize) -> Result<CellBits<'a>, CellError> {
    let d1 = r.byte()?;
    let d2 = r.byte()?;

    let refs = (d1 & 0x07) as usize;
    if refs > 4 {
        return Err(CellError::Header("absent cell"));
    }
    let exotic = d1 & 0x08 != 0;
    let with_hashes = d1 & 0x10 != 0;
    let level_mask = d1 >> 5;

    if with_hashes {
        let hash_count = level_mask.count_ones() as usize + 1;
        r.take(hash_count * (32 + 2))?;
    }

    let data_len = (d2 as usize + 1) / 2;
    let partial = d2 & 1 == 1;
    let data = r.take(data_len)?;
    r.take(refs * ref_size)?;

    if exotic {
        return Err(CellError::Exotic);
    }

    let bit_len = if partial {
        let last = *data.last().ok_or(CellError::Header("empty partial cell"))?;
        if last == 0 {
            return Err(CellError::Header("missing completion tag"));
        }
        data_len * 8 - (last.trailing_zeros() as usize + 1)
    } else {
        data_len * 8
    };

    Ok(CellBits { data, bit_len })
}

fn read_msg_address(cell: &CellBits<'_>) -> Result<Option<TonAddress>, CellError> {
    let mut bits = BitReader { cell, pos: 0 };
    match bits.read(2)? {
        0b00 => Ok(None),
        0b10 => {
            if cell.bit_len < ADDR_STD_BITS {
                return Err(CellError::Truncated);
            }
            if bits.read(1)? != 0 {
                return Err(CellError::Unsupported("anycast address"));
            }
            let workchain = bits.read(8)? as u8 as i8 as i32;
            let mut hash = [0u8; 32];
            for byte in hash.iter_mut() {
                *byte = bits.read(8)? as u8;
            }
            Ok(Some(TonAddress::new(workchain, hash)))
        }
        0b01 => Err(CellError::Unsupported("external address")),
        _ => Err(CellError::Unsupported("var address")),
    }
}

struct BitReader<'a, 'b> {
    cell: &'b CellBits<'a>,
    pos: usize,
}

impl BitReader<'_, '_> {
    /// Read `n` bits (n <= 32) MSB-first.
    fn read(&mut self, n: usize) -> Result<u32, CellError> {
        if self.pos + n > self.cell.bit_len {
            return Err(CellError::Truncated);
        }
        let mut value = 0u32;
        for _ in 0..n {
            let byte = self.cell.data[self.pos / 8];
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NFT_CELL_HEX: &str = "b5ee9c72010101010024000043800d1e740eda68a3431fa83c0b8e3698040a8ba8d64eae0c9ccb04bbda18937e0590";
    const NFT_RAW: &str = "0:68f3a076d3451a18fd41e05c71b4c020545d46b2757064e65825ded0c49bf02c";
    const ADDR_NONE_HEX: &str = "b5ee9c7201010101000300000120";

    fn parse(hex_str: &str) -> Result<Option<TonAddress>, CellError> {
        BocAddressParser.parse_address(&hex::decode(hex_str).unwrap())
    }

    #[test]
    fn test_addr_std_from_root_cell() {
        let addr = parse(NFT_CELL_HEX).unwrap().unwrap();
        assert_eq!(addr.to_string(), NFT_RAW);
    }

    #[test]
    fn test_addr_none() {
        assert_eq!(parse(ADDR_NONE_HEX).unwrap(), None);
    }

    #[test]
    fn test_truncated_boc() {
        let full = hex::decode(NFT_CELL_HEX).unwrap();
        for cut in [0, 3, 10, 20, full.len() - 1] {
            assert!(
                BocAddressParser.parse_address(&full[..cut]).is_err(),
                "cut at {} should fail",
                cut
            );
        }
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(parse("deadbeef0101010100240000"), Err(CellError::Magic));
    }

    #[test]
    fn test_non_address_cell() {
        // 32-bit cell whose first two bits are 01 (addr_extern)
        assert_eq!(
            parse("b5ee9c7201010101000600000840000001"),
            Err(CellError::Unsupported("external address"))
        );
    }

    #[test]
    fn test_root_index_skips_preceding_cells() {
        // two cells, root is #1; cell #0 is a 1-byte ordinary cell
        let mut boc = vec![0xb5, 0xee, 0x9c, 0x72, 0x01, 0x01, 0x02, 0x01, 0x00];
        let root = &hex::decode(NFT_CELL_HEX).unwrap()[11..];
        let filler = [0x00u8, 0x02, 0xff];
        boc.push((filler.len() + root.len()) as u8);
        boc.push(0x01);
        boc.extend_from_slice(&filler);
        boc.extend_from_slice(root);
        let addr = BocAddressParser.parse_address(&boc).unwrap().unwrap();
        assert_eq!(addr.to_string(), NFT_RAW);
    }
}
