// src/protocol/cell.rs
use crate::domain::errors::{ProtocolError, ProtocolResult};
use crate::protocol::address::TonAddress;

pub const MAX_CELL_BITS: usize = 1023;
pub const MAX_CELL_REFS: usize = 4;

/// Ordinary cell: up to 1023 data bits and four children
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Cell>,
}

impl Cell {
    pub(crate) fn from_parts(data: Vec<u8>, bit_len: usize, refs: Vec<Cell>) -> ProtocolResult<Self> {
        if bit_len > MAX_CELL_BITS || refs.len() > MAX_CELL_REFS || data.len() * 8 < bit_len {
            return Err(ProtocolError::Decode(format!(
                "cell with {} bits and {} refs is malformed",
                bit_len,
                refs.len()
            )));
        }
        Ok(Self {
            data,
            bit_len,
            refs,
        })
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn refs(&self) -> &[Cell] {
        &self.refs
    }

    pub fn parser(&self) -> CellSlice<'_> {
        CellSlice {
            cell: self,
            bit_pos: 0,
            ref_pos: 0,
        }
    }
}

/// Consuming builder; each store returns the builder so calls chain with `?`
#[derive(Debug, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Cell>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_bit(&mut self, bit: bool) -> ProtocolResult<()> {
        if self.bit_len >= MAX_CELL_BITS {
            return Err(ProtocolError::CellOverflow(format!(
                "more than {} bits",
                MAX_CELL_BITS
            )));
        }
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let idx = self.bit_len / 8;
            self.data[idx] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(())
    }

    pub fn remaining_bits(&self) -> usize {
        MAX_CELL_BITS - self.bit_len
    }

    pub fn store_bit(mut self, bit: bool) -> ProtocolResult<Self> {
        self.push_bit(bit)?;
        Ok(self)
    }

    pub fn store_uint(mut self, value: u64, bits: usize) -> ProtocolResult<Self> {
        if bits > 64 || (bits < 64 && value >> bits != 0) {
            return Err(ProtocolError::CellOverflow(format!(
                "{} does not fit in {} bits",
                value, bits
            )));
        }
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1)?;
        }
        Ok(self)
    }

    pub fn store_int(self, value: i64, bits: usize) -> ProtocolResult<Self> {
        if bits == 0 || bits > 64 {
            return Err(ProtocolError::CellOverflow(format!("int width {}", bits)));
        }
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        self.store_uint(value as u64 & mask, bits)
    }

    pub fn store_bytes(mut self, bytes: &[u8]) -> ProtocolResult<Self> {
        if bytes.len() * 8 > self.remaining_bits() {
            return Err(ProtocolError::CellOverflow(format!(
                "{} bytes do not fit",
                bytes.len()
            )));
        }
        for &byte in bytes {
            for i in (0..8).rev() {
                self.push_bit((byte >> i) & 1 == 1)?;
            }
        }
        Ok(self)
    }

    /// VarUInteger 16: 4-bit byte length, then big-endian value
    pub fn store_coins(self, amount: u128) -> ProtocolResult<Self> {
        if amount >> 120 != 0 {
            return Err(ProtocolError::CellOverflow(format!(
                "coin amount {} exceeds 120 bits",
                amount
            )));
        }
        let len = (16 - amount.leading_zeros() as usize / 8).min(15);
        let bytes = amount.to_be_bytes();
        self.store_uint(len as u64, 4)?.store_bytes(&bytes[16 - len..])
    }

    /// `addr_std` or `addr_none` when absent
    pub fn store_address(self, address: Option<&TonAddress>) -> ProtocolResult<Self> {
        match address {
            None => self.store_uint(0, 2),
            Some(addr) => self
                .store_uint(0b10, 2)?
                .store_bit(false)?
                .store_int(addr.workchain as i64, 8)?
                .store_bytes(&addr.hash),
        }
    }

    pub fn store_ref(mut self, cell: Cell) -> ProtocolResult<Self> {
        if self.refs.len() >= MAX_CELL_REFS {
            return Err(ProtocolError::CellOverflow(format!(
                "more than {} refs",
                MAX_CELL_REFS
            )));
        }
        self.refs.push(cell);
        Ok(self)
    }

    pub fn store_maybe_ref(self, cell: Option<Cell>) -> ProtocolResult<Self> {
        match cell {
            Some(c) => self.store_bit(true)?.store_ref(c),
            None => self.store_bit(false),
        }
    }

    pub fn build(self) -> Cell {
        Cell {
            data: self.data,
            bit_len: self.bit_len,
            refs: self.refs,
        }
    }
}

/// Read cursor over a cell
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.cell.refs.len() - self.ref_pos
    }

    pub fn load_bit(&mut self) -> ProtocolResult<bool> {
        if self.bit_pos >= self.cell.bit_len {
            return Err(ProtocolError::Decode("cell underflow".to_string()));
        }
        let byte = self.cell.data[self.bit_pos / 8];
        let bit = byte & (0x80 >> (self.bit_pos % 8)) != 0;
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> ProtocolResult<u64> {
        if bits > 64 {
            return Err(ProtocolError::Decode(format!("uint width {}", bits)));
        }
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | self.load_bit()? as u64;
        }
        Ok(value)
    }

    pub fn load_int(&mut self, bits: usize) -> ProtocolResult<i64> {
        let raw = self.load_uint(bits)?;
        if bits == 0 || bits == 64 {
            return Ok(raw as i64);
        }
        let shift = 64 - bits;
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn load_bytes(&mut self, len: usize) -> ProtocolResult<Vec<u8>> {
        (0..len).map(|_| self.load_uint(8).map(|b| b as u8)).collect()
    }

    pub fn load_coins(&mut self) -> ProtocolResult<u128> {
        let len = self.load_uint(4)? as usize;
        let mut value = 0u128;
        for byte in self.load_bytes(len)? {
            value = (value << 8) | byte as u128;
        }
        Ok(value)
    }

    pub fn load_address(&mut self) -> ProtocolResult<Option<TonAddress>> {
        match self.load_uint(2)? {
            0b00 => Ok(None),
            0b10 => {
                if self.load_bit()? {
                    return Err(ProtocolError::Decode("anycast addresses are not supported".to_string()));
                }
                let workchain = self.load_int(8)? as i8;
                let bytes = self.load_bytes(32)?;
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(TonAddress::new(workchain, hash)))
            }
            tag => Err(ProtocolError::Decode(format!("unsupported address tag {:02b}", tag))),
        }
    }

    pub fn load_ref(&mut self) -> ProtocolResult<&'a Cell> {
        let cell = self
            .cell
            .refs
            .get(self.ref_pos)
            .ok_or_else(|| ProtocolError::Decode("missing cell reference".to_string()))?;
        self.ref_pos += 1;
        Ok(cell)
    }

    pub fn load_maybe_ref(&mut self) -> ProtocolResult<Option<&'a Cell>> {
        if self.load_bit()? {
            self.load_ref().map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coins_use_minimal_byte_length() {
        let cell = CellBuilder::new().store_coins(0).unwrap().build();
        assert_eq!(cell.bit_len(), 4);

        // 1 TON = 1_000_000_000 nano fits in 4 bytes
        let cell = CellBuilder::new().store_coins(1_000_000_000).unwrap().build();
        assert_eq!(cell.bit_len(), 4 + 32);
        assert_eq!(cell.parser().load_coins().unwrap(), 1_000_000_000);

        assert!(CellBuilder::new().store_coins(1u128 << 120).is_err());
    }

    #[test]
    fn address_layout_is_267_bits() {
        let addr = TonAddress::new(-1, [0xab; 32]);
        let cell = CellBuilder::new()
            .store_address(Some(&addr))
            .unwrap()
            .store_address(None)
            .unwrap()
            .build();
        assert_eq!(cell.bit_len(), 267 + 2);

        let mut slice = cell.parser();
        assert_eq!(slice.load_address().unwrap(), Some(addr));
        assert_eq!(slice.load_address().unwrap(), None);
        assert_eq!(slice.remaining_bits(), 0);
    }

    #[test]
    fn overflow_is_reported() {
        let mut builder = CellBuilder::new();
        for _ in 0..15 {
            builder = builder.store_uint(u64::MAX, 64).unwrap();
        }
        assert!(builder.store_uint(0, 64).is_err());

        let mut builder = CellBuilder::new();
        for _ in 0..4 {
            builder = builder.store_ref(Cell::default()).unwrap();
        }
        assert!(matches!(
            builder.store_ref(Cell::default()),
            Err(ProtocolError::CellOverflow(_))
        ));
        assert!(CellBuilder::new().store_uint(4, 2).is_err());
    }

    #[test]
    fn maybe_ref_reads_back() {
        let child = CellBuilder::new().store_uint(7, 3).unwrap().build();
        let cell = CellBuilder::new()
            .store_maybe_ref(None)
            .unwrap()
            .store_maybe_ref(Some(child.clone()))
            .unwrap()
            .build();
        let mut slice = cell.parser();
        assert!(slice.load_maybe_ref().unwrap().is_none());
        assert_eq!(slice.load_maybe_ref().unwrap(), Some(&child));
        assert!(slice.load_ref().is_err());
    }
}
