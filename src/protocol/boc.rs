// src/protocol/boc.rs
use crate::domain::errors::{ProtocolError, ProtocolResult};
use crate::protocol::cell::Cell;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crc::{Crc, CRC_32_ISCSI};
use std::collections::{HashMap, HashSet};

const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];
const FLAG_HAS_INDEX: u8 = 0x80;
const FLAG_HAS_CRC32C: u8 = 0x40;

const BOC_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Serialize a single-root bag of cells with a CRC32C trailer
pub fn serialize(root: &Cell) -> Vec<u8> {
    let cells = topological_order(root);
    let index: HashMap<&Cell, usize> = cells.iter().enumerate().map(|(i, c)| (*c, i)).collect();
    let size_bytes = bytes_needed(cells.len() as u64);

    // Step 1: cell bodies
    let mut body = Vec::new();
    for cell in &cells {
        let bits = cell.bit_len();
        let full = bits / 8;
        let partial = bits % 8 != 0;
        body.push(cell.refs().len() as u8);
        body.push((full * 2 + partial as usize) as u8);

        let mut data = cell.data()[..full + partial as usize].to_vec();
        if partial {
            // completion tag
            let last = data.len() - 1;
            data[last] |= 0x80 >> (bits % 8);
        }
        body.extend_from_slice(&data);

        for child in cell.refs() {
            let child_index = index.get(child).copied().unwrap_or_default();
            write_uint(&mut body, child_index as u64, size_bytes);
        }
    }

    // Step 2: header
    let offset_bytes = bytes_needed(body.len() as u64);
    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(&BOC_MAGIC);
    out.push(FLAG_HAS_CRC32C | size_bytes as u8);
    out.push(offset_bytes as u8);
    write_uint(&mut out, cells.len() as u64, size_bytes);
    write_uint(&mut out, 1, size_bytes);
    write_uint(&mut out, 0, size_bytes);
    write_uint(&mut out, body.len() as u64, offset_bytes);
    write_uint(&mut out, 0, size_bytes);
    out.extend_from_slice(&body);

    // Step 3: checksum
    let crc = crc32c(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// Parse a bag of cells and return its first root
pub fn deserialize(bytes: &[u8]) -> ProtocolResult<Cell> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.take(4)? != BOC_MAGIC {
        return Err(ProtocolError::Decode("bad bag-of-cells magic".to_string()));
    }
    let flags = reader.take(1)?[0];
    let has_index = flags & FLAG_HAS_INDEX != 0;
    let has_crc = flags & FLAG_HAS_CRC32C != 0;
    let size_bytes = (flags & 0x07) as usize;
    let offset_bytes = reader.take(1)?[0] as usize;
    if size_bytes == 0 || size_bytes > 4 || offset_bytes == 0 || offset_bytes > 8 {
        return Err(ProtocolError::Decode("bad bag-of-cells header".to_string()));
    }

    if has_crc {
        if bytes.len() < 4 {
            return Err(ProtocolError::Decode("truncated bag of cells".to_string()));
        }
        let (payload, trailer) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32c(payload) != expected {
            return Err(ProtocolError::Decode("bag-of-cells checksum mismatch".to_string()));
        }
    }

    let cell_count = reader.uint(size_bytes)? as usize;
    let root_count = reader.uint(size_bytes)? as usize;
    let _absent = reader.uint(size_bytes)?;
    let _total_size = reader.uint(offset_bytes)?;
    if root_count == 0 || cell_count == 0 {
        return Err(ProtocolError::Decode("bag of cells without roots".to_string()));
    }
    // every cell needs at least its two descriptor bytes
    let remaining = reader.remaining();
    let too_many_cells = cell_count
        .checked_mul(2)
        .map_or(true, |needed| needed > remaining);
    let too_many_roots = root_count
        .checked_mul(size_bytes)
        .map_or(true, |needed| needed > remaining);
    if too_many_cells || too_many_roots {
        return Err(ProtocolError::Decode(format!(
            "bag-of-cells header claims {} cells and {} roots in {} bytes",
            cell_count, root_count, remaining
        )));
    }

    let mut roots = Vec::with_capacity(root_count.min(remaining));
    for _ in 0..root_count {
        roots.push(reader.uint(size_bytes)? as usize);
    }
    if has_index {
        let index_len = cell_count
            .checked_mul(offset_bytes)
            .ok_or_else(|| ProtocolError::Decode("bag-of-cells index overflows".to_string()))?;
        reader.take(index_len)?;
    }

    // Step 1: raw cells
    let mut raw = Vec::with_capacity(cell_count.min(reader.remaining()));
    for _ in 0..cell_count {
        let d1 = reader.take(1)?[0];
        let d2 = reader.take(1)?[0] as usize;
        if d1 & 0x08 != 0 {
            return Err(ProtocolError::Decode("exotic cells are not supported".to_string()));
        }
        let ref_count = (d1 & 0x07) as usize;
        let data_len = (d2 + 1) / 2;
        let mut data = reader.take(data_len)?.to_vec();
        let bit_len = if d2 % 2 == 0 {
            data_len * 8
        } else {
            let last = data.last().copied().unwrap_or(0);
            if last == 0 {
                return Err(ProtocolError::Decode("missing completion tag".to_string()));
            }
            let tag = last.trailing_zeros() as usize;
            if let Some(byte) = data.last_mut() {
                *byte &= !(1u8 << tag);
            }
            data_len * 8 - tag - 1
        };
        data.truncate((bit_len + 7) / 8);
        let mut refs = Vec::with_capacity(ref_count);
        for _ in 0..ref_count {
            refs.push(reader.uint(size_bytes)? as usize);
        }
        raw.push((data, bit_len, refs));
    }

    // Step 2: build children first
    let mut built: Vec<Option<Cell>> = vec![None; cell_count];
    for i in (0..cell_count).rev() {
        let (data, bit_len, ref_ids) = raw[i].clone();
        let mut refs = Vec::with_capacity(ref_ids.len());
        for id in ref_ids {
            if id <= i || id >= cell_count {
                return Err(ProtocolError::Decode(format!(
                    "cell {} references {} out of order",
                    i, id
                )));
            }
            let child = built[id]
                .clone()
                .ok_or_else(|| ProtocolError::Decode(format!("cell {} not built", id)))?;
            refs.push(child);
        }
        built[i] = Some(Cell::from_parts(data, bit_len, refs)?);
    }

    let root = roots[0];
    built
        .get_mut(root)
        .and_then(Option::take)
        .ok_or_else(|| ProtocolError::Decode(format!("root index {} out of range", root)))
}

pub fn to_base64(root: &Cell) -> String {
    BASE64.encode(serialize(root))
}

pub fn from_base64(payload: &str) -> ProtocolResult<Cell> {
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| ProtocolError::Decode(format!("payload is not base64: {}", e)))?;
    deserialize(&bytes)
}

/// Unique cells, every parent before its children
fn topological_order(root: &Cell) -> Vec<&Cell> {
    fn visit<'a>(cell: &'a Cell, seen: &mut HashSet<&'a Cell>, post: &mut Vec<&'a Cell>) {
        if !seen.insert(cell) {
            return;
        }
        for child in cell.refs() {
            visit(child, seen, post);
        }
        post.push(cell);
    }

    let mut seen = HashSet::new();
    let mut post = Vec::new();
    visit(root, &mut seen, &mut post);
    post.reverse();
    post
}

fn bytes_needed(value: u64) -> usize {
    let mut n = 1;
    while n < 8 && value >> (n * 8) != 0 {
        n += 1;
    }
    n
}

fn write_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> ProtocolResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(ProtocolError::Decode("truncated bag of cells".to_string()));
        }
        let end = self.pos + n;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn uint(&mut self, width: usize) -> ProtocolResult<u64> {
        Ok(self
            .take(width)?
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }
}

/// CRC32C (Castagnoli)
pub(crate) fn crc32c(data: &[u8]) -> u32 {
    BOC_CRC.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cell::CellBuilder;

    #[test]
    fn crc32c_check_value() {
        assert_eq!(crc32c(b"123456789"), 0xE306_9283);
    }

    #[test]
    fn empty_cell_matches_reference_encoding() {
        let bytes = serialize(&Cell::default());
        assert_eq!(
            bytes,
            vec![
                0xb5, 0xee, 0x9c, 0x72, 0x41, 0x01, 0x01, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00,
                0x4c, 0xac, 0xb9, 0xcd
            ]
        );
        assert_eq!(to_base64(&Cell::default()), "te6cckEBAQEAAgAAAEysuc0=");
    }

    #[test]
    fn shared_children_are_stored_once() {
        let shared = CellBuilder::new().store_uint(0xdead, 16).unwrap().build();
        let left = CellBuilder::new()
            .store_uint(1, 3)
            .unwrap()
            .store_ref(shared.clone())
            .unwrap()
            .build();
        let root = CellBuilder::new()
            .store_ref(left)
            .unwrap()
            .store_ref(shared)
            .unwrap()
            .build();

        let bytes = serialize(&root);
        // three unique cells
        assert_eq!(bytes[6], 3);
        assert_eq!(deserialize(&bytes).unwrap(), root);
    }

    #[test]
    fn odd_bit_lengths_survive() {
        let root = CellBuilder::new().store_uint(0b101, 3).unwrap().build();
        let decoded = from_base64(&to_base64(&root)).unwrap();
        assert_eq!(decoded.bit_len(), 3);
        assert_eq!(decoded, root);
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let root = CellBuilder::new().store_uint(42, 32).unwrap().build();
        let mut bytes = serialize(&root);
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        assert!(deserialize(&bytes).is_err());
        assert!(deserialize(&[0u8; 3]).is_err());
    }

    #[test]
    fn oversized_header_counts_are_rejected() {
        // no checksum, four-byte sizes, 0xffffffff cells, one root
        let bytes = [
            0xb5, 0xee, 0x9c, 0x72, 0x04, 0x01, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        match deserialize(&bytes) {
            Err(ProtocolError::Decode(message)) => assert!(message.contains("claims")),
            other => panic!("expected decode error, got {:?}", other),
        }

        let mut many_roots = bytes;
        many_roots[6..10].copy_from_slice(&[0, 0, 0, 1]);
        many_roots[10..14].copy_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(deserialize(&many_roots), Err(ProtocolError::Decode(_))));
    }
}
