//! Layered file format.
//!
//! A layered file holds one base layer followed by any number of delta
//! layers, all little-endian:
//!
//! ```text
//! base:  | id: i32 | byte_size: u64 | data, zero-padded to a block multiple | ... per variable
//! delta: | meta: 6 bytes | block_size bytes of block data | ... per committed block
//! ```
//!
//! The block-meta record packs an 18-bit variable id and a 30-bit block
//! index into one 48-bit integer, `id | (block_index << 18)`, stored as six
//! little-endian bytes. Delta records carry no layer boundary; later records
//! simply override earlier ones.

use crate::error::{CoreError, CoreResult};
use crate::types::{padded_size, VarId, MAX_BLOCK_IDX, MAX_VAR_ID};
use dcp_storage::StorageBackend;

/// Size of a base-layer variable header.
pub const BASE_HEADER_SIZE: usize = 12;

/// Size of a delta block-meta record.
pub const BLOCK_META_SIZE: usize = 6;

const VAR_ID_BITS: u32 = 18;

/// Header preceding a variable's data in the base layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseHeader {
    /// Variable id.
    pub id: VarId,
    /// Logical byte size of the data that follows (before padding).
    pub byte_size: u64,
}

impl BaseHeader {
    /// Encodes the header.
    ///
    /// # Errors
    ///
    /// Returns `Overflow` if the id does not fit an `i32`.
    pub fn encode(&self) -> CoreResult<[u8; BASE_HEADER_SIZE]> {
        let id = i32::try_from(self.id.as_u32())
            .map_err(|_| CoreError::overflow(format!("{} does not fit a base header", self.id)))?;
        let mut buf = [0u8; BASE_HEADER_SIZE];
        buf[..4].copy_from_slice(&id.to_le_bytes());
        buf[4..].copy_from_slice(&self.byte_size.to_le_bytes());
        Ok(buf)
    }

    /// Decodes a header.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a negative id.
    pub fn decode(buf: &[u8; BASE_HEADER_SIZE]) -> CoreResult<Self> {
        let id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let id = u32::try_from(id)
            .map_err(|_| CoreError::invalid_format(format!("negative variable id {id}")))?;
        let mut size = [0u8; 8];
        size.copy_from_slice(&buf[4..]);
        Ok(Self {
            id: VarId::new(id),
            byte_size: u64::from_le_bytes(size),
        })
    }
}

/// Address of one committed block in a delta layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    /// Variable id (at most [`MAX_VAR_ID`]).
    pub id: VarId,
    /// Block index within the variable (at most [`MAX_BLOCK_IDX`]).
    pub block_index: u64,
}

impl BlockMeta {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Returns `Overflow` if the id or block index exceeds its bit field.
    pub fn encode(&self) -> CoreResult<[u8; BLOCK_META_SIZE]> {
        if !self.id.is_addressable() {
            return Err(CoreError::overflow(format!(
                "overflow in ID (id: {} > MAX_ID: {MAX_VAR_ID})",
                self.id.as_u32()
            )));
        }
        if self.block_index > MAX_BLOCK_IDX {
            return Err(CoreError::overflow(format!(
                "block index {} of {} exceeds {MAX_BLOCK_IDX}",
                self.block_index, self.id
            )));
        }

        let packed = u64::from(self.id.as_u32()) | (self.block_index << VAR_ID_BITS);
        let bytes = packed.to_le_bytes();
        let mut buf = [0u8; BLOCK_META_SIZE];
        buf.copy_from_slice(&bytes[..BLOCK_META_SIZE]);
        Ok(buf)
    }

    /// Decodes a record. Every 48-bit pattern is a valid address.
    #[must_use]
    pub fn decode(buf: &[u8; BLOCK_META_SIZE]) -> Self {
        let mut bytes = [0u8; 8];
        bytes[..BLOCK_META_SIZE].copy_from_slice(buf);
        let packed = u64::from_le_bytes(bytes);
        Self {
            id: VarId::new((packed & u64::from(MAX_VAR_ID)) as u32),
            block_index: packed >> VAR_ID_BITS,
        }
    }
}

/// Sequential reader over a layered file.
pub struct LayerReader<'a> {
    backend: &'a dyn StorageBackend,
    position: u64,
    end: u64,
}

impl<'a> LayerReader<'a> {
    /// Creates a reader over the first `end` bytes of `backend`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the backend holds fewer than `end` bytes.
    pub fn new(backend: &'a dyn StorageBackend, end: u64) -> CoreResult<Self> {
        let size = backend.size()?;
        if size < end {
            return Err(CoreError::invalid_format(format!(
                "layered file holds {size} bytes, metadata records {end}"
            )));
        }
        Ok(Self {
            backend,
            position: 0,
            end,
        })
    }

    /// Current read offset.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// True once the recorded end has been reached.
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.position >= self.end
    }

    /// Fills `buf` from the current position.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the read would cross the recorded end.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> CoreResult<()> {
        let next = self.position + buf.len() as u64;
        if next > self.end {
            return Err(CoreError::invalid_format(format!(
                "truncated layered file: need {} bytes at offset {}, end is {}",
                buf.len(),
                self.position,
                self.end
            )));
        }
        self.backend.read_into(self.position, buf)?;
        self.position = next;
        Ok(())
    }

    /// Advances the position without reading.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the skip would cross the recorded end.
    pub fn skip(&mut self, len: u64) -> CoreResult<()> {
        let next = self.position + len;
        if next > self.end {
            return Err(CoreError::invalid_format(format!(
                "truncated layered file: cannot skip {len} bytes at offset {}",
                self.position
            )));
        }
        self.position = next;
        Ok(())
    }

    /// Reads a base-layer header.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` on truncation or a negative id.
    pub fn read_base_header(&mut self) -> CoreResult<BaseHeader> {
        let mut buf = [0u8; BASE_HEADER_SIZE];
        self.read_exact(&mut buf)?;
        BaseHeader::decode(&buf)
    }

    /// Reads a delta block-meta record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` on truncation.
    pub fn read_block_meta(&mut self) -> CoreResult<BlockMeta> {
        let mut buf = [0u8; BLOCK_META_SIZE];
        self.read_exact(&mut buf)?;
        Ok(BlockMeta::decode(&buf))
    }
}

/// One record of a layered file, as listed by [`scan_layers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRecord {
    /// A variable in the base layer.
    Base {
        /// Offset of the header.
        offset: u64,
        /// Decoded header.
        header: BaseHeader,
    },
    /// A committed block in a delta layer.
    Delta {
        /// Offset of the block-meta record.
        offset: u64,
        /// Decoded record.
        meta: BlockMeta,
    },
}

/// Lists the records of a layered file holding `base_variables` base entries.
///
/// # Errors
///
/// Returns `InvalidFormat` if the file is truncated.
pub fn scan_layers(
    backend: &dyn StorageBackend,
    end: u64,
    base_variables: usize,
    block_size: u64,
) -> CoreResult<Vec<LayerRecord>> {
    let mut reader = LayerReader::new(backend, end)?;
    let mut records = Vec::new();

    for _ in 0..base_variables {
        let offset = reader.position();
        let header = reader.read_base_header()?;
        reader.skip(padded_size(header.byte_size, block_size))?;
        records.push(LayerRecord::Base { offset, header });
    }

    while !reader.at_end() {
        let offset = reader.position();
        let meta = reader.read_block_meta()?;
        reader.skip(block_size)?;
        records.push(LayerRecord::Delta { offset, meta });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcp_storage::InMemoryBackend;
    use proptest::prelude::*;

    #[test]
    fn block_meta_bit_layout() {
        let meta = BlockMeta {
            id: VarId::new(1),
            block_index: 1,
        };
        // id in bits 0..18, block index from bit 18.
        assert_eq!(meta.encode().unwrap(), [0x01, 0x00, 0x04, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn block_meta_extremes() {
        let meta = BlockMeta {
            id: VarId::new(MAX_VAR_ID),
            block_index: MAX_BLOCK_IDX,
        };
        assert_eq!(meta.encode().unwrap(), [0xff; 6]);
        assert_eq!(BlockMeta::decode(&[0xff; 6]), meta);
    }

    #[test]
    fn block_meta_overflow() {
        let too_large_id = BlockMeta {
            id: VarId::new(MAX_VAR_ID + 1),
            block_index: 0,
        };
        assert!(matches!(too_large_id.encode(), Err(CoreError::Overflow { .. })));

        let too_large_block = BlockMeta {
            id: VarId::new(0),
            block_index: MAX_BLOCK_IDX + 1,
        };
        assert!(matches!(too_large_block.encode(), Err(CoreError::Overflow { .. })));
    }

    #[test]
    fn base_header_layout() {
        let header = BaseHeader {
            id: VarId::new(2),
            byte_size: 300,
        };
        let buf = header.encode().unwrap();
        assert_eq!(&buf[..4], &2i32.to_le_bytes());
        assert_eq!(&buf[4..], &300u64.to_le_bytes());
        assert_eq!(BaseHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn base_header_negative_id_rejected() {
        let mut buf = [0u8; BASE_HEADER_SIZE];
        buf[..4].copy_from_slice(&(-3i32).to_le_bytes());
        assert!(matches!(
            BaseHeader::decode(&buf),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn reader_stops_at_recorded_end() {
        let backend = InMemoryBackend::with_data(vec![0u8; 10]);
        let mut reader = LayerReader::new(&backend, 8).unwrap();
        let mut buf = [0u8; 6];
        reader.read_exact(&mut buf).unwrap();
        assert!(reader.read_exact(&mut buf).is_err());
        assert!(reader.skip(2).is_ok());
        assert!(reader.at_end());
    }

    #[test]
    fn reader_rejects_short_file() {
        let backend = InMemoryBackend::with_data(vec![0u8; 4]);
        assert!(matches!(
            LayerReader::new(&backend, 8),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn scan_lists_base_then_deltas() {
        let block = 4u64;
        let mut image = Vec::new();
        image.extend_from_slice(
            &BaseHeader {
                id: VarId::new(9),
                byte_size: 5,
            }
            .encode()
            .unwrap(),
        );
        image.extend_from_slice(&[1, 2, 3, 4, 5, 0, 0, 0]);
        image.extend_from_slice(
            &BlockMeta {
                id: VarId::new(9),
                block_index: 1,
            }
            .encode()
            .unwrap(),
        );
        image.extend_from_slice(&[6, 0, 0, 0]);

        let end = image.len() as u64;
        let backend = InMemoryBackend::with_data(image);
        let records = scan_layers(&backend, end, 1, block).unwrap();

        assert_eq!(records.len(), 2);
        assert!(matches!(
            records[0],
            LayerRecord::Base { offset: 0, header } if header.byte_size == 5
        ));
        assert!(matches!(
            records[1],
            LayerRecord::Delta { offset: 20, meta } if meta.block_index == 1
        ));
    }

    proptest! {
        #[test]
        fn block_meta_decode_inverts_encode(id in 0..=MAX_VAR_ID, block in 0..=MAX_BLOCK_IDX) {
            let meta = BlockMeta { id: VarId::new(id), block_index: block };
            prop_assert_eq!(BlockMeta::decode(&meta.encode().unwrap()), meta);
        }
    }
}
