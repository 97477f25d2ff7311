//! Checkpoint metadata record.
//!
//! One record per rank, rewritten after every checkpoint. Layout, all
//! little-endian:
//!
//! ```text
//! | layered_file_size: u64 | logical_size: u64 | file_id: i32 | block_size: u64 |
//! | variable_count: i32 | (id: i32, byte_size: u64) x variable_count |
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::VarId;

/// Size of the fixed part of the record.
pub const METADATA_FIXED_SIZE: usize = 8 + 8 + 4 + 8 + 4;

/// Size of one variable entry.
pub const METADATA_ENTRY_SIZE: usize = 4 + 8;

/// One variable as recorded at the last checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableEntry {
    /// Variable id.
    pub id: VarId,
    /// Logical byte size at the last checkpoint.
    pub byte_size: u64,
}

/// Summary of the latest completed checkpoint of one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Bytes of the layered file that belong to completed checkpoints.
    pub layered_file_size: u64,
    /// Sum of the variables' logical byte sizes.
    pub logical_size: u64,
    /// Layered file the checkpoint lives in.
    pub file_id: u64,
    /// Block size the file was written with.
    pub block_size: u64,
    /// Variables in registration order.
    pub variables: Vec<VariableEntry>,
}

impl Metadata {
    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Returns `Overflow` if the file id, variable count or a variable id
    /// does not fit an `i32`.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf =
            Vec::with_capacity(METADATA_FIXED_SIZE + METADATA_ENTRY_SIZE * self.variables.len());

        buf.extend_from_slice(&self.layered_file_size.to_le_bytes());
        buf.extend_from_slice(&self.logical_size.to_le_bytes());
        buf.extend_from_slice(&to_i32("file id", self.file_id)?.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        let count = to_i32("variable count", self.variables.len() as u64)?;
        buf.extend_from_slice(&count.to_le_bytes());

        for entry in &self.variables {
            let id = to_i32("variable id", u64::from(entry.id.as_u32()))?;
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&entry.byte_size.to_le_bytes());
        }

        Ok(buf)
    }

    /// Decodes a record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the data is truncated, carries trailing
    /// bytes, negative counts or ids, or a zero block size.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let mut cursor = Cursor { data, pos: 0 };

        let layered_file_size = cursor.u64()?;
        let logical_size = cursor.u64()?;
        let file_id = non_negative("file id", cursor.i32()?)?;
        let block_size = cursor.u64()?;
        if block_size == 0 {
            return Err(CoreError::invalid_format("metadata block size is zero"));
        }
        let count = non_negative("variable count", cursor.i32()?)? as usize;

        let expected = METADATA_FIXED_SIZE + count * METADATA_ENTRY_SIZE;
        if data.len() != expected {
            return Err(CoreError::invalid_format(format!(
                "metadata is {} bytes, {count} variables need {expected}",
                data.len()
            )));
        }

        let mut variables = Vec::with_capacity(count);
        for _ in 0..count {
            let id = non_negative("variable id", cursor.i32()?)?;
            let byte_size = cursor.u64()?;
            variables.push(VariableEntry {
                id: VarId::new(id as u32),
                byte_size,
            });
        }

        Ok(Self {
            layered_file_size,
            logical_size,
            file_id,
            block_size,
            variables,
        })
    }
}

fn to_i32(what: &str, value: u64) -> CoreResult<i32> {
    i32::try_from(value).map_err(|_| {
        CoreError::overflow(format!("{what} {value} does not fit the metadata record"))
    })
}

fn non_negative(what: &str, value: i32) -> CoreResult<u64> {
    u64::try_from(value)
        .map_err(|_| CoreError::invalid_format(format!("negative {what} {value} in metadata")))
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let end = self.pos + N;
        if end > self.data.len() {
            return Err(CoreError::invalid_format("metadata too short"));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    fn u64(&mut self) -> CoreResult<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    fn i32(&mut self) -> CoreResult<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        Metadata {
            layered_file_size: 10_264,
            logical_size: 10_240,
            file_id: 3,
            block_size: 128,
            variables: vec![
                VariableEntry {
                    id: VarId::new(0),
                    byte_size: 2_560,
                },
                VariableEntry {
                    id: VarId::new(1),
                    byte_size: 7_680,
                },
            ],
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let meta = sample();
        let encoded = meta.encode().unwrap();
        assert_eq!(encoded.len(), METADATA_FIXED_SIZE + 2 * METADATA_ENTRY_SIZE);
        assert_eq!(Metadata::decode(&encoded).unwrap(), meta);
    }

    #[test]
    fn field_offsets() {
        let encoded = sample().encode().unwrap();
        assert_eq!(&encoded[0..8], &10_264u64.to_le_bytes());
        assert_eq!(&encoded[16..20], &3i32.to_le_bytes());
        assert_eq!(&encoded[20..28], &128u64.to_le_bytes());
        assert_eq!(&encoded[28..32], &2i32.to_le_bytes());
        assert_eq!(&encoded[32..36], &0i32.to_le_bytes());
    }

    #[test]
    fn empty_variable_list() {
        let meta = Metadata {
            variables: Vec::new(),
            ..sample()
        };
        let decoded = Metadata::decode(&meta.encode().unwrap()).unwrap();
        assert!(decoded.variables.is_empty());
    }

    #[test]
    fn truncated_rejected() {
        let encoded = sample().encode().unwrap();
        let result = Metadata::decode(&encoded[..encoded.len() - 1]);
        assert!(matches!(result, Err(CoreError::InvalidFormat { .. })));
        assert!(Metadata::decode(&encoded[..10]).is_err());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut encoded = sample().encode().unwrap();
        encoded.push(0);
        assert!(Metadata::decode(&encoded).is_err());
    }

    #[test]
    fn negative_count_rejected() {
        let mut encoded = sample().encode().unwrap();
        encoded[28..32].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(
            Metadata::decode(&encoded),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn file_id_overflow() {
        let meta = Metadata {
            file_id: u64::from(u32::MAX),
            ..sample()
        };
        assert!(matches!(meta.encode(), Err(CoreError::Overflow { .. })));
    }
}
