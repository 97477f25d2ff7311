//! In-memory layered file image.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// Layered file held in memory, for exercising the diff and recovery paths
/// without a run directory.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a hand-built layered image.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Copy of the image.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_into(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let data = self.data.read();
        let size = data.len() as u64;
        let len = buf.len();
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + len]);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        if new_size > data.len() as u64 {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot grow a {} byte image to {new_size}", data.len()),
            )));
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_append_at_increasing_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(&[1; 12]).unwrap(), 0);
        assert_eq!(backend.append(&[2; 6]).unwrap(), 12);
        assert_eq!(backend.size().unwrap(), 18);
    }

    #[test]
    fn read_past_recorded_end_fails() {
        let backend = InMemoryBackend::with_data(vec![0; 5]);
        let mut buf = [0u8; 10];
        let result = backend.read_into(3, &mut buf);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn truncate_drops_failed_attempt_tail() {
        let mut backend = InMemoryBackend::with_data(vec![7; 20]);
        backend.truncate(14).unwrap();
        assert_eq!(backend.data(), vec![7; 14]);
        assert!(backend.truncate(15).is_err());
    }
}
