//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store holding one layered checkpoint file.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_into` fills the buffer with exactly the bytes previously
///   written at that offset
/// - `sync` makes all appended data durable
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size
    /// or an I/O error occurs.
    fn read_into(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()>;

    /// Reads `len` bytes starting at `offset` into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Same as [`StorageBackend::read_into`].
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(offset, &mut buf)?;
        Ok(buf)
    }

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs or the write stalls.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Flushes and syncs data and metadata to durable storage.
    ///
    /// After this returns, every appended byte survives process and
    /// machine failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// Used to discard the tail left behind by a checkpoint attempt that
    /// failed part-way through a delta layer.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
