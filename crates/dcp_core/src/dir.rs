//! Run directory management.
//!
//! Every rank of a run writes into one shared directory named by the run id:
//!
//! ```text
//! <base_dir>/<run_id>/
//! ├─ dcp-id<file_id>-rank<rank>.fti   # layered file (base + deltas)
//! ├─ dcp-rank<rank>.meta              # metadata of the last checkpoint
//! └─ dcp-rank<rank>.tmp               # metadata being written
//! ```
//!
//! Ranks never touch each other's files.

use crate::error::{CoreError, CoreResult};
use crate::metadata::Metadata;
use dcp_storage::FileBackend;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A run directory.
#[derive(Debug, Clone)]
pub struct RunDir {
    path: PathBuf,
    sync_directory: bool,
}

impl RunDir {
    /// Creates `<base_dir>/<run_id>`, accepting an existing directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created, or
    /// `InvalidArgument` if the path exists but is not a directory.
    pub fn create(base_dir: &Path, run_id: u64, sync_directory: bool) -> CoreResult<Self> {
        let path = base_dir.join(run_id.to_string());
        match fs::create_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
        Self::open(&path, sync_directory)
    }

    /// Opens an existing run directory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the path is not a directory.
    pub fn open(path: &Path, sync_directory: bool) -> CoreResult<Self> {
        if !path.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "unable to use checkpoint directory '{}'",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            sync_directory,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the layered file `file_id` of `rank`.
    #[must_use]
    pub fn layered_path(&self, file_id: u64, rank: u32) -> PathBuf {
        self.path.join(format!("dcp-id{file_id}-rank{rank}.fti"))
    }

    /// Path of the metadata file of `rank`.
    #[must_use]
    pub fn metadata_path(&self, rank: u32) -> PathBuf {
        self.path.join(format!("dcp-rank{rank}.meta"))
    }

    /// Path of the temporary metadata file of `rank`.
    #[must_use]
    pub fn metadata_temp_path(&self, rank: u32) -> PathBuf {
        self.path.join(format!("dcp-rank{rank}.tmp"))
    }

    /// Opens the layered file for a layer: truncated for a base layer,
    /// appended to otherwise.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be opened.
    pub fn open_layered(&self, file_id: u64, rank: u32, base: bool) -> CoreResult<FileBackend> {
        let path = self.layered_path(file_id, rank);
        let backend = if base {
            FileBackend::create(&path)?
        } else {
            FileBackend::open(&path)?
        };
        Ok(backend)
    }

    /// Opens the layered file for reading.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file does not exist.
    pub fn open_layered_read(&self, file_id: u64, rank: u32) -> CoreResult<FileBackend> {
        Ok(FileBackend::open_read_only(&self.layered_path(file_id, rank))?)
    }

    /// Loads the metadata of `rank`.
    ///
    /// Returns `None` if no checkpoint has completed yet.
    ///
    /// # Errors
    ///
    /// Returns an I/O error or `InvalidFormat` on a malformed record.
    pub fn load_metadata(&self, rank: u32) -> CoreResult<Option<Metadata>> {
        match fs::read(self.metadata_path(rank)) {
            Ok(data) => Ok(Some(Metadata::decode(&data)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Saves the metadata of `rank` atomically.
    ///
    /// Uses write-then-rename: the record goes to the temporary path, is
    /// synced, then renamed over the canonical path. Readers see either the
    /// old or the new record, never a partial one.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any step fails.
    pub fn save_metadata(&self, rank: u32, metadata: &Metadata) -> CoreResult<()> {
        let data = metadata.encode()?;
        let temp_path = self.metadata_temp_path(rank);

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.metadata_path(rank))?;
        self.sync_directory()
    }

    /// Deletes the layered file `file_id` of `rank`.
    ///
    /// Returns `false` if the file did not exist.
    ///
    /// # Errors
    ///
    /// Returns an I/O error for any failure other than a missing file.
    pub fn remove_layered(&self, file_id: u64, rank: u32) -> CoreResult<bool> {
        match fs::remove_file(self.layered_path(file_id, rank)) {
            Ok(()) => {
                self.sync_directory()?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Syncs the directory so creations, renames and deletions are durable.
    ///
    /// On Windows, directory fsync is not supported; NTFS journaling covers
    /// metadata updates, so this is a no-op there.
    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        if self.sync_directory {
            File::open(&self.path)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}
