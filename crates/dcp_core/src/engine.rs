//! Checkpointing engine facade.

use crate::checkpoint::write_layer;
use crate::config::Config;
use crate::digest::BlockDigester;
use crate::dir::RunDir;
use crate::error::{CoreError, CoreResult};
use crate::group::{timestamp_millis, ExecInfo, ProcessGroup};
use crate::layer::LayerPosition;
use crate::metadata::{Metadata, VariableEntry};
use crate::recovery::recover_layers;
use crate::registry::{Registration, Registry};
use crate::stats::{CheckpointReport, DcpStats, RecoveryReport};
use crate::types::SharedBuffer;
use dcp_storage::StorageBackend;
use std::io;
use tracing::{debug, error, info, warn};

/// A differential checkpointing engine for one rank.
///
/// `Dcp` owns the variable registry, the per-block digest history and the
/// layer schedule of one process. Each call to [`Dcp::checkpoint`] writes
/// either a full base layer or a delta layer holding only the blocks whose
/// digest changed; [`Dcp::recover`] rebuilds every registered buffer from the
/// latest completed checkpoint.
///
/// # Example
///
/// ```rust,ignore
/// use dcp_core::{shared_buffer, Config, Dcp, LocalGroup};
///
/// let mut dcp = Dcp::init(&LocalGroup, Config::default().base_dir("/tmp/dcp"))?;
///
/// let state = shared_buffer(vec![0u8; 4096]);
/// dcp.protect(0, state.clone(), 1024, 4)?;
///
/// for step in 0..100 {
///     // ... mutate `state` ...
///     dcp.checkpoint(&format!("step-{step}"))?;
/// }
///
/// // After a failure:
/// dcp.recover()?;
/// ```
#[derive(Debug)]
pub struct Dcp {
    config: Config,
    exec: ExecInfo,
    dir: RunDir,
    registry: Registry,
    digester: Box<dyn BlockDigester>,
    /// Checkpoints taken, including skipped stack slots.
    counter: u64,
    /// Bytes of the current layered file that belong to completed checkpoints.
    committed_size: u64,
    /// Set when a variable was added after the current base layer.
    force_new_base: bool,
    stats: DcpStats,
}

impl Dcp {
    /// Initializes an engine for this rank of `group`.
    ///
    /// Agrees on a run id across the group (unless `config.run_id` fixes
    /// one) and creates `<base_dir>/<run_id>`. Rank 0 logs the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid configuration and an I/O
    /// error if the run directory cannot be created.
    pub fn init(group: &dyn ProcessGroup, config: Config) -> CoreResult<Self> {
        let rank = group.rank();
        Self::init_inner(group, config).map_err(|e| {
            error!(rank, error = %e, "initialization failed");
            e.at(rank, "init")
        })
    }

    fn init_inner(group: &dyn ProcessGroup, config: Config) -> CoreResult<Self> {
        let rank = group.rank();
        let size = group.size();
        if rank >= size {
            return Err(CoreError::invalid_argument(format!(
                "rank {rank} outside a group of {size}"
            )));
        }
        config.validate(size)?;

        let run_id = config
            .run_id
            .unwrap_or_else(|| group.broadcast_from_root(timestamp_millis()));
        let dir = RunDir::create(&config.base_dir, run_id, config.sync_directory)?;

        let exec = ExecInfo {
            rank,
            size,
            node_size: config.node_size,
            node_id: rank / config.node_size,
            run_id,
        };

        if rank == 0 {
            info!(%exec, "initialized");
            info!(%config, dir = %dir.path().display(), "configuration");
        }

        Ok(Self {
            digester: config.digest.digester(),
            config,
            exec,
            dir,
            registry: Registry::new(),
            counter: 0,
            committed_size: 0,
            force_new_base: false,
            stats: DcpStats::new(),
        })
    }

    /// Registers `buffer` under `id`, or re-registers an existing id.
    ///
    /// The buffer must hold at least `element_count * element_size` bytes.
    /// A new id registered after the current base layer makes the next
    /// checkpoint start a new base.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a negative id, an overflowing size or a
    /// short buffer. Nothing is registered in that case.
    pub fn protect(
        &mut self,
        id: i32,
        buffer: SharedBuffer,
        element_count: usize,
        element_size: usize,
    ) -> CoreResult<()> {
        let rank = self.exec.rank;
        let registration = self
            .registry
            .protect(id, buffer, element_count, element_size)
            .map_err(|e| {
                error!(rank, id, error = %e, "protect failed");
                e.at(rank, "protect")
            })?;

        if registration == Registration::Added && !self.position().is_base() {
            self.force_new_base = true;
        }
        debug!(rank, id, element_count, element_size, ?registration, "protected");
        Ok(())
    }

    /// Writes one checkpoint of every registered variable.
    ///
    /// `label` only appears in logs and in the returned report.
    ///
    /// # Errors
    ///
    /// Returns `Overflow` if a variable cannot be addressed, or an I/O error.
    /// A failed checkpoint does not advance the schedule; the next attempt
    /// rewrites the same layer.
    pub fn checkpoint(&mut self, label: &str) -> CoreResult<CheckpointReport> {
        let rank = self.exec.rank;
        match self.checkpoint_inner(label) {
            Ok(report) => {
                self.stats.record_checkpoint(&report);
                info!(
                    rank,
                    label,
                    file_id = report.position.file_id,
                    layer = report.position.layer,
                    committed = report.blocks_committed,
                    total = report.blocks_total,
                    bytes = report.payload_bytes,
                    file_size = report.layered_file_size,
                    "checkpoint complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.stats.record_error();
                error!(rank, label, error = %e, "checkpoint failed");
                Err(e.at(rank, "checkpoint"))
            }
        }
    }

    fn checkpoint_inner(&mut self, label: &str) -> CoreResult<CheckpointReport> {
        let rank = self.exec.rank;
        let mut counter = self.counter;
        if self.force_new_base {
            let current = LayerPosition::from_counter(counter, self.config.stack_size);
            if !current.is_base() {
                counter = current.next_base_counter();
            }
        }
        let position = LayerPosition::from_counter(counter, self.config.stack_size);

        let mut backend = self
            .dir
            .open_layered(position.file_id, rank, position.is_base())?;
        if !position.is_base() {
            let size = backend.size()?;
            if size < self.committed_size {
                return Err(CoreError::invalid_format(format!(
                    "layered file {} holds {size} bytes, {} committed",
                    position.file_id, self.committed_size
                )));
            }
            if size > self.committed_size {
                warn!(
                    rank,
                    discarded = size - self.committed_size,
                    "discarding tail of a failed checkpoint"
                );
                backend.truncate(self.committed_size)?;
            }
        }

        let outcome = write_layer(
            &self.registry,
            position,
            self.config.block_size,
            self.digester.as_ref(),
            &mut backend,
        )?;
        backend.sync()?;
        let layered_file_size = backend.size()?;
        drop(backend);

        let metadata = Metadata {
            layered_file_size,
            logical_size: outcome.logical_bytes,
            file_id: position.file_id,
            block_size: self.config.block_size,
            variables: self
                .registry
                .iter()
                .map(|var| VariableEntry {
                    id: var.id(),
                    byte_size: var.byte_size(),
                })
                .collect(),
        };
        self.dir.save_metadata(rank, &metadata)?;

        // The checkpoint is durable; nothing below can fail it.
        for (var, hashes) in self.registry.iter_mut().zip(outcome.hashes) {
            var.replace_hashes(hashes);
            if position.is_last_delta() {
                var.invalidate_hashes();
            }
        }
        self.counter = counter + 1;
        self.committed_size = layered_file_size;
        self.force_new_base = false;

        let retired_file = position
            .retired_file_id()
            .and_then(|file_id| self.retire(file_id));

        Ok(CheckpointReport {
            label: label.to_string(),
            position,
            variables: self.registry.len(),
            logical_bytes: outcome.logical_bytes,
            blocks_total: outcome.blocks_total,
            blocks_committed: outcome.blocks_committed,
            payload_bytes: outcome.payload_bytes,
            layered_file_size,
            retired_file,
        })
    }

    /// Deletes an obsolete layered file. Failures are logged, not returned.
    fn retire(&self, file_id: u64) -> Option<u64> {
        let rank = self.exec.rank;
        match self.dir.remove_layered(file_id, rank) {
            Ok(true) => {
                debug!(rank, file_id, "retired layered file");
                Some(file_id)
            }
            Ok(false) => None,
            Err(e) => {
                warn!(rank, file_id, error = %e, "cannot remove obsolete layered file");
                None
            }
        }
    }

    /// Restores every registered buffer from the latest checkpoint.
    ///
    /// When called before this process took any checkpoint (a restart), the
    /// schedule moves to the next stack so the recovered file is only
    /// retired once a new base is durable.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if no checkpoint exists, `RecoveryMismatch` if
    /// the registrations do not match the checkpoint, or `InvalidFormat` for
    /// corrupt files. On error no buffer has been modified.
    pub fn recover(&mut self) -> CoreResult<RecoveryReport> {
        let rank = self.exec.rank;
        match self.recover_inner() {
            Ok(report) => {
                self.stats.record_recovery();
                info!(
                    rank,
                    file_id = report.file_id,
                    variables = report.variables,
                    base_bytes = report.base_bytes,
                    delta_blocks = report.delta_blocks,
                    "recovery complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.stats.record_error();
                error!(rank, error = %e, "recovery failed");
                Err(e.at(rank, "recover"))
            }
        }
    }

    fn recover_inner(&mut self) -> CoreResult<RecoveryReport> {
        let rank = self.exec.rank;
        let metadata = self.dir.load_metadata(rank)?.ok_or_else(|| {
            CoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "no checkpoint metadata at '{}'",
                    self.dir.metadata_path(rank).display()
                ),
            ))
        })?;

        let backend = self.dir.open_layered_read(metadata.file_id, rank)?;
        let report = recover_layers(&metadata, &backend, &self.registry)?;

        if self.counter == 0 {
            self.counter = (metadata.file_id + 1) * self.config.stack_size;
            debug!(rank, counter = self.counter, "schedule moved past recovered file");
        }
        Ok(report)
    }

    /// Position the next checkpoint would take without forced rollover.
    #[must_use]
    pub fn position(&self) -> LayerPosition {
        LayerPosition::from_counter(self.counter, self.config.stack_size)
    }

    /// Checkpoint counter.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> &DcpStats {
        &self.stats
    }

    /// Execution facts.
    #[must_use]
    pub fn exec(&self) -> &ExecInfo {
        &self.exec
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The run directory.
    #[must_use]
    pub fn run_dir(&self) -> &RunDir {
        &self.dir
    }

    /// Registered variables.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestKind;
    use crate::group::{FixedGroup, LocalGroup};
    use crate::types::shared_buffer;
    use tempfile::{tempdir, TempDir};

    fn engine(stack_size: u64) -> (TempDir, Dcp) {
        let dir = tempdir().unwrap();
        let config = Config::default()
            .base_dir(dir.path())
            .block_size(16)
            .stack_size(stack_size)
            .run_id(7);
        let dcp = Dcp::init(&LocalGroup, config).unwrap();
        (dir, dcp)
    }

    #[test]
    fn init_creates_run_dir() {
        let (dir, dcp) = engine(3);
        assert!(dir.path().join("7").is_dir());
        assert_eq!(dcp.exec().run_id, 7);
        assert_eq!(dcp.counter(), 0);
    }

    #[test]
    fn init_rejects_node_size_mismatch() {
        let dir = tempdir().unwrap();
        let config = Config::default().base_dir(dir.path()).node_size(2);
        let err = Dcp::init(&FixedGroup::new(0, 3, 1), config).unwrap_err();
        assert!(matches!(err.root(), CoreError::InvalidArgument { .. }));
        assert!(matches!(err, CoreError::Rank { rank: 0, operation: "init", .. }));
    }

    #[test]
    fn init_uses_broadcast_run_id() {
        let dir = tempdir().unwrap();
        let config = Config::default().base_dir(dir.path());
        let dcp = Dcp::init(&FixedGroup::new(1, 2, 99), config).unwrap();
        assert_eq!(dcp.exec().run_id, 99);
        assert_eq!(dcp.run_dir().path(), dir.path().join("99"));
    }

    #[test]
    fn protect_error_carries_rank() {
        let (_dir, mut dcp) = engine(3);
        let err = dcp.protect(-3, shared_buffer(vec![0; 4]), 1, 4).unwrap_err();
        assert!(matches!(err, CoreError::Rank { operation: "protect", .. }));
        assert!(dcp.registry().is_empty());
    }

    #[test]
    fn checkpoint_then_recover() {
        let (_dir, mut dcp) = engine(3);
        let buffer = shared_buffer((0..40).collect());
        dcp.protect(0, buffer.clone(), 10, 4).unwrap();

        let report = dcp.checkpoint("first").unwrap();
        assert!(report.position.is_base());
        assert_eq!(report.blocks_committed, 3);

        buffer.write()[17] = 0xFF;
        let report = dcp.checkpoint("second").unwrap();
        assert_eq!(report.position.layer, 1);
        assert_eq!(report.blocks_committed, 1);

        let expected = buffer.read().clone();
        buffer.write().fill(0);
        let recovered = dcp.recover().unwrap();
        assert_eq!(*buffer.read(), expected);
        assert_eq!(recovered.delta_blocks, 1);
        assert_eq!(dcp.stats().checkpoints(), 2);
        assert_eq!(dcp.stats().recoveries(), 1);
    }

    #[test]
    fn rollover_retires_previous_file() {
        let (_dir, mut dcp) = engine(2);
        dcp.protect(0, shared_buffer(vec![1; 32]), 32, 1).unwrap();

        dcp.checkpoint("0").unwrap();
        dcp.checkpoint("1").unwrap();
        let report = dcp.checkpoint("2").unwrap();

        assert_eq!(report.position.file_id, 1);
        assert_eq!(report.retired_file, Some(0));
        assert!(!dcp.run_dir().layered_path(0, 0).exists());
        assert!(dcp.run_dir().layered_path(1, 0).exists());
        assert_eq!(dcp.stats().files_retired(), 1);
    }

    #[test]
    fn last_delta_resets_history() {
        let (_dir, mut dcp) = engine(2);
        dcp.protect(0, shared_buffer(vec![1; 32]), 32, 1).unwrap();

        dcp.checkpoint("base").unwrap();
        let delta = dcp.checkpoint("delta").unwrap();
        assert_eq!(delta.blocks_committed, 0);
        assert!(dcp
            .registry()
            .iter()
            .all(|var| var.hashed_byte_size() == 0));
    }

    #[test]
    fn variable_added_mid_stack_forces_base() {
        let (_dir, mut dcp) = engine(4);
        dcp.protect(0, shared_buffer(vec![1; 16]), 16, 1).unwrap();
        dcp.checkpoint("base").unwrap();
        dcp.checkpoint("delta").unwrap();

        let late = shared_buffer(vec![2; 16]);
        dcp.protect(1, late.clone(), 16, 1).unwrap();
        let report = dcp.checkpoint("rebase").unwrap();

        assert!(report.position.is_base());
        assert_eq!(report.position.file_id, 1);
        assert_eq!(report.retired_file, Some(0));
        assert_eq!(dcp.counter(), 5);

        late.write().fill(0);
        dcp.recover().unwrap();
        assert_eq!(*late.read(), vec![2; 16]);
    }

    #[test]
    fn restart_recovery_moves_to_next_stack() {
        let dir = tempdir().unwrap();
        let config = Config::default()
            .base_dir(dir.path())
            .block_size(8)
            .stack_size(3)
            .digest(DigestKind::Crc32)
            .run_id(11);

        {
            let mut dcp = Dcp::init(&LocalGroup, config.clone()).unwrap();
            dcp.protect(0, shared_buffer(vec![4; 20]), 20, 1).unwrap();
            dcp.checkpoint("a").unwrap();
            dcp.checkpoint("b").unwrap();
        }

        let mut dcp = Dcp::init(&LocalGroup, config).unwrap();
        let buffer = shared_buffer(vec![0; 20]);
        dcp.protect(0, buffer.clone(), 20, 1).unwrap();
        dcp.recover().unwrap();
        assert_eq!(*buffer.read(), vec![4; 20]);
        assert_eq!(dcp.counter(), 3);

        let report = dcp.checkpoint("c").unwrap();
        assert!(report.position.is_base());
        assert_eq!(report.retired_file, Some(0));
    }

    #[test]
    fn recover_without_checkpoint_is_io_error() {
        let (_dir, mut dcp) = engine(3);
        dcp.protect(0, shared_buffer(vec![0; 4]), 4, 1).unwrap();
        let err = dcp.recover().unwrap_err();
        assert!(err.is_io());
        assert_eq!(dcp.stats().errors(), 1);
    }

    #[test]
    fn failed_attempt_tail_is_discarded() {
        let (_dir, mut dcp) = engine(4);
        let buffer = shared_buffer(vec![3; 32]);
        dcp.protect(0, buffer.clone(), 32, 1).unwrap();
        dcp.checkpoint("base").unwrap();

        let path = dcp.run_dir().layered_path(0, 0);
        let committed = std::fs::metadata(&path).unwrap().len();
        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            std::io::Write::write_all(&mut file, &[0xAB; 9]).unwrap();
        }

        buffer.write()[0] = 9;
        let report = dcp.checkpoint("delta").unwrap();
        assert_eq!(report.layered_file_size, committed + 6 + 16);

        buffer.write().fill(0);
        dcp.recover().unwrap();
        assert_eq!(buffer.read()[0], 9);
        assert_eq!(buffer.read()[1], 3);
    }
}
