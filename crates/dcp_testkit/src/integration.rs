//! Cross-crate integration scenarios.
//!
//! Each function drives a real engine against a temporary run directory and
//! asserts the externally visible guarantees: what a checkpoint writes, which
//! files exist afterwards, and what recovery restores.

use crate::fixtures::*;
use crate::generators::Schedule;
use dcp_core::{shared_buffer, CoreError, Dcp, DigestKind, SharedBuffer};

/// Takes `count` checkpoints labelled by the engine counter.
pub fn checkpoint_n(dcp: &mut Dcp, count: usize) {
    for _ in 0..count {
        let label = dcp.counter().to_string();
        dcp.checkpoint(&label).expect("Failed to checkpoint");
    }
}

/// Checkpoint write-path scenarios.
pub mod checkpoint {
    use super::*;

    /// A checkpoint with no buffer changes since the previous one commits
    /// nothing, unless it is a base layer.
    pub fn test_idempotence(digest: DigestKind) {
        let mut run = TestRun::with_config(|c| c.block_size(32).stack_size(4).digest(digest));
        let data = sequence_buffer(100);
        run.protect(0, data, 100, 4).unwrap();

        let base = run.checkpoint("base").unwrap();
        assert_eq!(base.blocks_committed, base.blocks_total);

        for label in ["d1", "d2"] {
            let report = run.checkpoint(label).unwrap();
            assert_eq!(report.blocks_committed, 0, "{label} committed unchanged blocks");
            assert_eq!(report.payload_bytes, 0);
        }
    }

    /// Changing bytes in k distinct blocks commits exactly k blocks.
    pub fn test_change_locality() {
        let mut run = TestRun::sized(64, 8);
        let data = sequence_buffer(1024);
        run.protect(0, data.clone(), 1024, 4).unwrap();
        run.checkpoint("base").unwrap();

        // 16 ints per block: elements 0, 5 share block 0; 17 is block 1;
        // 1000 is block 62.
        for index in [0, 5, 17, 1000] {
            write_i32(&data, index, -1);
        }
        let report = run.checkpoint("delta").unwrap();
        assert_eq!(report.blocks_committed, 3);
        assert_eq!(report.payload_bytes, 3 * 64);
    }

    /// A variable re-registered with a larger size commits every block past
    /// its old size, and the overlapping prefix still recovers.
    pub fn test_growth() {
        let mut run = TestRun::sized(16, 5);
        let data = sequence_buffer(16);
        run.protect(0, data.clone(), 16, 4).unwrap();
        run.checkpoint("small").unwrap();

        data.write().extend_from_slice(&[0; 32]);
        run.protect(0, data.clone(), 24, 4).unwrap();
        let report = run.checkpoint("grown").unwrap();
        assert_eq!(report.blocks_total, 6);
        assert_eq!(report.blocks_committed, 2);

        let expected = read_i32s(&data);
        zero(&data);
        run.recover().unwrap();
        assert_eq!(read_i32s(&data), expected);
        assert_eq!(&expected[..16], &(1..=16).collect::<Vec<i32>>()[..]);
    }

    /// Ids beyond the 18-bit block-meta range are rejected by checkpoint.
    pub fn test_id_overflow() {
        let mut run = TestRun::new();
        run.protect(1 << 18, sequence_buffer(4), 4, 4).unwrap();
        let err = run.checkpoint("too-large").unwrap_err();
        assert!(matches!(err.root(), CoreError::Overflow { .. }));
        assert_eq!(run.counter(), 0);
        assert_eq!(run.stats().errors(), 1);
    }
}

/// Layer rotation scenarios.
pub mod rollover {
    use super::*;

    /// After `stack_size` checkpoints the next one rewrites a full base into
    /// a new file id and deletes the previous file.
    pub fn test_rollover(stack_size: u64) {
        let mut run = TestRun::sized(128, stack_size);
        let data = sequence_buffer(256);
        run.protect(0, data.clone(), 256, 4).unwrap();

        checkpoint_n(&mut run, stack_size as usize);
        assert!(run.run_dir().layered_path(0, 0).exists());

        let report = run.checkpoint("rollover").unwrap();
        assert_eq!(report.position.file_id, 1);
        assert!(report.position.is_base());
        assert_eq!(report.blocks_committed, report.blocks_total);
        assert_eq!(report.retired_file, Some(0));
        assert!(!run.run_dir().layered_path(0, 0).exists());

        zero(&data);
        let recovered = run.recover().unwrap();
        assert_eq!(recovered.file_id, 1);
        assert_eq!(read_i32s(&data), (1..=256).collect::<Vec<i32>>());
    }

    /// Registering a new variable mid-stack starts a new base so that the
    /// variable gets a header.
    pub fn test_late_registration() {
        let mut run = TestRun::sized(32, 5);
        let first = sequence_buffer(32);
        run.protect(0, first.clone(), 32, 4).unwrap();
        checkpoint_n(&mut run, 2);

        let second = i32_buffer([9; 8]);
        run.protect(1, second.clone(), 8, 4).unwrap();
        let report = run.checkpoint("late").unwrap();
        assert!(report.position.is_base());
        assert_eq!(report.variables, 2);

        zero(&first);
        zero(&second);
        run.recover().unwrap();
        assert_eq!(read_i32s(&first), (1..=32).collect::<Vec<i32>>());
        assert_eq!(read_i32s(&second), vec![9; 8]);
    }
}

/// Recovery scenarios.
pub mod recovery {
    use super::*;

    /// 2560 integers in 80 blocks of 128 bytes, stack of 5: six unchanged
    /// checkpoints (the sixth rolls over), then one integer changed in
    /// blocks 3 and 40 commits exactly two blocks and recovers both values.
    pub fn test_two_block_mutation() {
        let mut run = TestRun::with_config(|c| c.block_size(128).stack_size(5));
        let data = sequence_buffer(2560);
        run.protect(0, data.clone(), 2560, 4).unwrap();

        for layer in 0..5 {
            let report = run.checkpoint(&format!("layer-{layer}")).unwrap();
            assert_eq!(report.position.layer, layer);
            assert_eq!(report.position.file_id, 0);
        }
        let report = run.checkpoint("new-base").unwrap();
        assert_eq!(report.position.layer, 0);
        assert_eq!(report.position.file_id, 1);
        assert_eq!(report.blocks_committed, 80);
        assert!(!run.run_dir().layered_path(0, 0).exists());

        let (a, b) = (3 * 32 + 5, 40 * 32 + 31);
        write_i32(&data, a, -100);
        write_i32(&data, b, -200);
        let report = run.checkpoint("mutated").unwrap();
        assert_eq!(report.position.layer, 1);
        assert_eq!(report.blocks_committed, 2);

        zero(&data);
        run.recover().unwrap();
        let values = read_i32s(&data);
        for (i, &value) in values.iter().enumerate() {
            let expected = match i {
                i if i == a => -100,
                i if i == b => -200,
                i => i as i32 + 1,
            };
            assert_eq!(value, expected, "element {i}");
        }
    }

    /// Recovery restores the content of the last checkpoint, not later
    /// in-memory mutations.
    pub fn test_last_checkpoint_wins() {
        let mut run = TestRun::sized(16, 10);
        let data = sequence_buffer(40);
        run.protect(3, data.clone(), 40, 4).unwrap();
        run.checkpoint("a").unwrap();

        write_i32(&data, 7, 70);
        run.checkpoint("b").unwrap();
        write_i32(&data, 7, 700);
        write_i32(&data, 39, 390);
        run.checkpoint("c").unwrap();
        let expected = read_i32s(&data);

        write_i32(&data, 0, 12345);
        run.recover().unwrap();
        assert_eq!(read_i32s(&data), expected);
    }

    /// A checkpoint recorded with two variables cannot be recovered into a
    /// registry missing one; no buffer is modified.
    pub fn test_mismatch_aborts() {
        let mut run = TestRun::new();
        run.protect(0, sequence_buffer(64), 64, 4).unwrap();
        run.protect(1, sequence_buffer(64), 64, 4).unwrap();
        run.checkpoint("both").unwrap();

        let mut restarted = run.restart();
        let only = i32_buffer([5; 64]);
        restarted.protect(0, only.clone(), 64, 4).unwrap();

        let err = restarted.recover().unwrap_err();
        assert!(matches!(err.root(), CoreError::RecoveryMismatch { .. }));
        assert_eq!(read_i32s(&only), vec![5; 64]);
    }

    /// A restarted process that registers the same variables in another
    /// order, or registers one more, is refused; no buffer is modified.
    pub fn test_registration_must_match() {
        let mut run = TestRun::new();
        run.protect(0, sequence_buffer(64), 64, 4).unwrap();
        run.protect(1, sequence_buffer(64), 64, 4).unwrap();
        run.checkpoint("both").unwrap();

        let mut reordered = run.restart();
        let second = i32_buffer([5; 64]);
        let first = i32_buffer([5; 64]);
        reordered.protect(1, second.clone(), 64, 4).unwrap();
        reordered.protect(0, first.clone(), 64, 4).unwrap();
        let err = reordered.recover().unwrap_err();
        assert!(matches!(err.root(), CoreError::RecoveryMismatch { .. }));
        assert_eq!(read_i32s(&first), vec![5; 64]);
        assert_eq!(read_i32s(&second), vec![5; 64]);

        let mut extended = run.restart();
        let buffers: Vec<SharedBuffer> = (0..3).map(|_| i32_buffer([5; 64])).collect();
        for (id, buffer) in buffers.iter().enumerate() {
            extended.protect(id as i32, buffer.clone(), 64, 4).unwrap();
        }
        let err = extended.recover().unwrap_err();
        assert!(matches!(err.root(), CoreError::RecoveryMismatch { .. }));
        for buffer in &buffers {
            assert_eq!(read_i32s(buffer), vec![5; 64]);
        }
    }

    /// A restarted process recovers from the files of the previous one and
    /// continues with a fresh base.
    pub fn test_restart() {
        let run = TestRun::sized(32, 4);
        {
            let mut dcp = run.restart();
            let data = sequence_buffer(50);
            dcp.protect(0, data.clone(), 50, 4).unwrap();
            checkpoint_n(&mut dcp, 3);
            write_i32(&data, 49, -49);
            dcp.checkpoint("last").unwrap();
        }

        let mut dcp = run.restart();
        let data = shared_buffer(vec![0; 200]);
        dcp.protect(0, data.clone(), 50, 4).unwrap();
        let report = dcp.recover().unwrap();
        assert_eq!(report.file_id, 0);
        assert_eq!(read_i32(&data, 0), 1);
        assert_eq!(read_i32(&data, 49), -49);

        let next = dcp.checkpoint("resumed").unwrap();
        assert!(next.position.is_base());
        assert_eq!(next.position.file_id, 1);
        assert_eq!(next.retired_file, Some(0));
    }

    /// Applies a generated schedule and checks that recovery reproduces the
    /// buffer as of its last checkpoint.
    pub fn test_schedule_round_trip(schedule: &Schedule) {
        let mut run = TestRun::sized(schedule.block_size, schedule.stack_size);
        let data = shared_buffer(schedule.initial.clone());
        run.protect(0, data.clone(), schedule.size, 1).unwrap();

        let mut expected = Vec::new();
        for (n, step) in schedule.steps.iter().enumerate() {
            {
                let mut bytes = data.write();
                for m in &step.mutations {
                    bytes[m.offset] = m.value;
                }
            }
            if step.checkpoint {
                run.checkpoint(&n.to_string()).unwrap();
                expected = data.read().clone();
            }
        }

        zero(&data);
        run.recover().unwrap();
        assert_eq!(*data.read(), expected);
    }
}

/// Multi-rank scenarios.
pub mod ranks {
    use super::*;

    /// Ranks of one run share the directory but never each other's files.
    pub fn test_rank_isolation(size: u32) {
        let run = TestRun::sized(64, 3);
        let mut engines: Vec<(Dcp, SharedBuffer)> = (0..size)
            .map(|rank| {
                let mut dcp = run.rank(rank, size);
                let data = i32_buffer(vec![rank as i32; 100]);
                dcp.protect(0, data.clone(), 100, 4).unwrap();
                (dcp, data)
            })
            .collect();

        for (dcp, _) in &mut engines {
            checkpoint_n(dcp, 4);
        }
        // Four checkpoints with a stack of three end in file id 1.
        for rank in 0..size {
            assert!(run.run_dir().layered_path(1, rank).exists());
            assert!(!run.run_dir().layered_path(0, rank).exists());
        }

        for (rank, (dcp, data)) in engines.iter_mut().enumerate() {
            zero(data);
            dcp.recover().unwrap();
            assert_eq!(read_i32s(data), vec![rank as i32; 100]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{schedule_strategy, PropTestConfig};
    use proptest::prelude::*;

    #[test]
    fn idempotence_sha256() {
        checkpoint::test_idempotence(DigestKind::Sha256);
    }

    #[test]
    fn idempotence_md5() {
        checkpoint::test_idempotence(DigestKind::Md5);
    }

    #[test]
    fn idempotence_crc32() {
        checkpoint::test_idempotence(DigestKind::Crc32);
    }

    #[test]
    fn change_locality() {
        checkpoint::test_change_locality();
    }

    #[test]
    fn growth() {
        checkpoint::test_growth();
    }

    #[test]
    fn id_overflow() {
        checkpoint::test_id_overflow();
    }

    #[test]
    fn rollover_stack_of_five() {
        rollover::test_rollover(5);
    }

    #[test]
    fn rollover_stack_of_one() {
        rollover::test_rollover(1);
    }

    #[test]
    fn late_registration() {
        rollover::test_late_registration();
    }

    #[test]
    fn two_block_mutation() {
        recovery::test_two_block_mutation();
    }

    #[test]
    fn last_checkpoint_wins() {
        recovery::test_last_checkpoint_wins();
    }

    #[test]
    fn mismatch_aborts() {
        recovery::test_mismatch_aborts();
    }

    #[test]
    fn registration_must_match() {
        recovery::test_registration_must_match();
    }

    #[test]
    fn restart() {
        recovery::test_restart();
    }

    #[test]
    fn rank_isolation() {
        ranks::test_rank_isolation(3);
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn schedule_round_trip(schedule in schedule_strategy(300, 12)) {
            recovery::test_schedule_round_trip(&schedule);
        }
    }
}
