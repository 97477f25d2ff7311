//! Property-based test generators using proptest.
//!
//! Provides strategies for buffer geometries and for schedules of buffer
//! mutations interleaved with checkpoints.

use proptest::prelude::*;

/// One byte overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutation {
    /// Byte offset in the buffer.
    pub offset: usize,
    /// New value.
    pub value: u8,
}

/// Mutations applied before an optional checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Overwrites applied in order.
    pub mutations: Vec<Mutation>,
    /// Whether a checkpoint follows the mutations.
    pub checkpoint: bool,
}

/// A complete randomized checkpoint run over one buffer.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Buffer size in bytes.
    pub size: usize,
    /// Block size.
    pub block_size: u64,
    /// Layers per file.
    pub stack_size: u64,
    /// Initial buffer content.
    pub initial: Vec<u8>,
    /// Steps, the first of which always checkpoints.
    pub steps: Vec<Step>,
}

impl Schedule {
    /// Number of checkpoints the schedule takes.
    #[must_use]
    pub fn checkpoints(&self) -> usize {
        self.steps.iter().filter(|s| s.checkpoint).count()
    }
}

/// Strategy for block sizes, including ones that do not divide the buffer.
pub fn block_size_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![Just(1u64), Just(7), Just(16), Just(64), Just(128)]
}

/// Strategy for stack sizes.
pub fn stack_size_strategy() -> impl Strategy<Value = u64> {
    1u64..=6
}

/// Strategy for overwrites of a buffer of `size` bytes.
pub fn mutations_strategy(size: usize) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(
        (0..size, any::<u8>()).prop_map(|(offset, value)| Mutation { offset, value }),
        0..8,
    )
}

/// Strategy for a full schedule over buffers of up to `max_size` bytes.
pub fn schedule_strategy(max_size: usize, max_steps: usize) -> impl Strategy<Value = Schedule> {
    (
        1..=max_size,
        block_size_strategy(),
        stack_size_strategy(),
    )
        .prop_flat_map(move |(size, block_size, stack_size)| {
            let step = (mutations_strategy(size), any::<bool>())
                .prop_map(|(mutations, checkpoint)| Step {
                    mutations,
                    checkpoint,
                });
            (
                prop::collection::vec(any::<u8>(), size),
                prop::collection::vec(step, 1..=max_steps),
            )
                .prop_map(move |(initial, mut steps)| {
                    steps[0].checkpoint = true;
                    Schedule {
                        size,
                        block_size,
                        stack_size,
                        initial,
                        steps,
                    }
                })
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 256,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests. Each case touches the disk.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 64,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
