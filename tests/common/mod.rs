#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```ignore
//! #[macro_use]
//! mod common;
//! use common::*;
//! ```

use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::{Arc, Once};
use thunkrt::thunk::{BufferUses, ExecuteParams, Thunk, ThunkInfo, ThunkKind};
use thunkrt::thunks::{HostKernelRegistry, KernelCallFrame};
use thunkrt::{promise, BufferSlice, BufferUse, Error, ExecuteEvent, LabTaskRunner, Promise};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed used by test lab helpers.
pub const DEFAULT_TEST_SEED: u64 = 0xDEAD_BEEF;
/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "THUNKRT_PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    // Honor existing PROPTEST_RNG_SEED, otherwise apply our own.
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Create a deterministic lab runner for testing.
#[must_use]
pub fn test_lab() -> Arc<LabTaskRunner> {
    Arc::new(LabTaskRunner::new(DEFAULT_TEST_SEED))
}

/// Kernels over one-byte slots: `inc` writes argument + 1 to its result.
#[must_use]
pub fn byte_kernels() -> Arc<HostKernelRegistry> {
    let registry = HostKernelRegistry::new();
    registry.register("inc", |frame: &KernelCallFrame<'_>| {
        let value = frame.argument(0)?[0];
        frame.result(0)?[0] = value.wrapping_add(1);
        Ok(())
    });
    registry.register("double", |frame: &KernelCallFrame<'_>| {
        let value = frame.argument(0)?[0];
        frame.result(0)?[0] = value.wrapping_mul(2);
        Ok(())
    });
    Arc::new(registry)
}

/// One-byte slice of slot `index`.
#[must_use]
pub const fn byte(index: usize) -> BufferSlice {
    BufferSlice::new(index, 0, 1)
}

/// Writes to a slot and counts how often it ran; optionally fails.
#[derive(Debug)]
pub struct CountingThunk {
    info: ThunkInfo,
    slot: usize,
    fail: bool,
    calls: Arc<std::sync::atomic::AtomicUsize>,
}

impl CountingThunk {
    pub fn new(name: &str, slot: usize, fail: bool) -> Self {
        Self {
            info: ThunkInfo::new(name),
            slot,
            fail,
            calls: Arc::default(),
        }
    }

    pub fn counter(&self) -> Arc<std::sync::atomic::AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Thunk for CountingThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::Kernel
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        std::iter::once(BufferUse::write(byte(self.slot))).collect()
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail {
            return ExecuteEvent::failed(Error::execution(format!("{} failed", self.info)));
        }
        match params.buffer_allocations().write_from(byte(self.slot), &[1]) {
            Ok(()) => ExecuteEvent::ok(),
            Err(e) => ExecuteEvent::failed(e),
        }
    }
}

/// Completions handed out by [`DeferredThunk`]s, oldest first.
pub type DeferredQueue = Arc<parking_lot::Mutex<std::collections::VecDeque<Promise<()>>>>;

/// Declares writes to slots `index` and `index + 1` and completes only when
/// the test resolves the promise it pushed onto the shared queue.
#[derive(Debug)]
pub struct DeferredThunk {
    info: ThunkInfo,
    index: usize,
    queue: DeferredQueue,
}

impl DeferredThunk {
    pub fn new(index: usize, queue: &DeferredQueue) -> Self {
        Self {
            info: ThunkInfo::new(format!("deferred.{index}")),
            index,
            queue: Arc::clone(queue),
        }
    }
}

impl Thunk for DeferredThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::Kernel
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        [
            BufferUse::write(byte(self.index)),
            BufferUse::write(byte(self.index + 1)),
        ]
        .into_iter()
        .collect()
    }

    fn execute(&self, _params: &ExecuteParams) -> ExecuteEvent {
        let (done, event) = promise();
        self.queue.lock().push_back(done);
        event
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
