//! End-to-end tests for the ordered map-reduce pipeline.
//!
//! Run with: `cargo test --test pipeline_tests`
//!
//! These tests drive the full pipeline through its public API: submission
//! order must equal reduce order under jittered map latency, memory must
//! stay bounded under backpressure, and shutdown must drain everything on
//! the happy path, on collaborator failure, and on drop.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ordpipe::{Map, Pipeline, PipelineConfig, PipelineError, Reduce};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Test collaborators
// ============================================================================

struct Identity;

impl Map for Identity {
    type Input = u64;
    type Output = u64;

    fn map(&self, input: u64) -> anyhow::Result<u64> {
        Ok(input)
    }
}

/// Identity map that sleeps a per-item pseudo-random duration, so results
/// arrive at the reordering queue far out of submission order.
struct JitteredIdentity {
    max_sleep_ms: u64,
}

impl Map for JitteredIdentity {
    type Input = u64;
    type Output = u64;

    fn map(&self, input: u64) -> anyhow::Result<u64> {
        let mut rng = StdRng::seed_from_u64(input);
        thread::sleep(Duration::from_millis(rng.random_range(0..self.max_sleep_ms)));
        Ok(input)
    }
}

struct FailAt {
    trigger: u64,
}

impl Map for FailAt {
    type Input = u64;
    type Output = u64;

    fn map(&self, input: u64) -> anyhow::Result<u64> {
        if input == self.trigger {
            anyhow::bail!("injected map failure at {input}");
        }
        Ok(input)
    }
}

struct PanicAt {
    trigger: u64,
}

impl Map for PanicAt {
    type Input = u64;
    type Output = u64;

    fn map(&self, input: u64) -> anyhow::Result<u64> {
        assert!(input != self.trigger, "injected map panic at {input}");
        Ok(input)
    }
}

/// Accumulates reduced items into a shared vector for post-close checks.
struct VecSink {
    out: Arc<Mutex<Vec<u64>>>,
}

impl Reduce<u64> for VecSink {
    fn reduce(&mut self, item: u64) -> anyhow::Result<()> {
        self.out.lock().unwrap().push(item);
        Ok(())
    }
}

struct FailingSink {
    trigger: u64,
}

impl Reduce<u64> for FailingSink {
    fn reduce(&mut self, item: u64) -> anyhow::Result<()> {
        if item == self.trigger {
            anyhow::bail!("injected reduce failure at {item}");
        }
        Ok(())
    }
}

// ============================================================================
// Happy-path scenarios
// ============================================================================

#[test]
fn test_empty_run() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline =
        Pipeline::new(Identity, VecSink { out: Arc::clone(&out) }, &PipelineConfig::with_workers(4))
            .unwrap();

    pipeline.close().unwrap();
    assert!(out.lock().unwrap().is_empty());
}

#[test]
fn test_single_item() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline =
        Pipeline::new(Identity, VecSink { out: Arc::clone(&out) }, &PipelineConfig::with_workers(4))
            .unwrap();

    pipeline.submit(42).unwrap();
    pipeline.close().unwrap();
    assert_eq!(*out.lock().unwrap(), vec![42]);
}

#[test]
fn test_order_preserved_under_jitter() {
    init_logs();
    let out = Arc::new(Mutex::new(Vec::new()));
    let config = PipelineConfig {
        input_capacity: Some(10),
        ..PipelineConfig::with_workers(100)
    };
    let mut pipeline = Pipeline::new(
        JitteredIdentity { max_sleep_ms: 20 },
        VecSink { out: Arc::clone(&out) },
        &config,
    )
    .unwrap();

    for i in 0..1000 {
        pipeline.submit(i).unwrap();
    }
    pipeline.close().unwrap();

    let expected: Vec<u64> = (0..1000).collect();
    assert_eq!(*out.lock().unwrap(), expected);
}

/// Map that samples how many items are live (submitted but not reduced)
/// every time it runs, so the test can assert the pipeline's memory bound.
struct MeteredIdentity {
    submitted: Arc<AtomicU64>,
    reduced: Arc<AtomicU64>,
    max_live: Arc<AtomicU64>,
}

impl Map for MeteredIdentity {
    type Input = u64;
    type Output = u64;

    fn map(&self, input: u64) -> anyhow::Result<u64> {
        let live = self
            .submitted
            .load(Ordering::SeqCst)
            .saturating_sub(self.reduced.load(Ordering::SeqCst));
        self.max_live.fetch_max(live, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));
        Ok(input)
    }
}

struct MeteredSink {
    out: Arc<Mutex<Vec<u64>>>,
    reduced: Arc<AtomicU64>,
}

impl Reduce<u64> for MeteredSink {
    fn reduce(&mut self, item: u64) -> anyhow::Result<()> {
        self.out.lock().unwrap().push(item);
        self.reduced.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_backpressure_bounds_live_items() {
    let submitted = Arc::new(AtomicU64::new(0));
    let reduced = Arc::new(AtomicU64::new(0));
    let max_live = Arc::new(AtomicU64::new(0));
    let out = Arc::new(Mutex::new(Vec::new()));

    let input_capacity = 2;
    let workers = 1;
    let queue_capacity = 2;
    let config = PipelineConfig {
        workers,
        input_capacity: Some(input_capacity),
        queue_capacity: Some(queue_capacity),
    };

    let mapper = MeteredIdentity {
        submitted: Arc::clone(&submitted),
        reduced: Arc::clone(&reduced),
        max_live: Arc::clone(&max_live),
    };
    let sink = MeteredSink { out: Arc::clone(&out), reduced: Arc::clone(&reduced) };
    let mut pipeline = Pipeline::new(mapper, sink, &config).unwrap();

    let total = 200;
    for i in 0..total {
        pipeline.submit(i).unwrap();
        submitted.fetch_add(1, Ordering::SeqCst);
    }
    pipeline.close().unwrap();

    let expected: Vec<u64> = (0..total).collect();
    assert_eq!(*out.lock().unwrap(), expected);

    // End-to-end cap: C_in buffered + W in flight + C_mid reordering + 1
    // held by the reducer.
    let bound = (input_capacity + workers + queue_capacity + 1) as u64;
    let observed = max_live.load(Ordering::SeqCst);
    assert!(observed <= bound, "live items {observed} exceeded bound {bound}");
}

struct ByteMapper;

impl Map for ByteMapper {
    type Input = u64;
    type Output = Vec<u8>;

    fn map(&self, input: u64) -> anyhow::Result<Vec<u8>> {
        Ok(vec![(input % 256) as u8])
    }
}

#[test]
fn test_byte_stream_written_in_order() -> anyhow::Result<()> {
    let temp = tempfile::NamedTempFile::new()?;
    let path = temp.path().to_path_buf();

    let sink = ordpipe::FileSink::create(&path)?;
    let mut pipeline = Pipeline::new(ByteMapper, sink, &PipelineConfig::with_workers(8))?;

    for i in 0..1000 {
        pipeline.submit(i)?;
    }
    pipeline.close()?;

    let written = std::fs::read(&path)?;
    let expected: Vec<u8> = (0..1000u64).map(|i| (i % 256) as u8).collect();
    assert_eq!(written.len(), 1000);
    assert_eq!(written, expected);
    Ok(())
}

// ============================================================================
// Shutdown semantics
// ============================================================================

#[test]
fn test_submit_after_close_fails() {
    let mut pipeline =
        Pipeline::new(Identity, VecSink { out: Arc::default() }, &PipelineConfig::with_workers(2))
            .unwrap();

    pipeline.close().unwrap();
    let err = pipeline.submit(0).unwrap_err();
    assert!(matches!(err, PipelineError::ClosedOnSubmit));
}

#[test]
fn test_close_is_idempotent() {
    let mut pipeline =
        Pipeline::new(Identity, VecSink { out: Arc::default() }, &PipelineConfig::with_workers(2))
            .unwrap();

    pipeline.submit(1).unwrap();
    pipeline.close().unwrap();
    pipeline.close().unwrap();
    pipeline.close().unwrap();
}

#[test]
fn test_drop_without_close_drains_everything() {
    let reduced = Arc::new(AtomicU64::new(0));
    {
        let sink = MeteredSink { out: Arc::default(), reduced: Arc::clone(&reduced) };
        let mut pipeline =
            Pipeline::new(Identity, sink, &PipelineConfig::with_workers(4)).unwrap();
        for i in 0..100 {
            pipeline.submit(i).unwrap();
        }
        // Dropped here without close.
    }
    assert_eq!(reduced.load(Ordering::SeqCst), 100);
}

// ============================================================================
// Failure paths
// ============================================================================

#[test]
fn test_map_error_surfaces_from_close() {
    init_logs();
    let out = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new(
        FailAt { trigger: 50 },
        VecSink { out: Arc::clone(&out) },
        &PipelineConfig::with_workers(4),
    )
    .unwrap();

    for i in 0..200 {
        // Once the failure latches, the intake closes and submit starts
        // failing; both outcomes are acceptable mid-run.
        if pipeline.submit(i).is_err() {
            break;
        }
    }
    let err = pipeline.close().unwrap_err();
    assert!(matches!(err, PipelineError::MapFailed(_)), "unexpected error: {err}");

    // A failed run never reduces past the failure point.
    assert!(out.lock().unwrap().len() <= 50);
}

#[test]
fn test_reduce_error_surfaces_from_close() {
    let mut pipeline = Pipeline::new(
        Identity,
        FailingSink { trigger: 10 },
        &PipelineConfig::with_workers(4),
    )
    .unwrap();

    for i in 0..100 {
        if pipeline.submit(i).is_err() {
            break;
        }
    }
    let err = pipeline.close().unwrap_err();
    assert!(matches!(err, PipelineError::ReduceFailed(_)), "unexpected error: {err}");
}

#[test]
fn test_map_panic_becomes_worker_panic_error() {
    let mut pipeline = Pipeline::new(
        PanicAt { trigger: 7 },
        VecSink { out: Arc::default() },
        &PipelineConfig::with_workers(4),
    )
    .unwrap();

    for i in 0..50 {
        if pipeline.submit(i).is_err() {
            break;
        }
    }
    let err = pipeline.close().unwrap_err();
    match err {
        PipelineError::WorkerPanic { stage, message } => {
            assert_eq!(stage, "map");
            assert!(message.contains("injected map panic"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_error_close_still_rejects_resubmission() {
    let mut pipeline = Pipeline::new(
        FailAt { trigger: 0 },
        VecSink { out: Arc::default() },
        &PipelineConfig::with_workers(2),
    )
    .unwrap();

    pipeline.submit(0).unwrap();
    let _ = pipeline.close();

    let err = pipeline.submit(1).unwrap_err();
    assert!(matches!(err, PipelineError::ClosedOnSubmit));
}
