//! Ordered parallel map-reduce pipeline.
//!
//! This module wires the two containers from [`crate::queue`] into a
//! running pipeline:
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌──────────────┐    ┌─────────────┐
//! │  caller  │───>│ BoundedFifo │───>│ worker pool  │───>│ OrderedQueue│──> reduce
//! │ (submit) │    │ (idx, in)   │    │ (N threads)  │    │ (idx, out)  │  (1 thread)
//! └──────────┘    └─────────────┘    └──────────────┘    └─────────────┘
//! ```
//!
//! `submit` tags each input with a monotone index; workers map inputs in
//! parallel and publish results keyed by that index; the reducer thread
//! consumes the ordered queue, so the sink observes results in exact
//! submission order no matter how map latencies interleave.
//!
//! # Shutdown
//!
//! `close` runs four phases in order: close the intake FIFO, join the
//! workers (they drain the FIFO and publish their last results), close the
//! ordered queue, join the reducer (it drains the queue in order). Only
//! this sequence preserves every submitted item; closing the ordered queue
//! before the workers have published would drop results.
//!
//! # Failure
//!
//! A map or reduce error (or panic) is latched, both containers are
//! canceled, and every thread still exits and is joined; the first error
//! surfaces from `close`. The reduce stream for such a run is incomplete.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::errors::{PipelineError, Result};
use crate::queue::{BoundedFifo, OrderedQueue};

// ============================================================================
// Collaborator contracts
// ============================================================================

/// The parallel transformation applied to every submitted input.
///
/// Called concurrently from all worker threads; implementations choose
/// their own internal synchronization, but must not depend on call order;
/// the pipeline restores submission order downstream.
pub trait Map: Send + Sync + 'static {
    /// The type accepted by [`Pipeline::submit`].
    type Input: Send + 'static;
    /// The type delivered to the reduce collaborator.
    type Output: Send + 'static;

    /// Transform one input. An error is fatal to the run.
    fn map(&self, input: Self::Input) -> anyhow::Result<Self::Output>;
}

/// The ordered sink consuming mapped outputs.
///
/// Called from exactly one thread, once per submitted input, in submission
/// order, so implementations need no internal synchronization.
pub trait Reduce<T>: Send + 'static {
    /// Consume one mapped output. An error is fatal to the run.
    fn reduce(&mut self, item: T) -> anyhow::Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of map worker threads.
    pub workers: usize,
    /// Capacity of the intake FIFO (default: `workers + 1`).
    pub input_capacity: Option<usize>,
    /// Capacity of the reordering queue (default: `workers + 1`).
    pub queue_capacity: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            input_capacity: None,
            queue_capacity: None,
        }
    }
}

impl PipelineConfig {
    /// Create a config with the specified worker count.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self { workers, ..Default::default() }
    }

    fn effective_input_capacity(&self) -> usize {
        self.input_capacity.unwrap_or(self.workers + 1)
    }

    fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.workers + 1)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::InvalidParameter {
                parameter: "workers".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        if self.input_capacity == Some(0) {
            return Err(PipelineError::InvalidParameter {
                parameter: "input_capacity".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        if self.queue_capacity == Some(0) {
            return Err(PipelineError::InvalidParameter {
                parameter: "queue_capacity".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Error latch
// ============================================================================

/// First-error-wins latch shared by all pipeline threads.
#[derive(Default)]
struct ErrorLatch {
    slot: Mutex<Option<PipelineError>>,
}

impl ErrorLatch {
    fn set(&self, error: PipelineError) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            log::error!("pipeline error latched: {error}");
            *slot = Some(error);
        }
    }

    fn take(&self) -> Option<PipelineError> {
        self.slot.lock().take()
    }
}

/// Extract a human-readable message from a panic payload.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Worker and reducer loops
// ============================================================================

fn worker_loop<M: Map>(
    mapper: &M,
    input: &BoundedFifo<(u64, M::Input)>,
    queue: &OrderedQueue<M::Output>,
    errors: &ErrorLatch,
) {
    while let Some((idx, value)) = input.pop() {
        match panic::catch_unwind(AssertUnwindSafe(|| mapper.map(value))) {
            Ok(Ok(mapped)) => {
                if queue.push(idx, mapped).is_err() {
                    // Error shutdown already canceled the queue.
                    break;
                }
            }
            Ok(Err(source)) => {
                errors.set(PipelineError::MapFailed(source));
                input.cancel();
                queue.cancel();
                break;
            }
            Err(payload) => {
                errors.set(PipelineError::WorkerPanic {
                    stage: "map",
                    message: panic_message(payload),
                });
                input.cancel();
                queue.cancel();
                break;
            }
        }
    }
}

fn reducer_loop<I, T, R>(
    reducer: &mut R,
    input: &BoundedFifo<I>,
    queue: &OrderedQueue<T>,
    errors: &ErrorLatch,
) where
    R: Reduce<T>,
{
    while let Some((_idx, item)) = queue.pop() {
        match panic::catch_unwind(AssertUnwindSafe(|| reducer.reduce(item))) {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                errors.set(PipelineError::ReduceFailed(source));
                input.cancel();
                queue.cancel();
                break;
            }
            Err(payload) => {
                errors.set(PipelineError::WorkerPanic {
                    stage: "reduce",
                    message: panic_message(payload),
                });
                input.cancel();
                queue.cancel();
                break;
            }
        }
    }
}

// ============================================================================
// Pipeline façade
// ============================================================================

/// An ordered parallel map-reduce pipeline.
///
/// Construction starts the worker pool and the reducer thread; `submit`
/// feeds inputs; `close` drains all in-flight work and joins every thread.
/// Dropping an unclosed pipeline performs the same shutdown.
///
/// # Example
///
/// ```
/// use ordpipe::{Map, Pipeline, PipelineConfig, Reduce};
///
/// struct Square;
///
/// impl Map for Square {
///     type Input = u64;
///     type Output = u64;
///
///     fn map(&self, input: u64) -> anyhow::Result<u64> {
///         Ok(input * input)
///     }
/// }
///
/// struct Sum(u64);
///
/// impl Reduce<u64> for Sum {
///     fn reduce(&mut self, item: u64) -> anyhow::Result<()> {
///         self.0 += item;
///         Ok(())
///     }
/// }
///
/// # fn main() -> ordpipe::Result<()> {
/// let mut pipeline = Pipeline::new(Square, Sum(0), &PipelineConfig::with_workers(4))?;
/// for i in 0..10 {
///     pipeline.submit(i)?;
/// }
/// pipeline.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<M: Map> {
    input: Arc<BoundedFifo<(u64, M::Input)>>,
    queue: Arc<OrderedQueue<M::Output>>,
    errors: Arc<ErrorLatch>,
    workers: Vec<JoinHandle<()>>,
    reducer: Option<JoinHandle<()>>,
    next_job_index: u64,
    closed: bool,
}

impl<M: Map> Pipeline<M> {
    /// Start a pipeline with the given collaborators and configuration.
    ///
    /// Spawns `config.workers` map threads and one reducer thread.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if the worker count or
    /// either capacity is zero.
    pub fn new<R>(mapper: M, reducer: R, config: &PipelineConfig) -> Result<Self>
    where
        R: Reduce<M::Output>,
    {
        config.validate()?;
        let input_capacity = config.effective_input_capacity();
        let queue_capacity = config.effective_queue_capacity();

        let input = Arc::new(BoundedFifo::new(input_capacity));
        let queue = Arc::new(OrderedQueue::new(queue_capacity));
        let errors = Arc::new(ErrorLatch::default());
        let mapper = Arc::new(mapper);

        let mut workers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let mapper = Arc::clone(&mapper);
            let input = Arc::clone(&input);
            let queue = Arc::clone(&queue);
            let errors = Arc::clone(&errors);
            workers.push(thread::spawn(move || {
                worker_loop(mapper.as_ref(), &input, &queue, &errors);
            }));
        }

        let reducer_handle = {
            let mut reducer = reducer;
            let input = Arc::clone(&input);
            let queue = Arc::clone(&queue);
            let errors = Arc::clone(&errors);
            thread::spawn(move || {
                reducer_loop(&mut reducer, &input, &queue, &errors);
            })
        };

        log::debug!(
            "pipeline started: {} workers, input capacity {}, reorder capacity {}",
            config.workers,
            input_capacity,
            queue_capacity
        );

        Ok(Self {
            input,
            queue,
            errors,
            workers,
            reducer: Some(reducer_handle),
            next_job_index: 0,
            closed: false,
        })
    }

    /// Submit one input for mapping.
    ///
    /// Assigns the next submission index and pushes onto the intake FIFO,
    /// blocking while the FIFO is full.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ClosedOnSubmit`] after `close`, or after an
    /// error shutdown has closed the intake.
    pub fn submit(&mut self, value: M::Input) -> Result<()> {
        if self.closed {
            return Err(PipelineError::ClosedOnSubmit);
        }
        let idx = self.next_job_index;
        match self.input.push((idx, value)) {
            Ok(()) => {
                self.next_job_index += 1;
                Ok(())
            }
            Err(_rejected) => Err(PipelineError::ClosedOnSubmit),
        }
    }

    /// Drain all in-flight work and join every thread.
    ///
    /// Four phases, each completing before the next begins:
    ///
    /// 1. Close the intake FIFO (no further submissions).
    /// 2. Join the workers (they drain the FIFO and publish last results).
    /// 3. Close the ordered queue.
    /// 4. Join the reducer (it drains the queue in order).
    ///
    /// After an `Ok` return the sink has observed every submitted input in
    /// submission order. Idempotent: repeated calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns the first latched map/reduce error or collaborator panic.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        log::debug!("closing pipeline after {} submissions", self.next_job_index);

        self.input.close();
        for handle in self.workers.drain(..) {
            if let Err(payload) = handle.join() {
                self.errors.set(PipelineError::WorkerPanic {
                    stage: "map",
                    message: panic_message(payload),
                });
            }
        }

        self.queue.close();
        if let Some(handle) = self.reducer.take() {
            if let Err(payload) = handle.join() {
                self.errors.set(PipelineError::WorkerPanic {
                    stage: "reduce",
                    message: panic_message(payload),
                });
            }
        }

        match self.errors.take() {
            Some(error) => Err(error),
            None => {
                log::debug!("pipeline closed cleanly");
                Ok(())
            }
        }
    }
}

impl<M: Map> Drop for Pipeline<M> {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("pipeline dropped without close; draining in-flight work");
            if let Err(error) = self.close() {
                log::warn!("pipeline shutdown failed: {error}");
            }
        }
    }
}
