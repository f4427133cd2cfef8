#![deny(unsafe_code)]

//! # ordpipe - order-preserving parallel map-reduce pipeline
//!
//! This crate provides a concurrency core that accepts an unbounded stream
//! of inputs, applies a user-supplied *map* transformation in parallel
//! across a fixed pool of worker threads, and feeds the results into a
//! single-threaded *reduce* sink in the exact order the inputs were
//! submitted, regardless of how long individual maps take.
//!
//! # Architecture
//!
//! ```text
//! submit ──> BoundedFifo ──> worker pool (N) ──> OrderedQueue ──> reducer ──> sink
//!            (idx, input)     map in parallel    (idx, output)    (1 thread)
//! ```
//!
//! Each submission is tagged with a monotone index. Workers publish mapped
//! results keyed by that index into a bounded reordering queue, whose
//! consumer releases items strictly at the watermark. Both containers are
//! bounded, so memory stays capped by backpressure on either side of the
//! map stage, and the queue's head-improvement admission rule keeps the
//! composition deadlock-free.
//!
//! # Example
//!
//! ```
//! use ordpipe::{Map, Pipeline, PipelineConfig, Reduce};
//!
//! struct Upper;
//!
//! impl Map for Upper {
//!     type Input = String;
//!     type Output = String;
//!
//!     fn map(&self, input: String) -> anyhow::Result<String> {
//!         Ok(input.to_uppercase())
//!     }
//! }
//!
//! struct Join(String);
//!
//! impl Reduce<String> for Join {
//!     fn reduce(&mut self, item: String) -> anyhow::Result<()> {
//!         self.0.push_str(&item);
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> ordpipe::Result<()> {
//! let mut pipeline = Pipeline::new(Upper, Join(String::new()), &PipelineConfig::with_workers(2))?;
//! pipeline.submit("a".to_string())?;
//! pipeline.submit("b".to_string())?;
//! pipeline.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Shutdown
//!
//! [`Pipeline::close`] drains all in-flight work before returning: it
//! closes the intake, joins the workers, closes the reordering queue, and
//! joins the reducer, in that order. Dropping an unclosed pipeline runs
//! the same sequence; threads are never leaked.
//!
//! The containers themselves ([`BoundedFifo`], [`OrderedQueue`]) are
//! public and can be composed directly when the façade does not fit.

pub mod errors;
pub mod pipeline;
pub mod queue;
pub mod sink;

pub use errors::{PipelineError, PushError, Result};
pub use pipeline::{Map, Pipeline, PipelineConfig, Reduce};
pub use queue::{BoundedFifo, OrderedQueue};
pub use sink::FileSink;
