//! A load generator for Scribe log collectors.
//!
//! The [`Controller`] ramps a fixed pool of workers up to a target count, starting `step` workers
//! every ramp interval. Each worker runs the [emission loop](emitter::run): it owns a single
//! connection to the collector and sends batches of synthetic log records, timing every send,
//! until it is asked to stop.
//!
//! Stopping is cooperative. `SIGTERM` and `SIGINT` only set a [`StopFlag`], which the controller
//! polls once per iteration. It then stops every started worker, which in turn polls its own flag
//! between batches, and joins them.
#![warn(missing_debug_implementations)]

pub mod batch;
pub mod cli;
pub mod config;
pub mod emitter;
pub mod error;
pub mod observability;
pub mod ramp;
pub mod report;
pub mod shutdown;

pub use crate::error::{Error, Result};
pub use crate::ramp::{Controller, RunReport, Step};
pub use crate::shutdown::StopFlag;
