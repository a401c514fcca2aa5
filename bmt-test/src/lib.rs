//! Test utilities for the load generator and its collector client.
//!
//! This crate provides utilities to facilitate testing against a Scribe collector without running
//! one. See the modules for all available utilities.

pub mod collector;
pub mod tracing;
