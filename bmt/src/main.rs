//! Ramping load generator for Scribe log collectors.
//!
//! Starts one more worker every ramp interval until the requested number of workers is running.
//! Each worker owns a connection to the collector and sends batches of synthetic log lines in a
//! loop, logging how long every batch took. `SIGTERM` or `SIGINT` stop all workers and print a
//! summary of the run.
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    bmt::cli::execute()
}
