//! Prints the summary of a finished run.

use std::fmt;
use std::time::Duration;

use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::ramp::{RunReport, WorkerOutcome};

/// Totals across all workers of a run.
#[derive(Default)]
pub struct Totals {
    /// Records sent by workers that finished normally.
    pub written: u64,
    /// Acknowledged send calls.
    pub batches: u64,
    /// Batches dropped by the collector.
    pub try_later: u64,
    /// Workers that failed or had to be aborted.
    pub failures: u64,
    /// Merged send latencies in seconds.
    pub latency: DDSketch,
}

impl fmt::Debug for Totals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Totals")
            .field("written", &self.written)
            .field("batches", &self.batches)
            .field("try_later", &self.try_later)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl Totals {
    /// Sums up the outcomes of all workers in the report.
    pub fn from_report(report: &RunReport) -> Self {
        let mut totals = Totals::default();
        for outcome in &report.workers {
            match outcome {
                WorkerOutcome::Finished(worker) => {
                    totals.written += worker.written;
                    totals.batches += worker.batches;
                    totals.try_later += worker.try_later;
                    // Sketches with the default configuration always merge.
                    totals.latency.merge(&worker.latency).ok();
                }
                WorkerOutcome::Failed { .. } | WorkerOutcome::Aborted { .. } => {
                    totals.failures += 1;
                }
            }
        }
        totals
    }
}

/// Prints a human readable summary of the run to stdout.
pub fn print_summary(report: &RunReport) {
    let totals = Totals::from_report(report);
    let elapsed = Duration::from_secs(report.elapsed.as_secs());

    println!();
    println!(
        "{} ({}/{} workers started, ran for {})",
        "## SUMMARY".bold(),
        report.workers.len().bold(),
        report.target,
        humantime::format_duration(elapsed).blue()
    );

    print!("{} ({} batches", "WRITE:".bold().green(), totals.batches.bold());
    if totals.try_later > 0 {
        print!(
            ", {}",
            format!("{} TRY LATER", totals.try_later).bold().yellow()
        );
    }
    if totals.failures > 0 {
        print!(
            ", {}",
            format!("{} FAILED WORKERS", totals.failures).bold().red()
        );
    }
    println!(")");

    print_throughput(totals.written, report.elapsed);
    if totals.latency.count() > 0 {
        print_percentiles(&totals.latency, Duration::from_secs_f64);
    }

    for outcome in &report.workers {
        match outcome {
            WorkerOutcome::Finished(_) => {}
            WorkerOutcome::Failed { index, error } => {
                println!("  {} {error}", format!("worker {index} failed:").red());
            }
            WorkerOutcome::Aborted { index } => {
                println!("  {}", format!("worker {index} was aborted").red());
            }
        }
    }
}

fn print_throughput(written: u64, duration: Duration) {
    let per_second = written as f64 / duration.as_secs_f64().max(f64::EPSILON);
    println!(
        "  {} records, {:.2} records/s",
        written.bold(),
        per_second.bold()
    );
}

fn print_percentiles<T: fmt::Debug>(sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let quantile = |q| map(sketch.quantile(q).ok().flatten().unwrap_or_default());
    let avg = map(sketch.sum().unwrap_or_default() / sketch.count() as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!(
        "  latency avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}
