//! The ramp-up controller.
//!
//! The [`Controller`] owns a fixed pool of workers, one per target slot, all idle at first. Every
//! iteration of its loop either shuts the whole pool down, if the shutdown flag has been
//! triggered, or starts the next `step` idle workers. Then it sleeps for the ramp interval,
//! whether or not anything was started.
//!
//! Workers never talk back to the controller. The only coordination is start, stop and join, and
//! the only data returned is each worker's [`WorkerReport`] when it is joined.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::config;
use crate::emitter::{self, Connector, WorkerReport};
use crate::error::{Error, Result};
use crate::shutdown::StopFlag;

/// One slot in the worker pool.
#[derive(Debug)]
pub struct WorkerHandle {
    index: usize,
    state: WorkerState,
}

#[derive(Debug)]
enum WorkerState {
    Idle,
    Running {
        stop: StopFlag,
        task: JoinHandle<Result<WorkerReport>>,
    },
    Terminated,
}

impl WorkerHandle {
    fn new(index: usize) -> Self {
        Self {
            index,
            state: WorkerState::Idle,
        }
    }

    /// The position of this worker in the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns `true` once the worker has been started, including after it was terminated.
    pub fn is_started(&self) -> bool {
        !matches!(self.state, WorkerState::Idle)
    }

    fn start<C: Connector>(&mut self, connector: &Arc<C>, config: &Arc<config::Emitter>) {
        debug_assert!(matches!(self.state, WorkerState::Idle));

        let stop = StopFlag::new();
        let task = tokio::spawn(emitter::run(
            self.index,
            Arc::clone(connector),
            Arc::clone(config),
            stop.clone(),
        ));
        self.state = WorkerState::Running { stop, task };
    }

    fn terminate(&self) {
        if let WorkerState::Running { stop, .. } = &self.state {
            stop.trigger();
        }
    }

    async fn join(&mut self, deadline: tokio::time::Instant) -> Option<WorkerOutcome> {
        let WorkerState::Running { mut task, .. } =
            std::mem::replace(&mut self.state, WorkerState::Terminated)
        else {
            return None;
        };

        let index = self.index;
        let outcome = match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(Ok(Ok(report))) => WorkerOutcome::Finished(report),
            // The worker logged the error when it gave up.
            Ok(Ok(Err(error))) => WorkerOutcome::Failed {
                index,
                error: error.to_string(),
            },
            Ok(Err(join_error)) => {
                tracing::error!(
                    worker = index,
                    error = &join_error as &dyn std::error::Error,
                    "worker panicked"
                );
                WorkerOutcome::Failed {
                    index,
                    error: join_error.to_string(),
                }
            }
            Err(_elapsed) => {
                tracing::warn!(worker = index, "worker did not stop in time, aborting");
                task.abort();
                WorkerOutcome::Aborted { index }
            }
        };

        Some(outcome)
    }
}

/// How a started worker ended.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The worker observed its stop flag and exited normally.
    Finished(WorkerReport),
    /// The worker exited early with an error.
    Failed {
        /// Index of the worker in the pool.
        index: usize,
        /// The error that ended the worker.
        error: String,
    },
    /// The worker did not stop within the shutdown grace period.
    Aborted {
        /// Index of the worker in the pool.
        index: usize,
    },
}

/// Result of a complete run, from the first ramp iteration to the end of shutdown.
#[derive(Debug)]
pub struct RunReport {
    /// The target number of workers.
    pub target: usize,
    /// Outcomes of all started workers, ordered by index.
    pub workers: Vec<WorkerOutcome>,
    /// Total run time.
    pub elapsed: Duration,
}

/// The result of a single controller iteration.
#[derive(Debug)]
pub enum Step {
    /// This many new workers were started.
    Started(usize),
    /// All workers are already running.
    Idle,
    /// The pool was shut down. No further iteration does anything.
    Shutdown(RunReport),
}

/// Ramps a pool of workers up to its target and shuts it down on request.
#[derive(Debug)]
pub struct Controller<C> {
    workers: Vec<WorkerHandle>,
    active: usize,
    ramp: config::Ramp,
    emitter: Arc<config::Emitter>,
    connector: Arc<C>,
    shutdown: StopFlag,
    started_at: Instant,
}

impl<C: Connector> Controller<C> {
    /// Creates a controller with `target` idle workers.
    ///
    /// The controller stops the pool once `shutdown` is triggered. Use
    /// [`listen_for_signals`](crate::shutdown::listen_for_signals) to connect it to `SIGTERM` and
    /// `SIGINT`.
    pub fn new(
        target: usize,
        ramp: config::Ramp,
        emitter: config::Emitter,
        connector: C,
        shutdown: StopFlag,
    ) -> Result<Self> {
        if target == 0 {
            return Err(Error::InvalidConfig("target worker count must be positive"));
        }
        if ramp.step == 0 {
            return Err(Error::InvalidConfig("ramp step must be positive"));
        }

        tracing::info!("initialize controller with {target} workers");

        Ok(Self {
            workers: (0..target).map(WorkerHandle::new).collect(),
            active: 0,
            ramp,
            emitter: Arc::new(emitter),
            connector: Arc::new(connector),
            shutdown,
            started_at: Instant::now(),
        })
    }

    /// The number of workers started so far.
    pub fn active_count(&self) -> usize {
        self.active
    }

    /// The number of workers the controller ramps up to.
    pub fn target_count(&self) -> usize {
        self.workers.len()
    }

    /// The worker pool, ordered by index.
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Runs the controller until the shutdown flag is observed and all workers have been joined.
    pub async fn run(mut self) -> RunReport {
        tracing::info!(
            workers = self.target_count(),
            step = self.ramp.step,
            interval = %humantime::format_duration(self.ramp.interval),
            "start loop"
        );

        loop {
            if let Step::Shutdown(report) = self.step().await {
                return report;
            }
            tokio::time::sleep(self.ramp.interval).await;
        }
    }

    /// Performs a single iteration of the controller loop, without the trailing sleep.
    pub async fn step(&mut self) -> Step {
        if self.shutdown.is_triggered() {
            return Step::Shutdown(self.shutdown().await);
        }

        let target = self.target_count();
        tracing::info!("now {}/{target}", self.active);

        let end = (self.active + self.ramp.step).min(target);
        if end == self.active {
            return Step::Idle;
        }

        for worker in &mut self.workers[self.active..end] {
            tracing::info!(worker = worker.index, "worker start");
            worker.start(&self.connector, &self.emitter);
        }
        let started = end - self.active;
        self.active = end;

        tracing::warn!("rampup {}/{target}", self.active);
        Step::Started(started)
    }

    async fn shutdown(&mut self) -> RunReport {
        tracing::info!(active = self.active, "finish jobs");

        let started = &mut self.workers[..self.active];
        for worker in started.iter() {
            worker.terminate();
        }

        let deadline = tokio::time::Instant::now() + self.ramp.shutdown_grace;
        let mut outcomes = Vec::with_capacity(started.len());
        for worker in started.iter_mut() {
            outcomes.extend(worker.join(deadline).await);
        }

        tracing::info!(joined = outcomes.len(), "all workers stopped");

        RunReport {
            target: self.workers.len(),
            workers: outcomes,
            elapsed: self.started_at.elapsed(),
        }
    }
}
