//! The per-worker emission loop.
//!
//! A worker owns one connection to the collector and repeats a simple cycle until its
//! [`StopFlag`] is triggered: build a batch, send it, time the send, and pause for the pacing
//! interval. The flag is only checked between cycles, so a stopping worker never sends a partial
//! batch.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bmt_scribe::{LogEntry, ResultCode, ScribeClient};
use sketches_ddsketch::DDSketch;

use crate::batch::{EmissionState, local_hostname, worker_category, worker_identity};
use crate::config;
use crate::error::{Error, Result};
use crate::shutdown::StopFlag;

/// An open connection that accepts batches of log entries.
#[async_trait]
pub trait Collector: Send + 'static {
    /// Delivers the whole batch in a single request and waits for the acknowledgement.
    async fn send(&mut self, batch: Vec<LogEntry>) -> bmt_scribe::Result<ResultCode>;
}

/// Opens connections to a collector, one per worker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection type handed to each worker.
    type Collector: Collector;

    /// Establishes a new connection.
    async fn open(&self) -> Result<Self::Collector>;
}

#[async_trait]
impl Collector for ScribeClient {
    async fn send(&mut self, batch: Vec<LogEntry>) -> bmt_scribe::Result<ResultCode> {
        self.log(&batch).await
    }
}

/// Connects workers to a Scribe collector over TCP.
#[derive(Clone, Debug)]
pub struct ScribeConnector {
    addr: String,
    connect_timeout: Duration,
}

impl ScribeConnector {
    /// Creates a connector for the configured collector.
    pub fn new(config: &config::Collector) -> Self {
        Self {
            addr: config.addr(),
            connect_timeout: config.connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for ScribeConnector {
    type Collector = ScribeClient;

    async fn open(&self) -> Result<ScribeClient> {
        let connect = ScribeClient::connect(self.addr.as_str());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(cause)) => Err(Error::Connect {
                addr: self.addr.clone(),
                cause,
            }),
            Err(_elapsed) => Err(Error::ConnectTimeout {
                addr: self.addr.clone(),
            }),
        }
    }
}

/// What a worker did during its lifetime, handed back when it is joined.
pub struct WorkerReport {
    /// Index of the worker in the pool.
    pub index: usize,
    /// Total number of records sent.
    pub written: u64,
    /// Number of acknowledged send calls.
    pub batches: u64,
    /// Number of batches the collector dropped with [`ResultCode::TryLater`].
    pub try_later: u64,
    /// Send latencies in seconds.
    pub latency: DDSketch,
}

impl WorkerReport {
    fn new(index: usize) -> Self {
        Self {
            index,
            written: 0,
            batches: 0,
            try_later: 0,
            latency: DDSketch::default(),
        }
    }

    fn record(&mut self, elapsed: Duration, code: ResultCode) {
        self.batches += 1;
        if code == ResultCode::TryLater {
            self.try_later += 1;
        }
        self.latency.add(elapsed.as_secs_f64());
    }
}

impl fmt::Debug for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerReport")
            .field("index", &self.index)
            .field("written", &self.written)
            .field("batches", &self.batches)
            .field("try_later", &self.try_later)
            .field("latency_samples", &self.latency.count())
            .finish()
    }
}

/// Runs the emission loop of the worker with the given index until `stop` is triggered.
///
/// Failing to connect and failing to send are both fatal to the worker: the error is logged as
/// soon as it happens, returned, and nothing is retried.
pub async fn run<C: Connector>(
    index: usize,
    connector: Arc<C>,
    config: Arc<config::Emitter>,
    stop: StopFlag,
) -> Result<WorkerReport> {
    let result = emit(index, &*connector, &config, &stop).await;
    if let Err(ref error) = result {
        tracing::error!(
            worker = index,
            error = error as &dyn std::error::Error,
            "worker failed"
        );
    }
    result
}

async fn emit<C: Connector>(
    index: usize,
    connector: &C,
    config: &config::Emitter,
    stop: &StopFlag,
) -> Result<WorkerReport> {
    let mut state = EmissionState::new(
        worker_identity(&local_hostname(), index),
        worker_category(&config.category_prefix, index),
    );
    tracing::info!(
        worker = index,
        identity = state.identity(),
        category = state.category(),
        "initialize worker"
    );

    let mut collector = connector.open().await?;
    let mut report = WorkerReport::new(index);

    loop {
        if stop.is_triggered() {
            tracing::info!(worker = index, written = state.written(), "finish work");
            report.written = state.written();
            return Ok(report);
        }

        let batch = state.build_batch(config.logs_per_batch, &config.payload);

        let started = Instant::now();
        let code = collector.send(batch).await.map_err(|cause| Error::Send {
            worker: index,
            written: state.written(),
            cause,
        })?;
        let elapsed = started.elapsed();
        report.record(elapsed, code);

        tracing::info!(
            worker = index,
            ?elapsed,
            "elapsed time to write {} logs/{}",
            config.logs_per_batch,
            state.written(),
        );
        if code == ResultCode::TryLater {
            tracing::warn!(worker = index, "collector asked to try later, batch dropped");
        }

        if !config.pacing_interval.is_zero() {
            tokio::time::sleep(config.pacing_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    /// Forwards every batch to the test and answers with a fixed result.
    struct ChannelCollector {
        tx: mpsc::UnboundedSender<Vec<LogEntry>>,
        code: bmt_scribe::Result<ResultCode, ()>,
    }

    #[async_trait]
    impl Collector for ChannelCollector {
        async fn send(&mut self, batch: Vec<LogEntry>) -> bmt_scribe::Result<ResultCode> {
            self.tx.send(batch).ok();
            self.code.map_err(|()| bmt_scribe::Error::ConnectionClosed)
        }
    }

    struct ChannelConnector {
        tx: mpsc::UnboundedSender<Vec<LogEntry>>,
        code: bmt_scribe::Result<ResultCode, ()>,
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        type Collector = ChannelCollector;

        async fn open(&self) -> Result<ChannelCollector> {
            Ok(ChannelCollector {
                tx: self.tx.clone(),
                code: self.code,
            })
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        type Collector = ChannelCollector;

        async fn open(&self) -> Result<ChannelCollector> {
            Err(Error::ConnectTimeout {
                addr: "collector:1463".to_owned(),
            })
        }
    }

    fn connector(
        code: bmt_scribe::Result<ResultCode, ()>,
    ) -> (Arc<ChannelConnector>, mpsc::UnboundedReceiver<Vec<LogEntry>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelConnector { tx, code }), rx)
    }

    fn emitter_config() -> Arc<config::Emitter> {
        Arc::new(config::Emitter {
            payload: "payload".to_owned(),
            ..Default::default()
        })
    }

    fn seq_of(entry: &LogEntry) -> u64 {
        entry.message.split(' ').nth(2).unwrap().parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn sends_full_batches_until_stopped() {
        let (connector, mut rx) = connector(Ok(ResultCode::Ok));
        let stop = StopFlag::new();
        let worker = tokio::spawn(run(7, connector, emitter_config(), stop.clone()));

        let mut seqs = Vec::new();
        for _ in 0..3 {
            let batch = rx.recv().await.unwrap();
            assert_eq!(batch.len(), 50);
            assert!(batch.iter().all(|entry| entry.category == "bmt_7"));
            seqs.extend(batch.iter().map(seq_of));
        }
        stop.trigger();

        let report = worker.await.unwrap().unwrap();
        assert_eq!(report.index, 7);
        assert_eq!(report.written, report.batches * 50);
        assert_eq!(report.latency.count() as u64, report.batches);

        // Whatever was sent after the trigger is complete as well.
        while let Ok(batch) = rx.try_recv() {
            assert_eq!(batch.len(), 50);
            seqs.extend(batch.iter().map(seq_of));
        }
        assert_eq!(seqs.len() as u64, report.written);
        assert_eq!(seqs[0], 1);
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_before_first_batch() {
        let (connector, mut rx) = connector(Ok(ResultCode::Ok));
        let stop = StopFlag::new();
        stop.trigger();

        let report = run(0, connector, emitter_config(), stop).await.unwrap();
        assert_eq!(report.written, 0);
        assert_eq!(report.batches, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn counts_try_later() {
        let (connector, mut rx) = connector(Ok(ResultCode::TryLater));
        let stop = StopFlag::new();
        let worker = tokio::spawn(run(1, connector, emitter_config(), stop.clone()));

        rx.recv().await.unwrap();
        stop.trigger();

        let report = worker.await.unwrap().unwrap();
        assert!(report.try_later >= 1);
        assert_eq!(report.try_later, report.batches);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_ends_worker() {
        let (connector, _rx) = connector(Err(()));

        let err = run(2, connector, emitter_config(), StopFlag::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Send { worker: 2, written: 50, .. }),
            "{err:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_ends_worker() {
        let err = run(3, Arc::new(RefusingConnector), emitter_config(), StopFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectTimeout { .. }), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn respects_pacing_interval() {
        let (connector, mut rx) = connector(Ok(ResultCode::Ok));
        let config = Arc::new(config::Emitter {
            pacing_interval: Duration::from_secs(1),
            ..Default::default()
        });
        let stop = StopFlag::new();
        let worker = tokio::spawn(run(0, connector, config, stop.clone()));

        let start = tokio::time::Instant::now();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));

        stop.trigger();
        worker.await.unwrap().unwrap();
    }
}
