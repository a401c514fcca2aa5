//! Exposes an in-process Scribe collector for use in integration tests.
//!
//! ```
//! use bmt_test::collector::TestCollector;
//!
//! #[tokio::main]
//! async fn main() {
//!    let collector = TestCollector::new().await;
//!    let addr = collector.addr();
//!    // point a client at `addr`, then inspect `collector.batches()`...
//! }
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bmt_scribe::protocol;
use bmt_scribe::{LogEntry, ResultCode};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

type Batches = Arc<Mutex<Vec<Vec<LogEntry>>>>;

/// An in-process Scribe collector for use in integration tests.
///
/// The collector listens on a random available port on localhost, accepts any number of
/// connections and records every batch it receives. It stops listening when dropped.
#[derive(Debug)]
pub struct TestCollector {
    handle: JoinHandle<()>,
    socket: SocketAddr,
    batches: Batches,
}

impl TestCollector {
    /// Starts a collector that acknowledges every batch with [`ResultCode::Ok`].
    pub async fn new() -> Self {
        Self::with_result(ResultCode::Ok).await
    }

    /// Starts a collector that answers every batch with the given result code.
    ///
    /// Batches answered with [`ResultCode::TryLater`] are recorded all the same.
    pub async fn with_result(code: ResultCode) -> Self {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let socket = listener.local_addr().unwrap();
        let batches = Batches::default();

        let handle = tokio::spawn({
            let batches = Arc::clone(&batches);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, Arc::clone(&batches), code));
                }
            }
        });

        Self {
            handle,
            socket,
            batches,
        }
    }

    /// Returns the address the collector listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns a snapshot of all batches received so far, in arrival order.
    pub fn batches(&self) -> Vec<Vec<LogEntry>> {
        self.batches.lock().unwrap().clone()
    }

    /// Returns a snapshot of all entries received for the given category.
    pub fn entries(&self, category: &str) -> Vec<LogEntry> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter(|entry| entry.category == category)
            .cloned()
            .collect()
    }

    /// Waits until every given category has received at least `count` entries.
    ///
    /// Returns `false` if that did not happen within `timeout`.
    pub async fn wait_for(&self, categories: &[&str], count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if categories
                .iter()
                .all(|category| self.entries(category).len() >= count)
            {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestCollector {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, batches: Batches, code: ResultCode) {
    let mut framed = Framed::new(stream, protocol::frame_codec());
    while let Some(Ok(frame)) = framed.next().await {
        let Ok((header, entries)) = protocol::decode_log_call(frame.freeze()) else {
            return;
        };
        batches.lock().unwrap().push(entries);

        let reply = protocol::encode_log_reply(header.seqid, code);
        if framed.send(reply).await.is_err() {
            return;
        }
    }
}
