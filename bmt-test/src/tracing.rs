use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

const CRATE_NAMES: &[&str] = &["bmt", "bmt_scribe", "bmt_test"];

/// Initialize the logger for testing.
///
/// This logs to the stdout registered by the Rust test runner, and only captures logs from the
/// crates of this workspace.
///
/// # Example
///
/// ```
/// bmt_test::tracing::init();
/// ```
pub fn init() {
    let mut env_filter = EnvFilter::new("ERROR");

    for name in CRATE_NAMES {
        env_filter = env_filter.add_directive(format!("{name}=TRACE").parse().unwrap());
    }

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

/// Log output captured by [`capture`].
#[derive(Debug)]
pub struct CapturedLogs {
    buffer: SharedBuffer,
    _guard: ::tracing::subscriber::DefaultGuard,
}

impl CapturedLogs {
    /// Returns everything logged at `INFO` or above since the capture started.
    pub fn contents(&self) -> String {
        let bytes = self.buffer.0.lock().unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[derive(Clone, Debug, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Records plain-text logs of the current thread until the returned value is dropped.
///
/// Tasks spawned on a current-thread runtime log into the capture as well, which covers
/// `#[tokio::test]`.
///
/// # Example
///
/// ```
/// let logs = bmt_test::tracing::capture();
/// // run code under test
/// assert!(!logs.contents().contains("ERROR"));
/// ```
pub fn capture() -> CapturedLogs {
    let buffer = SharedBuffer::default();
    let writer = buffer.clone();

    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_target(true)
        .finish();

    CapturedLogs {
        buffer,
        _guard: ::tracing::subscriber::set_default(subscriber),
    }
}
