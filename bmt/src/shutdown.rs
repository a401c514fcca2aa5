//! Cooperative stop flags and the process signal listener.
//!
//! Nothing is ever cancelled forcefully from here. A [`StopFlag`] is only set, and its owner polls
//! it at the top of its loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;

/// A one-way flag asking its owner to stop at the next opportunity.
///
/// Clones share the same flag. Once triggered, a flag stays triggered.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Creates a flag that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the owner of this flag to stop.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once [`trigger`](Self::trigger) has been called on any clone.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Triggers `flag` whenever the process receives `SIGTERM` or `SIGINT`.
///
/// The handlers are installed before this returns. The spawned listener only logs and sets the
/// flag; it lives for the remainder of the runtime.
pub fn listen_for_signals(flag: StopFlag) -> std::io::Result<JoinHandle<()>> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = terminate.recv() => "SIGTERM",
                _ = interrupt.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "got a signal");
            flag.trigger();
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let flag = StopFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_triggered());

        flag.trigger();
        assert!(clone.is_triggered());

        // Triggering again is harmless.
        clone.trigger();
        assert!(flag.is_triggered());
    }
}
