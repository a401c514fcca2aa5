//! Construction of synthetic log records.

use std::time::SystemTime;

use bmt_scribe::LogEntry;

/// Per-worker record numbering and identity.
///
/// Each worker owns exactly one of these. Sequence numbers are only ordered within a worker.
#[derive(Debug)]
pub struct EmissionState {
    identity: String,
    category: String,
    written: u64,
}

impl EmissionState {
    /// Creates the state of a worker that has not written anything yet.
    pub fn new(identity: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            category: category.into(),
            written: 0,
        }
    }

    /// The identity embedded in every record, see [`worker_identity`].
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The category all records of this worker are filed under.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The number of records built so far, which is also the last sequence number used.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Builds the next batch of exactly `size` records.
    ///
    /// Sequence numbers continue where the previous batch stopped; the very first record is `1`.
    pub fn build_batch(&mut self, size: usize, payload: &str) -> Vec<LogEntry> {
        (0..size)
            .map(|_| {
                self.written += 1;
                let message =
                    format_record(SystemTime::now(), &self.identity, self.written, payload);
                LogEntry::new(self.category.clone(), message)
            })
            .collect()
    }
}

/// Renders a single record as `<timestamp> <identity> <seq> <payload>\n`.
pub fn format_record(timestamp: SystemTime, identity: &str, seq: u64, payload: &str) -> String {
    format!(
        "{} {identity} {seq} {payload}\n",
        humantime::format_rfc3339_micros(timestamp)
    )
}

/// The identity of a worker, `<hostname>-<index>`.
pub fn worker_identity(hostname: &str, index: usize) -> String {
    format!("{hostname}-{index}")
}

/// The category a worker writes to, `<prefix><index>`.
pub fn worker_category(prefix: &str, index: usize) -> String {
    format!("{prefix}{index}")
}

/// Returns the name of this host, or `localhost` if it cannot be determined.
pub fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn seq_of(entry: &LogEntry) -> u64 {
        entry
            .message
            .split(' ')
            .nth(2)
            .and_then(|seq| seq.parse().ok())
            .unwrap()
    }

    #[test]
    fn batches_have_requested_size() {
        let mut state = EmissionState::new("host-0", "bmt_0");
        assert_eq!(state.build_batch(50, "payload").len(), 50);
        assert_eq!(state.build_batch(7, "payload").len(), 7);
        assert_eq!(state.written(), 57);
    }

    #[test]
    fn sequence_starts_at_one_and_increases() {
        let mut state = EmissionState::new("host-3", "bmt_3");

        let first = state.build_batch(50, "payload");
        let second = state.build_batch(50, "payload");
        let seqs: Vec<_> = first.iter().chain(&second).map(seq_of).collect();

        assert_eq!(seqs[0], 1);
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(*seqs.last().unwrap(), 100);
    }

    #[test]
    fn records_carry_identity_and_category() {
        let mut state = EmissionState::new(worker_identity("myhost", 4), worker_category("bmt_", 4));
        assert_eq!(state.identity(), "myhost-4");
        assert_eq!(state.category(), "bmt_4");

        let batch = state.build_batch(1, "the payload");

        assert_eq!(batch[0].category, "bmt_4");
        assert!(batch[0].message.contains(" myhost-4 1 the payload\n"));
    }

    #[test]
    fn record_format() {
        let timestamp = SystemTime::UNIX_EPOCH + Duration::from_micros(1_500_000);
        assert_eq!(
            format_record(timestamp, "host-1", 42, "hello"),
            "1970-01-01T00:00:01.500000Z host-1 42 hello\n"
        );
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!local_hostname().is_empty());
    }
}
