//! A minimal async client for the Scribe log collector.
//!
//! Scribe accepts batches of [`LogEntry`] values through a single `Log` remote call. The call is
//! encoded with the Thrift binary protocol and sent over a TCP stream where every message is
//! prefixed with its 4-byte big-endian length (the "framed" transport).
//!
//! ```no_run
//! use bmt_scribe::{LogEntry, ScribeClient};
//!
//! # async fn example() -> bmt_scribe::Result<()> {
//! let mut client = ScribeClient::connect("127.0.0.1:1463").await?;
//! let code = client
//!     .log(&[LogEntry::new("bmt_0", "hello collector\n")])
//!     .await?;
//! println!("collector answered {code:?}");
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod client;
mod error;
pub mod protocol;

pub use client::*;
pub use error::*;

/// A single log line destined for a Scribe category.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LogEntry {
    /// The category the collector files this message under.
    pub category: String,
    /// The raw log line, usually terminated by a newline.
    pub message: String,
}

impl LogEntry {
    /// Creates a new entry for the given category.
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }
}

/// The outcome of a `Log` call as reported by the collector.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResultCode {
    /// The whole batch was accepted.
    Ok,
    /// The collector is overloaded and dropped the batch.
    TryLater,
}

impl ResultCode {
    /// Returns the wire value of this result code.
    pub fn as_i32(self) -> i32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::TryLater => 1,
        }
    }

    /// Parses a result code from its wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ResultCode::Ok),
            1 => Some(ResultCode::TryLater),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests;
