/// Errors that can happen within the Scribe client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error emitted from the underlying TCP stream or framing codec.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The peer sent a message that does not follow the expected encoding.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The collector answered with an application exception instead of a result.
    #[error("collector raised an exception (type {kind}): {message}")]
    Application {
        /// The Thrift application exception type.
        kind: i32,
        /// The human readable exception message.
        message: String,
    },
    /// The collector closed the connection before replying.
    #[error("connection closed by collector")]
    ConnectionClosed,
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
