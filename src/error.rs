use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Session already started")]
    AlreadyStarted,

    #[error("Stream is no longer available: {0}")]
    StreamUnavailable(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Other(err.to_string())
    }
}

/// Recoverable read/write stall. Retried with a short backoff as long as the
/// liveness window is still open.
pub(crate) fn is_timeout_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Errors that some transports raise instead of a typed EOF. A single one is
/// not trusted on its own; the close policy requires a sustained run of them.
pub(crate) fn indicates_closed(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    ) {
        return true;
    }
    err.to_string().to_ascii_lowercase().contains("closed")
}
