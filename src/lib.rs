mod close;
mod error;
mod liveness;
mod logger;
mod models;
mod runtime;
mod session;

#[cfg(test)]
mod tests;

pub use error::RelayError;
pub use logger::{initialize_logger, InitializeLoggerError};
pub use models::{
    AsyncReadWrite, CompletionPolicy, Direction, SessionConfig, Side, TransferStats,
};
pub use session::TransportSession;
