use std::fmt;
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

// Trait for the opaque byte streams handed to a session. Anything duplex
// works: TcpStream, a TLS-wrapped stream, tokio's in-memory duplex pipes.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> AsyncReadWrite for T {}

pub(crate) type BoxedStream = Box<dyn AsyncReadWrite>;

/// Caller-supplied keep-alive probe, invoked while the session is idle.
pub type HeartbeatProbe = dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Completion callback: (uploaded_bytes, downloaded_bytes).
pub type CompletionCallback = dyn FnOnce(i64, i64) + Send;

// Copy direction, named from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client -> remote
    Upload,
    /// remote -> client
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "client->remote"),
            Direction::Download => write!(f, "remote->client"),
        }
    }
}

// Which end of the tunnel a resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

/// Rule selecting which combination of direction-completions counts as the
/// session being reliably done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    EitherSide,
    BothSides,
    ClientOnly,
    RemoteOnly,
}

impl CompletionPolicy {
    pub fn is_satisfied(&self, uploaded_set: bool, downloaded_set: bool) -> bool {
        match self {
            CompletionPolicy::EitherSide => uploaded_set || downloaded_set,
            CompletionPolicy::BothSides => uploaded_set && downloaded_set,
            CompletionPolicy::ClientOnly => uploaded_set,
            CompletionPolicy::RemoteOnly => downloaded_set,
        }
    }
}

/// Session tuning. Set once before `perform()` and immutable afterwards.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum gap since the last observed activity before the copy loops
    /// give up regardless of the close policy.
    pub alive_interval: Duration,
    /// Spacing between heartbeat probe invocations while no payload has
    /// flowed yet.
    pub heartbeat_interval: Duration,
    /// Per-attempt read slice; an elapsed read surfaces as a recoverable
    /// timeout rather than blocking the loop past the liveness checks.
    pub read_timeout: Duration,
    /// Backoff before retrying a recoverable copy attempt.
    pub retry_backoff: Duration,
    /// Poll granularity of the supervisor loop.
    pub poll_interval: Duration,
    /// Consecutive probably-closed observations before a stream is declared
    /// dead.
    pub max_closed_cycles: u32,
    pub completion_policy: CompletionPolicy,
    /// Folded into the final uploaded total (e.g. handshake bytes exchanged
    /// before the relay started).
    pub extra_uploaded_bytes: i64,
    /// Folded into the final downloaded total.
    pub extra_downloaded_bytes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            alive_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(50),
            poll_interval: Duration::from_millis(100),
            max_closed_cycles: 10,
            completion_policy: CompletionPolicy::EitherSide,
            extra_uploaded_bytes: 0,
            extra_downloaded_bytes: 0,
        }
    }
}

// Per-direction transfer statistics, retained for observability hooks.
#[derive(Debug, Default, Clone)]
pub struct TransferStats {
    pub bytes: u64,
    pub chunks: u64,
    pub last_error: Option<String>,
}
