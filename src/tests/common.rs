// Shared helpers for the relay tests
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::SessionConfig;

// Opaque TLS stand-in whose drop bumps a shared counter, so tests can assert
// when (and how often) the session released it.
pub(crate) struct TlsProbe {
    released: Arc<AtomicUsize>,
}

impl Drop for TlsProbe {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn tls_probe() -> (Box<dyn Any + Send>, Arc<AtomicUsize>) {
    let released = Arc::new(AtomicUsize::new(0));
    (
        Box::new(TlsProbe {
            released: Arc::clone(&released),
        }),
        released,
    )
}

// Tight config so sessions wind down in milliseconds instead of minutes.
pub(crate) fn fast_config() -> SessionConfig {
    SessionConfig {
        alive_interval: Duration::from_secs(5),
        heartbeat_interval: Duration::from_millis(20),
        read_timeout: Duration::from_millis(100),
        retry_backoff: Duration::from_millis(5),
        poll_interval: Duration::from_millis(10),
        max_closed_cycles: 3,
        ..SessionConfig::default()
    }
}

pub(crate) async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
