use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared timestamp of the last observed forward progress: data moved in
/// either direction, or a heartbeat tick. Read by the copy loops to detect
/// idle timeout.
#[derive(Clone, Default)]
pub(crate) struct LivenessClock {
    inner: Arc<Mutex<Option<Instant>>>,
}

impl LivenessClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn touch(&self) {
        let mut guard = self.inner.lock().unwrap();
        *guard = Some(Instant::now());
    }

    pub(crate) fn last(&self) -> Option<Instant> {
        let guard = self.inner.lock().unwrap();
        *guard
    }

    /// True once the gap since the last touch exceeds `window`. A clock that
    /// was never touched is not expired; the copy loops treat that case
    /// separately.
    pub(crate) fn expired(&self, window: Duration) -> bool {
        match self.last() {
            Some(at) => at.elapsed() > window,
            None => false,
        }
    }
}
