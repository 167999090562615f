use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use futures::future::BoxFuture;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::close::{is_effectively_closed, CloseObservation};
use crate::error::{indicates_closed, is_timeout_error, RelayError};
use crate::liveness::LivenessClock;
use crate::models::{
    AsyncReadWrite, BoxedStream, CompletionCallback, Direction, HeartbeatProbe, SessionConfig,
    Side, TransferStats,
};
use crate::runtime;

type Reader = ReadHalf<BoxedStream>;
type Writer = WriteHalf<BoxedStream>;

const READ_BUFFER_SIZE: usize = 16 * 1024;

enum ForwardOutcome {
    Sent,
    /// The write half was withdrawn by cleanup; teardown is in progress.
    Withdrawn,
    Failed(io::Error),
}

/// One relayed connection pair. Owns the two streams, the optional TLS state
/// attached to either side, the transfer counters and the spawned tasks.
/// Created per tunneled connection, started once via `perform()`, then
/// discarded after the completion callback has fired.
pub struct TransportSession {
    id: String,
    config: SessionConfig,

    // Read halves sit here until perform() hands them to the copy tasks.
    client_reader: Mutex<Option<Reader>>,
    remote_reader: Mutex<Option<Reader>>,
    // Write halves stay shared so cleanup can withdraw and shut them down.
    client_writer: TokioMutex<Option<Writer>>,
    remote_writer: TokioMutex<Option<Writer>>,

    // Opaque TLS session/context state, released at most once.
    client_tls: Mutex<Option<Box<dyn Any + Send>>>,
    remote_tls: Mutex<Option<Box<dyn Any + Send>>>,

    // Set-once final totals (accumulated bytes plus the configured offset).
    uploaded: Mutex<Option<i64>>,
    downloaded: Mutex<Option<i64>>,
    upload_stats: Mutex<TransferStats>,
    download_stats: Mutex<TransferStats>,

    last_alive: LivenessClock,

    // Worker tasks only; grows during perform() and is read-only afterwards.
    tasks: Mutex<Vec<JoinHandle<()>>>,

    on_complete: Mutex<Option<Box<CompletionCallback>>>,
    on_heartbeat: Mutex<Option<Arc<HeartbeatProbe>>>,

    started: AtomicBool,
    reaped: AtomicBool,
}

impl TransportSession {
    pub fn new(
        client: impl AsyncReadWrite,
        remote: impl AsyncReadWrite,
        config: SessionConfig,
    ) -> Arc<Self> {
        let id = Uuid::new_v4().to_string();
        let (client_reader, client_writer) = split(Box::new(client) as BoxedStream);
        let (remote_reader, remote_writer) = split(Box::new(remote) as BoxedStream);

        info!(target: "relay_lifecycle", session_id = %id, "Session created");

        Arc::new(Self {
            id,
            config,
            client_reader: Mutex::new(Some(client_reader)),
            remote_reader: Mutex::new(Some(remote_reader)),
            client_writer: TokioMutex::new(Some(client_writer)),
            remote_writer: TokioMutex::new(Some(remote_writer)),
            client_tls: Mutex::new(None),
            remote_tls: Mutex::new(None),
            uploaded: Mutex::new(None),
            downloaded: Mutex::new(None),
            upload_stats: Mutex::new(TransferStats::default()),
            download_stats: Mutex::new(TransferStats::default()),
            last_alive: LivenessClock::new(),
            tasks: Mutex::new(Vec::new()),
            on_complete: Mutex::new(None),
            on_heartbeat: Mutex::new(None),
            started: AtomicBool::new(false),
            reaped: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register the completion callback. Invoked at most once, with the
    /// final (uploaded, downloaded) totals; 0 stands in for a direction the
    /// completion policy did not wait for.
    pub fn set_on_complete(&self, callback: impl FnOnce(i64, i64) + Send + 'static) {
        *self.on_complete.lock().unwrap() = Some(Box::new(callback));
    }

    /// Register the keep-alive probe, invoked every `heartbeat_interval`
    /// while no payload has flowed in either direction.
    pub fn set_on_heartbeat(
        &self,
        probe: impl Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    ) {
        *self.on_heartbeat.lock().unwrap() = Some(Arc::new(probe));
    }

    pub fn set_client_tls(&self, tls: Box<dyn Any + Send>) {
        *self.client_tls.lock().unwrap() = Some(tls);
    }

    pub fn set_remote_tls(&self, tls: Box<dyn Any + Send>) {
        *self.remote_tls.lock().unwrap() = Some(tls);
    }

    /// Start the session: spawns both copy tasks, the heartbeat task when a
    /// probe was registered, and the supervisor. Returns immediately; the
    /// outcome is delivered through the completion callback and `finished()`.
    pub fn perform(self: Arc<Self>) -> Result<(), RelayError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RelayError::AlreadyStarted);
        }

        let client_reader = self
            .client_reader
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| RelayError::StreamUnavailable("client read half".into()))?;
        let remote_reader = self
            .remote_reader
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| RelayError::StreamUnavailable("remote read half".into()))?;

        let handle = runtime::handle()?;
        self.last_alive.touch();

        let mut tasks = Vec::new();
        tasks.push(handle.spawn(run_copier(
            Arc::clone(&self),
            Direction::Upload,
            client_reader,
        )));
        tasks.push(handle.spawn(run_copier(
            Arc::clone(&self),
            Direction::Download,
            remote_reader,
        )));
        if self.on_heartbeat.lock().unwrap().is_some() {
            tasks.push(handle.spawn(run_heartbeat(Arc::clone(&self))));
        }
        *self.tasks.lock().unwrap() = tasks;

        handle.spawn(run_supervisor(Arc::clone(&self)));
        info!(target: "relay_lifecycle", session_id = %self.id, "Session started");
        Ok(())
    }

    /// True once every worker task has terminated and teardown has run.
    pub fn finished(&self) -> bool {
        self.reaped.load(Ordering::Acquire)
    }

    pub fn uploaded_bytes(&self) -> Option<i64> {
        *self.uploaded.lock().unwrap()
    }

    pub fn downloaded_bytes(&self) -> Option<i64> {
        *self.downloaded.lock().unwrap()
    }

    /// Snapshot of a direction's transfer counters, including the last error
    /// retained for observability.
    pub fn stats(&self, direction: Direction) -> TransferStats {
        self.stats_slot(direction).lock().unwrap().clone()
    }

    /// Close both streams and release any attached TLS state. Idempotent and
    /// infallible; safe to call at any point, even mid-session (copy tasks
    /// observe the withdrawn write halves and stop).
    pub async fn cleanup(&self) {
        self.cleanup_side(Side::Client).await;
        self.cleanup_side(Side::Remote).await;
    }

    /// Side-scoped teardown, for callers that need independent timing per
    /// side (e.g. reusing one side's TLS context while resetting the other).
    pub async fn cleanup_side(&self, side: Side) {
        let writer = {
            let mut guard = self.side_writer(side).lock().await;
            guard.take()
        };
        if let Some(mut writer) = writer {
            // Double close must stay a no-op, so failures are only logged.
            if let Err(e) = writer.shutdown().await {
                debug!(
                    target: "relay_lifecycle",
                    session_id = %self.id, %side,
                    "Stream shutdown reported: {}", e
                );
            }
        }

        // A read half still sitting here means perform() never claimed it.
        let reader = self.side_reader(side).lock().unwrap().take();
        drop(reader);

        let tls = self.tls_slot(side).lock().unwrap().take();
        if let Some(tls) = tls {
            drop(tls);
            debug!(target: "relay_lifecycle", session_id = %self.id, %side, "TLS state released");
        }
    }

    fn side_writer(&self, side: Side) -> &TokioMutex<Option<Writer>> {
        match side {
            Side::Client => &self.client_writer,
            Side::Remote => &self.remote_writer,
        }
    }

    fn side_reader(&self, side: Side) -> &Mutex<Option<Reader>> {
        match side {
            Side::Client => &self.client_reader,
            Side::Remote => &self.remote_reader,
        }
    }

    fn tls_slot(&self, side: Side) -> &Mutex<Option<Box<dyn Any + Send>>> {
        match side {
            Side::Client => &self.client_tls,
            Side::Remote => &self.remote_tls,
        }
    }

    // The upload copier reads the client and feeds the remote; download is
    // the mirror image.
    fn sink_writer(&self, direction: Direction) -> &TokioMutex<Option<Writer>> {
        match direction {
            Direction::Upload => &self.remote_writer,
            Direction::Download => &self.client_writer,
        }
    }

    fn counter_slot(&self, direction: Direction) -> &Mutex<Option<i64>> {
        match direction {
            Direction::Upload => &self.uploaded,
            Direction::Download => &self.downloaded,
        }
    }

    fn stats_slot(&self, direction: Direction) -> &Mutex<TransferStats> {
        match direction {
            Direction::Upload => &self.upload_stats,
            Direction::Download => &self.download_stats,
        }
    }

    fn extra_offset(&self, direction: Direction) -> i64 {
        match direction {
            Direction::Upload => self.config.extra_uploaded_bytes,
            Direction::Download => self.config.extra_downloaded_bytes,
        }
    }

    async fn forward_chunk(&self, direction: Direction, chunk: &[u8]) -> ForwardOutcome {
        let mut guard = self.sink_writer(direction).lock().await;
        let Some(writer) = guard.as_mut() else {
            return ForwardOutcome::Withdrawn;
        };
        if let Err(e) = writer.write_all(chunk).await {
            return ForwardOutcome::Failed(e);
        }
        if let Err(e) = writer.flush().await {
            return ForwardOutcome::Failed(e);
        }
        ForwardOutcome::Sent
    }

    fn record_progress(&self, direction: Direction, bytes: u64) {
        let mut stats = self.stats_slot(direction).lock().unwrap();
        stats.bytes += bytes;
        stats.chunks += 1;
    }

    fn record_error(&self, direction: Direction, message: &str) {
        let mut stats = self.stats_slot(direction).lock().unwrap();
        stats.last_error = Some(message.to_string());
    }

    // Set-once: a published total is never overwritten.
    fn publish_total(&self, direction: Direction, total: u64) {
        let mut slot = self.counter_slot(direction).lock().unwrap();
        if slot.is_none() {
            *slot = Some(total as i64 + self.extra_offset(direction));
        }
    }

    fn try_fire_completion(&self) {
        let uploaded = self.uploaded_bytes();
        let downloaded = self.downloaded_bytes();
        if !self
            .config
            .completion_policy
            .is_satisfied(uploaded.is_some(), downloaded.is_some())
        {
            return;
        }
        let callback = self.on_complete.lock().unwrap().take();
        if let Some(callback) = callback {
            debug!(
                target: "relay_lifecycle",
                session_id = %self.id,
                "Completion policy satisfied, invoking callback"
            );
            callback(uploaded.unwrap_or(0), downloaded.unwrap_or(0));
        }
    }

    fn workers_finished(&self) -> bool {
        self.tasks.lock().unwrap().iter().all(|t| t.is_finished())
    }
}

/// Directional pump: reads from `reader` and feeds the opposite side's write
/// half until the stream is effectively closed, the liveness window expires
/// or an unrecoverable error hits. Publishes its final byte count on exit.
async fn run_copier(session: Arc<TransportSession>, direction: Direction, mut reader: Reader) {
    let config = session.config.clone();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut total: u64 = 0;
    let mut cycles: u32 = 0;

    loop {
        buf.clear();
        let mut last_error: Option<io::Error> = None;
        let mut last_chunk: usize = 0;

        match timeout(config.read_timeout, reader.read_buf(&mut buf)).await {
            Err(_) => {
                last_error = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "read attempt timed out",
                ));
            }
            Ok(Err(e)) => {
                if !is_timeout_error(&e) && indicates_closed(&e) {
                    cycles += 1;
                }
                last_error = Some(e);
            }
            Ok(Ok(0)) => {
                // Empty read with no error counts as a probably-closed cycle.
                cycles += 1;
            }
            Ok(Ok(n)) => match session.forward_chunk(direction, &buf[..n]).await {
                ForwardOutcome::Sent => {
                    last_chunk = n;
                    total += n as u64;
                    cycles = 0;
                    session.last_alive.touch();
                    session.record_progress(direction, n as u64);
                }
                ForwardOutcome::Withdrawn => {
                    debug!(
                        target: "relay_flow",
                        session_id = %session.id, %direction,
                        "Write half withdrawn, stopping"
                    );
                    session.record_error(direction, "write half withdrawn during teardown");
                    break;
                }
                ForwardOutcome::Failed(e) => {
                    if !is_timeout_error(&e) && indicates_closed(&e) {
                        cycles += 1;
                    }
                    last_error = Some(e);
                }
            },
        }

        // Stop checks, in order: liveness first, then close detection, then
        // the per-error retry policy.
        if session.last_alive.last().is_none() {
            session.record_error(direction, "liveness clock was never initialized");
            break;
        }
        if session.last_alive.expired(config.alive_interval) {
            debug!(
                target: "relay_flow",
                session_id = %session.id, %direction,
                "Idle timeout exceeded, stopping"
            );
            session.record_error(direction, "idle timeout exceeded");
            break;
        }

        let observation = CloseObservation {
            last_error: last_error.as_ref(),
            last_chunk,
            cycles,
        };
        if is_effectively_closed(&observation, config.max_closed_cycles) {
            debug!(
                target: "relay_flow",
                session_id = %session.id, %direction,
                "Stream effectively closed after {} cycles", cycles
            );
            if let Some(e) = &last_error {
                session.record_error(direction, &e.to_string());
            }
            break;
        }

        if let Some(err) = &last_error {
            if is_timeout_error(err) {
                // Timeouts retry indefinitely as long as liveness is fresh.
                sleep(config.retry_backoff).await;
                continue;
            }
            if indicates_closed(err) && last_chunk == 0 {
                // Not yet a sustained run; keep watching.
                session.record_error(direction, &err.to_string());
                sleep(config.retry_backoff).await;
                continue;
            }
            warn!(
                target: "relay_flow",
                session_id = %session.id, %direction,
                "Unrecoverable copy error: {}", err
            );
            session.record_error(direction, &err.to_string());
            break;
        }

        if last_chunk == 0 {
            // Empty read; pace the next attempt.
            sleep(config.retry_backoff).await;
        }
    }

    session.publish_total(direction, total);
    debug!(
        target: "relay_flow",
        session_id = %session.id, %direction, bytes = total,
        "Copy loop exited"
    );
}

/// Keep-alive loop for the pre-traffic idle phase. Stops permanently once
/// either direction has published a final count, or on the first probe
/// failure.
async fn run_heartbeat(session: Arc<TransportSession>) {
    let probe = session.on_heartbeat.lock().unwrap().clone();
    let Some(probe) = probe else {
        return;
    };

    loop {
        if session.uploaded_bytes().is_some() || session.downloaded_bytes().is_some() {
            debug!(
                target: "relay_flow",
                session_id = %session.id,
                "Traffic observed, heartbeat stopped"
            );
            break;
        }
        match probe().await {
            Ok(()) => session.last_alive.touch(),
            Err(e) => {
                warn!(
                    target: "relay_flow",
                    session_id = %session.id,
                    "Heartbeat probe failed, stopping: {}", e
                );
                break;
            }
        }
        sleep(session.config.heartbeat_interval).await;
    }
}

/// Completion tracking plus resource reaping. Fires the completion callback
/// as soon as the policy is satisfied, but releases streams and TLS state
/// only after every worker task has observably terminated.
async fn run_supervisor(session: Arc<TransportSession>) {
    loop {
        session.try_fire_completion();
        if session.workers_finished() {
            break;
        }
        sleep(session.config.poll_interval).await;
    }

    // A copier may have published between the last poll and its exit.
    session.try_fire_completion();
    session.cleanup().await;
    session.reaped.store(true, Ordering::Release);

    info!(
        target: "relay_lifecycle",
        session_id = %session.id,
        uploaded = ?session.uploaded_bytes(),
        downloaded = ?session.downloaded_bytes(),
        "Session finished"
    );
}
