use std::io;

use crate::error::indicates_closed;

/// What the last copy attempt looked like, as far as close detection cares.
pub(crate) struct CloseObservation<'a> {
    pub(crate) last_error: Option<&'a io::Error>,
    pub(crate) last_chunk: usize,
    pub(crate) cycles: u32,
}

/// Decide whether a stream should be treated as closed. Neither signal alone
/// is trustworthy: a single zero-byte read can be a legitimate empty write,
/// and a single "closed" error can race with a reconnect. A sustained run of
/// `max_cycles` observations is required before the stream is declared dead.
pub(crate) fn is_effectively_closed(obs: &CloseObservation<'_>, max_cycles: u32) -> bool {
    if obs.last_chunk != 0 {
        return false;
    }
    if obs.cycles < max_cycles {
        return false;
    }
    match obs.last_error {
        // Repeated empty reads with no error: a half-closed peer that
        // stopped sending without an explicit close.
        None => true,
        // Some transports report closure as a generic I/O error rather than
        // a typed EOF.
        Some(err) => indicates_closed(err),
    }
}
