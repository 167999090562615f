// Tests for the close-detection policy and error classification
use std::io;

use crate::close::{is_effectively_closed, CloseObservation};
use crate::error::{indicates_closed, is_timeout_error};

fn observation(
    last_error: Option<&io::Error>,
    last_chunk: usize,
    cycles: u32,
) -> CloseObservation<'_> {
    CloseObservation {
        last_error,
        last_chunk,
        cycles,
    }
}

#[test]
fn empty_reads_below_threshold_keep_stream_open() {
    let obs = observation(None, 0, 9);
    assert!(!is_effectively_closed(&obs, 10));
}

#[test]
fn empty_reads_at_threshold_close_stream() {
    let obs = observation(None, 0, 10);
    assert!(is_effectively_closed(&obs, 10));
}

#[test]
fn nonzero_chunk_never_closes() {
    let obs = observation(None, 1, 100);
    assert!(!is_effectively_closed(&obs, 10));
}

#[test]
fn closed_class_error_needs_sustained_run() {
    let err = io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe");
    assert!(!is_effectively_closed(&observation(Some(&err), 0, 9), 10));
    assert!(is_effectively_closed(&observation(Some(&err), 0, 10), 10));
}

#[test]
fn closed_message_on_generic_error_counts_as_closed() {
    let err = io::Error::new(io::ErrorKind::Other, "stream closed by peer");
    assert!(is_effectively_closed(&observation(Some(&err), 0, 10), 10));
}

#[test]
fn unrelated_error_does_not_close() {
    let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
    assert!(!is_effectively_closed(&observation(Some(&err), 0, 10), 10));
}

#[test]
fn timeout_classification() {
    assert!(is_timeout_error(&io::Error::new(
        io::ErrorKind::TimedOut,
        "timed out"
    )));
    assert!(is_timeout_error(&io::Error::new(
        io::ErrorKind::WouldBlock,
        "would block"
    )));
    assert!(!is_timeout_error(&io::Error::new(
        io::ErrorKind::BrokenPipe,
        "broken pipe"
    )));
}

#[test]
fn closed_classification() {
    for kind in [
        io::ErrorKind::UnexpectedEof,
        io::ErrorKind::ConnectionReset,
        io::ErrorKind::ConnectionAborted,
        io::ErrorKind::BrokenPipe,
        io::ErrorKind::NotConnected,
    ] {
        assert!(indicates_closed(&io::Error::new(kind, "boom")), "{kind:?}");
    }
    assert!(indicates_closed(&io::Error::new(
        io::ErrorKind::Other,
        "connection Closed"
    )));
    assert!(!indicates_closed(&io::Error::new(
        io::ErrorKind::Other,
        "something else"
    )));
}
