//! Stream adapter: bridges one watch subscription to one long-lived client
//! connection.
//!
//! The loop is a genuine multi-way blocking wait over cancellation, the
//! event channel and the subscription deadline; nothing polls. A send
//! failure (client gone mid-stream) stops the loop and releases the
//! subscription immediately and is never retried: the client is expected to
//! reconnect and reissue its watch.

use crate::watch::{StreamSignal, TerminateReason, WatchEvent, WatchHandle};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::io::{self, Write};
use std::time::Instant;
use tracing::{debug, warn};

/// Where serialized events go. Implementations own serialization; the
/// adapter only sequences and terminates.
pub trait EventSink {
    fn send(&mut self, event: &WatchEvent) -> io::Result<()>;
}

/// One JSON object per line, flushed per event so long-poll clients see
/// data as it happens.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn send(&mut self, event: &WatchEvent) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Caller side of a cancellation pair. Calling [`cancel`](Self::cancel) or
/// dropping the handle unblocks the stream loop.
pub struct CancelHandle {
    sender: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(self) {
        let _ = self.sender.try_send(());
    }
}

/// Stream side of a cancellation pair.
pub struct CancelToken {
    receiver: Receiver<()>,
}

/// Create a linked cancellation pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (sender, receiver) = bounded(1);
    (CancelHandle { sender }, CancelToken { receiver })
}

/// How a stream loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The caller's context was cancelled.
    Cancelled,
    /// The engine ended the stream (timeout, max events, overflow).
    Terminated(TerminateReason),
    /// The client connection failed mid-send.
    SinkClosed,
}

enum Wake {
    Cancelled,
    Deadline,
    Signal(StreamSignal),
}

/// Drive one subscription into one sink until either side ends it.
///
/// Consumes the handle; the subscription is released before returning no
/// matter how the loop ends.
pub fn stream_events<S: EventSink>(
    mut handle: WatchHandle,
    cancel: &CancelToken,
    sink: &mut S,
) -> StreamOutcome {
    let events = handle.receiver().clone();
    let cancelled = cancel.receiver.clone();

    loop {
        let wake = match handle.deadline() {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                select! {
                    recv(cancelled) -> _ => Wake::Cancelled,
                    recv(events) -> msg => match msg {
                        Ok(signal) => Wake::Signal(signal),
                        Err(_) => Wake::Signal(StreamSignal::Terminate(TerminateReason::Closed)),
                    },
                    default(remaining) => Wake::Deadline,
                }
            }
            None => select! {
                recv(cancelled) -> _ => Wake::Cancelled,
                recv(events) -> msg => match msg {
                    Ok(signal) => Wake::Signal(signal),
                    Err(_) => Wake::Signal(StreamSignal::Terminate(TerminateReason::Closed)),
                },
            },
        };

        match wake {
            Wake::Cancelled => {
                debug!(table = handle.table(), "stream cancelled by caller");
                handle.cancel();
                return StreamOutcome::Cancelled;
            }
            Wake::Deadline => {
                handle.cancel();
                return StreamOutcome::Terminated(TerminateReason::Timeout);
            }
            Wake::Signal(StreamSignal::Terminate(reason)) => {
                handle.cancel();
                return StreamOutcome::Terminated(reason);
            }
            Wake::Signal(StreamSignal::Data(event)) => {
                if let Err(e) = sink.send(&event) {
                    warn!(table = handle.table(), error = %e, "sink failed, releasing stream");
                    handle.cancel();
                    return StreamOutcome::SinkClosed;
                }
            }
        }
    }
}
