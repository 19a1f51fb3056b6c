//! Per-connection harness: one reader, one writer, one supervisor.
//!
//! The reader frames inbound bytes into lines and posts them to the global
//! event queue. The writer drains the session's bounded output queue onto
//! the socket under a write deadline. The supervisor owns stop fan-out:
//! any party (QUIT handler, reader EOF, writer failure, queue overflow)
//! fires the capacity-3 signal queue, the supervisor flips the watch
//! channel both halves select on, waits for them, and posts exactly one
//! `Disconnected` event so teardown runs on the dispatcher.

use std::time::Duration;

use futures::SinkExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use super::codec::LineCodec;
use super::state::{ConnId, SessionHandle};

/// Output queue capacity; a client this far behind is dropped.
pub const OUTPUT_QUEUE_CAPACITY: usize = 100;

/// Stop-signal queue capacity; producers never block on it.
const SIGNAL_QUEUE_CAPACITY: usize = 3;

/// Per-line write deadline.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// One entry on the global event queue.
#[derive(Debug)]
pub enum Event {
    /// A connection was accepted; the dispatcher should start tracking it.
    Connected { id: ConnId, handle: SessionHandle },
    /// One complete inbound line from a connection.
    Command { id: ConnId, line: String },
    /// The connection's harness has fully wound down.
    Disconnected { id: ConnId },
}

/// Start the harness for one accepted socket. Posts `Connected` before any
/// `Command`, and `Disconnected` exactly once after both halves stop.
pub fn spawn(socket: TcpStream, id: ConnId, events: mpsc::UnboundedSender<Event>) {
    let (line_tx, line_rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
    let (stop_tx, stop_rx) = watch::channel(false);

    let handle = SessionHandle {
        lines: line_tx,
        stop: signal_tx.clone(),
    };
    if events.send(Event::Connected { id, handle }).is_err() {
        return;
    }

    let (read_half, write_half) = socket.into_split();
    let reader = tokio::spawn(read_loop(
        id,
        read_half,
        events.clone(),
        signal_tx.clone(),
        stop_rx.clone(),
    ));
    let writer = tokio::spawn(write_loop(id, write_half, line_rx, signal_tx, stop_rx));

    tokio::spawn(supervise(id, signal_rx, stop_tx, reader, writer, events));
}

/// Wait for the first stop signal, fan it out, reap both halves, and
/// report the disconnect to the dispatcher.
async fn supervise(
    id: ConnId,
    mut signals: mpsc::Receiver<()>,
    stop: watch::Sender<bool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    events: mpsc::UnboundedSender<Event>,
) {
    let _ = signals.recv().await;
    let _ = stop.send(true);
    let _ = reader.await;
    let _ = writer.await;
    let _ = events.send(Event::Disconnected { id });
}

async fn read_loop(
    id: ConnId,
    read_half: OwnedReadHalf,
    events: mpsc::UnboundedSender<Event>,
    signals: mpsc::Sender<()>,
    mut stop: watch::Receiver<bool>,
) {
    let mut lines = FramedRead::new(read_half, LineCodec);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            frame = lines.next() => match frame {
                Some(Ok(line)) => {
                    if events.send(Event::Command { id, line }).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(id, "read error: {e}");
                    let _ = signals.try_send(());
                    break;
                }
                None => {
                    // EOF: the client hung up.
                    let _ = signals.try_send(());
                    break;
                }
            },
        }
    }
}

async fn write_loop(
    id: ConnId,
    write_half: OwnedWriteHalf,
    mut lines: mpsc::Receiver<String>,
    signals: mpsc::Sender<()>,
    mut stop: watch::Receiver<bool>,
) {
    let mut sink = FramedWrite::new(write_half, LineCodec);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            line = lines.recv() => {
                let Some(line) = line else { break };
                match time::timeout(WRITE_TIMEOUT, sink.send(line)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(id, "write error: {e}");
                        let _ = signals.try_send(());
                        break;
                    }
                    Err(_) => {
                        debug!(id, "write deadline exceeded");
                        let _ = signals.try_send(());
                        break;
                    }
                }
            }
        }
    }
}
