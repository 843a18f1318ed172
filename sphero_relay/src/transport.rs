// Socket and timing plumbing shared by every thread that owns a websocket.
//
// The relay's connection threads, the upstream forwarder and `PeerClient`
// all run the same pump: write whatever is queued, then read with a short
// timeout so the thread keeps noticing new outbound frames and shutdown.
// The helpers here are that common ground. Background threads that sleep
// (the broadcaster, the forwarder's reconnect delay) sleep in short slices
// through `sleep_while_running` so `keep_running` is honoured promptly.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::error::RelayError;

/// Read timeout on established sockets. Bounds both outbound latency and
/// how quickly a pump thread notices shutdown.
pub(crate) const PUMP_INTERVAL: Duration = Duration::from_millis(20);

// Upper bound on how long a sleeping thread takes to notice shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(25);

/// Write everything queued for this socket.
pub(crate) fn flush_outbox<S: Read + Write>(
    ws: &mut WebSocket<S>,
    outgoing: &Receiver<String>,
) -> Result<(), RelayError> {
    while let Ok(text) = outgoing.try_recv() {
        ws.send(Message::text(text))?;
    }
    Ok(())
}

/// A read that hit the socket timeout rather than a real failure.
pub(crate) fn is_timeout(e: &tungstenite::Error) -> bool {
    matches!(
        e,
        tungstenite::Error::Io(io) if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
    )
}

/// Read timeout for a client-side socket opened with `tungstenite::connect`.
pub(crate) fn set_client_read_timeout(
    ws: &WebSocket<MaybeTlsStream<TcpStream>>,
    timeout: Duration,
) -> io::Result<()> {
    match ws.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
        _ => Ok(()),
    }
}

/// Sleep for `duration` in short slices. Returns false if shutdown was
/// requested in the meantime.
pub(crate) fn sleep_while_running(duration: Duration, keep_running: &AtomicBool) -> bool {
    sleep_until(Instant::now() + duration, keep_running)
}

/// Sleep until `deadline`; false if shutdown came first.
pub(crate) fn sleep_until(deadline: Instant, keep_running: &AtomicBool) -> bool {
    loop {
        if !keep_running.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
