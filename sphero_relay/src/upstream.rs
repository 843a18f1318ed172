// Camera frame forwarder to the processing server.
//
// One thread owns the outbound websocket to the configured upstream URL
// (the face recognition or scan server). The session hands it raw image
// bytes over an `mpsc` channel; the thread writes each one as a binary
// frame. Replies from upstream are read only to notice a close.
//
// Link state is reported through the `on_state` callback, which the server
// turns into events for the main loop. The session only queues frames while
// it believes the link is up, so frames are dropped, never buffered, while
// the processing server is away. Frames queued for a link that has since
// dropped are discarded, both when the drop is noticed and again once the
// next link is up, so the new link only ever carries frames sent after it
// was reported open.
//
// A failed connect or a dropped link is retried after `reconnect_delay`
// until shutdown.

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::error::RelayError;
use crate::transport::{PUMP_INTERVAL, is_timeout, set_client_read_timeout, sleep_while_running};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamState {
    Connected,
    Disconnected,
}

/// Spawn the forwarder thread. It exits on shutdown, when the frame
/// channel closes, or when `on_state` returns false.
pub fn spawn_forwarder<F>(
    url: String,
    reconnect_delay: Duration,
    frames: Receiver<Vec<u8>>,
    keep_running: Arc<AtomicBool>,
    mut on_state: F,
) -> thread::JoinHandle<()>
where
    F: FnMut(UpstreamState) -> bool + Send + 'static,
{
    thread::spawn(move || {
        while keep_running.load(Ordering::SeqCst) {
            match connect(&url) {
                Ok(mut ws) => {
                    info!("connected to upstream {url}");
                    // The session may have queued more frames between the
                    // old link dropping and hearing about it.
                    discard_stale(&frames);
                    if !on_state(UpstreamState::Connected) {
                        break;
                    }
                    let result = pump(&mut ws, &frames, &keep_running);
                    let _ = ws.close(None);
                    let _ = ws.flush();
                    if !on_state(UpstreamState::Disconnected) {
                        break;
                    }
                    match result {
                        Ok(()) => info!("upstream {url} closed"),
                        Err(RelayError::Closed) => break,
                        Err(e) => warn!("upstream {url} dropped: {e}"),
                    }
                    discard_stale(&frames);
                }
                Err(e) => {
                    warn!(
                        "cannot reach upstream {url}: {e}; retrying in {}ms",
                        reconnect_delay.as_millis()
                    );
                }
            }
            if !sleep_while_running(reconnect_delay, &keep_running) {
                break;
            }
        }
    })
}

fn discard_stale(frames: &Receiver<Vec<u8>>) {
    let stale = frames.try_iter().count();
    if stale > 0 {
        debug!("discarded {stale} frames queued for the old link");
    }
}

fn connect(url: &str) -> Result<WebSocket<MaybeTlsStream<TcpStream>>, RelayError> {
    let (ws, _response) = tungstenite::connect(url)?;
    set_client_read_timeout(&ws, PUMP_INTERVAL)?;
    Ok(ws)
}

/// Forward queued frames until the link drops. `Ok` means a clean close
/// from upstream or shutdown; `Closed` means the session side has gone.
fn pump(
    ws: &mut WebSocket<MaybeTlsStream<TcpStream>>,
    frames: &Receiver<Vec<u8>>,
    keep_running: &AtomicBool,
) -> Result<(), RelayError> {
    while keep_running.load(Ordering::SeqCst) {
        loop {
            match frames.try_recv() {
                Ok(frame) => ws.send(Message::binary(frame))?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(RelayError::Closed),
            }
        }

        match ws.read() {
            Ok(Message::Close(_)) => return Ok(()),
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(tungstenite::Error::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
