// Websocket server and main event loop for the relay.
//
// Architecture: thread-per-connection with a central `mpsc` channel.
//
// - **Listener thread** (non-blocking `TcpListener::accept()` loop): assigns
//   each new TCP connection a `ConnectionId` and spawns a connection thread.
// - **Connection threads** (one per peer): perform the websocket handshake,
//   then alternate between writing whatever the session queued in the
//   connection's outbox and reading with a short timeout. Text frames are
//   decoded into `Envelope`s here, at the transport boundary, and sent to
//   the main thread. A malformed frame is logged and skipped; the connection
//   stays open. On close or error the thread sends `Disconnected` last.
// - **Broadcaster** and **upstream forwarder** threads only post events
//   (`BroadcastTick`, `Upstream`).
// - **Main thread**: owns the `Session` and handles one event at a time.
//   This is the only place relay state is touched, so a ready report, a
//   close and a broadcaster tick can never interleave.
//
// Each socket is read and written by its own connection thread only. The
// session never blocks on a peer: it pushes serialized frames into the
// outbox channel and moves on.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`; every thread polls it
// within its read or sleep interval and exits.

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use sphero_relay_protocol::{ClientId, ConnectionId, Envelope};
use tracing::{debug, info, warn};
use tungstenite::{Message, WebSocket};

use crate::broadcaster::{self, Stimulus};
use crate::config::RelayConfig;
use crate::dispatch::dispatch;
use crate::error::RelayError;
use crate::router::Outbox;
use crate::session::Session;
use crate::transport::{PUMP_INTERVAL, flush_outbox, is_timeout};
use crate::upstream::{self, UpstreamState};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const EVENT_POLL: Duration = Duration::from_millis(100);

/// Events sent from the other threads to the main thread.
enum InternalEvent {
    Connected {
        connection: ConnectionId,
        outbox: Outbox,
    },
    Inbound {
        connection: ConnectionId,
        envelope: Envelope,
    },
    Disconnected {
        connection: ConnectionId,
    },
    BroadcastTick,
    Upstream(UpstreamState),
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the relay exits on its own.
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if self.thread.take().is_some_and(|handle| handle.join().is_err()) {
            warn!("relay thread panicked");
        }
    }
}

/// Start the relay on a background thread. Returns a handle for stopping it
/// and the actual bound address (useful when port 0 is used to let the OS
/// pick a free port).
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr), RelayError> {
    let listener = TcpListener::bind((config.bind_address.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    info!("relay listening on {addr}");

    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_relay = keep_running.clone();
    let thread = thread::spawn(move || {
        run_relay(listener, config, keep_running_relay);
    });

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main relay loop. Runs until `keep_running` is cleared.
fn run_relay(listener: TcpListener, config: RelayConfig, keep_running: Arc<AtomicBool>) {
    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    let mut session = Session::new(
        ClientId::new(config.decision_process_id.clone()),
        Stimulus::from(&config.broadcast),
    );

    if let Some(url) = config.upstream.url.clone() {
        let (frames_tx, frames_rx) = mpsc::channel();
        session = session.with_upstream(frames_tx);
        let tx_upstream = tx.clone();
        upstream::spawn_forwarder(
            url,
            config.upstream.reconnect_delay(),
            frames_rx,
            keep_running.clone(),
            move |state| tx_upstream.send(InternalEvent::Upstream(state)).is_ok(),
        );
    } else {
        info!("no upstream configured; camera frames will be dropped");
    }

    if config.broadcast.enabled && config.broadcast.interval_ms > 0 {
        let tx_ticker = tx.clone();
        broadcaster::spawn_ticker(config.broadcast.interval(), keep_running.clone(), move || {
            tx_ticker.send(InternalEvent::BroadcastTick).is_ok()
        });
    }

    let tx_listener = tx.clone();
    let keep_running_listener = keep_running.clone();
    thread::spawn(move || {
        accept_loop(listener, tx_listener, keep_running_listener);
    });
    drop(tx);

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(EVENT_POLL) {
            Ok(event) => handle_event(&mut session, event),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("relay stopped");
}

fn handle_event(session: &mut Session, event: InternalEvent) {
    match event {
        InternalEvent::Connected { connection, outbox } => {
            session.attach_connection(connection, outbox);
        }
        InternalEvent::Inbound {
            connection,
            envelope,
        } => dispatch(session, connection, envelope),
        InternalEvent::Disconnected { connection } => session.close_connection(connection),
        InternalEvent::BroadcastTick => {
            session.broadcast_stimulus();
        }
        InternalEvent::Upstream(state) => {
            session.set_upstream_open(state == UpstreamState::Connected);
        }
    }
}

fn accept_loop(listener: TcpListener, events: Sender<InternalEvent>, keep_running: Arc<AtomicBool>) {
    let mut next_connection = 1;
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let connection = ConnectionId(next_connection);
                next_connection += 1;
                debug!("{connection} from {peer}");

                let events = events.clone();
                let keep_running = keep_running.clone();
                thread::spawn(move || {
                    connection_loop(stream, connection, events, keep_running);
                });
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("accept failed: {e}; listener stopping");
                break;
            }
        }
    }
}

/// Handshake, then pump frames both ways until the peer goes away.
fn connection_loop(
    stream: TcpStream,
    connection: ConnectionId,
    events: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    if let Err(e) = prepare_stream(&stream, HANDSHAKE_TIMEOUT) {
        warn!("{connection}: cannot configure socket: {e}");
        return;
    }
    let mut ws = match tungstenite::accept(stream) {
        Ok(ws) => ws,
        Err(e) => {
            warn!("{connection}: websocket handshake failed: {e}");
            return;
        }
    };
    if let Err(e) = ws.get_ref().set_read_timeout(Some(PUMP_INTERVAL)) {
        warn!("{connection}: cannot configure socket: {e}");
        return;
    }

    let (outbox, outgoing) = mpsc::channel();
    if events
        .send(InternalEvent::Connected { connection, outbox })
        .is_err()
    {
        return;
    }

    match pump_connection(&mut ws, connection, &outgoing, &events, &keep_running) {
        Ok(()) => debug!("{connection} finished"),
        Err(e) => debug!("{connection} dropped: {e}"),
    }
    let _ = events.send(InternalEvent::Disconnected { connection });
}

fn prepare_stream(stream: &TcpStream, read_timeout: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(read_timeout))
}

fn pump_connection(
    ws: &mut WebSocket<TcpStream>,
    connection: ConnectionId,
    outgoing: &Receiver<String>,
    events: &Sender<InternalEvent>,
    keep_running: &AtomicBool,
) -> Result<(), RelayError> {
    while keep_running.load(Ordering::SeqCst) {
        flush_outbox(ws, outgoing)?;

        match ws.read() {
            Ok(Message::Text(text)) => match Envelope::from_json(text.as_str()) {
                Ok(envelope) => {
                    let event = InternalEvent::Inbound {
                        connection,
                        envelope,
                    };
                    if events.send(event).is_err() {
                        return Err(RelayError::Closed);
                    }
                }
                Err(e) => warn!("{connection} sent a malformed frame: {e}"),
            },
            Ok(Message::Binary(data)) => {
                debug!("{connection} sent {} binary bytes; ignoring", data.len());
            }
            Ok(Message::Close(_)) => {
                // Let tungstenite answer the close handshake.
                let _ = ws.flush();
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(tungstenite::Error::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }

    let _ = ws.close(None);
    let _ = ws.flush();
    Ok(())
}
