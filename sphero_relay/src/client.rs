// Websocket client for talking to the relay.
//
// `PeerClient` speaks the peer side of the wire format: it can act as a
// Sphero controller, the decision process, a camera board, an actuator or a
// vision process, depending on the role it was opened with. Used by the
// integration tests and by any Rust tool that needs to poke a running relay.
//
// Architecture (same as the relay's connection threads, mirrored):
// - `connect()` performs the websocket handshake on the calling thread,
//   then spawns a pump thread that owns the socket.
// - Outgoing frames are serialized on the caller's thread and queued on an
//   `mpsc` channel; the pump writes them between short reads.
// - Incoming text frames are decoded as `OutboundEnvelope`s and pushed into
//   an inbox channel. `poll()` drains it without blocking.
//
// Dropping the client (or calling `close()`) flushes anything still queued,
// sends a websocket close and joins the pump.

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;
use sphero_relay_protocol::encode_image;
use sphero_relay_protocol::message::{
    BINARY_IMAGE, BRAIN_CONNECTION, CAMERA_START, FACE_DATA, FEEDBACK_REPORT, PEER_LOG,
    READY_REPORT, ROSTER_ANNOUNCEMENT,
};
use sphero_relay_protocol::{
    ClientId, ClientRole, ControlKind, InboundFrame, OutboundEnvelope, UnitDescriptor,
};
use tracing::{debug, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::error::RelayError;
use crate::transport::{PUMP_INTERVAL, flush_outbox, is_timeout, set_client_read_timeout};

pub struct PeerClient {
    role: ClientRole,
    outgoing: Sender<String>,
    inbox: Receiver<OutboundEnvelope>,
    keep_running: Arc<AtomicBool>,
    pump_thread: Option<JoinHandle<()>>,
}

impl PeerClient {
    /// Open a websocket to `url` and start the pump thread. Every frame
    /// this client sends declares `role` as its `clientType`.
    pub fn connect(url: &str, role: ClientRole) -> Result<Self, RelayError> {
        let (mut ws, _response) = tungstenite::connect(url)?;
        set_client_read_timeout(&ws, PUMP_INTERVAL)?;

        let (outgoing, queued) = mpsc::channel();
        let (inbox_tx, inbox) = mpsc::channel();
        let keep_running = Arc::new(AtomicBool::new(true));
        let keep_running_pump = keep_running.clone();
        let pump_thread = thread::spawn(move || {
            if let Err(e) = pump(&mut ws, &queued, &inbox_tx, &keep_running_pump) {
                debug!("client pump stopped: {e}");
            }
        });

        Ok(Self {
            role,
            outgoing,
            inbox,
            keep_running,
            pump_thread: Some(pump_thread),
        })
    }

    pub fn role(&self) -> &ClientRole {
        &self.role
    }

    pub fn send_frame(&self, frame: &InboundFrame) -> Result<(), RelayError> {
        self.send_raw(serde_json::to_string(frame)?)
    }

    /// Queue a text frame verbatim, well-formed or not.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.outgoing
            .send(text.into())
            .map_err(|_| RelayError::Closed)
    }

    /// Introduce this peer. The decision process uses `BrainConnection`;
    /// every other role uses the camera-style `start`.
    pub fn announce(&self, id: Option<&ClientId>) -> Result<(), RelayError> {
        let kind = if self.role == ClientRole::DecisionProcess {
            BRAIN_CONNECTION
        } else {
            CAMERA_START
        };
        let frame = match id {
            Some(id) => InboundFrame::typed(self.role.clone(), kind).with_id(id),
            None if self.role == ClientRole::DecisionProcess => {
                InboundFrame::typed(self.role.clone(), kind)
            }
            None => InboundFrame::untyped(self.role.clone(), kind),
        };
        self.send_frame(&frame)
    }

    pub fn announce_roster(&self, units: Vec<UnitDescriptor>) -> Result<(), RelayError> {
        self.send_frame(
            &InboundFrame::typed(self.role.clone(), ROSTER_ANNOUNCEMENT).with_units(units),
        )
    }

    pub fn report_ready(&self, unit: &ClientId) -> Result<(), RelayError> {
        self.send_frame(&InboundFrame::typed(self.role.clone(), READY_REPORT).with_id(unit))
    }

    pub fn report_feedback(
        &self,
        unit: &ClientId,
        message: Option<Value>,
    ) -> Result<(), RelayError> {
        let mut frame = InboundFrame::typed(self.role.clone(), FEEDBACK_REPORT).with_id(unit);
        if let Some(message) = message {
            frame = frame.with_message(message);
        }
        self.send_frame(&frame)
    }

    pub fn send_control(
        &self,
        unit: &ClientId,
        command: ControlKind,
        message: Value,
    ) -> Result<(), RelayError> {
        self.send_frame(
            &InboundFrame::typed(self.role.clone(), command.as_str())
                .with_id(unit)
                .with_message(message),
        )
    }

    /// Send a camera frame, base64-encoded as the camera boards do.
    pub fn send_image(&self, image: &[u8]) -> Result<(), RelayError> {
        self.send_frame(
            &InboundFrame::untyped(self.role.clone(), BINARY_IMAGE)
                .with_image(encode_image(image)),
        )
    }

    pub fn send_face_data(&self, data: Value) -> Result<(), RelayError> {
        self.send_frame(&InboundFrame::untyped(self.role.clone(), FACE_DATA).with_face_data(data))
    }

    pub fn log(&self, message: Value) -> Result<(), RelayError> {
        self.send_frame(&InboundFrame::untyped(self.role.clone(), PEER_LOG).with_message(message))
    }

    /// Drain all received messages (non-blocking).
    pub fn poll(&self) -> Vec<OutboundEnvelope> {
        self.inbox.try_iter().collect()
    }

    /// Wait up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<OutboundEnvelope> {
        self.inbox.recv_timeout(timeout).ok()
    }

    /// Wait up to `timeout` for a message matching `pred`, discarding the
    /// ones before it.
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut pred: impl FnMut(&OutboundEnvelope) -> bool,
    ) -> Option<OutboundEnvelope> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let message = self.inbox.recv_timeout(remaining).ok()?;
            if pred(&message) {
                return Some(message);
            }
        }
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if self.pump_thread.take().is_some_and(|handle| handle.join().is_err()) {
            warn!("client pump panicked");
        }
    }
}

impl Drop for PeerClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pump(
    ws: &mut WebSocket<MaybeTlsStream<TcpStream>>,
    queued: &Receiver<String>,
    inbox: &Sender<OutboundEnvelope>,
    keep_running: &AtomicBool,
) -> Result<(), RelayError> {
    while keep_running.load(Ordering::SeqCst) {
        flush_outbox(ws, queued)?;

        match ws.read() {
            Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                Ok(message) => {
                    // The owner may have stopped listening; keep pumping
                    // until told to stop.
                    let _ = inbox.send(message);
                }
                Err(e) => warn!("relay sent an unreadable frame: {e}"),
            },
            Ok(Message::Close(_)) => {
                let _ = ws.flush();
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(tungstenite::Error::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }

    flush_outbox(ws, queued)?;
    ws.close(None)?;
    let _ = ws.flush();
    Ok(())
}
