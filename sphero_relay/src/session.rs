// Relay state and domain handlers.
//
// `Session` is the central data structure that `server.rs` drives. It owns
// the `Registry` (who is reachable under which id), the `Router` (one
// outbox per open connection) and the `ReadinessCoordinator` (the roster
// and its barrier). All mutation happens through methods called from the
// server's single-threaded main loop, one event at a time: inbound
// messages, connection closes, broadcaster ticks and upstream state changes
// never interleave, and there is no internal locking.
//
// Key responsibilities:
// - Connection lifecycle: attach an outbox when a socket opens; on close,
//   detach it and drop every id it was backing.
// - Sphero traffic: roster announcements, ready reports (with the one-shot
//   barrier notification), feedback to the decision process, control
//   commands to individual units.
// - Camera pipeline: forward decoded frames upstream while the upstream
//   link is open, relay face data to actuators, and send Begin/End run
//   signals as the link comes and goes.
// - Periodic stimulus to every registered unit.
//
// Nothing here returns an error to a peer. Failed deliveries are logged in
// the router and surface only as a `Delivery` value for callers and tests.

use std::sync::mpsc::Sender;

use serde_json::Value;
use sphero_relay_protocol::message::{
    CONTROL_CHANNEL, FEEDBACK_REPORT, READY_REPORT, ROSTER_ANNOUNCEMENT, RUN_CHANNEL,
};
use sphero_relay_protocol::{
    ClientId, ClientRole, ConnectionId, ControlKind, OutboundEnvelope, UnitDescriptor,
};
use tracing::{debug, info, warn};

use crate::broadcaster::Stimulus;
use crate::readiness::{ReadinessCoordinator, ReadyOutcome};
use crate::registry::Registry;
use crate::router::{Delivery, Outbox, Router};

/// Run-channel payloads for the camera pipeline.
pub const PIPELINE_BEGIN: &str = "Begin";
pub const PIPELINE_END: &str = "End";

/// Relay state for one process lifetime.
pub struct Session {
    registry: Registry,
    router: Router,
    readiness: ReadinessCoordinator,

    // The id notifications for the decision process go to. Starts as the
    // configured default and follows whatever id the process last
    // registered under.
    default_decision_process: ClientId,
    decision_process: ClientId,

    stimulus: Stimulus,

    // Camera frames go here while the upstream link is up.
    upstream: Option<Sender<Vec<u8>>>,
    upstream_open: bool,
}

impl Session {
    pub fn new(decision_process_id: ClientId, stimulus: Stimulus) -> Self {
        Self {
            registry: Registry::new(),
            router: Router::new(),
            readiness: ReadinessCoordinator::new(),
            default_decision_process: decision_process_id.clone(),
            decision_process: decision_process_id,
            stimulus,
            upstream: None,
            upstream_open: false,
        }
    }

    /// Hand camera frames to an upstream forwarder. Frames are only sent
    /// while `set_upstream_open(true)` is in effect.
    pub fn with_upstream(mut self, frames: Sender<Vec<u8>>) -> Self {
        self.upstream = Some(frames);
        self
    }

    pub fn attach_connection(&mut self, connection: ConnectionId, outbox: Outbox) {
        self.router.attach(connection, outbox);
        debug!("{connection} opened");
    }

    /// Tear down a closed connection. Safe to call more than once.
    pub fn close_connection(&mut self, connection: ConnectionId) {
        let was_open = self.router.detach(connection);
        let removed = self.registry.remove_by_connection(connection);
        if removed.is_empty() {
            if was_open {
                info!("{connection} closed");
            }
        } else {
            let ids: Vec<&str> = removed.iter().map(ClientId::as_str).collect();
            info!("{connection} closed; removed {}", ids.join(", "));
        }
    }

    /// A controller (or a unit speaking for itself) announced its roster.
    /// Every listed unit becomes addressable through `connection`, the
    /// readiness barrier starts over, and a connected decision process is
    /// told about the new roster.
    pub fn announce_roster(&mut self, connection: ConnectionId, units: Vec<UnitDescriptor>) {
        for unit in &units {
            self.register(unit.id.clone(), ClientRole::Unit, connection);
        }
        let count = units.len();
        let generation = self.readiness.reset(units);
        info!("roster {generation} announced on {connection} with {count} units");

        if self.decision_process_connected() {
            self.send_roster_to_decision_process();
        }
    }

    /// The decision process introduced itself. If a roster already exists
    /// it is sent straight away.
    pub fn connect_decision_process(&mut self, connection: ConnectionId, id: Option<ClientId>) {
        let id = id.unwrap_or_else(|| self.default_decision_process.clone());
        self.register(id.clone(), ClientRole::DecisionProcess, connection);
        info!("decision process connected as {id} on {connection}");
        self.decision_process = id;

        if self.readiness.has_roster() {
            self.send_roster_to_decision_process();
        }
    }

    /// Register any other peer under a single identity. Peers that do not
    /// name themselves get `<clientType>#<connection>` so that several of
    /// the same kind can coexist.
    pub fn register_client(
        &mut self,
        connection: ConnectionId,
        role: ClientRole,
        id: Option<ClientId>,
    ) -> ClientId {
        let id = id.unwrap_or_else(|| ClientId(format!("{role}#{}", connection.0)));
        let joins_pipeline = role.is_camera_pipeline();
        info!("{role} connected as {id} on {connection}");
        self.register(id.clone(), role, connection);

        if joins_pipeline && self.upstream_open {
            self.signal_pipeline(PIPELINE_BEGIN);
        }
        id
    }

    /// Record a ready report. On the report that completes the roster the
    /// decision process gets exactly one "Ready" notification.
    pub fn mark_ready(&mut self, unit: &ClientId) -> ReadyOutcome {
        let outcome = self.readiness.mark_ready(unit);
        match outcome {
            ReadyOutcome::BarrierFired => {
                info!("all units ready; notifying {}", self.decision_process);
                self.notify_decision_process(READY_REPORT, Value::from("Ready"));
            }
            ReadyOutcome::Pending => debug!("{unit} ready"),
            ReadyOutcome::AlreadyFired => debug!("{unit} ready again; barrier already fired"),
            ReadyOutcome::UnknownUnit => {}
        }
        outcome
    }

    /// Pass a unit's feedback to the decision process. A report with no
    /// payload is forwarded as "Done".
    pub fn forward_feedback(&mut self, unit: &ClientId, message: Option<Value>) -> Delivery {
        let payload = message.unwrap_or_else(|| Value::from("Done"));
        let envelope = OutboundEnvelope::addressed(unit, FEEDBACK_REPORT, payload);
        self.router
            .send(&self.registry, &self.decision_process, &envelope)
    }

    /// Route a directive from the decision process to one unit.
    pub fn route_control(
        &mut self,
        unit: &ClientId,
        command: ControlKind,
        message: Value,
    ) -> Delivery {
        let envelope = OutboundEnvelope::addressed(unit, command.as_str(), message);
        self.router.send(&self.registry, unit, &envelope)
    }

    /// Forward a decoded camera frame upstream. Dropped silently while the
    /// upstream link is down.
    pub fn forward_image(&mut self, data: Vec<u8>) -> bool {
        match &self.upstream {
            Some(frames) if self.upstream_open => {
                let len = data.len();
                if frames.send(data).is_err() {
                    warn!("upstream forwarder has stopped; dropping frame");
                    return false;
                }
                debug!("forwarded {len} byte frame upstream");
                true
            }
            _ => false,
        }
    }

    /// Hand face detection output to every actuator board.
    pub fn relay_face_data(&mut self, data: Value) -> usize {
        let envelope = OutboundEnvelope::channel(CONTROL_CHANNEL, data);
        self.router.send_to_roles(
            &self.registry,
            |role| *role == ClientRole::Actuator,
            &envelope,
        )
    }

    /// Push the configured stimulus to every registered unit.
    pub fn broadcast_stimulus(&mut self) -> usize {
        let sent = self.router.broadcast_to_units(
            &self.registry,
            &self.stimulus.kind,
            &self.stimulus.payload,
        );
        debug!("stimulus {} sent to {sent} units", self.stimulus.kind);
        sent
    }

    /// Track the upstream link. Camera pipeline peers get Begin when it
    /// comes up and End when it drops.
    pub fn set_upstream_open(&mut self, open: bool) {
        if self.upstream_open == open {
            return;
        }
        self.upstream_open = open;
        if open {
            info!("upstream link up");
            self.signal_pipeline(PIPELINE_BEGIN);
        } else {
            info!("upstream link down");
            self.signal_pipeline(PIPELINE_END);
        }
    }

    pub fn log_peer_message(&self, role: &ClientRole, message: &Value) {
        match message {
            Value::String(text) => info!("message from {role}: {text}"),
            other => info!("message from {role}: {other}"),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn readiness(&self) -> &ReadinessCoordinator {
        &self.readiness
    }

    pub fn decision_process(&self) -> &ClientId {
        &self.decision_process
    }

    pub fn is_upstream_open(&self) -> bool {
        self.upstream_open
    }

    fn register(&mut self, id: ClientId, role: ClientRole, connection: ConnectionId) {
        let previous = self.registry.register(id.clone(), role, connection);
        if let Some(previous) = previous.filter(|p| p.connection != connection) {
            debug!("{id} moved from {} to {connection}", previous.connection);
        }
    }

    fn decision_process_connected(&self) -> bool {
        self.registry
            .lookup(&self.decision_process)
            .is_some_and(|entry| self.router.is_open(entry.connection))
    }

    fn send_roster_to_decision_process(&mut self) -> Delivery {
        match serde_json::to_value(self.readiness.units()) {
            Ok(units) => self.notify_decision_process(ROSTER_ANNOUNCEMENT, units),
            Err(e) => {
                warn!("failed to encode roster: {e}");
                Delivery::EncodeFailed
            }
        }
    }

    fn notify_decision_process(&mut self, kind: &str, payload: Value) -> Delivery {
        let envelope = OutboundEnvelope::addressed(&self.decision_process, kind, payload);
        self.router
            .send(&self.registry, &self.decision_process, &envelope)
    }

    fn signal_pipeline(&mut self, signal: &str) -> usize {
        let envelope = OutboundEnvelope::channel(RUN_CHANNEL, Value::from(signal));
        let sent = self.router.send_to_roles(
            &self.registry,
            ClientRole::is_camera_pipeline,
            &envelope,
        );
        info!("sent {signal} to {sent} pipeline clients");
        sent
    }
}
