// Outbound delivery by logical id.
//
// The router owns one outbox per open connection: the sending half of an
// `mpsc` channel whose receiver is drained by that connection's thread in
// `server.rs`. A connection is "open" exactly while its outbox is attached
// and its thread is still receiving.
//
// Delivery is fire-and-forget and at most once. A send to an id that is not
// registered, or whose connection has gone away, is logged and reported as
// a `Delivery` value; it is never an error for whoever triggered it, and
// it never touches the registry. Nothing is queued for later.
//
// The one thing a failed send does change is the router's own bookkeeping:
// an outbox whose receiver is gone is dropped from `outboxes`, so later
// sends to the same connection fail fast. Registry entries are removed
// only when the connection's `Disconnected` event reaches
// `Session::close_connection`, never from here.

use std::collections::BTreeMap;
use std::sync::mpsc::Sender;

use serde_json::Value;
use sphero_relay_protocol::{ClientId, ClientRole, ConnectionId, OutboundEnvelope};
use tracing::{debug, warn};

use crate::registry::Registry;

/// Sending half of a connection's outbound queue. Each item is one text
/// frame.
pub type Outbox = Sender<String>;

/// What happened to one outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No registry entry for the target id.
    UnknownTarget,
    /// The target's connection is closed or closing.
    ConnectionClosed,
    EncodeFailed,
}

#[derive(Debug, Default)]
pub struct Router {
    outboxes: BTreeMap<ConnectionId, Outbox>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, connection: ConnectionId, outbox: Outbox) {
        self.outboxes.insert(connection, outbox);
    }

    /// Forget a connection's outbox. Returns false if it was already gone.
    pub fn detach(&mut self, connection: ConnectionId) -> bool {
        self.outboxes.remove(&connection).is_some()
    }

    pub fn is_open(&self, connection: ConnectionId) -> bool {
        self.outboxes.contains_key(&connection)
    }

    pub fn open_connections(&self) -> usize {
        self.outboxes.len()
    }

    /// Resolve `target` through the registry and write `envelope` to its
    /// connection.
    pub fn send(
        &mut self,
        registry: &Registry,
        target: &ClientId,
        envelope: &OutboundEnvelope,
    ) -> Delivery {
        let Some(entry) = registry.lookup(target) else {
            warn!("no client registered as {target}; dropping {}", kind_of(envelope));
            return Delivery::UnknownTarget;
        };
        self.deliver(entry.connection, target, envelope)
    }

    /// Send `kind`/`payload` to every registered unit whose connection is
    /// open, each addressed by its own id. A failed send does not stop the
    /// rest. Returns the number delivered.
    pub fn broadcast_to_units(&mut self, registry: &Registry, kind: &str, payload: &Value) -> usize {
        let targets: Vec<ClientId> = registry
            .with_role(&ClientRole::Unit)
            .filter(|entry| self.is_open(entry.connection))
            .map(|entry| entry.id.clone())
            .collect();

        let mut delivered = 0;
        for target in &targets {
            let envelope = OutboundEnvelope::addressed(target, kind, payload.clone());
            if self.send(registry, target, &envelope) == Delivery::Delivered {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send the same envelope to every registered client whose role matches.
    /// Returns the number delivered.
    pub fn send_to_roles(
        &mut self,
        registry: &Registry,
        matches: impl Fn(&ClientRole) -> bool,
        envelope: &OutboundEnvelope,
    ) -> usize {
        let targets: Vec<ClientId> = registry
            .entries()
            .filter(|entry| matches(&entry.role) && self.is_open(entry.connection))
            .map(|entry| entry.id.clone())
            .collect();

        let mut delivered = 0;
        for target in &targets {
            if self.send(registry, target, envelope) == Delivery::Delivered {
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver(
        &mut self,
        connection: ConnectionId,
        target: &ClientId,
        envelope: &OutboundEnvelope,
    ) -> Delivery {
        let Some(outbox) = self.outboxes.get(&connection) else {
            warn!("{target} is on closed {connection}; dropping {}", kind_of(envelope));
            return Delivery::ConnectionClosed;
        };

        let text = match serde_json::to_string(envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to encode {} for {target}: {e}", kind_of(envelope));
                return Delivery::EncodeFailed;
            }
        };

        if outbox.send(text).is_err() {
            // The connection thread has exited; its Disconnected event is
            // on the way. Stop queueing to it in the meantime.
            self.outboxes.remove(&connection);
            warn!("{target} on {connection} went away; dropping {}", kind_of(envelope));
            return Delivery::ConnectionClosed;
        }

        debug!("sent {} to {target}", kind_of(envelope));
        Delivery::Delivered
    }
}

fn kind_of(envelope: &OutboundEnvelope) -> &str {
    envelope.message_type.as_deref().unwrap_or(&envelope.id)
}
