// Logical client registry.
//
// Maps each `ClientId` to the connection currently backing it and the role
// it was registered under. One connection may back many ids (a controller
// proxy registers every unit in its roster against its own socket), but an
// id maps to exactly one connection at a time: registering an id again
// shadows the previous entry, last writer wins.
//
// The registry knows nothing about sockets. Liveness lives in the router;
// here a `ConnectionId` is just a key. Entries are removed only by
// `remove_by_connection`, which the session calls once per close event.

use std::collections::BTreeMap;

use sphero_relay_protocol::{ClientId, ClientRole, ConnectionId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientEntry {
    pub id: ClientId,
    pub role: ClientRole,
    pub connection: ConnectionId,
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<ClientId, ClientEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `id`. Returns the entry it
    /// replaced, if any.
    pub fn register(
        &mut self,
        id: ClientId,
        role: ClientRole,
        connection: ConnectionId,
    ) -> Option<ClientEntry> {
        let entry = ClientEntry {
            id: id.clone(),
            role,
            connection,
        };
        self.entries.insert(id, entry)
    }

    pub fn lookup(&self, id: &ClientId) -> Option<&ClientEntry> {
        self.entries.get(id)
    }

    /// Drop every entry backed by `connection` and return their ids.
    /// Calling it again for the same connection removes nothing.
    pub fn remove_by_connection(&mut self, connection: ConnectionId) -> Vec<ClientId> {
        let mut removed = Vec::new();
        self.entries.retain(|id, entry| {
            if entry.connection == connection {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// All entries, in id order.
    pub fn entries(&self) -> impl Iterator<Item = &ClientEntry> {
        self.entries.values()
    }

    pub fn with_role<'a>(&'a self, role: &'a ClientRole) -> impl Iterator<Item = &'a ClientEntry> {
        self.entries.values().filter(move |entry| &entry.role == role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
