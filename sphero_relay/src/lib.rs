// sphero_relay — role-aware websocket relay for a Sphero swarm.
//
// The relay sits between three kinds of peers: Sphero units (usually behind
// one controller proxy that speaks for all of them), a decision process that
// plans their moves, and a camera pipeline (ESP32 cameras, actuator boards
// and a face recognition process). It never interprets movement or vision
// data. It keeps track of who is reachable under which id, routes messages
// by id and role, tells the decision process once per roster when every
// unit is ready, and pushes a periodic stimulus to the units.
//
// Module overview:
// - `registry.rs`:    Logical id -> connection and role.
// - `router.rs`:      Per-connection outboxes and delivery by id or role.
// - `readiness.rs`:   Current roster and its one-shot readiness barrier.
// - `session.rs`:     Relay state tying the three together, plus the
//                     domain handlers. The core data structure that
//                     `server.rs` drives.
// - `dispatch.rs`:    The (role, kind) routing table over `Session`.
// - `broadcaster.rs`: Fixed-interval ticker for the unit stimulus.
// - `upstream.rs`:    Forwards camera frames to the processing server and
//                     reconnects when it goes away.
// - `server.rs`:      Websocket listener, connection threads and the main
//                     event loop. Thread-per-connection with an `mpsc`
//                     channel funnelling events into the single-threaded
//                     `Session`.
// - `transport.rs`:   Pump helpers shared by every socket-owning thread
//                     (flush, timeout reads, interruptible sleeps).
// - `client.rs`:      Blocking peer client, used by the integration tests.
// - `config.rs`:      `RelayConfig`, loadable from TOML.
// - `error.rs`:       `RelayError`.
//
// Dependencies: `sphero_relay_protocol` (wire types), `tungstenite` for the
// websocket layer, `tracing` for logs.
//
// The relay runs as a standalone binary (`main.rs`) or embedded through the
// library API (`start_relay`).

pub mod broadcaster;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod readiness;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
mod transport;
pub mod upstream;

pub use client::PeerClient;
pub use config::RelayConfig;
pub use error::RelayError;
pub use server::{RelayHandle, start_relay};
