// sphero_relay_protocol — wire protocol for the Sphero swarm relay.
//
// This crate defines the message vocabulary spoken between the relay
// (`sphero_relay`) and its peers: Sphero controllers, the decision process
// ("brain"), and the camera pipeline (ESP32 cameras, actuator boards, the
// face recognition process). It has no networking code of its own.
//
// Module overview:
// - `types.rs`:    Identity types (`ClientId`, `ConnectionId`,
//                  `RosterGeneration`) and the `ClientRole` parsed from
//                  `clientType`.
// - `message.rs`:  `InboundFrame` (raw JSON shape), the closed `Envelope` /
//                  `MessageKind` union it is classified into, and the
//                  `OutboundEnvelope` the relay writes back.
// - `image.rs`:    Base64 codec for camera frames.
// - `error.rs`:    `DecodeError` for frames that cannot be classified.
//
// Design decisions:
// - **JSON text frames.** Every existing peer already speaks JSON over
//   websockets; the protocol keeps their field names (`clientType`,
//   `messageType`, ...) unchanged.
// - **Opaque payloads.** Movement directives, feedback and face data stay
//   `serde_json::Value`. The relay routes them without interpreting them.
// - **Classification at the boundary.** Unknown kinds are a variant, not a
//   fallthrough, so the dispatcher can log them explicitly.

pub mod error;
pub mod image;
pub mod message;
pub mod types;

pub use error::DecodeError;
pub use image::{decode_image, encode_image};
pub use message::{
    ControlKind, Envelope, InboundFrame, MessageKind, OutboundEnvelope, UnitDescriptor,
};
pub use types::{ClientId, ClientRole, ConnectionId, RosterGeneration};
