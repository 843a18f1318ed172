// Core identity types for the relay protocol.
//
// `ClientId` is the logical address the relay routes by. It is a string
// chosen by the peers themselves (Sphero names like "SB-2E86", or a role
// name such as "SpheroBrain"), not something the relay assigns. A single
// websocket connection can stand behind many `ClientId`s: a controller
// proxy registers one id per unit it drives.
//
// `ConnectionId` is relay-assigned and never leaves the process. It is how
// the registry ties logical ids back to a physical socket so that closing
// the socket can drop every id it was backing.
//
// `ClientRole` is parsed from the `clientType` field of every inbound frame.
// Unknown role names are kept verbatim in `Other` so they can still be
// registered and logged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical peer address (unit id, decision process id, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Relay-assigned identifier of one physical websocket connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Monotonically increasing roster number. Bumped on every roster
/// announcement, including re-announcements of an identical list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct RosterGeneration(pub u64);

impl RosterGeneration {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RosterGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Declared role of a peer, taken from `clientType`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClientRole {
    /// A single Sphero talking to the relay directly.
    Unit,
    /// One connection fronting every Sphero in its roster.
    ControllerProxy,
    /// The planner that issues movement and consumes readiness/feedback.
    DecisionProcess,
    /// ESP32 camera streaming base64 frames.
    Camera,
    /// ESP32 actuator board driven by face data.
    Actuator,
    /// Face recognition process producing face data.
    Vision,
    Other(String),
}

impl ClientRole {
    pub fn as_str(&self) -> &str {
        match self {
            ClientRole::Unit => "Sphero",
            ClientRole::ControllerProxy => "SpheroController",
            ClientRole::DecisionProcess => "SpheroBrain",
            ClientRole::Camera => "esp32-cam",
            ClientRole::Actuator => "esp32-controller",
            ClientRole::Vision => "python-face",
            ClientRole::Other(name) => name,
        }
    }

    /// Roles that speak for Spheros (roster, ready and feedback reports).
    pub fn speaks_for_units(&self) -> bool {
        matches!(self, ClientRole::Unit | ClientRole::ControllerProxy)
    }

    /// Roles that take part in the camera pipeline and receive the
    /// `run` Begin/End signals.
    pub fn is_camera_pipeline(&self) -> bool {
        matches!(
            self,
            ClientRole::Camera | ClientRole::Actuator | ClientRole::Vision
        )
    }
}

impl From<&str> for ClientRole {
    fn from(name: &str) -> Self {
        match name {
            "Sphero" => ClientRole::Unit,
            "SpheroController" => ClientRole::ControllerProxy,
            "SpheroBrain" => ClientRole::DecisionProcess,
            "esp32-cam" => ClientRole::Camera,
            "esp32-controller" => ClientRole::Actuator,
            "python-face" => ClientRole::Vision,
            other => ClientRole::Other(other.to_owned()),
        }
    }
}

impl From<String> for ClientRole {
    fn from(name: String) -> Self {
        ClientRole::from(name.as_str())
    }
}

impl From<ClientRole> for String {
    fn from(role: ClientRole) -> Self {
        role.as_str().to_owned()
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
