// Protocol messages for peer-relay communication.
//
// Inbound traffic arrives as loosely shaped JSON (`InboundFrame`) written by
// several independent peers. It is classified exactly once, at the transport
// boundary, into the closed `Envelope` union; the relay core never looks at
// raw JSON. Kinds the relay does not know decode to `MessageKind::Unknown`
// so they stay a distinct, loggable category instead of vanishing.
//
// Two frame dialects share one socket:
// - Sphero/Brain peers name the kind in `messageType` and put the target
//   unit in `id`.
// - Camera pipeline peers have no `messageType`; their `id` *is* the kind.
//
// Outbound traffic is always `OutboundEnvelope`. Movement, feedback and log
// payloads are carried as opaque `serde_json::Value`s: the relay routes
// them but never interprets them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;
use crate::image::decode_image;
use crate::types::{ClientId, ClientRole};

pub const ROSTER_ANNOUNCEMENT: &str = "SpheroConnection";
pub const READY_REPORT: &str = "SpheroReady";
pub const FEEDBACK_REPORT: &str = "SpheroFeedback";
pub const BRAIN_CONNECTION: &str = "BrainConnection";
pub const CAMERA_START: &str = "start";
pub const PEER_LOG: &str = "log";
pub const BINARY_IMAGE: &str = "binaryImage";
pub const FACE_DATA: &str = "faceData";

/// Outbound channel names used by the camera pipeline.
pub const RUN_CHANNEL: &str = "run";
pub const CONTROL_CHANNEL: &str = "control";

/// Raw wire shape of a frame sent by a peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    pub client_type: ClientRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spheros: Option<Vec<UnitDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_data: Option<Value>,
}

impl InboundFrame {
    /// A Sphero/Brain dialect frame: kind in `messageType`.
    pub fn typed(role: ClientRole, kind: &str) -> Self {
        Self {
            client_type: role,
            message_type: Some(kind.to_owned()),
            id: None,
            message: None,
            spheros: None,
            binary_image: None,
            face_data: None,
        }
    }

    /// A camera dialect frame: kind in `id`.
    pub fn untyped(role: ClientRole, kind: &str) -> Self {
        Self {
            id: Some(kind.to_owned()),
            message_type: None,
            ..Self::typed(role, kind)
        }
    }

    pub fn with_id(mut self, id: &ClientId) -> Self {
        self.id = Some(id.0.clone());
        self
    }

    pub fn with_message(mut self, message: Value) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_units(mut self, units: Vec<UnitDescriptor>) -> Self {
        self.spheros = Some(units);
        self
    }

    pub fn with_image(mut self, encoded: String) -> Self {
        self.binary_image = Some(encoded);
        self
    }

    pub fn with_face_data(mut self, data: Value) -> Self {
        self.face_data = Some(data);
        self
    }
}

/// One entry of a roster announcement. Fields other than `id` (colour,
/// calibration hints, ...) are kept verbatim so the decision process sees
/// exactly what the controller announced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub id: ClientId,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl UnitDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ClientId(id.into()),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_owned(), value);
        self
    }
}

/// Commands the decision process can address to a single unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKind {
    Movement,
    MoveNorth,
    MoveSouth,
    MoveEast,
    MoveWest,
    Matrix,
}

impl ControlKind {
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "SpheroMovement" => Some(ControlKind::Movement),
            "MoveNorth" => Some(ControlKind::MoveNorth),
            "MoveSouth" => Some(ControlKind::MoveSouth),
            "MoveEast" => Some(ControlKind::MoveEast),
            "MoveWest" => Some(ControlKind::MoveWest),
            "SpheroMatrix" => Some(ControlKind::Matrix),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlKind::Movement => "SpheroMovement",
            ControlKind::MoveNorth => "MoveNorth",
            ControlKind::MoveSouth => "MoveSouth",
            ControlKind::MoveEast => "MoveEast",
            ControlKind::MoveWest => "MoveWest",
            ControlKind::Matrix => "SpheroMatrix",
        }
    }
}

/// Classified message kind with its payload.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageKind {
    /// A controller lists the units it fronts. Replaces the whole roster.
    RosterAnnouncement { units: Vec<UnitDescriptor> },
    /// A unit finished its start-up and is ready to move.
    ReadyReport { unit: ClientId },
    /// A unit reports on a finished directive.
    FeedbackReport {
        unit: ClientId,
        message: Option<Value>,
    },
    /// A peer introduces itself. `id` is only set when the peer named
    /// itself explicitly.
    ConnectAnnouncement { id: Option<ClientId> },
    /// A directive for one unit.
    ControlCommand {
        unit: ClientId,
        command: ControlKind,
        message: Value,
    },
    /// Free-form log line from a peer.
    Log { message: Value },
    /// Camera frame, already base64-decoded.
    BinaryImage { data: Vec<u8> },
    /// Face detection output to hand to actuators.
    FaceData { data: Value },
    /// A kind this relay has no handler for.
    Unknown { kind: String },
}

impl MessageKind {
    /// Wire name of the kind, for diagnostics.
    pub fn name(&self) -> &str {
        match self {
            MessageKind::RosterAnnouncement { .. } => ROSTER_ANNOUNCEMENT,
            MessageKind::ReadyReport { .. } => READY_REPORT,
            MessageKind::FeedbackReport { .. } => FEEDBACK_REPORT,
            MessageKind::ConnectAnnouncement { .. } => "connect",
            MessageKind::ControlCommand { command, .. } => command.as_str(),
            MessageKind::Log { .. } => PEER_LOG,
            MessageKind::BinaryImage { .. } => BINARY_IMAGE,
            MessageKind::FaceData { .. } => FACE_DATA,
            MessageKind::Unknown { kind } => kind,
        }
    }
}

/// A decoded inbound message: who claims to have sent it, and what it is.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub role: ClientRole,
    pub kind: MessageKind,
}

impl Envelope {
    /// Parse and classify one text frame.
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        let frame: InboundFrame = serde_json::from_str(text)?;
        Envelope::try_from(frame)
    }
}

impl TryFrom<InboundFrame> for Envelope {
    type Error = DecodeError;

    fn try_from(frame: InboundFrame) -> Result<Self, Self::Error> {
        let InboundFrame {
            client_type,
            message_type,
            id,
            message,
            spheros,
            binary_image,
            face_data,
        } = frame;

        let (kind, target) = match message_type {
            Some(kind) => (kind, id.map(ClientId)),
            None => (id.ok_or(DecodeError::MissingKind)?, None),
        };

        let kind = match kind.as_str() {
            ROSTER_ANNOUNCEMENT => {
                let units = match (spheros, message) {
                    (Some(units), _) => units,
                    (None, Some(list @ Value::Array(_))) => serde_json::from_value(list)?,
                    _ => {
                        return Err(DecodeError::MissingField {
                            kind: ROSTER_ANNOUNCEMENT,
                            field: "spheros",
                        });
                    }
                };
                MessageKind::RosterAnnouncement { units }
            }
            READY_REPORT => MessageKind::ReadyReport {
                unit: required_id(target, READY_REPORT)?,
            },
            FEEDBACK_REPORT => MessageKind::FeedbackReport {
                unit: required_id(target, FEEDBACK_REPORT)?,
                message,
            },
            BRAIN_CONNECTION | CAMERA_START => MessageKind::ConnectAnnouncement { id: target },
            PEER_LOG => MessageKind::Log {
                message: message.unwrap_or(Value::Null),
            },
            BINARY_IMAGE => {
                let encoded = binary_image.ok_or(DecodeError::MissingField {
                    kind: BINARY_IMAGE,
                    field: "binaryImage",
                })?;
                MessageKind::BinaryImage {
                    data: decode_image(&encoded)?,
                }
            }
            FACE_DATA => MessageKind::FaceData {
                data: face_data.ok_or(DecodeError::MissingField {
                    kind: FACE_DATA,
                    field: "faceData",
                })?,
            },
            other => match ControlKind::from_wire(other) {
                Some(command) => MessageKind::ControlCommand {
                    unit: required_id(target, command.as_str())?,
                    command,
                    message: message.unwrap_or(Value::Null),
                },
                None => MessageKind::Unknown {
                    kind: other.to_owned(),
                },
            },
        };

        Ok(Envelope {
            role: client_type,
            kind,
        })
    }
}

fn required_id(target: Option<ClientId>, kind: &'static str) -> Result<ClientId, DecodeError> {
    target.ok_or(DecodeError::MissingField { kind, field: "id" })
}

/// Message written by the relay to a peer.
///
/// Sphero/Brain traffic is `{"id", "messageType", "message"}`. Camera
/// pipeline signals leave out `messageType` and use `id` as a channel name
/// (`run`, `control`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub message: Value,
}

impl OutboundEnvelope {
    /// Message addressed to a logical id, tagged with its kind.
    pub fn addressed(target: &ClientId, kind: &str, message: Value) -> Self {
        Self {
            id: target.0.clone(),
            message_type: Some(kind.to_owned()),
            message,
        }
    }

    /// Camera pipeline message on a named channel.
    pub fn channel(channel: &str, message: Value) -> Self {
        Self {
            id: channel.to_owned(),
            message_type: None,
            message,
        }
    }
}
