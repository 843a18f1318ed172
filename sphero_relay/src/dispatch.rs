// Inbound message routing table.
//
// Every decoded `Envelope` passes through `dispatch`, which matches on the
// declared role and the message kind and calls exactly one `Session`
// handler. The table:
//
//   Sphero / SpheroController  SpheroConnection    announce_roster
//   Sphero / SpheroController  SpheroReady         mark_ready
//   Sphero / SpheroController  SpheroFeedback      forward_feedback
//   SpheroBrain                BrainConnection     connect_decision_process
//   SpheroBrain                movement/matrix     route_control
//   esp32-cam                  binaryImage         forward_image
//   python-face                faceData            relay_face_data
//   any role                   connect (start)     register_client
//   any role                   log                 log_peer_message
//
// Anything else (an unknown kind, or a known kind from a role that may not
// send it) is dropped with a debug line. Peers never get an error back.

use sphero_relay_protocol::{ClientRole, ConnectionId, Envelope, MessageKind};
use tracing::debug;

use crate::session::Session;

pub fn dispatch(session: &mut Session, connection: ConnectionId, envelope: Envelope) {
    let Envelope { role, kind } = envelope;

    match kind {
        MessageKind::RosterAnnouncement { units } if role.speaks_for_units() => {
            session.announce_roster(connection, units);
        }
        MessageKind::ReadyReport { unit } if role.speaks_for_units() => {
            session.mark_ready(&unit);
        }
        MessageKind::FeedbackReport { unit, message } if role.speaks_for_units() => {
            session.forward_feedback(&unit, message);
        }
        MessageKind::ConnectAnnouncement { id } => {
            if role == ClientRole::DecisionProcess {
                session.connect_decision_process(connection, id);
            } else {
                session.register_client(connection, role, id);
            }
        }
        MessageKind::ControlCommand {
            unit,
            command,
            message,
        } if role == ClientRole::DecisionProcess => {
            session.route_control(&unit, command, message);
        }
        MessageKind::BinaryImage { data } if role == ClientRole::Camera => {
            session.forward_image(data);
        }
        MessageKind::FaceData { data } if role == ClientRole::Vision => {
            session.relay_face_data(data);
        }
        MessageKind::Log { message } => session.log_peer_message(&role, &message),
        MessageKind::Unknown { kind } => {
            debug!("{role} on {connection} sent unknown kind {kind}; dropping");
        }
        other => {
            debug!(
                "{role} on {connection} may not send {}; dropping",
                other.name()
            );
        }
    }
}
