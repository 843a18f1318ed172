// Integration smoke test for the relay server.
//
// Starts a relay on localhost and drives it with `PeerClient`s playing the
// controller proxy and the decision process: roster announcement, roster
// delivery to the brain, the one-shot ready barrier, feedback, control
// routing, malformed input, reconnects and the periodic stimulus.
//
// Peers on different sockets race each other, so the tests only rely on
// ordering within one connection and otherwise wait for the message that
// proves the relay has caught up.

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use serde_json::json;
use sphero_relay::config::{BroadcastConfig, RelayConfig};
use sphero_relay::{PeerClient, RelayHandle, start_relay};
use sphero_relay_protocol::{ClientId, ClientRole, ControlKind, OutboundEnvelope, UnitDescriptor};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

fn relay(broadcast: BroadcastConfig) -> (RelayHandle, SocketAddr) {
    let config = RelayConfig {
        bind_address: "127.0.0.1".into(),
        port: 0, // OS picks a free port
        broadcast,
        ..RelayConfig::default()
    };
    let (handle, addr) = start_relay(config).unwrap();

    // Give the listener thread a moment to start.
    thread::sleep(Duration::from_millis(50));
    (handle, addr)
}

fn quiet_relay() -> (RelayHandle, SocketAddr) {
    relay(BroadcastConfig {
        enabled: false,
        ..BroadcastConfig::default()
    })
}

fn connect(addr: SocketAddr, role: ClientRole) -> PeerClient {
    PeerClient::connect(&format!("ws://{addr}"), role).unwrap()
}

fn id(s: &str) -> ClientId {
    ClientId::from(s)
}

fn units(ids: &[&str]) -> Vec<UnitDescriptor> {
    ids.iter().map(|id| UnitDescriptor::new(*id)).collect()
}

fn kind(message: &OutboundEnvelope) -> &str {
    message.message_type.as_deref().unwrap_or("")
}

/// Wait for the next message of the given kind, failing the test if it
/// does not arrive.
fn expect(client: &PeerClient, wanted: &str) -> OutboundEnvelope {
    client
        .wait_for(WAIT, |m| kind(m) == wanted)
        .unwrap_or_else(|| panic!("no {wanted} within {WAIT:?}"))
}

#[test]
fn roster_ready_and_feedback_lifecycle() {
    // 1. Start a relay and connect the controller and the brain.
    let (handle, addr) = quiet_relay();
    let proxy = connect(addr, ClientRole::ControllerProxy);
    let brain = connect(addr, ClientRole::DecisionProcess);

    // 2. Controller announces two units (with extra fields); brain connects.
    proxy
        .announce_roster(vec![
            UnitDescriptor::new("s1").with_field("color", json!("#FF0000")),
            UnitDescriptor::new("s2").with_field("color", json!("#00FF00")),
        ])
        .unwrap();
    brain.announce(None).unwrap();

    // Whichever arrived first, the brain ends up with the roster.
    let roster = expect(&brain, "SpheroConnection");
    assert_eq!(roster.id, "SpheroBrain");
    assert_eq!(
        roster.message,
        json!([
            {"id": "s1", "color": "#FF0000"},
            {"id": "s2", "color": "#00FF00"}
        ])
    );

    // 3. s1 ready: nothing yet. s2 ready: exactly one "Ready".
    proxy.report_ready(&id("s1")).unwrap();
    proxy.report_ready(&id("s2")).unwrap();
    let ready = expect(&brain, "SpheroReady");
    assert_eq!(ready.id, "SpheroBrain");
    assert_eq!(ready.message, json!("Ready"));

    // 4. A repeated ready report is absorbed; feedback still flows in order
    //    behind it, so the brain sees feedback next and no second Ready.
    proxy.report_ready(&id("s2")).unwrap();
    proxy.report_feedback(&id("s1"), None).unwrap();
    let feedback = brain.recv_timeout(WAIT).unwrap();
    assert_eq!(
        feedback,
        OutboundEnvelope::addressed(&id("s1"), "SpheroFeedback", json!("Done"))
    );

    proxy
        .report_feedback(&id("s2"), Some(json!({"reached": [3, 4]})))
        .unwrap();
    let feedback = expect(&brain, "SpheroFeedback");
    assert_eq!(feedback.id, "s2");
    assert_eq!(feedback.message, json!({"reached": [3, 4]}));

    // 5. A new roster rearms the barrier.
    proxy.announce_roster(units(&["s1", "s3"])).unwrap();
    let roster = expect(&brain, "SpheroConnection");
    assert_eq!(roster.message, json!([{"id": "s1"}, {"id": "s3"}]));
    proxy.report_ready(&id("s3")).unwrap();
    proxy.report_ready(&id("s1")).unwrap();
    expect(&brain, "SpheroReady");

    proxy.close();
    brain.close();
    handle.stop();
}

#[test]
fn control_goes_only_to_the_named_unit() {
    let (handle, addr) = quiet_relay();
    let proxy_a = connect(addr, ClientRole::ControllerProxy);
    let proxy_b = connect(addr, ClientRole::Unit);
    let brain = connect(addr, ClientRole::DecisionProcess);

    brain.announce(None).unwrap();
    // Once the brain has seen a roster it is registered, so the second
    // announcement reaches it too.
    proxy_a.announce_roster(units(&["s1"])).unwrap();
    expect(&brain, "SpheroConnection");
    proxy_b.announce_roster(units(&["s2"])).unwrap();
    expect(&brain, "SpheroConnection");

    let directive = json!({"current": [0, 0], "target": [2, 5]});
    brain
        .send_control(&id("s1"), ControlKind::Movement, directive.clone())
        .unwrap();
    brain
        .send_control(&id("s1"), ControlKind::MoveEast, json!(1))
        .unwrap();

    let first = proxy_a.recv_timeout(WAIT).unwrap();
    assert_eq!(
        first,
        OutboundEnvelope::addressed(&id("s1"), "SpheroMovement", directive)
    );
    let second = proxy_a.recv_timeout(WAIT).unwrap();
    assert_eq!(kind(&second), "MoveEast");

    assert!(proxy_b.recv_timeout(QUIET).is_none());

    // Unknown unit: dropped, and the relay keeps serving.
    brain
        .send_control(&id("s9"), ControlKind::Matrix, json!("X"))
        .unwrap();
    assert!(proxy_a.recv_timeout(QUIET).is_none());
    assert!(proxy_b.recv_timeout(QUIET).is_none());

    handle.stop();
}

#[test]
fn malformed_frames_do_not_close_the_connection() {
    let (handle, addr) = quiet_relay();
    let proxy = connect(addr, ClientRole::ControllerProxy);
    let brain = connect(addr, ClientRole::DecisionProcess);
    brain.announce(None).unwrap();

    proxy.send_raw("this is not json").unwrap();
    proxy.send_raw(r#"{"messageType": "SpheroReady"}"#).unwrap();
    proxy
        .send_raw(r#"{"clientType": "SpheroController", "messageType": "SpheroDance"}"#)
        .unwrap();
    proxy
        .send_raw(r#"{"clientType": "esp32-cam", "id": "binaryImage", "binaryImage": "@@@"}"#)
        .unwrap();

    proxy.log(json!("battery low on s1")).unwrap();

    // Same socket, so this is handled after all of the above.
    proxy.announce_roster(units(&["s1"])).unwrap();
    let roster = expect(&brain, "SpheroConnection");
    assert_eq!(roster.message, json!([{"id": "s1"}]));

    // Nothing was ever sent back to the misbehaving peer.
    assert!(proxy.poll().is_empty());

    handle.stop();
}

#[test]
fn units_follow_their_controller_across_reconnects() {
    let (handle, addr) = quiet_relay();
    let brain = connect(addr, ClientRole::DecisionProcess);
    brain.announce(None).unwrap();

    let old_proxy = connect(addr, ClientRole::ControllerProxy);
    old_proxy.announce_roster(units(&["s1"])).unwrap();
    expect(&brain, "SpheroConnection");
    old_proxy.close();

    let new_proxy = connect(addr, ClientRole::ControllerProxy);
    new_proxy.announce_roster(units(&["s1"])).unwrap();
    expect(&brain, "SpheroConnection");

    brain
        .send_control(&id("s1"), ControlKind::MoveNorth, json!(3))
        .unwrap();
    let directive = new_proxy.recv_timeout(WAIT).unwrap();
    assert_eq!(directive.id, "s1");
    assert_eq!(kind(&directive), "MoveNorth");

    handle.stop();
}

#[test]
fn brain_reconnect_gets_current_roster() {
    let (handle, addr) = quiet_relay();
    let proxy = connect(addr, ClientRole::ControllerProxy);
    let brain = connect(addr, ClientRole::DecisionProcess);
    brain.announce(None).unwrap();
    proxy.announce_roster(units(&["s1", "s2"])).unwrap();
    expect(&brain, "SpheroConnection");
    brain.close();

    let brain = connect(addr, ClientRole::DecisionProcess);
    brain.announce(Some(&id("planner"))).unwrap();
    let roster = expect(&brain, "SpheroConnection");
    assert_eq!(roster.id, "planner");
    assert_eq!(roster.message, json!([{"id": "s1"}, {"id": "s2"}]));

    handle.stop();
}

#[test]
fn broadcaster_reaches_every_unit() {
    let (handle, addr) = relay(BroadcastConfig {
        interval_ms: 50,
        ..BroadcastConfig::default()
    });
    let proxy = connect(addr, ClientRole::ControllerProxy);
    let brain = connect(addr, ClientRole::DecisionProcess);
    brain.announce(None).unwrap();
    proxy.announce_roster(units(&["s1", "s2"])).unwrap();
    expect(&brain, "SpheroConnection");

    // Ticks that fired before the roster landed sent nothing; wait for one
    // that covers both units.
    let mut seen = Vec::new();
    while seen.len() < 2 {
        let stimulus = expect(&proxy, "SpheroMatrix");
        assert_eq!(stimulus.message, json!("X"));
        if !seen.contains(&stimulus.id) {
            seen.push(stimulus.id);
        }
    }
    seen.sort();
    assert_eq!(seen, ["s1", "s2"]);

    // The brain is not a unit.
    assert!(brain.wait_for(QUIET, |m| kind(m) == "SpheroMatrix").is_none());

    handle.stop();
}
