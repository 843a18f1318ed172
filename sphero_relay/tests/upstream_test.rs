// Integration test for the camera pipeline.
//
// A fake processing server stands in for the face recognition / scan
// server. The relay connects out to it; camera, actuator and vision peers
// connect in. Checks that frames arrive upstream byte-for-byte, that the
// pipeline peers get Begin/End as the upstream link comes and goes, that
// the relay reconnects, and that face data reaches the actuators.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use serde_json::json;
use sphero_relay::config::{BroadcastConfig, RelayConfig, UpstreamConfig};
use sphero_relay::{PeerClient, RelayHandle, start_relay};
use sphero_relay_protocol::{ClientRole, OutboundEnvelope, UnitDescriptor};
use tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

/// Minimal processing server. Accepts one link at a time and records every
/// binary frame it receives.
struct FakeUpstream {
    addr: SocketAddr,
    frames: Receiver<Vec<u8>>,
    drop_link: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl FakeUpstream {
    fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        listener.set_nonblocking(true).unwrap();

        let (tx, frames) = mpsc::channel();
        let drop_link = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let drop_link_server = drop_link.clone();
        let stop_server = stop.clone();

        thread::spawn(move || {
            while !stop_server.load(Ordering::SeqCst) {
                let stream = match listener.accept() {
                    Ok((stream, _)) => stream,
                    Err(_) => {
                        thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                };
                stream.set_nonblocking(false).unwrap();
                stream.set_read_timeout(Some(WAIT)).unwrap();
                let Ok(mut ws) = tungstenite::accept(stream) else {
                    continue;
                };
                ws.get_ref()
                    .set_read_timeout(Some(Duration::from_millis(20)))
                    .unwrap();

                loop {
                    let closing = stop_server.load(Ordering::SeqCst)
                        || drop_link_server.swap(false, Ordering::SeqCst);
                    if closing {
                        let _ = ws.close(None);
                        let _ = ws.flush();
                        break;
                    }
                    match ws.read() {
                        Ok(Message::Binary(bytes)) => {
                            let _ = tx.send(bytes.to_vec());
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(tungstenite::Error::Io(e))
                            if matches!(
                                e.kind(),
                                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                            ) => {}
                        Err(_) => break,
                    }
                }
            }
        });

        Self {
            addr,
            frames,
            drop_link,
            stop,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Close the current link. The server keeps listening, so the relay can
    /// reconnect.
    fn drop_link(&self) {
        self.drop_link.store(true, Ordering::SeqCst);
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn relay_with_upstream(url: String) -> (RelayHandle, SocketAddr) {
    let config = RelayConfig {
        bind_address: "127.0.0.1".into(),
        port: 0,
        upstream: UpstreamConfig {
            url: Some(url),
            reconnect_delay_ms: 50,
        },
        broadcast: BroadcastConfig {
            enabled: false,
            ..BroadcastConfig::default()
        },
        ..RelayConfig::default()
    };
    let (handle, addr) = start_relay(config).unwrap();
    thread::sleep(Duration::from_millis(50));
    (handle, addr)
}

fn connect(addr: SocketAddr, role: ClientRole) -> PeerClient {
    PeerClient::connect(&format!("ws://{addr}"), role).unwrap()
}

fn run_signal(client: &PeerClient, signal: &str) -> OutboundEnvelope {
    client
        .wait_for(WAIT, |m| m.id == "run" && m.message == json!(signal))
        .unwrap_or_else(|| panic!("no {signal} signal within {WAIT:?}"))
}

#[test]
fn camera_frames_reach_upstream_intact() {
    // 1. Processing server up, relay pointed at it, camera announces.
    let upstream = FakeUpstream::spawn();
    let (handle, addr) = relay_with_upstream(upstream.url());
    let camera = connect(addr, ClientRole::Camera);
    camera.announce(None).unwrap();

    // 2. Whether the link or the camera came first, the camera hears Begin.
    let begin = run_signal(&camera, "Begin");
    assert_eq!(begin.message_type, None);

    // 3. Frames go up byte-for-byte, in order.
    let first: Vec<u8> = (0..=255).collect();
    let second = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    camera.send_image(&first).unwrap();
    camera.send_image(&second).unwrap();
    assert_eq!(upstream.frames.recv_timeout(WAIT).unwrap(), first);
    assert_eq!(upstream.frames.recv_timeout(WAIT).unwrap(), second);

    // 4. Link drops: End. The relay reconnects: Begin again.
    upstream.drop_link();
    run_signal(&camera, "End");
    run_signal(&camera, "Begin");

    camera.send_image(b"after reconnect").unwrap();
    assert_eq!(
        upstream.frames.recv_timeout(WAIT).unwrap(),
        b"after reconnect".to_vec()
    );

    handle.stop();
}

#[test]
fn face_data_reaches_actuators() {
    let upstream = FakeUpstream::spawn();
    let (handle, addr) = relay_with_upstream(upstream.url());

    let actuator = connect(addr, ClientRole::Actuator);
    actuator.announce(None).unwrap();
    run_signal(&actuator, "Begin");

    // A camera joining an open pipeline sends Begin to everyone again.
    let camera = connect(addr, ClientRole::Camera);
    camera.announce(None).unwrap();
    run_signal(&camera, "Begin");
    run_signal(&actuator, "Begin");

    let vision = connect(addr, ClientRole::Vision);
    vision
        .send_face_data(json!({"faces": [{"x": 120, "y": 80, "w": 40, "h": 40}]}))
        .unwrap();

    let control = actuator
        .wait_for(WAIT, |m| m.id == "control")
        .expect("no face data within timeout");
    assert_eq!(
        control.message,
        json!({"faces": [{"x": 120, "y": 80, "w": 40, "h": 40}]})
    );
    assert!(camera.wait_for(Duration::from_millis(300), |m| m.id == "control").is_none());

    handle.stop();
}

#[test]
fn unreachable_upstream_drops_frames_quietly() {
    // Nothing listens on this port.
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let (handle, addr) = relay_with_upstream(format!("ws://127.0.0.1:{port}"));

    let camera = connect(addr, ClientRole::Camera);
    camera.announce(None).unwrap();
    camera.send_image(&[1, 2, 3]).unwrap();

    // No Begin, and the relay keeps serving everyone else.
    assert!(camera.wait_for(Duration::from_millis(300), |m| m.id == "run").is_none());
    let brain = connect(addr, ClientRole::DecisionProcess);
    brain.announce(None).unwrap();
    let proxy = connect(addr, ClientRole::ControllerProxy);
    proxy
        .announce_roster(vec![UnitDescriptor::new("s1")])
        .unwrap();
    assert!(
        brain
            .wait_for(WAIT, |m| m.message_type.as_deref() == Some("SpheroConnection"))
            .is_some()
    );

    handle.stop();
}
