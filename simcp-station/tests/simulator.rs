//! End-to-end tests against an in-process CSMS stand-in.
//!
//! The stand-in accepts one WebSocket connection, records every frame the
//! simulator sends, and can inject server-side messages. Heartbeats default
//! to an hour so they never interfere with frame-order assertions.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;

use simcp_station::{ConnectorSnapshot, StationConfig, StationObserver, StationSimulator};

struct Csms {
    addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<Value>,
    inject: mpsc::UnboundedSender<String>,
}

async fn start_csms() -> Csms {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frame_tx, frames) = mpsc::unbounded_channel();
    let (inject, mut inject_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { return };
        let (mut writer, mut reader) = ws.split();
        loop {
            tokio::select! {
                message = reader.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(value) = serde_json::from_str::<Value>(&text) {
                            if frame_tx.send(value).is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                },
                command = inject_rx.recv() => match command {
                    Some(text) => {
                        if writer.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    Csms { addr, frames, inject }
}

#[derive(Default)]
struct TestObserver {
    logs: Mutex<Vec<String>>,
    states: Mutex<Vec<Vec<ConnectorSnapshot>>>,
}

impl StationObserver for TestObserver {
    fn log(&self, line: &str) {
        self.logs.lock().unwrap().push(line.to_string());
    }

    fn publish_state(&self, connectors: &[ConnectorSnapshot]) {
        self.states.lock().unwrap().push(connectors.to_vec());
    }
}

impl TestObserver {
    fn last_state(&self) -> Vec<ConnectorSnapshot> {
        self.states.lock().unwrap().last().cloned().unwrap_or_default()
    }

    fn log_contains(&self, needle: &str) -> bool {
        self.logs.lock().unwrap().iter().any(|l| l.contains(needle))
    }
}

fn test_config(addr: SocketAddr, connectors: u32) -> StationConfig {
    StationConfig::new(format!("ws://{addr}"), "CS-TEST")
        .with_connectors(connectors)
        .with_heartbeat_interval(Duration::from_secs(3600))
        .with_sim_speed(40.0)
}

fn action(frame: &Value) -> &str {
    frame[2].as_str().unwrap_or("")
}

fn payload(frame: &Value) -> &Value {
    &frame[3]
}

async fn next_frame(csms: &mut Csms) -> Value {
    timeout(Duration::from_secs(5), csms.frames.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("csms connection ended")
}

/// Consume the BootNotification plus one StatusNotification per connector.
async fn drain_handshake(csms: &mut Csms, connectors: u32) {
    for _ in 0..connectors + 1 {
        next_frame(csms).await;
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn spawn_publishes_initial_state_once() {
    let observer = Arc::new(TestObserver::default());
    let config = StationConfig::new("ws://127.0.0.1:1", "CS-X").with_connectors(3);
    let station = StationSimulator::spawn(config, observer.clone()).unwrap();

    {
        let states = observer.states.lock().unwrap();
        assert_eq!(states.len(), 1);
        let connectors = &states[0];
        assert_eq!(connectors.len(), 3);
        for (i, connector) in connectors.iter().enumerate() {
            assert_eq!(connector.connector_id, i as i32 + 1);
            assert!(!connector.active);
            assert_eq!(connector.energy_kwh, 0.0);
        }
    }

    station.shutdown().await;
}

#[tokio::test]
async fn spawn_rejects_invalid_config() {
    let observer = Arc::new(TestObserver::default());
    let config = StationConfig::new("ws://127.0.0.1:9", "CS-A").with_connectors(0);
    assert!(StationSimulator::spawn(config, observer).is_err());
}

#[tokio::test]
async fn reconfigure_while_disconnected_rebuilds_connectors() {
    let observer = Arc::new(TestObserver::default());
    let station = StationSimulator::spawn(
        StationConfig::new("ws://127.0.0.1:9", "CS-A").with_connectors(1),
        observer.clone(),
    )
    .unwrap();

    station
        .configure(StationConfig::new("ws://127.0.0.1:9", "CS-B").with_connectors(4))
        .unwrap();

    wait_until(|| observer.states.lock().unwrap().len() == 2).await;
    let state = observer.last_state();
    assert_eq!(state.len(), 4);
    assert!(state.iter().all(|c| !c.active));

    station.shutdown().await;
}

#[tokio::test]
async fn boot_precedes_connector_statuses() {
    let mut csms = start_csms().await;
    let observer = Arc::new(TestObserver::default());
    let station = StationSimulator::spawn(test_config(csms.addr, 2), observer.clone()).unwrap();
    station.connect();

    let boot = next_frame(&mut csms).await;
    assert_eq!(boot[0], 2);
    assert_eq!(action(&boot), "BootNotification");
    assert!(boot[1].as_str().unwrap().starts_with("TX-"));
    assert_eq!(payload(&boot)["stationId"], "CS-TEST");
    assert_eq!(payload(&boot)["chargePointVendor"], "SimVendor");
    assert_eq!(payload(&boot)["chargePointModel"], "SimModel");

    for expected_id in 1..=2 {
        let status = next_frame(&mut csms).await;
        assert_eq!(action(&status), "StatusNotification");
        assert_eq!(payload(&status)["connectorId"], expected_id);
        assert_eq!(payload(&status)["status"], "Available");
        assert!(payload(&status)["timestamp"].is_string());
    }

    wait_until(|| observer.log_contains("SEND:")).await;
    station.shutdown().await;
}

#[tokio::test]
async fn auto_start_begins_session_on_connector_one() {
    let mut csms = start_csms().await;
    let observer = Arc::new(TestObserver::default());
    let config = test_config(csms.addr, 2).with_auto_start(true);
    let station = StationSimulator::spawn(config, observer.clone()).unwrap();
    station.connect();

    drain_handshake(&mut csms, 2).await;
    let start = next_frame(&mut csms).await;
    assert_eq!(action(&start), "StartTransaction");
    assert_eq!(payload(&start)["connectorId"], 1);
    assert_eq!(payload(&start)["meterStart"], 0);

    station.shutdown().await;
}

#[tokio::test]
async fn remote_start_round_trip_targets_requested_connector() {
    let mut csms = start_csms().await;
    let observer = Arc::new(TestObserver::default());
    let station = StationSimulator::spawn(test_config(csms.addr, 3), observer.clone()).unwrap();
    station.connect();
    drain_handshake(&mut csms, 3).await;

    csms.inject
        .send(r#"{"messageType":"RemoteStartTransaction","connectorId":2}"#.to_string())
        .unwrap();

    let start = next_frame(&mut csms).await;
    assert_eq!(action(&start), "StartTransaction");
    assert_eq!(payload(&start)["connectorId"], 2);
    assert_eq!(payload(&start)["idTag"], "TAG-001");
    assert!(payload(&start)["transactionId"].as_str().unwrap().starts_with("TX-"));

    let state = observer.last_state();
    assert!(state[1].active);
    assert_eq!(format!("{}", state[1].status), "Charging");
    assert!(!state[0].active);
    assert!(!state[2].active);

    station.shutdown().await;
}

#[tokio::test]
async fn start_then_stop_pair_with_matching_transaction() {
    let mut csms = start_csms().await;
    let observer = Arc::new(TestObserver::default());
    let station = StationSimulator::spawn(test_config(csms.addr, 1), observer.clone()).unwrap();
    station.connect();
    drain_handshake(&mut csms, 1).await;

    station.start_session(1);
    let start = next_frame(&mut csms).await;
    assert_eq!(action(&start), "StartTransaction");

    station.stop_session(1);
    // Telemetry may slip in between the two transitions.
    let mut frame = next_frame(&mut csms).await;
    while action(&frame) == "MeterValues" {
        frame = next_frame(&mut csms).await;
    }
    assert_eq!(action(&frame), "StopTransaction");
    assert_eq!(payload(&frame)["transactionId"], payload(&start)["transactionId"]);
    assert_eq!(payload(&frame)["reason"], "Local");

    let meter_start = payload(&start)["meterStart"].as_i64().unwrap();
    let meter_stop = payload(&frame)["meterStop"].as_i64().unwrap();
    assert!(meter_start <= meter_stop);

    let state = observer.last_state();
    assert!(!state[0].active);
    assert!(state[0].transaction_id.is_none());

    station.shutdown().await;
}

#[tokio::test]
async fn telemetry_is_monotone_and_rounded() {
    let mut csms = start_csms().await;
    let observer = Arc::new(TestObserver::default());
    let station = StationSimulator::spawn(test_config(csms.addr, 1), observer.clone()).unwrap();
    station.connect();
    drain_handshake(&mut csms, 1).await;

    station.start_session(1);
    let start = next_frame(&mut csms).await;
    assert_eq!(action(&start), "StartTransaction");

    let mut last = f64::MIN;
    for _ in 0..3 {
        let meter = next_frame(&mut csms).await;
        assert_eq!(action(&meter), "MeterValues");
        assert_eq!(payload(&meter)["transactionId"], payload(&start)["transactionId"]);
        let value = payload(&meter)["meterValue"].as_f64().unwrap();
        assert!(value >= last);
        assert_eq!((value * 1000.0).round() / 1000.0, value);
        last = value;
    }

    let state = observer.last_state();
    assert!(state[0].energy_kwh >= last - 1e-9);

    station.shutdown().await;
}

#[tokio::test]
async fn malformed_input_is_dropped_without_killing_the_loop() {
    let mut csms = start_csms().await;
    let observer = Arc::new(TestObserver::default());
    let station = StationSimulator::spawn(test_config(csms.addr, 1), observer.clone()).unwrap();
    station.connect();
    drain_handshake(&mut csms, 1).await;
    let states_after_handshake = observer.states.lock().unwrap().len();

    for bad in [
        "not json",
        "[1, 2, 3]",
        r#"{"messageType":"Reset"}"#,
        r#"{"messageType":"RemoteStartTransaction","connectorId":"garbage"}"#,
    ] {
        csms.inject.send(bad.to_string()).unwrap();
    }

    // All four bad messages arrive (the last one is logged verbatim) and
    // none of them changes state.
    wait_until(|| observer.log_contains("garbage")).await;
    assert_eq!(observer.states.lock().unwrap().len(), states_after_handshake);
    assert!(!observer.last_state()[0].active);

    // A valid command after the garbage proves the loop survived.
    csms.inject
        .send(r#"{"messageType":"RemoteStartTransaction"}"#.to_string())
        .unwrap();

    let frame = next_frame(&mut csms).await;
    assert_eq!(action(&frame), "StartTransaction");
    assert_eq!(payload(&frame)["connectorId"], 1);

    station.shutdown().await;
}

#[tokio::test]
async fn disconnect_cancels_emitters_and_closes_the_socket() {
    let mut csms = start_csms().await;
    let observer = Arc::new(TestObserver::default());
    let station = StationSimulator::spawn(test_config(csms.addr, 1), observer.clone()).unwrap();
    station.connect();
    drain_handshake(&mut csms, 1).await;

    station.start_session(1);
    next_frame(&mut csms).await; // StartTransaction
    next_frame(&mut csms).await; // at least one MeterValues

    station.disconnect();
    wait_until(|| observer.log_contains("Disconnected")).await;

    // The socket closes, so the stand-in's frame channel drains to None.
    let closed = timeout(Duration::from_secs(5), async {
        while csms.frames.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "socket not closed after disconnect");

    station.shutdown().await;
}

#[tokio::test]
async fn heartbeats_follow_the_configured_interval() {
    let mut csms = start_csms().await;
    let observer = Arc::new(TestObserver::default());
    let config = StationConfig::new(format!("ws://{}", csms.addr), "CS-TEST")
        .with_heartbeat_interval(Duration::from_secs(1));
    let station = StationSimulator::spawn(config, observer.clone()).unwrap();

    let connected_at = Instant::now();
    station.connect();
    drain_handshake(&mut csms, 1).await;

    let first = next_frame(&mut csms).await;
    assert_eq!(action(&first), "Heartbeat");
    assert!(payload(&first)["timestamp"].is_string());
    let elapsed = connected_at.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "heartbeat too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(3), "heartbeat too late: {elapsed:?}");

    let second = next_frame(&mut csms).await;
    assert_eq!(action(&second), "Heartbeat");

    station.shutdown().await;
}

#[tokio::test]
async fn failed_connect_is_logged_and_abandoned() {
    let observer = Arc::new(TestObserver::default());
    // Nothing listens here; the attempt must fail, be logged, and leave the
    // simulator usable.
    let config = StationConfig::new("ws://127.0.0.1:9", "CS-TEST");
    let station = StationSimulator::spawn(config, observer.clone()).unwrap();
    station.connect();

    wait_until(|| observer.log_contains("Connect failed")).await;
    assert!(!observer.log_contains("Connected to"));

    station.shutdown().await;
}
