//! Connection manager
//!
//! One spawned task owns the socket and the connector array. Everything the
//! outside world does (configure, connect, disconnect, start or stop a
//! session) arrives over a command channel and is applied between socket
//! events, so no two transitions for the same connector can interleave and
//! nothing ever blocks the caller.

use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, StationConfig};
use crate::connector::ConnectorSnapshot;
use crate::frame::{parse_command, CodecError, Frame, RemoteCommand};
use crate::session::StationState;

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Side channel consumed by the embedding front-end.
///
/// Both callbacks fire on the manager task. Implementations that feed a
/// consumer on another thread are responsible for their own hand-off
/// (a queue, a channel); the manager never waits on them.
pub trait StationObserver: Send + Sync {
    /// One line per send/receive/lifecycle event, timestamp-prefixed.
    fn log(&self, line: &str);

    /// Called whenever any connector's observable fields change.
    fn publish_state(&self, connectors: &[ConnectorSnapshot]);
}

/// Externally triggered actions, funneled onto the manager task.
#[derive(Debug)]
enum Command {
    Configure(StationConfig),
    Connect,
    Disconnect,
    StartSession { connector_id: i32 },
    StopSession { connector_id: i32 },
    MeterTick { connector_id: i32 },
    Shutdown,
}

/// Handle to a running station simulator.
///
/// All methods are non-blocking and safe to call from any thread; the
/// requested action runs on the manager task and its completion is not
/// awaited. Dropping the handle shuts the manager down.
pub struct StationSimulator {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl StationSimulator {
    /// Validate `config`, build the connector array, publish the initial
    /// state exactly once, and spawn the manager task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: StationConfig,
        observer: Arc<dyn StationObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let manager = Manager::new(config, observer, commands.clone());
        manager.publish_state();
        let task = tokio::spawn(manager.run(command_rx));
        Ok(Self { commands, task: Some(task) })
    }

    /// Replace the connection parameters and rebuild every connector from
    /// scratch. Applied only while disconnected; refused otherwise.
    pub fn configure(&self, config: StationConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let _ = self.commands.send(Command::Configure(config));
        Ok(())
    }

    /// Open the socket and run the handshake. No-op when already connected.
    /// A failed attempt is logged and abandoned; there is no retry.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Request teardown of the current connection. Safe no-op when not
    /// connected.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Request a session start on a connector.
    pub fn start_session(&self, connector_id: i32) {
        let _ = self.commands.send(Command::StartSession { connector_id });
    }

    /// Request a session stop on a connector.
    pub fn stop_session(&self, connector_id: i32) {
        let _ = self.commands.send(Command::StopSession { connector_id });
    }

    /// Tear down whatever is running and wait for the manager task to end.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StationSimulator {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// The manager task: exclusive owner of the socket and connector state.
struct Manager {
    config: StationConfig,
    state: StationState,
    observer: Arc<dyn StationObserver>,
    commands: mpsc::UnboundedSender<Command>,
    writer: Option<WsWriter>,
    connected: bool,
}

impl Manager {
    fn new(
        config: StationConfig,
        observer: Arc<dyn StationObserver>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let state = StationState::new(&config);
        Self {
            config,
            state,
            observer,
            commands,
            writer: None,
            connected: false,
        }
    }

    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let Some(command) = command_rx.recv().await else { break };
            match command {
                Command::Configure(config) => self.apply_config(config),
                Command::Connect => {
                    if !self.run_connection(&mut command_rx).await {
                        break;
                    }
                }
                Command::Shutdown => break,
                Command::Disconnect => {}
                other => debug!(?other, "ignored while disconnected"),
            }
        }
    }

    fn apply_config(&mut self, config: StationConfig) {
        self.state = StationState::new(&config);
        self.config = config;
        self.publish_state();
    }

    /// One connect attempt: dial, handshake, serve until torn down.
    /// Returns `false` when the manager itself should exit.
    async fn run_connection(&mut self, command_rx: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        let url = self.config.connect_url();
        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(error) => {
                warn!(%error, "connect failed");
                self.log(&format!("Connect failed: {error}"));
                return true;
            }
        };
        info!(url = %url, "connected");
        self.log(&format!("Connected to {url}"));

        let (writer, mut reader) = stream.split();
        self.writer = Some(writer);
        self.connected = true;

        // Boot first, then one status per connector, then auto-start.
        self.send(Frame::boot_notification(self.state.station_id())).await;
        for frame in self.state.initial_status_frames() {
            self.send_frame(frame).await;
        }
        if self.config.auto_start && !self.state.connectors().is_empty() {
            self.handle_start(1).await;
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        let mut keep_running = true;
        while self.connected {
            tokio::select! {
                command = command_rx.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        keep_running = false;
                        break;
                    }
                    Some(Command::Disconnect) => break,
                    Some(Command::Connect) => {}
                    Some(Command::Configure(_)) => {
                        warn!("configure refused while connected");
                    }
                    Some(Command::StartSession { connector_id }) => {
                        self.handle_start(connector_id).await;
                    }
                    Some(Command::StopSession { connector_id }) => {
                        self.handle_stop(connector_id).await;
                    }
                    Some(Command::MeterTick { connector_id }) => {
                        self.handle_tick(connector_id).await;
                    }
                },
                message = reader.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_incoming(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("connection closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        self.log(&format!("Receive error: {error}"));
                        break;
                    }
                },
                _ = heartbeat.tick() => self.send(Frame::heartbeat()).await,
            }
        }

        self.teardown().await;
        keep_running
    }

    /// Receive path: log verbatim, decode, re-enqueue recognized commands
    /// so they serialize with every other transition. One bad message never
    /// aborts the loop.
    fn handle_incoming(&mut self, text: &str) {
        self.log(&format!("RECV: {text}"));
        match parse_command(text) {
            Some(RemoteCommand::StartTransaction { connector_id }) => {
                let _ = self.commands.send(Command::StartSession { connector_id });
            }
            Some(RemoteCommand::StopTransaction { connector_id }) => {
                let _ = self.commands.send(Command::StopSession { connector_id });
            }
            None => debug!("dropped unrecognized message"),
        }
    }

    async fn handle_start(&mut self, connector_id: i32) {
        let Some(frame) = self.state.start_session(connector_id) else { return };
        info!(connector_id, "session started");
        self.publish_state();
        self.send_frame(frame).await;
        let emitter = self.spawn_emitter(connector_id);
        self.state.attach_emitter(connector_id, emitter);
    }

    async fn handle_stop(&mut self, connector_id: i32) {
        let Some(frame) = self.state.stop_session(connector_id) else { return };
        info!(connector_id, "session stopped");
        self.publish_state();
        self.send_frame(frame).await;
    }

    async fn handle_tick(&mut self, connector_id: i32) {
        let Some(frame) = self.state.meter_tick(connector_id) else { return };
        self.publish_state();
        self.send_frame(frame).await;
    }

    /// Telemetry pacing task: wakes every simulated interval and asks the
    /// manager to advance the meter. It owns no state and never touches the
    /// socket, so aborting it is always safe.
    fn spawn_emitter(&self, connector_id: i32) -> JoinHandle<()> {
        let period = self.config.telemetry_period();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if commands.send(Command::MeterTick { connector_id }).is_err() {
                    break;
                }
            }
        })
    }

    async fn send(&mut self, frame: Result<Frame, CodecError>) {
        match frame {
            Ok(frame) => self.send_frame(frame).await,
            Err(error) => warn!(%error, "dropping unserializable frame"),
        }
    }

    /// Single outgoing funnel. Sends may race an asynchronous disconnect;
    /// when the socket is gone the frame is logged and dropped, and a write
    /// error ends the connect attempt.
    async fn send_frame(&mut self, frame: Frame) {
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, "dropping unserializable frame");
                return;
            }
        };
        let Some(writer) = self.writer.as_mut() else {
            self.log("Not connected");
            return;
        };
        if let Err(error) = writer.send(Message::Text(text.clone())).await {
            self.log(&format!("Send error: {error}"));
            self.connected = false;
            return;
        }
        self.log(&format!("SEND: {text}"));
    }

    /// Runs exactly once per connect attempt, whatever ended it: cancel the
    /// emitters, close the socket ignoring errors, mark disconnected.
    async fn teardown(&mut self) {
        self.state.cancel_emitters();
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.close().await;
        }
        self.connected = false;
        info!("disconnected");
        self.log("Disconnected");
    }

    fn publish_state(&self) {
        self.observer.publish_state(&self.state.snapshots());
    }

    /// Timestamp-prefix one line and hand it to the observer.
    fn log(&self, line: &str) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        self.observer.log(&format!("[{stamp}] {line}"));
    }
}
