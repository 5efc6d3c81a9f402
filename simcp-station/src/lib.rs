//! # simcp-station
//!
//! Simulates an OCPP-like charge point against a CSMS under test. The
//! simulator keeps one persistent WebSocket connection, drives the
//! boot/heartbeat/status handshake, and runs a charging-session state
//! machine per connector with background telemetry emission.
//!
//! ## Architecture
//!
//! ```text
//! Front-end / CLI
//!       │ commands (non-blocking)        log / publish_state callbacks
//!       ▼                                ▲
//! ┌─────────────────────────────────────┴───┐
//! │    Manager task (single-threaded)       │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ StationState │  │ Frame codec     │  │
//! │  │ connectors + │  │ [2,id,action,..]│  │
//! │  │ transitions  │  └─────────────────┘  │
//! │  └──────────────┘   emitter task per    │
//! │                     charging connector  │
//! └─────────────┬───────────────────────────┘
//!               │ WebSocket JSON
//!               ▼
//!          CSMS under test
//! ```
//!
//! The manager task exclusively owns the socket and all connector state;
//! external callers interact through the [`StationSimulator`] handle, whose
//! methods enqueue work without blocking.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use simcp_station::{ConnectorSnapshot, StationConfig, StationObserver, StationSimulator};
//!
//! struct Stdout;
//!
//! impl StationObserver for Stdout {
//!     fn log(&self, line: &str) {
//!         println!("{line}");
//!     }
//!     fn publish_state(&self, _connectors: &[ConnectorSnapshot]) {}
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = StationConfig::new("ws://localhost:8081/ocpp/ws", "CS-001")
//!         .with_connectors(2);
//!     let station = StationSimulator::spawn(config, Arc::new(Stdout)).unwrap();
//!     station.connect();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     station.disconnect();
//!     station.shutdown().await;
//! }
//! ```

pub mod config;
pub mod connector;
pub mod frame;
pub mod session;
pub mod station;

pub use config::{normalize_url, ConfigError, StationConfig};
pub use connector::{ConnectorSnapshot, ConnectorState, ConnectorStatus};
pub use frame::{parse_command, short_id, Action, CodecError, Frame, RemoteCommand};
pub use session::StationState;
pub use station::{StationObserver, StationSimulator};
