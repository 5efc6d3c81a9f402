//! Per-connector state
//!
//! One [`ConnectorState`] per physical charging port. The record is owned
//! exclusively by the manager task; the outside world only ever sees
//! [`ConnectorSnapshot`]s through the state-publication callback.

use serde::Serialize;
use tokio::task::JoinHandle;

/// Status of a single connector. The simulator only models the two states
/// a session transition can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectorStatus {
    Available,
    Charging,
}

impl std::fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Mutable record for one connector.
///
/// A session is active exactly while `transaction_id` is held; the emitter
/// handle is attached once the session's telemetry task is running and is
/// cancelled by stop or teardown, whichever comes first.
#[derive(Debug)]
pub struct ConnectorState {
    /// Stable identity, assigned sequentially from 1.
    pub connector_id: i32,
    pub status: ConnectorStatus,
    /// Accumulated energy for the current session, in kWh. Reset when a new
    /// session starts, kept after a session stops.
    pub energy_kwh: f64,
    pub transaction_id: Option<String>,
    pub(crate) emitter: Option<JoinHandle<()>>,
}

impl ConnectorState {
    pub fn new(connector_id: i32) -> Self {
        Self {
            connector_id,
            status: ConnectorStatus::Available,
            energy_kwh: 0.0,
            transaction_id: None,
            emitter: None,
        }
    }

    /// A session is active exactly while a transaction id is held.
    pub fn session_active(&self) -> bool {
        self.transaction_id.is_some()
    }

    /// Abort the telemetry emitter, if one is running.
    pub(crate) fn cancel_emitter(&mut self) {
        if let Some(handle) = self.emitter.take() {
            handle.abort();
        }
    }

    pub fn snapshot(&self) -> ConnectorSnapshot {
        ConnectorSnapshot {
            connector_id: self.connector_id,
            status: self.status,
            energy_kwh: self.energy_kwh,
            transaction_id: self.transaction_id.clone(),
            active: self.session_active(),
        }
    }
}

/// Published view of a connector, cheap to clone across threads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSnapshot {
    pub connector_id: i32,
    pub status: ConnectorStatus,
    pub energy_kwh: f64,
    pub transaction_id: Option<String>,
    pub active: bool,
}
