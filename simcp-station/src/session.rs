//! Per-connector session transitions
//!
//! [`StationState`] owns the connector array and applies start, stop, and
//! meter-tick transitions, handing back the frame each transition puts on
//! the wire. Socket and task plumbing live in [`crate::station`]; keeping
//! the transitions synchronous keeps them testable without a peer.

use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::StationConfig;
use crate::connector::{ConnectorSnapshot, ConnectorState, ConnectorStatus};
use crate::frame::{short_id, Frame};

/// Station-level state: identity plus one record per connector.
pub struct StationState {
    station_id: String,
    sim_speed: f64,
    connectors: Vec<ConnectorState>,
}

impl StationState {
    /// Build the full connector array from scratch, ids 1..=count, each
    /// Available and idle.
    pub fn new(config: &StationConfig) -> Self {
        let connectors = (1..=config.connector_count as i32)
            .map(ConnectorState::new)
            .collect();
        Self {
            station_id: config.station_id.clone(),
            sim_speed: config.sim_speed,
            connectors,
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn connectors(&self) -> &[ConnectorState] {
        &self.connectors
    }

    pub fn snapshots(&self) -> Vec<ConnectorSnapshot> {
        self.connectors.iter().map(ConnectorState::snapshot).collect()
    }

    /// Handshake StatusNotification frames, in connector order. Every
    /// connector reports Available at this point regardless of leftover
    /// state from a previous attempt.
    pub fn initial_status_frames(&self) -> Vec<Frame> {
        self.connectors
            .iter()
            .filter_map(|c| {
                Frame::status_notification(
                    &self.station_id,
                    c.connector_id,
                    ConnectorStatus::Available,
                )
                .ok()
            })
            .collect()
    }

    /// Begin a session. Unknown connectors and connectors already charging
    /// are silently refused; otherwise returns the StartTransaction frame
    /// to send. The caller publishes state, sends, then attaches the
    /// emitter it spawned.
    pub fn start_session(&mut self, connector_id: i32) -> Option<Frame> {
        let connector = self.connector_mut(connector_id)?;
        if connector.session_active() {
            debug!(connector_id, "start ignored, session already active");
            return None;
        }

        let transaction_id = short_id();
        connector.transaction_id = Some(transaction_id.clone());
        connector.status = ConnectorStatus::Charging;
        connector.energy_kwh = 0.0;
        let meter_start = (connector.energy_kwh * 1000.0) as i64;

        Frame::start_transaction(&self.station_id, connector_id, &transaction_id, meter_start).ok()
    }

    /// Attach the telemetry task started for a connector so stop and
    /// teardown can cancel it.
    pub fn attach_emitter(&mut self, connector_id: i32, handle: JoinHandle<()>) {
        match self.connector_mut(connector_id) {
            Some(connector) => connector.emitter = Some(handle),
            None => handle.abort(),
        }
    }

    /// End a session. Unknown or idle connectors are silently refused. The
    /// returned StopTransaction frame carries the transaction id and meter
    /// value captured before the record is cleared.
    pub fn stop_session(&mut self, connector_id: i32) -> Option<Frame> {
        let connector = self.connector_mut(connector_id)?;
        let transaction_id = connector.transaction_id.take()?;
        connector.cancel_emitter();
        let meter_stop = (connector.energy_kwh * 1000.0) as i64;
        connector.status = ConnectorStatus::Available;

        Frame::stop_transaction(&self.station_id, connector_id, &transaction_id, meter_stop).ok()
    }

    /// Advance simulated energy by one telemetry interval and return the
    /// MeterValues frame, or `None` when the session ended in the meantime
    /// (a tick can still be queued while cancellation lands).
    pub fn meter_tick(&mut self, connector_id: i32) -> Option<Frame> {
        let sim_speed = self.sim_speed;
        let connector = self.connector_mut(connector_id)?;
        let transaction_id = connector.transaction_id.clone()?;
        connector.energy_kwh += 0.1 * sim_speed;
        let energy_kwh = connector.energy_kwh;

        Frame::meter_values(&self.station_id, connector_id, &transaction_id, energy_kwh).ok()
    }

    /// Cancel every running emitter; part of teardown.
    pub fn cancel_emitters(&mut self) {
        for connector in &mut self.connectors {
            connector.cancel_emitter();
        }
    }

    fn connector_mut(&mut self, connector_id: i32) -> Option<&mut ConnectorState> {
        self.connectors
            .iter_mut()
            .find(|c| c.connector_id == connector_id)
    }
}
