//! Station configuration
//!
//! Connection parameters for a single connect attempt. Built once and
//! validated before the simulator starts; reconfiguring while connected is
//! refused by the manager.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by [`StationConfig::validate`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CSMS URL must not be empty")]
    EmptyUrl,

    #[error("station id must not be empty")]
    EmptyStationId,

    #[error("connector count must be at least 1, got {0}")]
    NoConnectors(u32),

    #[error("heartbeat interval must be at least 1s, got {0:?}")]
    HeartbeatTooShort(Duration),

    #[error("simulation speed must be positive, got {0}")]
    InvalidSimSpeed(f64),
}

/// Connection parameters for one connect attempt.
#[derive(Debug, Clone)]
pub struct StationConfig {
    /// CSMS WebSocket URL.
    pub url: String,

    /// Station identity reported in every frame.
    pub station_id: String,

    /// Number of connectors; ids are assigned 1..=count.
    pub connector_count: u32,

    /// Delay between Heartbeat frames.
    pub heartbeat_interval: Duration,

    /// Start a session on connector 1 right after the handshake.
    pub auto_start: bool,

    /// Simulated-time multiplier: scales energy accrual up and the
    /// telemetry interval down by the same factor.
    pub sim_speed: f64,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8081/ocpp/ws".to_string(),
            station_id: "CS-001".to_string(),
            connector_count: 1,
            heartbeat_interval: Duration::from_secs(30),
            auto_start: false,
            sim_speed: 1.0,
        }
    }
}

impl StationConfig {
    pub fn new(url: impl Into<String>, station_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            station_id: station_id.into(),
            ..Default::default()
        }
    }

    pub fn with_connectors(mut self, count: u32) -> Self {
        self.connector_count = count;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_sim_speed(mut self, speed: f64) -> Self {
        self.sim_speed = speed;
        self
    }

    /// Check the invariants the manager relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if self.station_id.trim().is_empty() {
            return Err(ConfigError::EmptyStationId);
        }
        if self.connector_count < 1 {
            return Err(ConfigError::NoConnectors(self.connector_count));
        }
        if self.heartbeat_interval < Duration::from_secs(1) {
            return Err(ConfigError::HeartbeatTooShort(self.heartbeat_interval));
        }
        if !(self.sim_speed > 0.0) {
            return Err(ConfigError::InvalidSimSpeed(self.sim_speed));
        }
        Ok(())
    }

    /// Telemetry emitter period: two simulated seconds, compressed by the
    /// speed multiplier.
    pub fn telemetry_period(&self) -> Duration {
        Duration::from_secs_f64(2.0 / self.sim_speed)
    }

    /// The URL actually dialed. The CSMS under test routes stations by a
    /// `station_id` query parameter, so one is appended when missing.
    pub fn connect_url(&self) -> String {
        normalize_url(&self.url, &self.station_id)
    }
}

/// Append `station_id=<id>` to `url` unless the parameter is already there.
pub fn normalize_url(url: &str, station_id: &str) -> String {
    if url.contains("station_id=") {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}station_id={station_id}")
}
