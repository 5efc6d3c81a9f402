//! Wire codec for the OCPP-like envelope
//!
//! Outgoing frames are 4-element JSON arrays sent one per message:
//! `[2, "<message-id>", "<Action>", {payload}]`. Incoming commands are flat
//! JSON objects carrying a `messageType` field. Anything inbound that does
//! not parse is dropped without an error: the peer is untrusted test
//! infrastructure and tolerance beats strictness here.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::connector::ConnectorStatus;

/// CALL type tag of the wire envelope.
const CALL: i32 = 2;

/// Vendor string reported in BootNotification.
pub const VENDOR: &str = "SimVendor";
/// Model string reported in BootNotification.
pub const MODEL: &str = "SimModel";
/// Authorization tag reported for every simulated transaction.
pub const ID_TAG: &str = "TAG-001";
/// Stop reason reported for locally terminated sessions.
const STOP_REASON_LOCAL: &str = "Local";

/// Errors in building outgoing frames.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outgoing action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    BootNotification,
    Heartbeat,
    StatusNotification,
    StartTransaction,
    StopTransaction,
    MeterValues,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Fresh `TX-`-prefixed uppercase-alphanumeric token. Used for wire message
/// ids and transaction ids alike; cosmetic log-correlation only, never
/// matched against responses.
pub fn short_id() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("TX-{suffix}")
}

// ============================================================================
// Outgoing payloads
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BootNotificationPayload<'a> {
    station_id: &'a str,
    charge_point_vendor: &'a str,
    charge_point_model: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusNotificationPayload<'a> {
    station_id: &'a str,
    connector_id: i32,
    status: ConnectorStatus,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartTransactionPayload<'a> {
    station_id: &'a str,
    connector_id: i32,
    transaction_id: &'a str,
    id_tag: &'a str,
    meter_start: i64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopTransactionPayload<'a> {
    station_id: &'a str,
    connector_id: i32,
    transaction_id: &'a str,
    id_tag: &'a str,
    meter_stop: i64,
    timestamp: DateTime<Utc>,
    reason: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeterValuesPayload<'a> {
    station_id: &'a str,
    connector_id: i32,
    transaction_id: &'a str,
    meter_value: f64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatPayload {
    timestamp: DateTime<Utc>,
}

/// One complete outgoing protocol message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_id: String,
    pub action: Action,
    pub payload: Value,
}

impl Frame {
    fn with_payload<T: Serialize>(action: Action, payload: &T) -> Result<Self, CodecError> {
        Ok(Self {
            message_id: short_id(),
            action,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn boot_notification(station_id: &str) -> Result<Self, CodecError> {
        Self::with_payload(
            Action::BootNotification,
            &BootNotificationPayload {
                station_id,
                charge_point_vendor: VENDOR,
                charge_point_model: MODEL,
            },
        )
    }

    pub fn heartbeat() -> Result<Self, CodecError> {
        Self::with_payload(Action::Heartbeat, &HeartbeatPayload { timestamp: Utc::now() })
    }

    pub fn status_notification(
        station_id: &str,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> Result<Self, CodecError> {
        Self::with_payload(
            Action::StatusNotification,
            &StatusNotificationPayload {
                station_id,
                connector_id,
                status,
                timestamp: Utc::now(),
            },
        )
    }

    pub fn start_transaction(
        station_id: &str,
        connector_id: i32,
        transaction_id: &str,
        meter_start: i64,
    ) -> Result<Self, CodecError> {
        Self::with_payload(
            Action::StartTransaction,
            &StartTransactionPayload {
                station_id,
                connector_id,
                transaction_id,
                id_tag: ID_TAG,
                meter_start,
                timestamp: Utc::now(),
            },
        )
    }

    pub fn stop_transaction(
        station_id: &str,
        connector_id: i32,
        transaction_id: &str,
        meter_stop: i64,
    ) -> Result<Self, CodecError> {
        Self::with_payload(
            Action::StopTransaction,
            &StopTransactionPayload {
                station_id,
                connector_id,
                transaction_id,
                id_tag: ID_TAG,
                meter_stop,
                timestamp: Utc::now(),
                reason: STOP_REASON_LOCAL,
            },
        )
    }

    /// The reported value is the session energy rounded to 3 decimals.
    pub fn meter_values(
        station_id: &str,
        connector_id: i32,
        transaction_id: &str,
        energy_kwh: f64,
    ) -> Result<Self, CodecError> {
        Self::with_payload(
            Action::MeterValues,
            &MeterValuesPayload {
                station_id,
                connector_id,
                transaction_id,
                meter_value: round3(energy_kwh),
                timestamp: Utc::now(),
            },
        )
    }

    /// Serialize to the single-line wire form `[2, id, action, payload]`.
    pub fn to_text(&self) -> Result<String, CodecError> {
        let envelope = json!([CALL, self.message_id, self.action.to_string(), self.payload]);
        Ok(serde_json::to_string(&envelope)?)
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// ============================================================================
// Incoming commands
// ============================================================================

/// The two server commands the simulator reacts to. Every other inbound
/// shape is a forward-compatible no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    StartTransaction { connector_id: i32 },
    StopTransaction { connector_id: i32 },
}

/// Decode one inbound message. Returns `None` for anything other than a
/// well-formed remote start/stop command; malformed input is never an error.
pub fn parse_command(text: &str) -> Option<RemoteCommand> {
    let value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("messageType")?.as_str()?;
    match message_type {
        "RemoteStartTransaction" => Some(RemoteCommand::StartTransaction {
            connector_id: coerce_connector_id(object.get("connectorId"))?,
        }),
        "RemoteStopTransaction" => Some(RemoteCommand::StopTransaction {
            connector_id: coerce_connector_id(object.get("connectorId"))?,
        }),
        _ => None,
    }
}

/// Loose integer coercion the wire contract allows: absent defaults to
/// connector 1, floats truncate toward zero, numeric strings parse. A value
/// that coerces to nothing makes the whole command unparseable.
fn coerce_connector_id(value: Option<&Value>) -> Option<i32> {
    match value {
        None => Some(1),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i).ok()
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i32)
            }
        }
        Some(Value::String(s)) => s.trim().parse::<i32>().ok(),
        Some(_) => None,
    }
}
