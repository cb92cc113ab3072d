//! Hardware event stream types for Wattson
//!
//! Events arrive from an external detector (out of scope here) as a label
//! plus a loosely structured payload: discrete state transition codes, an
//! optional user/request correlation, and a nested live-telemetry snapshot
//! using the charger's native field names (`CABLE`, `CPV`, `PPV`, `MAX`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known event labels on the wire
pub const CHARGE_START_REQUESTED: &str = "CHARGE_START_REQUESTED";
pub const CHARGE_STARTED: &str = "CHARGE_STARTED";
pub const CHARGE_PAUSED: &str = "CHARGE_PAUSED";
pub const CHARGE_STOPPED: &str = "CHARGE_STOPPED";
pub const CABLE_DISCONNECTED: &str = "CABLE_DISCONNECTED";
pub const FAULT_DETECTED: &str = "FAULT_DETECTED";

/// Kind of hardware event, parsed from its wire label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargerEvent {
    /// An authorization was issued (HTTP side), hardware confirmation pending
    ChargeStartRequested,

    /// The charger confirmed a charge has started
    ChargeStarted,

    /// Charging suspended
    ChargePaused,

    /// Charging finished normally
    ChargeStopped,

    /// Cable pulled while a session was open
    CableDisconnected,

    /// Charger reported a fault condition
    FaultDetected,

    /// Anything else (status updates, telemetry ticks)
    Other(String),
}

impl ChargerEvent {
    /// Parse a wire label into an event kind
    pub fn from_label(label: &str) -> Self {
        match label {
            CHARGE_START_REQUESTED => Self::ChargeStartRequested,
            CHARGE_STARTED => Self::ChargeStarted,
            CHARGE_PAUSED => Self::ChargePaused,
            CHARGE_STOPPED => Self::ChargeStopped,
            CABLE_DISCONNECTED => Self::CableDisconnected,
            FAULT_DETECTED => Self::FaultDetected,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire label for this event kind
    pub fn label(&self) -> &str {
        match self {
            Self::ChargeStartRequested => CHARGE_START_REQUESTED,
            Self::ChargeStarted => CHARGE_STARTED,
            Self::ChargePaused => CHARGE_PAUSED,
            Self::ChargeStopped => CHARGE_STOPPED,
            Self::CableDisconnected => CABLE_DISCONNECTED,
            Self::FaultDetected => FAULT_DETECTED,
            Self::Other(label) => label,
        }
    }
}

/// Payload attached to a hardware event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    /// State the charger transitioned into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_state: Option<i64>,

    /// State the charger transitioned out of
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_state: Option<i64>,

    /// User this event belongs to, when the hardware knows it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Correlation id of the HTTP authorization request, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Live telemetry snapshot in the charger's native field names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,

    /// Any additional fields, carried through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl EventPayload {
    /// Serialize the payload for storage in a session's event log
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn telemetry_f64(data: &Value, key: &str) -> Option<f64> {
    data.get("status")?.get(key)?.as_f64()
}

/// Current sample in amps: live cable sensor first, legacy field as fallback
pub fn current_sample(data: &Value) -> Option<f64> {
    telemetry_f64(data, "CABLE").or_else(|| telemetry_f64(data, "CURRENT"))
}

/// Voltage sample in volts: control-pilot reading first, proximity-pilot as
/// fallback. Both arrive in millivolts.
pub fn voltage_sample(data: &Value) -> Option<f64> {
    telemetry_f64(data, "CPV")
        .or_else(|| telemetry_f64(data, "PPV"))
        .map(|mv| mv / 1000.0)
}

/// Advertised maximum (set) current in amps
pub fn max_current(data: &Value) -> Option<f64> {
    telemetry_f64(data, "MAX")
}

/// State code the event transitioned into
pub fn to_state(data: &Value) -> Option<i64> {
    data.get("to_state").and_then(Value::as_i64)
}

/// Callback invoked synchronously, in arrival order, for each hardware event
pub type EventCallback = Box<dyn Fn(&str, &EventPayload) + Send + Sync>;

/// External event detector: delivers events for this charger strictly in
/// arrival order, one at a time, from a single dispatch thread. Callbacks
/// must not panic.
pub trait EventSource {
    /// Register a callback for all hardware events
    fn register_callback(&mut self, callback: EventCallback);
}
