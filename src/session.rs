//! Charging session aggregate for Wattson
//!
//! A [`ChargingSession`] is the record of one charge attempt: an append-only
//! event log plus boundary metadata. It is created only by the session
//! manager on a qualifying start event and retired into a read-only persisted
//! record once ended. [`SharedSession`] is the fine-grained lock wrapper the
//! manager hands around; the coarse "which session is current" lock lives in
//! the manager itself.

use crate::metrics::SessionMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// Session status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Session is currently open
    Active,

    /// Session completed normally
    Completed,

    /// Session was force-ended (cable pulled, orphaned start)
    Cancelled,

    /// Charger reported a fault; overlay only, the session may still be open
    Faulted,
}

impl SessionStatus {
    /// Protocol name for this status
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Faulted => "FAULTED",
        }
    }
}

/// One entry in a session's event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Wire label of the event
    pub event_type: String,

    /// When the event was appended
    pub timestamp: DateTime<Utc>,

    /// Raw event payload
    pub data: Value,
}

/// One charge attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingSession {
    /// Unique session ID, assigned at creation
    pub session_id: String,

    /// Start time of the session
    pub start_time: DateTime<Utc>,

    /// End time of the session; `None` exactly while the session is open
    pub end_time: Option<DateTime<Utc>>,

    /// Charger state code when the session started
    pub start_state: Option<i64>,

    /// Charger state code when the session ended
    pub end_state: Option<i64>,

    /// Session status
    pub status: SessionStatus,

    /// Append-only ordered event log
    pub events: Vec<SessionEvent>,

    /// Mutable scratch map: user_id, set_current_a, start/end_energy_kwh,
    /// meter_available, energy_source
    pub metadata: serde_json::Map<String, Value>,

    /// Aggregate metrics, attached when the session ends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SessionMetrics>,
}

impl ChargingSession {
    /// Create a new active session starting now
    pub fn new(start_state: Option<i64>, user_id: Option<&str>) -> Self {
        let mut metadata = serde_json::Map::new();
        if let Some(user_id) = user_id {
            metadata.insert("user_id".to_string(), Value::String(user_id.to_string()));
        }

        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            end_time: None,
            start_state,
            end_state: None,
            status: SessionStatus::Active,
            events: Vec::new(),
            metadata,
            metrics: None,
        }
    }

    /// Append an event to the log, timestamped now
    pub fn add_event(&mut self, event_type: &str, data: Value) {
        self.events.push(SessionEvent {
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            data,
        });
    }

    /// Set the terminal fields
    pub fn end_session(
        &mut self,
        end_time: DateTime<Utc>,
        end_state: Option<i64>,
        status: SessionStatus,
    ) {
        self.end_time = Some(end_time);
        self.end_state = end_state;
        self.status = status;
    }

    /// Session duration; `None` while the session is open
    pub fn duration_seconds(&self) -> Option<i64> {
        self.end_time.map(|end| (end - self.start_time).num_seconds())
    }

    /// Wire label of the most recently appended event
    pub fn last_event_type(&self) -> Option<&str> {
        self.events.last().map(|e| e.event_type.as_str())
    }

    /// Set a metadata key
    pub fn set_meta(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Read a metadata key
    pub fn get_meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// User this session belongs to, if known
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get("user_id").and_then(Value::as_str)
    }

    /// JSON view of the session, with the derived duration attached
    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "duration_seconds".to_string(),
                match self.duration_seconds() {
                    Some(secs) => secs.into(),
                    None => Value::Null,
                },
            );
        }
        value
    }
}

/// Shared handle to one session, guarded by the session's own lock
#[derive(Clone)]
pub struct SharedSession {
    id: String,
    inner: Arc<Mutex<ChargingSession>>,
}

impl SharedSession {
    /// Wrap a session in its own lock
    pub fn new(session: ChargingSession) -> Self {
        Self {
            id: session.session_id.clone(),
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Session id, readable without taking the lock
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run a closure with exclusive access to the session
    pub fn with<R>(&self, f: impl FnOnce(&mut ChargingSession) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Append an event under the session lock
    pub fn add_event(&self, event_type: &str, data: Value) {
        self.with(|s| s.add_event(event_type, data));
    }

    /// Set the terminal fields under the session lock
    pub fn end_session(
        &self,
        end_time: DateTime<Utc>,
        end_state: Option<i64>,
        status: SessionStatus,
    ) {
        self.with(|s| s.end_session(end_time, end_state, status));
    }

    /// Consistent point-in-time copy of the session
    pub fn snapshot(&self) -> ChargingSession {
        self.with(|s| s.clone())
    }
}
