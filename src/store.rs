//! Session store for Wattson
//!
//! One store holds session rows and per-event rows. The session row carries
//! the authoritative event log; the event rows are a denormalized,
//! best-effort table for range queries and may lag behind the log.
//! [`JsonFileStore`] persists the store as a single JSON document on local
//! disk, loaded on open and written after every mutation. [`MemoryStore`]
//! backs tests and dry runs.

use crate::error::{Result, WattsonError};
use crate::logging::get_logger;
use crate::metrics::SessionMetrics;
use crate::session::{ChargingSession, SessionEvent, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Normalized per-event row with denormalized electrical fields for
/// efficient range queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Session this event belongs to
    pub session_id: String,

    /// Wire label of the event
    pub event_type: String,

    /// When the event was recorded
    pub timestamp: DateTime<Utc>,

    /// State the charger transitioned out of
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_state: Option<i64>,

    /// State the charger transitioned into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_state: Option<i64>,

    /// Current sample in amps, when the payload carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_a: Option<f64>,

    /// Voltage sample in volts, when the payload carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage_v: Option<f64>,

    /// Instantaneous power in kW, when both samples were present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_kw: Option<f64>,

    /// User attached to the session at the time of the event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Raw event payload
    pub data: Value,
}

/// Session row, carrying the authoritative event log for the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub start_state: Option<i64>,
    pub end_state: Option<i64>,
    pub status: SessionStatus,
    #[serde(default)]
    pub events: Vec<SessionEvent>,
    pub metadata: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SessionMetrics>,
}

impl SessionRow {
    fn from_session(session: &ChargingSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            start_state: session.start_state,
            end_state: session.end_state,
            status: session.status,
            events: session.events.clone(),
            metadata: session.metadata.clone(),
            metrics: session.metrics.clone(),
        }
    }

    fn user_id(&self) -> Option<&str> {
        self.metadata.get("user_id").and_then(Value::as_str)
    }
}

/// Row store consumed by the session manager.
///
/// `create_session` and `update_session` are the primary writes and carry
/// the session's full event log; failures there must propagate.
/// `append_event` feeds the denormalized query table and is best-effort
/// from the caller's point of view.
pub trait SessionStore: Send + Sync {
    /// Insert a new session row
    fn create_session(&self, session: &ChargingSession) -> Result<()>;

    /// Replace the row for an existing session, event log included
    fn update_session(&self, session: &ChargingSession) -> Result<()>;

    /// Append one normalized event row to the query table
    fn append_event(&self, record: &EventRecord) -> Result<()>;

    /// Event rows recorded for one session, oldest first
    fn get_events(&self, session_id: &str) -> Result<Vec<EventRecord>>;

    /// Newest session without an end time
    fn get_current_session(&self) -> Result<Option<ChargingSession>>;

    /// One session by id
    fn get_session(&self, session_id: &str) -> Result<Option<ChargingSession>>;

    /// Sessions newest-first with optional status/user filters
    fn get_sessions(
        &self,
        limit: usize,
        offset: usize,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<Vec<ChargingSession>>;

    /// Count of sessions matching the filters
    fn get_session_count(
        &self,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<usize>;

    /// Drop the oldest finished sessions beyond `max_count`, with their event
    /// rows; open sessions are never dropped. Returns how many were removed.
    fn cleanup_old_sessions(&self, max_count: usize) -> Result<usize>;
}

/// In-memory document shared by both backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDoc {
    sessions: Vec<SessionRow>,
    events: Vec<EventRecord>,
}

impl StoreDoc {
    fn create_session(&mut self, session: &ChargingSession) -> Result<()> {
        if self.sessions.iter().any(|s| s.session_id == session.session_id) {
            return Err(WattsonError::persistence(format!(
                "Session {} already exists",
                session.session_id
            )));
        }
        self.sessions.push(SessionRow::from_session(session));
        Ok(())
    }

    fn update_session(&mut self, session: &ChargingSession) -> Result<()> {
        let row = self
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session.session_id)
            .ok_or_else(|| {
                WattsonError::persistence(format!("Session {} not found", session.session_id))
            })?;
        *row = SessionRow::from_session(session);
        Ok(())
    }

    fn append_event(&mut self, record: &EventRecord) {
        self.events.push(record.clone());
    }

    fn materialize(row: &SessionRow) -> ChargingSession {
        ChargingSession {
            session_id: row.session_id.clone(),
            start_time: row.start_time,
            end_time: row.end_time,
            start_state: row.start_state,
            end_state: row.end_state,
            status: row.status,
            events: row.events.clone(),
            metadata: row.metadata.clone(),
            metrics: row.metrics.clone(),
        }
    }

    fn get_events(&self, session_id: &str) -> Vec<EventRecord> {
        self.events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect()
    }

    fn get_current_session(&self) -> Option<ChargingSession> {
        self.sessions
            .iter()
            .filter(|s| s.end_time.is_none())
            .max_by_key(|s| s.start_time)
            .map(Self::materialize)
    }

    fn get_session(&self, session_id: &str) -> Option<ChargingSession> {
        self.sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .map(Self::materialize)
    }

    fn matches(row: &SessionRow, status: Option<SessionStatus>, user_id: Option<&str>) -> bool {
        if let Some(status) = status
            && row.status != status
        {
            return false;
        }
        if let Some(user_id) = user_id
            && row.user_id() != Some(user_id)
        {
            return false;
        }
        true
    }

    fn get_sessions(
        &self,
        limit: usize,
        offset: usize,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Vec<ChargingSession> {
        let mut rows: Vec<&SessionRow> = self
            .sessions
            .iter()
            .filter(|s| Self::matches(s, status, user_id))
            .collect();
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        rows.into_iter()
            .skip(offset)
            .take(limit)
            .map(Self::materialize)
            .collect()
    }

    fn get_session_count(&self, status: Option<SessionStatus>, user_id: Option<&str>) -> usize {
        self.sessions
            .iter()
            .filter(|s| Self::matches(s, status, user_id))
            .count()
    }

    fn cleanup_old_sessions(&mut self, max_count: usize) -> usize {
        let mut finished: Vec<(DateTime<Utc>, String)> = self
            .sessions
            .iter()
            .filter(|s| s.end_time.is_some())
            .map(|s| (s.start_time, s.session_id.clone()))
            .collect();
        if finished.len() <= max_count {
            return 0;
        }

        // Oldest first; everything beyond the retention cap goes
        let overflow = finished.len() - max_count;
        finished.sort_by(|a, b| a.0.cmp(&b.0));
        let drop_ids: Vec<String> = finished
            .into_iter()
            .take(overflow)
            .map(|(_, id)| id)
            .collect();

        self.sessions.retain(|s| !drop_ids.contains(&s.session_id));
        self.events.retain(|e| !drop_ids.contains(&e.session_id));
        drop_ids.len()
    }
}

/// File-backed session store: one pretty-printed JSON document on local disk
pub struct JsonFileStore {
    file_path: String,
    doc: Mutex<StoreDoc>,
    logger: crate::logging::StructuredLogger,
}

impl JsonFileStore {
    /// Open the store, loading the existing document if one is present
    pub fn open(file_path: &str) -> Result<Self> {
        let logger = get_logger("store");
        let path = Path::new(file_path);

        let doc = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let doc: StoreDoc = serde_json::from_str(&contents)?;
            logger.info(&format!(
                "Loaded session store from disk ({} sessions, {} events)",
                doc.sessions.len(),
                doc.events.len()
            ));
            doc
        } else {
            logger.info("No session store file found, starting empty");
            StoreDoc::default()
        };

        Ok(Self {
            file_path: file_path.to_string(),
            doc: Mutex::new(doc),
            logger,
        })
    }

    fn save(&self, doc: &StoreDoc) -> Result<()> {
        let contents = serde_json::to_string_pretty(doc)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug("Saved session store to disk");
        Ok(())
    }

    fn with_doc<R>(
        &self,
        f: impl FnOnce(&mut StoreDoc) -> Result<R>,
        persist: bool,
    ) -> Result<R> {
        let mut doc = self.doc.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut doc)?;
        if persist {
            self.save(&doc)?;
        }
        Ok(out)
    }
}

impl SessionStore for JsonFileStore {
    fn create_session(&self, session: &ChargingSession) -> Result<()> {
        self.with_doc(|doc| doc.create_session(session), true)
    }

    fn update_session(&self, session: &ChargingSession) -> Result<()> {
        self.with_doc(|doc| doc.update_session(session), true)
    }

    fn append_event(&self, record: &EventRecord) -> Result<()> {
        self.with_doc(
            |doc| {
                doc.append_event(record);
                Ok(())
            },
            true,
        )
    }

    fn get_events(&self, session_id: &str) -> Result<Vec<EventRecord>> {
        self.with_doc(|doc| Ok(doc.get_events(session_id)), false)
    }

    fn get_current_session(&self) -> Result<Option<ChargingSession>> {
        self.with_doc(|doc| Ok(doc.get_current_session()), false)
    }

    fn get_session(&self, session_id: &str) -> Result<Option<ChargingSession>> {
        self.with_doc(|doc| Ok(doc.get_session(session_id)), false)
    }

    fn get_sessions(
        &self,
        limit: usize,
        offset: usize,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<Vec<ChargingSession>> {
        self.with_doc(
            |doc| Ok(doc.get_sessions(limit, offset, status, user_id)),
            false,
        )
    }

    fn get_session_count(
        &self,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<usize> {
        self.with_doc(|doc| Ok(doc.get_session_count(status, user_id)), false)
    }

    fn cleanup_old_sessions(&self, max_count: usize) -> Result<usize> {
        let removed = self.with_doc(|doc| Ok(doc.cleanup_old_sessions(max_count)), true)?;
        if removed > 0 {
            self.logger
                .info(&format!("Removed {} old sessions from store", removed));
        }
        Ok(removed)
    }
}

/// In-memory session store for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDoc>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn with_doc<R>(&self, f: impl FnOnce(&mut StoreDoc) -> R) -> R {
        let mut doc = self.doc.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut doc)
    }
}

impl SessionStore for MemoryStore {
    fn create_session(&self, session: &ChargingSession) -> Result<()> {
        self.with_doc(|doc| doc.create_session(session))
    }

    fn update_session(&self, session: &ChargingSession) -> Result<()> {
        self.with_doc(|doc| doc.update_session(session))
    }

    fn append_event(&self, record: &EventRecord) -> Result<()> {
        self.with_doc(|doc| {
            doc.append_event(record);
            Ok(())
        })
    }

    fn get_events(&self, session_id: &str) -> Result<Vec<EventRecord>> {
        self.with_doc(|doc| Ok(doc.get_events(session_id)))
    }

    fn get_current_session(&self) -> Result<Option<ChargingSession>> {
        self.with_doc(|doc| Ok(doc.get_current_session()))
    }

    fn get_session(&self, session_id: &str) -> Result<Option<ChargingSession>> {
        self.with_doc(|doc| Ok(doc.get_session(session_id)))
    }

    fn get_sessions(
        &self,
        limit: usize,
        offset: usize,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<Vec<ChargingSession>> {
        self.with_doc(|doc| Ok(doc.get_sessions(limit, offset, status, user_id)))
    }

    fn get_session_count(
        &self,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<usize> {
        self.with_doc(|doc| Ok(doc.get_session_count(status, user_id)))
    }

    fn cleanup_old_sessions(&self, max_count: usize) -> Result<usize> {
        self.with_doc(|doc| Ok(doc.cleanup_old_sessions(max_count)))
    }
}
