//! Session manager for Wattson
//!
//! The manager owns "which session is current", consumes the hardware event
//! stream, drives session transitions, and talks to the store and an optional
//! energy meter. Locking is two-level: the coarse slot lock protects the
//! current-session pointer and the pending-authorization map, each session's
//! own lock protects its log and terminal fields. A thread holding the coarse
//! lock may take a session lock; the reverse order is forbidden.

use crate::config::SessionConfig;
use crate::error::Result;
use crate::events::{self, ChargerEvent, EventCallback, EventPayload, EventSource};
use crate::logging::get_logger;
use crate::meter::EnergyMeter;
use crate::metrics::SessionMetricsCalculator;
use crate::session::{ChargingSession, SessionStatus, SharedSession};
use crate::store::{EventRecord, SessionStore};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One cached charge-start authorization, bridging the HTTP request and the
/// hardware confirmation event
struct PendingAuth {
    request_id: Option<String>,
    user_id: String,
    expires_at: DateTime<Utc>,
}

/// State behind the coarse lock
struct Slot {
    session: Option<SharedSession>,
    pending_auth: Vec<PendingAuth>,
}

/// Orchestrator for the charging-session state machine
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    meter: Option<Mutex<Box<dyn EnergyMeter>>>,
    config: SessionConfig,
    slot: Mutex<Slot>,
    logger: crate::logging::StructuredLogger,
}

impl SessionManager {
    /// Build the manager and recover any open session from the store.
    ///
    /// A restart must never silently lose an in-progress charge: if the store
    /// reports a session without an end time, it is rehydrated in full (event
    /// log, metadata, status) as the current session.
    pub fn new(
        store: Arc<dyn SessionStore>,
        meter: Option<Box<dyn EnergyMeter>>,
        config: SessionConfig,
    ) -> Result<Self> {
        let logger = get_logger("session");

        let recovered = store.get_current_session()?;
        if let Some(ref session) = recovered {
            logger.info(&format!(
                "Recovered open session {} from store ({} events)",
                session.session_id,
                session.events.len()
            ));
        }

        Ok(Self {
            store,
            meter: meter.map(Mutex::new),
            config,
            slot: Mutex::new(Slot {
                session: recovered.map(SharedSession::new),
                pending_auth: Vec::new(),
            }),
            logger,
        })
    }

    /// Subscribe this manager to a hardware event detector
    pub fn register_with_event_detector(self: &Arc<Self>, source: &mut dyn EventSource) {
        let manager = Arc::clone(self);
        let callback: EventCallback =
            Box::new(move |event_type, payload| manager.on_event(event_type, payload));
        source.register_callback(callback);
    }

    /// Consume one hardware event.
    ///
    /// This is the single entry point of the dispatch thread and must never
    /// panic or propagate: any error is logged with context and the event is
    /// dropped, keeping the lifecycle loop alive.
    pub fn on_event(&self, event_type: &str, payload: &EventPayload) {
        if let Err(e) = self.handle_event(event_type, payload) {
            self.logger.error(&format!(
                "Error handling event {} (dropped): {}",
                event_type, e
            ));
        }
    }

    fn handle_event(&self, event_type: &str, payload: &EventPayload) -> Result<()> {
        let now = Utc::now();
        match ChargerEvent::from_label(event_type) {
            ChargerEvent::ChargeStartRequested => self.cache_authorization(payload, now),
            ChargerEvent::ChargeStarted => self.handle_charge_started(payload, now),
            ChargerEvent::ChargeStopped => {
                self.handle_session_end(events::CHARGE_STOPPED, payload, now, SessionStatus::Completed)
            }
            ChargerEvent::CableDisconnected => self.handle_session_end(
                events::CABLE_DISCONNECTED,
                payload,
                now,
                SessionStatus::Cancelled,
            ),
            ChargerEvent::FaultDetected => self.handle_fault(payload),
            ChargerEvent::ChargePaused | ChargerEvent::Other(_) => {
                self.append_to_active(event_type, payload)
            }
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// CHARGE_START_REQUESTED: cache the authorization until the hardware
    /// confirms the charge. Entries expire after the configured TTL and are
    /// keyed by request id when the caller supplied one.
    fn cache_authorization(&self, payload: &EventPayload, now: DateTime<Utc>) -> Result<()> {
        let Some(ref user_id) = payload.user_id else {
            self.logger
                .warn("Charge start requested without a user id, nothing to cache");
            return Ok(());
        };

        let mut slot = self.lock_slot();
        Self::purge_expired_auth(&mut slot, now);
        slot.pending_auth.push(PendingAuth {
            request_id: payload.request_id.clone(),
            user_id: user_id.clone(),
            expires_at: now + Duration::seconds(self.config.pending_auth_ttl_secs as i64),
        });
        self.logger.debug(&format!(
            "Cached charge authorization for user {} (pending={})",
            user_id,
            slot.pending_auth.len()
        ));
        Ok(())
    }

    fn purge_expired_auth(slot: &mut Slot, now: DateTime<Utc>) {
        slot.pending_auth.retain(|a| a.expires_at > now);
    }

    /// Consume a cached authorization: by request id when the hardware event
    /// carries one, otherwise the most recently cached unexpired entry.
    fn take_pending_auth(
        slot: &mut Slot,
        request_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        Self::purge_expired_auth(slot, now);

        let index = match request_id {
            Some(rid) => slot
                .pending_auth
                .iter()
                .position(|a| a.request_id.as_deref() == Some(rid)),
            None => None,
        }
        .or_else(|| slot.pending_auth.len().checked_sub(1))?;

        Some(slot.pending_auth.remove(index).user_id)
    }

    /// CHARGE_STARTED: resume a paused session, or force-end an orphaned one
    /// and open a new session.
    fn handle_charge_started(&self, payload: &EventPayload, now: DateTime<Utc>) -> Result<()> {
        let data = payload.to_value();
        let mut slot = self.lock_slot();

        if let Some(current) = slot.session.clone() {
            let last = current.with(|s| s.last_event_type().map(str::to_string));
            if last.as_deref() == Some(events::CHARGE_PAUSED) {
                // Resume: same session, same id
                let snapshot = current.with(|s| {
                    s.add_event(events::CHARGE_STARTED, data.clone());
                    s.clone()
                });
                self.store.update_session(&snapshot)?;
                self.write_event_row(&current, events::CHARGE_STARTED, payload, now);
                self.logger
                    .info(&format!("Resumed charging session {}", current.id()));
                return Ok(());
            }

            // Orphan avoidance: the previous charge never reported an end
            self.logger.warn(&format!(
                "New charge started while session {} still open, force-ending it as cancelled",
                current.id()
            ));
            slot.session = None;
            self.finalize_session(&current, now, payload.from_state, SessionStatus::Cancelled)?;
        }

        let user_id = payload
            .user_id
            .clone()
            .or_else(|| Self::take_pending_auth(&mut slot, payload.request_id.as_deref(), now));

        let mut session = ChargingSession::new(payload.to_state, user_id.as_deref());
        match self.read_meter_energy() {
            Some(energy) => {
                session.set_meta("start_energy_kwh", json!(energy));
                session.set_meta("meter_available", json!(true));
            }
            None => {
                session.set_meta("meter_available", json!(false));
            }
        }
        if let Some(max) = events::max_current(&data) {
            session.set_meta("set_current_a", json!(max));
        }
        session.add_event(events::CHARGE_STARTED, data);

        // Primary write: a session that cannot be recorded is not accepted
        self.store.create_session(&session)?;

        self.logger.info(&format!(
            "Started charging session {} (user={})",
            session.session_id,
            user_id.as_deref().unwrap_or("unknown")
        ));

        let shared = SharedSession::new(session);
        self.write_event_row(&shared, events::CHARGE_STARTED, payload, now);
        slot.session = Some(shared);
        Ok(())
    }

    /// CHARGE_STOPPED / CABLE_DISCONNECTED: close the current session
    fn handle_session_end(
        &self,
        label: &str,
        payload: &EventPayload,
        now: DateTime<Utc>,
        status: SessionStatus,
    ) -> Result<()> {
        let mut slot = self.lock_slot();
        let Some(current) = slot.session.take() else {
            self.logger
                .debug(&format!("{} with no active session, dropping", label));
            return Ok(());
        };

        current.add_event(label, payload.to_value());
        self.write_event_row(&current, label, payload, now);
        self.finalize_session(&current, now, payload.to_state, status)
    }

    /// FAULT_DETECTED: overlay the fault flag, the session stays open until a
    /// stop or disconnect event ends it.
    fn handle_fault(&self, payload: &EventPayload) -> Result<()> {
        let now = Utc::now();
        let slot = self.lock_slot();
        let Some(current) = slot.session.clone() else {
            self.logger
                .debug("Fault detected with no active session, dropping");
            return Ok(());
        };
        drop(slot);

        let snapshot = current.with(|s| {
            s.status = SessionStatus::Faulted;
            s.add_event(events::FAULT_DETECTED, payload.to_value());
            s.clone()
        });
        self.write_event_row(&current, events::FAULT_DETECTED, payload, now);
        self.logger.warn(&format!(
            "Session {} marked as faulted (still open)",
            current.id()
        ));

        self.store.update_session(&snapshot)
    }

    /// Telemetry and other events: append to the active session, if any
    fn append_to_active(&self, event_type: &str, payload: &EventPayload) -> Result<()> {
        let now = Utc::now();
        // Snapshot the pointer under the coarse lock; never touch it unlocked
        let current = self.lock_slot().session.clone();
        let Some(current) = current else {
            self.logger
                .trace(&format!("{} with no active session, dropping", event_type));
            return Ok(());
        };

        let data = payload.to_value();
        let snapshot = current.with(|s| {
            if s.get_meta("set_current_a").is_none()
                && let Some(max) = events::max_current(&data)
            {
                s.set_meta("set_current_a", json!(max));
            }
            s.add_event(event_type, data.clone());
            s.clone()
        });
        // Primary write: the session row carries the log, so pause and
        // telemetry events survive a restart
        self.store.update_session(&snapshot)?;
        self.write_event_row(&current, event_type, payload, now);
        Ok(())
    }

    /// Freeze the session, derive metrics over its full log, reconcile
    /// metered vs. estimated energy, and persist terminal state and metrics
    /// in one write.
    fn finalize_session(
        &self,
        session: &SharedSession,
        end_time: DateTime<Utc>,
        end_state: Option<i64>,
        status: SessionStatus,
    ) -> Result<()> {
        let frozen = session.with(|s| {
            s.end_session(end_time, end_state, status);
            s.clone()
        });

        let mut calc = SessionMetricsCalculator::new();
        for event in &frozen.events {
            calc.add_event(event);
        }
        let mut metrics = calc.calculate_metrics(frozen.start_time, end_time);
        metrics.event_count = frozen.events.len();

        let start_energy = frozen.get_meta("start_energy_kwh").and_then(Value::as_f64);
        let meter_energy = self.read_meter_energy();
        let metered = match (meter_energy, start_energy) {
            (Some(end), Some(start)) => Some((end, (end - start).max(0.0))),
            _ => None,
        };
        if let Some((_, delta)) = metered {
            metrics.total_energy_kwh = Some(delta);
        }

        let final_snapshot = session.with(|s| {
            if let Some((end, _)) = metered {
                s.set_meta("end_energy_kwh", json!(end));
                s.set_meta("energy_source", json!("meter"));
            } else {
                s.set_meta("energy_source", json!("calculated"));
            }
            if s.get_meta("set_current_a").is_none()
                && let Some(max) = calc.set_current_a()
            {
                s.set_meta("set_current_a", json!(max));
            }
            s.metrics = Some(metrics.clone());
            s.clone()
        });

        self.logger.info(&format!(
            "Ended charging session {} as {} ({} kWh, {})",
            frozen.session_id,
            status.as_str(),
            metrics
                .total_energy_kwh
                .map_or_else(|| "?".to_string(), |e| format!("{:.4}", e)),
            if metered.is_some() { "meter" } else { "calculated" },
        ));

        // Primary write: terminal state plus all computed metrics together
        self.store.update_session(&final_snapshot)
    }

    /// Append one normalized event row with denormalized electrical fields
    /// to the query table. Best-effort: the session row already carries the
    /// authoritative log, so a failed row write is logged and swallowed.
    fn write_event_row(
        &self,
        session: &SharedSession,
        event_type: &str,
        payload: &EventPayload,
        timestamp: DateTime<Utc>,
    ) {
        let data = payload.to_value();
        let current_a = events::current_sample(&data);
        let voltage_v = events::voltage_sample(&data);
        let power_kw = match (current_a, voltage_v) {
            (Some(a), Some(v)) => Some(v * a / 1000.0),
            _ => None,
        };

        let record = EventRecord {
            session_id: session.id().to_string(),
            event_type: event_type.to_string(),
            timestamp,
            from_state: payload.from_state,
            to_state: payload.to_state,
            current_a,
            voltage_v,
            power_kw,
            user_id: session.with(|s| s.user_id().map(str::to_string)),
            data,
        };

        if let Err(e) = self.store.append_event(&record) {
            self.logger
                .warn(&format!("Failed to write event row (non-fatal): {}", e));
        }
    }

    /// Read the lifetime energy counter, degrading gracefully: any failure is
    /// logged and reported as "no reading".
    fn read_meter_energy(&self) -> Option<f64> {
        let meter = self.meter.as_ref()?;
        let mut meter = meter.lock().unwrap_or_else(PoisonError::into_inner);

        if !meter.is_connected() {
            match meter.connect() {
                Ok(true) => {}
                Ok(false) => {
                    self.logger.warn("Meter not connected, skipping read");
                    return None;
                }
                Err(e) => {
                    self.logger
                        .warn(&format!("Meter connect failed (non-fatal): {}", e));
                    return None;
                }
            }
        }

        match meter.read_all() {
            Ok(Some(reading)) if reading.is_valid => Some(reading.energy_kwh),
            Ok(_) => {
                self.logger.warn("Meter returned no valid reading");
                None
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Meter read failed (non-fatal): {}", e));
                None
            }
        }
    }

    /// Snapshot of the current session, if one is open
    pub fn get_current_session(&self) -> Option<ChargingSession> {
        let current = self.lock_slot().session.clone();
        current.map(|s| s.snapshot())
    }

    /// One session by id: the live one if it matches, otherwise from the store
    pub fn get_session(&self, session_id: &str) -> Result<Option<ChargingSession>> {
        let current = self.lock_slot().session.clone();
        if let Some(current) = current
            && current.id() == session_id
        {
            return Ok(Some(current.snapshot()));
        }
        self.store.get_session(session_id)
    }

    /// Persisted sessions, newest-first, with optional filters
    pub fn get_sessions(
        &self,
        limit: usize,
        offset: usize,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<Vec<ChargingSession>> {
        self.store.get_sessions(limit, offset, status, user_id)
    }

    /// Count of persisted sessions matching the filters
    pub fn get_session_count(
        &self,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<usize> {
        self.store.get_session_count(status, user_id)
    }

    /// Trim the store to the configured retention cap
    pub fn cleanup_old_sessions(&self) -> Result<usize> {
        self.store
            .cleanup_old_sessions(self.config.max_retained_sessions)
    }

    /// JSON summary for the API layer
    pub fn sessions_snapshot(&self) -> Value {
        match self.get_current_session() {
            Some(session) => json!({
                "session_active": true,
                "current_session": session.to_json(),
            }),
            None => json!({
                "session_active": false,
                "current_session": Value::Null,
            }),
        }
    }
}
