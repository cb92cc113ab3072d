//! Shared test doubles for the session manager integration tests.
#![allow(dead_code)]

use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use wattson::error::{Result, WattsonError};
use wattson::events::EventPayload;
use wattson::meter::{EnergyMeter, MeterReading};
use wattson::session::{ChargingSession, SessionStatus};
use wattson::store::{EventRecord, MemoryStore, SessionStore};

/// Meter that replays a scripted list of readings, one per `read_all` call.
pub struct ScriptedMeter {
    connected: bool,
    pub connect_ok: bool,
    pub readings: VecDeque<Option<MeterReading>>,
}

impl ScriptedMeter {
    pub fn with_energy_readings(values: &[f64]) -> Self {
        Self {
            connected: false,
            connect_ok: true,
            readings: values
                .iter()
                .map(|&energy_kwh| {
                    Some(MeterReading {
                        energy_kwh,
                        is_valid: true,
                    })
                })
                .collect(),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            connected: false,
            connect_ok: false,
            readings: VecDeque::new(),
        }
    }
}

impl EnergyMeter for ScriptedMeter {
    fn connect(&mut self) -> Result<bool> {
        self.connected = self.connect_ok;
        Ok(self.connect_ok)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_all(&mut self) -> Result<Option<MeterReading>> {
        Ok(self.readings.pop_front().flatten())
    }
}

/// Store wrapper with switchable failure injection.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_event_writes: AtomicBool,
    pub fail_session_updates: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for FlakyStore {
    fn create_session(&self, session: &ChargingSession) -> Result<()> {
        self.inner.create_session(session)
    }

    fn update_session(&self, session: &ChargingSession) -> Result<()> {
        if self.fail_session_updates.load(Ordering::SeqCst) {
            return Err(WattsonError::persistence("injected update failure"));
        }
        self.inner.update_session(session)
    }

    fn append_event(&self, record: &EventRecord) -> Result<()> {
        if self.fail_event_writes.load(Ordering::SeqCst) {
            return Err(WattsonError::persistence("injected event failure"));
        }
        self.inner.append_event(record)
    }

    fn get_events(&self, session_id: &str) -> Result<Vec<EventRecord>> {
        self.inner.get_events(session_id)
    }

    fn get_current_session(&self) -> Result<Option<ChargingSession>> {
        self.inner.get_current_session()
    }

    fn get_session(&self, session_id: &str) -> Result<Option<ChargingSession>> {
        self.inner.get_session(session_id)
    }

    fn get_sessions(
        &self,
        limit: usize,
        offset: usize,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<Vec<ChargingSession>> {
        self.inner.get_sessions(limit, offset, status, user_id)
    }

    fn get_session_count(
        &self,
        status: Option<SessionStatus>,
        user_id: Option<&str>,
    ) -> Result<usize> {
        self.inner.get_session_count(status, user_id)
    }

    fn cleanup_old_sessions(&self, max_count: usize) -> Result<usize> {
        self.inner.cleanup_old_sessions(max_count)
    }
}

/// Payload for a state transition event.
pub fn transition(from_state: i64, to_state: i64) -> EventPayload {
    EventPayload {
        to_state: Some(to_state),
        from_state: Some(from_state),
        ..EventPayload::default()
    }
}

/// Payload carrying a live telemetry snapshot.
pub fn telemetry(cable_a: f64, cpv_mv: f64, max_a: f64) -> EventPayload {
    EventPayload {
        status: Some(json!({"CABLE": cable_a, "CPV": cpv_mv, "MAX": max_a})),
        ..EventPayload::default()
    }
}
