mod common;

use common::{FlakyStore, ScriptedMeter, telemetry, transition};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use wattson::SessionManager;
use wattson::config::SessionConfig;
use wattson::events::EventPayload;
use wattson::session::SessionStatus;
use wattson::store::{MemoryStore, SessionStore};

fn manager_with(
    store: Arc<dyn SessionStore>,
    meter: Option<ScriptedMeter>,
) -> Arc<SessionManager> {
    let meter = meter.map(|m| Box::new(m) as Box<dyn wattson::meter::EnergyMeter>);
    Arc::new(SessionManager::new(store, meter, SessionConfig::default()).unwrap())
}

#[test]
fn start_then_stop_creates_exactly_one_completed_session() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store.clone(), None);

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    mgr.on_event("STATUS", &telemetry(16.0, 3700.0, 16.0));
    mgr.on_event("CHARGE_STOPPED", &transition(3, 5));

    assert!(mgr.get_current_session().is_none());
    let sessions = store.get_sessions(10, 0, None, None).unwrap();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.end_time.is_some());
    assert_eq!(session.end_state, Some(5));
    let metrics = session.metrics.as_ref().unwrap();
    assert_eq!(metrics.event_count, 3);
    assert_eq!(metrics.max_current_a, Some(16.0));
}

#[test]
fn cable_disconnect_always_ends_cancelled() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store.clone(), None);

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    mgr.on_event("CABLE_DISCONNECTED", &transition(3, 0));

    let sessions = store.get_sessions(10, 0, None, None).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Cancelled);
}

#[test]
fn resume_after_pause_keeps_the_session_id() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store.clone(), None);

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    let first_id = mgr.get_current_session().unwrap().session_id;

    mgr.on_event("CHARGE_PAUSED", &transition(3, 4));
    mgr.on_event("CHARGE_STARTED", &transition(4, 3));

    let current = mgr.get_current_session().unwrap();
    assert_eq!(current.session_id, first_id);
    assert_eq!(store.get_session_count(None, None).unwrap(), 1);
    // The resume is part of the same log
    assert_eq!(current.events.len(), 3);
}

#[test]
fn double_start_cancels_first_and_allocates_new_id() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store.clone(), None);

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    let first_id = mgr.get_current_session().unwrap().session_id;

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    let second_id = mgr.get_current_session().unwrap().session_id;

    assert_ne!(first_id, second_id);
    let first = store.get_session(&first_id).unwrap().unwrap();
    assert_eq!(first.status, SessionStatus::Cancelled);
    assert!(first.end_time.is_some());
    assert_eq!(store.get_session_count(None, None).unwrap(), 2);
}

#[test]
fn fault_is_an_overlay_not_an_end() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store.clone(), None);

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    mgr.on_event("FAULT_DETECTED", &transition(3, 6));

    let current = mgr.get_current_session().unwrap();
    assert_eq!(current.status, SessionStatus::Faulted);
    assert!(current.end_time.is_none());

    // A subsequent stop still ends the session
    mgr.on_event("CHARGE_STOPPED", &transition(6, 5));
    assert!(mgr.get_current_session().is_none());
    let sessions = store.get_sessions(10, 0, None, None).unwrap();
    assert_eq!(sessions[0].status, SessionStatus::Completed);
}

#[test]
fn events_without_a_session_are_dropped() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store.clone(), None);

    mgr.on_event("STATUS", &telemetry(16.0, 3700.0, 16.0));
    mgr.on_event("CHARGE_STOPPED", &transition(3, 5));
    mgr.on_event("CABLE_DISCONNECTED", &transition(3, 0));
    mgr.on_event("FAULT_DETECTED", &transition(3, 6));

    assert!(mgr.get_current_session().is_none());
    assert_eq!(store.get_session_count(None, None).unwrap(), 0);
}

#[test]
fn metered_energy_preferred_over_estimate() {
    let store = Arc::new(MemoryStore::new());
    let meter = ScriptedMeter::with_energy_readings(&[100.0, 102.5]);
    let mgr = manager_with(store.clone(), Some(meter));

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    mgr.on_event("STATUS", &telemetry(16.0, 3700.0, 16.0));
    mgr.on_event("CHARGE_STOPPED", &transition(3, 5));

    let session = &store.get_sessions(10, 0, None, None).unwrap()[0];
    let metrics = session.metrics.as_ref().unwrap();
    assert!((metrics.total_energy_kwh.unwrap() - 2.5).abs() < 1e-9);
    assert_eq!(
        session.metadata.get("energy_source").and_then(|v| v.as_str()),
        Some("meter")
    );
    assert_eq!(
        session.metadata.get("meter_available").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        session.metadata.get("end_energy_kwh").and_then(|v| v.as_f64()),
        Some(102.5)
    );
}

#[test]
fn meter_regression_never_goes_negative() {
    // A meter that jumps backwards (reset) clamps the delta at zero
    let store = Arc::new(MemoryStore::new());
    let meter = ScriptedMeter::with_energy_readings(&[100.0, 40.0]);
    let mgr = manager_with(store.clone(), Some(meter));

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    mgr.on_event("CHARGE_STOPPED", &transition(3, 5));

    let session = &store.get_sessions(10, 0, None, None).unwrap()[0];
    assert_eq!(session.metrics.as_ref().unwrap().total_energy_kwh, Some(0.0));
}

#[test]
fn unreachable_meter_degrades_to_calculated() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store.clone(), Some(ScriptedMeter::unreachable()));

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    mgr.on_event("STATUS", &telemetry(16.0, 3700.0, 16.0));
    mgr.on_event("CHARGE_STOPPED", &transition(3, 5));

    let session = &store.get_sessions(10, 0, None, None).unwrap()[0];
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(
        session.metadata.get("meter_available").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        session.metadata.get("energy_source").and_then(|v| v.as_str()),
        Some("calculated")
    );
    // The estimate from the calculator survives
    assert!(session.metrics.as_ref().unwrap().total_energy_kwh.is_some());
}

#[test]
fn pending_authorization_resolves_user_id_once() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store.clone(), None);

    let auth = EventPayload {
        user_id: Some("alice".to_string()),
        request_id: Some("req-1".to_string()),
        ..EventPayload::default()
    };
    mgr.on_event("CHARGE_START_REQUESTED", &auth);

    let mut started = transition(1, 3);
    started.request_id = Some("req-1".to_string());
    mgr.on_event("CHARGE_STARTED", &started);

    let current = mgr.get_current_session().unwrap();
    assert_eq!(current.user_id(), Some("alice"));

    // The entry was consumed: a fresh start gets no user
    mgr.on_event("CHARGE_STOPPED", &transition(3, 5));
    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    assert!(mgr.get_current_session().unwrap().user_id().is_none());
}

#[test]
fn expired_authorization_is_not_used() {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let config = SessionConfig {
        pending_auth_ttl_secs: 1,
        ..SessionConfig::default()
    };
    let mgr = SessionManager::new(store, None, config).unwrap();

    mgr.on_event(
        "CHARGE_START_REQUESTED",
        &EventPayload {
            user_id: Some("alice".to_string()),
            ..EventPayload::default()
        },
    );

    // Let the cached entry age past its TTL
    std::thread::sleep(std::time::Duration::from_millis(1100));
    mgr.on_event("CHARGE_STARTED", &transition(1, 3));

    assert!(mgr.get_current_session().unwrap().user_id().is_none());
}

#[test]
fn event_payload_user_id_beats_pending_authorization() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store.clone(), None);

    mgr.on_event(
        "CHARGE_START_REQUESTED",
        &EventPayload {
            user_id: Some("alice".to_string()),
            ..EventPayload::default()
        },
    );

    let mut started = transition(1, 3);
    started.user_id = Some("bob".to_string());
    mgr.on_event("CHARGE_STARTED", &started);

    assert_eq!(mgr.get_current_session().unwrap().user_id(), Some("bob"));
}

#[test]
fn event_row_failures_never_block_the_lifecycle() {
    let store = Arc::new(FlakyStore::new());
    store.fail_event_writes.store(true, Ordering::SeqCst);
    let mgr = manager_with(store.clone(), None);

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    mgr.on_event("STATUS", &telemetry(16.0, 3700.0, 16.0));
    mgr.on_event("CHARGE_STOPPED", &transition(3, 5));

    // Session row writes succeeded and the row kept the full log; only the
    // query-table rows were lost
    let sessions = store.get_sessions(10, 0, None, None).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Completed);
    assert_eq!(sessions[0].events.len(), 3);
    assert!(store.get_events(&sessions[0].session_id).unwrap().is_empty());
}

#[test]
fn failed_terminal_write_is_not_recorded_as_success() {
    let store = Arc::new(FlakyStore::new());
    let mgr = manager_with(store.clone(), None);

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    store.fail_session_updates.store(true, Ordering::SeqCst);
    mgr.on_event("CHARGE_STOPPED", &transition(3, 5));

    // The in-memory pointer is cleared, but the store still shows the session
    // open; a restart will recover it instead of losing it silently
    assert!(mgr.get_current_session().is_none());
    let row = store.get_current_session().unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Active);
}

#[test]
fn normalized_event_rows_carry_electrical_fields() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store.clone(), None);

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    mgr.on_event("STATUS", &telemetry(16.0, 3700.0, 16.0));
    mgr.on_event("CHARGE_STOPPED", &transition(3, 5));

    let session = &store.get_sessions(10, 0, None, None).unwrap()[0];
    assert_eq!(session.events.len(), 3);
    assert_eq!(session.events[1].event_type, "STATUS");

    // The query table holds the same events with denormalized columns
    let rows = store.get_events(&session.session_id).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].event_type, "STATUS");
    assert_eq!(rows[1].current_a, Some(16.0));
    assert_eq!(rows[1].voltage_v, Some(3.7));
    assert!((rows[1].power_kw.unwrap() - 0.0592).abs() < 1e-9);
}

#[test]
fn sessions_snapshot_reflects_activity() {
    let store = Arc::new(MemoryStore::new());
    let mgr = manager_with(store, None);

    let idle = mgr.sessions_snapshot();
    assert_eq!(idle.get("session_active").and_then(|v| v.as_bool()), Some(false));

    mgr.on_event("CHARGE_STARTED", &transition(1, 3));
    let active = mgr.sessions_snapshot();
    assert_eq!(active.get("session_active").and_then(|v| v.as_bool()), Some(true));
    assert!(active.get("current_session").unwrap().get("session_id").is_some());
}
