//! Charger state model and command gating for Wattson
//!
//! The charger reports its lifecycle position as a small integer. This module
//! owns the mapping from raw codes to [`ChargerState`] and the pure validation
//! functions that command-issuing callers consult before asking the charger to
//! do anything. Gates are expressed as capability predicates on the state, not
//! as ordinal comparisons, so reordering the enum cannot break them.

use crate::error::{Result, WattsonError};
use crate::logging::get_logger;
use serde::{Deserialize, Serialize};

/// Discrete charger state as reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargerState {
    /// No cable plugged in
    Idle,

    /// Vehicle connected, waiting for authorization
    EvConnected,

    /// Authorization granted, waiting for the vehicle to draw current
    Ready,

    /// Actively delivering energy
    Charging,

    /// Charging suspended by the vehicle or the charger
    Paused,

    /// Charge finished, cable still attached
    Stopped,

    /// Charger reported a fault
    Fault,
}

impl ChargerState {
    /// Map a raw wire code to a state, if it is in the known enum
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::EvConnected),
            2 => Some(Self::Ready),
            3 => Some(Self::Charging),
            4 => Some(Self::Paused),
            5 => Some(Self::Stopped),
            6 => Some(Self::Fault),
            _ => None,
        }
    }

    /// Raw wire code for this state
    pub fn code(self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::EvConnected => 1,
            Self::Ready => 2,
            Self::Charging => 3,
            Self::Paused => 4,
            Self::Stopped => 5,
            Self::Fault => 6,
        }
    }

    /// Protocol name for this state
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::EvConnected => "EV_CONNECTED",
            Self::Ready => "READY",
            Self::Charging => "CHARGING",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
            Self::Fault => "FAULT",
        }
    }

    /// Whether a charge-start authorization is acceptable in this state.
    /// Authorization is a one-shot consumable signal; only a connected,
    /// not-yet-authorized vehicle may receive it.
    pub fn can_start_charge(self) -> bool {
        matches!(self, Self::EvConnected)
    }

    /// Whether the set-current command is acceptable in this state.
    /// Once energy delivery has begun (or the charger is paused, stopped or
    /// faulted) the current limit is no longer negotiable.
    pub fn can_change_current(self) -> bool {
        matches!(self, Self::Idle | Self::EvConnected | Self::Ready)
    }
}

impl std::fmt::Display for ChargerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn display_state(state: Option<ChargerState>) -> String {
    state.map_or_else(|| "UNKNOWN".to_string(), |s| s.name().to_string())
}

/// Extract and validate the charger state from a raw status snapshot.
///
/// Distinguishes two different "unknown" causes: no snapshot at all is a
/// connection-class error, while a snapshot whose `state` field is absent is a
/// protocol-class error unless `allow_none` is set, in which case
/// `(None, "UNKNOWN")` is returned and only a warning is logged. A code
/// outside the known enum yields the name `UNKNOWN_{n}` and fails; it is
/// never coerced to a known state.
pub fn validate_state(
    status: Option<&serde_json::Value>,
    endpoint: &str,
    user_id: &str,
    allow_none: bool,
) -> Result<(Option<ChargerState>, String)> {
    let Some(status) = status else {
        return Err(WattsonError::connection(
            endpoint,
            "no status snapshot available from charger",
        ));
    };

    let raw = status.get("state").and_then(serde_json::Value::as_i64);
    let Some(code) = raw else {
        if allow_none {
            get_logger("state").warn(&format!(
                "Status snapshot has no state field (endpoint={}, user={})",
                endpoint, user_id
            ));
            return Ok((None, "UNKNOWN".to_string()));
        }
        return Err(WattsonError::invalid_state(
            endpoint,
            user_id,
            "UNKNOWN",
            "status snapshot has no state field",
        ));
    };

    match ChargerState::from_code(code) {
        Some(state) => Ok((Some(state), state.name().to_string())),
        None => {
            let name = format!("UNKNOWN_{}", code);
            Err(WattsonError::invalid_state(
                endpoint,
                user_id,
                &name,
                &format!("state code {} is outside the known enum", code),
            ))
        }
    }
}

/// Gate a charge-start authorization against the current state.
///
/// Succeeds only for [`ChargerState::EvConnected`]; every other state is
/// rejected with a state-specific reason.
pub fn check_state_for_charge_start(
    state: Option<ChargerState>,
    name: &str,
    endpoint: &str,
    user_id: &str,
) -> Result<()> {
    let Some(state) = state else {
        return Err(WattsonError::invalid_state(
            endpoint,
            user_id,
            name,
            "charger state unknown, refusing to authorize charge",
        ));
    };

    if state.can_start_charge() {
        return Ok(());
    }

    let reason = match state {
        ChargerState::Idle => "cable not plugged in",
        ChargerState::Ready => "authorization already granted",
        ChargerState::Charging => "already charging",
        ChargerState::Paused => "already charging (paused)",
        ChargerState::Stopped => "previous charge not yet cleared",
        ChargerState::Fault => "charger is faulted",
        ChargerState::EvConnected => unreachable!(),
    };

    Err(WattsonError::invalid_state(
        endpoint,
        user_id,
        state.name(),
        reason,
    ))
}

/// Gate a set-current command against the current state.
///
/// An unknown state is allowed through (the limit is harmless before a charge
/// begins and the charger re-validates it anyway); a state in which energy
/// delivery has begun is not.
pub fn check_state_for_current_set(
    state: Option<ChargerState>,
    endpoint: &str,
    user_id: &str,
) -> Result<()> {
    match state {
        None => Ok(()),
        Some(s) if s.can_change_current() => Ok(()),
        Some(s) => Err(WattsonError::invalid_state(
            endpoint,
            user_id,
            s.name(),
            "cannot change current once charging has begun",
        )),
    }
}

/// Verify the charger state did not move between validation and command
/// dispatch. A `None` on either side disables the check.
pub fn check_state_changed(
    initial: Option<ChargerState>,
    current: Option<ChargerState>,
    endpoint: &str,
) -> Result<()> {
    match (initial, current) {
        (Some(a), Some(b)) if a != b => Err(WattsonError::race(
            endpoint,
            &display_state(initial),
            &display_state(current),
        )),
        _ => Ok(()),
    }
}
