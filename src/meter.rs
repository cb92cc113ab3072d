//! Energy meter collaborator interface for Wattson
//!
//! Wire-level register decoding lives in an external adapter; this crate only
//! needs a narrow surface: connect, check the link, and read one snapshot.
//! Read failures are degradable by design, a session never fails to start or
//! end because the meter was unreachable.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One snapshot from the energy meter
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MeterReading {
    /// Lifetime energy counter in kWh
    pub energy_kwh: f64,

    /// Whether the reading passed the adapter's plausibility checks
    pub is_valid: bool,
}

/// Energy meter collaborator.
///
/// Implementations must bound their read timeout tightly: reads happen while
/// the session lifecycle lock is held.
pub trait EnergyMeter: Send {
    /// Establish the link; returns whether the meter is now connected
    fn connect(&mut self) -> Result<bool>;

    /// Whether the link is currently up
    fn is_connected(&self) -> bool;

    /// Read one snapshot; `Ok(None)` when the meter had nothing to report
    fn read_all(&mut self) -> Result<Option<MeterReading>>;
}
