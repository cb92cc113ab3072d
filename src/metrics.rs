//! Session metrics derivation for Wattson
//!
//! The calculator consumes the full ordered event log of one finished session,
//! sample by sample, and produces one aggregate-metrics record: durations,
//! min/avg/max electrical stats, and an energy estimate used when no direct
//! meter delta is available.

use crate::events;
use crate::session::SessionEvent;
use crate::state::ChargerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate statistics for one finished session.
///
/// Electrical stats are absent entirely when no samples were collected,
/// never a zero placeholder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Wall-clock session length
    pub duration_seconds: f64,

    /// Time spent actually delivering energy
    pub charging_duration_seconds: f64,

    /// Time spent connected but not charging
    pub idle_duration_seconds: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_current_a: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_current_a: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_current_a: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_voltage_v: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_voltage_v: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_voltage_v: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_power_kw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_power_kw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_power_kw: Option<f64>,

    /// Total energy for the session. Estimated from average power unless the
    /// caller overwrites it with a metered delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_energy_kwh: Option<f64>,

    /// Number of raw events in the session log, attached by the caller
    pub event_count: usize,
}

/// Derives aggregate statistics from a session's raw event stream
pub struct SessionMetricsCalculator {
    currents: Vec<f64>,
    voltages: Vec<f64>,
    powers: Vec<f64>,
    power_sum_raw: f64,
    charging_start_time: Option<DateTime<Utc>>,
    set_current_a: Option<f64>,
}

impl SessionMetricsCalculator {
    /// Create an empty calculator
    pub fn new() -> Self {
        Self {
            currents: Vec::new(),
            voltages: Vec::new(),
            powers: Vec::new(),
            power_sum_raw: 0.0,
            charging_start_time: None,
            set_current_a: None,
        }
    }

    /// Feed one event from the session log.
    ///
    /// Extracts a current sample (live cable sensor preferred over the legacy
    /// field) and a voltage sample (control pilot preferred over proximity
    /// pilot), derives instantaneous power when both are present, records the
    /// first observed transition into CHARGING, and records the first-seen
    /// set-current value (subsequent changes ignored).
    pub fn add_event(&mut self, event: &SessionEvent) {
        let current = events::current_sample(&event.data);
        let voltage = events::voltage_sample(&event.data);

        if let Some(a) = current {
            self.currents.push(a);
        }
        if let Some(v) = voltage {
            self.voltages.push(v);
        }
        if let (Some(a), Some(v)) = (current, voltage) {
            let power_kw = v * a / 1000.0;
            // Stats use the sample rounded to 3 decimals; the raw sum feeds
            // the energy estimate, which would collapse to zero for short
            // sessions if it went through the rounded samples
            self.power_sum_raw += power_kw;
            self.powers.push(round_to(power_kw, 3));
        }

        if self.charging_start_time.is_none()
            && events::to_state(&event.data) == Some(ChargerState::Charging.code())
        {
            self.charging_start_time = Some(event.timestamp);
        }

        if self.set_current_a.is_none()
            && let Some(max) = events::max_current(&event.data)
        {
            self.set_current_a = Some(max);
        }
    }

    /// First-seen set-current value, if any
    pub fn set_current_a(&self) -> Option<f64> {
        self.set_current_a
    }

    /// Timestamp of the first observed transition into CHARGING
    pub fn charging_start_time(&self) -> Option<DateTime<Utc>> {
        self.charging_start_time
    }

    /// Produce the aggregate record for the session boundaries.
    ///
    /// When no CHARGING transition was ever observed the entire session is
    /// modeled as idle. The energy figure is an estimate from average power
    /// over the charging window; callers must prefer a metered delta when one
    /// is available.
    pub fn calculate_metrics(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> SessionMetrics {
        let duration = seconds_between(start_time, end_time);

        let (charging, idle) = match self.charging_start_time {
            Some(charging_start) => {
                let charging = seconds_between(charging_start, end_time).max(0.0);
                (charging, (duration - charging).max(0.0))
            }
            None => (0.0, duration),
        };

        let mut metrics = SessionMetrics {
            duration_seconds: duration,
            charging_duration_seconds: charging,
            idle_duration_seconds: idle,
            ..SessionMetrics::default()
        };

        if let Some((min, avg, max)) = stats(&self.currents) {
            metrics.min_current_a = Some(round_to(min, 2));
            metrics.avg_current_a = Some(round_to(avg, 2));
            metrics.max_current_a = Some(round_to(max, 2));
        }
        if let Some((min, avg, max)) = stats(&self.voltages) {
            metrics.min_voltage_v = Some(round_to(min, 2));
            metrics.avg_voltage_v = Some(round_to(avg, 2));
            metrics.max_voltage_v = Some(round_to(max, 2));
        }
        if let Some((min, avg, max)) = stats(&self.powers) {
            metrics.min_power_kw = Some(round_to(min, 3));
            metrics.avg_power_kw = Some(round_to(avg, 3));
            metrics.max_power_kw = Some(round_to(max, 3));
            let raw_avg = self.power_sum_raw / self.powers.len() as f64;
            metrics.total_energy_kwh = Some(round_to(raw_avg * (charging / 3600.0), 4));
        }

        metrics
    }
}

impl Default for SessionMetricsCalculator {
    fn default() -> Self {
        Self::new()
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

fn stats(samples: &[f64]) -> Option<(f64, f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for &s in samples {
        min = min.min(s);
        max = max.max(s);
        sum += s;
    }
    Some((min, sum / samples.len() as f64, max))
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
