//! # Wattson - charging session core for a single EV charging station
//!
//! Wattson turns the stream of hardware state-transition events from one EV
//! charger into well-formed session records: it decides resume-vs-new-session
//! ambiguity, overlays fault status, reconciles metered vs. estimated energy,
//! and survives process restarts without losing an in-progress charge.
//!
//! Protocol adapters (Modbus register decoding, OCPP, the HTTP/API layer) are
//! out of scope and consumed through narrow collaborator traits:
//! [`events::EventSource`], [`meter::EnergyMeter`] and [`store::SessionStore`].
//!
//! ## Architecture
//!
//! - `config`: YAML configuration management and validation
//! - `logging`: structured logging and tracing
//! - `error`: typed errors and the crate-wide `Result`
//! - `state`: charger state model and command gating
//! - `events`: hardware event stream types
//! - `session`: the charging-session aggregate
//! - `metrics`: per-session aggregate statistics
//! - `manager`: the session state machine and orchestration
//! - `meter`: energy meter collaborator interface
//! - `store`: normalized session/event persistence

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod meter;
pub mod metrics;
pub mod session;
pub mod state;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, WattsonError};
pub use manager::SessionManager;
