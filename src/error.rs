//! Error types and handling for Wattson
//!
//! This module defines the error types used throughout the crate,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Wattson operations
pub type Result<T> = std::result::Result<T, WattsonError>;

/// Main error type for Wattson
#[derive(Debug, Error)]
pub enum WattsonError {
    /// Charger status snapshot unreachable (transport-level)
    #[error("Connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    /// Charger state missing, unknown, or disallowed for the attempted command
    #[error("Invalid state ({endpoint}, user={user_id}, state={state}): {message}")]
    InvalidState {
        endpoint: String,
        user_id: String,
        state: String,
        message: String,
    },

    /// Charger state changed between validation and command dispatch
    #[error("Race condition ({endpoint}): state changed from {initial} to {current}")]
    Race {
        endpoint: String,
        initial: String,
        current: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Session store errors
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Energy meter errors
    #[error("Meter error: {message}")]
    Meter { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl WattsonError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(endpoint: S, message: S) -> Self {
        WattsonError::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid-state error
    pub fn invalid_state<S: Into<String>>(endpoint: S, user_id: S, state: S, message: S) -> Self {
        WattsonError::InvalidState {
            endpoint: endpoint.into(),
            user_id: user_id.into(),
            state: state.into(),
            message: message.into(),
        }
    }

    /// Create a new race-condition error
    pub fn race<S: Into<String>>(endpoint: S, initial: S, current: S) -> Self {
        WattsonError::Race {
            endpoint: endpoint.into(),
            initial: initial.into(),
            current: current.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        WattsonError::Config {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        WattsonError::Persistence {
            message: message.into(),
        }
    }

    /// Create a new meter error
    pub fn meter<S: Into<String>>(message: S) -> Self {
        WattsonError::Meter {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        WattsonError::Io {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        WattsonError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        WattsonError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for WattsonError {
    fn from(err: std::io::Error) -> Self {
        WattsonError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for WattsonError {
    fn from(err: serde_yaml::Error) -> Self {
        WattsonError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for WattsonError {
    fn from(err: serde_json::Error) -> Self {
        WattsonError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for WattsonError {
    fn from(err: chrono::ParseError) -> Self {
        WattsonError::validation("datetime", &err.to_string())
    }
}
