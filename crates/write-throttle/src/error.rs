//! Error types for the write-throttle crate.
//!
//! Configuration and dispatch errors stay local: they are logged and turned
//! into a status for the host. The deliberate fault is not an error at all,
//! it aborts the process.

use thiserror::Error;

/// Errors that can occur while configuring, registering or running the harness.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// Configuration key outside the recognized set.
    #[error("unknown option: {0}")]
    UnknownOption(String),

    /// Host pipeline refused a metric family.
    #[error("dispatch failed for series {series}: {reason}")]
    Dispatch { series: String, reason: String },

    /// Host pipeline refused to register a work unit.
    #[error("registration of {name} failed: {reason}")]
    Registration { name: String, reason: String },

    /// Configuration file could not be read or decoded.
    #[error("configuration source error: {0}")]
    ConfigSource(String),

    /// The reference host has already been shut down.
    #[error("pipeline stopped")]
    PipelineStopped,
}

impl ThrottleError {
    /// Legacy host status code: zero is success, everything here is non-zero.
    pub fn status(&self) -> i32 {
        -1
    }
}

impl From<config::ConfigError> for ThrottleError {
    fn from(err: config::ConfigError) -> Self {
        ThrottleError::ConfigSource(err.to_string())
    }
}

/// Result type for write-throttle operations.
pub type ThrottleResult<T> = Result<T, ThrottleError>;
