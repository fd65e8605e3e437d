// src/utils/errors.rs
//! Error types for the optimizer
//!
//! Lookup misses (absent agent, absent attribute, expired cache entry) are
//! not errors and are represented with `Option`. Only configuration and
//! scheduling failures surface here.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, OptimizerError>;

/// Errors raised by the optimizer
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Configuration source could not be read or deserialized
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configured occupation name is not a known profession
    #[error("occupation '{0}' not recognized")]
    UnknownOccupation(String),

    /// Work was submitted after the scheduler was shut down
    #[error("scheduler has been shut down")]
    SchedulerShutdown,

    /// Tracing or metrics could not be installed
    #[error("observability init failed: {0}")]
    Observability(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OptimizerError::UnknownOccupation("BAKER".to_string());
        assert_eq!(err.to_string(), "occupation 'BAKER' not recognized");

        let err = OptimizerError::InvalidConfig("check period must be > 0".to_string());
        assert!(err.to_string().contains("check period"));
    }
}
