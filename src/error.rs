//! Error handling for the recon pipeline
//!
//! Provides structured error types with contextual information for:
//! - Configuration errors (invalid settings, malformed module maps)
//! - Record store errors (SQLite failures, always fatal for the run)
//! - Tool invocation errors (spawn failures, swallowed by the coordinator)
//! - IO errors (target files, audit logs, result files)

use std::{io, net::AddrParseError};
use thiserror::Error;

/// Main result type used throughout the application
pub type Result<T> = std::result::Result<T, ScanmanError>;

/// Error enum covering all pipeline error scenarios
#[derive(Error, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ScanmanError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Validation errors for configuration entries and user input
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Record store failures
    #[error("Store error: {operation} - {message}")]
    Store { operation: String, message: String },

    /// External tool invocation errors
    #[error("Invocation error: {tool} - {message}")]
    Invocation { tool: String, message: String },

    /// Output normalization errors
    #[error("Normalize error: {module} - {message}")]
    Normalize { module: String, message: String },

    /// Target specification and host validation errors
    #[error("Invalid target: {target} - {reason}")]
    InvalidTarget { target: String, reason: String },

    /// File I/O errors
    #[error("IO error: {operation} - {message}")]
    Io { operation: String, message: String },

    /// Generic internal errors with context
    #[error("Internal error: {context} - {message}")]
    Internal { context: String, message: String },
}

impl ScanmanError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a store error
    pub fn store<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invocation error
    pub fn invocation<T: Into<String>, M: Into<String>>(tool: T, message: M) -> Self {
        Self::Invocation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a normalization error
    pub fn normalize<N: Into<String>, M: Into<String>>(module: N, message: M) -> Self {
        Self::Normalize {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Create an invalid target error
    pub fn invalid_target<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        Self::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create an IO error
    pub fn io<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Io {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<C: Into<String>, M: Into<String>>(context: C, message: M) -> Self {
        Self::Internal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Check if the error must abort the pipeline run.
    ///
    /// Store and configuration failures abort; a failed tool invocation is
    /// reported and the pipeline moves on to the next module.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Store { .. } | Self::Configuration { .. } | Self::Validation { .. }
        )
    }

    /// Check if the error is a configuration issue
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Validation { .. })
    }
}

// Implement conversions from common error types
impl From<io::Error> for ScanmanError {
    fn from(error: io::Error) -> Self {
        Self::io("IO operation", error.to_string())
    }
}

impl From<sqlx::Error> for ScanmanError {
    fn from(error: sqlx::Error) -> Self {
        Self::store("sqlite", error.to_string())
    }
}

impl From<AddrParseError> for ScanmanError {
    fn from(error: AddrParseError) -> Self {
        Self::invalid_target("IP address", error.to_string())
    }
}

impl From<std::num::ParseIntError> for ScanmanError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::validation("number parsing", error.to_string())
    }
}

impl From<config::ConfigError> for ScanmanError {
    fn from(error: config::ConfigError) -> Self {
        Self::config(error.to_string())
    }
}

impl From<regex::Error> for ScanmanError {
    fn from(error: regex::Error) -> Self {
        Self::internal("regex", error.to_string())
    }
}
