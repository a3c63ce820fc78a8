//! Error types shared across the lanseer workspace.
//!
//! Configuration and I/O failures surface through [`LanseerError`]. Every
//! variant is serializable so the CLI can emit failures as JSON alongside
//! discovery events.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type alias using LanseerError as the error type.
pub type Result<T> = std::result::Result<T, LanseerError>;

/// Top-level error type for lanseer configuration and setup.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum LanseerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Two advertisements share the same (type, domain, name)
    #[error("Duplicate service definition: {name}.{service_type}.{domain}")]
    DuplicateService {
        service_type: String,
        domain: String,
        name: String,
    },

    /// Invalid DNS-SD service type string
    #[error("Invalid service type '{value}': {reason}")]
    InvalidServiceType { value: String, reason: String },
}

impl ConfigError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid service type error.
    pub fn invalid_service_type(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidServiceType {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Wrapper for I/O errors to make them serializable.
#[derive(Debug, Error, Serialize, Deserialize)]
#[error("I/O error: {kind:?}: {message}")]
pub struct IoError {
    pub kind: IoErrorKind,
    pub message: String,
}

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        Self {
            kind: err.kind().into(),
            message: err.to_string(),
        }
    }
}

impl From<io::Error> for LanseerError {
    fn from(err: io::Error) -> Self {
        LanseerError::Io(err.into())
    }
}

/// Serializable subset of std::io::ErrorKind relevant to socket and file work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoErrorKind {
    NotFound,
    PermissionDenied,
    AddrInUse,
    AddrNotAvailable,
    InvalidInput,
    InvalidData,
    TimedOut,
    Other,
}

impl From<io::ErrorKind> for IoErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => IoErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => IoErrorKind::PermissionDenied,
            io::ErrorKind::AddrInUse => IoErrorKind::AddrInUse,
            io::ErrorKind::AddrNotAvailable => IoErrorKind::AddrNotAvailable,
            io::ErrorKind::InvalidInput => IoErrorKind::InvalidInput,
            io::ErrorKind::InvalidData => IoErrorKind::InvalidData,
            io::ErrorKind::TimedOut => IoErrorKind::TimedOut,
            _ => IoErrorKind::Other,
        }
    }
}
