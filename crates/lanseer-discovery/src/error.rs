//! Error types for the discovery manager
//!
//! Two families live here. [`DiscoveryError`] is returned synchronously by
//! setup and handle calls. [`DiscoveryFailure`] and its payloads describe
//! asynchronous outcomes that end a single record's lifecycle and reach the
//! host as events.

use crate::record::ServiceState;
use lanseer_core::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur when driving the discovery manager
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// mDNS service daemon failed to initialize
    #[error("Failed to initialize mDNS daemon: {0}")]
    MdnsInitFailed(String),

    /// Invalid discovery configuration
    #[error("Invalid discovery configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// A record was asked to move along an edge its role does not allow
    #[error("Invalid transition for '{service}': {from} -> {to}")]
    InvalidTransition {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },

    /// The manager task has stopped and no longer accepts commands
    #[error("Discovery manager is not running")]
    ManagerClosed,

    /// The underlying stack rejected a request
    #[error("Discovery stack error: {0}")]
    Stack(#[from] StackError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Error codes reported by the discovery stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackErrorCode {
    /// Unclassified failure
    Unknown,
    /// The advertised name is already taken on the network
    Collision,
    /// The requested service could not be found
    NotFound,
    /// The same request is already in progress
    ActivityInProgress,
    /// Malformed type, domain or name
    BadArgument,
    /// The request was cancelled
    Cancelled,
    /// The stack is in a state that cannot serve the request
    Invalid,
    /// The stack gave up waiting
    Timeout,
}

/// Error payload delivered by the discovery stack
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} ({code:?})")]
pub struct StackError {
    pub code: StackErrorCode,
    pub message: String,
}

impl StackError {
    pub fn new(code: StackErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(StackErrorCode::Unknown, message)
    }

    pub fn bad_argument(message: impl Into<String>) -> Self {
        Self::new(StackErrorCode::BadArgument, message)
    }
}

/// Why a resolution attempt ended in `ResolveFailed`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum ResolveFailure {
    /// The stack reported the failure
    #[error("resolution failed: {error}")]
    Stack { error: StackError },

    /// No answer arrived before the resolve timeout fired
    #[error("resolution timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
}

impl ResolveFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResolveFailure::Timeout { .. })
    }
}

/// Asynchronous failure taxonomy surfaced through discovery events
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryFailure {
    /// Browsing could not start or continue
    #[error("search failed: {error}")]
    SearchFailed { error: StackError },

    /// A specific service could not be resolved
    #[error("{failure}")]
    ResolveFailed { failure: ResolveFailure },

    /// A local advertisement was rejected
    #[error("publish failed: {error}")]
    PublishFailed { error: StackError },
}
