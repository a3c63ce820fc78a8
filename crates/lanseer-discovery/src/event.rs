//! Events delivered to the host application

use crate::error::{DiscoveryFailure, ResolveFailure, StackError};
use crate::record::{ServiceKey, ServiceRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event emitted by the discovery manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    #[serde(flatten)]
    pub kind: DiscoveryEventKind,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,
}

impl DiscoveryEvent {
    pub fn new(kind: DiscoveryEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

impl From<DiscoveryEventKind> for DiscoveryEvent {
    fn from(kind: DiscoveryEventKind) -> Self {
        Self::new(kind)
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscoveryEventKind {
    /// The stack is about to search
    SearchStarting { service_type: String, domain: String },

    /// The search ended
    SearchStopped,

    /// The search could not start or continue
    SearchFailed { error: StackError },

    /// A remote service appeared and resolution has started
    ServiceDiscovered { service: ServiceRecord },

    /// A remote service was resolved to host, port and addresses
    ServiceResolved { service: ServiceRecord },

    /// A remote service could not be resolved
    ServiceResolveFailed {
        key: ServiceKey,
        error: ResolveFailure,
    },

    /// A remote service left the network
    ServiceLost { key: ServiceKey },

    /// A local advertisement is about to go out
    PublishStarting { key: ServiceKey },

    /// A local advertisement is live
    ServicePublished { service: ServiceRecord },

    /// A local advertisement was rejected
    ServicePublishFailed { key: ServiceKey, error: StackError },

    /// A local advertisement was withdrawn
    ServiceStopped { key: ServiceKey },
}

impl DiscoveryEventKind {
    /// Key of the service this event concerns, if any
    pub fn key(&self) -> Option<&ServiceKey> {
        match self {
            DiscoveryEventKind::ServiceDiscovered { service }
            | DiscoveryEventKind::ServiceResolved { service }
            | DiscoveryEventKind::ServicePublished { service } => Some(&service.key),
            DiscoveryEventKind::ServiceResolveFailed { key, .. }
            | DiscoveryEventKind::ServiceLost { key }
            | DiscoveryEventKind::PublishStarting { key }
            | DiscoveryEventKind::ServicePublishFailed { key, .. }
            | DiscoveryEventKind::ServiceStopped { key } => Some(key),
            DiscoveryEventKind::SearchStarting { .. }
            | DiscoveryEventKind::SearchStopped
            | DiscoveryEventKind::SearchFailed { .. } => None,
        }
    }

    /// The failure carried by this event, if it reports one
    pub fn failure(&self) -> Option<DiscoveryFailure> {
        match self {
            DiscoveryEventKind::SearchFailed { error } => Some(DiscoveryFailure::SearchFailed {
                error: error.clone(),
            }),
            DiscoveryEventKind::ServiceResolveFailed { error, .. } => {
                Some(DiscoveryFailure::ResolveFailed {
                    failure: error.clone(),
                })
            }
            DiscoveryEventKind::ServicePublishFailed { error, .. } => {
                Some(DiscoveryFailure::PublishFailed {
                    error: error.clone(),
                })
            }
            _ => None,
        }
    }

    /// Returns a human-readable description
    pub fn description(&self) -> &str {
        match self {
            DiscoveryEventKind::SearchStarting { .. } => "Search starting",
            DiscoveryEventKind::SearchStopped => "Search stopped",
            DiscoveryEventKind::SearchFailed { .. } => "Search failed",
            DiscoveryEventKind::ServiceDiscovered { .. } => "Service discovered on network",
            DiscoveryEventKind::ServiceResolved { .. } => "Service resolved",
            DiscoveryEventKind::ServiceResolveFailed { .. } => "Service could not be resolved",
            DiscoveryEventKind::ServiceLost { .. } => "Service lost or removed",
            DiscoveryEventKind::PublishStarting { .. } => "Advertisement starting",
            DiscoveryEventKind::ServicePublished { .. } => "Advertisement published",
            DiscoveryEventKind::ServicePublishFailed { .. } => "Advertisement rejected",
            DiscoveryEventKind::ServiceStopped { .. } => "Advertisement withdrawn",
        }
    }
}
