//! The multicast-DNS stack behind the manager
//!
//! The manager never speaks mDNS itself. It drives a [`DiscoveryStack`]
//! through a handful of non-blocking requests and learns about outcomes from
//! the [`StackEvent`] stream the stack hands out via
//! [`DiscoveryStack::subscribe`].

use crate::address::SockaddrLayout;
use crate::error::StackError;
use crate::record::ServiceKey;
use async_channel::Receiver;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

/// A local service handed to the stack for advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub key: ServiceKey,
    pub port: u16,
    /// Host name to answer for, `None` lets the stack pick the machine name
    pub host_name: Option<String>,
    /// TXT record data
    pub metadata: HashMap<String, Vec<u8>>,
}

/// Resolution result as reported by the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub key: ServiceKey,
    pub host: String,
    pub port: u16,
    /// Raw socket-address records, see [`crate::address`]
    pub addresses: Vec<Bytes>,
    pub txt: HashMap<String, Vec<u8>>,
}

/// Notifications delivered by the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// The search is about to start
    WillSearch,
    /// A service instance appeared
    Found { key: ServiceKey, more_coming: bool },
    /// A service instance went away
    Removed { key: ServiceKey, more_coming: bool },
    /// The search could not start or continue
    SearchFailed { error: StackError },
    /// The search ended
    SearchStopped,
    /// A resolve request succeeded
    Resolved(ResolvedService),
    /// A resolve request failed
    ResolveFailed { key: ServiceKey, error: StackError },
    /// An advertisement is about to go out
    WillPublish { key: ServiceKey },
    /// An advertisement is live
    Published { key: ServiceKey },
    /// An advertisement was rejected
    PublishFailed { key: ServiceKey, error: StackError },
    /// An advertisement was withdrawn
    PublishStopped { key: ServiceKey },
}

impl StackEvent {
    /// Key the notification refers to, if any
    pub fn key(&self) -> Option<&ServiceKey> {
        match self {
            StackEvent::Found { key, .. }
            | StackEvent::Removed { key, .. }
            | StackEvent::ResolveFailed { key, .. }
            | StackEvent::WillPublish { key }
            | StackEvent::Published { key }
            | StackEvent::PublishFailed { key, .. }
            | StackEvent::PublishStopped { key } => Some(key),
            StackEvent::Resolved(resolved) => Some(&resolved.key),
            StackEvent::WillSearch | StackEvent::SearchFailed { .. } | StackEvent::SearchStopped => {
                None
            }
        }
    }
}

/// An mDNS / DNS-SD implementation the manager can drive.
///
/// Every request returns immediately. A request that cannot even be issued
/// returns its error synchronously; everything else is reported through the
/// subscribed [`StackEvent`] stream.
pub trait DiscoveryStack: Send + Sync {
    /// Notification stream for this stack
    fn subscribe(&self) -> Receiver<StackEvent>;

    /// Starts searching for `service_type` in `domain`
    fn browse(&self, service_type: &str, domain: &str) -> Result<(), StackError>;

    /// Stops the active search, if any
    fn stop_browse(&self) -> Result<(), StackError>;

    /// Asks for a found service to be resolved within `timeout`
    fn resolve(&self, key: &ServiceKey, timeout: Duration) -> Result<(), StackError>;

    /// Drops interest in a pending resolution
    fn stop_resolve(&self, key: &ServiceKey);

    /// Starts advertising a local service
    fn register(&self, advertisement: &Advertisement) -> Result<(), StackError>;

    /// Withdraws a local advertisement
    fn unregister(&self, key: &ServiceKey) -> Result<(), StackError>;

    /// Whether TXT metadata can be attached to advertisements
    fn supports_metadata(&self) -> bool {
        true
    }

    /// Layout of the raw address records in [`ResolvedService::addresses`]
    fn address_layout(&self) -> SockaddrLayout {
        SockaddrLayout::native()
    }

    /// Releases the stack's resources
    fn shutdown(&self) -> Result<(), StackError> {
        Ok(())
    }
}
