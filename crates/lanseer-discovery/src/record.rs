//! Service records and their lifecycle

use crate::error::{DiscoveryError, Result};
use chrono::{DateTime, Utc};
use lanseer_core::discovery_config::{normalize_domain, normalize_service_type};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use uuid::Uuid;

/// Identity of a service instance within one table.
///
/// Two services that share an instance name but differ in type or domain
/// are distinct records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    /// DNS-SD service type without trailing dot, e.g. `_http._tcp`
    pub service_type: String,

    /// Discovery domain without surrounding dots, e.g. `local`
    pub domain: String,

    /// Instance name, e.g. `printer-1`
    pub name: String,
}

impl ServiceKey {
    /// Creates a key, normalizing the type and domain
    pub fn new(service_type: &str, domain: &str, name: impl Into<String>) -> Self {
        Self {
            service_type: normalize_service_type(service_type),
            domain: normalize_domain(domain),
            name: name.into(),
        }
    }

    /// Fully qualified type and domain, e.g. `_http._tcp.local.`
    pub fn ty_domain(&self) -> String {
        format!("{}.{}.", self.service_type, self.domain)
    }

    /// Fully qualified instance name, e.g. `printer-1._http._tcp.local.`
    pub fn fullname(&self) -> String {
        format!("{}.{}", self.name, self.ty_domain())
    }

    /// Whether this key belongs to the given (type, domain) search
    pub fn matches(&self, service_type: &str, domain: &str) -> bool {
        self.service_type == service_type && self.domain == domain
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.name, self.service_type, self.domain)
    }
}

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// Found by browsing the network
    Remote,
    /// Advertised by this process
    Local,
}

/// Lifecycle state of a service record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Discovered,
    Resolving,
    Resolved,
    Lost,
    Publishing,
    Published,
    PublishFailed,
    ResolveFailed,
    Stopped,
}

impl ServiceState {
    /// Role a record must have to ever be in this state
    pub fn role(&self) -> ServiceRole {
        match self {
            ServiceState::Discovered
            | ServiceState::Resolving
            | ServiceState::Resolved
            | ServiceState::Lost
            | ServiceState::ResolveFailed => ServiceRole::Remote,
            ServiceState::Publishing
            | ServiceState::Published
            | ServiceState::PublishFailed
            | ServiceState::Stopped => ServiceRole::Local,
        }
    }

    /// States a record leaves its table in
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceState::Lost
                | ServiceState::ResolveFailed
                | ServiceState::PublishFailed
                | ServiceState::Stopped
        )
    }

    fn can_transition_to(&self, next: ServiceState) -> bool {
        use ServiceState::*;

        if self.role() != next.role() {
            return false;
        }

        matches!(
            (self, next),
            (Discovered, Resolving)
                | (Resolving, Resolved)
                | (Resolving, ResolveFailed)
                | (Resolved, Resolving)
                | (ResolveFailed, Resolving)
                | (Discovered | Resolving | Resolved, Lost)
                | (Publishing, Published)
                | (Publishing | Published, PublishFailed)
                | (Publishing | Published, Stopped)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceState::Discovered => "Discovered",
            ServiceState::Resolving => "Resolving",
            ServiceState::Resolved => "Resolved",
            ServiceState::Lost => "Lost",
            ServiceState::Publishing => "Publishing",
            ServiceState::Published => "Published",
            ServiceState::PublishFailed => "PublishFailed",
            ServiceState::ResolveFailed => "ResolveFailed",
            ServiceState::Stopped => "Stopped",
        };
        f.write_str(label)
    }
}

/// One discovered or published service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Unique identifier for this record instance
    pub id: Uuid,

    /// Type, domain and instance name
    #[serde(flatten)]
    pub key: ServiceKey,

    /// Resolved host name (remote) or advertised host name (local)
    pub host: Option<String>,

    /// Resolved (remote) or advertised (local) port
    pub port: Option<u16>,

    /// Textual IP addresses, in the order the stack reported them
    pub addresses: Vec<String>,

    /// TXT record data
    pub metadata: HashMap<String, Vec<u8>>,

    pub state: ServiceState,

    pub role: ServiceRole,

    /// When the record was created
    pub discovered_at: DateTime<Utc>,

    /// Last state change
    pub updated_at: DateTime<Utc>,
}

impl ServiceRecord {
    /// A freshly found remote service
    pub fn remote(key: ServiceKey) -> Self {
        Self::with_state(key, ServiceRole::Remote, ServiceState::Discovered)
    }

    /// A local advertisement that is about to be registered
    pub fn local(key: ServiceKey, port: u16, metadata: HashMap<String, Vec<u8>>) -> Self {
        let mut record = Self::with_state(key, ServiceRole::Local, ServiceState::Publishing);
        record.port = Some(port);
        record.metadata = metadata;
        record
    }

    fn with_state(key: ServiceKey, role: ServiceRole, state: ServiceState) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            key,
            host: None,
            port: None,
            addresses: Vec::new(),
            metadata: HashMap::new(),
            state,
            role,
            discovered_at: now,
            updated_at: now,
        }
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Moves the record to `next`, rejecting edges its role does not allow.
    ///
    /// Addresses are cleared whenever the record leaves `Resolved`.
    pub fn transition(&mut self, next: ServiceState) -> Result<()> {
        if self.role != next.role() || !self.state.can_transition_to(next) {
            return Err(DiscoveryError::InvalidTransition {
                service: self.key.to_string(),
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        self.updated_at = Utc::now();
        if next != ServiceState::Resolved {
            self.addresses.clear();
        }
        Ok(())
    }

    /// Records a successful resolution and moves to `Resolved`
    pub fn apply_resolution(
        &mut self,
        host: String,
        port: u16,
        addresses: Vec<String>,
        metadata: HashMap<String, Vec<u8>>,
    ) -> Result<()> {
        self.transition(ServiceState::Resolved)?;
        self.host = Some(host);
        self.port = Some(port);
        self.addresses = addresses;
        self.metadata = metadata;
        Ok(())
    }

    /// Addresses paired with the port, skipping any that fail to parse
    pub fn socket_addrs(&self) -> Vec<SocketAddr> {
        let Some(port) = self.port else {
            return Vec::new();
        };

        self.addresses
            .iter()
            .filter_map(|addr| addr.parse::<IpAddr>().ok())
            .map(|ip| SocketAddr::new(ip, port))
            .collect()
    }

    /// TXT value as UTF-8, if present and valid
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|value| std::str::from_utf8(value).ok())
    }
}
