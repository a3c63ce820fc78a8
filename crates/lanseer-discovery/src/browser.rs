//! Browsing for remote services
//!
//! The browser owns the table of remote records for the active search. Each
//! handler returns the events the host should see; the table is the only
//! place a notification is checked against, so anything arriving for a key
//! that is no longer present is dropped.

use crate::address::SockaddrLayout;
use crate::error::StackError;
use crate::event::DiscoveryEventKind;
use crate::record::{ServiceKey, ServiceRecord, ServiceState};
use crate::resolver::{Expiry, Resolver};
use crate::stack::{DiscoveryStack, ResolvedService};
use lanseer_core::discovery_config::{normalize_domain, normalize_service_type};
use lanseer_core::BrowseTarget;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Remote service table and the search that feeds it
pub struct Browser {
    target: Option<BrowseTarget>,
    records: HashMap<ServiceKey, ServiceRecord>,
    resolver: Resolver,
}

impl Browser {
    pub fn new(resolve_timeout: Duration, layout: SockaddrLayout) -> Self {
        Self {
            target: None,
            records: HashMap::new(),
            resolver: Resolver::new(resolve_timeout, layout),
        }
    }

    /// The active search, if any
    pub fn target(&self) -> Option<&BrowseTarget> {
        self.target.as_ref()
    }

    pub fn get(&self, key: &ServiceKey) -> Option<&ServiceRecord> {
        self.records.get(key)
    }

    /// Snapshot of every tracked remote record, sorted by key
    pub fn records(&self) -> Vec<ServiceRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Restarts browsing for `(service_type, domain)`
    pub fn scan(
        &mut self,
        stack: &dyn DiscoveryStack,
        service_type: &str,
        domain: &str,
    ) -> Vec<DiscoveryEventKind> {
        self.stop(stack);

        let target = BrowseTarget {
            service_type: normalize_service_type(service_type),
            domain: normalize_domain(domain),
        };

        info!(
            service_type = %target.service_type,
            domain = %target.domain,
            "Starting browse"
        );

        match stack.browse(&target.service_type, &target.domain) {
            Ok(()) => {
                self.target = Some(target);
                Vec::new()
            }
            Err(error) => {
                warn!(error = %error, "Browse could not start");
                vec![DiscoveryEventKind::SearchFailed { error }]
            }
        }
    }

    /// Stops the active search and forgets every remote record
    pub fn stop(&mut self, stack: &dyn DiscoveryStack) {
        if let Some(target) = self.target.take() {
            debug!(service_type = %target.service_type, "Stopping browse");
            if let Err(e) = stack.stop_browse() {
                warn!(error = %e, "Failed to stop browse");
            }
        }

        self.resolver.abandon_all();
        if !self.records.is_empty() {
            debug!(count = self.records.len(), "Dropping remote services");
            self.records.clear();
        }
    }

    pub fn on_will_search(&self) -> Vec<DiscoveryEventKind> {
        match self.target {
            Some(ref target) => vec![DiscoveryEventKind::SearchStarting {
                service_type: target.service_type.clone(),
                domain: target.domain.clone(),
            }],
            None => Vec::new(),
        }
    }

    pub fn on_search_failed(&self, error: StackError) -> Vec<DiscoveryEventKind> {
        warn!(error = %error, "Search failed");
        vec![DiscoveryEventKind::SearchFailed { error }]
    }

    pub fn on_search_stopped(&self) -> Vec<DiscoveryEventKind> {
        vec![DiscoveryEventKind::SearchStopped]
    }

    /// A service appeared: track it and start resolving it
    pub fn on_found(
        &mut self,
        stack: &dyn DiscoveryStack,
        key: ServiceKey,
        more_coming: bool,
    ) -> Vec<DiscoveryEventKind> {
        let Some(ref target) = self.target else {
            debug!(service = %key, "Ignoring find with no active search");
            return Vec::new();
        };
        if !key.matches(&target.service_type, &target.domain) {
            debug!(service = %key, "Ignoring find from a previous search");
            return Vec::new();
        }

        debug!(service = %key, more_coming, "Service found");

        let record = ServiceRecord::remote(key.clone());
        let mut events = vec![DiscoveryEventKind::ServiceDiscovered {
            service: record.clone(),
        }];

        let timeout = self.resolver.default_timeout();
        self.records.insert(key.clone(), record);
        let failure = match self.records.get_mut(&key) {
            Some(record) => self.resolver.resolve(stack, record, timeout),
            None => None,
        };
        if let Some(error) = failure {
            self.records.remove(&key);
            events.push(DiscoveryEventKind::ServiceResolveFailed { key, error });
        }

        events
    }

    /// A service went away
    pub fn on_removed(
        &mut self,
        stack: &dyn DiscoveryStack,
        key: ServiceKey,
        more_coming: bool,
    ) -> Vec<DiscoveryEventKind> {
        let Some(mut record) = self.records.remove(&key) else {
            debug!(service = %key, "Ignoring removal of untracked service");
            return Vec::new();
        };

        debug!(service = %key, more_coming, state = %record.state, "Service removed");
        self.resolver.abandon(stack, &key);
        if let Err(e) = record.transition(ServiceState::Lost) {
            warn!(error = %e, "Unexpected state on removal");
        }

        vec![DiscoveryEventKind::ServiceLost { key }]
    }

    pub fn on_resolved(&mut self, resolved: ResolvedService) -> Vec<DiscoveryEventKind> {
        let Some(record) = self.records.get_mut(&resolved.key) else {
            debug!(service = %resolved.key, "Ignoring resolution of untracked service");
            return Vec::new();
        };

        match self.resolver.complete(record, resolved) {
            Some(service) => {
                info!(
                    service = %service.key,
                    host = service.host.as_deref().unwrap_or_default(),
                    port = service.port.unwrap_or_default(),
                    addresses = ?service.addresses,
                    "Service resolved"
                );
                vec![DiscoveryEventKind::ServiceResolved { service }]
            }
            None => Vec::new(),
        }
    }

    pub fn on_resolve_failed(&mut self, key: ServiceKey, error: StackError) -> Vec<DiscoveryEventKind> {
        let Some(record) = self.records.get_mut(&key) else {
            debug!(service = %key, "Ignoring resolve failure of untracked service");
            return Vec::new();
        };

        match self.resolver.fail(record, error) {
            Some(error) => {
                warn!(service = %key, error = %error, "Service could not be resolved");
                self.records.remove(&key);
                vec![DiscoveryEventKind::ServiceResolveFailed { key, error }]
            }
            None => Vec::new(),
        }
    }

    pub fn on_timeout(&mut self, stack: &dyn DiscoveryStack, expiry: Expiry) -> Vec<DiscoveryEventKind> {
        let key = expiry.key.clone();
        let record = self.records.get_mut(&key);

        match self.resolver.expire(stack, expiry, record) {
            Some(error) => {
                warn!(service = %key, error = %error, "Service resolution timed out");
                self.records.remove(&key);
                vec![DiscoveryEventKind::ServiceResolveFailed { key, error }]
            }
            None => Vec::new(),
        }
    }

    /// Waits for the next resolve timeout, `None` when nothing is pending
    pub async fn next_timeout(&mut self) -> Option<Expiry> {
        self.resolver.next_expired().await
    }
}
