//! Advertising local services
//!
//! A record stays in the publisher's table while it is `Publishing` or
//! `Published` and leaves it on `PublishFailed` or `Stopped`.

use crate::error::StackError;
use crate::event::DiscoveryEventKind;
use crate::record::{ServiceKey, ServiceRecord, ServiceState};
use crate::stack::{Advertisement, DiscoveryStack};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Local advertisement table
pub struct Publisher {
    host_name: Option<String>,
    records: HashMap<ServiceKey, ServiceRecord>,
}

impl Publisher {
    pub fn new(host_name: Option<String>) -> Self {
        Self {
            host_name,
            records: HashMap::new(),
        }
    }

    pub fn get(&self, key: &ServiceKey) -> Option<&ServiceRecord> {
        self.records.get(key)
    }

    /// Snapshot of every local record, sorted by key
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

    /// Creates a `Publishing` record and hands it to the stack.
    ///
    /// A previous record under the same key is replaced.
    pub fn register(
        &mut self,
        stack: &dyn DiscoveryStack,
        key: ServiceKey,
        port: u16,
        mut metadata: HashMap<String, Vec<u8>>,
    ) -> Vec<DiscoveryEventKind> {
        if !metadata.is_empty() && !stack.supports_metadata() {
            debug!(
                service = %key,
                entries = metadata.len(),
                "Stack cannot attach TXT metadata, advertising without it"
            );
            metadata.clear();
        }

        let mut record = ServiceRecord::local(key.clone(), port, metadata);
        record.host = self.host_name.clone();

        if let Some(previous) = self.records.insert(key.clone(), record.clone()) {
            warn!(
                service = %key,
                previous_state = %previous.state,
                "Replacing existing advertisement"
            );
        }

        info!(service = %key, port, "Publishing service");

        let advertisement = Advertisement {
            key: key.clone(),
            port,
            host_name: self.host_name.clone(),
            metadata: record.metadata,
        };

        match stack.register(&advertisement) {
            Ok(()) => Vec::new(),
            Err(error) => self.on_publish_failed(key, error),
        }
    }

    /// Requests withdrawal of a local advertisement. Unknown keys are ignored.
    pub fn unregister(&mut self, stack: &dyn DiscoveryStack, key: &ServiceKey) {
        if !self.records.contains_key(key) {
            debug!(service = %key, "Nothing to unregister");
            return;
        }

        info!(service = %key, "Withdrawing service");
        if let Err(e) = stack.unregister(key) {
            warn!(service = %key, error = %e, "Failed to withdraw service");
        }
    }

    /// Withdraws every local advertisement with the given instance name
    pub fn unregister_by_name(&mut self, stack: &dyn DiscoveryStack, name: &str) {
        let keys: Vec<_> = self
            .records
            .keys()
            .filter(|key| key.name == name)
            .cloned()
            .collect();

        if keys.is_empty() {
            debug!(name, "Nothing to unregister");
        }
        for key in keys {
            self.unregister(stack, &key);
        }
    }

    pub fn on_will_publish(&self, key: ServiceKey) -> Vec<DiscoveryEventKind> {
        if self.records.contains_key(&key) {
            vec![DiscoveryEventKind::PublishStarting { key }]
        } else {
            Vec::new()
        }
    }

    pub fn on_published(&mut self, key: ServiceKey) -> Vec<DiscoveryEventKind> {
        let Some(record) = self.records.get_mut(&key) else {
            debug!(service = %key, "Ignoring publish of untracked service");
            return Vec::new();
        };

        if record.state == ServiceState::Published {
            return Vec::new();
        }

        match record.transition(ServiceState::Published) {
            Ok(()) => {
                info!(service = %key, "Service published");
                vec![DiscoveryEventKind::ServicePublished {
                    service: record.clone(),
                }]
            }
            Err(e) => {
                warn!(error = %e, "Unexpected publish notification");
                Vec::new()
            }
        }
    }

    pub fn on_publish_failed(&mut self, key: ServiceKey, error: StackError) -> Vec<DiscoveryEventKind> {
        let Some(mut record) = self.records.remove(&key) else {
            debug!(service = %key, "Ignoring publish failure of untracked service");
            return Vec::new();
        };

        warn!(service = %key, error = %error, "Service could not be published");
        if let Err(e) = record.transition(ServiceState::PublishFailed) {
            warn!(error = %e, "Unexpected state on publish failure");
        }

        vec![DiscoveryEventKind::ServicePublishFailed { key, error }]
    }

    pub fn on_stopped(&mut self, key: ServiceKey) -> Vec<DiscoveryEventKind> {
        let Some(mut record) = self.records.remove(&key) else {
            debug!(service = %key, "Ignoring stop of untracked service");
            return Vec::new();
        };

        info!(service = %key, "Service withdrawn");
        if let Err(e) = record.transition(ServiceState::Stopped) {
            warn!(error = %e, "Unexpected state on stop");
        }

        vec![DiscoveryEventKind::ServiceStopped { key }]
    }
}
