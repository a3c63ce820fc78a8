//! In-memory stack that records requests, for unit tests

use crate::address::SockaddrLayout;
use crate::error::StackError;
use crate::record::ServiceKey;
use crate::stack::{Advertisement, DiscoveryStack, StackEvent};
use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::time::Duration;

pub(crate) struct RecordingStack {
    events_tx: Sender<StackEvent>,
    events_rx: Receiver<StackEvent>,
    browses: Mutex<Vec<(String, String)>>,
    stop_browses: Mutex<usize>,
    resolves: Mutex<Vec<ServiceKey>>,
    stopped_resolves: Mutex<Vec<ServiceKey>>,
    registrations: Mutex<Vec<Advertisement>>,
    unregistrations: Mutex<Vec<ServiceKey>>,
    browse_error: Mutex<Option<StackError>>,
    resolve_error: Mutex<Option<StackError>>,
    register_error: Mutex<Option<StackError>>,
    metadata: Mutex<bool>,
}

impl Default for RecordingStack {
    fn default() -> Self {
        let (events_tx, events_rx) = async_channel::unbounded();
        Self {
            events_tx,
            events_rx,
            browses: Mutex::new(Vec::new()),
            stop_browses: Mutex::new(0),
            resolves: Mutex::new(Vec::new()),
            stopped_resolves: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
            unregistrations: Mutex::new(Vec::new()),
            browse_error: Mutex::new(None),
            resolve_error: Mutex::new(None),
            register_error: Mutex::new(None),
            metadata: Mutex::new(true),
        }
    }
}

impl RecordingStack {
    pub fn browses(&self) -> Vec<(String, String)> {
        self.browses.lock().clone()
    }

    pub fn stop_browse_count(&self) -> usize {
        *self.stop_browses.lock()
    }

    pub fn resolves(&self) -> Vec<ServiceKey> {
        self.resolves.lock().clone()
    }

    pub fn stopped_resolves(&self) -> Vec<ServiceKey> {
        self.stopped_resolves.lock().clone()
    }

    pub fn registrations(&self) -> Vec<Advertisement> {
        self.registrations.lock().clone()
    }

    pub fn unregistrations(&self) -> Vec<ServiceKey> {
        self.unregistrations.lock().clone()
    }

    pub fn refuse_browses(&self, error: StackError) {
        *self.browse_error.lock() = Some(error);
    }

    pub fn refuse_resolves(&self, error: StackError) {
        *self.resolve_error.lock() = Some(error);
    }

    pub fn refuse_registrations(&self, error: StackError) {
        *self.register_error.lock() = Some(error);
    }

    pub fn set_supports_metadata(&self, supported: bool) {
        *self.metadata.lock() = supported;
    }

    /// Delivers a notification as if the stack had raised it
    pub fn notify(&self, event: StackEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

impl DiscoveryStack for RecordingStack {
    fn subscribe(&self) -> Receiver<StackEvent> {
        self.events_rx.clone()
    }

    fn browse(&self, service_type: &str, domain: &str) -> Result<(), StackError> {
        if let Some(error) = self.browse_error.lock().clone() {
            return Err(error);
        }
        self.browses
            .lock()
            .push((service_type.to_string(), domain.to_string()));
        Ok(())
    }

    fn stop_browse(&self) -> Result<(), StackError> {
        *self.stop_browses.lock() += 1;
        Ok(())
    }

    fn resolve(&self, key: &ServiceKey, _timeout: Duration) -> Result<(), StackError> {
        if let Some(error) = self.resolve_error.lock().clone() {
            return Err(error);
        }
        self.resolves.lock().push(key.clone());
        Ok(())
    }

    fn stop_resolve(&self, key: &ServiceKey) {
        self.stopped_resolves.lock().push(key.clone());
    }

    fn register(&self, advertisement: &Advertisement) -> Result<(), StackError> {
        if let Some(error) = self.register_error.lock().clone() {
            return Err(error);
        }
        self.registrations.lock().push(advertisement.clone());
        Ok(())
    }

    fn unregister(&self, key: &ServiceKey) -> Result<(), StackError> {
        self.unregistrations.lock().push(key.clone());
        Ok(())
    }

    fn supports_metadata(&self) -> bool {
        *self.metadata.lock()
    }

    fn address_layout(&self) -> SockaddrLayout {
        SockaddrLayout::LINUX
    }
}
