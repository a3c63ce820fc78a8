//! Scripted discovery stack and helpers for manager integration tests

#![allow(dead_code)]

use async_channel::{Receiver, Sender};
use bytes::Bytes;
use lanseer_discovery::address::encode_socket_addr;
use lanseer_discovery::{
    Advertisement, DiscoveryEvent, DiscoveryEventKind, DiscoveryStack, ResolvedService,
    ServiceKey, SockaddrLayout, StackError, StackEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// A request the manager made of the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Browse(String, String),
    StopBrowse,
    Resolve(ServiceKey),
    StopResolve(ServiceKey),
    Register(Advertisement),
    Unregister(ServiceKey),
    Shutdown,
}

/// Stack whose notifications are pushed by the test.
///
/// With `auto_publish` set, registrations and withdrawals are confirmed the
/// way a well-behaved daemon would confirm them.
pub struct ScriptedStack {
    tx: Sender<StackEvent>,
    rx: Receiver<StackEvent>,
    calls: Mutex<Vec<Call>>,
    auto_publish: bool,
}

impl ScriptedStack {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            tx,
            rx,
            calls: Mutex::new(Vec::new()),
            auto_publish: false,
        }
    }

    pub fn auto_publishing() -> Self {
        Self {
            auto_publish: true,
            ..Self::new()
        }
    }

    pub fn push(&self, event: StackEvent) {
        self.tx.try_send(event).expect("notification channel closed");
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn found(&self, name: &str, more_coming: bool) {
        self.push(StackEvent::Found {
            key: http(name),
            more_coming,
        });
    }

    pub fn removed(&self, name: &str) {
        self.push(StackEvent::Removed {
            key: http(name),
            more_coming: false,
        });
    }

    pub fn resolved(&self, name: &str, addresses: Vec<Bytes>) {
        self.push(StackEvent::Resolved(ResolvedService {
            key: http(name),
            host: format!("{}.local.", name),
            port: 80,
            addresses,
            txt: HashMap::from([("path".to_string(), b"/".to_vec())]),
        }));
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl DiscoveryStack for ScriptedStack {
    fn subscribe(&self) -> Receiver<StackEvent> {
        self.rx.clone()
    }

    fn browse(&self, service_type: &str, domain: &str) -> Result<(), StackError> {
        self.record(Call::Browse(service_type.to_string(), domain.to_string()));
        Ok(())
    }

    fn stop_browse(&self) -> Result<(), StackError> {
        self.record(Call::StopBrowse);
        Ok(())
    }

    fn resolve(&self, key: &ServiceKey, _timeout: Duration) -> Result<(), StackError> {
        self.record(Call::Resolve(key.clone()));
        Ok(())
    }

    fn stop_resolve(&self, key: &ServiceKey) {
        self.record(Call::StopResolve(key.clone()));
    }

    fn register(&self, advertisement: &Advertisement) -> Result<(), StackError> {
        self.record(Call::Register(advertisement.clone()));
        if self.auto_publish {
            self.push(StackEvent::WillPublish {
                key: advertisement.key.clone(),
            });
            self.push(StackEvent::Published {
                key: advertisement.key.clone(),
            });
        }
        Ok(())
    }

    fn unregister(&self, key: &ServiceKey) -> Result<(), StackError> {
        self.record(Call::Unregister(key.clone()));
        if self.auto_publish {
            self.push(StackEvent::PublishStopped { key: key.clone() });
        }
        Ok(())
    }

    fn address_layout(&self) -> SockaddrLayout {
        SockaddrLayout::LINUX
    }

    fn shutdown(&self) -> Result<(), StackError> {
        self.record(Call::Shutdown);
        Ok(())
    }
}

pub fn http(name: &str) -> ServiceKey {
    ServiceKey::new("_http._tcp", "local", name)
}

pub fn sockaddr(addr: &str) -> Bytes {
    encode_socket_addr(addr.parse().expect("socket address"), SockaddrLayout::LINUX)
}

/// Waits for the next event, failing the test after ten seconds
pub async fn next_event(events: &Receiver<DiscoveryEvent>) -> DiscoveryEventKind {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for a discovery event")
        .expect("event channel closed")
        .kind
}

/// Pushes a `SearchStopped` marker and drains events up to its echo.
///
/// The manager handles notifications in order, so everything pushed before
/// the marker has been processed once this returns.
pub async fn drain_until_settled(
    stack: &ScriptedStack,
    events: &Receiver<DiscoveryEvent>,
) -> Vec<DiscoveryEventKind> {
    stack.push(StackEvent::SearchStopped);

    let mut seen = Vec::new();
    loop {
        match next_event(events).await {
            DiscoveryEventKind::SearchStopped => return seen,
            other => seen.push(other),
        }
    }
}
