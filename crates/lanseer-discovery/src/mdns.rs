//! [`DiscoveryStack`] backed by the `mdns-sd` daemon
//!
//! `mdns-sd` resolves every instance it finds on its own and never reports
//! probe collisions, so this adapter bridges the gap: resolutions are cached
//! per key and handed out when the manager asks for them, and a successful
//! `register` call counts as published.

use crate::address::{encode_socket_addr, SockaddrLayout};
use crate::error::{DiscoveryError, Result, StackError, StackErrorCode};
use crate::record::ServiceKey;
use crate::stack::{Advertisement, DiscoveryStack, ResolvedService, StackEvent};
use async_channel::{Receiver, Sender};
use mdns_sd::{ServiceDaemon, ServiceEvent as MdnsEvent, ServiceInfo, UnregisterStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Default)]
struct MdnsState {
    /// Active search as (service_type, domain)
    browsing: Option<(String, String)>,
    /// Bumped on every browse and stop so forwarders of earlier searches
    /// can tell they are stale, even for the same type
    generation: u64,
    resolved: HashMap<ServiceKey, ResolvedService>,
    pending: HashSet<ServiceKey>,
}

impl MdnsState {
    /// Starts a new search and returns its generation
    fn begin_search(&mut self, service_type: &str, domain: &str) -> u64 {
        self.end_search();
        self.browsing = Some((service_type.to_string(), domain.to_string()));
        self.generation
    }

    /// Forgets the active search and everything learned during it
    fn end_search(&mut self) -> Option<(String, String)> {
        self.generation += 1;
        self.resolved.clear();
        self.pending.clear();
        self.browsing.take()
    }
}

/// mDNS stack driving a [`ServiceDaemon`]
pub struct MdnsSdStack {
    daemon: ServiceDaemon,
    layout: SockaddrLayout,
    state: Arc<Mutex<MdnsState>>,
    events_tx: Sender<StackEvent>,
    events_rx: Receiver<StackEvent>,
}

impl MdnsSdStack {
    /// Creates the mDNS daemon
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| {
            DiscoveryError::MdnsInitFailed(format!("Failed to create mDNS daemon: {}", e))
        })?;

        let (events_tx, events_rx) = async_channel::unbounded();

        info!("mDNS daemon created");

        Ok(Self {
            daemon,
            layout: SockaddrLayout::native(),
            state: Arc::new(Mutex::new(MdnsState::default())),
            events_tx,
            events_rx,
        })
    }

    fn publish(&self, event: StackEvent) {
        if self.events_tx.try_send(event).is_err() {
            debug!("Stack notification dropped, no subscriber");
        }
    }
}

impl DiscoveryStack for MdnsSdStack {
    fn subscribe(&self) -> Receiver<StackEvent> {
        self.events_rx.clone()
    }

    fn browse(&self, service_type: &str, domain: &str) -> std::result::Result<(), StackError> {
        let ty_domain = format!("{}.{}.", service_type, domain);

        let receiver = self
            .daemon
            .browse(&ty_domain)
            .map_err(|e| StackError::bad_argument(format!("browse {}: {}", ty_domain, e)))?;

        let generation = self.state.lock().begin_search(service_type, domain);
        self.publish(StackEvent::WillSearch);

        let forwarder = Forwarder {
            service_type: service_type.to_string(),
            domain: domain.to_string(),
            ty_domain,
            generation,
            layout: self.layout,
            state: self.state.clone(),
            events: self.events_tx.clone(),
        };

        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                let more_coming = !receiver.is_empty();
                forwarder.forward(event, more_coming);
            }
            debug!(service_type = %forwarder.ty_domain, "Browse receiver closed");
        });

        Ok(())
    }

    fn stop_browse(&self) -> std::result::Result<(), StackError> {
        let browsing = self.state.lock().end_search();
        let Some((service_type, domain)) = browsing else {
            return Ok(());
        };

        let ty_domain = format!("{}.{}.", service_type, domain);
        self.daemon
            .stop_browse(&ty_domain)
            .map_err(|e| StackError::new(StackErrorCode::Invalid, e.to_string()))
    }

    fn resolve(&self, key: &ServiceKey, _timeout: Duration) -> std::result::Result<(), StackError> {
        let cached = {
            let mut state = self.state.lock();
            let cached = state.resolved.get(key).cloned();
            if cached.is_none() {
                state.pending.insert(key.clone());
            }
            cached
        };

        if let Some(resolved) = cached {
            self.publish(StackEvent::Resolved(resolved));
        }
        Ok(())
    }

    fn stop_resolve(&self, key: &ServiceKey) {
        self.state.lock().pending.remove(key);
    }

    fn register(&self, advertisement: &Advertisement) -> std::result::Result<(), StackError> {
        let key = &advertisement.key;
        let host_name = match advertisement.host_name {
            Some(ref name) => mdns_host_name(name),
            None => {
                let name = hostname::get()
                    .map_err(|e| StackError::unknown(format!("hostname lookup failed: {}", e)))?;
                mdns_host_name(&name.to_string_lossy())
            }
        };

        let mut properties = HashMap::new();
        for (name, value) in &advertisement.metadata {
            match std::str::from_utf8(value) {
                Ok(text) => {
                    properties.insert(name.clone(), text.to_string());
                }
                Err(_) => {
                    warn!(service = %key, entry = %name, "Dropping non-UTF-8 TXT value");
                }
            }
        }

        let info = ServiceInfo::new(
            &key.ty_domain(),
            &key.name,
            &host_name,
            "",
            advertisement.port,
            properties,
        )
        .map_err(|e| StackError::bad_argument(e.to_string()))?
        .enable_addr_auto();

        self.publish(StackEvent::WillPublish { key: key.clone() });

        self.daemon
            .register(info)
            .map_err(|e| StackError::new(StackErrorCode::Invalid, e.to_string()))?;

        debug!(service = %key, host = %host_name, "Registered with mDNS daemon");
        self.publish(StackEvent::Published { key: key.clone() });
        Ok(())
    }

    fn unregister(&self, key: &ServiceKey) -> std::result::Result<(), StackError> {
        let receiver = self
            .daemon
            .unregister(&key.fullname())
            .map_err(|e| StackError::new(StackErrorCode::Invalid, e.to_string()))?;

        let key = key.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            match receiver.recv_async().await {
                Ok(UnregisterStatus::OK) => debug!(service = %key, "Unregistered from mDNS daemon"),
                Ok(UnregisterStatus::NotFound) => {
                    debug!(service = %key, "mDNS daemon had no such registration")
                }
                Err(e) => warn!(service = %key, error = %e, "No unregister confirmation"),
            }
            let _ = events.try_send(StackEvent::PublishStopped { key });
        });

        Ok(())
    }

    fn address_layout(&self) -> SockaddrLayout {
        self.layout
    }

    fn shutdown(&self) -> std::result::Result<(), StackError> {
        info!("Shutting down mDNS daemon");
        self.daemon
            .shutdown()
            .map(|_| ())
            .map_err(|e| StackError::unknown(format!("Failed to shutdown mDNS daemon: {}", e)))
    }
}

/// Translates daemon events for one search into stack notifications
struct Forwarder {
    service_type: String,
    domain: String,
    ty_domain: String,
    generation: u64,
    layout: SockaddrLayout,
    state: Arc<Mutex<MdnsState>>,
    events: Sender<StackEvent>,
}

impl Forwarder {
    fn forward(&self, event: MdnsEvent, more_coming: bool) {
        match event {
            MdnsEvent::SearchStarted(ty) => {
                debug!(typ = ty, "Search started");
            }

            MdnsEvent::ServiceFound(_, fullname) => {
                let Some(key) = self.key_for(&fullname) else {
                    return;
                };
                if self.is_current(&self.state.lock()) {
                    self.send(StackEvent::Found { key, more_coming });
                }
            }

            MdnsEvent::ServiceResolved(info) => {
                let Some(key) = self.key_for(info.get_fullname()) else {
                    return;
                };
                let port = info.get_port();

                let addresses = info
                    .get_addresses()
                    .iter()
                    .map(|ip| encode_socket_addr(SocketAddr::new(*ip, port), self.layout))
                    .collect();

                let txt = info
                    .get_properties()
                    .iter()
                    .map(|p| (p.key().to_string(), p.val().map(<[u8]>::to_vec).unwrap_or_default()))
                    .collect();

                let resolved = ResolvedService {
                    key: key.clone(),
                    host: info.get_hostname().to_string(),
                    port,
                    addresses,
                    txt,
                };

                let wanted = {
                    let mut state = self.state.lock();
                    if !self.is_current(&state) {
                        return;
                    }
                    state.resolved.insert(key.clone(), resolved.clone());
                    state.pending.remove(&key)
                };

                if wanted {
                    self.send(StackEvent::Resolved(resolved));
                }
            }

            MdnsEvent::ServiceRemoved(_, fullname) => {
                let Some(key) = self.key_for(&fullname) else {
                    return;
                };
                {
                    let mut state = self.state.lock();
                    if !self.is_current(&state) {
                        return;
                    }
                    state.resolved.remove(&key);
                    state.pending.remove(&key);
                }
                self.send(StackEvent::Removed { key, more_coming });
            }

            MdnsEvent::SearchStopped(ty) => {
                debug!(typ = ty, "Search stopped");
                self.send(StackEvent::SearchStopped);
            }

            #[allow(unreachable_patterns)]
            other => {
                debug!(event = ?other, "Ignoring mDNS event");
            }
        }
    }

    fn is_current(&self, state: &MdnsState) -> bool {
        state.browsing.is_some() && state.generation == self.generation
    }

    /// Splits `name._type._proto.domain.` into a key for this search
    fn key_for(&self, fullname: &str) -> Option<ServiceKey> {
        let suffix = format!(".{}", self.ty_domain);
        match fullname.strip_suffix(&suffix) {
            Some(name) if !name.is_empty() => {
                Some(ServiceKey::new(&self.service_type, &self.domain, name))
            }
            _ => {
                debug!(fullname, "Ignoring instance outside the active search");
                None
            }
        }
    }

    fn send(&self, event: StackEvent) {
        let _ = self.events.try_send(event);
    }
}

/// Turns a bare or qualified host name into `host.local.`
fn mdns_host_name(name: &str) -> String {
    let name = name.trim_end_matches('.');
    let name = name.strip_suffix(".local").unwrap_or(name);
    format!("{}.local.", name)
}
