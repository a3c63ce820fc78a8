//! Discovery manager
//!
//! [`DiscoveryManager`] is a cheap, cloneable handle. All state lives in a
//! single background task that owns the [`Browser`], the [`Publisher`] and
//! the resolve timers, and serializes three inputs: host commands, stack
//! notifications and timer expirations. Nothing in here takes a lock.

use crate::browser::Browser;
use crate::error::{DiscoveryError, Result};
use crate::event::{DiscoveryEvent, DiscoveryEventKind};
use crate::publisher::Publisher;
use crate::record::{ServiceKey, ServiceRecord};
use crate::stack::{DiscoveryStack, StackEvent};
use async_channel::{Receiver, Sender, TrySendError};
use lanseer_core::{DiscoveryConfig, ServiceDefinition};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

enum Command {
    Scan {
        service_type: String,
        domain: String,
    },
    Stop,
    Register {
        key: ServiceKey,
        port: u16,
        metadata: HashMap<String, Vec<u8>>,
    },
    Unregister {
        key: ServiceKey,
    },
    UnregisterByName {
        name: String,
    },
    RemoteServices(oneshot::Sender<Vec<ServiceRecord>>),
    LocalServices(oneshot::Sender<Vec<ServiceRecord>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running discovery manager
#[derive(Clone)]
pub struct DiscoveryManager {
    commands: Sender<Command>,
    events: Receiver<DiscoveryEvent>,
    running: Arc<AtomicBool>,
}

impl DiscoveryManager {
    /// Validates `config` and spawns the manager task on the current runtime
    pub fn start(stack: Arc<dyn DiscoveryStack>, config: &DiscoveryConfig) -> Result<Self> {
        config.validate()?;

        let (command_tx, command_rx) = async_channel::unbounded();
        let (event_tx, event_rx) = async_channel::bounded(config.event_channel_capacity);
        let running = Arc::new(AtomicBool::new(true));

        let notifications = stack.subscribe();
        let browser = Browser::new(config.resolve_timeout(), stack.address_layout());
        let publisher = Publisher::new(config.host_name.clone());

        info!(
            resolve_timeout_ms = config.resolve_timeout().as_millis() as u64,
            event_capacity = config.event_channel_capacity,
            "Discovery manager started"
        );

        let actor = ManagerTask {
            stack,
            commands: command_rx,
            notifications,
            stack_open: true,
            events: event_tx,
            browser,
            publisher,
            running: running.clone(),
        };
        tokio::spawn(actor.run());

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            running,
        })
    }

    /// Starts browsing for `service_type` in `domain`, replacing any active search
    pub fn scan(&self, service_type: &str, domain: &str) -> Result<()> {
        self.send(Command::Scan {
            service_type: service_type.to_string(),
            domain: domain.to_string(),
        })
    }

    /// Stops the active search and forgets every remote service
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Advertises a local service
    pub fn register_service(
        &self,
        service_type: &str,
        domain: &str,
        name: &str,
        port: u16,
        metadata: HashMap<String, Vec<u8>>,
    ) -> Result<()> {
        self.send(Command::Register {
            key: ServiceKey::new(service_type, domain, name),
            port,
            metadata,
        })
    }

    /// Advertises a service described in configuration
    pub fn register_definition(&self, definition: &ServiceDefinition) -> Result<()> {
        let metadata = definition
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().into_bytes()))
            .collect();

        self.register_service(
            &definition.service_type,
            &definition.domain,
            &definition.name,
            definition.port,
            metadata,
        )
    }

    /// Withdraws a local service. Unknown services are ignored.
    pub fn unregister_service(&self, service_type: &str, domain: &str, name: &str) -> Result<()> {
        self.send(Command::Unregister {
            key: ServiceKey::new(service_type, domain, name),
        })
    }

    /// Withdraws every local service published under `name`
    pub fn unregister_by_name(&self, name: &str) -> Result<()> {
        self.send(Command::UnregisterByName {
            name: name.to_string(),
        })
    }

    /// Returns the event receiver for the host application
    pub fn events(&self) -> Receiver<DiscoveryEvent> {
        self.events.clone()
    }

    /// Snapshot of the remote service table
    pub async fn remote_services(&self) -> Result<Vec<ServiceRecord>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::RemoteServices(tx))?;
        rx.await.map_err(|_| DiscoveryError::ManagerClosed)
    }

    /// Snapshot of the local service table
    pub async fn local_services(&self) -> Result<Vec<ServiceRecord>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::LocalServices(tx))?;
        rx.await.map_err(|_| DiscoveryError::ManagerClosed)
    }

    /// Stops browsing and ends the manager task. Local advertisements are
    /// left to the stack.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown(tx)).is_err() {
            debug!("Discovery manager already stopped");
            return Ok(());
        }
        // A dropped reply means the task finished first.
        let _ = rx.await;
        Ok(())
    }

    /// Returns whether the manager task is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .try_send(command)
            .map_err(|_| DiscoveryError::ManagerClosed)
    }
}

struct ManagerTask {
    stack: Arc<dyn DiscoveryStack>,
    commands: Receiver<Command>,
    notifications: Receiver<StackEvent>,
    stack_open: bool,
    events: Sender<DiscoveryEvent>,
    browser: Browser,
    publisher: Publisher,
    running: Arc<AtomicBool>,
}

/// Marks the manager stopped however the task ends, panics included.
/// Commands still queued are dropped so pending queries see `ManagerClosed`.
struct ExitGuard {
    running: Arc<AtomicBool>,
    commands: Receiver<Command>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.commands.close();
        while self.commands.try_recv().is_ok() {}
    }
}

impl ManagerTask {
    async fn run(mut self) {
        let _exit = ExitGuard {
            running: self.running.clone(),
            commands: self.commands.clone(),
        };

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Ok(Command::Shutdown(reply)) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Ok(command) => self.handle_command(command),
                    Err(_) => {
                        debug!("All manager handles dropped");
                        self.shutdown();
                        break;
                    }
                },
                notification = self.notifications.recv(), if self.stack_open => match notification {
                    Ok(event) => self.handle_notification(event),
                    Err(_) => {
                        warn!("Stack notification stream closed");
                        self.stack_open = false;
                    }
                },
                Some(expiry) = self.browser.next_timeout() => {
                    let events = self.browser.on_timeout(self.stack.as_ref(), expiry);
                    self.emit_all(events);
                }
            }
        }

        debug!("Discovery manager task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let stack = self.stack.as_ref();

        let events = match command {
            Command::Scan {
                service_type,
                domain,
            } => self.browser.scan(stack, &service_type, &domain),
            Command::Stop => {
                self.browser.stop(stack);
                Vec::new()
            }
            Command::Register { key, port, metadata } => {
                self.publisher.register(stack, key, port, metadata)
            }
            Command::Unregister { key } => {
                self.publisher.unregister(stack, &key);
                Vec::new()
            }
            Command::UnregisterByName { name } => {
                self.publisher.unregister_by_name(stack, &name);
                Vec::new()
            }
            Command::RemoteServices(reply) => {
                let _ = reply.send(self.browser.records());
                Vec::new()
            }
            Command::LocalServices(reply) => {
                let _ = reply.send(self.publisher.records());
                Vec::new()
            }
            // Handled by the run loop.
            Command::Shutdown(_) => Vec::new(),
        };

        self.emit_all(events);
    }

    fn handle_notification(&mut self, event: StackEvent) {
        let stack = self.stack.as_ref();

        let events = match event {
            StackEvent::WillSearch => self.browser.on_will_search(),
            StackEvent::Found { key, more_coming } => self.browser.on_found(stack, key, more_coming),
            StackEvent::Removed { key, more_coming } => {
                self.browser.on_removed(stack, key, more_coming)
            }
            StackEvent::SearchFailed { error } => self.browser.on_search_failed(error),
            StackEvent::SearchStopped => self.browser.on_search_stopped(),
            StackEvent::Resolved(resolved) => self.browser.on_resolved(resolved),
            StackEvent::ResolveFailed { key, error } => self.browser.on_resolve_failed(key, error),
            StackEvent::WillPublish { key } => self.publisher.on_will_publish(key),
            StackEvent::Published { key } => self.publisher.on_published(key),
            StackEvent::PublishFailed { key, error } => {
                self.publisher.on_publish_failed(key, error)
            }
            StackEvent::PublishStopped { key } => self.publisher.on_stopped(key),
        };

        self.emit_all(events);
    }

    fn emit_all(&self, events: Vec<DiscoveryEventKind>) {
        for kind in events {
            self.emit(kind);
        }
    }

    fn emit(&self, kind: DiscoveryEventKind) {
        match self.events.try_send(DiscoveryEvent::new(kind)) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(event = event.kind.description(), "Event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn shutdown(&mut self) {
        info!("Stopping discovery manager");
        self.running.store(false, Ordering::SeqCst);
        self.commands.close();

        self.browser.stop(self.stack.as_ref());
        if let Err(e) = self.stack.shutdown() {
            warn!(error = %e, "Failed to shut down discovery stack");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{encode_socket_addr, SockaddrLayout};
    use crate::error::StackError;
    use crate::stack::{Advertisement, ResolvedService};
    use crate::testing::RecordingStack;
    use std::time::Duration;

    async fn next_kind(events: &Receiver<DiscoveryEvent>) -> DiscoveryEventKind {
        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
            .kind
    }

    #[tokio::test]
    async fn test_found_and_resolved_reach_host() {
        let stack = Arc::new(RecordingStack::default());
        let manager = DiscoveryManager::start(stack.clone(), &DiscoveryConfig::default()).unwrap();
        let events = manager.events();

        manager.scan("_http._tcp", "local").unwrap();
        manager.remote_services().await.unwrap();
        stack.notify(StackEvent::WillSearch);
        assert!(matches!(
            next_kind(&events).await,
            DiscoveryEventKind::SearchStarting { .. }
        ));

        let key = ServiceKey::new("_http._tcp", "local", "printer-1");
        stack.notify(StackEvent::Found {
            key: key.clone(),
            more_coming: false,
        });
        assert!(matches!(
            next_kind(&events).await,
            DiscoveryEventKind::ServiceDiscovered { .. }
        ));

        stack.notify(StackEvent::Resolved(ResolvedService {
            key: key.clone(),
            host: "printer-1.local.".to_string(),
            port: 631,
            addresses: vec![encode_socket_addr(
                "192.0.2.10:631".parse().unwrap(),
                SockaddrLayout::LINUX,
            )],
            txt: HashMap::new(),
        }));
        let DiscoveryEventKind::ServiceResolved { service } = next_kind(&events).await else {
            panic!("expected resolution");
        };
        assert_eq!(service.addresses, vec!["192.0.2.10".to_string()]);

        let remote = manager.remote_services().await.unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].key, key);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_further_commands() {
        let stack = Arc::new(RecordingStack::default());
        let manager = DiscoveryManager::start(stack.clone(), &DiscoveryConfig::default()).unwrap();
        assert!(manager.is_running());

        manager.scan("_http._tcp", "local").unwrap();
        manager.shutdown().await.unwrap();

        assert!(!manager.is_running());
        assert!(matches!(manager.stop(), Err(DiscoveryError::ManagerClosed)));
        assert!(matches!(
            manager.remote_services().await,
            Err(DiscoveryError::ManagerClosed)
        ));
        assert_eq!(stack.stop_browse_count(), 1);
        // Idempotent
        manager.shutdown().await.unwrap();
    }

    /// Stack whose browse call panics, taking the manager task down with it
    struct PanickingStack {
        rx: Receiver<StackEvent>,
        _tx: Sender<StackEvent>,
    }

    impl DiscoveryStack for PanickingStack {
        fn subscribe(&self) -> Receiver<StackEvent> {
            self.rx.clone()
        }

        fn browse(&self, _service_type: &str, _domain: &str) -> std::result::Result<(), StackError> {
            panic!("browse exploded");
        }

        fn stop_browse(&self) -> std::result::Result<(), StackError> {
            Ok(())
        }

        fn resolve(&self, _key: &ServiceKey, _timeout: Duration) -> std::result::Result<(), StackError> {
            Ok(())
        }

        fn stop_resolve(&self, _key: &ServiceKey) {}

        fn register(&self, _advertisement: &Advertisement) -> std::result::Result<(), StackError> {
            Ok(())
        }

        fn unregister(&self, _key: &ServiceKey) -> std::result::Result<(), StackError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_task_exit_clears_running() {
        let (tx, rx) = async_channel::unbounded();
        let stack = Arc::new(PanickingStack { rx, _tx: tx });
        let manager = DiscoveryManager::start(stack, &DiscoveryConfig::default()).unwrap();
        assert!(manager.is_running());

        manager.scan("_http._tcp", "local").unwrap();
        assert!(matches!(
            manager.remote_services().await,
            Err(DiscoveryError::ManagerClosed)
        ));
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_oversized_timeout_is_rejected() {
        let stack = Arc::new(RecordingStack::default());
        let config = DiscoveryConfig {
            resolve_timeout_secs: 1.0e9,
            ..Default::default()
        };
        assert!(matches!(
            DiscoveryManager::start(stack, &config),
            Err(DiscoveryError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let stack = Arc::new(RecordingStack::default());
        let config = DiscoveryConfig {
            resolve_timeout_secs: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            DiscoveryManager::start(stack, &config),
            Err(DiscoveryError::InvalidConfig(_))
        ));
    }
}
