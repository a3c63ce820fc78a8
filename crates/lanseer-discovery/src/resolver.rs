//! Resolution of found services
//!
//! Every call to [`Resolver::resolve`] opens a numbered attempt with its own
//! timeout. The attempt ends exactly once: on the stack's success, on the
//! stack's failure, or when its timer expires, whichever comes first.
//! Notifications that arrive for a record no longer `Resolving` are stale and
//! ignored, and so are timers whose attempt number has been superseded.

use crate::address::{extract_addresses, SockaddrLayout};
use crate::error::{ResolveFailure, StackError};
use crate::record::{ServiceKey, ServiceRecord, ServiceState};
use crate::stack::{DiscoveryStack, ResolvedService};
use std::collections::HashMap;
use std::future::poll_fn;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, warn};

/// A resolve timer that fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub key: ServiceKey,
    pub attempt: u64,
}

#[derive(Debug)]
struct PendingResolve {
    attempt: u64,
    timer: delay_queue::Key,
    timeout: Duration,
}

/// Tracks in-flight resolutions and their timeouts
pub struct Resolver {
    default_timeout: Duration,
    layout: SockaddrLayout,
    pending: HashMap<ServiceKey, PendingResolve>,
    timers: DelayQueue<Expiry>,
    next_attempt: u64,
}

impl Resolver {
    pub fn new(default_timeout: Duration, layout: SockaddrLayout) -> Self {
        Self {
            default_timeout,
            layout,
            pending: HashMap::new(),
            timers: DelayQueue::new(),
            next_attempt: 1,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Number of attempts still waiting for an outcome
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &ServiceKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Starts resolving `record`, moving it to `Resolving`.
    ///
    /// Returns a failure when the stack refuses the request outright; the
    /// record is then already in `ResolveFailed`.
    pub fn resolve(
        &mut self,
        stack: &dyn DiscoveryStack,
        record: &mut ServiceRecord,
        timeout: Duration,
    ) -> Option<ResolveFailure> {
        if let Err(e) = record.transition(ServiceState::Resolving) {
            warn!(error = %e, "Refusing to resolve");
            return None;
        }

        self.cancel(&record.key);

        let attempt = self.next_attempt;
        self.next_attempt += 1;

        let timer = self.timers.insert(
            Expiry {
                key: record.key.clone(),
                attempt,
            },
            timeout,
        );
        self.pending.insert(
            record.key.clone(),
            PendingResolve {
                attempt,
                timer,
                timeout,
            },
        );

        debug!(
            service = %record.key,
            attempt,
            timeout_ms = timeout.as_millis() as u64,
            "Resolving service"
        );

        if let Err(error) = stack.resolve(&record.key, timeout) {
            self.cancel(&record.key);
            return self.fail(record, error);
        }

        None
    }

    /// Applies the stack's answer. Returns the resolved record, or `None`
    /// if the answer is stale.
    pub fn complete(
        &mut self,
        record: &mut ServiceRecord,
        resolved: ResolvedService,
    ) -> Option<ServiceRecord> {
        if record.state != ServiceState::Resolving {
            debug!(service = %record.key, state = %record.state, "Ignoring stale resolution");
            return None;
        }

        self.cancel(&record.key);

        let addresses = extract_addresses(&resolved.addresses, self.layout);
        if addresses.len() < resolved.addresses.len() {
            debug!(
                service = %record.key,
                reported = resolved.addresses.len(),
                usable = addresses.len(),
                "Skipped non-IP address records"
            );
        }

        match record.apply_resolution(resolved.host, resolved.port, addresses, resolved.txt) {
            Ok(()) => Some(record.clone()),
            Err(e) => {
                warn!(error = %e, "Failed to apply resolution");
                None
            }
        }
    }

    /// Applies the stack's failure. Returns `None` if it is stale.
    pub fn fail(&mut self, record: &mut ServiceRecord, error: StackError) -> Option<ResolveFailure> {
        if record.state != ServiceState::Resolving {
            debug!(service = %record.key, state = %record.state, "Ignoring stale resolve failure");
            return None;
        }

        self.cancel(&record.key);
        record.transition(ServiceState::ResolveFailed).ok()?;
        Some(ResolveFailure::Stack { error })
    }

    /// Handles a fired timer. `record` is the live table entry for the
    /// expired key, if there still is one.
    pub fn expire(
        &mut self,
        stack: &dyn DiscoveryStack,
        expiry: Expiry,
        record: Option<&mut ServiceRecord>,
    ) -> Option<ResolveFailure> {
        let timeout = match self.pending.get(&expiry.key) {
            Some(pending) if pending.attempt == expiry.attempt => pending.timeout,
            _ => {
                debug!(service = %expiry.key, attempt = expiry.attempt, "Ignoring superseded timer");
                return None;
            }
        };
        // The timer has already left the queue.
        self.pending.remove(&expiry.key);
        stack.stop_resolve(&expiry.key);

        let record = record?;
        if record.state != ServiceState::Resolving {
            return None;
        }
        record.transition(ServiceState::ResolveFailed).ok()?;

        Some(ResolveFailure::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    /// Drops a pending attempt without producing an outcome
    pub fn abandon(&mut self, stack: &dyn DiscoveryStack, key: &ServiceKey) {
        if self.cancel(key) {
            stack.stop_resolve(key);
        }
    }

    /// Drops every pending attempt
    pub fn abandon_all(&mut self) {
        self.pending.clear();
        self.timers.clear();
    }

    /// Polls for the next fired timer
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<Expiry>> {
        self.timers
            .poll_expired(cx)
            .map(|expired| expired.map(|entry| entry.into_inner()))
    }

    /// Waits for the next fired timer. Resolves to `None` at once when no
    /// attempt is pending.
    pub async fn next_expired(&mut self) -> Option<Expiry> {
        poll_fn(|cx| self.poll_expired(cx)).await
    }

    fn cancel(&mut self, key: &ServiceKey) -> bool {
        match self.pending.remove(key) {
            Some(pending) => {
                self.timers.remove(&pending.timer);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::encode_socket_addr;
    use crate::testing::RecordingStack;

    fn resolving(resolver: &mut Resolver, stack: &RecordingStack, name: &str) -> ServiceRecord {
        let mut record = ServiceRecord::remote(ServiceKey::new("_http._tcp", "local", name));
        let timeout = resolver.default_timeout();
        assert!(resolver.resolve(stack, &mut record, timeout).is_none());
        record
    }

    fn answer(key: &ServiceKey, layout: SockaddrLayout) -> ResolvedService {
        ResolvedService {
            key: key.clone(),
            host: "printer.local.".to_string(),
            port: 631,
            addresses: vec![encode_socket_addr("192.0.2.10:631".parse().unwrap(), layout)],
            txt: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_success_cancels_timer() {
        let stack = RecordingStack::default();
        let mut resolver = Resolver::new(Duration::from_secs(5), SockaddrLayout::LINUX);
        let mut record = resolving(&mut resolver, &stack, "printer-1");
        assert_eq!(record.state, ServiceState::Resolving);
        assert!(resolver.is_pending(&record.key));

        let key = record.key.clone();
        let resolved = resolver
            .complete(&mut record, answer(&key, SockaddrLayout::LINUX))
            .unwrap();
        assert_eq!(resolved.state, ServiceState::Resolved);
        assert_eq!(resolved.addresses, vec!["192.0.2.10".to_string()]);
        assert_eq!(resolver.pending_count(), 0);
        assert_eq!(resolver.next_expired().await, None);
    }

    #[tokio::test]
    async fn test_second_terminal_notification_is_ignored() {
        let stack = RecordingStack::default();
        let mut resolver = Resolver::new(Duration::from_secs(5), SockaddrLayout::LINUX);
        let mut record = resolving(&mut resolver, &stack, "printer-1");
        let key = record.key.clone();

        assert!(resolver.fail(&mut record, StackError::unknown("gone")).is_some());
        assert_eq!(record.state, ServiceState::ResolveFailed);

        assert!(resolver
            .complete(&mut record, answer(&key, SockaddrLayout::LINUX))
            .is_none());
        assert!(resolver.fail(&mut record, StackError::unknown("again")).is_none());
        assert_eq!(record.state, ServiceState::ResolveFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once() {
        let stack = RecordingStack::default();
        let mut resolver = Resolver::new(Duration::from_secs(5), SockaddrLayout::LINUX);
        let mut record = resolving(&mut resolver, &stack, "printer-1");
        let key = record.key.clone();

        tokio::time::advance(Duration::from_secs(5)).await;
        let expiry = resolver.next_expired().await.unwrap();
        let failure = resolver.expire(&stack, expiry.clone(), Some(&mut record)).unwrap();
        assert_eq!(failure, ResolveFailure::Timeout { timeout_ms: 5000 });
        assert_eq!(record.state, ServiceState::ResolveFailed);
        assert_eq!(stack.stopped_resolves(), vec![key.clone()]);

        // Replaying the same timer or a late answer changes nothing.
        assert!(resolver.expire(&stack, expiry, Some(&mut record)).is_none());
        assert!(resolver
            .complete(&mut record, answer(&key, SockaddrLayout::LINUX))
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_attempt_timer_is_ignored() {
        let stack = RecordingStack::default();
        let mut resolver = Resolver::new(Duration::from_secs(5), SockaddrLayout::LINUX);
        let mut record = resolving(&mut resolver, &stack, "printer-1");
        let stale = Expiry {
            key: record.key.clone(),
            attempt: 1,
        };

        record.transition(ServiceState::ResolveFailed).unwrap();
        assert!(resolver
            .resolve(&stack, &mut record, Duration::from_secs(5))
            .is_none());

        assert!(resolver.expire(&stack, stale, Some(&mut record)).is_none());
        assert_eq!(record.state, ServiceState::Resolving);
        assert!(resolver.is_pending(&record.key));
    }

    #[tokio::test]
    async fn test_refused_request_fails_immediately() {
        let stack = RecordingStack::default();
        stack.refuse_resolves(StackError::bad_argument("bad name"));
        let mut resolver = Resolver::new(Duration::from_secs(5), SockaddrLayout::LINUX);

        let mut record = ServiceRecord::remote(ServiceKey::new("_http._tcp", "local", "x"));
        let failure = resolver
            .resolve(&stack, &mut record, Duration::from_secs(5))
            .unwrap();
        assert!(!failure.is_timeout());
        assert_eq!(record.state, ServiceState::ResolveFailed);
        assert_eq!(resolver.pending_count(), 0);
    }
}
