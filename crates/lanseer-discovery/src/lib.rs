//! mDNS / DNS-SD discovery and publication
//!
//! This crate finds services on the local network and advertises local ones:
//! - Browse for one service type at a time and resolve every instance found
//! - Publish any number of local services with TXT metadata
//! - Report everything that happens as [`DiscoveryEvent`]s on a channel
//!
//! # Architecture
//!
//! A [`DiscoveryManager`] handle fronts a single background task that owns:
//! 1. The [`Browser`], holding remote records for the active search
//! 2. The [`Resolver`], tracking in-flight resolutions and their timeouts
//! 3. The [`Publisher`], holding local advertisements
//!
//! The multicast-DNS work itself is delegated to a [`DiscoveryStack`].
//! [`MdnsSdStack`] drives the `mdns-sd` daemon; tests drive the manager with
//! scripted stacks instead.
//!
//! # Example
//!
//! ```no_run
//! use lanseer_discovery::{DiscoveryConfig, DiscoveryManager, MdnsSdStack};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let stack = Arc::new(MdnsSdStack::new()?);
//!     let manager = DiscoveryManager::start(stack, &DiscoveryConfig::default())?;
//!
//!     manager.scan("_http._tcp", "local")?;
//!     let events = manager.events();
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", event.kind.description());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod browser;
pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod mdns;
pub mod publisher;
pub mod record;
pub mod resolver;
pub mod stack;

#[cfg(test)]
pub(crate) mod testing;

pub use address::{extract_address, extract_addresses, SockaddrLayout};
pub use browser::Browser;
pub use config::{BrowseTarget, DiscoveryConfig, ServiceDefinition};
pub use error::{
    DiscoveryError, DiscoveryFailure, ResolveFailure, Result, StackError, StackErrorCode,
};
pub use event::{DiscoveryEvent, DiscoveryEventKind};
pub use manager::DiscoveryManager;
pub use mdns::MdnsSdStack;
pub use publisher::Publisher;
pub use record::{ServiceKey, ServiceRecord, ServiceRole, ServiceState};
pub use resolver::Resolver;
pub use stack::{Advertisement, DiscoveryStack, ResolvedService, StackEvent};
