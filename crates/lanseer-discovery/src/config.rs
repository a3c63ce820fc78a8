//! Configuration types for service discovery
//!
//! Re-exports configuration from lanseer-core so the host only needs one crate

pub use lanseer_core::discovery_config::{
    normalize_domain, normalize_service_type, BrowseTarget, DiscoveryConfig, ServiceDefinition,
    DEFAULT_DOMAIN,
};
