//! # lanseer core
//!
//! Configuration and error types shared by the lanseer discovery crate and
//! the `lanseer` binary.
//!
//! - **Errors**: [`LanseerError`] and its serializable variants, built with `thiserror`.
//! - **Configuration**: [`AppConfig`] loaded from YAML with optional
//!   `LANSEER__*` environment overrides, plus the [`DiscoveryConfig`] section
//!   consumed by the discovery manager.
//!
//! ## Example
//!
//! ```
//! use lanseer_core::discovery_config::{normalize_domain, validate_service_type};
//!
//! assert!(validate_service_type("_http._tcp.").is_ok());
//! assert_eq!(normalize_domain("local."), "local");
//! ```

pub mod config;
pub mod discovery_config;
pub mod error;

pub use config::{AppConfig, LogFormat, LoggingConfig};
pub use discovery_config::{BrowseTarget, DiscoveryConfig, ServiceDefinition};
pub use error::{ConfigError, LanseerError, Result};
