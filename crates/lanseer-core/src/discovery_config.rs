//! Configuration types for service discovery and publication

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Domain used when a caller passes an empty one.
pub const DEFAULT_DOMAIN: &str = "local";

/// Upper bound for `resolve_timeout_secs`. Resolve timers live in a timer
/// wheel that cannot hold arbitrarily long delays.
pub const MAX_RESOLVE_TIMEOUT_SECS: f64 = 3600.0;

/// Configuration for the discovery manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// How long a single resolution may take before it is failed (seconds)
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: f64,

    /// Maximum number of events buffered for the host application
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Host name to advertise local services under (defaults to the machine name)
    #[serde(default)]
    pub host_name: Option<String>,

    /// Search started by `lanseer run`
    #[serde(default)]
    pub browse: Option<BrowseTarget>,

    /// Services published by `lanseer run`
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_secs: default_resolve_timeout(),
            event_channel_capacity: default_event_channel_capacity(),
            host_name: None,
            browse: None,
            services: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Returns the resolve timeout as a Duration, clamped to
    /// [`MAX_RESOLVE_TIMEOUT_SECS`]. Values that are not a positive number
    /// fall back to the default.
    pub fn resolve_timeout(&self) -> Duration {
        let secs = self.resolve_timeout_secs;
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::from_secs_f64(default_resolve_timeout());
        }
        Duration::try_from_secs_f64(secs.min(MAX_RESOLVE_TIMEOUT_SECS))
            .unwrap_or_else(|_| Duration::from_secs_f64(default_resolve_timeout()))
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.resolve_timeout_secs.is_finite() || self.resolve_timeout_secs <= 0.0 {
            return Err(ConfigError::invalid_value(
                "discovery.resolve_timeout_secs",
                format!("must be a positive number, got {}", self.resolve_timeout_secs),
            ));
        }

        if self.resolve_timeout_secs > MAX_RESOLVE_TIMEOUT_SECS {
            return Err(ConfigError::invalid_value(
                "discovery.resolve_timeout_secs",
                format!(
                    "must be at most {} seconds, got {}",
                    MAX_RESOLVE_TIMEOUT_SECS, self.resolve_timeout_secs
                ),
            ));
        }

        if self.event_channel_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "discovery.event_channel_capacity",
                "cannot be 0",
            ));
        }

        if let Some(ref browse) = self.browse {
            validate_service_type(&browse.service_type)?;
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            service.validate()?;

            let key = (
                normalize_service_type(&service.service_type),
                normalize_domain(&service.domain),
                service.name.clone(),
            );
            if !seen.insert(key) {
                return Err(ConfigError::DuplicateService {
                    service_type: service.service_type.clone(),
                    domain: service.domain.clone(),
                    name: service.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// A (type, domain) pair to browse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseTarget {
    /// DNS-SD service type, e.g. `_http._tcp`
    pub service_type: String,

    /// Discovery domain
    #[serde(default = "default_domain")]
    pub domain: String,
}

/// A local service to advertise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// DNS-SD service type, e.g. `_http._tcp`
    pub service_type: String,

    /// Discovery domain
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Instance name
    pub name: String,

    /// Port the service listens on
    pub port: u16,

    /// TXT record key/value pairs
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ServiceDefinition {
    /// Validates a single advertisement definition
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_type(&self.service_type)?;

        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "discovery.services.name",
                "instance name cannot be empty",
            ));
        }

        // DNS labels are limited to 63 octets
        if self.name.len() > 63 {
            return Err(ConfigError::invalid_value(
                "discovery.services.name",
                format!("'{}' exceeds 63 bytes", self.name),
            ));
        }

        if self.port == 0 {
            return Err(ConfigError::invalid_value(
                "discovery.services.port",
                format!("port for '{}' cannot be 0", self.name),
            ));
        }

        Ok(())
    }
}

/// Strips the trailing dot from a service type (`_http._tcp.` -> `_http._tcp`)
pub fn normalize_service_type(service_type: &str) -> String {
    service_type.trim().trim_end_matches('.').to_string()
}

/// Strips surrounding dots from a domain, falling back to [`DEFAULT_DOMAIN`]
pub fn normalize_domain(domain: &str) -> String {
    let trimmed = domain.trim().trim_matches('.');
    if trimmed.is_empty() {
        DEFAULT_DOMAIN.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Checks that a service type has the `_service._proto` shape
pub fn validate_service_type(service_type: &str) -> Result<(), ConfigError> {
    let normalized = normalize_service_type(service_type);
    let labels: Vec<&str> = normalized.split('.').collect();

    if labels.len() != 2 {
        return Err(ConfigError::invalid_service_type(
            service_type,
            "expected exactly two labels, e.g. _http._tcp",
        ));
    }

    let (service, proto) = (labels[0], labels[1]);
    if !service.starts_with('_') || service.len() < 2 {
        return Err(ConfigError::invalid_service_type(
            service_type,
            "service label must start with '_'",
        ));
    }

    if proto != "_tcp" && proto != "_udp" {
        return Err(ConfigError::invalid_service_type(
            service_type,
            "protocol label must be _tcp or _udp",
        ));
    }

    Ok(())
}

// Default configuration values
fn default_resolve_timeout() -> f64 {
    5.0
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str) -> ServiceDefinition {
        ServiceDefinition {
            service_type: "_http._tcp".to_string(),
            domain: "local".to_string(),
            name: name.to_string(),
            port: 8080,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.resolve_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_timeout() {
        let config = DiscoveryConfig {
            resolve_timeout_secs: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let config = DiscoveryConfig {
            resolve_timeout_secs: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_timeout() {
        let config = DiscoveryConfig {
            resolve_timeout_secs: MAX_RESOLVE_TIMEOUT_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = DiscoveryConfig {
            resolve_timeout_secs: 1.0e9,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_resolve_timeout_never_panics() {
        let huge = DiscoveryConfig {
            resolve_timeout_secs: 1.0e20,
            ..Default::default()
        };
        assert_eq!(huge.resolve_timeout(), Duration::from_secs(3600));

        for bad in [f64::NAN, f64::INFINITY, -1.0, 0.0] {
            let config = DiscoveryConfig {
                resolve_timeout_secs: bad,
                ..Default::default()
            };
            assert_eq!(config.resolve_timeout(), Duration::from_secs(5));
        }
    }

    #[test]
    fn test_rejects_duplicate_services() {
        let mut second = definition("printer-1");
        second.domain = "local.".to_string();

        let config = DiscoveryConfig {
            services: vec![definition("printer-1"), second],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateService { .. })
        ));
    }

    #[test]
    fn test_same_name_different_type_is_allowed() {
        let mut ssh = definition("workstation");
        ssh.service_type = "_ssh._tcp".to_string();

        let config = DiscoveryConfig {
            services: vec![definition("workstation"), ssh],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_port() {
        let mut def = definition("printer-1");
        def.port = 0;
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_service_type_validation() {
        assert!(validate_service_type("_http._tcp").is_ok());
        assert!(validate_service_type("_osc._udp.").is_ok());
        assert!(validate_service_type("http._tcp").is_err());
        assert!(validate_service_type("_http._sctp").is_err());
        assert!(validate_service_type("_http._tcp.local").is_err());
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("local."), "local");
        assert_eq!(normalize_domain(""), "local");
        assert_eq!(normalize_domain(".example.com."), "example.com");
    }

    #[test]
    fn test_deserialize_defaults_domain() {
        let yaml = "service_type: _http._tcp\nname: printer-1\nport: 631\n";
        let def: ServiceDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.domain, "local");
        assert!(def.metadata.is_empty());
    }
}
