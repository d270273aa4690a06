//! Proxy configuration
//!
//! A [`ProxyConfig`] names the remote object a proxy mirrors: the bus name
//! owning it and its object path. The pair doubles as the identity key for
//! the shared handle context, so two proxies configured identically share
//! handle reference counts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The bus name is empty
    #[error("Bus name must not be empty")]
    EmptyBusName,

    /// The object path is not absolute
    #[error("Invalid object path: {0}")]
    InvalidObjectPath(String),
}

/// Identity of the remote object a proxy mirrors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bus name owning the remote object
    pub bus_name: String,
    /// Object path of the remote object
    pub object_path: String,
}

impl ProxyConfig {
    /// Creates a validated configuration
    pub fn new(
        bus_name: impl Into<String>,
        object_path: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            bus_name: bus_name.into(),
            object_path: object_path.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus_name.is_empty() {
            return Err(ConfigError::EmptyBusName);
        }
        if !self.object_path.starts_with('/') {
            return Err(ConfigError::InvalidObjectPath(self.object_path.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = ProxyConfig::new("org.lnxtalk.Connection.jabber", "/org/lnxtalk/conn/0");
        assert!(config.is_ok());
    }

    #[test]
    fn test_empty_bus_name_rejected() {
        let err = ProxyConfig::new("", "/org/lnxtalk/conn/0").unwrap_err();
        assert_eq!(err, ConfigError::EmptyBusName);
    }

    #[test]
    fn test_relative_object_path_rejected() {
        let err = ProxyConfig::new("org.lnxtalk.AccountManager", "accounts/0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidObjectPath(_)));
    }
}
