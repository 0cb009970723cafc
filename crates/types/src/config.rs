//! Configuration for the store and its object cache.
//!
//! # Validation Rules
//!
//! - `contact_points` must name at least one host
//! - `keyspace` must not be empty
//! - in-flight budgets must be >= 1
//! - the cache window must be >= 1 sequence
//!
//! # Example
//!
//! ```no_run
//! # use chronicle_types::config::CassandraConfig;
//! let config = CassandraConfig::builder()
//!     .contact_points(vec!["db1.internal".to_string()])
//!     .keyspace("chronicle")
//!     .build()
//!     .expect("valid store config");
//! assert_eq!(config.port, 9042);
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Error raised when a configuration value is out of range.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A field failed validation.
    #[snafu(display("Invalid configuration: {message}"))]
    Validation {
        /// What was wrong.
        message: String,
    },
}

/// Connection and throughput settings for the Cassandra/ScyllaDB store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CassandraConfig {
    /// Cluster bootstrap hosts.
    pub contact_points: Vec<String>,
    /// Native protocol port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keyspace holding every table.
    pub keyspace: String,
    /// Optional prefix prepended to every table name.
    #[serde(default)]
    pub table_prefix: Option<String>,
    /// Username, when the cluster requires authentication.
    #[serde(default)]
    pub username: Option<String>,
    /// Password, when the cluster requires authentication.
    #[serde(default)]
    pub password: Option<String>,
    /// Replication factor used when the keyspace is first created.
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u16,
    /// Maximum concurrent in-flight requests on the foreground write path.
    ///
    /// Writers block once this many requests are outstanding.
    #[serde(default = "default_max_requests_outstanding")]
    pub max_requests_outstanding: u32,
    /// In-flight budget for background maintenance (online deletion), kept
    /// small so maintenance never starves foreground traffic.
    #[serde(default = "default_indexer_max_requests_outstanding")]
    pub indexer_max_requests_outstanding: u32,
    /// Optional row TTL in seconds, applied to the object and successor
    /// tables at creation.
    #[serde(default)]
    pub ttl_secs: Option<u32>,
}

#[bon::bon]
impl CassandraConfig {
    /// Creates a new store configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any field is out of range.
    #[builder]
    pub fn new(
        contact_points: Vec<String>,
        #[builder(default = default_port())] port: u16,
        #[builder(into)] keyspace: String,
        table_prefix: Option<String>,
        username: Option<String>,
        password: Option<String>,
        #[builder(default = default_replication_factor())] replication_factor: u16,
        #[builder(default = default_max_requests_outstanding())] max_requests_outstanding: u32,
        #[builder(default = default_indexer_max_requests_outstanding())]
        indexer_max_requests_outstanding: u32,
        ttl_secs: Option<u32>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            contact_points,
            port,
            keyspace,
            table_prefix,
            username,
            password,
            replication_factor,
            max_requests_outstanding,
            indexer_max_requests_outstanding,
            ttl_secs,
        };
        config.validate()?;
        Ok(config)
    }
}

impl CassandraConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contact_points.is_empty() {
            return Err(ConfigError::Validation {
                message: "contact_points must name at least one host".to_string(),
            });
        }
        if self.keyspace.is_empty() {
            return Err(ConfigError::Validation {
                message: "keyspace must not be empty".to_string(),
            });
        }
        if self.replication_factor == 0 {
            return Err(ConfigError::Validation {
                message: "replication_factor must be >= 1".to_string(),
            });
        }
        if self.max_requests_outstanding == 0 {
            return Err(ConfigError::Validation {
                message: "max_requests_outstanding must be >= 1".to_string(),
            });
        }
        if self.indexer_max_requests_outstanding == 0 {
            return Err(ConfigError::Validation {
                message: "indexer_max_requests_outstanding must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    /// Table name with the configured prefix applied.
    pub fn table_name(&self, table: &str) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{prefix}{table}"),
            None => table.to_string(),
        }
    }
}

/// Settings for the in-memory object cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CacheConfig {
    /// How many sequences behind the latest the cache will serve.
    #[serde(default = "default_cache_window")]
    pub window: u32,
}

#[bon::bon]
impl CacheConfig {
    /// Creates a cache configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `window` is zero.
    #[builder]
    pub fn new(#[builder(default = default_cache_window())] window: u32) -> Result<Self, ConfigError> {
        let config = Self { window };
        config.validate()?;
        Ok(config)
    }
}

impl CacheConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::Validation {
                message: "cache window must be >= 1 sequence".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { window: default_cache_window() }
    }
}

fn default_port() -> u16 {
    9042
}

fn default_replication_factor() -> u16 {
    3
}

fn default_max_requests_outstanding() -> u32 {
    10_000
}

fn default_indexer_max_requests_outstanding() -> u32 {
    10
}

fn default_cache_window() -> u32 {
    256
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn minimal() -> CassandraConfig {
        CassandraConfig::builder()
            .contact_points(vec!["localhost".to_string()])
            .keyspace("chronicle")
            .build()
            .expect("valid config")
    }

    #[test]
    fn test_defaults() {
        let config = minimal();
        assert_eq!(config.port, 9042);
        assert_eq!(config.replication_factor, 3);
        assert_eq!(config.max_requests_outstanding, 10_000);
        assert_eq!(config.indexer_max_requests_outstanding, 10);
        assert_eq!(config.table_prefix, None);
        assert_eq!(config.ttl_secs, None);
    }

    #[test]
    fn test_rejects_empty_contact_points() {
        let result =
            CassandraConfig::builder().contact_points(Vec::new()).keyspace("chronicle").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty_keyspace() {
        let result = CassandraConfig::builder()
            .contact_points(vec!["localhost".to_string()])
            .keyspace("")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_budgets() {
        let result = CassandraConfig::builder()
            .contact_points(vec!["localhost".to_string()])
            .keyspace("chronicle")
            .max_requests_outstanding(0)
            .build();
        assert!(result.is_err());

        let result = CassandraConfig::builder()
            .contact_points(vec!["localhost".to_string()])
            .keyspace("chronicle")
            .indexer_max_requests_outstanding(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_table_name_applies_prefix() {
        let mut config = minimal();
        assert_eq!(config.table_name("objects"), "objects");
        config.table_prefix = Some("rpt_".to_string());
        assert_eq!(config.table_name("objects"), "rpt_objects");
    }

    #[test]
    fn test_deserialization_fills_defaults() {
        let json = r#"{"contact_points": ["db1"], "keyspace": "chronicle"}"#;
        let config: CassandraConfig = serde_json::from_str(json).expect("deserialize");
        config.validate().expect("valid");
        assert_eq!(config.port, 9042);
    }

    #[test]
    fn test_cache_window_must_be_positive() {
        assert!(CacheConfig::builder().window(0).build().is_err());
        assert_eq!(CacheConfig::default().window, 256);
    }
}
