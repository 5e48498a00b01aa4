//! Configuration types
//!
//! Loaded from TOML. Every field is required except the `[cache.remote]`
//! table, which must be present exactly when the topology is `remote`.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Largest key name accepted by the key-name dictionary.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 255;

/// Where cached attributes live. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTopology {
    /// In-process map, no serialization, no network hop.
    Local,
    /// Serialized byte store outside the process heap.
    Remote,
}

impl fmt::Display for CacheTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTopology::Local => f.write_str("local"),
            CacheTopology::Remote => f.write_str("remote"),
        }
    }
}

/// Byte layout revision of the remote-cache value codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Legacy layout: STRING payloads carry a trailing `null`.
    V1,
    /// Every data type encoded independently.
    #[default]
    V2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteCacheSettings {
    pub path: PathBuf,
    pub max_size_mb: usize,
    pub wire_format: WireFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    pub topology: CacheTopology,
    pub remote: Option<RemoteCacheSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    /// Max in-flight store calls.
    pub store_pool_size: usize,
    /// Max in-flight cache calls; only used by the remote topology.
    pub cache_pool_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationSettings {
    pub max_key_length: usize,
    pub xss_filter: bool,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            xss_filter: false,
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TesseraConfig {
    pub cache: CacheSettings,
    pub executor: ExecutorSettings,
    pub validation: ValidationSettings,
}

impl TesseraConfig {
    /// Local-topology configuration with the given pool sizes.
    ///
    /// Convenient for embedding and tests; production deployments load TOML.
    pub fn local(store_pool_size: usize) -> Self {
        Self {
            cache: CacheSettings {
                topology: CacheTopology::Local,
                remote: None,
            },
            executor: ExecutorSettings {
                store_pool_size,
                cache_pool_size: 1,
            },
            validation: ValidationSettings::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: TesseraConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.cache.topology, &self.cache.remote) {
            (CacheTopology::Remote, None) => {
                return Err(ConfigError::MissingRequired {
                    field: "cache.remote".to_string(),
                });
            }
            (CacheTopology::Local, Some(_)) => {
                return Err(ConfigError::IncompatibleOptions {
                    option_a: "cache.topology = \"local\"".to_string(),
                    option_b: "cache.remote".to_string(),
                });
            }
            (CacheTopology::Remote, Some(remote)) => {
                if remote.path.as_os_str().is_empty() {
                    return Err(invalid("cache.remote.path", "must not be empty"));
                }
                if remote.max_size_mb == 0 {
                    return Err(invalid("cache.remote.max_size_mb", "must be > 0"));
                }
            }
            (CacheTopology::Local, None) => {}
        }
        if self.executor.store_pool_size == 0 {
            return Err(invalid("executor.store_pool_size", "must be > 0"));
        }
        if self.executor.cache_pool_size == 0 {
            return Err(invalid("executor.cache_pool_size", "must be > 0"));
        }
        if self.validation.max_key_length == 0 {
            return Err(invalid("validation.max_key_length", "must be > 0"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
