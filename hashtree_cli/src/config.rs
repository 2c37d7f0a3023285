//! On-disk CLI configuration: identity, local store paths, and tree
//! defaults, loaded from a single `config.toml` per data directory.
//! Relative paths in this file resolve against the data directory, so the
//! same config is portable across a renamed or relocated data directory.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub identity: IdentityConfig,
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub tree: hashtree_core::Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub secret_key_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub path: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            secret_key_file: "identity.secretkey".into(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "blocks".into(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: "registry".into(),
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            store: StoreConfig::default(),
            registry: RegistryConfig::default(),
            tree: hashtree_core::Config::default(),
        }
    }
}
