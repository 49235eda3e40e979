//! Daemon configuration file management.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Transport backend: only "mock" ships in-tree; gossip backends are
    /// plug-ins.
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Store peers attempted per history query.
    #[serde(default = "default_store_query_fanout")]
    pub store_query_fanout: u32,
    /// Baked-in bootstrap nodes (lowest-priority fallback).
    #[serde(default = "default_bootstrap_nodes")]
    pub baked_bootstrap_nodes: Vec<String>,
    #[serde(default = "default_min_peers")]
    pub baked_min_peers: u32,
}

/// Storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Display name advertised on self contact cards.
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

/// Advanced settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_transport() -> String {
    "mock".to_string()
}

fn default_store_query_fanout() -> u32 {
    3
}

fn default_bootstrap_nodes() -> Vec<String> {
    vec![
        "/dns4/boot-a.aim.example/tcp/30303".to_string(),
        "/dns4/boot-b.aim.example/tcp/30303".to_string(),
    ]
}

fn default_min_peers() -> u32 {
    2
}

fn default_display_name() -> String {
    "aim user".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            store_query_fanout: default_store_query_fanout(),
            baked_bootstrap_nodes: default_bootstrap_nodes(),
            baked_min_peers: default_min_peers(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// The resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("AIM_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            home_fallback("Library/Application Support/aim")
        }
        #[cfg(not(target_os = "macos"))]
        {
            home_fallback(".aim")
        }
    }
}

fn home_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/aim"))
}
