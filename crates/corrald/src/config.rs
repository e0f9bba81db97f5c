//! Configuration management for corrald.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use corral_common::constants::{
    DEFAULT_DATA_DIR, DEFAULT_LISTEN_ADDR, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SYNC_INTERVAL_SECS, DEFAULT_TOOL_PATH,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// This node's name as it appears in cluster membership
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Directory holding versioned config files and issued tokens
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Local cluster membership
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Config sync settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Inter-node request settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Command gate settings
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Local authentication
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Local cluster membership (the corosync view of this node)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterConfig {
    /// Cluster this node belongs to, if any
    #[serde(default)]
    pub name: Option<String>,

    /// Member node names, this node included
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Config sync configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Run the periodic fetch-reconcile tick
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between ticks
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sync_interval(),
        }
    }
}

/// Inter-node request configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Default timeout for one inter-node call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// URL scheme used to reach other daemons
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Skip certificate verification (daemons use self-signed certs)
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,

    /// Port assumed when a node is addressed without one
    #[serde(default = "default_port")]
    pub default_port: u16,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            scheme: default_scheme(),
            accept_invalid_certs: true,
            default_port: default_port(),
        }
    }
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Command gate configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CommandsConfig {
    /// External management tool executed by the gate
    #[serde(default = "default_tool_path")]
    pub tool_path: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
        }
    }
}

/// Local authentication configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Hex SHA-256 of the superuser password; `/remote/auth` is disabled when unset
    #[serde(default)]
    pub superuser_password_sha256: Option<String>,
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_data_dir() -> PathBuf { PathBuf::from(DEFAULT_DATA_DIR) }
fn default_true() -> bool { true }
fn default_sync_interval() -> u64 { DEFAULT_SYNC_INTERVAL_SECS }
fn default_request_timeout() -> u64 { DEFAULT_REQUEST_TIMEOUT_SECS }
fn default_scheme() -> String { "https".to_string() }
fn default_port() -> u16 { DEFAULT_PORT }
fn default_tool_path() -> String { DEFAULT_TOOL_PATH.to_string() }

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .add_source(config::Environment::with_prefix("CORRAL").separator("__"))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!(path = config_path, "Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(ref node_name) = args.node_name {
            config.node_name = node_name.clone();
        }
        if let Some(ref data_dir) = args.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.dispatch.request_timeout_secs == 0 {
            anyhow::bail!("dispatch.request_timeout_secs must be greater than zero");
        }
        if self.sync.interval_secs == 0 {
            anyhow::bail!("sync.interval_secs must be greater than zero");
        }
        if let Some(name) = &self.cluster.name {
            if !name.is_empty() && !self.cluster.nodes.contains(&self.node_name) {
                tracing::warn!(
                    node = %self.node_name,
                    cluster = %name,
                    "Local node is not listed among cluster nodes"
                );
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            node_name: default_node_name(),
            data_dir: default_data_dir(),
            cluster: ClusterConfig::default(),
            sync: SyncConfig::default(),
            dispatch: DispatchConfig::default(),
            commands: CommandsConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_finite() {
        let config = AppConfig::default();
        assert_eq!(config.dispatch.request_timeout(), Duration::from_secs(30));
        assert!(config.sync.enabled);
        assert_eq!(config.dispatch.default_port, 2224);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.dispatch.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml_sections() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                node_name = "node-a"
                [cluster]
                name = "alpha"
                nodes = ["node-a", "node-b"]
                [sync]
                enabled = false
                interval_secs = 30
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: AppConfig = settings.try_deserialize().unwrap();
        assert_eq!(config.node_name, "node-a");
        assert_eq!(config.cluster.name.as_deref(), Some("alpha"));
        assert_eq!(config.cluster.nodes.len(), 2);
        assert!(!config.sync.enabled);
        assert_eq!(config.sync.interval_secs, 30);
        assert_eq!(config.commands.tool_path, DEFAULT_TOOL_PATH);
    }
}
