//! Versioned, file-backed storage of replicated config kinds.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::cluster::{ClusterRegistry, KnownHostsFile};

/// An independently versioned unit of shared configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKind {
    /// Registry of managed clusters and local-cluster permissions
    ClusterRegistry,
    /// Tokens and addresses of authenticated nodes
    KnownHosts,
}

impl ConfigKind {
    pub const ALL: [ConfigKind; 2] = [ConfigKind::ClusterRegistry, ConfigKind::KnownHosts];

    /// Name used on the wire and for the backing file
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClusterRegistry => "pcs_settings.conf",
            Self::KnownHosts => "known-hosts",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Content of a kind that was never written
    pub fn default_content(&self) -> String {
        match self {
            Self::ClusterRegistry => ClusterRegistry::default().to_text(),
            Self::KnownHosts => KnownHostsFile::default().to_text(),
        }
    }

    fn file_name(&self) -> String {
        format!("{}.json", self.name())
    }
}

impl std::fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One copy of a config kind: `{version, content}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedConfig {
    pub version: u64,
    pub content: String,
}

impl VersionedConfig {
    pub fn new(version: u64, content: impl Into<String>) -> Self {
        Self {
            version,
            content: content.into(),
        }
    }

    /// Hex SHA-256 of the content
    pub fn digest(&self) -> String {
        format!("{:x}", Sha256::digest(self.content.as_bytes()))
    }

    /// Same version and same content
    pub fn same_as(&self, other: &VersionedConfig) -> bool {
        self.version == other.version && self.content == other.content
    }
}

/// Result of offering a copy to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptOutcome {
    Accepted,
    Rejected,
    NotSupported,
}

#[derive(Debug, Clone)]
struct StoredConfig {
    config: VersionedConfig,
    /// False until the kind has been written at least once
    present: bool,
}

/// Local copies of every config kind.
///
/// Writers are serialized by the lock; the check-and-set in [`ConfigStore::offer`]
/// is atomic with respect to other local writers.
pub struct ConfigStore {
    /// Backing directory; `None` keeps everything in memory
    data_dir: Option<PathBuf>,
    configs: RwLock<HashMap<ConfigKind, StoredConfig>>,
}

impl ConfigStore {
    /// Create a store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            configs: RwLock::new(Self::defaults()),
        }
    }

    /// Open (and create if needed) a store backed by `data_dir`
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let mut configs = Self::defaults();
        for kind in ConfigKind::ALL {
            let path = data_dir.join(kind.file_name());
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    let config: VersionedConfig = serde_json::from_str(&text)
                        .with_context(|| format!("Failed to parse {}", path.display()))?;
                    tracing::debug!(kind = %kind, version = config.version, "Loaded config");
                    configs.insert(kind, StoredConfig { config, present: true });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(kind = %kind, "Config not present, using empty default");
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read {}", path.display()));
                }
            }
        }

        Ok(Self {
            data_dir: Some(data_dir),
            configs: RwLock::new(configs),
        })
    }

    fn defaults() -> HashMap<ConfigKind, StoredConfig> {
        ConfigKind::ALL
            .into_iter()
            .map(|kind| {
                let stored = StoredConfig {
                    config: VersionedConfig::new(0, kind.default_content()),
                    present: false,
                };
                (kind, stored)
            })
            .collect()
    }

    /// Current local copy (version 0 with default content if never written)
    pub async fn get(&self, kind: ConfigKind) -> VersionedConfig {
        self.configs
            .read()
            .await
            .get(&kind)
            .map(|stored| stored.config.clone())
            .unwrap_or_else(|| VersionedConfig::new(0, kind.default_content()))
    }

    /// Has this kind ever been written locally
    pub async fn is_present(&self, kind: ConfigKind) -> bool {
        self.configs
            .read()
            .await
            .get(&kind)
            .is_some_and(|stored| stored.present)
    }

    /// Unconditionally replace the local copy
    pub async fn save(&self, kind: ConfigKind, config: VersionedConfig) -> Result<()> {
        let mut configs = self.configs.write().await;
        self.persist(kind, &config).await?;
        tracing::debug!(kind = %kind, version = config.version, "Saved config");
        configs.insert(kind, StoredConfig { config, present: true });
        Ok(())
    }

    /// Offer a copy from another writer.
    ///
    /// Accepted when nothing is stored yet, when `force` is set, or when the
    /// offered version is strictly newer. An identical copy is also accepted.
    pub async fn offer(
        &self,
        kind: ConfigKind,
        offered: VersionedConfig,
        force: bool,
    ) -> Result<AcceptOutcome> {
        let mut configs = self.configs.write().await;
        let (local, present) = match configs.get(&kind) {
            Some(stored) => (stored.config.clone(), stored.present),
            None => (VersionedConfig::new(0, kind.default_content()), false),
        };

        if offered.same_as(&local) && present {
            return Ok(AcceptOutcome::Accepted);
        }
        if !present || force || offered.version > local.version {
            self.persist(kind, &offered).await?;
            tracing::info!(
                kind = %kind,
                from = local.version,
                to = offered.version,
                "Accepted config"
            );
            configs.insert(kind, StoredConfig { config: offered, present: true });
            return Ok(AcceptOutcome::Accepted);
        }

        tracing::debug!(
            kind = %kind,
            local = local.version,
            offered = offered.version,
            "Rejected stale config"
        );
        Ok(AcceptOutcome::Rejected)
    }

    async fn persist(&self, kind: ConfigKind, config: &VersionedConfig) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let path = dir.join(kind.file_name());
        let tmp = dir.join(format!("{}.tmp", kind.file_name()));
        let text = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        tokio::fs::write(&tmp, text)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offer_accepts_only_newer() {
        let store = ConfigStore::in_memory();
        let kind = ConfigKind::KnownHosts;

        // Nothing stored yet: any version is accepted
        let v2 = VersionedConfig::new(2, "two");
        assert_eq!(store.offer(kind, v2.clone(), false).await.unwrap(), AcceptOutcome::Accepted);

        // Same version, different content
        let other = VersionedConfig::new(2, "other");
        assert_eq!(store.offer(kind, other, false).await.unwrap(), AcceptOutcome::Rejected);

        // Identical copy
        assert_eq!(store.offer(kind, v2, false).await.unwrap(), AcceptOutcome::Accepted);

        // Older but forced
        let v1 = VersionedConfig::new(1, "one");
        assert_eq!(store.offer(kind, v1.clone(), true).await.unwrap(), AcceptOutcome::Accepted);
        assert_eq!(store.get(kind).await, v1);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ConfigStore::open(dir.path().to_path_buf()).await.unwrap();
            assert!(!store.is_present(ConfigKind::ClusterRegistry).await);
            store
                .save(ConfigKind::ClusterRegistry, VersionedConfig::new(7, "{}"))
                .await
                .unwrap();
        }

        let store = ConfigStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(store.is_present(ConfigKind::ClusterRegistry).await);
        assert_eq!(store.get(ConfigKind::ClusterRegistry).await.version, 7);
        assert_eq!(store.get(ConfigKind::KnownHosts).await.version, 0);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ConfigKind::from_name("known-hosts"), Some(ConfigKind::KnownHosts));
        assert_eq!(ConfigKind::from_name("corosync.conf"), None);
        let digest = VersionedConfig::new(1, "abc").digest();
        assert_eq!(digest.len(), 64);
    }
}
