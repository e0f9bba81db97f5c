//! Node directory: known hosts, registered clusters, and local membership.
//!
//! The directory is a read view over the replicated config store plus the
//! local cluster membership. Replicated content only changes through the
//! config sync paths.

use std::sync::Arc;
use tokio::sync::RwLock;

use corral_common::{CorralError, KnownHost};

use super::registry::{ClusterRegistry, KnownHostsFile};
use crate::cfgsync::{ConfigKind, ConfigStore};

/// This node's view of the cluster it belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMembership {
    pub cluster_name: Option<String>,
    pub nodes: Vec<String>,
}

impl LocalMembership {
    pub fn new(cluster_name: Option<String>, nodes: Vec<String>) -> Self {
        Self {
            cluster_name: cluster_name.filter(|name| !name.is_empty()),
            nodes,
        }
    }

    /// In a named cluster with at least one member
    pub fn is_clustered(&self) -> bool {
        self.cluster_name.is_some() && !self.nodes.is_empty()
    }
}

/// Node directory shared by the dispatcher and the sync paths
pub struct NodeDirectory {
    local_node: String,
    store: Arc<ConfigStore>,
    membership: RwLock<LocalMembership>,
}

impl NodeDirectory {
    pub fn new(local_node: impl Into<String>, store: Arc<ConfigStore>, membership: LocalMembership) -> Self {
        Self {
            local_node: local_node.into(),
            store,
            membership: RwLock::new(membership),
        }
    }

    /// Name of the node this process runs on
    pub fn local_node(&self) -> &str {
        &self.local_node
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub async fn membership(&self) -> LocalMembership {
        self.membership.read().await.clone()
    }

    /// Replace the local membership (corosync view changed)
    pub async fn set_membership(&self, membership: LocalMembership) {
        tracing::info!(
            cluster = ?membership.cluster_name,
            nodes = ?membership.nodes,
            "Local cluster membership updated"
        );
        *self.membership.write().await = membership;
    }

    pub async fn local_cluster_name(&self) -> Option<String> {
        self.membership.read().await.cluster_name.clone()
    }

    pub async fn known_hosts(&self) -> Result<KnownHostsFile, CorralError> {
        let config = self.store.get(ConfigKind::KnownHosts).await;
        KnownHostsFile::from_text(&config.content)
    }

    /// Stored credentials of one node; unreadable storage counts as unknown
    pub async fn known_host(&self, name: &str) -> Option<KnownHost> {
        match self.known_hosts().await {
            Ok(file) => file.get(name),
            Err(e) => {
                tracing::error!(error = %e, "Unable to read known hosts");
                None
            }
        }
    }

    pub async fn registry(&self) -> Result<ClusterRegistry, CorralError> {
        let config = self.store.get(ConfigKind::ClusterRegistry).await;
        ClusterRegistry::from_text(&config.content)
    }

    /// Members of a cluster, in registry order.
    ///
    /// The local cluster falls back to the local membership when it is not
    /// registered.
    pub async fn cluster_nodes(&self, cluster: &str) -> Vec<String> {
        if let Ok(registry) = self.registry().await {
            if let Some(found) = registry.cluster(cluster) {
                return found.nodes.clone();
            }
        }
        let membership = self.membership.read().await;
        if membership.cluster_name.as_deref() == Some(cluster) {
            return membership.nodes.clone();
        }
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfgsync::VersionedConfig;
    use corral_common::{Cluster, Destination};

    async fn directory() -> NodeDirectory {
        let store = Arc::new(ConfigStore::in_memory());

        let mut hosts = KnownHostsFile::default();
        hosts.apply(&[KnownHost::new("n1", "tok1", vec![Destination::new("10.0.0.1", 2224)])], &[]);
        store
            .save(ConfigKind::KnownHosts, VersionedConfig::new(1, hosts.to_text()))
            .await
            .unwrap();

        let mut registry = ClusterRegistry::default();
        registry
            .add_cluster(Cluster::new("remote", vec!["r1".into(), "r2".into()]))
            .unwrap();
        store
            .save(ConfigKind::ClusterRegistry, VersionedConfig::new(1, registry.to_text()))
            .await
            .unwrap();

        NodeDirectory::new(
            "n1",
            store,
            LocalMembership::new(Some("local".into()), vec!["n1".into(), "n2".into()]),
        )
    }

    #[tokio::test]
    async fn test_lookup_known_host() {
        let dir = directory().await;
        assert_eq!(dir.known_host("n1").await.unwrap().token, "tok1");
        assert!(dir.known_host("n9").await.is_none());
    }

    #[tokio::test]
    async fn test_cluster_nodes_resolution() {
        let dir = directory().await;
        assert_eq!(dir.cluster_nodes("remote").await, vec!["r1", "r2"]);
        assert_eq!(dir.cluster_nodes("local").await, vec!["n1", "n2"]);
        assert!(dir.cluster_nodes("unknown").await.is_empty());
    }

    #[test]
    fn test_empty_cluster_name_is_standalone() {
        let membership = LocalMembership::new(Some(String::new()), vec!["n1".into()]);
        assert!(!membership.is_clustered());
    }
}
