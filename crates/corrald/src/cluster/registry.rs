//! Content formats of the replicated cluster registry and known-hosts kinds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use corral_common::{AuthIdentity, Cluster, CorralError, HostCredentials, KnownHost, PermissionLevel};

const REGISTRY_FORMAT_VERSION: u32 = 2;
const KNOWN_HOSTS_FORMAT_VERSION: u32 = 1;

/// Whom a permission entry names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Group,
}

/// One grant in the local-cluster permission table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    #[serde(rename = "type")]
    pub kind: PrincipalKind,
    pub name: String,
    #[serde(default)]
    pub allow: Vec<PermissionLevel>,
}

impl PermissionEntry {
    fn applies_to(&self, identity: &AuthIdentity) -> bool {
        match self.kind {
            PrincipalKind::User => self.name == identity.username,
            PrincipalKind::Group => identity.usergroups.iter().any(|g| *g == self.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub local_cluster: Vec<PermissionEntry>,
}

/// Registry of managed clusters (the `pcs_settings.conf` kind)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRegistry {
    #[serde(default)]
    pub format_version: u32,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub permissions: Permissions,
}

impl Default for ClusterRegistry {
    fn default() -> Self {
        Self {
            format_version: REGISTRY_FORMAT_VERSION,
            clusters: vec![],
            permissions: Permissions::default(),
        }
    }
}

impl ClusterRegistry {
    pub fn from_text(text: &str) -> Result<Self, CorralError> {
        serde_json::from_str(text)
            .map_err(|e| CorralError::Protocol(format!("invalid cluster registry: {e}")))
    }

    pub fn to_text(&self) -> String {
        // plain data with string keys, serialization cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn is_cluster_name_in_use(&self, name: &str) -> bool {
        self.cluster(name).is_some()
    }

    pub fn is_node_in_use(&self, node: &str) -> bool {
        self.clusters.iter().any(|c| c.has_node(node))
    }

    /// Register a cluster; a node may belong to at most one registered cluster
    pub fn add_cluster(&mut self, cluster: Cluster) -> Result<(), CorralError> {
        if self.is_cluster_name_in_use(&cluster.name) {
            return Err(CorralError::InvalidInput(format!(
                "The cluster name, '{}' has already been added. You may not add two clusters with the same name.",
                cluster.name
            )));
        }
        if let Some(node) = cluster.nodes.iter().find(|n| self.is_node_in_use(n)) {
            return Err(CorralError::InvalidInput(format!(
                "The node, '{node}' is already configured. You may not add a node to two different clusters."
            )));
        }
        self.clusters.push(cluster);
        Ok(())
    }

    pub fn remove_cluster(&mut self, name: &str) -> bool {
        let before = self.clusters.len();
        self.clusters.retain(|c| c.name != name);
        before != self.clusters.len()
    }

    /// Highest level granted to the identity on the local cluster
    pub fn permission_level(&self, identity: &AuthIdentity) -> Option<PermissionLevel> {
        if identity.is_superuser() {
            return Some(PermissionLevel::Full);
        }
        self.permissions
            .local_cluster
            .iter()
            .filter(|entry| entry.applies_to(identity))
            .flat_map(|entry| entry.allow.iter().copied())
            .max()
    }

    /// Replace the local-cluster grants; each principal may appear once
    pub fn set_local_permissions(&mut self, entries: Vec<PermissionEntry>) -> Result<(), CorralError> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(CorralError::InvalidInput("Permission entry without a name".into()));
            }
            if entries[..i].iter().any(|e| e.kind == entry.kind && e.name == entry.name) {
                return Err(CorralError::InvalidInput(format!(
                    "Duplicate permission entry for '{}'",
                    entry.name
                )));
            }
        }
        self.permissions.local_cluster = entries;
        Ok(())
    }

    pub fn allows(&self, identity: &AuthIdentity, required: PermissionLevel) -> bool {
        self.permission_level(identity)
            .is_some_and(|level| level >= required)
    }
}

/// Stored known hosts (the `known-hosts` kind)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownHostsFile {
    #[serde(default)]
    pub format_version: u32,
    #[serde(default)]
    pub known_hosts: BTreeMap<String, HostCredentials>,
}

impl Default for KnownHostsFile {
    fn default() -> Self {
        Self {
            format_version: KNOWN_HOSTS_FORMAT_VERSION,
            known_hosts: BTreeMap::new(),
        }
    }
}

impl KnownHostsFile {
    pub fn from_text(text: &str) -> Result<Self, CorralError> {
        serde_json::from_str(text)
            .map_err(|e| CorralError::Protocol(format!("invalid known-hosts: {e}")))
    }

    pub fn to_text(&self) -> String {
        // plain data with string keys, serialization cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<KnownHost> {
        self.known_hosts
            .get(name)
            .map(|creds| KnownHost::from_credentials(name, creds.clone()))
    }

    pub fn hosts(&self) -> Vec<KnownHost> {
        self.known_hosts
            .iter()
            .map(|(name, creds)| KnownHost::from_credentials(name.clone(), creds.clone()))
            .collect()
    }

    /// Drop `remove`, then insert or replace every host in `add`
    pub fn apply(&mut self, add: &[KnownHost], remove: &[String]) {
        for name in remove {
            self.known_hosts.remove(name);
        }
        for host in add {
            self.known_hosts.insert(host.name.clone(), host.credentials());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_common::Destination;

    fn registry_with_grants() -> ClusterRegistry {
        let mut registry = ClusterRegistry::default();
        registry.permissions.local_cluster = vec![
            PermissionEntry {
                kind: PrincipalKind::User,
                name: "alice".to_string(),
                allow: vec![PermissionLevel::Read],
            },
            PermissionEntry {
                kind: PrincipalKind::Group,
                name: "operators".to_string(),
                allow: vec![PermissionLevel::Write],
            },
        ];
        registry
    }

    #[test]
    fn test_permission_levels() {
        let registry = registry_with_grants();

        let alice = AuthIdentity::new("alice", vec![]);
        assert!(registry.allows(&alice, PermissionLevel::Read));
        assert!(!registry.allows(&alice, PermissionLevel::Write));

        let alice_op = AuthIdentity::new("alice", vec!["operators".to_string()]);
        assert_eq!(registry.permission_level(&alice_op), Some(PermissionLevel::Write));

        let nobody = AuthIdentity::new("mallory", vec![]);
        assert!(!registry.allows(&nobody, PermissionLevel::Read));

        assert!(registry.allows(&AuthIdentity::superuser(), PermissionLevel::Full));
    }

    #[test]
    fn test_set_local_permissions() {
        let mut registry = registry_with_grants();
        let bob = AuthIdentity::new("bob", vec![]);
        assert!(!registry.allows(&bob, PermissionLevel::Read));

        let grant = |name: &str| PermissionEntry {
            kind: PrincipalKind::User,
            name: name.to_string(),
            allow: vec![PermissionLevel::Write],
        };
        registry.set_local_permissions(vec![grant("bob")]).unwrap();
        assert!(registry.allows(&bob, PermissionLevel::Write));
        assert!(!registry.allows(&AuthIdentity::new("alice", vec![]), PermissionLevel::Read));

        assert!(registry.set_local_permissions(vec![grant("bob"), grant("bob")]).is_err());
        assert!(registry.set_local_permissions(vec![grant(" ")]).is_err());
        assert_eq!(registry.permissions.local_cluster, vec![grant("bob")]);
    }

    #[test]
    fn test_node_in_one_cluster_only() {
        let mut registry = ClusterRegistry::default();
        registry
            .add_cluster(Cluster::new("alpha", vec!["n1".into(), "n2".into()]))
            .unwrap();

        assert!(registry
            .add_cluster(Cluster::new("beta", vec!["n2".into(), "n3".into()]))
            .is_err());
        assert!(registry.add_cluster(Cluster::new("alpha", vec![])).is_err());
        assert!(registry.remove_cluster("alpha"));
        assert!(!registry.is_node_in_use("n1"));
    }

    #[test]
    fn test_registry_text_roundtrip() {
        let text = registry_with_grants().to_text();
        let parsed = ClusterRegistry::from_text(&text).unwrap();
        assert_eq!(parsed.permissions.local_cluster.len(), 2);
        assert!(ClusterRegistry::from_text("not json").is_err());
    }

    #[test]
    fn test_known_hosts_apply() {
        let mut file = KnownHostsFile::default();
        let a = KnownHost::new("a", "t1", vec![Destination::new("10.0.0.1", 2224)]);
        let b = KnownHost::new("b", "t2", vec![]);
        file.apply(&[a.clone(), b], &[]);
        assert_eq!(file.hosts().len(), 2);

        let a2 = KnownHost::new("a", "t3", vec![Destination::new("10.0.0.9", 2224)]);
        file.apply(&[a2.clone()], &["b".to_string()]);
        assert_eq!(file.get("a"), Some(a2));
        assert_eq!(file.get("b"), None);
    }
}
