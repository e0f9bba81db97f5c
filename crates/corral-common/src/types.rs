//! Core types shared across Corral components.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PORT, SUPERUSER};

/// One network address at which a node's daemon listens
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub addr: String,
    pub port: u16,
}

impl Destination {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

/// Credentials and addresses of a known host, as carried on the wire
/// keyed by host name: `{name: {dest_list, token}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCredentials {
    pub dest_list: Vec<Destination>,
    pub token: String,
}

/// A node we hold an authentication token for.
///
/// Replaced as a whole on re-authentication, never partially updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownHost {
    /// Logical node name (identity key)
    pub name: String,

    /// Opaque bearer token issued by that node
    pub token: String,

    /// Addresses in order of preference
    pub dest_list: Vec<Destination>,
}

impl KnownHost {
    pub fn new(name: impl Into<String>, token: impl Into<String>, dest_list: Vec<Destination>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            dest_list,
        }
    }

    /// Primary address of the host.
    ///
    /// A host stored without addresses is reached by its name on the default port.
    pub fn first_dest(&self) -> Destination {
        self.dest_list
            .first()
            .cloned()
            .unwrap_or_else(|| Destination::new(self.name.clone(), DEFAULT_PORT))
    }

    pub fn credentials(&self) -> HostCredentials {
        HostCredentials {
            dest_list: self.dest_list.clone(),
            token: self.token.clone(),
        }
    }

    pub fn from_credentials(name: impl Into<String>, credentials: HostCredentials) -> Self {
        Self {
            name: name.into(),
            token: credentials.token,
            dest_list: credentials.dest_list,
        }
    }
}

/// A named set of nodes managed together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    /// Member node names, in registration order
    pub nodes: Vec<String>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, nodes: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !unique.contains(&node) {
                unique.push(node);
            }
        }
        Self {
            name: name.into(),
            nodes: unique,
        }
    }

    pub fn has_node(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n == node)
    }
}

/// Capability required for a local-cluster action.
///
/// Ordered: `Read < Write < Full`; holding a level implies every lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
    Full,
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Full => "full",
        };
        f.write_str(name)
    }
}

/// Who is making a request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub username: String,
    #[serde(default)]
    pub usergroups: Vec<String>,
}

impl AuthIdentity {
    pub fn new(username: impl Into<String>, usergroups: Vec<String>) -> Self {
        Self {
            username: username.into(),
            usergroups,
        }
    }

    /// The identity used for system-level inter-node calls
    pub fn superuser() -> Self {
        Self {
            username: SUPERUSER.to_string(),
            usergroups: vec![],
        }
    }

    pub fn is_superuser(&self) -> bool {
        self.username == SUPERUSER
    }
}
