//! Cluster coordination modules.
//!
//! Implements:
//! - Node directory (known hosts, registered clusters, local membership)
//! - Registry and known-hosts content formats
//! - Token propagation with legacy fallback

mod directory;
mod registry;
mod tokens;

pub use directory::{LocalMembership, NodeDirectory};
pub use registry::{ClusterRegistry, KnownHostsFile, PermissionEntry};
#[cfg(test)]
pub use registry::PrincipalKind;
pub use tokens::{
    AuthCheck, KnownHostsChange, NodeAuthRequest, PushOutcome, authenticate_nodes,
    check_auth_against_nodes, get_cluster_known_hosts, known_hosts_add,
    parse_legacy_token_payload,
};
