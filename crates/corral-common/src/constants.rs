//! Shared constants for Corral components.

/// Default daemon port, also the implied port for legacy token maps
pub const DEFAULT_PORT: u16 = 2224;

/// Default HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:2224";

/// Name of the superuser identity used for inter-node system calls
pub const SUPERUSER: &str = "hacluster";

/// Default per-request timeout for inter-node calls (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default config sync interval (seconds)
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 600;

/// How many times a multi-step admin operation retries a config push
pub const CONFIG_PUSH_ATTEMPTS: usize = 2;

/// Default path of the external management tool
pub const DEFAULT_TOOL_PATH: &str = "/usr/sbin/pcs";

/// Default directory for persisted state
pub const DEFAULT_DATA_DIR: &str = "/var/lib/corral";

/// Cookie names carried on inter-node requests
pub mod cookies {
    /// Bearer token issued by the target node
    pub const TOKEN: &str = "token";

    /// Effective username when the token belongs to the superuser
    pub const CIB_USER: &str = "CIB_user";

    /// Base64 of the space-separated group list
    pub const CIB_USER_GROUPS: &str = "CIB_user_groups";
}

/// Remote endpoint names (relative to `/remote/`)
pub mod endpoints {
    pub const AUTH: &str = "auth";
    pub const CHECK_AUTH: &str = "check_auth";
    pub const GET_SW_VERSIONS: &str = "get_sw_versions";
    pub const STATUS: &str = "status";
    pub const GET_CONFIGS: &str = "get_configs";
    pub const SET_CONFIGS: &str = "set_configs";
    pub const KNOWN_HOSTS_CHANGE: &str = "known_hosts_change";
    pub const SAVE_TOKENS: &str = "save_tokens";
    pub const GET_CLUSTER_KNOWN_HOSTS: &str = "get_cluster_known_hosts";
    pub const GET_CLUSTER_TOKENS: &str = "get_cluster_tokens";
    pub const SETUP_CLUSTER: &str = "setup_cluster";
    pub const ADD_NODE_ALL: &str = "add_node_all";
    pub const SET_PERMISSIONS: &str = "set_permissions";
}
