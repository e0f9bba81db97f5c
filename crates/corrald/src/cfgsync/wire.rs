//! `get_configs` / `set_configs` message shapes and their serving side.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::store::{AcceptOutcome, ConfigKind, ConfigStore, VersionedConfig};

pub const STATUS_OK: &str = "ok";
pub const STATUS_WRONG_CLUSTER: &str = "wrong_cluster_name";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetConfigsQuery {
    #[serde(default)]
    pub cluster_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetConfigsResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub configs: BTreeMap<String, VersionedConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetConfigsRequest {
    pub cluster_name: String,
    #[serde(default)]
    pub force: bool,
    pub configs: BTreeMap<String, VersionedConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetConfigsResponse {
    pub status: String,
    #[serde(default)]
    pub result: BTreeMap<String, AcceptOutcome>,
}

fn cluster_matches(local_cluster: Option<&str>, requested: &str) -> bool {
    local_cluster.is_some_and(|name| name == requested)
}

/// Answer a fetch for the local copies of every kind
pub async fn serve_get_configs(
    store: &ConfigStore,
    local_cluster: Option<&str>,
    query: &GetConfigsQuery,
) -> GetConfigsResponse {
    if !cluster_matches(local_cluster, &query.cluster_name) {
        return GetConfigsResponse {
            status: STATUS_WRONG_CLUSTER.to_string(),
            cluster_name: None,
            configs: BTreeMap::new(),
        };
    }

    let mut configs = BTreeMap::new();
    for kind in ConfigKind::ALL {
        if store.is_present(kind).await {
            configs.insert(kind.name().to_string(), store.get(kind).await);
        }
    }
    GetConfigsResponse {
        status: STATUS_OK.to_string(),
        cluster_name: local_cluster.map(str::to_string),
        configs,
    }
}

/// Offer every pushed copy to the local store
pub async fn serve_set_configs(
    store: &ConfigStore,
    local_cluster: Option<&str>,
    request: SetConfigsRequest,
) -> anyhow::Result<SetConfigsResponse> {
    if !cluster_matches(local_cluster, &request.cluster_name) {
        return Ok(SetConfigsResponse {
            status: STATUS_WRONG_CLUSTER.to_string(),
            result: BTreeMap::new(),
        });
    }

    let mut result = BTreeMap::new();
    for (name, config) in request.configs {
        let outcome = match ConfigKind::from_name(&name) {
            Some(kind) => store.offer(kind, config, request.force).await?,
            None => AcceptOutcome::NotSupported,
        };
        result.insert(name, outcome);
    }
    Ok(SetConfigsResponse {
        status: STATUS_OK.to_string(),
        result,
    })
}
