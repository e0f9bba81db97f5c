//! `/manage/*` and `/managec/{cluster}/*`: cluster administration.

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method as HttpMethod, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};

use corral_common::constants::endpoints;
use corral_common::{AuthIdentity, Cluster, CorralError, KnownHost, PermissionLevel};

use super::error::ApiResult;
use super::{require_level, require_superuser};
use crate::auth::RequestContext;
use crate::cfgsync;
use crate::cluster::{
    self, AuthCheck, ClusterRegistry, LocalMembership, NodeAuthRequest, PushOutcome,
};
use crate::dispatch::{DispatchRequest, SoftwareVersion, Target};
use crate::state::AppState;

fn check_new_cluster(registry: &ClusterRegistry, cluster: &Cluster) -> Result<(), CorralError> {
    if registry.is_cluster_name_in_use(&cluster.name) {
        return Err(CorralError::InvalidInput(format!(
            "The cluster name, '{}' has already been added. You may not add two clusters with the same name.",
            cluster.name
        )));
    }
    if let Some(node) = cluster.nodes.iter().find(|n| registry.is_node_in_use(n)) {
        return Err(CorralError::InvalidInput(format!(
            "The node, '{node}' is already configured. You may not add a node to two different clusters."
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ExistingClusterRequest {
    node_name: String,
}

#[derive(Debug, Deserialize)]
struct RemoteStatus {
    #[serde(default)]
    cluster_name: String,
    #[serde(default)]
    corosync_nodes: Vec<String>,
}

/// Register the cluster `node_name` belongs to
pub async fn existing_cluster(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<ExistingClusterRequest>,
) -> ApiResult<Response> {
    require_level(&state, &ctx, PermissionLevel::Full).await?;
    let node = request.node_name;

    let response = state
        .dispatcher
        .send_to_node(&AuthIdentity::superuser(), &node, &DispatchRequest::get(endpoints::STATUS))
        .await;
    let status: RemoteStatus = response.json().map_err(|_| {
        CorralError::InvalidInput(format!("Unable to communicate with remote daemon on node '{node}'."))
    })?;
    if status.cluster_name.is_empty() {
        return Err(CorralError::InvalidInput(format!(
            "The node, '{node}', does not currently have a cluster configured. You must create a cluster \
             using this node before adding it."
        ))
        .into());
    }

    let cluster = Cluster::new(status.cluster_name.clone(), status.corosync_nodes);
    check_new_cluster(&state.directory.registry().await?, &cluster)?;

    let (hosts, mut warnings) =
        cluster::get_cluster_known_hosts(&state.dispatcher, &cluster.name, &node).await;
    if !hosts.is_empty() {
        let (nodes, cluster_name) = cfgsync::local_targets(&state.dispatcher).await;
        let report = cfgsync::save_sync_new_known_hosts(
            &state.dispatcher,
            &hosts,
            &[],
            &nodes,
            cluster_name.as_deref(),
        )
        .await?;
        if !report.pushed {
            return Err(CorralError::Conflict(cfgsync::CONFLICT_MESSAGE.to_string()).into());
        }
    }

    cfgsync::update_registry(&state.dispatcher, |registry| {
        registry.add_cluster(cluster.clone())
    })
    .await?;
    tracing::info!(cluster = %cluster.name, nodes = ?cluster.nodes, "Existing cluster added");

    Ok(warnings.join("\n\n").into_response())
}

#[derive(Debug, Deserialize)]
pub struct NewClusterRequest {
    cluster_name: String,
    nodes: Vec<String>,
    /// Passed through to the node that sets up the cluster
    #[serde(default)]
    options: Value,
}

/// Create a cluster on its future nodes and register it
pub async fn new_cluster(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<NewClusterRequest>,
) -> ApiResult<Response> {
    require_superuser(&ctx)?;
    let cluster = Cluster::new(request.cluster_name, request.nodes);
    let Some(first) = cluster.nodes.first().cloned() else {
        return Err(CorralError::InvalidInput("No nodes specified".into()).into());
    };
    check_new_cluster(&state.directory.registry().await?, &cluster)?;

    // hand every future node the tokens we hold for the others
    let mut hosts: Vec<KnownHost> = vec![];
    for name in &cluster.nodes {
        if let Some(host) = state.directory.known_host(name).await {
            hosts.push(host);
        }
    }
    let mut warnings = vec![];
    for node in &cluster.nodes {
        let target = Target::Node(node.clone());
        match cluster::known_hosts_add(&state.dispatcher, &ctx.identity, &target, &hosts).await {
            PushOutcome::Success => {}
            PushOutcome::NotSupported => {
                warnings.push(format!(
                    "Unable to do correct authentication of cluster on node '{node}', because it is \
                     running an old version of the daemon."
                ));
                break;
            }
            PushOutcome::Error => {
                return Err(CorralError::InvalidInput(format!(
                    "Unable to authenticate all nodes on node '{node}'."
                ))
                .into());
            }
        }
    }

    let setup = DispatchRequest::post(
        endpoints::SETUP_CLUSTER,
        json!({"name": cluster.name, "nodes": cluster.nodes, "options": request.options}),
    )
    .with_timeout(state.config.dispatch.request_timeout() * 2);
    let response = state.dispatcher.send_to_node(&ctx.identity, &first, &setup).await;
    if !response.is_success() {
        let (_, body) = response.into_parts();
        return Err(CorralError::InvalidInput(body).into());
    }

    cfgsync::update_registry(&state.dispatcher, |registry| {
        registry.add_cluster(cluster.clone())
    })
    .await?;
    tracing::info!(cluster = %cluster.name, nodes = ?cluster.nodes, "New cluster created");

    Ok(warnings.join("\n\n").into_response())
}

#[derive(Debug, Deserialize)]
pub struct RemoveClusterRequest {
    clusters: Vec<String>,
}

pub async fn remove_cluster(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<RemoveClusterRequest>,
) -> ApiResult<StatusCode> {
    require_level(&state, &ctx, PermissionLevel::Full).await?;
    cfgsync::update_registry(&state.dispatcher, |registry| {
        for name in &request.clusters {
            registry.remove_cluster(name);
        }
        Ok(())
    })
    .await?;
    tracing::info!(clusters = ?request.clusters, "Clusters removed from registry");
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct NodesQuery {
    /// Comma separated node names
    #[serde(default)]
    nodes: String,
}

impl NodesQuery {
    fn names(&self) -> Vec<String> {
        self.nodes
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Versions reported by each node; `null` where unknown
pub async fn get_nodes_sw_versions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<NodesQuery>,
) -> Json<BTreeMap<String, Value>> {
    let request = DispatchRequest::get(endpoints::GET_SW_VERSIONS);
    let replies = state.dispatcher.fan_out(&ctx.identity, &query.names(), &request).await;
    Json(
        replies
            .into_iter()
            .map(|(node, reply)| {
                let version = reply
                    .json::<Value>()
                    .ok()
                    .and_then(|v| v.get("pcs").and_then(SoftwareVersion::from_json))
                    .map(SoftwareVersion::to_json)
                    .unwrap_or(Value::Null);
                (node, version)
            })
            .collect(),
    )
}

pub async fn check_auth_against_nodes(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<NodesQuery>,
) -> Json<BTreeMap<String, AuthCheck>> {
    Json(cluster::check_auth_against_nodes(&state.dispatcher, &ctx.identity, &query.names()).await)
}

#[derive(Debug, Deserialize)]
pub struct AuthNodesRequest {
    nodes: BTreeMap<String, NodeAuthRequest>,
}

/// Authenticate against nodes by password and store their tokens
pub async fn auth_gui_against_nodes(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<AuthNodesRequest>,
) -> ApiResult<Json<Value>> {
    require_level(&state, &ctx, PermissionLevel::Full).await?;
    let (hosts, failures) = cluster::authenticate_nodes(&state.dispatcher, &request.nodes).await;

    let mut plaintext_error = None;
    if !hosts.is_empty() {
        let (nodes, cluster_name) = cfgsync::local_targets(&state.dispatcher).await;
        let report = cfgsync::save_sync_new_known_hosts(
            &state.dispatcher,
            &hosts,
            &[],
            &nodes,
            cluster_name.as_deref(),
        )
        .await?;
        if !report.pushed {
            plaintext_error = Some("Configuration conflict detected. Please repeat the last action.");
        }
    }

    let node_auth_error: BTreeMap<String, u8> =
        failures.into_iter().map(|(node, failed)| (node, u8::from(failed))).collect();
    let mut body = json!({"node_auth_error": node_auth_error});
    if let Some(error) = plaintext_error {
        body["plaintext_error"] = json!(error);
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct MembershipRequest {
    #[serde(default)]
    cluster_name: Option<String>,
    #[serde(default)]
    nodes: Vec<String>,
}

/// Replace the local corosync view
pub async fn set_membership(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<MembershipRequest>,
) -> ApiResult<StatusCode> {
    require_superuser(&ctx)?;
    state
        .directory
        .set_membership(LocalMembership::new(request.cluster_name, request.nodes))
        .await;
    Ok(StatusCode::OK)
}

/// Push the stored tokens of a cluster's members to that cluster
pub async fn fix_auth_of_cluster(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(cluster_name): Path<String>,
) -> ApiResult<Response> {
    require_level(&state, &ctx, PermissionLevel::Full).await?;

    let mut hosts = vec![];
    for node in state.directory.cluster_nodes(&cluster_name).await {
        if let Some(host) = state.directory.known_host(&node).await {
            hosts.push(host);
        }
    }

    let target = Target::Cluster(cluster_name.clone());
    match cluster::known_hosts_add(&state.dispatcher, &AuthIdentity::superuser(), &target, &hosts).await {
        PushOutcome::Success => {
            tracing::info!(cluster = %cluster_name, hosts = hosts.len(), "Fixed authentication of cluster");
            Ok("Authentication of nodes in cluster should be fixed.".into_response())
        }
        PushOutcome::NotSupported => Err(CorralError::VersionIncompatibility(
            "Old version of the daemon is running on nodes in the cluster".into(),
        )
        .into()),
        PushOutcome::Error => Err(CorralError::InvalidInput("Authentication failed.".into()).into()),
    }
}

/// Authenticate a new node in a cluster, then have the cluster add it
pub async fn add_node_to_cluster(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(cluster_name): Path<String>,
    Json(params): Json<Map<String, Value>>,
) -> ApiResult<Response> {
    let membership = state.directory.membership().await;
    if membership.cluster_name.as_deref() == Some(cluster_name.as_str()) {
        require_level(&state, &ctx, PermissionLevel::Full).await?;
    }

    let new_node = params
        .get("new_nodename")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let Some(host) = state.directory.known_host(&new_node).await else {
        return Err(CorralError::InvalidInput("New node is not authenticated.".into()).into());
    };

    let target = Target::Cluster(cluster_name.clone());
    match cluster::known_hosts_add(&state.dispatcher, &AuthIdentity::superuser(), &target, &[host]).await {
        PushOutcome::Success => {}
        PushOutcome::NotSupported => {
            tracing::warn!(cluster = %cluster_name, node = %new_node, "Cluster cannot store tokens, adding node anyway");
        }
        PushOutcome::Error => {
            return Err(CorralError::InvalidInput(
                "Failed to save the token of the new node in the target cluster.".into(),
            )
            .into());
        }
    }

    let request = DispatchRequest::post(endpoints::ADD_NODE_ALL, Value::Object(params));
    let (status, body) = state
        .dispatcher
        .send_to_cluster(&ctx.identity, &cluster_name, &request)
        .await
        .into_parts();
    match status {
        200 => {
            tracing::info!(cluster = %cluster_name, node = %new_node, "Node added to cluster");
            Ok("Node added successfully.".into_response())
        }
        403 => Ok((StatusCode::FORBIDDEN, body).into_response()),
        _ => Err(CorralError::InvalidInput(format!(
            "Failed to add new node '{new_node}' into cluster '{cluster_name}': {body}"
        ))
        .into()),
    }
}

/// Replace the permission table of a cluster
pub async fn permissions_save(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(cluster_name): Path<String>,
    Json(permissions): Json<Value>,
) -> ApiResult<Response> {
    let request = DispatchRequest::post(
        endpoints::SET_PERMISSIONS,
        json!({"json_data": permissions.to_string()}),
    );
    let (status, body) = state
        .dispatcher
        .send_to_cluster(&ctx.identity, &cluster_name, &request)
        .await
        .into_parts();
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, body).into_response())
}

/// Forward any other cluster request with version negotiation
pub async fn cluster_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((cluster_name, path)): Path<(String, String)>,
    method: HttpMethod,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult<Response> {
    let request = if method == HttpMethod::GET {
        DispatchRequest::get(path).with_payload(json!(query))
    } else {
        let payload: Value = if body.is_empty() {
            json!({})
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| CorralError::InvalidInput(format!("Invalid request body: {e}")))?
        };
        DispatchRequest::post(path, payload)
    };

    let response = state
        .dispatcher
        .send_negotiated(&ctx.identity, &cluster_name, &request)
        .await;
    let (status, body) = response.into_parts();
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, body).into_response())
}
