//! `/remote/*`: endpoints other daemons call.

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use corral_common::constants::SUPERUSER;
use corral_common::{CorralError, HostCredentials, KnownHost, PermissionLevel};

use super::error::ApiResult;
use super::{require_level, require_superuser};
use crate::auth::{RequestContext, verify_password};
use crate::cfgsync::{
    self, GetConfigsQuery, GetConfigsResponse, PushReport, SetConfigsRequest, SetConfigsResponse,
};
use crate::cluster::{KnownHostsChange, PermissionEntry, parse_legacy_token_payload};
use crate::dispatch::SoftwareVersion;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Trade the superuser password for a token
pub async fn auth(State(state): State<AppState>, Json(request): Json<AuthRequest>) -> Response {
    let Some(expected) = state.config.auth.superuser_password_sha256.as_deref() else {
        tracing::warn!("Authentication attempted but no superuser password is configured");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if request.username != SUPERUSER || !verify_password(&request.password, expected) {
        tracing::info!(user = %request.username, "Failed authentication");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state.tokens.issue(&request.username).await {
        Ok(token) => token.into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "Unable to store issued token");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn check_auth() -> Json<Value> {
    Json(json!({"success": true}))
}

pub async fn get_sw_versions() -> Json<Value> {
    Json(json!({"pcs": SoftwareVersion::current().to_json()}))
}

/// Local membership as seen by this node
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let membership = state.directory.membership().await;
    Json(json!({
        "node_name": state.directory.local_node(),
        "cluster_name": membership.cluster_name.unwrap_or_default(),
        "corosync_nodes": membership.nodes,
    }))
}

pub async fn get_configs(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<GetConfigsQuery>,
) -> ApiResult<Json<GetConfigsResponse>> {
    require_level(&state, &ctx, PermissionLevel::Full).await?;
    let response =
        cfgsync::serve_get_configs(state.directory.store(), ctx.cluster_name.as_deref(), &query).await;
    Ok(Json(response))
}

pub async fn set_configs(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<SetConfigsRequest>,
) -> ApiResult<Json<SetConfigsResponse>> {
    require_superuser(&ctx)?;
    let response = cfgsync::serve_set_configs(state.directory.store(), ctx.cluster_name.as_deref(), request)
        .await
        .map_err(|e| CorralError::Storage(format!("{e:#}")))?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct SyncOptionsRequest {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    interval_secs: Option<u64>,
}

pub async fn set_sync_options(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<SyncOptionsRequest>,
) -> ApiResult<Json<cfgsync::SyncOptions>> {
    require_superuser(&ctx)?;
    if request.enabled.is_none() && request.interval_secs.is_none() {
        return Err(CorralError::InvalidInput("Exactly one option has to be specified".into()).into());
    }
    if let Some(interval) = request.interval_secs {
        if interval == 0 {
            return Err(CorralError::InvalidInput("Invalid sync interval".into()).into());
        }
        state.sync.set_interval(interval).await;
    }
    if let Some(enabled) = request.enabled {
        state.sync.set_enabled(enabled).await;
    }
    Ok(Json(state.sync.options().await))
}

async fn store_known_hosts(state: &AppState, add: &[KnownHost], remove: &[String]) -> ApiResult<PushReport> {
    let (nodes, cluster_name) = cfgsync::local_targets(&state.dispatcher).await;
    let report =
        cfgsync::save_sync_new_known_hosts(&state.dispatcher, add, remove, &nodes, cluster_name.as_deref())
            .await?;
    if !report.pushed {
        return Err(CorralError::Conflict("Unable to save known hosts: configuration conflict".into()).into());
    }
    Ok(report)
}

pub async fn known_hosts_change(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(change): Json<KnownHostsChange>,
) -> ApiResult<Json<PushReport>> {
    require_level(&state, &ctx, PermissionLevel::Full).await?;
    let report = store_known_hosts(&state, &change.added_hosts(), &change.known_hosts_remove).await?;
    Ok(Json(report))
}

/// Legacy flat `node:`/`port:` token push
pub async fn save_tokens(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<Map<String, Value>>,
) -> ApiResult<Json<PushReport>> {
    require_level(&state, &ctx, PermissionLevel::Full).await?;
    let hosts = parse_legacy_token_payload(&payload);
    let report = store_known_hosts(&state, &hosts, &[]).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct SetPermissionsRequest {
    /// JSON text of a [`PermissionsUpdate`]
    json_data: String,
}

#[derive(Debug, Deserialize)]
struct PermissionsUpdate {
    #[serde(default)]
    permissions: Vec<PermissionEntry>,
}

/// Replace the local-cluster permission table
pub async fn set_permissions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<SetPermissionsRequest>,
) -> ApiResult<Response> {
    require_level(&state, &ctx, PermissionLevel::Full).await?;
    let update: PermissionsUpdate = serde_json::from_str(&request.json_data)
        .map_err(|e| CorralError::InvalidInput(format!("Invalid permissions: {e}")))?;

    let entries = update.permissions.len();
    cfgsync::update_registry(&state.dispatcher, |registry| {
        registry.set_local_permissions(update.permissions.clone())
    })
    .await?;
    tracing::info!(user = %ctx.identity.username, entries, "Permissions updated");
    Ok("Permissions saved".into_response())
}

/// Stored known hosts that belong to the local cluster
async fn local_cluster_hosts(state: &AppState) -> ApiResult<Vec<KnownHost>> {
    let members = state.directory.membership().await.nodes;
    let hosts = state.directory.known_hosts().await?;
    Ok(hosts
        .hosts()
        .into_iter()
        .filter(|host| members.contains(&host.name))
        .collect())
}

pub async fn get_cluster_known_hosts(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<BTreeMap<String, HostCredentials>>> {
    require_superuser(&ctx)?;
    let hosts = local_cluster_hosts(&state).await?;
    Ok(Json(
        hosts
            .into_iter()
            .map(|host| (host.name.clone(), host.credentials()))
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ClusterTokensQuery {
    #[serde(default)]
    with_ports: Option<String>,
}

/// Legacy token pull
pub async fn get_cluster_tokens(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ClusterTokensQuery>,
) -> ApiResult<Json<Value>> {
    require_superuser(&ctx)?;
    let hosts = local_cluster_hosts(&state).await?;

    let tokens: BTreeMap<String, String> =
        hosts.iter().map(|h| (h.name.clone(), h.token.clone())).collect();
    if query.with_ports.is_none() {
        return Ok(Json(json!(tokens)));
    }
    let ports: BTreeMap<String, u16> = hosts
        .iter()
        .map(|h| (h.name.clone(), h.first_dest().port))
        .collect();
    Ok(Json(json!({"tokens": tokens, "ports": ports})))
}
