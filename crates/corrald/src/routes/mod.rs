//! HTTP route handlers for corrald.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use corral_common::{CorralError, PermissionLevel};

use crate::auth::{self, RequestContext};
use crate::state::AppState;

mod commands;
mod error;
mod health;
mod manage;
mod remote;

use error::ApiResult;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        // Command gate
        .route("/run_pcs", post(commands::run_command))
        // Daemon-to-daemon endpoints
        .nest("/remote", remote_routes())
        // Cluster administration
        .nest("/manage", manage_routes())
        .route(
            "/managec/{cluster}/fix_auth_of_cluster",
            post(manage::fix_auth_of_cluster),
        )
        .route(
            "/managec/{cluster}/add_node_to_cluster",
            post(manage::add_node_to_cluster),
        )
        .route(
            "/managec/{cluster}/permissions_save",
            post(manage::permissions_save),
        )
        .route(
            "/managec/{cluster}/{*path}",
            get(manage::cluster_request).post(manage::cluster_request),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_token));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/remote/auth", post(remote::auth))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn remote_routes() -> Router<AppState> {
    Router::new()
        .route("/check_auth", get(remote::check_auth).post(remote::check_auth))
        .route("/get_sw_versions", get(remote::get_sw_versions))
        .route("/status", get(remote::status))
        .route("/get_configs", get(remote::get_configs))
        .route("/set_configs", post(remote::set_configs))
        .route("/set_sync_options", post(remote::set_sync_options))
        .route("/known_hosts_change", post(remote::known_hosts_change))
        .route("/save_tokens", post(remote::save_tokens))
        .route("/get_cluster_known_hosts", get(remote::get_cluster_known_hosts))
        .route("/get_cluster_tokens", get(remote::get_cluster_tokens))
        .route("/set_permissions", post(remote::set_permissions))
}

fn manage_routes() -> Router<AppState> {
    Router::new()
        .route("/existingcluster", post(manage::existing_cluster))
        .route("/newcluster", post(manage::new_cluster))
        .route("/removecluster", post(manage::remove_cluster))
        .route("/get_nodes_sw_versions", get(manage::get_nodes_sw_versions))
        .route("/check_auth_against_nodes", get(manage::check_auth_against_nodes))
        .route("/auth_gui_against_nodes", post(manage::auth_gui_against_nodes))
        .route("/membership", post(manage::set_membership))
}

/// Reject callers holding less than `level` on the local cluster
async fn require_level(state: &AppState, ctx: &RequestContext, level: PermissionLevel) -> ApiResult<()> {
    let registry = state.directory.registry().await?;
    if registry.allows(&ctx.identity, level) {
        return Ok(());
    }
    tracing::info!(user = %ctx.identity.username, required = %level, "Permission denied");
    Err(CorralError::Authorization(format!("{level} permission required")).into())
}

fn require_superuser(ctx: &RequestContext) -> ApiResult<()> {
    if ctx.identity.is_superuser() {
        Ok(())
    } else {
        Err(CorralError::Authorization("superuser required".into()).into())
    }
}
