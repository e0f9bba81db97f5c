//! Request translations for remotes running older protocol revisions.

use serde_json::{Value, json};

use super::version::SoftwareVersion;

/// Rewrites a request into the shape an older remote understands
pub type RewriteFn = fn(&Value) -> (String, Value);

/// A rewrite applied when the remote reports a version at or below `threshold`
pub struct VersionedRewrite {
    pub threshold: SoftwareVersion,
    pub rewrite: RewriteFn,
}

/// What to try when a modern endpoint answers 404
#[derive(Clone, Copy)]
pub enum LegacyRoute {
    /// Same payload, different endpoint
    Redirect(&'static str),
    /// Payload and endpoint both change
    Rewrite(RewriteFn),
}

// Remotes up to 0.9.138 read the node from "node" and must not get "name".
const STANDBY_REWRITES: &[VersionedRewrite] = &[VersionedRewrite {
    threshold: SoftwareVersion::new(0, 9, 138),
    rewrite: standby_node_param,
}];

const UNSTANDBY_REWRITES: &[VersionedRewrite] = &[VersionedRewrite {
    threshold: SoftwareVersion::new(0, 9, 138),
    rewrite: unstandby_node_param,
}];

/// Version-gated rewrites registered for `path`, lowest threshold first
pub fn version_rewrites(path: &str) -> &'static [VersionedRewrite] {
    match path {
        "node_standby" => STANDBY_REWRITES,
        "node_unstandby" => UNSTANDBY_REWRITES,
        _ => &[],
    }
}

/// Fallback for a modern endpoint the remote does not know
pub fn legacy_route(path: &str) -> Option<LegacyRoute> {
    match path {
        "remove_constraint_remote" => Some(LegacyRoute::Redirect("resource_cmd/rm_constraint")),
        "remove_constraint_rule_remote" => {
            Some(LegacyRoute::Redirect("resource_cmd/rm_constraint_rule"))
        }
        // tree view of resources arrived in 0.9.143
        "resource_change_group" => Some(LegacyRoute::Rewrite(resource_change_group)),
        "resource_clone" => Some(LegacyRoute::Rewrite(resource_clone)),
        "resource_unclone" => Some(LegacyRoute::Rewrite(resource_unclone)),
        "resource_master" => Some(LegacyRoute::Rewrite(resource_master)),
        _ => None,
    }
}

fn param(payload: &Value, key: &str) -> Value {
    payload.get(key).cloned().unwrap_or(Value::Null)
}

fn param_or_empty(payload: &Value, key: &str) -> Value {
    match payload.get(key) {
        Some(Value::Null) | None => json!(""),
        Some(value) => value.clone(),
    }
}

fn standby_node_param(payload: &Value) -> (String, Value) {
    ("node_standby".to_string(), json!({ "node": param(payload, "name") }))
}

fn unstandby_node_param(payload: &Value) -> (String, Value) {
    ("node_unstandby".to_string(), json!({ "node": param(payload, "name") }))
}

fn resource_change_group(payload: &Value) -> (String, Value) {
    (
        "update_resource".to_string(),
        json!({
            "resource_id": param(payload, "resource_id"),
            "resource_group": param_or_empty(payload, "group_id"),
            "_orig_resource_group": param_or_empty(payload, "old_group_id"),
        }),
    )
}

fn resource_clone(payload: &Value) -> (String, Value) {
    (
        "update_resource".to_string(),
        json!({
            "resource_id": param(payload, "resource_id"),
            "resource_clone": true,
            "_orig_resource_clone": "false",
        }),
    )
}

fn resource_unclone(payload: &Value) -> (String, Value) {
    (
        "update_resource".to_string(),
        json!({
            "resource_id": param(payload, "resource_id"),
            "resource_clone": null,
            "_orig_resource_clone": "true",
        }),
    )
}

fn resource_master(payload: &Value) -> (String, Value) {
    (
        "update_resource".to_string(),
        json!({
            "resource_id": param(payload, "resource_id"),
            "resource_ms": true,
            "_orig_resource_ms": "false",
        }),
    )
}
