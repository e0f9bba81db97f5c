//! Cluster request dispatcher.
//!
//! Sends authenticated requests to one node, to a cluster (first member
//! that answers), or to many nodes at once. Transport failures never escape
//! as errors: every call ends in a [`NodeResponse`].
//!
//! Cluster-scoped requests try members in registry order. Members without
//! a stored token or that cannot be reached are skipped; the first member
//! producing any HTTP response wins.

mod compat;
mod transport;
mod version;

use compat::{LegacyRoute, legacy_route, version_rewrites};
pub use transport::{HttpTransport, Method, RemoteCall, Transport};
pub use version::SoftwareVersion;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use corral_common::constants::{DEFAULT_PORT, endpoints};
use corral_common::{AuthIdentity, CorralError, Destination, KnownHost};

use crate::cluster::NodeDirectory;

/// Outcome of one inter-node call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeResponse {
    /// The remote answered
    Reply { status: u16, body: String },
    /// Timeout, refused connection, TLS failure
    Unreachable { error: String },
    /// We hold no token for the node
    NotAuthenticated,
}

impl NodeResponse {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Reply { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Reply { body, .. } => body,
            _ => "",
        }
    }

    pub fn is_success(&self) -> bool {
        self.status().is_some_and(|s| (200..300).contains(&s))
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Parse the body of a successful reply
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CorralError> {
        match self {
            Self::Reply { status, body } if (200..300).contains(status) => serde_json::from_str(body)
                .map_err(|e| CorralError::Protocol(format!("unparseable response: {e}"))),
            Self::Reply { status, .. } => {
                Err(CorralError::Protocol(format!("unexpected status {status}")))
            }
            Self::Unreachable { error } => Err(CorralError::Transport(error.clone())),
            Self::NotAuthenticated => Err(CorralError::Authorization("no token for node".into())),
        }
    }

    /// Status and body to relay to our own caller
    pub fn into_parts(self) -> (u16, String) {
        match self {
            Self::Reply { status, body } => (status, body),
            Self::Unreachable { .. } => (400, json!({"noresponse": true}).to_string()),
            Self::NotAuthenticated => (400, json!({"notoken": true}).to_string()),
        }
    }
}

/// Where a request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(String),
    Cluster(String),
}

/// Endpoint, method, payload and timeout of one logical request
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub path: String,
    pub method: Method,
    pub payload: Value,
    /// Overrides the dispatcher default
    pub timeout: Option<Duration>,
}

impl DispatchRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: normalize_path(&path.into()),
            method: Method::Get,
            payload: json!({}),
            timeout: None,
        }
    }

    pub fn post(path: impl Into<String>, payload: Value) -> Self {
        Self {
            path: normalize_path(&path.into()),
            method: Method::Post,
            payload,
            timeout: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn normalize_path(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

pub struct Dispatcher {
    directory: Arc<NodeDirectory>,
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
    default_port: u16,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<NodeDirectory>,
        transport: Arc<dyn Transport>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            transport,
            default_timeout,
            default_port: DEFAULT_PORT,
        }
    }

    /// Port used for hosts stored without an address
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    pub fn directory(&self) -> &Arc<NodeDirectory> {
        &self.directory
    }

    /// Send to a node or a cluster
    pub async fn send(
        &self,
        identity: &AuthIdentity,
        target: &Target,
        request: &DispatchRequest,
    ) -> NodeResponse {
        match target {
            Target::Node(node) => self.send_to_node(identity, node, request).await,
            Target::Cluster(cluster) => self.send_to_cluster(identity, cluster, request).await,
        }
    }

    pub async fn send_to_node(
        &self,
        identity: &AuthIdentity,
        node: &str,
        request: &DispatchRequest,
    ) -> NodeResponse {
        self.send_to_node_with(identity, node, request, &[]).await
    }

    /// Send to one node, preferring credentials from `extra_hosts` over stored ones
    pub async fn send_to_node_with(
        &self,
        identity: &AuthIdentity,
        node: &str,
        request: &DispatchRequest,
        extra_hosts: &[KnownHost],
    ) -> NodeResponse {
        let host = match extra_hosts.iter().find(|h| h.name == node) {
            Some(host) => Some(host.clone()),
            None => self.directory.known_host(node).await,
        };
        let Some(host) = host else {
            tracing::debug!(node = node, path = %request.path, "No token for node");
            return NodeResponse::NotAuthenticated;
        };
        let dest = host
            .dest_list
            .first()
            .cloned()
            .unwrap_or_else(|| Destination::new(host.name.clone(), self.default_port));
        self.send_to_dest(identity, &dest, Some(host.token), request).await
    }

    /// Send to an explicit address, bypassing the directory
    pub async fn send_to_dest(
        &self,
        identity: &AuthIdentity,
        dest: &Destination,
        token: Option<String>,
        request: &DispatchRequest,
    ) -> NodeResponse {
        let call = RemoteCall {
            dest: dest.clone(),
            token,
            identity: identity.clone(),
            path: request.path.clone(),
            method: request.method,
            payload: request.payload.clone(),
        };
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let result = tokio::time::timeout(timeout, self.transport.call(&call, timeout)).await;
        match result {
            Ok(Ok((status, body))) => {
                tracing::debug!(addr = %dest.addr, path = %call.path, status, "Remote call finished");
                NodeResponse::Reply { status, body }
            }
            Ok(Err(e)) => {
                tracing::warn!(addr = %dest.addr, path = %call.path, error = %e, "Remote call failed");
                NodeResponse::Unreachable { error: e.to_string() }
            }
            Err(_) => {
                tracing::warn!(addr = %dest.addr, path = %call.path, ?timeout, "Remote call timed out");
                NodeResponse::Unreachable {
                    error: format!("timed out after {timeout:?}"),
                }
            }
        }
    }

    /// Send to the first member of `cluster` that answers
    pub async fn send_to_cluster(
        &self,
        identity: &AuthIdentity,
        cluster: &str,
        request: &DispatchRequest,
    ) -> NodeResponse {
        let nodes = self.directory.cluster_nodes(cluster).await;
        let mut last = NodeResponse::Unreachable {
            error: format!("no nodes known for cluster '{cluster}'"),
        };

        for node in &nodes {
            let response = self.send_to_node(identity, node, request).await;
            if matches!(response, NodeResponse::Reply { .. }) {
                return response;
            }
            tracing::debug!(cluster = cluster, node = %node, "Cluster member did not answer, trying next");
            last = response;
        }

        last
    }

    /// Send the same request to every node concurrently.
    ///
    /// Each call owns its result; the map is assembled after all calls end.
    pub async fn fan_out(
        &self,
        identity: &AuthIdentity,
        nodes: &[String],
        request: &DispatchRequest,
    ) -> HashMap<String, NodeResponse> {
        self.fan_out_with(identity, nodes, request, &[]).await
    }

    pub async fn fan_out_with(
        &self,
        identity: &AuthIdentity,
        nodes: &[String],
        request: &DispatchRequest,
        extra_hosts: &[KnownHost],
    ) -> HashMap<String, NodeResponse> {
        let calls = nodes.iter().map(|node| async move {
            let response = self
                .send_to_node_with(identity, node, request, extra_hosts)
                .await;
            (node.clone(), response)
        });

        join_all(calls).await.into_iter().collect()
    }

    /// Version a target reports; unreadable answers count as [`SoftwareVersion::UNKNOWN`]
    pub async fn remote_version(&self, identity: &AuthIdentity, target: &Target) -> SoftwareVersion {
        let response = self
            .send(identity, target, &DispatchRequest::get(endpoints::GET_SW_VERSIONS))
            .await;
        response
            .json::<Value>()
            .ok()
            .and_then(|versions| versions.get("pcs").and_then(SoftwareVersion::from_json))
            .unwrap_or(SoftwareVersion::UNKNOWN)
    }

    /// Cluster request with version negotiation and 404 fallback
    pub async fn send_negotiated(
        &self,
        identity: &AuthIdentity,
        cluster: &str,
        request: &DispatchRequest,
    ) -> NodeResponse {
        let target = Target::Cluster(cluster.to_string());
        let mut outgoing = request.clone();

        let rewrites = version_rewrites(&request.path);
        if !rewrites.is_empty() {
            let remote = self.remote_version(identity, &target).await;
            if let Some(rule) = rewrites.iter().find(|rule| remote <= rule.threshold) {
                let (path, payload) = (rule.rewrite)(&request.payload);
                tracing::debug!(
                    cluster = cluster,
                    %remote,
                    threshold = %rule.threshold,
                    from = %request.path,
                    to = %path,
                    "Translating request for older remote"
                );
                outgoing.path = path;
                outgoing.payload = payload;
            }
        }

        let response = self.send(identity, &target, &outgoing).await;
        if !response.is_not_found() {
            return response;
        }

        let Some(route) = legacy_route(&request.path) else {
            return response;
        };
        let fallback = match route {
            LegacyRoute::Redirect(path) => DispatchRequest {
                path: path.to_string(),
                ..outgoing
            },
            LegacyRoute::Rewrite(rewrite) => {
                let (path, payload) = rewrite(&request.payload);
                DispatchRequest {
                    path,
                    payload,
                    ..outgoing
                }
            }
        };
        tracing::debug!(cluster = cluster, from = %request.path, to = %fallback.path, "Retrying on legacy endpoint");
        self.send(identity, &target, &fallback).await
    }
}
