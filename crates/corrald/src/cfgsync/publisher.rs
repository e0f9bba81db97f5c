//! Push side of config replication.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

use corral_common::AuthIdentity;
use corral_common::constants::endpoints;

use super::store::{AcceptOutcome, ConfigKind, VersionedConfig};
use super::wire::{STATUS_OK, SetConfigsRequest, SetConfigsResponse};
use crate::dispatch::{DispatchRequest, Dispatcher};

/// What one member said about a pushed copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePushStatus {
    Accepted,
    Rejected,
    NotSupported,
    /// No answer, or an answer we could not read
    Failed,
}

impl From<AcceptOutcome> for NodePushStatus {
    fn from(outcome: AcceptOutcome) -> Self {
        match outcome {
            AcceptOutcome::Accepted => Self::Accepted,
            AcceptOutcome::Rejected => Self::Rejected,
            AcceptOutcome::NotSupported => Self::NotSupported,
        }
    }
}

/// Writes one copy of a kind to every member, the local node last
pub struct ConfigPublisher<'a> {
    dispatcher: &'a Dispatcher,
    nodes: Vec<String>,
    cluster_name: String,
}

impl<'a> ConfigPublisher<'a> {
    pub fn new(dispatcher: &'a Dispatcher, nodes: Vec<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            dispatcher,
            nodes,
            cluster_name: cluster_name.into(),
        }
    }

    /// Offer `config` to every member.
    ///
    /// Remote members are offered the copy first. The local store only takes
    /// it when no remote rejected it.
    pub async fn publish(
        &self,
        kind: ConfigKind,
        config: &VersionedConfig,
        force: bool,
    ) -> Result<BTreeMap<String, NodePushStatus>> {
        let local = self.dispatcher.directory().local_node().to_string();
        let remotes: Vec<String> = self.nodes.iter().filter(|n| **n != local).cloned().collect();

        let request = SetConfigsRequest {
            cluster_name: self.cluster_name.clone(),
            force,
            configs: BTreeMap::from([(kind.name().to_string(), config.clone())]),
        };
        let payload = serde_json::to_value(&request)?;
        let replies = self
            .dispatcher
            .fan_out(
                &AuthIdentity::superuser(),
                &remotes,
                &DispatchRequest::post(endpoints::SET_CONFIGS, payload),
            )
            .await;

        let mut responses = BTreeMap::new();
        for (node, reply) in replies {
            let status = match reply.json::<SetConfigsResponse>() {
                Ok(parsed) if parsed.status == STATUS_OK => parsed
                    .result
                    .get(kind.name())
                    .copied()
                    .map(NodePushStatus::from)
                    .unwrap_or(NodePushStatus::Failed),
                Ok(parsed) => {
                    tracing::warn!(node = %node, status = %parsed.status, "Node refused config push");
                    NodePushStatus::Failed
                }
                Err(e) => {
                    tracing::warn!(node = %node, error = %e, "Config push failed");
                    NodePushStatus::Failed
                }
            };
            responses.insert(node, status);
        }

        let rejected = responses.values().any(|s| *s == NodePushStatus::Rejected);
        if self.nodes.contains(&local) && !rejected {
            let store = self.dispatcher.directory().store();
            let outcome = store.offer(kind, config.clone(), force).await?;
            if outcome == AcceptOutcome::Rejected {
                tracing::info!(kind = %kind, version = config.version, "Local store already holds a newer copy");
            }
            responses.insert(local, NodePushStatus::from(outcome));
        }

        Ok(responses)
    }
}
