//! Fetch side of config replication.

use std::collections::{BTreeMap, HashMap};

use corral_common::AuthIdentity;
use corral_common::constants::endpoints;

use super::store::{ConfigKind, VersionedConfig};
use super::wire::{GetConfigsQuery, GetConfigsResponse, STATUS_OK};
use crate::dispatch::{DispatchRequest, Dispatcher};

/// Canonical copy among `copies`.
///
/// Highest version wins. Among copies sharing it, the content held most
/// often wins, then the smallest content digest.
pub fn select_newest(copies: &[VersionedConfig]) -> Option<VersionedConfig> {
    let top = copies.iter().map(|c| c.version).max()?;

    let mut tally: BTreeMap<String, (usize, &VersionedConfig)> = BTreeMap::new();
    for copy in copies.iter().filter(|c| c.version == top) {
        tally.entry(copy.digest()).or_insert((0, copy)).0 += 1;
    }

    // BTreeMap iterates digests in ascending order; max_by_key keeps the last max,
    // so walk it in reverse to keep the smallest digest on ties
    tally
        .into_iter()
        .rev()
        .max_by_key(|(_, (count, _))| *count)
        .map(|(_, (_, copy))| copy.clone())
}

/// Reads every kind from the members of one cluster
pub struct ConfigFetcher<'a> {
    dispatcher: &'a Dispatcher,
    nodes: Vec<String>,
    cluster_name: String,
}

impl<'a> ConfigFetcher<'a> {
    pub fn new(dispatcher: &'a Dispatcher, nodes: Vec<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            dispatcher,
            nodes,
            cluster_name: cluster_name.into(),
        }
    }

    /// Copies held by the other members, per kind
    async fn remote_copies(&self) -> HashMap<ConfigKind, Vec<VersionedConfig>> {
        let local = self.dispatcher.directory().local_node().to_string();
        let remotes: Vec<String> = self.nodes.iter().filter(|n| **n != local).cloned().collect();

        let payload = serde_json::to_value(GetConfigsQuery {
            cluster_name: self.cluster_name.clone(),
        })
        .unwrap_or_default();
        let request = DispatchRequest::get(endpoints::GET_CONFIGS).with_payload(payload);
        let responses = self
            .dispatcher
            .fan_out(&AuthIdentity::superuser(), &remotes, &request)
            .await;

        let mut copies: HashMap<ConfigKind, Vec<VersionedConfig>> = HashMap::new();
        for (node, response) in responses {
            let parsed: GetConfigsResponse = match response.json() {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(node = %node, error = %e, "Unable to fetch configs");
                    continue;
                }
            };
            if parsed.status != STATUS_OK {
                tracing::warn!(node = %node, status = %parsed.status, "Node refused config fetch");
                continue;
            }
            for (name, config) in parsed.configs {
                match ConfigKind::from_name(&name) {
                    Some(kind) => copies.entry(kind).or_default().push(config),
                    None => tracing::debug!(node = %node, kind = %name, "Ignoring unknown config kind"),
                }
            }
        }
        copies
    }

    /// Canonical copy of every kind whose local copy is not canonical
    pub async fn fetch(&self, kinds: &[ConfigKind]) -> Vec<(ConfigKind, VersionedConfig)> {
        let mut remote = self.remote_copies().await;
        let store = self.dispatcher.directory().store();

        let mut to_save = vec![];
        for &kind in kinds {
            let mut copies = remote.remove(&kind).unwrap_or_default();
            let local = store.get(kind).await;
            if store.is_present(kind).await {
                copies.push(local.clone());
            }
            if let Some(newest) = select_newest(&copies) {
                if !newest.same_as(&local) {
                    to_save.push((kind, newest));
                }
            }
        }
        to_save
    }
}
