//! Config replication.
//!
//! Every config kind carries a version. A writer bumps it and offers the
//! new copy to all members of the local cluster; members accept strictly
//! newer copies only. A rejected push means a concurrent writer won, and
//! the writer reloads the canonical copy before its caller retries. A
//! periodic tick pulls the canonical copy of every kind from all members.

mod fetcher;
mod publisher;
mod store;
mod wire;

pub use fetcher::ConfigFetcher;
pub use publisher::{ConfigPublisher, NodePushStatus};
pub use store::{ConfigKind, ConfigStore, VersionedConfig};
pub use wire::{
    GetConfigsQuery, GetConfigsResponse, SetConfigsRequest, SetConfigsResponse, serve_get_configs,
    serve_set_configs,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use corral_common::constants::CONFIG_PUSH_ATTEMPTS;
use corral_common::{CorralError, KnownHost};

use crate::cluster::{ClusterRegistry, KnownHostsFile};
use crate::dispatch::Dispatcher;

/// Process-wide replication switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl SyncOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Shared [`SyncOptions`]; the tick reads them once per run
pub struct SyncControl {
    options: RwLock<SyncOptions>,
}

impl SyncControl {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options: RwLock::new(options),
        }
    }

    pub async fn options(&self) -> SyncOptions {
        *self.options.read().await
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.options.write().await.enabled = enabled;
        tracing::info!(enabled, "Config sync toggled");
    }

    pub async fn set_interval(&self, interval_secs: u64) {
        self.options.write().await.interval_secs = interval_secs;
        tracing::info!(interval_secs, "Config sync interval changed");
    }
}

/// Outcome of a versioned push
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    /// False when some member already held a newer copy
    pub pushed: bool,
    pub responses: BTreeMap<String, NodePushStatus>,
}

/// Returned when a push still conflicts after every retry
pub const CONFLICT_MESSAGE: &str = "Configuration conflict detected.\n\nSome nodes had a newer configuration \
     than the local node. Local node's configuration was updated. Please repeat the last action if \
     appropriate.";

fn storage_error(e: anyhow::Error) -> CorralError {
    CorralError::Storage(format!("{e:#}"))
}

/// Pull canonical copies and overwrite stale local ones.
///
/// A no-op while sync is disabled or the node is not in a cluster. Returns
/// the delay before the next tick.
pub async fn run_tick(control: &SyncControl, dispatcher: &Dispatcher) -> Duration {
    let options = control.options().await;
    tracing::debug!("Config files sync started");

    let membership = dispatcher.directory().membership().await;
    if options.enabled && membership.is_clustered() {
        if let Some(cluster_name) = &membership.cluster_name {
            let fetcher = ConfigFetcher::new(dispatcher, membership.nodes.clone(), cluster_name.clone());
            if let Err(e) = save_fetched(dispatcher, &fetcher, &ConfigKind::ALL).await {
                tracing::warn!(error = %e, "Config files sync failed");
            }
        }
    }

    tracing::debug!("Config files sync finished");
    options.interval()
}

async fn save_fetched(
    dispatcher: &Dispatcher,
    fetcher: &ConfigFetcher<'_>,
    kinds: &[ConfigKind],
) -> Result<(), CorralError> {
    let store = dispatcher.directory().store();
    for (kind, config) in fetcher.fetch(kinds).await {
        tracing::info!(kind = %kind, version = config.version, "Saving newer config fetched from cluster");
        store.save(kind, config).await.map_err(storage_error)?;
    }
    Ok(())
}

/// Runs [`run_tick`] until shutdown; ticks never overlap
pub async fn sync_scheduler(
    control: Arc<SyncControl>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tracing::info!("🔄 Config sync scheduler started");

    loop {
        let interval = run_tick(&control, &dispatcher).await;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.recv() => {
                tracing::info!("🔄 Config sync scheduler shutting down...");
                break;
            }
        }
    }
}

/// Bump the version of `kind` and offer `content` to every member.
///
/// Without a cluster the copy is only saved locally. On rejection the local
/// copy is replaced with the canonical one so a retry starts from it.
pub async fn save_sync_new_version(
    dispatcher: &Dispatcher,
    kind: ConfigKind,
    content: String,
    nodes: &[String],
    cluster_name: Option<&str>,
) -> Result<PushReport, CorralError> {
    let store = dispatcher.directory().store();
    let current = store.get(kind).await;
    let config = VersionedConfig::new(current.version + 1, content);

    let cluster_name = match cluster_name.filter(|name| !name.is_empty()) {
        Some(name) if !nodes.is_empty() => name,
        _ => {
            store.save(kind, config).await.map_err(storage_error)?;
            return Ok(PushReport {
                pushed: true,
                responses: BTreeMap::new(),
            });
        }
    };

    let publisher = ConfigPublisher::new(dispatcher, nodes.to_vec(), cluster_name);
    let responses = publisher
        .publish(kind, &config, false)
        .await
        .map_err(storage_error)?;
    let pushed = !responses.values().any(|s| *s == NodePushStatus::Rejected);

    if pushed {
        tracing::info!(kind = %kind, version = config.version, "Config pushed to cluster");
    } else {
        tracing::warn!(kind = %kind, version = config.version, "Config push rejected, reloading newest copy");
        let fetcher = ConfigFetcher::new(dispatcher, nodes.to_vec(), cluster_name);
        save_fetched(dispatcher, &fetcher, &[kind]).await?;
    }

    Ok(PushReport { pushed, responses })
}

/// Merge `add`/`remove` into the known hosts and push the result.
///
/// A rejected push is merged once more on top of the canonical copy; the
/// second outcome is final.
pub async fn save_sync_new_known_hosts(
    dispatcher: &Dispatcher,
    add: &[KnownHost],
    remove: &[String],
    nodes: &[String],
    cluster_name: Option<&str>,
) -> Result<PushReport, CorralError> {
    let mut report = PushReport::default();
    for attempt in 1..=CONFIG_PUSH_ATTEMPTS {
        let mut hosts: KnownHostsFile = dispatcher.directory().known_hosts().await?;
        hosts.apply(add, remove);
        report = save_sync_new_version(
            dispatcher,
            ConfigKind::KnownHosts,
            hosts.to_text(),
            nodes,
            cluster_name,
        )
        .await?;
        if report.pushed {
            break;
        }
        tracing::info!(attempt, "Known hosts push conflicted, merging into newest copy");
    }
    Ok(report)
}

/// Nodes and name of the local cluster, as used for pushes
pub async fn local_targets(dispatcher: &Dispatcher) -> (Vec<String>, Option<String>) {
    let membership = dispatcher.directory().membership().await;
    (membership.nodes, membership.cluster_name)
}

/// Edit the cluster registry and push it to the local cluster.
///
/// Every attempt re-reads the newest local registry before editing.
pub async fn update_registry<F>(dispatcher: &Dispatcher, mut edit: F) -> Result<PushReport, CorralError>
where
    F: FnMut(&mut ClusterRegistry) -> Result<(), CorralError>,
{
    let (nodes, cluster_name) = local_targets(dispatcher).await;
    for attempt in 1..=CONFIG_PUSH_ATTEMPTS {
        let mut registry = dispatcher.directory().registry().await?;
        edit(&mut registry)?;
        let report = save_sync_new_version(
            dispatcher,
            ConfigKind::ClusterRegistry,
            registry.to_text(),
            &nodes,
            cluster_name.as_deref(),
        )
        .await?;
        if report.pushed {
            return Ok(report);
        }
        tracing::warn!(attempt, "Cluster registry push conflicted");
    }

    Err(CorralError::Conflict(CONFLICT_MESSAGE.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{LocalMembership, NodeDirectory};
    use crate::dispatch::{Method, RemoteCall, Transport};
    use async_trait::async_trait;
    use corral_common::{Cluster, Destination};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    const CLUSTER: &str = "alpha";

    /// Serves get_configs/set_configs straight from each node's store
    struct ClusterSim {
        stores: HashMap<String, Arc<ConfigStore>>,
        down: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl Transport for ClusterSim {
        async fn call(&self, call: &RemoteCall, _timeout: Duration) -> Result<(u16, String), CorralError> {
            tokio::task::yield_now().await;
            let node = &call.dest.addr;
            if self.down.lock().unwrap().contains(node) {
                return Err(CorralError::Transport(format!("{node} down")));
            }
            let store = &self.stores[node];
            let body = match (call.method, call.path.as_str()) {
                (Method::Get, "get_configs") => {
                    let query: GetConfigsQuery = serde_json::from_value(call.payload.clone()).unwrap();
                    serde_json::to_string(&serve_get_configs(store, Some(CLUSTER), &query).await).unwrap()
                }
                (Method::Post, "set_configs") => {
                    let request: SetConfigsRequest = serde_json::from_value(call.payload.clone()).unwrap();
                    let response = serve_set_configs(store, Some(CLUSTER), request).await.unwrap();
                    serde_json::to_string(&response).unwrap()
                }
                _ => return Ok((404, String::new())),
            };
            Ok((200, body))
        }
    }

    struct Harness {
        sim: Arc<ClusterSim>,
        dispatchers: HashMap<String, Dispatcher>,
        nodes: Vec<String>,
    }

    impl Harness {
        async fn new(names: &[&str]) -> Self {
            let nodes: Vec<String> = names.iter().map(|n| n.to_string()).collect();
            let hosts: Vec<KnownHost> = names
                .iter()
                .map(|n| KnownHost::new(*n, format!("tok-{n}"), vec![Destination::new(*n, 2224)]))
                .collect();
            let mut file = KnownHostsFile::default();
            file.apply(&hosts, &[]);

            let mut stores = HashMap::new();
            for name in names {
                let store = Arc::new(ConfigStore::in_memory());
                store
                    .save(ConfigKind::KnownHosts, VersionedConfig::new(1, file.to_text()))
                    .await
                    .unwrap();
                store
                    .save(
                        ConfigKind::ClusterRegistry,
                        VersionedConfig::new(1, ClusterRegistry::default().to_text()),
                    )
                    .await
                    .unwrap();
                stores.insert(name.to_string(), store);
            }

            let sim = Arc::new(ClusterSim {
                stores: stores.clone(),
                down: Mutex::new(HashSet::new()),
            });
            let dispatchers = names
                .iter()
                .map(|name| {
                    let membership = LocalMembership::new(Some(CLUSTER.into()), nodes.clone());
                    let dir = Arc::new(NodeDirectory::new(*name, stores[*name].clone(), membership));
                    let transport: Arc<dyn Transport> = sim.clone();
                    (name.to_string(), Dispatcher::new(dir, transport, Duration::from_secs(5)))
                })
                .collect();

            Self { sim, dispatchers, nodes }
        }

        fn store(&self, node: &str) -> &Arc<ConfigStore> {
            &self.sim.stores[node]
        }

        async fn registry_of(&self, node: &str) -> VersionedConfig {
            self.store(node).get(ConfigKind::ClusterRegistry).await
        }
    }

    fn registry_with(cluster: &str) -> String {
        let mut registry = ClusterRegistry::default();
        registry.add_cluster(Cluster::new(cluster, vec![format!("{cluster}-1")])).unwrap();
        registry.to_text()
    }

    #[tokio::test]
    async fn test_push_converges_all_members() {
        let h = Harness::new(&["a", "b", "c"]).await;

        let report = save_sync_new_version(
            &h.dispatchers["a"],
            ConfigKind::ClusterRegistry,
            registry_with("web"),
            &h.nodes,
            Some(CLUSTER),
        )
        .await
        .unwrap();

        assert!(report.pushed);
        assert_eq!(report.responses.len(), 3);
        for node in ["a", "b", "c"] {
            let copy = h.registry_of(node).await;
            assert_eq!(copy.version, 2);
            assert_eq!(copy.content, registry_with("web"));
        }
    }

    #[tokio::test]
    async fn test_stale_writer_is_rejected_and_reloads() {
        let h = Harness::new(&["a", "b"]).await;
        // b already moved to version 2 without telling a
        h.store("b")
            .save(ConfigKind::ClusterRegistry, VersionedConfig::new(2, registry_with("db")))
            .await
            .unwrap();

        let report = save_sync_new_version(
            &h.dispatchers["a"],
            ConfigKind::ClusterRegistry,
            registry_with("web"),
            &h.nodes,
            Some(CLUSTER),
        )
        .await
        .unwrap();

        assert!(!report.pushed);
        assert_eq!(report.responses["b"], NodePushStatus::Rejected);
        assert!(!report.responses.contains_key("a"));
        assert_eq!(h.registry_of("a").await, h.registry_of("b").await);
    }

    #[tokio::test]
    async fn test_racing_pushes_have_at_most_one_winner() {
        let h = Harness::new(&["a", "b", "c"]).await;

        let (ra, rb) = tokio::join!(
            save_sync_new_version(
                &h.dispatchers["a"],
                ConfigKind::ClusterRegistry,
                registry_with("from-a"),
                &h.nodes,
                Some(CLUSTER),
            ),
            save_sync_new_version(
                &h.dispatchers["b"],
                ConfigKind::ClusterRegistry,
                registry_with("from-b"),
                &h.nodes,
                Some(CLUSTER),
            ),
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert!(!(ra.pushed && rb.pushed));

        if ra.pushed {
            assert_eq!(h.registry_of("b").await.content, registry_with("from-a"));
        }
        if rb.pushed {
            assert_eq!(h.registry_of("a").await.content, registry_with("from-b"));
        }

        // one more tick everywhere settles any split
        let control = SyncControl::new(SyncOptions { enabled: true, interval_secs: 60 });
        for node in ["a", "b", "c"] {
            run_tick(&control, &h.dispatchers[node]).await;
        }
        let a = h.registry_of("a").await;
        assert_eq!(h.registry_of("b").await, a);
        assert_eq!(h.registry_of("c").await, a);
    }

    #[tokio::test]
    async fn test_standalone_push_saves_locally() {
        let h = Harness::new(&["a"]).await;
        let report = save_sync_new_version(
            &h.dispatchers["a"],
            ConfigKind::ClusterRegistry,
            registry_with("solo"),
            &[],
            None,
        )
        .await
        .unwrap();
        assert!(report.pushed);
        assert!(report.responses.is_empty());
        assert_eq!(h.registry_of("a").await.version, 2);
    }

    #[tokio::test]
    async fn test_tick_pulls_newer_copy() {
        let h = Harness::new(&["a", "b", "c"]).await;
        h.store("c")
            .save(ConfigKind::ClusterRegistry, VersionedConfig::new(9, registry_with("new")))
            .await
            .unwrap();
        h.sim.down.lock().unwrap().insert("b".to_string());

        let control = SyncControl::new(SyncOptions { enabled: true, interval_secs: 42 });
        let next = run_tick(&control, &h.dispatchers["a"]).await;

        assert_eq!(next, Duration::from_secs(42));
        assert_eq!(h.registry_of("a").await.version, 9);
    }

    #[tokio::test]
    async fn test_tick_disabled_is_noop() {
        let h = Harness::new(&["a", "b"]).await;
        h.store("b")
            .save(ConfigKind::ClusterRegistry, VersionedConfig::new(9, registry_with("new")))
            .await
            .unwrap();

        let control = SyncControl::new(SyncOptions { enabled: false, interval_secs: 60 });
        run_tick(&control, &h.dispatchers["a"]).await;
        assert_eq!(h.registry_of("a").await.version, 1);
    }

    #[tokio::test]
    async fn test_known_hosts_merge_after_conflict() {
        let h = Harness::new(&["a", "b"]).await;

        // b learned about "x" at version 2 behind a's back
        let mut on_b = h.dispatchers["b"].directory().known_hosts().await.unwrap();
        on_b.apply(&[KnownHost::new("x", "tok-x", vec![])], &[]);
        h.store("b")
            .save(ConfigKind::KnownHosts, VersionedConfig::new(2, on_b.to_text()))
            .await
            .unwrap();

        let added = KnownHost::new("y", "tok-y", vec![Destination::new("10.0.0.9", 2224)]);
        let report = save_sync_new_known_hosts(
            &h.dispatchers["a"],
            &[added],
            &["a".to_string()],
            &h.nodes,
            Some(CLUSTER),
        )
        .await
        .unwrap();

        assert!(report.pushed);
        for node in ["a", "b"] {
            let hosts = h.dispatchers[node].directory().known_hosts().await.unwrap();
            assert!(hosts.get("x").is_some());
            assert_eq!(hosts.get("y").unwrap().token, "tok-y");
            assert!(hosts.get("a").is_none());
        }
    }

    #[tokio::test]
    async fn test_update_registry_rejects_duplicate() {
        let h = Harness::new(&["a", "b"]).await;
        let add = |registry: &mut ClusterRegistry| {
            registry.add_cluster(Cluster::new("web", vec!["w1".into()]))
        };

        update_registry(&h.dispatchers["a"], add).await.unwrap();
        assert!(h.dispatchers["b"].directory().registry().await.unwrap().cluster("web").is_some());

        let err = update_registry(&h.dispatchers["a"], add).await.unwrap_err();
        assert!(matches!(err, CorralError::InvalidInput(_)));
    }
}
