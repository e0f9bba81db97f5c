//! Application state and shared resources.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::auth::TokenRegistry;
use crate::cfgsync::{ConfigStore, SyncControl, SyncOptions};
use crate::cluster::{LocalMembership, NodeDirectory};
use crate::config::AppConfig;
use crate::dispatch::{Dispatcher, HttpTransport, Transport};
use crate::gate::{CommandGate, CommandRunner, ProcessRunner};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Known hosts, cluster registry and local membership
    pub directory: Arc<NodeDirectory>,

    /// Inter-node request dispatcher
    pub dispatcher: Arc<Dispatcher>,

    /// Replication switches
    pub sync: Arc<SyncControl>,

    /// Local command execution gate
    pub gate: Arc<CommandGate>,

    /// Tokens issued by this node
    pub tokens: Arc<TokenRegistry>,
}

impl AppState {
    /// Open persisted state under `data_dir` and build the production services
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store = ConfigStore::open(config.data_dir.clone())
            .await
            .context("Failed to open config store")?;
        let tokens = TokenRegistry::open(config.data_dir.clone())
            .await
            .context("Failed to open token registry")?;
        let transport = HttpTransport::new(&config.dispatch)?;
        let runner = ProcessRunner::new(config.commands.tool_path.clone());

        Ok(Self::from_parts(
            config,
            Arc::new(store),
            Arc::new(tokens),
            Arc::new(transport),
            Arc::new(runner),
        ))
    }

    /// Wire the services together from already built parts
    pub fn from_parts(
        config: AppConfig,
        store: Arc<ConfigStore>,
        tokens: Arc<TokenRegistry>,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let membership = LocalMembership::new(config.cluster.name.clone(), config.cluster.nodes.clone());
        let directory = Arc::new(NodeDirectory::new(config.node_name.clone(), store, membership));
        let dispatcher = Arc::new(Dispatcher::new(
            directory.clone(),
            transport,
            config.dispatch.request_timeout(),
        )
        .with_default_port(config.dispatch.default_port));
        let sync = Arc::new(SyncControl::new(SyncOptions {
            enabled: config.sync.enabled,
            interval_secs: config.sync.interval_secs,
        }));
        let gate = Arc::new(CommandGate::new(directory.clone(), runner));

        Self {
            config,
            directory,
            dispatcher,
            sync,
            gate,
            tokens,
        }
    }
}
