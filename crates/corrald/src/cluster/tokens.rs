//! Token propagation between nodes.
//!
//! Both directions try the batched endpoint first and fall back to the
//! legacy per-host endpoint only when the remote answers 404.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};

use corral_common::constants::{DEFAULT_PORT, SUPERUSER, endpoints};
use corral_common::{AuthIdentity, Destination, HostCredentials, KnownHost};

use crate::dispatch::{DispatchRequest, Dispatcher, NodeResponse, Target};

/// Result of pushing tokens to a remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    Success,
    Error,
    /// Neither endpoint exists on the remote
    NotSupported,
}

/// Body of the batched known-hosts endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnownHostsChange {
    #[serde(default)]
    pub known_hosts_add: BTreeMap<String, HostCredentials>,
    #[serde(default)]
    pub known_hosts_remove: Vec<String>,
}

impl KnownHostsChange {
    pub fn adding(hosts: &[KnownHost]) -> Self {
        Self {
            known_hosts_add: hosts
                .iter()
                .map(|h| (h.name.clone(), h.credentials()))
                .collect(),
            known_hosts_remove: vec![],
        }
    }

    pub fn added_hosts(&self) -> Vec<KnownHost> {
        self.known_hosts_add
            .iter()
            .map(|(name, creds)| KnownHost::from_credentials(name.clone(), creds.clone()))
            .collect()
    }
}

/// Flat `node:<key>` / `port:<key>` payload understood by old remotes.
///
/// Every host appears under its name and again under its primary address.
pub fn legacy_token_payload(hosts: &[KnownHost]) -> Value {
    let mut payload = Map::new();
    for host in hosts {
        let dest = host.first_dest();
        for key in [&host.name, &dest.addr] {
            payload.insert(format!("node:{key}"), json!(host.token));
            payload.insert(format!("port:{key}"), json!(dest.port.to_string()));
        }
    }
    Value::Object(payload)
}

/// Inverse of [`legacy_token_payload`]; missing or unreadable ports fall back to the default
pub fn parse_legacy_token_payload(payload: &Map<String, Value>) -> Vec<KnownHost> {
    payload
        .iter()
        .filter_map(|(key, token)| {
            let name = key.strip_prefix("node:")?;
            let token = token.as_str()?;
            let port = payload
                .get(&format!("port:{name}"))
                .and_then(port_value)
                .unwrap_or(DEFAULT_PORT);
            Some(KnownHost::new(name, token, vec![Destination::new(name, port)]))
        })
        .collect()
}

fn port_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn classify(response: &NodeResponse) -> Option<PushOutcome> {
    if response.is_success() {
        Some(PushOutcome::Success)
    } else if response.is_not_found() {
        None
    } else {
        Some(PushOutcome::Error)
    }
}

/// Push `hosts` to a node or to a cluster
pub async fn known_hosts_add(
    dispatcher: &Dispatcher,
    identity: &AuthIdentity,
    target: &Target,
    hosts: &[KnownHost],
) -> PushOutcome {
    let change = KnownHostsChange::adding(hosts);
    let payload = serde_json::to_value(&change).unwrap_or_else(|_| json!({}));
    let modern = DispatchRequest::post(endpoints::KNOWN_HOSTS_CHANGE, payload);
    let response = dispatcher.send(identity, target, &modern).await;
    if let Some(outcome) = classify(&response) {
        return outcome;
    }

    tracing::debug!(?target, "Remote lacks known_hosts_change, falling back to save_tokens");
    let legacy = DispatchRequest::post(endpoints::SAVE_TOKENS, legacy_token_payload(hosts));
    let response = dispatcher.send(identity, target, &legacy).await;
    classify(&response).unwrap_or_else(|| {
        tracing::warn!(?target, "Remote supports neither token push endpoint");
        PushOutcome::NotSupported
    })
}

fn parse_modern_hosts(body: &str) -> Result<Vec<KnownHost>, serde_json::Error> {
    let hosts: BTreeMap<String, HostCredentials> = serde_json::from_str(body)?;
    Ok(hosts
        .into_iter()
        .map(|(name, creds)| KnownHost::from_credentials(name, creds))
        .collect())
}

#[derive(Deserialize)]
struct LegacyTokens {
    tokens: HashMap<String, String>,
    ports: HashMap<String, Value>,
}

fn parse_legacy_hosts(body: &str) -> Result<Vec<KnownHost>, serde_json::Error> {
    let (tokens, ports) = match serde_json::from_str::<LegacyTokens>(body) {
        Ok(data) => (data.tokens, data.ports),
        Err(_) => (serde_json::from_str::<HashMap<String, String>>(body)?, HashMap::new()),
    };

    let mut hosts: Vec<KnownHost> = tokens
        .into_iter()
        .map(|(name, token)| {
            let port = ports.get(&name).and_then(port_value).unwrap_or(DEFAULT_PORT);
            let dest = Destination::new(name.clone(), port);
            KnownHost::new(name, token, vec![dest])
        })
        .collect();
    hosts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(hosts)
}

/// Pull the known hosts of `target_node`'s cluster.
///
/// Never fails: problems come back as warnings next to an empty list.
pub async fn get_cluster_known_hosts(
    dispatcher: &Dispatcher,
    cluster_name: &str,
    target_node: &str,
) -> (Vec<KnownHost>, Vec<String>) {
    let identity = AuthIdentity::superuser();
    let cannot_get = || {
        format!(
            "Unable to automatically authenticate against cluster nodes: \
             cannot get authentication info from cluster '{cluster_name}'"
        )
    };

    let modern = DispatchRequest::get(endpoints::GET_CLUSTER_KNOWN_HOSTS);
    let response = dispatcher.send_to_node(&identity, target_node, &modern).await;
    if response.is_success() {
        return match parse_modern_hosts(response.body()) {
            Ok(hosts) => (hosts, vec![]),
            Err(e) => {
                tracing::error!(node = target_node, error = %e, "Unable to parse get_cluster_known_hosts response");
                (vec![], vec![cannot_get()])
            }
        };
    }
    if !response.is_not_found() {
        return (vec![], vec![cannot_get()]);
    }

    let legacy = DispatchRequest::get(endpoints::GET_CLUSTER_TOKENS).with_payload(json!({"with_ports": "1"}));
    let response = dispatcher.send_to_node(&identity, target_node, &legacy).await;
    if response.is_success() {
        return match parse_legacy_hosts(response.body()) {
            Ok(hosts) => (hosts, vec![]),
            Err(e) => {
                tracing::error!(node = target_node, error = %e, "Unable to parse get_cluster_tokens response");
                (vec![], vec![cannot_get()])
            }
        };
    }
    if !response.is_not_found() {
        return (vec![], vec![cannot_get()]);
    }

    (
        vec![],
        vec![format!(
            "Unable to automatically authenticate against cluster nodes: \
             cluster '{cluster_name}' is running an old version of the daemon"
        )],
    )
}

/// Password and addresses for authenticating against one node
#[derive(Debug, Clone, Deserialize)]
pub struct NodeAuthRequest {
    #[serde(default)]
    pub dest_list: Vec<Destination>,
    pub password: String,
}

/// Obtain tokens from nodes by password.
///
/// Returns the new hosts and, per requested node, whether it failed.
pub async fn authenticate_nodes(
    dispatcher: &Dispatcher,
    nodes: &BTreeMap<String, NodeAuthRequest>,
) -> (Vec<KnownHost>, BTreeMap<String, bool>) {
    let identity = AuthIdentity::default();
    let calls = nodes.iter().map(|(name, request)| {
        let identity = &identity;
        async move {
            let dest = request
                .dest_list
                .first()
                .cloned()
                .unwrap_or_else(|| Destination::new(name.clone(), dispatcher.default_port()));
            let auth = DispatchRequest::post(
                endpoints::AUTH,
                json!({"username": SUPERUSER, "password": request.password}),
            );
            let response = dispatcher.send_to_dest(identity, &dest, None, &auth).await;
            let token = response.body().trim();
            let host = (response.is_success() && !token.is_empty()).then(|| {
                let dest_list = if request.dest_list.is_empty() {
                    vec![dest.clone()]
                } else {
                    request.dest_list.clone()
                };
                KnownHost::new(name.clone(), token, dest_list)
            });
            (name.clone(), host)
        }
    });

    let mut hosts = vec![];
    let mut failures = BTreeMap::new();
    for (name, host) in futures::future::join_all(calls).await {
        failures.insert(name, host.is_none());
        hosts.extend(host);
    }
    (hosts, failures)
}

/// Reachability and authentication state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthCheck {
    Online,
    Offline,
    #[serde(rename = "Unable to authenticate")]
    Unauthenticated,
}

/// Probe `check_auth` on every node concurrently
pub async fn check_auth_against_nodes(
    dispatcher: &Dispatcher,
    identity: &AuthIdentity,
    nodes: &[String],
) -> BTreeMap<String, AuthCheck> {
    let request = DispatchRequest::get(endpoints::CHECK_AUTH);
    dispatcher
        .fan_out(identity, nodes, &request)
        .await
        .into_iter()
        .map(|(node, response)| {
            let state = match response {
                NodeResponse::Reply { status, .. } if (200..300).contains(&status) => AuthCheck::Online,
                NodeResponse::Reply { status: 401, .. } | NodeResponse::NotAuthenticated => {
                    AuthCheck::Unauthenticated
                }
                _ => AuthCheck::Offline,
            };
            (node, state)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfgsync::{ConfigKind, ConfigStore, VersionedConfig};
    use crate::cluster::{KnownHostsFile, LocalMembership, NodeDirectory};
    use crate::dispatch::testing::FakeTransport;
    use std::sync::Arc;
    use std::time::Duration;

    async fn dispatcher(transport: Arc<FakeTransport>) -> Dispatcher {
        let store = Arc::new(ConfigStore::in_memory());
        let mut hosts = KnownHostsFile::default();
        hosts.apply(&[KnownHost::new("remote", "tok", vec![Destination::new("remote", 2224)])], &[]);
        store
            .save(ConfigKind::KnownHosts, VersionedConfig::new(1, hosts.to_text()))
            .await
            .unwrap();
        let dir = Arc::new(NodeDirectory::new("local", store, LocalMembership::default()));
        Dispatcher::new(dir, transport, Duration::from_secs(5))
    }

    fn pushed_hosts() -> Vec<KnownHost> {
        vec![
            KnownHost::new("n1", "t1", vec![Destination::new("10.0.0.1", 2224)]),
            KnownHost::new("n2", "t2", vec![Destination::new("10.0.0.2", 2225)]),
        ]
    }

    #[tokio::test]
    async fn test_push_falls_back_to_legacy() {
        let transport = FakeTransport::new();
        transport.on("remote", |call| match call.path.as_str() {
            "known_hosts_change" => Some((404, String::new())),
            "save_tokens" => Some((200, call.payload.to_string())),
            _ => None,
        });
        let d = dispatcher(transport.clone()).await;

        let outcome = known_hosts_add(&d, &AuthIdentity::superuser(), &Target::Node("remote".into()), &pushed_hosts()).await;
        assert_eq!(outcome, PushOutcome::Success);

        let calls = transport.calls.lock().unwrap();
        let legacy = &calls[1].payload;
        let map = legacy.as_object().unwrap();
        // two hosts, each keyed by name and by address, token + port each
        assert_eq!(map.len(), 8);
        assert_eq!(legacy["node:n1"], "t1");
        assert_eq!(legacy["node:10.0.0.1"], "t1");
        assert_eq!(legacy["port:10.0.0.2"], "2225");
    }

    #[test]
    fn test_legacy_payload_host_named_by_address() {
        let hosts = [KnownHost::new("10.0.0.5", "t5", vec![Destination::new("10.0.0.5", 2224)])];
        let payload = legacy_token_payload(&hosts);
        let map = payload.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(payload["node:10.0.0.5"], "t5");
        assert_eq!(payload["port:10.0.0.5"], "2224");

        let parsed = parse_legacy_token_payload(map);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].token, "t5");
    }

    #[tokio::test]
    async fn test_push_not_supported_and_error() {
        let transport = FakeTransport::new();
        transport.on("remote", |_| Some((404, String::new())));
        let d = dispatcher(transport).await;
        let outcome = known_hosts_add(&d, &AuthIdentity::superuser(), &Target::Node("remote".into()), &pushed_hosts()).await;
        assert_eq!(outcome, PushOutcome::NotSupported);

        let transport = FakeTransport::new();
        transport.on("remote", |_| Some((500, String::new())));
        let d = dispatcher(transport.clone()).await;
        let outcome = known_hosts_add(&d, &AuthIdentity::superuser(), &Target::Node("remote".into()), &pushed_hosts()).await;
        assert_eq!(outcome, PushOutcome::Error);
        // a definitive error stops the chain
        assert_eq!(transport.paths_to("remote"), vec!["known_hosts_change"]);
    }

    #[tokio::test]
    async fn test_pull_modern() {
        let transport = FakeTransport::new();
        transport.on("remote", |_| {
            Some((200, r#"{"n1":{"token":"t1","dest_list":[{"addr":"10.0.0.1","port":2224}]}}"#.to_string()))
        });
        let d = dispatcher(transport).await;
        let (hosts, warnings) = get_cluster_known_hosts(&d, "alpha", "remote").await;
        assert!(warnings.is_empty());
        assert_eq!(hosts, vec![KnownHost::new("n1", "t1", vec![Destination::new("10.0.0.1", 2224)])]);
    }

    #[tokio::test]
    async fn test_pull_legacy_shapes() {
        let transport = FakeTransport::new();
        transport.on("remote", |call| match call.path.as_str() {
            "get_cluster_tokens" => {
                assert_eq!(call.payload["with_ports"], "1");
                Some((200, r#"{"tokens":{"n1":"t1","n2":"t2"},"ports":{"n1":"2225"}}"#.to_string()))
            }
            _ => Some((404, String::new())),
        });
        let d = dispatcher(transport).await;
        let (hosts, warnings) = get_cluster_known_hosts(&d, "alpha", "remote").await;
        assert!(warnings.is_empty());
        assert_eq!(hosts[0].first_dest(), Destination::new("n1", 2225));
        assert_eq!(hosts[1].first_dest(), Destination::new("n2", 2224));

        let transport = FakeTransport::new();
        transport.on("remote", |call| match call.path.as_str() {
            "get_cluster_tokens" => Some((200, r#"{"n1":"t1"}"#.to_string())),
            _ => Some((404, String::new())),
        });
        let d = dispatcher(transport).await;
        let (hosts, _) = get_cluster_known_hosts(&d, "alpha", "remote").await;
        assert_eq!(hosts, vec![KnownHost::new("n1", "t1", vec![Destination::new("n1", 2224)])]);
    }

    #[tokio::test]
    async fn test_pull_failures_become_warnings() {
        let transport = FakeTransport::new();
        transport.on("remote", |_| Some((200, "not json".to_string())));
        let d = dispatcher(transport).await;
        let (hosts, warnings) = get_cluster_known_hosts(&d, "alpha", "remote").await;
        assert!(hosts.is_empty());
        assert_eq!(warnings.len(), 1);

        let transport = FakeTransport::new();
        transport.on("remote", |_| Some((404, String::new())));
        let d = dispatcher(transport).await;
        let (hosts, warnings) = get_cluster_known_hosts(&d, "alpha", "remote").await;
        assert!(hosts.is_empty());
        assert!(warnings[0].contains("old version"));
    }

    #[test]
    fn test_legacy_payload_parse() {
        let payload = legacy_token_payload(&pushed_hosts());
        let mut hosts = parse_legacy_token_payload(payload.as_object().unwrap());
        hosts.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<_> = hosts.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["10.0.0.1", "10.0.0.2", "n1", "n2"]);
        assert_eq!(hosts[3].first_dest().port, 2225);
    }

    #[tokio::test]
    async fn test_authenticate_nodes() {
        let transport = FakeTransport::new();
        transport.on("10.0.0.1", |call| {
            assert!(call.token.is_none());
            (call.payload["password"] == "secret").then(|| (200, "fresh-token".to_string()))
        });
        transport.on("10.0.0.2", |_| Some((401, String::new())));
        let d = dispatcher(transport).await;

        let mut nodes = BTreeMap::new();
        nodes.insert(
            "n1".to_string(),
            NodeAuthRequest { dest_list: vec![Destination::new("10.0.0.1", 2224)], password: "secret".into() },
        );
        nodes.insert(
            "n2".to_string(),
            NodeAuthRequest { dest_list: vec![Destination::new("10.0.0.2", 2224)], password: "secret".into() },
        );

        let (hosts, failures) = authenticate_nodes(&d, &nodes).await;
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].token, "fresh-token");
        assert!(!failures["n1"]);
        assert!(failures["n2"]);
    }

    #[tokio::test]
    async fn test_check_auth_classification() {
        let transport = FakeTransport::new();
        transport.on("remote", |_| Some((200, "{}".to_string())));
        let d = dispatcher(transport).await;
        let nodes = vec!["remote".to_string(), "stranger".to_string()];
        let result = check_auth_against_nodes(&d, &AuthIdentity::superuser(), &nodes).await;
        assert_eq!(result["remote"], AuthCheck::Online);
        assert_eq!(result["stranger"], AuthCheck::Unauthenticated);
    }
}
