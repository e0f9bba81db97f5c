//! Wire transport for inter-node calls.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use corral_common::constants::cookies;
use corral_common::{AuthIdentity, CorralError, Destination};

use crate::config::DispatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One fully resolved call to a remote daemon
#[derive(Debug, Clone)]
pub struct RemoteCall {
    pub dest: Destination,
    /// Token issued by the target; absent only for `/auth`
    pub token: Option<String>,
    pub identity: AuthIdentity,
    /// Endpoint relative to `/remote/`
    pub path: String,
    pub method: Method,
    /// JSON object; sent as body for POST, as query for GET
    pub payload: Value,
}

impl RemoteCall {
    /// Cookie header carrying the token and the effective identity
    pub fn cookie_header(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(token) = &self.token {
            parts.push(format!("{}={}", cookies::TOKEN, token));
        }
        if !self.identity.username.is_empty() {
            parts.push(format!("{}={}", cookies::CIB_USER, self.identity.username));
            parts.push(format!(
                "{}={}",
                cookies::CIB_USER_GROUPS,
                STANDARD.encode(self.identity.usergroups.join(" "))
            ));
        }
        parts.join("; ")
    }

    /// Flatten the payload object into query pairs
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let Value::Object(map) = &self.payload else {
            return vec![];
        };
        map.iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect()
    }
}

/// Moves one call to a remote daemon and returns its raw status and body
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, call: &RemoteCall, timeout: Duration) -> Result<(u16, String), CorralError>;
}

/// HTTP(S) transport backed by a shared reqwest client
pub struct HttpTransport {
    client: Client,
    scheme: String,
}

impl HttpTransport {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            scheme: config.scheme.clone(),
        })
    }

    fn url(&self, dest: &Destination, path: &str) -> String {
        let host = if dest.addr.contains(':') && !dest.addr.starts_with('[') {
            format!("[{}]", dest.addr)
        } else {
            dest.addr.clone()
        };
        format!(
            "{}://{}:{}/remote/{}",
            self.scheme,
            host,
            dest.port,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, call: &RemoteCall, timeout: Duration) -> Result<(u16, String), CorralError> {
        let url = self.url(&call.dest, &call.path);
        let builder = match call.method {
            Method::Get => self.client.get(&url).query(&call.query_pairs()),
            Method::Post => self.client.post(&url).json(&call.payload),
        };

        let response = builder
            .header(reqwest::header::COOKIE, call.cookie_header())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| CorralError::Transport(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CorralError::Transport(format!("{url}: {e}")))?;

        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(payload: Value) -> RemoteCall {
        RemoteCall {
            dest: Destination::new("10.0.0.1", 2224),
            token: Some("abc".to_string()),
            identity: AuthIdentity::new("alice", vec!["haclient".into(), "wheel".into()]),
            path: "get_sw_versions".to_string(),
            method: Method::Get,
            payload,
        }
    }

    #[test]
    fn test_cookie_header() {
        let header = call(json!({})).cookie_header();
        assert_eq!(
            header,
            format!("token=abc; CIB_user=alice; CIB_user_groups={}", STANDARD.encode("haclient wheel"))
        );
    }

    #[test]
    fn test_query_pairs() {
        let mut pairs = call(json!({"with_ports": "1", "n": 3})).query_pairs();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("n".to_string(), "3".to_string()),
                ("with_ports".to_string(), "1".to_string())
            ]
        );
    }

    #[test]
    fn test_url_brackets_ipv6() {
        let transport = HttpTransport::new(&DispatchConfig::default()).unwrap();
        assert_eq!(
            transport.url(&Destination::new("fd00::1", 2224), "/auth"),
            "https://[fd00::1]:2224/remote/auth"
        );
        assert_eq!(
            transport.url(&Destination::new("node-a", 2225), "get_configs"),
            "https://node-a:2225/remote/get_configs"
        );
    }
}
