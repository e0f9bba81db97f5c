//! Tokens this node issued on `/remote/auth`.

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::sync::RwLock;

const TOKENS_FILE: &str = "tokens.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub username: String,
    pub token: String,
    pub creation_date: DateTime<Utc>,
}

/// Issued tokens, persisted next to the config store
pub struct TokenRegistry {
    path: Option<PathBuf>,
    tokens: RwLock<Vec<IssuedToken>>,
}

/// 32 random bytes, URL-safe base64
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare `password` against a hex SHA-256 digest
pub fn verify_password(password: &str, expected_sha256: &str) -> bool {
    let digest = format!("{:x}", Sha256::digest(password.as_bytes()));
    digest.eq_ignore_ascii_case(expected_sha256.trim())
}

impl TokenRegistry {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tokens: RwLock::new(vec![]),
        }
    }

    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        let path = data_dir.join(TOKENS_FILE);
        let tokens = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![],
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        Ok(Self {
            path: Some(path),
            tokens: RwLock::new(tokens),
        })
    }

    /// Create, store and return a new token for `username`
    pub async fn issue(&self, username: &str) -> Result<String> {
        let issued = IssuedToken {
            username: username.to_string(),
            token: generate_token(),
            creation_date: Utc::now(),
        };

        let mut tokens = self.tokens.write().await;
        let mut next = tokens.clone();
        next.push(issued.clone());
        if let Some(path) = &self.path {
            let tmp = path.with_extension("json.tmp");
            let text = serde_json::to_string_pretty(&next).context("Failed to serialize tokens")?;
            tokio::fs::write(&tmp, text)
                .await
                .with_context(|| format!("Failed to write {}", tmp.display()))?;
            tokio::fs::rename(&tmp, path)
                .await
                .with_context(|| format!("Failed to replace {}", path.display()))?;
        }
        *tokens = next;

        tracing::info!(user = %username, "Issued new token");
        Ok(issued.token)
    }

    /// Owner of `token`, if we issued it
    pub async fn lookup(&self, token: &str) -> Option<String> {
        self.tokens
            .read()
            .await
            .iter()
            .find(|t| t.token == token)
            .map(|t| t.username.clone())
    }
}
