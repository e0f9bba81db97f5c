//! Request authentication.
//!
//! Every protected request carries a `token` cookie naming a token this
//! node issued. The token owner becomes the request identity; a superuser
//! token may act for another user through the `CIB_user` cookies.

mod tokens;

pub use tokens::{TokenRegistry, verify_password};

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use std::collections::HashMap;

use corral_common::AuthIdentity;
use corral_common::constants::{SUPERUSER, cookies};

use crate::state::AppState;

/// Who is asking, and from which cluster's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub identity: AuthIdentity,
    /// Local cluster at the time of the request
    pub cluster_name: Option<String>,
}

/// All cookies of a request; later duplicates win
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Effective identity of a token owner
pub fn resolve_identity(owner: &str, jar: &HashMap<String, String>) -> AuthIdentity {
    if owner != SUPERUSER {
        return AuthIdentity::new(owner, vec![]);
    }
    match jar.get(cookies::CIB_USER).filter(|user| !user.is_empty()) {
        Some(user) => {
            let groups = jar
                .get(cookies::CIB_USER_GROUPS)
                .and_then(|encoded| STANDARD.decode(encoded).ok())
                .map(|raw| {
                    String::from_utf8_lossy(&raw)
                        .split_whitespace()
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            AuthIdentity::new(user.clone(), groups)
        }
        None => AuthIdentity::superuser(),
    }
}

/// Middleware rejecting requests without a valid token
pub async fn require_token(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let jar = parse_cookies(request.headers());
    let owner = match jar.get(cookies::TOKEN) {
        Some(token) => state.tokens.lookup(token).await,
        None => None,
    };
    let Some(owner) = owner else {
        tracing::debug!(path = %request.uri().path(), "Request without a valid token");
        return (StatusCode::UNAUTHORIZED, r#"{"notauthorized":"true"}"#).into_response();
    };

    let context = RequestContext {
        identity: resolve_identity(&owner, &jar),
        cluster_name: state.directory.local_cluster_name().await,
    };
    request.extensions_mut().insert(context);
    next.run(request).await
}
