//! `/run_pcs`: locally issued management commands.

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::RequestContext;
use crate::gate::GateOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunCommandRequest {
    /// JSON array of arguments, usually sent encoded as a string
    #[serde(default)]
    command: Value,
    #[serde(default)]
    stdin: Option<String>,
}

fn decode_command(command: &Value) -> Option<Vec<String>> {
    match command {
        Value::String(encoded) => serde_json::from_str(encoded).ok(),
        Value::Array(_) => serde_json::from_value(command.clone()).ok(),
        _ => None,
    }
}

fn status_only(status: &str) -> Response {
    Json(json!({"status": status, "data": {}})).into_response()
}

pub async fn run_command(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<RunCommandRequest>,
) -> Response {
    let Some(command) = decode_command(&request.command) else {
        return status_only("error");
    };

    match state.gate.run(&ctx.identity, &command, request.stdin.as_deref()).await {
        GateOutcome::Executed(output) => Json(json!({"status": "ok", "data": output})).into_response(),
        GateOutcome::BadCommand => status_only("bad_command"),
        GateOutcome::Denied(reason) => (StatusCode::FORBIDDEN, reason).into_response(),
        GateOutcome::Failed(_) => status_only("error"),
    }
}
