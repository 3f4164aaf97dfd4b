use axum::{extract::State, http::StatusCode, Json};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::BackupError;
use crate::state::SharedState;
use crate::types::{ApiError, DeviceRequest};

/// State of the on-device backup service as reported by `systemctl status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStatus {
    pub status: bool,
    pub date_changed: Option<String>,
    /// Whole units before the decimal point, -1 when not reported.
    pub memory: i64,
    /// 0 when not reported.
    pub tasks: i64,
}

pub async fn script_status(
    State(state): State<SharedState>,
    Json(req): Json<DeviceRequest>,
) -> Result<Json<ScriptStatus>, (StatusCode, Json<ApiError>)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ApiError::new(e))))?;

    let device = req.into_connection(state.config.ssh_port);
    let target = state.config.ssh_target(&device);
    let command = format!("systemctl status {}", state.config.script_service_name);
    let limit = state.config.network_timeout;

    let output = tokio::time::timeout(limit, state.deps.fetcher.run_command(&target, &command))
        .await
        .unwrap_or_else(|_| Err(BackupError::Timeout(limit)))
        .map_err(|e| {
            warn!(host = %device.host, error = %e, "script status failed");
            (e.status_code(), Json(ApiError::new(e.to_string())))
        })?;

    let status = parse_script_status(&output);
    info!(host = %device.host, running = status.status, "script status");
    Ok(Json(status))
}

pub fn parse_script_status(output: &str) -> ScriptStatus {
    ScriptStatus {
        status: output.contains("running"),
        date_changed: capture(r"\b(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\b", output),
        memory: capture(r"Memory:\s(\d+)\.", output)
            .and_then(|m| m.parse().ok())
            .unwrap_or(-1),
        tasks: capture(r"Tasks:\s(\d+)", output)
            .and_then(|t| t.parse().ok())
            .unwrap_or(0),
    }
}

fn capture(pattern: &str, haystack: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
