use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tracing::info;
use uuid::Uuid;

use crate::orchestrator_job::{run_backup, ProgressEvent};
use crate::script_status::script_status;
use crate::state::SharedState;
use crate::types::{ApiError, BackupCreated, BackupRequest, BackupSession, ProgressQuery};

/// Events buffered between the run and a slow client.
const PROGRESS_BUFFER: usize = 16;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/backup", post(create_backup))
        .route("/api/backup/:id/progress", get(backup_progress))
        .route("/api/device/script/status", post(script_status))
        .with_state(state)
}

pub async fn create_backup(
    State(state): State<SharedState>,
    Json(req): Json<BackupRequest>,
) -> Result<(StatusCode, Json<BackupCreated>), (StatusCode, Json<ApiError>)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ApiError::new(e))))?;

    let device = req.into_connection(state.config.ssh_port);
    let session = BackupSession {
        id: Uuid::new_v4(),
        ssh: state.config.ssh_target(&device),
        device,
        created_at: Utc::now(),
    };
    let session_id = session.id;

    info!(session_id = %session_id, host = %session.device.host, "backup session created");
    state.insert_session(session).await;

    Ok((StatusCode::ACCEPTED, Json(BackupCreated { session_id })))
}

pub async fn backup_progress(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProgressQuery>,
) -> Result<
    Sse<impl Stream<Item = Result<Event, axum::Error>>>,
    (StatusCode, Json<ApiError>),
> {
    let session = state
        .take_session(id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, Json(ApiError::new("unknown backup session"))))?;

    info!(session_id = %id, regenerate = query.regenerate, "progress stream opened");

    let (tx, rx) = mpsc::channel::<ProgressEvent>(PROGRESS_BUFFER);
    tokio::spawn(run_backup(state.deps.clone(), session, query.regenerate, tx));

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use crate::test_support::{deps, FakeFetcher, FakeTrigger};
    use serde_json::{json, Value as JsonValue};
    use std::sync::Arc;
    use unf::fixture::BackupFixture;

    async fn serve(fetcher: FakeFetcher) -> (String, SharedState) {
        let state = Arc::new(AppState::new(
            AppConfig::default(),
            deps(fetcher, Arc::new(FakeTrigger::ok())),
        ));
        let app = router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), state)
    }

    fn body() -> JsonValue {
        json!({
            "host": "192.0.2.10",
            "username": "admin",
            "password": "pw",
            "base_url": "https://192.0.2.10",
        })
    }

    fn sse_events(text: &str) -> Vec<JsonValue> {
        text.lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(|d| serde_json::from_str(d.trim()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_create_then_stream_to_completion() {
        let blob = BackupFixture::with_hostname("myhost.local").build();
        let (base, state) = serve(FakeFetcher::serving(blob)).await;
        let http = reqwest::Client::new();

        let resp = http.post(format!("{base}/api/backup")).json(&body()).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
        let created: BackupCreated = resp.json().await.unwrap();

        let resp = http
            .get(format!("{base}/api/backup/{}/progress?regenerate=false", created.session_id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let events = sse_events(&resp.text().await.unwrap());
        let last = events.last().unwrap();
        assert_eq!(last["status"], "complete");
        assert_eq!(last["data"]["Hostname"], "myhost.local");
        assert!(events[..events.len() - 1].iter().all(|e| e["status"] == "progress"));

        // the session was consumed by the stream
        assert_eq!(state.pending_sessions().await, 0);
        let again = http
            .get(format!("{base}/api/backup/{}/progress", created.session_id))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_error_event_on_failed_fetch() {
        let (base, _) = serve(FakeFetcher::missing()).await;
        let http = reqwest::Client::new();

        let created: BackupCreated = http
            .post(format!("{base}/api/backup"))
            .json(&body())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let text = http
            .get(format!("{base}/api/backup/{}/progress", created.session_id))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        let last = sse_events(&text).pop().unwrap();
        assert_eq!(last["status"], "error");
        assert!(last["message"].as_str().unwrap().starts_with("Fetching failed:"));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let (base, state) = serve(FakeFetcher::missing()).await;

        let mut bad = body();
        bad["base_url"] = json!("not-a-url");
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/backup"))
            .json(&bad)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(state.pending_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let (base, _) = serve(FakeFetcher::missing()).await;

        let resp = reqwest::get(format!("{base}/api/backup/{}/progress", Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_script_status_endpoint() {
        let (base, _) = serve(FakeFetcher::command_output(
            "Active: active (running) since Tue 2024-05-07 10:00:00 UTC\nTasks: 3\nMemory: 2.1M\n",
        ))
        .await;

        let status: JsonValue = reqwest::Client::new()
            .post(format!("{base}/api/device/script/status"))
            .json(&json!({ "host": "192.0.2.10", "username": "admin", "password": "pw" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(
            status,
            json!({ "status": true, "date_changed": "2024-05-07 10:00:00", "memory": 2, "tasks": 3 })
        );
    }

    #[tokio::test]
    async fn test_script_status_unreachable_device() {
        let (base, _) = serve(FakeFetcher::missing()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/device/script/status"))
            .json(&json!({ "host": "192.0.2.10", "username": "admin", "password": "pw" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
    }
}
