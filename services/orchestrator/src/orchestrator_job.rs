use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use unf::{Alert, DecodeOptions};

use crate::appliance::BackupTrigger;
use crate::error::{BackupError, Result};
use crate::fetcher::RemoteFetcher;
use crate::types::BackupSession;

/// Pipeline stages, in the only order they can occur.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Init,
    Authenticating,
    Fetching,
    Decrypting,
    Extracting,
    Decompressing,
    Decoding,
    Projecting,
    Complete,
    Error,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Progress,
    Complete,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
    pub status: ProgressStatus,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BackupResult>,
}

impl ProgressEvent {
    fn progress(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: ProgressStatus::Progress,
            stage,
            data: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ProgressStatus::Progress
    }
}

/// Field names are PascalCase on the wire; the browser client reads them that way.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupResult {
    pub hostname: String,
    pub alerts: Vec<Alert>,
    pub remaining_alerts: usize,
    pub timestamp: DateTime<Utc>,
    pub source_text: String,
    pub original_backup_file: OriginalBackupFile,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OriginalBackupFile {
    pub file_name: String,
    pub base64_content: String,
    /// blake3 of the encrypted bytes, hex.
    pub blake3: String,
}

/// Collaborators and settings shared by every run.
pub struct BackupDeps {
    pub fetcher: Arc<dyn RemoteFetcher>,
    pub trigger: Arc<dyn BackupTrigger>,
    pub remote_path: String,
    pub decode: DecodeOptions,
    /// Appliance HTTP calls.
    pub network_timeout: Duration,
    /// Whole SSH download. Hitting it drops the fetch, which cancels the transfer.
    pub fetch_timeout: Duration,
}

/// Drive one session to a single terminal event on `tx`. Returns early, without
/// a terminal event, once the receiving side is gone.
pub async fn run_backup(
    deps: Arc<BackupDeps>,
    session: BackupSession,
    regenerate: bool,
    tx: mpsc::Sender<ProgressEvent>,
) {
    let span = info_span!("backup", session_id = %session.id, host = %session.device.host);

    async move {
        let mut reporter = Reporter::new(tx);

        let terminal = match execute(&deps, &session, regenerate, &mut reporter).await {
            Ok(result) => {
                info!(hostname = %result.hostname, alerts = result.alerts.len(), "backup complete");
                ProgressEvent {
                    message: "Backup processed".to_string(),
                    status: ProgressStatus::Complete,
                    stage: Stage::Complete,
                    data: Some(result),
                }
            }
            Err(BackupError::Cancelled) => {
                info!(stage = %reporter.stage, "client disconnected; run aborted");
                return;
            }
            Err(e) => {
                warn!(stage = %reporter.stage, error = %e, "backup failed");
                ProgressEvent {
                    message: format!("{} failed: {e}", reporter.stage),
                    status: ProgressStatus::Error,
                    stage: Stage::Error,
                    data: None,
                }
            }
        };

        debug_assert!(terminal.is_terminal());
        if reporter.tx.send(terminal).await.is_err() {
            debug!("receiver gone before terminal event");
        }
    }
    .instrument(span)
    .await
}

async fn execute(
    deps: &BackupDeps,
    session: &BackupSession,
    regenerate: bool,
    reporter: &mut Reporter,
) -> Result<BackupResult> {
    let timeout = deps.network_timeout;

    reporter.enter(Stage::Init, "Starting backup").await?;

    if regenerate {
        reporter
            .enter(Stage::Authenticating, "Requesting a fresh backup from the appliance")
            .await?;
        reporter
            .guard(network(timeout, deps.trigger.regenerate(&session.device)))
            .await?;
    } else {
        reporter.note("Using the existing backup on the device").await?;
    }

    reporter
        .enter(Stage::Fetching, format!("Downloading {}", deps.remote_path))
        .await?;
    let blob = reporter
        .guard(network(
            deps.fetch_timeout,
            deps.fetcher.fetch_file(&session.ssh, &deps.remote_path),
        ))
        .await?;
    info!(bytes = blob.len(), "backup downloaded");

    reporter.enter(Stage::Decrypting, "Decrypting backup").await?;
    let key = deps.decode.key;
    let encrypted = blob.clone();
    let archive = reporter.guard(cpu(move || unf::decrypt(&encrypted, &key))).await?;

    reporter.enter(Stage::Extracting, "Extracting database").await?;
    let entry_name = deps.decode.entry_name.clone();
    let entry = reporter
        .guard(cpu(move || unf::extract_entry(&archive, &entry_name)))
        .await?;

    reporter.enter(Stage::Decompressing, "Decompressing database").await?;
    let raw = reporter.guard(cpu(move || unf::gunzip(&entry))).await?;

    reporter.enter(Stage::Decoding, "Decoding documents").await?;
    let mode = deps.decode.mode;
    let groups = reporter
        .guard(cpu(move || {
            let documents = unf::decode_documents(&raw, mode)?;
            Ok(unf::group_documents(documents))
        }))
        .await?;
    debug!(documents = groups.total_documents(), buckets = groups.len(), "documents grouped");

    reporter.enter(Stage::Projecting, "Building report").await?;
    let (source_text, hostname, alerts) = reporter
        .guard(cpu(move || {
            let text = unf::project_text(&groups);
            let hostname = unf::extract_hostname(&text);
            let alerts = unf::extract_alerts(&text);
            Ok((text, hostname, alerts))
        }))
        .await?;

    let timestamp = Utc::now();
    Ok(BackupResult {
        original_backup_file: OriginalBackupFile {
            file_name: backup_file_name(&hostname, timestamp),
            base64_content: general_purpose::STANDARD.encode(&blob),
            blake3: hex::encode(blake3::hash(&blob).as_bytes()),
        },
        hostname,
        alerts: alerts.alerts,
        remaining_alerts: alerts.remaining,
        timestamp,
        source_text,
    })
}

pub fn backup_file_name(hostname: &str, at: DateTime<Utc>) -> String {
    let safe: String = hostname
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    format!("{safe}_{}.unf", at.format("%Y%m%d-%H%M%S"))
}

/// Owns the sending half and the current stage.
struct Reporter {
    tx: mpsc::Sender<ProgressEvent>,
    stage: Stage,
}

impl Reporter {
    fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            tx,
            stage: Stage::Init,
        }
    }

    async fn enter(&mut self, stage: Stage, message: impl Into<String>) -> Result<()> {
        debug_assert!(stage >= self.stage);
        self.stage = stage;
        debug!(%stage, "stage entered");
        self.send(ProgressEvent::progress(stage, message)).await
    }

    /// Progress message without a stage change.
    async fn note(&mut self, message: impl Into<String>) -> Result<()> {
        self.send(ProgressEvent::progress(self.stage, message)).await
    }

    async fn send(&self, event: ProgressEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| BackupError::Cancelled)
    }

    /// Run `work` unless the receiver goes away first.
    async fn guard<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let stage_span = info_span!("stage", stage = %self.stage);
        tokio::select! {
            out = work.instrument(stage_span) => out,
            _ = self.tx.closed() => Err(BackupError::Cancelled),
        }
    }
}

async fn network<T>(limit: Duration, work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| BackupError::Timeout(limit))?
}

/// Run a pipeline stage on the blocking pool, inside the caller's span.
async fn cpu<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> unf::Result<T> + Send + 'static,
{
    let span = Span::current();
    let out = tokio::task::spawn_blocking(move || span.in_scope(work)).await?;
    Ok(out?)
}
