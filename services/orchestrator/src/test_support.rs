//! In-memory collaborators for async tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use crate::appliance::BackupTrigger;
use crate::error::{BackupError, Result};
use crate::fetcher::RemoteFetcher;
use crate::orchestrator_job::BackupDeps;
use crate::types::{BackupSession, DeviceConnection, SshAuth, SshTarget};

pub enum FakeFetcher {
    Serving(Bytes),
    /// Serves the blob after a delay.
    Slow(Duration, Bytes),
    Missing,
    /// Never finishes; the flag flips once the pending call is dropped.
    Hanging(Arc<AtomicBool>),
    Command(String),
}

/// Sets its flag when dropped.
struct Released(Arc<AtomicBool>);

impl Drop for Released {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl FakeFetcher {
    pub fn serving(blob: Vec<u8>) -> Self {
        FakeFetcher::Serving(Bytes::from(blob))
    }

    pub fn missing() -> Self {
        FakeFetcher::Missing
    }

    pub fn slow(delay: Duration, blob: Vec<u8>) -> Self {
        FakeFetcher::Slow(delay, Bytes::from(blob))
    }

    pub fn hanging() -> Self {
        FakeFetcher::Hanging(Arc::new(AtomicBool::new(false)))
    }

    /// Whether a hanging call has been dropped by its caller.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        match self {
            FakeFetcher::Hanging(flag) => flag.clone(),
            _ => Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn command_output(out: &str) -> Self {
        FakeFetcher::Command(out.to_string())
    }
}

#[async_trait]
impl RemoteFetcher for FakeFetcher {
    async fn fetch_file(&self, _target: &SshTarget, remote_path: &str) -> Result<Bytes> {
        match self {
            FakeFetcher::Serving(blob) => Ok(blob.clone()),
            FakeFetcher::Slow(delay, blob) => {
                tokio::time::sleep(*delay).await;
                Ok(blob.clone())
            }
            FakeFetcher::Hanging(flag) => {
                let _released = Released(flag.clone());
                std::future::pending().await
            }
            _ => Err(BackupError::RemoteFileNotFound(remote_path.to_string())),
        }
    }

    async fn run_command(&self, _target: &SshTarget, _command: &str) -> Result<String> {
        match self {
            FakeFetcher::Command(out) => Ok(out.clone()),
            FakeFetcher::Hanging(_) => std::future::pending().await,
            _ => Err(BackupError::Connection("no such host".into())),
        }
    }
}

pub struct FakeTrigger {
    reject: bool,
    calls: AtomicUsize,
}

impl FakeTrigger {
    pub fn ok() -> Self {
        Self {
            reject: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackupTrigger for FakeTrigger {
    async fn regenerate(&self, _device: &DeviceConnection) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(BackupError::Authentication("appliance login: HTTP 401".into()));
        }
        Ok(())
    }
}

pub fn deps(fetcher: FakeFetcher, trigger: Arc<FakeTrigger>) -> Arc<BackupDeps> {
    Arc::new(BackupDeps {
        fetcher: Arc::new(fetcher),
        trigger,
        remote_path: "/data/unifi/data/backup/autobackup/autobackup.unf".to_string(),
        decode: unf::DecodeOptions::default(),
        network_timeout: Duration::from_secs(5),
        fetch_timeout: Duration::from_secs(5),
    })
}

pub fn device() -> DeviceConnection {
    DeviceConnection {
        host: "192.0.2.10".into(),
        username: "admin".into(),
        password: "pw".into(),
        base_url: "https://192.0.2.10".into(),
        ssh_port: 22,
    }
}

pub fn session() -> BackupSession {
    let device = device();
    BackupSession {
        id: Uuid::new_v4(),
        ssh: SshTarget {
            host: device.host.clone(),
            port: device.ssh_port,
            username: device.username.clone(),
            auth: SshAuth::Password(device.password.clone()),
        },
        device,
        created_at: Utc::now(),
    }
}
