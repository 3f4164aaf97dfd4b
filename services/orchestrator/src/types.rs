use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Deserialize)]
pub struct BackupRequest {
    pub host: String,
    pub username: String,
    pub password: String,
    pub base_url: String,
    #[serde(default)]
    pub ssh_port: Option<u16>,
}

impl BackupRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_host(&self.host)?;
        if self.username.trim().is_empty() {
            return Err("username is required".into());
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("base_url must start with http:// or https://".into());
        }
        Ok(())
    }

    pub fn into_connection(self, default_ssh_port: u16) -> DeviceConnection {
        DeviceConnection {
            host: self.host.trim().to_string(),
            username: self.username,
            password: self.password,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            ssh_port: self.ssh_port.unwrap_or(default_ssh_port),
        }
    }
}

/// Device addressed by the script status endpoint; only SSH is used.
#[derive(Clone, Deserialize)]
pub struct DeviceRequest {
    pub host: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub ssh_port: Option<u16>,
}

impl DeviceRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_host(&self.host)?;
        if self.username.trim().is_empty() {
            return Err("username is required".into());
        }
        Ok(())
    }

    pub fn into_connection(self, default_ssh_port: u16) -> DeviceConnection {
        DeviceConnection {
            host: self.host.trim().to_string(),
            username: self.username,
            password: self.password,
            base_url: String::new(),
            ssh_port: self.ssh_port.unwrap_or(default_ssh_port),
        }
    }
}

fn validate_host(host: &str) -> Result<(), String> {
    let host = host.trim();
    if host.is_empty() {
        return Err("host is required".into());
    }
    if host.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(format!("invalid host: {host}"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct DeviceConnection {
    pub host: String,
    pub username: String,
    pub password: String,
    pub base_url: String,
    pub ssh_port: u16,
}

impl fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("ssh_port", &self.ssh_port)
            .finish()
    }
}

#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(<redacted>)"),
            SshAuth::PrivateKey { path, .. } => write!(f, "PrivateKey({})", path.display()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

/// Registered by the trigger endpoint, consumed when its progress stream opens.
#[derive(Clone, Debug)]
pub struct BackupSession {
    pub id: Uuid,
    pub device: DeviceConnection,
    pub ssh: SshTarget,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupCreated {
    pub session_id: Uuid,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProgressQuery {
    #[serde(default)]
    pub regenerate: bool,
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
