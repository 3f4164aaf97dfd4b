use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use unf::{CipherKey, DecodeMode, DecodeOptions, DEFAULT_ENTRY_NAME};

use crate::types::{DeviceConnection, SshAuth, SshTarget};

pub const DEFAULT_REMOTE_PATH: &str = "/data/unifi/data/backup/autobackup/autobackup.unf";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub cors_origin: String,

    pub ssh_port: u16,
    pub ssh_username: Option<String>,
    pub ssh_private_key_path: Option<PathBuf>,
    pub ssh_private_key_passphrase: Option<String>,
    pub backup_remote_path: String,

    pub appliance_login_path: String,
    pub appliance_backup_path: String,
    pub appliance_accept_invalid_certs: bool,

    pub network_timeout: Duration,
    /// Whole SSH download, start to finish.
    pub fetch_timeout: Duration,
    pub pending_session_ttl: Duration,
    pub script_service_name: String,

    pub decode: DecodeOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            cors_origin: "http://localhost:5173".to_string(),
            ssh_port: 22,
            ssh_username: None,
            ssh_private_key_path: None,
            ssh_private_key_passphrase: None,
            backup_remote_path: DEFAULT_REMOTE_PATH.to_string(),
            appliance_login_path: "/api/auth/login".to_string(),
            appliance_backup_path: "/proxy/network/api/s/default/cmd/backup".to_string(),
            appliance_accept_invalid_certs: true,
            network_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(300),
            pending_session_ttl: Duration::from_secs(300),
            script_service_name: "unifibackup.service".to_string(),
            decode: DecodeOptions::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();

        let bind_addr = var_or("BIND_ADDR", &d.bind_addr);
        let cors_origin = var_or("CORS_ORIGIN", &d.cors_origin);

        let ssh_port = parse_var("SSH_PORT")?.unwrap_or(d.ssh_port);
        let ssh_username = optional("SSH_USERNAME");
        let ssh_private_key_path = optional("SSH_PRIVATE_KEY_PATH").map(PathBuf::from);
        let ssh_private_key_passphrase = optional("SSH_PRIVATE_KEY_PASSPHRASE");
        let backup_remote_path = var_or("BACKUP_REMOTE_PATH", &d.backup_remote_path);

        let appliance_login_path = var_or("APPLIANCE_LOGIN_PATH", &d.appliance_login_path);
        let appliance_backup_path = var_or("APPLIANCE_BACKUP_PATH", &d.appliance_backup_path);
        let appliance_accept_invalid_certs =
            flag("APPLIANCE_ACCEPT_INVALID_CERTS").unwrap_or(d.appliance_accept_invalid_certs);

        let network_timeout_secs: u64 =
            parse_var("NETWORK_TIMEOUT_SECS")?.unwrap_or(d.network_timeout.as_secs());
        let fetch_timeout_secs: u64 =
            parse_var("FETCH_TIMEOUT_SECS")?.unwrap_or(d.fetch_timeout.as_secs());
        let ttl_secs: u64 =
            parse_var("PENDING_SESSION_TTL_SECS")?.unwrap_or(d.pending_session_ttl.as_secs());
        let script_service_name = var_or("SCRIPT_SERVICE_NAME", &d.script_service_name);

        let key = match (optional("UNF_KEY_HEX"), optional("UNF_IV_HEX")) {
            (Some(k), Some(iv)) => CipherKey::from_hex(&k, &iv).context("Invalid UNF_KEY_HEX/UNF_IV_HEX")?,
            (None, None) => CipherKey::appliance_default(),
            _ => bail!("UNF_KEY_HEX and UNF_IV_HEX must be set together"),
        };
        let mode = if flag("DECODE_STRICT").unwrap_or(false) {
            DecodeMode::Strict
        } else {
            DecodeMode::Lenient
        };
        let decode = DecodeOptions {
            key,
            entry_name: var_or("BACKUP_ENTRY_NAME", DEFAULT_ENTRY_NAME),
            mode,
        };

        // Tiny sanity checks (fail fast, fail loud)
        if !cors_origin.starts_with("http://") && !cors_origin.starts_with("https://") {
            bail!("CORS_ORIGIN must start with http:// or https://");
        }
        if !appliance_login_path.starts_with('/') || !appliance_backup_path.starts_with('/') {
            bail!("APPLIANCE_LOGIN_PATH and APPLIANCE_BACKUP_PATH must start with /");
        }
        if network_timeout_secs == 0 || fetch_timeout_secs == 0 {
            bail!("NETWORK_TIMEOUT_SECS and FETCH_TIMEOUT_SECS must be greater than 0");
        }
        if script_service_name.chars().any(|c| c.is_whitespace() || c == ';' || c == '&') {
            bail!("SCRIPT_SERVICE_NAME must be a bare unit name");
        }

        Ok(Self {
            bind_addr,
            cors_origin,
            ssh_port,
            ssh_username,
            ssh_private_key_path,
            ssh_private_key_passphrase,
            backup_remote_path,
            appliance_login_path,
            appliance_backup_path,
            appliance_accept_invalid_certs,
            network_timeout: Duration::from_secs(network_timeout_secs),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            pending_session_ttl: Duration::from_secs(ttl_secs),
            script_service_name,
            decode,
        })
    }

    /// SSH credentials for a device: the configured key and username win over
    /// the ones supplied with the request.
    pub fn ssh_target(&self, device: &DeviceConnection) -> SshTarget {
        let username = self
            .ssh_username
            .clone()
            .unwrap_or_else(|| device.username.clone());
        let auth = match &self.ssh_private_key_path {
            Some(path) => SshAuth::PrivateKey {
                path: path.clone(),
                passphrase: self.ssh_private_key_passphrase.clone(),
            },
            None => SshAuth::Password(device.password.clone()),
        };

        SshTarget {
            host: device.host.clone(),
            port: device.ssh_port,
            username,
            auth,
        }
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn flag(key: &str) -> Option<bool> {
    optional(key).map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
}

fn parse_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {key}={raw}: {e}")),
        None => Ok(None),
    }
}
