use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ssh2::Session;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BackupError, Result};
use crate::types::{SshAuth, SshTarget};

#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Download `remote_path` into memory after checking that it exists.
    async fn fetch_file(&self, target: &SshTarget, remote_path: &str) -> Result<Bytes>;

    /// Run one command and return its stdout.
    async fn run_command(&self, target: &SshTarget, command: &str) -> Result<String>;
}

/// Largest remote file accepted for download.
pub const MAX_REMOTE_FILE_BYTES: u64 = 1 << 30;

const READ_CHUNK: usize = 64 * 1024;

/// libssh2-backed fetcher. Every call opens its own session.
///
/// `timeout` bounds each blocking libssh2 call (connect, handshake, one read),
/// so a transfer that keeps making progress never times out here. The total
/// time of a call is up to the caller.
pub struct SshFetcher {
    timeout: Duration,
}

impl SshFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `f` on the blocking pool. Dropping the returned future cancels the
    /// token handed to `f`.
    async fn blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(Duration, CancellationToken) -> Result<R> + Send + 'static,
    {
        let timeout = self.timeout;
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| f(timeout, cancel))).await?
    }
}

#[async_trait]
impl RemoteFetcher for SshFetcher {
    async fn fetch_file(&self, target: &SshTarget, remote_path: &str) -> Result<Bytes> {
        let target = target.clone();
        let remote_path = remote_path.to_string();

        self.blocking(move |timeout, cancel| {
            let conn = Connection::open(&target, timeout)?;
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            let probe = format!(
                "test -e {} && echo 'exists' || echo 'not exists'",
                shell_quote(&remote_path)
            );
            if conn.exec(&probe)?.trim() != "exists" {
                return Err(BackupError::RemoteFileNotFound(remote_path));
            }

            let data = conn.download(&remote_path, &cancel)?;
            info!(host = %target.host, path = %remote_path, bytes = data.len(), "downloaded remote file");
            Ok(Bytes::from(data))
        })
        .await
    }

    async fn run_command(&self, target: &SshTarget, command: &str) -> Result<String> {
        let target = target.clone();
        let command = command.to_string();

        self.blocking(move |timeout, _| Connection::open(&target, timeout)?.exec(&command))
            .await
    }
}

/// Authenticated session; disconnects when dropped.
struct Connection {
    session: Session,
}

impl Connection {
    fn open(target: &SshTarget, timeout: Duration) -> Result<Self> {
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| BackupError::Connection(format!("{}: {e}", target.host)))?
            .next()
            .ok_or_else(|| BackupError::Connection(format!("{}: no address", target.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| BackupError::Connection(format!("{addr}: {e}")))?;

        let mut session = Session::new().map_err(|e| BackupError::Ssh(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session
            .handshake()
            .map_err(|e| BackupError::Connection(format!("ssh handshake with {addr}: {e}")))?;

        // from here on, Drop disconnects
        let conn = Self { session };

        let auth = match &target.auth {
            SshAuth::Password(password) => conn.session.userauth_password(&target.username, password),
            SshAuth::PrivateKey { path, passphrase } => conn.session.userauth_pubkey_file(
                &target.username,
                None,
                path,
                passphrase.as_deref(),
            ),
        };
        if let Err(e) = auth {
            return Err(BackupError::Authentication(format!("ssh {}: {e}", target.username)));
        }
        if !conn.session.authenticated() {
            return Err(BackupError::Authentication(format!("ssh {}", target.username)));
        }

        debug!(%addr, user = %target.username, "ssh session authenticated");
        Ok(conn)
    }

    fn exec(&self, command: &str) -> Result<String> {
        let mut channel = self.session.channel_session().map_err(ssh_err)?;
        channel.exec(command).map_err(ssh_err)?;

        let mut out = String::new();
        channel
            .read_to_string(&mut out)
            .map_err(|e| BackupError::Ssh(e.to_string()))?;
        channel.wait_close().map_err(ssh_err)?;

        debug!(command, exit = channel.exit_status().unwrap_or(-1), "remote command finished");
        Ok(out)
    }

    fn download(&self, remote_path: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let (mut channel, stat) = self
            .session
            .scp_recv(Path::new(remote_path))
            .map_err(ssh_err)?;

        if stat.size() > MAX_REMOTE_FILE_BYTES {
            return Err(BackupError::Ssh(format!(
                "scp {remote_path}: {} bytes exceeds the {MAX_REMOTE_FILE_BYTES}-byte limit",
                stat.size()
            )));
        }

        let data = read_cancellable(&mut channel, stat.size(), cancel)
            .map_err(|e| match e {
                BackupError::Ssh(msg) => BackupError::Ssh(format!("scp {remote_path}: {msg}")),
                other => other,
            })?;

        // best effort; the payload is already complete
        let _ = channel.send_eof();
        let _ = channel.wait_eof();
        let _ = channel.close();
        let _ = channel.wait_close();

        if data.len() as u64 != stat.size() {
            return Err(BackupError::Ssh(format!(
                "scp {remote_path}: expected {} bytes, got {}",
                stat.size(),
                data.len()
            )));
        }
        Ok(data)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "bye", None) {
            warn!("ssh disconnect failed: {e}");
        }
    }
}

/// Read at most `expected` bytes, checking `cancel` before every chunk.
fn read_cancellable(
    mut reader: impl Read,
    expected: u64,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        if cancel.is_cancelled() {
            debug!(received = data.len(), "transfer cancelled");
            return Err(BackupError::Cancelled);
        }

        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(data),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(BackupError::Ssh(e.to_string())),
        };

        if (data.len() + n) as u64 > expected {
            return Err(BackupError::Ssh(format!("more than the announced {expected} bytes")));
        }
        data.extend_from_slice(&chunk[..n]);
    }
}

fn ssh_err(e: ssh2::Error) -> BackupError {
    BackupError::Ssh(e.to_string())
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}
