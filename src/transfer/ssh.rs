//! OpenSSH transport.
//!
//! `connect` starts a control master per host, `fetch` runs `scp` through
//! that master so the handshake happens once per batch. Host keys are
//! trusted via the system known_hosts file; `BatchMode` keeps ssh from
//! prompting.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use super::{ensure_parent_dir, HostSession, TransferClient};
use crate::error::TransferError;

/// Connection settings for [`SshTransfer`].
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Remote login user.
    pub user: String,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Extra `-o` options passed to both ssh and scp.
    pub extra_options: Vec<String>,
    pub ssh_program: String,
    pub scp_program: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            user: "ec2-user".to_string(),
            connect_timeout: Duration::from_secs(10),
            extra_options: Vec::new(),
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
        }
    }
}

impl SshOptions {
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        for option in &self.extra_options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args
    }
}

pub struct SshTransfer {
    options: SshOptions,
    // Control sockets and ssh logs live here for the lifetime of the pass.
    control_dir: TempDir,
}

impl SshTransfer {
    pub fn new(options: SshOptions) -> Result<Self, TransferError> {
        let control_dir = tempfile::Builder::new()
            .prefix("fleetsync-ssh-")
            .tempdir()
            .map_err(|e| TransferError::io("creating control directory", std::env::temp_dir(), e))?;

        Ok(Self {
            options,
            control_dir,
        })
    }

    fn control_path(&self, host: &str, extension: &str) -> PathBuf {
        self.control_dir
            .path()
            .join(format!("{}.{}", socket_name(host), extension))
    }
}

#[async_trait]
impl TransferClient for SshTransfer {
    async fn connect(&self, host: &str) -> Result<Box<dyn HostSession>, TransferError> {
        let socket = self.control_path(host, "sock");
        let log_file = self.control_path(host, "log");
        let target = format!("{}@{}", self.options.user, host);

        debug!(host, socket = %socket.display(), "starting ssh control master");

        // -f backgrounds ssh after authentication, so the exit status tells
        // us whether the handshake worked. Output goes to a log file because
        // the backgrounded master would otherwise hold our pipes open.
        let status = Command::new(&self.options.ssh_program)
            .arg("-M")
            .arg("-S")
            .arg(&socket)
            .arg("-fN")
            .arg("-E")
            .arg(&log_file)
            .args(["-o", "ControlPersist=yes"])
            .args(self.options.common_args())
            .arg(&target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| TransferError::Connection {
                host: host.to_string(),
                reason: format!("failed to run {}: {}", self.options.ssh_program, e),
            })?;

        if !status.success() {
            let log = tokio::fs::read_to_string(&log_file).await.unwrap_or_default();
            return Err(TransferError::Connection {
                host: host.to_string(),
                reason: failure_reason(&status.to_string(), &log),
            });
        }

        Ok(Box::new(SshSession {
            host: host.to_string(),
            target,
            socket,
            options: self.options.clone(),
        }))
    }
}

struct SshSession {
    host: String,
    target: String,
    socket: PathBuf,
    options: SshOptions,
}

#[async_trait]
impl HostSession for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn fetch(&mut self, path: &str) -> Result<(), TransferError> {
        ensure_parent_dir(Path::new(path)).await?;

        let output = Command::new(&self.options.scp_program)
            .arg("-q")
            .arg("-o")
            .arg(format!("ControlPath={}", self.socket.display()))
            .args(self.options.common_args())
            .arg(format!("{}:{}", self.target, path))
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransferError::File {
                host: self.host.clone(),
                path: path.to_string(),
                reason: format!("failed to run {}: {}", self.options.scp_program, e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransferError::File {
                host: self.host.clone(),
                path: path.to_string(),
                reason: failure_reason(
                    &output.status.to_string(),
                    &String::from_utf8_lossy(&output.stderr),
                ),
            })
        }
    }

    async fn close(self: Box<Self>) {
        let result = Command::new(&self.options.ssh_program)
            .arg("-S")
            .arg(&self.socket)
            .args(["-O", "exit"])
            .arg(&self.target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        if let Err(e) = result {
            debug!(host = %self.host, error = %e, "failed to stop ssh control master");
        }
    }
}

fn socket_name(host: &str) -> String {
    host.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

fn failure_reason(status: &str, output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, output)
    }
}
