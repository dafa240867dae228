//! File transfer from peer hosts.
//!
//! A [`TransferClient`] opens one [`HostSession`] per remote host per pass.
//! The session is reused for every file in that host's batch and closed
//! when the batch ends. Remote and local paths are the same string: the
//! fleet shares one filesystem layout.

pub mod mirror;
pub mod ssh;

use std::path::Path;

use async_trait::async_trait;

use crate::error::TransferError;

pub use mirror::MirrorTransfer;
pub use ssh::{SshOptions, SshTransfer};

#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Establish a session with `host`. A failure here fails the host's
    /// whole batch.
    async fn connect(&self, host: &str) -> Result<Box<dyn HostSession>, TransferError>;
}

#[async_trait]
pub trait HostSession: Send {
    fn host(&self) -> &str;

    /// Pull `path` from the remote host to the same local path, creating
    /// parent directories as needed.
    async fn fetch(&mut self, path: &str) -> Result<(), TransferError>;

    /// Tear down the session. Errors are logged, never returned.
    async fn close(self: Box<Self>);
}

/// Create the parent directories of `path` if needed.
pub async fn ensure_parent_dir(path: &Path) -> Result<(), TransferError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io("creating directory", parent, e))?;
        }
    }
    Ok(())
}
