//! Directory transport: every peer is a directory under a shared root.
//!
//! Used where peers' volumes are mounted locally (NFS, bind mounts) and in
//! tests. `<remote_root>/<host>/<path>` is copied to `<local_root>/<path>`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::trace;

use super::{ensure_parent_dir, HostSession, TransferClient};
use crate::error::TransferError;

#[derive(Debug, Clone)]
pub struct MirrorTransfer {
    remote_root: PathBuf,
    local_root: PathBuf,
}

impl MirrorTransfer {
    pub fn new(remote_root: impl Into<PathBuf>) -> Self {
        Self {
            remote_root: remote_root.into(),
            local_root: PathBuf::from("/"),
        }
    }

    /// Write fetched files below `local_root` instead of `/`.
    pub fn with_local_root(mut self, local_root: impl Into<PathBuf>) -> Self {
        self.local_root = local_root.into();
        self
    }
}

#[async_trait]
impl TransferClient for MirrorTransfer {
    async fn connect(&self, host: &str) -> Result<Box<dyn HostSession>, TransferError> {
        let host_root = self.remote_root.join(host);
        let is_dir = tokio::fs::metadata(&host_root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        if !is_dir {
            return Err(TransferError::Connection {
                host: host.to_string(),
                reason: format!("{} is not a directory", host_root.display()),
            });
        }

        Ok(Box::new(MirrorSession {
            host: host.to_string(),
            host_root,
            local_root: self.local_root.clone(),
        }))
    }
}

struct MirrorSession {
    host: String,
    host_root: PathBuf,
    local_root: PathBuf,
}

impl MirrorSession {
    fn file_error(&self, path: &str, reason: impl Into<String>) -> TransferError {
        TransferError::File {
            host: self.host.clone(),
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl HostSession for MirrorSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn fetch(&mut self, path: &str) -> Result<(), TransferError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(self.file_error(path, "path must be absolute and free of '..'"));
        }

        let source = self.host_root.join(relative);
        let dest = self.local_root.join(relative);
        trace!(source = %source.display(), dest = %dest.display(), "copying");

        ensure_parent_dir(&dest).await?;
        tokio::fs::copy(&source, &dest)
            .await
            .map_err(|e| self.file_error(path, e.to_string()))?;

        Ok(())
    }

    async fn close(self: Box<Self>) {}
}
