//! Error types shared across the crate.
//!
//! Only [`SyncError`] is fatal to a pass. Store read failures and transfer
//! failures are contained by the coordinator and surface as alerts and
//! log lines instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::Offset;

/// Failures talking to the change-log / offset tracker backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("could not connect to the sync database: {0}\nSuggestion: check --database-url and that the server is reachable")]
    Connect(String),

    #[error("database error while {operation}: {source}")]
    Query {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid table prefix '{0}': only ASCII letters, digits and '_' are allowed")]
    InvalidIdentifier(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn query(operation: &'static str, source: sqlx::Error) -> Self {
        StoreError::Query { operation, source }
    }
}

/// Failures pulling files from a peer.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The peer could not be reached or refused authentication. Fails the
    /// whole batch for that host.
    #[error("could not connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    /// A single file could not be fetched. Abandons the rest of the batch.
    #[error("failed to fetch {path} from {host}: {reason}")]
    File {
        host: String,
        path: String,
        reason: String,
    },

    #[error("I/O error while {operation} {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        TransferError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// True when the error means the host itself is unusable for this pass.
    pub fn is_connection(&self) -> bool {
        matches!(self, TransferError::Connection { .. })
    }
}

/// Invalid or missing settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}\nSuggestion: pass --{1} or set it in the config file")]
    Missing(&'static str, &'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("could not read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not determine local hostname: {0}\nSuggestion: pass --local-host")]
    Hostname(#[source] io::Error),
}

/// Errors that abort a synchronisation pass.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to commit offset {offset} for {host}: {source}")]
    Commit {
        host: String,
        offset: Offset,
        #[source]
        source: StoreError,
    },
}
