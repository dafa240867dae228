// Library module for fleetsync
// Re-exports modules for use in integration tests and the binary

pub mod alert;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod store;
pub mod sync;
pub mod transfer;

pub use config::SyncSettings;
pub use error::{ConfigError, StoreError, SyncError, TransferError};
pub use sync::{SyncCoordinator, SyncResult};
