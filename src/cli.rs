//! Command-line interface.
//!
//! Flag spellings from the older `--snake_case` invocation are accepted as
//! aliases so existing cron entries keep working.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::TransportKind;
use crate::logging::LogFormat;

#[derive(Debug, Parser)]
#[command(
    name = "fleetsync",
    version,
    about = "Pull files changed on peer hosts, tracked through a shared change-log"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run one synchronisation pass (default)
    Run,
    /// Show this host's cursor and pending changes per peer
    Status,
    /// Create the change-log and offset tracker tables if missing
    InitSchema,
}

/// Settings that can also come from the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct SettingsArgs {
    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Table prefix: <name>_change_log and <name>_offset_tracker
    #[arg(long, alias = "application_name", global = true)]
    pub application_name: Option<String>,

    /// Database URL, e.g. mysql://user:pass@db/name
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[arg(long, alias = "db_host", global = true)]
    pub db_host: Option<String>,

    #[arg(long, alias = "db_user", global = true)]
    pub db_user: Option<String>,

    #[arg(long, alias = "db_password", global = true)]
    pub db_password: Option<String>,

    #[arg(long, alias = "db_name", global = true)]
    pub db_name: Option<String>,

    /// Slack webhook for failure alerts
    #[arg(long, alias = "slack_webhook", global = true)]
    pub slack_webhook: Option<String>,

    /// Only sync paths containing one of these substrings. Takes several
    /// values and may be repeated; put any subcommand before it, since
    /// trailing words are read as more filters.
    #[arg(
        long,
        alias = "file_path_list",
        num_args = 1..,
        action = clap::ArgAction::Append,
        global = true
    )]
    pub file_path_list: Vec<String>,

    /// Login user on peer hosts
    #[arg(long, alias = "server_user", global = true)]
    pub server_user: Option<String>,

    /// Name of this host in the change-log (defaults to the hostname)
    #[arg(long, global = true)]
    pub local_host: Option<String>,

    #[arg(long, value_enum, global = true)]
    pub transport: Option<TransportKind>,

    /// Directory holding one subdirectory per peer (mirror transport)
    #[arg(long, global = true)]
    pub mirror_root: Option<PathBuf>,

    /// SSH connect timeout in seconds
    #[arg(long, global = true)]
    pub connect_timeout: Option<u64>,

    /// Peers to pull from concurrently
    #[arg(long, global = true)]
    pub max_parallel_hosts: Option<usize>,

    /// Extra ssh option, e.g. StrictHostKeyChecking=accept-new (repeatable)
    #[arg(long = "ssh-option", global = true)]
    pub ssh_options: Vec<String>,
}
