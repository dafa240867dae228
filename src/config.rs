//! Resolved runtime settings.
//!
//! CLI flags win over the TOML file, which wins over defaults. The result
//! is an immutable [`SyncSettings`] handed to everything that needs it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

use crate::cli::SettingsArgs;
use crate::error::ConfigError;

pub const DEFAULT_SERVER_USER: &str = "ec2-user";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// How files are pulled from peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// OpenSSH control master + scp
    #[default]
    Ssh,
    /// Peers mounted as directories under --mirror-root
    Mirror,
}

/// Config file contents. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub application_name: Option<String>,
    pub database_url: Option<String>,
    pub db_host: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_name: Option<String>,
    pub slack_webhook: Option<String>,
    pub file_path_list: Option<Vec<String>>,
    pub server_user: Option<String>,
    pub local_host: Option<String>,
    pub transport: Option<TransportKind>,
    pub mirror_root: Option<PathBuf>,
    pub connect_timeout: Option<u64>,
    pub max_parallel_hosts: Option<usize>,
    pub ssh_options: Option<Vec<String>>,
}

impl FileConfig {
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read `explicit` if given, else the per-user default file if it
    /// exists, else an empty config.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::parse(&path, &content)
    }
}

/// `<config_dir>/fleetsync/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fleetsync").join("config.toml"))
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub application_name: String,
    pub database_url: String,
    pub local_host: String,
    pub path_filters: Vec<String>,
    pub alert_webhook: Option<String>,
    pub server_user: String,
    pub transport: TransportKind,
    pub mirror_root: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub max_parallel_hosts: usize,
    pub ssh_options: Vec<String>,
}

impl SyncSettings {
    /// Load the config file named by `args` (or the default one) and merge.
    pub fn load(args: &SettingsArgs) -> Result<Self, ConfigError> {
        let file = FileConfig::load(args.config.as_deref())?;
        Self::resolve(args, file)
    }

    pub fn resolve(args: &SettingsArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let application_name = args
            .application_name
            .clone()
            .or(file.application_name)
            .ok_or(ConfigError::Missing("application_name", "application-name"))?;
        validate_application_name(&application_name)?;

        let database_url = match args.database_url.clone().or(file.database_url) {
            Some(url) => url,
            None => mysql_url(
                args.db_host.clone().or(file.db_host),
                args.db_user.clone().or(file.db_user),
                args.db_password.clone().or(file.db_password),
                args.db_name.clone().or(file.db_name),
            )?,
        };

        let local_host = match args.local_host.clone().or(file.local_host) {
            Some(host) => host,
            None => hostname::get()
                .map_err(ConfigError::Hostname)?
                .to_string_lossy()
                .into_owned(),
        };

        let path_filters = if args.file_path_list.is_empty() {
            file.file_path_list.unwrap_or_default()
        } else {
            args.file_path_list.clone()
        };

        let alert_webhook = args.slack_webhook.clone().or(file.slack_webhook);
        if let Some(url) = &alert_webhook {
            reqwest::Url::parse(url).map_err(|e| ConfigError::Invalid {
                field: "slack_webhook",
                reason: e.to_string(),
            })?;
        }

        let transport = args.transport.or(file.transport).unwrap_or_default();
        let mirror_root = args.mirror_root.clone().or(file.mirror_root);
        if transport == TransportKind::Mirror && mirror_root.is_none() {
            return Err(ConfigError::Missing("mirror_root", "mirror-root"));
        }

        let max_parallel_hosts = args.max_parallel_hosts.or(file.max_parallel_hosts).unwrap_or(1);
        if max_parallel_hosts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_parallel_hosts",
                reason: "must be at least 1".to_string(),
            });
        }

        let ssh_options = if args.ssh_options.is_empty() {
            file.ssh_options.unwrap_or_default()
        } else {
            args.ssh_options.clone()
        };

        Ok(Self {
            application_name,
            database_url,
            local_host,
            path_filters,
            alert_webhook,
            server_user: args
                .server_user
                .clone()
                .or(file.server_user)
                .unwrap_or_else(|| DEFAULT_SERVER_USER.to_string()),
            transport,
            mirror_root,
            connect_timeout: Duration::from_secs(
                args.connect_timeout
                    .or(file.connect_timeout)
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            max_parallel_hosts,
            ssh_options,
        })
    }
}

fn validate_application_name(name: &str) -> Result<(), ConfigError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field: "application_name",
            reason: format!("'{}' may only contain ASCII letters, digits and '_'", name),
        })
    }
}

/// Build a MySQL URL from the discrete database flags.
fn mysql_url(
    host: Option<String>,
    user: Option<String>,
    password: Option<String>,
    name: Option<String>,
) -> Result<String, ConfigError> {
    let host = host.ok_or(ConfigError::Missing("database_url", "database-url"))?;
    let name = name.ok_or(ConfigError::Missing("db_name", "db-name"))?;

    let invalid = |reason: String| ConfigError::Invalid {
        field: "db_host",
        reason,
    };

    let mut url = reqwest::Url::parse(&format!("mysql://{}", host)).map_err(|e| invalid(e.to_string()))?;
    if let Some(user) = user {
        url.set_username(&user)
            .map_err(|_| invalid(format!("cannot set user on {}", host)))?;
    }
    if password.is_some() {
        url.set_password(password.as_deref())
            .map_err(|_| invalid(format!("cannot set password on {}", host)))?;
    }
    url.set_path(&name);

    Ok(url.to_string())
}
