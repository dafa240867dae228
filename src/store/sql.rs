//! SQL backend for the change-log and offset tracker.
//!
//! Works against MySQL/MariaDB in production and SQLite in tests through the
//! sqlx `Any` driver. Both tables share a per-application prefix:
//!
//! ```sql
//! CREATE TABLE <app>_change_log (
//!   offset_id  BIGINT PRIMARY KEY,
//!   file_path  VARCHAR(1024) NOT NULL,
//!   file_owner VARCHAR(255) NOT NULL
//! );
//! CREATE TABLE <app>_offset_tracker (
//!   server_name     VARCHAR(255) PRIMARY KEY,
//!   offset_id       BIGINT NOT NULL,
//!   last_updated_at TIMESTAMP NULL
//! );
//! ```

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::debug;

use super::filter::LIKE_ESCAPE;
use super::{ChangeLogStore, ChangeRecord, Offset, OffsetCursor, OffsetTracker, PathFilter};
use crate::error::StoreError;

// The `Any` driver needs its concrete drivers registered once per process.
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqlStore {
    pool: AnyPool,
    change_log_table: String,
    tracker_table: String,
}

impl SqlStore {
    /// Connect to `database_url` using tables prefixed with `application_name`.
    pub async fn connect(database_url: &str, application_name: &str) -> Result<Self, StoreError> {
        validate_prefix(application_name)?;
        install_drivers();

        // TIMESTAMP columns are rendered in the session time zone; pin it so
        // `last_updated_at` reads back as UTC. SQLite is always UTC.
        let utc_session = is_mysql_url(database_url);

        let pool = AnyPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if utc_session {
                        sqlx::query("SET time_zone = '+00:00'").execute(conn).await?;
                    }
                    Ok(())
                })
            })
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        Self::with_pool(pool, application_name)
    }

    /// Wrap an existing pool.
    pub fn with_pool(pool: AnyPool, application_name: &str) -> Result<Self, StoreError> {
        validate_prefix(application_name)?;
        Ok(Self {
            pool,
            change_log_table: format!("{}_change_log", application_name),
            tracker_table: format!("{}_offset_tracker", application_name),
        })
    }

    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    pub fn change_log_table(&self) -> &str {
        &self.change_log_table
    }

    pub fn tracker_table(&self) -> &str {
        &self.tracker_table
    }

    /// Create both tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 offset_id BIGINT PRIMARY KEY, \
                 file_path VARCHAR(1024) NOT NULL, \
                 file_owner VARCHAR(255) NOT NULL)",
                self.change_log_table
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 server_name VARCHAR(255) PRIMARY KEY, \
                 offset_id BIGINT NOT NULL, \
                 last_updated_at TIMESTAMP NULL)",
                self.tracker_table
            ),
        ];

        for sql in &statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::query("creating schema", e))?;
        }
        Ok(())
    }

    fn pending_sql(&self, filter: &PathFilter) -> String {
        let mut sql = format!(
            "SELECT offset_id, file_path, file_owner FROM {} WHERE file_owner <> ? AND offset_id > ?",
            self.change_log_table
        );
        if !filter.is_empty() {
            let clause = format!("file_path LIKE ? ESCAPE '{}'", LIKE_ESCAPE);
            let clauses = vec![clause; filter.substrings().len()].join(" OR ");
            sql.push_str(&format!(" AND ({})", clauses));
        }
        sql.push_str(" ORDER BY offset_id");
        sql
    }
}

#[async_trait]
impl ChangeLogStore for SqlStore {
    async fn query_pending(
        &self,
        exclude_host: &str,
        since: Offset,
        filter: &PathFilter,
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        let sql = self.pending_sql(filter);
        debug!(%sql, since, "querying change-log");

        let mut query = sqlx::query(&sql).bind(exclude_host.to_string()).bind(since);
        for pattern in filter.like_patterns() {
            query = query.bind(pattern);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::query("querying pending changes", e))?;

        rows.iter().map(change_record_from_row).collect()
    }
}

#[async_trait]
impl OffsetTracker for SqlStore {
    async fn read_cursor(&self, host: &str) -> Result<Option<OffsetCursor>, StoreError> {
        let sql = format!(
            "SELECT offset_id, CAST(last_updated_at AS CHAR) AS updated_at FROM {} WHERE server_name = ?",
            self.tracker_table
        );

        let row = sqlx::query(&sql)
            .bind(host.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::query("reading offset cursor", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let offset: i64 = row
            .try_get("offset_id")
            .map_err(|e| StoreError::query("decoding offset cursor", e))?;
        let updated_at = text_column(&row, "updated_at")
            .map_err(|e| StoreError::query("decoding offset cursor", e))?;

        Ok(Some(OffsetCursor {
            host: host.to_string(),
            offset,
            updated_at: updated_at.as_deref().and_then(parse_timestamp),
        }))
    }

    async fn insert_cursor(&self, host: &str, offset: Offset) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (offset_id, last_updated_at, server_name) VALUES (?, CURRENT_TIMESTAMP, ?)",
            self.tracker_table
        );
        sqlx::query(&sql)
            .bind(offset)
            .bind(host.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::query("inserting offset cursor", e))?;
        Ok(())
    }

    async fn update_cursor(&self, host: &str, offset: Offset) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET offset_id = ?, last_updated_at = CURRENT_TIMESTAMP WHERE server_name = ?",
            self.tracker_table
        );
        sqlx::query(&sql)
            .bind(offset)
            .bind(host.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::query("updating offset cursor", e))?;
        Ok(())
    }
}

fn change_record_from_row(row: &AnyRow) -> Result<ChangeRecord, StoreError> {
    let decode = |e| StoreError::query("decoding change-log row", e);
    let required = |name: &str| match text_column(row, name) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(StoreError::Backend(format!("{} is NULL in change-log row", name))),
        Err(e) => Err(decode(e)),
    };

    Ok(ChangeRecord {
        offset: row.try_get("offset_id").map_err(decode)?,
        file_path: required("file_path")?,
        owning_host: required("file_owner")?,
    })
}

/// Read a text column. The `Any` driver surfaces some MySQL text types as
/// BLOB, so fall back to bytes.
fn text_column(row: &AnyRow, name: &str) -> Result<Option<String>, sqlx::Error> {
    match row.try_get::<Option<String>, _>(name) {
        Ok(value) => Ok(value),
        Err(text_err) => match row.try_get::<Option<Vec<u8>>, _>(name) {
            Ok(bytes) => Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned())),
            Err(_) => Err(text_err),
        },
    }
}

/// Table names are interpolated into SQL, so the prefix must be a plain
/// identifier.
fn validate_prefix(prefix: &str) -> Result<(), StoreError> {
    let valid = !prefix.is_empty()
        && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(prefix.to_string()))
    }
}

fn is_mysql_url(url: &str) -> bool {
    let scheme = url.split(':').next().unwrap_or_default();
    scheme.eq_ignore_ascii_case("mysql") || scheme.eq_ignore_ascii_case("mariadb")
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
