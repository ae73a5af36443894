//! SQL access seam.
//!
//! Collectors and discovery reach databases exclusively through the
//! [`Querier`] trait, so scheduler behavior is testable against canned
//! result sets. The production implementation speaks the simple query
//! protocol, which also works against PgBouncer's admin console (the admin
//! console rejects prepared statements) and lets every value be read back
//! as text regardless of its SQL type.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Column, Connection, Row};
use thiserror::Error;

/// Errors from the SQL seam.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The endpoint cannot be queried at all.
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),

    /// Could not reach or authenticate against the endpoint.
    #[error("connect failed: {0}")]
    Connect(#[source] sqlx::Error),

    /// Query execution failed.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// The per-operation timeout elapsed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Connection parameters for one endpoint database.
///
/// Held structurally rather than as a URL: auto-generated monitoring
/// passwords routinely contain URL-reserved characters, so the fields go
/// straight into the driver's options builder and are never re-parsed.
#[derive(Clone)]
pub struct Conninfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Conninfo {
    pub(crate) fn pg_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

// Secrets must never reach logs, even through a stray {:?}.
impl std::fmt::Debug for Conninfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conninfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// A query result as a column-name/text-value grid.
///
/// Values are `None` for SQL NULL. Collectors locate columns by name, never
/// by position, so the `SELECT` list can evolve without breaking them.
#[derive(Debug, Clone, Default)]
pub struct SqlResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl SqlResult {
    /// Build a result from literal rows; used by tests and mocks.
    pub fn new(columns: &[&str], rows: Vec<Vec<Option<String>>>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    /// Index of a column by name.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// First column of the first row, for single-value queries.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }
}

/// One-shot query execution against a service endpoint.
///
/// Implementations open their own connection per call and close it on every
/// exit path; connections are never pooled across collectors.
#[async_trait]
pub trait Querier: Send + Sync {
    async fn query(&self, conninfo: &Conninfo, sql: &str) -> Result<SqlResult, StoreError>;
}

/// Production querier backed by sqlx.
pub struct PgQuerier {
    timeout: Duration,
}

impl PgQuerier {
    /// `timeout` bounds each connect attempt and each query execution.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

async fn fetch_all_rows(
    conn: &mut PgConnection,
    sql: &str,
) -> Result<Vec<sqlx::postgres::PgRow>, sqlx::Error> {
    let conn: &mut PgConnection = conn;
    sqlx::raw_sql(sql).fetch_all(conn).await
}

async fn pg_query_impl(
    timeout: Duration,
    conninfo: Conninfo,
    sql: String,
) -> Result<SqlResult, StoreError> {
    let options = conninfo.pg_options();

        let mut conn = tokio::time::timeout(timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
            .map_err(StoreError::Connect)?;

        let result: Result<Vec<sqlx::postgres::PgRow>, StoreError> =
            fetch_all_rows(&mut conn, &sql).await.map_err(StoreError::Query);

        // Close on every exit path; a failed close is not worth surfacing.
        let close = conn.close().await;
        if let Err(e) = close {
            tracing::debug!(error = %e, "connection close failed");
        }

        let rows = result?;
        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut grid = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                // Simple protocol returns text format, so any type can be
                // decoded as an optional string.
                values.push(row.try_get_unchecked::<Option<String>, _>(i).ok().flatten());
            }
            grid.push(values);
        }

        Ok(SqlResult {
            columns,
            rows: grid,
        })
}

#[async_trait]
impl Querier for PgQuerier {
    async fn query(&self, conninfo: &Conninfo, sql: &str) -> Result<SqlResult, StoreError> {
        pg_query_impl(self.timeout, conninfo.clone(), sql.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_result_column_lookup() {
        let res = SqlResult::new(
            &["database", "xact_commit_total"],
            vec![vec![Some("appdb".into()), Some("42".into())]],
        );
        assert_eq!(res.column("database"), Some(0));
        assert_eq!(res.column("xact_commit_total"), Some(1));
        assert_eq!(res.column("missing"), None);
    }

    #[test]
    fn test_sql_result_scalar() {
        let res = SqlResult::new(&["server_version_num"], vec![vec![Some("150004".into())]]);
        assert_eq!(res.scalar(), Some("150004"));

        let empty = SqlResult::default();
        assert_eq!(empty.scalar(), None);
    }

    #[test]
    fn test_conninfo_options_keep_reserved_characters() {
        // credentials go into the options builder verbatim, no URL escaping
        let conninfo = Conninfo {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "mon@itor".to_string(),
            password: "p@ss:w/rd%#?".to_string(),
            database: "postgres".to_string(),
        };
        let options = conninfo.pg_options();
        assert_eq!(options.get_host(), "127.0.0.1");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_username(), "mon@itor");
        assert_eq!(options.get_database(), Some("postgres"));
    }

    #[test]
    fn test_conninfo_debug_redacts_password() {
        let conninfo = Conninfo {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "monitor".to_string(),
            password: "hunter2".to_string(),
            database: "postgres".to_string(),
        };
        let rendered = format!("{conninfo:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("monitor"));
    }
}


#[allow(dead_code)]
fn diag_query(timeout: Duration, conninfo: Conninfo, sql: String) -> impl std::future::Future<Output = Result<SqlResult, StoreError>> + Send {
    pg_query_impl(timeout, conninfo, sql)
}
