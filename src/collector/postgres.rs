//! PostgreSQL statistics sources.
//!
//! SQL text for every Postgres descriptor (including pre-10 variants),
//! the round probe queries, the `pg_settings` collector with unit
//! normalization, and the data/WAL/log directory mountpoint probes.
//!
//! Every query returns one row per entity or one row of globals; collectors
//! identify columns by name, so the `SELECT` lists alias raw catalog columns
//! to the metric suffixes they produce.

use std::io;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::CollectError;
use crate::metrics::Sink;
use crate::registry::Descriptor;
use crate::store::{Conninfo, Querier};

/// Engine version probe, run at the top of each round.
pub const VERSION_SQL: &str =
    "SELECT current_setting('server_version_num') AS server_version_num";

/// User database enumeration for the per-database fan-out.
pub const DATABASES_SQL: &str = "SELECT datname AS database FROM pg_database \
     WHERE datallowconn AND NOT datistemplate ORDER BY datname";

pub const STAT_DATABASE_SQL: &str = "SELECT datname AS database, \
     xact_commit AS xact_commit_total, xact_rollback AS xact_rollback_total, \
     blks_read AS blks_read_total, blks_hit AS blks_hit_total, \
     tup_returned AS tup_returned_total, tup_fetched AS tup_fetched_total, \
     tup_inserted AS tup_inserted_total, tup_updated AS tup_updated_total, \
     tup_deleted AS tup_deleted_total, conflicts AS conflicts_total, \
     temp_files AS temp_files_total, temp_bytes AS temp_bytes_total, \
     deadlocks AS deadlocks_total, pg_database_size(datname) AS size_bytes, \
     coalesce(extract(epoch FROM age(now(), stats_reset)), 0) AS stats_age_seconds \
     FROM pg_stat_database \
     WHERE datname IN (SELECT datname FROM pg_database WHERE datallowconn AND NOT datistemplate)";

pub const BGWRITER_SQL: &str = "SELECT checkpoints_timed AS checkpoints_timed_total, \
     checkpoints_req AS checkpoints_req_total, \
     checkpoint_write_time / 1000.0 AS checkpoint_write_time_seconds_total, \
     checkpoint_sync_time / 1000.0 AS checkpoint_sync_time_seconds_total, \
     buffers_checkpoint AS buffers_checkpoint_total, buffers_clean AS buffers_clean_total, \
     maxwritten_clean AS maxwritten_clean_total, buffers_backend AS buffers_backend_total, \
     buffers_backend_fsync AS buffers_backend_fsync_total, buffers_alloc AS buffers_alloc_total \
     FROM pg_stat_bgwriter";

pub const ACTIVITY_SQL: &str = "SELECT count(*) AS conn_total, \
     count(*) FILTER (WHERE state = 'idle') AS conn_idle_total, \
     count(*) FILTER (WHERE state IN ('idle in transaction', 'idle in transaction (aborted)')) AS conn_idle_xact_total, \
     count(*) FILTER (WHERE state = 'active') AS conn_active_total, \
     count(*) FILTER (WHERE wait_event_type = 'Lock') AS conn_waiting_total, \
     coalesce(extract(epoch FROM max(now() - xact_start)), 0) AS xact_max_seconds \
     FROM pg_stat_activity WHERE backend_type = 'client backend'";

pub const REPLICATION_SQL: &str = "SELECT client_addr::text AS client_addr, \
     coalesce(application_name, '') AS application_name, \
     pg_wal_lsn_diff(pg_current_wal_lsn(), sent_lsn) AS pending_lag_bytes, \
     pg_wal_lsn_diff(sent_lsn, write_lsn) AS write_lag_bytes, \
     pg_wal_lsn_diff(write_lsn, flush_lsn) AS flush_lag_bytes, \
     pg_wal_lsn_diff(flush_lsn, replay_lsn) AS replay_lag_bytes, \
     coalesce(extract(epoch FROM write_lag), 0) AS write_lag_seconds, \
     coalesce(extract(epoch FROM flush_lag), 0) AS flush_lag_seconds, \
     coalesce(extract(epoch FROM replay_lag), 0) AS replay_lag_seconds \
     FROM pg_stat_replication";

/// Pre-10 variant: xlog naming, no per-stage lag intervals.
pub const REPLICATION_96_SQL: &str = "SELECT client_addr::text AS client_addr, \
     coalesce(application_name, '') AS application_name, \
     pg_xlog_location_diff(pg_current_xlog_location(), sent_location) AS pending_lag_bytes, \
     pg_xlog_location_diff(sent_location, write_location) AS write_lag_bytes, \
     pg_xlog_location_diff(write_location, flush_location) AS flush_lag_bytes, \
     pg_xlog_location_diff(flush_location, replay_location) AS replay_lag_bytes \
     FROM pg_stat_replication";

pub const REPLICATION_SLOTS_SQL: &str = "SELECT slot_name, active::text AS active, \
     pg_wal_lsn_diff(pg_current_wal_lsn(), restart_lsn) AS restart_lag_bytes \
     FROM pg_replication_slots";

pub const REPLICATION_SLOTS_96_SQL: &str = "SELECT slot_name, active::text AS active, \
     pg_xlog_location_diff(pg_current_xlog_location(), restart_lsn) AS restart_lag_bytes \
     FROM pg_replication_slots";

pub const WAL_SIZE_SQL: &str =
    "SELECT coalesce(sum(size), 0) AS size_bytes FROM pg_ls_waldir()";

pub const WAL_SIZE_96_SQL: &str = "SELECT coalesce(sum((pg_stat_file('pg_xlog/' || f)).size), 0) AS size_bytes \
     FROM pg_ls_dir('pg_xlog') AS f WHERE f ~ '^[0-9A-F]{24}$'";

pub const STAT_USER_TABLES_SQL: &str = "SELECT current_database() AS database, \
     schemaname AS schema, relname AS \"table\", \
     seq_scan AS seq_scan_total, seq_tup_read AS seq_tup_read_total, \
     coalesce(idx_scan, 0) AS idx_scan_total, coalesce(idx_tup_fetch, 0) AS idx_tup_fetch_total, \
     n_tup_ins AS n_tup_ins_total, n_tup_upd AS n_tup_upd_total, n_tup_del AS n_tup_del_total, \
     n_tup_hot_upd AS n_tup_hot_upd_total, n_live_tup, n_dead_tup, \
     vacuum_count AS vacuum_total, autovacuum_count AS autovacuum_total, \
     analyze_count AS analyze_total, autoanalyze_count AS autoanalyze_total \
     FROM pg_stat_user_tables";

pub const STATIO_USER_TABLES_SQL: &str = "SELECT current_database() AS database, \
     schemaname AS schema, relname AS \"table\", \
     coalesce(heap_blks_read, 0) AS heap_blks_read_total, \
     coalesce(heap_blks_hit, 0) AS heap_blks_hit_total, \
     coalesce(idx_blks_read, 0) AS idx_blks_read_total, \
     coalesce(idx_blks_hit, 0) AS idx_blks_hit_total \
     FROM pg_statio_user_tables";

pub const STAT_USER_INDEXES_SQL: &str = "SELECT current_database() AS database, \
     schemaname AS schema, relname AS \"table\", indexrelname AS index, \
     idx_scan AS idx_scan_total, idx_tup_read AS idx_tup_read_total, \
     idx_tup_fetch AS idx_tup_fetch_total \
     FROM pg_stat_user_indexes";

pub const STATIO_USER_INDEXES_SQL: &str = "SELECT current_database() AS database, \
     schemaname AS schema, relname AS \"table\", indexrelname AS index, \
     coalesce(idx_blks_read, 0) AS idx_blks_read_total, \
     coalesce(idx_blks_hit, 0) AS idx_blks_hit_total \
     FROM pg_statio_user_indexes";

pub const STAT_USER_FUNCTIONS_SQL: &str = "SELECT current_database() AS database, \
     schemaname AS schema, funcname AS function, \
     calls AS calls_total, total_time / 1000.0 AS total_time_seconds_total, \
     self_time / 1000.0 AS self_time_seconds_total \
     FROM pg_stat_user_functions";

/// Fails where the extension is not installed; the scheduler skips that
/// database and, the descriptor being oneshot, retries in the next one.
pub const STAT_STATEMENTS_SQL: &str = "SELECT r.rolname AS \"user\", d.datname AS database, \
     s.queryid::text AS queryid, \
     s.calls AS calls_total, s.rows AS rows_total, \
     s.shared_blks_hit AS shared_blks_hit_total, s.shared_blks_read AS shared_blks_read_total, \
     s.temp_blks_read AS temp_blks_read_total, s.temp_blks_written AS temp_blks_written_total \
     FROM pg_stat_statements s \
     JOIN pg_database d ON s.dbid = d.oid \
     JOIN pg_roles r ON s.userid = r.oid";

pub const DATABASE_CONFLICTS_SQL: &str = "SELECT 'tablespace' AS conflict, coalesce(sum(confl_tablespace), 0) AS total FROM pg_stat_database_conflicts \
     UNION ALL SELECT 'lock', coalesce(sum(confl_lock), 0) FROM pg_stat_database_conflicts \
     UNION ALL SELECT 'snapshot', coalesce(sum(confl_snapshot), 0) FROM pg_stat_database_conflicts \
     UNION ALL SELECT 'bufferpin', coalesce(sum(confl_bufferpin), 0) FROM pg_stat_database_conflicts \
     UNION ALL SELECT 'deadlock', coalesce(sum(confl_deadlock), 0) FROM pg_stat_database_conflicts";

pub const RECOVERY_SQL: &str = "SELECT pg_is_in_recovery()::int AS status";

pub const REPLICATION_STANDBY_SQL: &str =
    "SELECT count(*) AS count FROM pg_stat_replication";

pub const CATALOG_SIZE_SQL: &str = "SELECT current_database() AS database, \
     coalesce(sum(pg_total_relation_size(c.oid)), 0) AS bytes \
     FROM pg_class c JOIN pg_namespace n ON c.relnamespace = n.oid \
     WHERE n.nspname = 'pg_catalog'";

pub const SCHEMA_NON_PK_TABLE_SQL: &str = "SELECT current_database() AS database, \
     n.nspname AS schema, c.relname AS \"table\", 1 AS \"exists\" \
     FROM pg_class c JOIN pg_namespace n ON c.relnamespace = n.oid \
     WHERE c.relkind = 'r' \
     AND n.nspname NOT IN ('pg_catalog', 'information_schema') \
     AND NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conrelid = c.oid AND contype IN ('p', 'u'))";

pub const SCHEMA_INVALID_INDEX_SQL: &str = "SELECT current_database() AS database, \
     n.nspname AS schema, c.relname AS \"table\", ic.relname AS index, \
     pg_relation_size(i.indexrelid) AS bytes \
     FROM pg_index i \
     JOIN pg_class ic ON i.indexrelid = ic.oid \
     JOIN pg_class c ON i.indrelid = c.oid \
     JOIN pg_namespace n ON c.relnamespace = n.oid \
     WHERE NOT i.indisvalid";

pub const SCHEMA_NON_INDEXED_FKEY_SQL: &str = "SELECT current_database() AS database, \
     n.nspname AS schema, c.relname AS \"table\", con.conname AS \"constraint\", 1 AS \"exists\" \
     FROM pg_constraint con \
     JOIN pg_class c ON con.conrelid = c.oid \
     JOIN pg_namespace n ON c.relnamespace = n.oid \
     WHERE con.contype = 'f' \
     AND NOT EXISTS (SELECT 1 FROM pg_index i WHERE i.indrelid = con.conrelid \
         AND (i.indkey::int2[])[0:array_length(con.conkey, 1) - 1] @> con.conkey)";

pub const SCHEMA_SEQUENCE_FULLNESS_SQL: &str = "SELECT current_database() AS database, \
     schemaname AS schema, sequencename AS sequence, \
     coalesce(last_value, 0)::float8 / max_value AS ratio \
     FROM pg_sequences";

/// pg_sequences does not exist before 10; the pre-10 variant is an empty
/// result set, which disables the collector without a registry mechanism.
pub const SCHEMA_SEQUENCE_FULLNESS_96_SQL: &str = "SELECT NULL AS database, NULL AS schema, \
     NULL AS sequence, NULL AS ratio WHERE false";

pub const SETTINGS_SQL: &str = "SELECT name, setting, coalesce(unit, '') AS unit, vartype \
     FROM pg_settings WHERE source IN ('default', 'configuration file', 'override')";

const DATA_DIRECTORY_SQL: &str = "SELECT current_setting('data_directory') AS path";

const LOG_DIRECTORY_SQL: &str = "SELECT current_setting('log_directory') AS path \
     WHERE current_setting('logging_collector') = 'on'";

/// Descriptor names handled by [`collect_directory`].
pub const DATA_DIRECTORY: &str = "postgres_data_directory";
pub const WAL_DIRECTORY: &str = "postgres_wal_directory";
pub const LOG_DIRECTORY: &str = "postgres_log_directory";

/// Name of the settings probe descriptor.
pub const SETTINGS: &str = "postgres_settings";

/// Collect `pg_settings`, normalizing each setting to its canonical unit.
pub async fn collect_settings(
    querier: &dyn Querier,
    conninfo: &Conninfo,
    desc: &Descriptor,
    sink: &Sink,
) -> Result<(), CollectError> {
    let res = querier.query(conninfo, SETTINGS_SQL).await?;

    let name_col = res.column("name");
    let setting_col = res.column("setting");
    let unit_col = res.column("unit");
    let vartype_col = res.column("vartype");
    let (Some(ni), Some(si), Some(ui), Some(vi)) = (name_col, setting_col, unit_col, vartype_col)
    else {
        return Err(CollectError::Probe("pg_settings result misses columns".into()));
    };

    for row in &res.rows {
        let field = |i: usize| row.get(i).and_then(|v| v.as_deref()).unwrap_or("");
        let (name, setting, unit, vartype) = (field(ni), field(si), field(ui), field(vi));

        let normalized = match normalize_setting(setting, unit, vartype) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(name, setting, unit, vartype, error = %e, "skip setting");
                continue;
            }
        };

        sink.send(
            &desc.handles[0],
            vec![
                name.to_string(),
                normalized.setting,
                normalized.unit,
                vartype.to_string(),
            ],
            normalized.value,
        )
        .await?;
    }
    Ok(())
}

/// A setting after unit normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSetting {
    /// Display form of the value, re-rendered in the canonical unit.
    pub setting: String,
    /// Canonical unit: `bytes`, `seconds`, or the raw unit for non-numeric
    /// vartypes.
    pub unit: String,
    /// Numeric value in the canonical unit.
    pub value: f64,
}

#[derive(Debug, Error)]
pub enum SettingError {
    #[error("unknown vartype: {0}")]
    Vartype(String),
    #[error("unknown value for bool: {0}")]
    Bool(String),
    #[error("invalid unit '{0}'")]
    Unit(String),
    #[error("invalid numeric setting '{0}'")]
    Number(String),
}

/// Normalize `(setting, unit)` per the documented factor table.
///
/// Sizes collapse to bytes, times to seconds. Bool settings become 0/1,
/// enum and string settings are passed through with value 0.
pub fn normalize_setting(
    setting: &str,
    unit: &str,
    vartype: &str,
) -> Result<NormalizedSetting, SettingError> {
    match vartype {
        "enum" | "string" => Ok(NormalizedSetting {
            setting: setting.to_string(),
            unit: unit.to_string(),
            value: 0.0,
        }),
        "bool" => {
            let value = match setting {
                "on" => 1.0,
                "off" => 0.0,
                other => return Err(SettingError::Bool(other.to_string())),
            };
            Ok(NormalizedSetting {
                setting: setting.to_string(),
                unit: unit.to_string(),
                value,
            })
        }
        "integer" | "real" => {
            let (factor, canonical) = parse_unit(unit)?;
            let raw: f64 = setting
                .parse()
                .map_err(|_| SettingError::Number(setting.to_string()))?;
            // Negative values are sentinels (e.g. disabled thresholds); the
            // factor applies to real quantities only.
            let value = if raw >= 0.0 { raw * factor } else { raw };
            Ok(NormalizedSetting {
                setting: format_setting(value, vartype),
                unit: canonical.to_string(),
                value,
            })
        }
        other => Err(SettingError::Vartype(other.to_string())),
    }
}

/// Parse a `pg_settings.unit` value into a factor and canonical unit.
///
/// Accepts an optional numeric prefix, e.g. `8kB` yields `(8192, "bytes")`.
pub fn parse_unit(unit: &str) -> Result<(f64, &'static str), SettingError> {
    if unit.is_empty() {
        return Ok((1.0, ""));
    }

    static UNIT_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = UNIT_REGEX
        .get_or_init(|| Regex::new(r"^([0-9]*)([A-Za-z]+)$").expect("unit regex must compile"));

    let caps = re
        .captures(unit)
        .ok_or_else(|| SettingError::Unit(unit.to_string()))?;

    let prefix: f64 = match &caps[1] {
        "" => 1.0,
        digits => digits
            .parse()
            .map_err(|_| SettingError::Unit(unit.to_string()))?,
    };

    let (factor, canonical) = match &caps[2] {
        "B" => (1.0, "bytes"),
        "kB" => (1024.0, "bytes"),
        "MB" => (1024.0 * 1024.0, "bytes"),
        "GB" => (1024.0 * 1024.0 * 1024.0, "bytes"),
        "TB" => (1024.0 * 1024.0 * 1024.0 * 1024.0, "bytes"),
        "us" => (0.000_001, "seconds"),
        "ms" => (0.001, "seconds"),
        "s" => (1.0, "seconds"),
        "min" => (60.0, "seconds"),
        "h" => (3600.0, "seconds"),
        "d" => (86400.0, "seconds"),
        _ => return Err(SettingError::Unit(unit.to_string())),
    };
    Ok((prefix * factor, canonical))
}

fn format_setting(value: f64, vartype: &str) -> String {
    if vartype == "integer" && value >= 1.0 {
        format!("{value:.0}")
    } else {
        // Trim trailing zeroes of a fixed 5-decimal rendering, then a
        // trailing dot, so 1.50000 -> 1.5 and 100.00000 -> 100.
        let s = format!("{value:.5}");
        let s = s.trim_end_matches('0').trim_end_matches('.');
        if s.is_empty() { "0".to_string() } else { s.to_string() }
    }
}

/// Resolve a Postgres directory to its device and mountpoint and emit one
/// labeled gauge for it.
///
/// Dispatched by descriptor name: the data directory itself, the WAL
/// directory (`pg_wal`, `pg_xlog` before 10), or the server log directory.
pub async fn collect_directory(
    querier: &dyn Querier,
    conninfo: &Conninfo,
    desc: &Descriptor,
    version: i32,
    sink: &Sink,
) -> Result<(), CollectError> {
    let res = querier.query(conninfo, DATA_DIRECTORY_SQL).await?;
    let data_dir = res
        .scalar()
        .ok_or_else(|| CollectError::Probe("data_directory unavailable".into()))?
        .to_string();

    let path = match desc.name {
        WAL_DIRECTORY => {
            if version > 0 && version < 100_000 {
                format!("{data_dir}/pg_xlog")
            } else {
                format!("{data_dir}/pg_wal")
            }
        }
        LOG_DIRECTORY => {
            let res = querier.query(conninfo, LOG_DIRECTORY_SQL).await?;
            let log_dir = res
                .scalar()
                .ok_or_else(|| CollectError::Probe("logging_collector is disabled".into()))?;
            if log_dir.starts_with('/') {
                log_dir.to_string()
            } else {
                format!("{data_dir}/{log_dir}")
            }
        }
        _ => data_dir,
    };

    let mounts = read_mounts().map_err(|e| CollectError::Probe(e.to_string()))?;
    let (device, mountpoint) = resolve_mountpoint(&mounts, &path)
        .ok_or_else(|| CollectError::Probe(format!("no mountpoint found for {path}")))?;

    sink.send(&desc.handles[0], vec![device, mountpoint, path], 1.0)
        .await?;
    Ok(())
}

fn read_mounts() -> io::Result<Vec<(String, String)>> {
    Ok(parse_mounts(&std::fs::read_to_string("/proc/mounts")?))
}

/// `(mountpoint, device)` pairs from /proc/mounts content.
fn parse_mounts(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mountpoint = fields.next()?;
            Some((mountpoint.to_string(), device.to_string()))
        })
        .collect()
}

/// Longest mountpoint that is a path-prefix of `path`.
pub(crate) fn resolve_mountpoint(
    mounts: &[(String, String)],
    path: &str,
) -> Option<(String, String)> {
    let parts: Vec<&str> = path.split('/').collect();
    for i in (1..=parts.len()).rev() {
        let candidate = parts[..i].join("/");
        let candidate = if candidate.is_empty() { "/" } else { &candidate };
        if let Some((mountpoint, device)) = mounts.iter().find(|(m, _)| m == candidate) {
            return Some((device.clone(), mountpoint.clone()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unit_sizes() {
        assert_eq!(parse_unit("B").unwrap(), (1.0, "bytes"));
        assert_eq!(parse_unit("kB").unwrap(), (1024.0, "bytes"));
        assert_eq!(parse_unit("8kB").unwrap(), (8192.0, "bytes"));
        assert_eq!(parse_unit("MB").unwrap(), (1048576.0, "bytes"));
        assert_eq!(parse_unit("GB").unwrap(), (1073741824.0, "bytes"));
        assert_eq!(parse_unit("TB").unwrap(), (1099511627776.0, "bytes"));
    }

    #[test]
    fn test_parse_unit_times() {
        assert_eq!(parse_unit("ms").unwrap(), (0.001, "seconds"));
        assert_eq!(parse_unit("s").unwrap(), (1.0, "seconds"));
        assert_eq!(parse_unit("min").unwrap(), (60.0, "seconds"));
        assert_eq!(parse_unit("h").unwrap(), (3600.0, "seconds"));
        assert_eq!(parse_unit("d").unwrap(), (86400.0, "seconds"));
    }

    #[test]
    fn test_parse_unit_empty_and_invalid() {
        assert_eq!(parse_unit("").unwrap(), (1.0, ""));
        assert!(parse_unit("parsecs").is_err());
        assert!(parse_unit("8 kB").is_err());
    }

    #[test]
    fn test_normalize_size_setting() {
        let n = normalize_setting("256", "MB", "integer").unwrap();
        assert_eq!(n.value, 268435456.0);
        assert_eq!(n.unit, "bytes");
        assert_eq!(n.setting, "268435456");
    }

    #[test]
    fn test_normalize_time_setting() {
        let n = normalize_setting("1500", "ms", "integer").unwrap();
        assert_eq!(n.value, 1.5);
        assert_eq!(n.unit, "seconds");
    }

    #[test]
    fn test_normalize_8kb_pages() {
        // shared_buffers style: value counted in 8kB pages
        let n = normalize_setting("16384", "8kB", "integer").unwrap();
        assert_eq!(n.value, 16384.0 * 8192.0);
        assert_eq!(n.unit, "bytes");
    }

    #[test]
    fn test_normalize_bool_setting() {
        assert_eq!(normalize_setting("on", "", "bool").unwrap().value, 1.0);
        assert_eq!(normalize_setting("off", "", "bool").unwrap().value, 0.0);
        assert!(normalize_setting("maybe", "", "bool").is_err());
    }

    #[test]
    fn test_normalize_negative_is_sentinel() {
        // old_snapshot_threshold = -1 means disabled; the factor must not apply
        let n = normalize_setting("-1", "min", "integer").unwrap();
        assert_eq!(n.value, -1.0);
    }

    #[test]
    fn test_normalize_string_passthrough() {
        let n = normalize_setting("replica", "", "enum").unwrap();
        assert_eq!(n.setting, "replica");
        assert_eq!(n.value, 0.0);
    }

    #[test]
    fn test_resolve_mountpoint_longest_prefix() {
        let mounts = vec![
            ("/".to_string(), "/dev/sda1".to_string()),
            ("/var".to_string(), "/dev/sda2".to_string()),
            ("/var/lib/postgresql".to_string(), "/dev/nvme0n1".to_string()),
        ];
        assert_eq!(
            resolve_mountpoint(&mounts, "/var/lib/postgresql/15/main"),
            Some(("/dev/nvme0n1".to_string(), "/var/lib/postgresql".to_string()))
        );
        assert_eq!(
            resolve_mountpoint(&mounts, "/var/log/postgresql"),
            Some(("/dev/sda2".to_string(), "/var".to_string()))
        );
        assert_eq!(
            resolve_mountpoint(&mounts, "/opt/data"),
            Some(("/dev/sda1".to_string(), "/".to_string()))
        );
    }

    #[test]
    fn test_parse_mounts() {
        let content = "/dev/sda1 / ext4 rw,relatime 0 0\n\
                       proc /proc proc rw 0 0\n";
        let mounts = parse_mounts(content);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0], ("/".to_string(), "/dev/sda1".to_string()));
    }
}
