//! Collector registry.
//!
//! The static, ordered catalog of every collector descriptor: its identity,
//! SQL source (with engine-version variants), label and value columns, and
//! scheduling attributes. The registry is built once at startup and never
//! mutated afterwards; version adaptation happens copy-on-read through
//! [`Descriptor::query_for`], and round/cadence state lives with the
//! scheduler and the service, so descriptors can be shared freely between
//! services running different engine versions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::collector::postgres;
use crate::metrics::filters::{FilterRule, LabelFilters};
use crate::metrics::{DescHandle, MetricKind};
use crate::service::ServiceKind;

/// Cadence for expensive, slowly-changing statistics.
pub const LONG_CADENCE: Duration = Duration::from_secs(300);

/// Where a descriptor's data comes from.
#[derive(Debug, Clone)]
pub enum Source {
    /// A SQL query; `pre10` replaces `base` on engines older than 10.
    Query {
        base: &'static str,
        pre10: Option<&'static str>,
    },
    /// A name-dispatched probe (filesystem, settings, host pseudo-files).
    Probe,
}

/// Static metadata describing one collector.
#[derive(Debug)]
pub struct Descriptor {
    /// Namespaced metric prefix, e.g. `postgres_stat_database`.
    pub name: &'static str,
    pub kind: ServiceKind,
    pub source: Source,
    /// Numeric output columns; each yields one metric named
    /// `<name>_<column>`. Empty means the descriptor emits under `name`
    /// itself.
    pub value_columns: &'static [&'static str],
    /// String columns that become label values, in order.
    pub label_columns: &'static [&'static str],
    pub metric_kind: MetricKind,
    /// Collect exactly once per round regardless of database fan-out.
    pub oneshot: bool,
    /// Minimum interval between executions; zero means every round.
    pub cadence: Duration,
    /// Pre-built handles, aligned with `value_columns` (a single handle for
    /// descriptors without value columns).
    pub handles: Vec<Arc<DescHandle>>,
    pub filters: Option<LabelFilters>,
}

impl Descriptor {
    /// Resolve the SQL for `version` without touching the descriptor.
    pub fn query_for(&self, version: i32) -> Option<&'static str> {
        match &self.source {
            Source::Query { base, pre10 } => {
                if version > 0 && version < 100_000 {
                    Some(pre10.unwrap_or(base))
                } else {
                    Some(base)
                }
            }
            Source::Probe => None,
        }
    }
}

/// The ordered, immutable descriptor catalog.
pub struct Registry {
    descriptors: Vec<Descriptor>,
}

impl Registry {
    /// Build the catalog, compiling any configured label filters.
    ///
    /// `filters` maps descriptor names to rule lists; an invalid pattern
    /// fails the build.
    pub fn build(filters: &HashMap<String, Vec<FilterRule>>) -> Result<Self, regex::Error> {
        let mut descriptors = catalog();
        for desc in &mut descriptors {
            if let Some(rules) = filters.get(desc.name) {
                desc.filters = Some(LabelFilters::compile(rules)?);
            }
        }
        Ok(Self { descriptors })
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Descriptor {
        &self.descriptors[idx]
    }

    /// Descriptors of one service kind, in registry order, with their
    /// registry indices (the scheduler keys round state by index).
    pub fn for_kind(&self, kind: ServiceKind) -> impl Iterator<Item = (usize, &Descriptor)> {
        self.descriptors
            .iter()
            .enumerate()
            .filter(move |(_, d)| d.kind == kind)
    }

    #[cfg(test)]
    pub fn find(&self, name: &str) -> Option<(usize, &Descriptor)> {
        self.descriptors
            .iter()
            .enumerate()
            .find(|(_, d)| d.name == name)
    }
}

struct DescOpts {
    name: &'static str,
    kind: ServiceKind,
    source: Source,
    value_columns: &'static [&'static str],
    label_columns: &'static [&'static str],
    metric_kind: MetricKind,
    oneshot: bool,
    cadence: Duration,
}

fn desc(opts: DescOpts) -> Descriptor {
    let handles = if opts.value_columns.is_empty() {
        vec![DescHandle::new(
            opts.name,
            help_text(opts.name),
            opts.metric_kind,
            opts.label_columns,
        )]
    } else {
        opts.value_columns
            .iter()
            .map(|col| {
                let metric_name = format!("{}_{}", opts.name, col);
                let help = help_text(&metric_name);
                DescHandle::new(metric_name, help, opts.metric_kind, opts.label_columns)
            })
            .collect()
    };
    Descriptor {
        name: opts.name,
        kind: opts.kind,
        source: opts.source,
        value_columns: opts.value_columns,
        label_columns: opts.label_columns,
        metric_kind: opts.metric_kind,
        oneshot: opts.oneshot,
        cadence: opts.cadence,
        handles,
        filters: None,
    }
}

fn query(base: &'static str) -> Source {
    Source::Query { base, pre10: None }
}

fn versioned(base: &'static str, pre10: &'static str) -> Source {
    Source::Query {
        base,
        pre10: Some(pre10),
    }
}

const EVERY_ROUND: Duration = Duration::ZERO;

fn catalog() -> Vec<Descriptor> {
    use MetricKind::{Counter, Gauge};
    use ServiceKind::{Pgbouncer, Postgres, System};

    vec![
        // Postgres, cluster-global statistics collected once per round.
        desc(DescOpts {
            name: "postgres_stat_database",
            kind: Postgres,
            source: query(postgres::STAT_DATABASE_SQL),
            value_columns: &[
                "xact_commit_total",
                "xact_rollback_total",
                "blks_read_total",
                "blks_hit_total",
                "tup_returned_total",
                "tup_fetched_total",
                "tup_inserted_total",
                "tup_updated_total",
                "tup_deleted_total",
                "conflicts_total",
                "temp_files_total",
                "temp_bytes_total",
                "deadlocks_total",
                "size_bytes",
                "stats_age_seconds",
            ],
            label_columns: &["database"],
            metric_kind: Counter,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_bgwriter",
            kind: Postgres,
            source: query(postgres::BGWRITER_SQL),
            value_columns: &[
                "checkpoints_timed_total",
                "checkpoints_req_total",
                "checkpoint_write_time_seconds_total",
                "checkpoint_sync_time_seconds_total",
                "buffers_checkpoint_total",
                "buffers_clean_total",
                "maxwritten_clean_total",
                "buffers_backend_total",
                "buffers_backend_fsync_total",
                "buffers_alloc_total",
            ],
            label_columns: &[],
            metric_kind: Counter,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_activity",
            kind: Postgres,
            source: query(postgres::ACTIVITY_SQL),
            value_columns: &[
                "conn_total",
                "conn_idle_total",
                "conn_idle_xact_total",
                "conn_active_total",
                "conn_waiting_total",
                "xact_max_seconds",
            ],
            label_columns: &[],
            metric_kind: Gauge,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_stat_statements",
            kind: Postgres,
            source: query(postgres::STAT_STATEMENTS_SQL),
            value_columns: &[
                "calls_total",
                "rows_total",
                "shared_blks_hit_total",
                "shared_blks_read_total",
                "temp_blks_read_total",
                "temp_blks_written_total",
            ],
            label_columns: &["user", "database", "queryid"],
            metric_kind: Counter,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_stat_replication",
            kind: Postgres,
            source: versioned(postgres::REPLICATION_SQL, postgres::REPLICATION_96_SQL),
            value_columns: &[
                "pending_lag_bytes",
                "write_lag_bytes",
                "flush_lag_bytes",
                "replay_lag_bytes",
                "write_lag_seconds",
                "flush_lag_seconds",
                "replay_lag_seconds",
            ],
            label_columns: &["client_addr", "application_name"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_replication_slots",
            kind: Postgres,
            source: versioned(
                postgres::REPLICATION_SLOTS_SQL,
                postgres::REPLICATION_SLOTS_96_SQL,
            ),
            value_columns: &["restart_lag_bytes"],
            label_columns: &["slot_name", "active"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_replication_standby",
            kind: Postgres,
            source: query(postgres::REPLICATION_STANDBY_SQL),
            value_columns: &["count"],
            label_columns: &[],
            metric_kind: Gauge,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_recovery",
            kind: Postgres,
            source: query(postgres::RECOVERY_SQL),
            value_columns: &["status"],
            label_columns: &[],
            metric_kind: Gauge,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_database_conflicts",
            kind: Postgres,
            source: query(postgres::DATABASE_CONFLICTS_SQL),
            value_columns: &["total"],
            label_columns: &["conflict"],
            metric_kind: Counter,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_wal",
            kind: Postgres,
            source: versioned(postgres::WAL_SIZE_SQL, postgres::WAL_SIZE_96_SQL),
            value_columns: &["size_bytes"],
            label_columns: &[],
            metric_kind: Gauge,
            oneshot: true,
            cadence: LONG_CADENCE,
        }),
        // Postgres, per-database statistics collected in every database.
        desc(DescOpts {
            name: "postgres_stat_user_tables",
            kind: Postgres,
            source: query(postgres::STAT_USER_TABLES_SQL),
            value_columns: &[
                "seq_scan_total",
                "seq_tup_read_total",
                "idx_scan_total",
                "idx_tup_fetch_total",
                "n_tup_ins_total",
                "n_tup_upd_total",
                "n_tup_del_total",
                "n_tup_hot_upd_total",
                "n_live_tup",
                "n_dead_tup",
                "vacuum_total",
                "autovacuum_total",
                "analyze_total",
                "autoanalyze_total",
            ],
            label_columns: &["database", "schema", "table"],
            metric_kind: Counter,
            oneshot: false,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_statio_user_tables",
            kind: Postgres,
            source: query(postgres::STATIO_USER_TABLES_SQL),
            value_columns: &[
                "heap_blks_read_total",
                "heap_blks_hit_total",
                "idx_blks_read_total",
                "idx_blks_hit_total",
            ],
            label_columns: &["database", "schema", "table"],
            metric_kind: Counter,
            oneshot: false,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_stat_user_indexes",
            kind: Postgres,
            source: query(postgres::STAT_USER_INDEXES_SQL),
            value_columns: &[
                "idx_scan_total",
                "idx_tup_read_total",
                "idx_tup_fetch_total",
            ],
            label_columns: &["database", "schema", "table", "index"],
            metric_kind: Counter,
            oneshot: false,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_statio_user_indexes",
            kind: Postgres,
            source: query(postgres::STATIO_USER_INDEXES_SQL),
            value_columns: &["idx_blks_read_total", "idx_blks_hit_total"],
            label_columns: &["database", "schema", "table", "index"],
            metric_kind: Counter,
            oneshot: false,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_stat_user_functions",
            kind: Postgres,
            source: query(postgres::STAT_USER_FUNCTIONS_SQL),
            value_columns: &[
                "calls_total",
                "total_time_seconds_total",
                "self_time_seconds_total",
            ],
            label_columns: &["database", "schema", "function"],
            metric_kind: Counter,
            oneshot: false,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "postgres_catalog_size",
            kind: Postgres,
            source: query(postgres::CATALOG_SIZE_SQL),
            value_columns: &["bytes"],
            label_columns: &["database"],
            metric_kind: Gauge,
            oneshot: false,
            cadence: LONG_CADENCE,
        }),
        // Schema health checks; expensive catalog scans on a long cadence.
        desc(DescOpts {
            name: "postgres_schema_non_pk_table",
            kind: Postgres,
            source: query(postgres::SCHEMA_NON_PK_TABLE_SQL),
            value_columns: &["exists"],
            label_columns: &["database", "schema", "table"],
            metric_kind: Gauge,
            oneshot: false,
            cadence: LONG_CADENCE,
        }),
        desc(DescOpts {
            name: "postgres_schema_invalid_index",
            kind: Postgres,
            source: query(postgres::SCHEMA_INVALID_INDEX_SQL),
            value_columns: &["bytes"],
            label_columns: &["database", "schema", "table", "index"],
            metric_kind: Gauge,
            oneshot: false,
            cadence: LONG_CADENCE,
        }),
        desc(DescOpts {
            name: "postgres_schema_non_indexed_fkey",
            kind: Postgres,
            source: query(postgres::SCHEMA_NON_INDEXED_FKEY_SQL),
            value_columns: &["exists"],
            label_columns: &["database", "schema", "table", "constraint"],
            metric_kind: Gauge,
            oneshot: false,
            cadence: LONG_CADENCE,
        }),
        desc(DescOpts {
            name: "postgres_schema_sequence_fullness",
            kind: Postgres,
            source: versioned(
                postgres::SCHEMA_SEQUENCE_FULLNESS_SQL,
                postgres::SCHEMA_SEQUENCE_FULLNESS_96_SQL,
            ),
            value_columns: &["ratio"],
            label_columns: &["database", "schema", "sequence"],
            metric_kind: Gauge,
            oneshot: false,
            cadence: LONG_CADENCE,
        }),
        // Postgres probes.
        desc(DescOpts {
            name: postgres::SETTINGS,
            kind: Postgres,
            source: Source::Probe,
            value_columns: &[],
            label_columns: &["name", "setting", "unit", "vartype"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: LONG_CADENCE,
        }),
        desc(DescOpts {
            name: postgres::DATA_DIRECTORY,
            kind: Postgres,
            source: Source::Probe,
            value_columns: &[],
            label_columns: &["device", "mountpoint", "path"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: LONG_CADENCE,
        }),
        desc(DescOpts {
            name: postgres::WAL_DIRECTORY,
            kind: Postgres,
            source: Source::Probe,
            value_columns: &[],
            label_columns: &["device", "mountpoint", "path"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: LONG_CADENCE,
        }),
        desc(DescOpts {
            name: postgres::LOG_DIRECTORY,
            kind: Postgres,
            source: Source::Probe,
            value_columns: &[],
            label_columns: &["device", "mountpoint", "path"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: LONG_CADENCE,
        }),
        // PgBouncer admin console; one "database" entity per round.
        desc(DescOpts {
            name: "pgbouncer_pools",
            kind: Pgbouncer,
            source: query("SHOW POOLS"),
            value_columns: &[
                "cl_active",
                "cl_waiting",
                "sv_active",
                "sv_idle",
                "sv_used",
                "sv_tested",
                "sv_login",
                "maxwait",
            ],
            label_columns: &["database", "user", "pool_mode"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "pgbouncer_stats",
            kind: Pgbouncer,
            source: query("SHOW STATS_TOTALS"),
            value_columns: &[
                "xact_count",
                "query_count",
                "bytes_received",
                "bytes_sent",
                "xact_time",
                "query_time",
                "wait_time",
            ],
            label_columns: &["database"],
            metric_kind: Counter,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        // Host; there is no database entity, so everything is oneshot.
        desc(DescOpts {
            name: "node_cpu",
            kind: System,
            source: Source::Probe,
            value_columns: &["seconds_total"],
            label_columns: &["mode"],
            metric_kind: Counter,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "node_memory",
            kind: System,
            source: Source::Probe,
            value_columns: &[],
            label_columns: &[],
            metric_kind: Gauge,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "node_disk",
            kind: System,
            source: Source::Probe,
            value_columns: &[
                "reads_completed_total",
                "reads_merged_total",
                "read_bytes_total",
                "read_time_seconds_total",
                "writes_completed_total",
                "writes_merged_total",
                "written_bytes_total",
                "write_time_seconds_total",
                "io_time_seconds_total",
            ],
            label_columns: &["device"],
            metric_kind: Counter,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "node_network",
            kind: System,
            source: Source::Probe,
            value_columns: &[
                "receive_bytes_total",
                "receive_packets_total",
                "receive_errors_total",
                "receive_dropped_total",
                "transmit_bytes_total",
                "transmit_packets_total",
                "transmit_errors_total",
                "transmit_dropped_total",
            ],
            label_columns: &["device"],
            metric_kind: Counter,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "node_filesystem",
            kind: System,
            source: Source::Probe,
            value_columns: &["size_bytes", "avail_bytes"],
            label_columns: &["device", "mountpoint", "fstype"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "node_uptime_seconds",
            kind: System,
            source: Source::Probe,
            value_columns: &[],
            label_columns: &[],
            metric_kind: Counter,
            oneshot: true,
            cadence: EVERY_ROUND,
        }),
        desc(DescOpts {
            name: "node_settings",
            kind: System,
            source: Source::Probe,
            value_columns: &["sysctl"],
            label_columns: &["sysctl"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: LONG_CADENCE,
        }),
        desc(DescOpts {
            name: "node_hardware_cores",
            kind: System,
            source: Source::Probe,
            value_columns: &["total"],
            label_columns: &["state"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: LONG_CADENCE,
        }),
        desc(DescOpts {
            name: "node_hardware_scaling_governors",
            kind: System,
            source: Source::Probe,
            value_columns: &["total"],
            label_columns: &["governor"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: LONG_CADENCE,
        }),
        desc(DescOpts {
            name: "node_hardware_numa",
            kind: System,
            source: Source::Probe,
            value_columns: &["nodes"],
            label_columns: &[],
            metric_kind: Gauge,
            oneshot: true,
            cadence: LONG_CADENCE,
        }),
        desc(DescOpts {
            name: "node_hardware_storage_rotational",
            kind: System,
            source: Source::Probe,
            value_columns: &[],
            label_columns: &["device", "scheduler"],
            metric_kind: Gauge,
            oneshot: true,
            cadence: LONG_CADENCE,
        }),
    ]
}

fn help_text(metric_name: &str) -> String {
    match metric_name {
        "postgres_stat_database_xact_commit_total" => {
            "Total number of transactions committed.".to_string()
        }
        "postgres_stat_database_xact_rollback_total" => {
            "Total number of transactions rolled back.".to_string()
        }
        "postgres_stat_database_size_bytes" => "Total size of the database, in bytes.".to_string(),
        "postgres_stat_database_deadlocks_total" => {
            "Total number of deadlocks detected.".to_string()
        }
        "postgres_bgwriter_checkpoints_timed_total" => {
            "Total number of scheduled checkpoints performed.".to_string()
        }
        "postgres_bgwriter_checkpoints_req_total" => {
            "Total number of requested checkpoints performed.".to_string()
        }
        "postgres_activity_conn_total" => "Number of client backends.".to_string(),
        "postgres_wal_size_bytes" => "Total size of WAL segments, in bytes.".to_string(),
        "postgres_settings" => {
            "Labeled information about Postgres configuration settings.".to_string()
        }
        "postgres_data_directory" => {
            "Filesystem placement of the Postgres data directory.".to_string()
        }
        "postgres_wal_directory" => {
            "Filesystem placement of the Postgres WAL directory.".to_string()
        }
        "postgres_log_directory" => {
            "Filesystem placement of the Postgres log directory.".to_string()
        }
        "postgres_stat_statements_calls_total" => {
            "Total number of times each statement was executed.".to_string()
        }
        "postgres_recovery_status" => "Whether the server is in recovery (standby).".to_string(),
        "postgres_replication_standby_count" => "Number of connected standby servers.".to_string(),
        "postgres_catalog_size_bytes" => {
            "Total size of system catalog relations, in bytes.".to_string()
        }
        "postgres_schema_non_pk_table_exists" => {
            "Tables without a primary or unique key.".to_string()
        }
        "postgres_schema_invalid_index_bytes" => "Size of invalid indexes, in bytes.".to_string(),
        "postgres_schema_non_indexed_fkey_exists" => {
            "Foreign key constraints without a covering index.".to_string()
        }
        "postgres_schema_sequence_fullness_ratio" => {
            "Fraction of each sequence's value space already consumed.".to_string()
        }
        "node_hardware_cores_total" => "CPU cores by operational state.".to_string(),
        "node_hardware_numa_nodes" => "Number of configured NUMA nodes.".to_string(),
        "node_hardware_storage_rotational" => {
            "Whether a block device is rotational, with its IO scheduler.".to_string()
        }
        "node_cpu_seconds_total" => "Seconds the CPUs spent in each mode.".to_string(),
        "node_uptime_seconds" => "Seconds since system boot.".to_string(),
        "node_filesystem_size_bytes" => "Filesystem size, in bytes.".to_string(),
        "node_filesystem_avail_bytes" => {
            "Filesystem space available to unprivileged users, in bytes.".to_string()
        }
        "node_settings_sysctl" => "Labeled values of kernel tunables.".to_string(),
        other => format!("Value of {other}."),
    }
}
