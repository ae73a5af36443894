//! Collector Orchestration
//!
//! The scheduler drives one collection round for one service: it probes the
//! engine (version, database list), walks the registry in order honoring
//! oneshot and cadence rules, fans per-database collectors out across user
//! databases, and recovers collector failures so the rest of the round
//! proceeds.
//!
//! # Round state
//!
//! The "collected this round" flags live in a per-round vector and the
//! per-descriptor last-run instants live on the service, never on the
//! shared descriptors. Cadence expirations are applied in a second phase
//! after the database loop, only for descriptors that actually ran, so a
//! per-database collector is never suppressed halfway through its own
//! fan-out.

pub mod node;
pub mod postgres;

use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;

use crate::metrics::{Sink, SinkClosed};
use crate::registry::{Descriptor, Registry, Source};
use crate::service::{Service, ServiceKind};
use crate::store::{Querier, SqlResult, StoreError};

/// Errors surfaced by collectors and recovered by the scheduler.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Connect or query failure against the service.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The dispatcher tore down the sink; the round must abort cleanly.
    #[error(transparent)]
    Sink(#[from] SinkClosed),

    /// A probe collector could not produce its data.
    #[error("probe failed: {0}")]
    Probe(String),
}

/// Per-round orchestrator shared by both dispatch modes.
pub struct Scheduler {
    registry: Arc<Registry>,
    querier: Arc<dyn Querier>,
}

impl Scheduler {
    pub fn new(registry: Arc<Registry>, querier: Arc<dyn Querier>) -> Self {
        Self { registry, querier }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run one collection round for `service`, emitting into `sink`.
    ///
    /// Collector failures are warnings; only a closed sink aborts the round.
    pub async fn run_round(&self, service: &Service, sink: &Sink) {
        let (version, databases) = match service.kind {
            ServiceKind::Postgres => match self.probe_postgres(service).await {
                Ok(probe) => probe,
                Err(e) => {
                    tracing::warn!(service = %service.id, error = %e,
                        "skipping collection round, probe failed");
                    return;
                }
            },
            ServiceKind::Pgbouncer => (0, vec![service.default_db.clone()]),
            ServiceKind::System => (0, vec![String::new()]),
        };

        let mut done = vec![false; self.registry.len()];
        let last_runs = service.last_runs();
        let started = Instant::now();

        'round: for db in &databases {
            for (idx, desc) in self.registry.for_kind(service.kind) {
                if !desc.cadence.is_zero() {
                    if let Some(last) = last_runs.get(&idx) {
                        if started.duration_since(*last) < desc.cadence {
                            continue;
                        }
                    }
                }
                if desc.oneshot && done[idx] {
                    continue;
                }

                match self.run_descriptor(desc, service, db, version, sink).await {
                    Ok(()) => done[idx] = true,
                    Err(CollectError::Sink(_)) => {
                        tracing::debug!(service = %service.id, "sink closed, aborting round");
                        break 'round;
                    }
                    Err(e) => {
                        tracing::warn!(service = %service.id, collector = desc.name,
                            database = %db, error = %e, "collector failed");
                    }
                }
            }
        }

        // Second phase: expire schedules only for descriptors that ran.
        let finished = Instant::now();
        service.record_runs(
            done.iter().enumerate().filter_map(|(idx, ran)| {
                (*ran && !self.registry.get(idx).cadence.is_zero()).then_some(idx)
            }),
            finished,
        );
    }

    /// Round-opening probe for Postgres services: engine version (the SQL
    /// variants depend on it, and it can change under us on a live upgrade)
    /// and the user database list for the fan-out.
    async fn probe_postgres(&self, service: &Service) -> Result<(i32, Vec<String>), CollectError> {
        let conninfo = service.conninfo();

        let res = self.querier.query(&conninfo, postgres::VERSION_SQL).await?;
        let version: i32 = res
            .scalar()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CollectError::Probe("unreadable server_version_num".into()))?;

        let databases = match self.querier.query(&conninfo, postgres::DATABASES_SQL).await {
            Ok(res) => {
                let col = res.column("database").unwrap_or(0);
                res.rows
                    .iter()
                    .filter_map(|row| row.get(col).cloned().flatten())
                    .collect()
            }
            Err(e) => {
                tracing::warn!(service = %service.id, error = %e,
                    "database list unavailable, falling back to default database");
                Vec::new()
            }
        };

        // Zero user databases still gets one pass, so the global oneshot
        // statistics are emitted exactly once.
        let databases = if databases.is_empty() {
            vec![service.default_db.clone()]
        } else {
            databases
        };
        Ok((version, databases))
    }

    async fn run_descriptor(
        &self,
        desc: &Descriptor,
        service: &Service,
        db: &str,
        version: i32,
        sink: &Sink,
    ) -> Result<(), CollectError> {
        match &desc.source {
            Source::Query { .. } => {
                let Some(sql) = desc.query_for(version) else {
                    return Ok(());
                };
                let conninfo = service.conninfo_for(db);
                let res = self.querier.query(&conninfo, sql).await?;
                emit_rows(desc, &res, sink).await
            }
            Source::Probe => match service.kind {
                ServiceKind::System => node::collect(desc, sink).await,
                ServiceKind::Postgres => {
                    let conninfo = service.conninfo_for(db);
                    if desc.name == postgres::SETTINGS {
                        postgres::collect_settings(self.querier.as_ref(), &conninfo, desc, sink)
                            .await
                    } else {
                        postgres::collect_directory(
                            self.querier.as_ref(),
                            &conninfo,
                            desc,
                            version,
                            sink,
                        )
                        .await
                    }
                }
                ServiceKind::Pgbouncer => {
                    Err(CollectError::Probe(format!("no probe named {}", desc.name)))
                }
            },
        }
    }
}

/// Turn a query result into metric points.
///
/// Labels are read by column name in `label_columns` order; each value
/// column parses as f64, with NULL and unparsable values skipped silently.
/// Points are emitted in row-iteration order.
pub(crate) async fn emit_rows(
    desc: &Descriptor,
    res: &SqlResult,
    sink: &Sink,
) -> Result<(), CollectError> {
    let label_idx: Vec<Option<usize>> = desc
        .label_columns
        .iter()
        .map(|name| res.column(name))
        .collect();

    for row in &res.rows {
        let label_values: Vec<String> = label_idx
            .iter()
            .map(|idx| {
                idx.and_then(|i| row.get(i).cloned().flatten())
                    .unwrap_or_default()
            })
            .collect();

        if let Some(filters) = &desc.filters {
            if !filters.allows(desc.label_columns, &label_values) {
                continue;
            }
        }

        for (vi, column) in desc.value_columns.iter().enumerate() {
            let Some(ci) = res.column(column) else {
                continue;
            };
            let Some(raw) = row.get(ci).and_then(|v| v.as_deref()) else {
                continue;
            };
            let Ok(value) = raw.parse::<f64>() else {
                tracing::debug!(metric = %desc.handles[vi].metric_name, raw,
                    "skipping unparsable value");
                continue;
            };
            sink.send(&desc.handles[vi], label_values.clone(), value)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricPoint;
    use crate::metrics::filters::{FilterRule, LabelFilters};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn test_registry() -> Registry {
        Registry::build(&HashMap::new()).unwrap()
    }

    fn sink() -> (Sink, mpsc::Receiver<MetricPoint>) {
        let (tx, rx) = mpsc::channel(256);
        (Sink::new(tx, "postgres_5432"), rx)
    }

    fn drain(mut rx: mpsc::Receiver<MetricPoint>) -> Vec<MetricPoint> {
        let mut points = Vec::new();
        while let Ok(p) = rx.try_recv() {
            points.push(p);
        }
        points
    }

    #[tokio::test]
    async fn test_emit_rows_label_vector_matches_descriptor() {
        let registry = test_registry();
        let (_, desc) = registry.find("postgres_stat_database").unwrap();
        let res = SqlResult::new(
            &["database", "xact_commit_total", "size_bytes"],
            vec![vec![
                Some("appdb".into()),
                Some("42".into()),
                Some("1048576".into()),
            ]],
        );

        let (sink, rx) = sink();
        emit_rows(desc, &res, &sink).await.unwrap();
        let points = drain(rx);

        assert_eq!(points.len(), 2);
        for point in &points {
            assert_eq!(point.label_values.len(), desc.label_columns.len());
            assert_eq!(point.label_values[0], "appdb");
        }
        assert_eq!(
            points[0].desc.metric_name,
            "postgres_stat_database_xact_commit_total"
        );
        assert_eq!(points[0].value, 42.0);
    }

    #[tokio::test]
    async fn test_emit_rows_zero_rows_emits_nothing() {
        let registry = test_registry();
        let (_, desc) = registry.find("postgres_bgwriter").unwrap();
        let res = SqlResult::new(&["checkpoints_timed_total"], vec![]);

        let (sink, rx) = sink();
        emit_rows(desc, &res, &sink).await.unwrap();
        assert!(drain(rx).is_empty());
    }

    #[tokio::test]
    async fn test_emit_rows_skips_null_and_unparsable() {
        let registry = test_registry();
        let (_, desc) = registry.find("postgres_stat_database").unwrap();
        let res = SqlResult::new(
            &[
                "database",
                "xact_commit_total",
                "xact_rollback_total",
                "deadlocks_total",
            ],
            vec![vec![
                Some("appdb".into()),
                None,
                Some("not-a-number".into()),
                Some("3".into()),
            ]],
        );

        let (sink, rx) = sink();
        emit_rows(desc, &res, &sink).await.unwrap();
        let points = drain(rx);
        assert_eq!(points.len(), 1);
        assert_eq!(
            points[0].desc.metric_name,
            "postgres_stat_database_deadlocks_total"
        );
    }

    #[tokio::test]
    async fn test_emit_rows_filter_rejects_all_rows() {
        let registry = test_registry();
        let (_, base) = registry.find("postgres_stat_database").unwrap();
        let filters = LabelFilters::compile(&[FilterRule {
            label: "database".to_string(),
            include: None,
            exclude: Some("^temp".to_string()),
        }])
        .unwrap();
        let desc = Descriptor {
            name: base.name,
            kind: base.kind,
            source: base.source.clone(),
            value_columns: base.value_columns,
            label_columns: base.label_columns,
            metric_kind: base.metric_kind,
            oneshot: base.oneshot,
            cadence: base.cadence,
            handles: base.handles.clone(),
            filters: Some(filters),
        };

        let res = SqlResult::new(
            &["database", "xact_commit_total"],
            vec![vec![Some("tempdb".into()), Some("42".into())]],
        );

        let (sink, rx) = sink();
        emit_rows(&desc, &res, &sink).await.unwrap();
        assert!(drain(rx).is_empty());
    }

    #[tokio::test]
    async fn test_emit_rows_row_order_preserved() {
        let registry = test_registry();
        let (_, desc) = registry.find("postgres_replication_slots").unwrap();
        let res = SqlResult::new(
            &["slot_name", "active", "restart_lag_bytes"],
            vec![
                vec![Some("slot_a".into()), Some("true".into()), Some("1".into())],
                vec![Some("slot_b".into()), Some("false".into()), Some("2".into())],
            ],
        );

        let (sink, rx) = sink();
        emit_rows(desc, &res, &sink).await.unwrap();
        let points = drain(rx);
        assert_eq!(points[0].label_values[0], "slot_a");
        assert_eq!(points[1].label_values[0], "slot_b");
    }
}
