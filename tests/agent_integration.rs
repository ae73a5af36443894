//! Scheduler and dispatch integration tests.
//!
//! Scheduler scenarios run against a mock querier with canned result sets
//! and a log of executed SQL; push scenarios run against a local HTTP
//! server. No real database is required.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use panoptes::collector::{Scheduler, postgres};
use panoptes::dispatch::push::{PushConfig, push_once};
use panoptes::metrics::{MetricPoint, Sink, exposition};
use panoptes::registry::Registry;
use panoptes::service::{Service, ServiceRepo};
use panoptes::store::{Conninfo, Querier, SqlResult, StoreError};
use tokio::sync::mpsc;

// =============================================================================
// Test Helpers
// =============================================================================

/// Querier returning canned result sets, keyed by (database, sql).
///
/// A response registered under database `*` answers for any database. When
/// several responses are queued for one key they are consumed in order,
/// with the last one repeating.
struct MockQuerier {
    responses: Mutex<HashMap<(String, String), VecDeque<SqlResult>>>,
    log: Mutex<Vec<(String, String)>>,
}

impl MockQuerier {
    fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    fn respond(&self, sql: &str, result: SqlResult) {
        self.respond_for_db("*", sql, result);
    }

    fn respond_for_db(&self, db: &str, sql: &str, result: SqlResult) {
        self.responses
            .lock()
            .unwrap()
            .entry((db.to_string(), sql.to_string()))
            .or_default()
            .push_back(result);
    }

    /// Executed SQL statements, in order.
    fn executed(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(_, sql)| sql.clone()).collect()
    }

    fn executed_count(&self, sql: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|(_, s)| s == sql).count()
    }
}

#[async_trait]
impl Querier for MockQuerier {
    async fn query(&self, conninfo: &Conninfo, sql: &str) -> Result<SqlResult, StoreError> {
        let db = conninfo.database.clone();
        self.log.lock().unwrap().push((db.clone(), sql.to_string()));

        let mut responses = self.responses.lock().unwrap();
        let key = (db, sql.to_string());
        let key = if responses.contains_key(&key) {
            key
        } else {
            ("*".to_string(), sql.to_string())
        };
        let queue = responses
            .get_mut(&key)
            .ok_or_else(|| StoreError::Unavailable(format!("no canned response for: {sql}")))?;

        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap_or_default())
        } else {
            Ok(queue.front().cloned().unwrap_or_default())
        }
    }
}

fn version_result(version: &str) -> SqlResult {
    SqlResult::new(&["server_version_num"], vec![vec![Some(version.into())]])
}

fn databases_result(names: &[&str]) -> SqlResult {
    SqlResult::new(
        &["database"],
        names.iter().map(|n| vec![Some(n.to_string())]).collect(),
    )
}

fn scheduler_with(querier: Arc<MockQuerier>) -> Scheduler {
    let registry = Arc::new(Registry::build(&HashMap::new()).unwrap());
    Scheduler::new(registry, querier)
}

async fn run_one_round(scheduler: &Scheduler, service: &Service) -> Vec<MetricPoint> {
    let (tx, mut rx) = mpsc::channel(4096);
    let sink = Sink::new(tx, &service.id);
    scheduler.run_round(service, &sink).await;
    drop(sink);

    let mut points = Vec::new();
    while let Some(point) = rx.recv().await {
        points.push(point);
    }
    points
}

fn points_named<'a>(points: &'a [MetricPoint], name: &str) -> Vec<&'a MetricPoint> {
    points
        .iter()
        .filter(|p| p.desc.metric_name == name)
        .collect()
}

// =============================================================================
// Scheduler Scenarios
// =============================================================================

#[tokio::test]
async fn test_oneshot_collected_once_across_database_fanout() {
    let querier = Arc::new(MockQuerier::new());
    querier.respond(postgres::VERSION_SQL, version_result("150004"));
    querier.respond(postgres::DATABASES_SQL, databases_result(&["a", "b", "c"]));
    querier.respond(
        postgres::BGWRITER_SQL,
        SqlResult::new(&["checkpoints_timed_total"], vec![vec![Some("10".into())]]),
    );
    for db in ["a", "b", "c"] {
        querier.respond_for_db(
            db,
            postgres::STAT_USER_TABLES_SQL,
            SqlResult::new(
                &["database", "schema", "table", "seq_scan_total"],
                vec![vec![
                    Some(db.into()),
                    Some("public".into()),
                    Some("events".into()),
                    Some("7".into()),
                ]],
            ),
        );
    }

    let scheduler = scheduler_with(Arc::clone(&querier));
    let service = Service::postgres("127.0.0.1", 5432, "monitor", "secret", "postgres");
    let points = run_one_round(&scheduler, &service).await;

    // oneshot: exactly one bgwriter sample despite three databases
    let bgwriter = points_named(&points, "postgres_bgwriter_checkpoints_timed_total");
    assert_eq!(bgwriter.len(), 1);
    assert_eq!(querier.executed_count(postgres::BGWRITER_SQL), 1);

    // per-database: one set of user-table samples per database
    let tables = points_named(&points, "postgres_stat_user_tables_seq_scan_total");
    let databases: HashSet<&str> = tables.iter().map(|p| p.label_values[0].as_str()).collect();
    assert_eq!(databases, HashSet::from(["a", "b", "c"]));
    assert_eq!(querier.executed_count(postgres::STAT_USER_TABLES_SQL), 3);
}

#[tokio::test]
async fn test_stat_statements_retries_next_database_when_unavailable() {
    let querier = Arc::new(MockQuerier::new());
    querier.respond(postgres::VERSION_SQL, version_result("150004"));
    querier.respond(postgres::DATABASES_SQL, databases_result(&["a", "b"]));
    // the extension is only installed in "b"; querying "a" fails
    querier.respond_for_db(
        "b",
        postgres::STAT_STATEMENTS_SQL,
        SqlResult::new(
            &["user", "database", "queryid", "calls_total"],
            vec![vec![
                Some("app".into()),
                Some("b".into()),
                Some("123".into()),
                Some("55".into()),
            ]],
        ),
    );

    let scheduler = scheduler_with(Arc::clone(&querier));
    let service = Service::postgres("127.0.0.1", 5432, "monitor", "secret", "postgres");
    let points = run_one_round(&scheduler, &service).await;

    // the failed database does not consume the oneshot; the next one does
    let calls = points_named(&points, "postgres_stat_statements_calls_total");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].label_values, vec!["app", "b", "123"]);
    assert_eq!(querier.executed_count(postgres::STAT_STATEMENTS_SQL), 2);
}

#[tokio::test]
async fn test_version_adaptation_switches_query_variant() {
    let querier = Arc::new(MockQuerier::new());
    // first round reports 9.6, the next one 10.0
    querier.respond(postgres::VERSION_SQL, version_result("90620"));
    querier.respond(postgres::VERSION_SQL, version_result("100005"));
    querier.respond(postgres::DATABASES_SQL, databases_result(&["postgres"]));
    querier.respond(
        postgres::REPLICATION_SQL,
        SqlResult::new(&["client_addr", "application_name"], vec![]),
    );
    querier.respond(
        postgres::REPLICATION_96_SQL,
        SqlResult::new(&["client_addr", "application_name"], vec![]),
    );

    let scheduler = scheduler_with(Arc::clone(&querier));
    let service = Service::postgres("127.0.0.1", 5432, "monitor", "secret", "postgres");

    run_one_round(&scheduler, &service).await;
    let first_round = querier.executed();
    assert!(first_round.iter().any(|sql| sql == postgres::REPLICATION_96_SQL));
    assert!(!first_round.iter().any(|sql| sql == postgres::REPLICATION_SQL));

    run_one_round(&scheduler, &service).await;
    let all = querier.executed();
    let second_round = &all[first_round.len()..];
    assert!(second_round.iter().any(|sql| sql == postgres::REPLICATION_SQL));
    assert!(!second_round.iter().any(|sql| sql == postgres::REPLICATION_96_SQL));
}

#[tokio::test(start_paused = true)]
async fn test_cadence_limits_invocations_across_rounds() {
    let querier = Arc::new(MockQuerier::new());
    querier.respond(postgres::VERSION_SQL, version_result("150004"));
    querier.respond(postgres::DATABASES_SQL, databases_result(&["postgres"]));
    querier.respond(
        postgres::WAL_SIZE_SQL,
        SqlResult::new(&["size_bytes"], vec![vec![Some("1024".into())]]),
    );

    let scheduler = scheduler_with(Arc::clone(&querier));
    let service = Service::postgres("127.0.0.1", 5432, "monitor", "secret", "postgres");

    // ten rounds at one-minute intervals; the 5-minute cadence admits two
    for round in 0..10 {
        if round > 0 {
            tokio::time::advance(Duration::from_secs(60)).await;
        }
        run_one_round(&scheduler, &service).await;
    }

    assert_eq!(querier.executed_count(postgres::WAL_SIZE_SQL), 2);
    // every-round descriptors are not throttled by others' cadence
    assert_eq!(querier.executed_count(postgres::VERSION_SQL), 10);
}

#[tokio::test]
async fn test_zero_user_databases_still_runs_global_collectors_once() {
    let querier = Arc::new(MockQuerier::new());
    querier.respond(postgres::VERSION_SQL, version_result("150004"));
    querier.respond(postgres::DATABASES_SQL, databases_result(&[]));
    querier.respond(
        postgres::BGWRITER_SQL,
        SqlResult::new(&["checkpoints_timed_total"], vec![vec![Some("5".into())]]),
    );

    let scheduler = scheduler_with(Arc::clone(&querier));
    let service = Service::postgres("127.0.0.1", 5432, "monitor", "secret", "postgres");
    let points = run_one_round(&scheduler, &service).await;

    let bgwriter = points_named(&points, "postgres_bgwriter_checkpoints_timed_total");
    assert_eq!(bgwriter.len(), 1);
    assert_eq!(querier.executed_count(postgres::BGWRITER_SQL), 1);
}

#[tokio::test]
async fn test_pgbouncer_round_uses_admin_database() {
    let querier = Arc::new(MockQuerier::new());
    querier.respond(
        "SHOW POOLS",
        SqlResult::new(
            &["database", "user", "pool_mode", "cl_active", "cl_waiting"],
            vec![vec![
                Some("appdb".into()),
                Some("app".into()),
                Some("transaction".into()),
                Some("4".into()),
                Some("0".into()),
            ]],
        ),
    );
    querier.respond(
        "SHOW STATS_TOTALS",
        SqlResult::new(
            &["database", "xact_count"],
            vec![vec![Some("appdb".into()), Some("9000".into())]],
        ),
    );

    let scheduler = scheduler_with(Arc::clone(&querier));
    let service = Service::pgbouncer("127.0.0.1", 6432, "pgbouncer", "secret");
    let points = run_one_round(&scheduler, &service).await;

    let pools = points_named(&points, "pgbouncer_pools_cl_active");
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0].label_values, vec!["appdb", "app", "transaction"]);
    assert_eq!(
        points_named(&points, "pgbouncer_stats_xact_count")[0].value,
        9000.0
    );
    // no version probe against the admin console
    assert_eq!(querier.executed_count(postgres::VERSION_SQL), 0);
}

// =============================================================================
// Push Dispatch
// =============================================================================

#[derive(Clone)]
struct PushTarget {
    hits: Arc<AtomicUsize>,
    jobs: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<String>>>,
    status: axum::http::StatusCode,
}

async fn start_push_target(status: axum::http::StatusCode) -> (String, PushTarget) {
    use axum::extract::{Path, State};
    use axum::routing::post;

    let target = PushTarget {
        hits: Arc::new(AtomicUsize::new(0)),
        jobs: Arc::new(Mutex::new(Vec::new())),
        bodies: Arc::new(Mutex::new(Vec::new())),
        status,
    };

    async fn handler(
        State(target): State<PushTarget>,
        Path(job): Path<String>,
        body: String,
    ) -> axum::http::StatusCode {
        target.hits.fetch_add(1, Ordering::SeqCst);
        target.jobs.lock().unwrap().push(job);
        target.bodies.lock().unwrap().push(body);
        target.status
    }

    let app = axum::Router::new()
        .route("/metrics/job/{job}", post(handler))
        .with_state(target.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), target)
}

fn push_config(url: String) -> PushConfig {
    PushConfig {
        url,
        api_key: None,
        interval: Duration::from_secs(60),
        identity: "testhost".to_string(),
        base_labels: Arc::new(vec![("machine_id".to_string(), "testhost".to_string())]),
    }
}

#[tokio::test]
async fn test_push_payload_and_job_label() {
    let (url, target) = start_push_target(axum::http::StatusCode::OK).await;

    let repo = ServiceRepo::new();
    repo.insert(Service::system()).await;

    let querier = Arc::new(MockQuerier::new());
    let scheduler = Arc::new(scheduler_with(querier));
    let client = reqwest::Client::new();

    push_once(&client, &push_config(url), &repo, &scheduler).await;

    assert_eq!(target.hits.load(Ordering::SeqCst), 1);
    assert_eq!(target.jobs.lock().unwrap()[0], "db_system_testhost_system");

    // the payload is well-formed exposition text carrying the identity label
    let body = target.bodies.lock().unwrap()[0].clone();
    let families = exposition::parse(&body).unwrap();
    assert!(families.iter().any(|f| f.name == "node_uptime_seconds"));
    for family in &families {
        for sample in &family.samples {
            assert!(sample
                .labels
                .contains(&("machine_id".to_string(), "testhost".to_string())));
        }
    }
}

#[tokio::test]
async fn test_push_failure_is_dropped_not_retried() {
    let (url, target) = start_push_target(axum::http::StatusCode::SERVICE_UNAVAILABLE).await;

    let repo = ServiceRepo::new();
    repo.insert(Service::system()).await;

    let querier = Arc::new(MockQuerier::new());
    let scheduler = Arc::new(scheduler_with(querier));
    let client = reqwest::Client::new();
    let config = push_config(url);

    // tick N fails with 503; tick N+1 still fires exactly once
    push_once(&client, &config, &repo, &scheduler).await;
    assert_eq!(target.hits.load(Ordering::SeqCst), 1);

    push_once(&client, &config, &repo, &scheduler).await;
    assert_eq!(target.hits.load(Ordering::SeqCst), 2);
}
