//! Services and the service repository.
//!
//! A service is a discovered endpoint plus its connection context. The
//! repository is the live set of services: discovery writes it, the
//! scheduler reads consistent snapshots from it.

pub mod discovery;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::store::Conninfo;

/// Kind of a discovered endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// A PostgreSQL server.
    Postgres,
    /// A PgBouncer connection pooler.
    Pgbouncer,
    /// The host itself; exactly one such service exists.
    System,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Pgbouncer => "pgbouncer",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic service id: equal inputs always produce equal ids.
pub fn service_id(kind: ServiceKind, port: u16) -> String {
    match kind {
        ServiceKind::System => "system".to_string(),
        kind => format!("{}_{}", kind.as_str(), port),
    }
}

/// A discovered endpoint and its connection context.
pub struct Service {
    pub id: Arc<str>,
    pub kind: ServiceKind,
    pub host: String,
    pub port: u16,
    /// Database discovery confirmed the endpoint with; the per-round probe
    /// connection and the fallback fan-out target.
    pub default_db: String,
    /// `server_version_num` at discovery time; 0 for non-Postgres kinds.
    /// The scheduler re-reads it each round, a live upgrade can change it.
    pub version: i32,
    user: String,
    password: String,
    /// Per-descriptor last-run instants, keyed by registry index. Kept off
    /// the descriptor so services of different versions never share state.
    schedule: Mutex<HashMap<usize, Instant>>,
}

impl Service {
    pub fn postgres(host: &str, port: u16, user: &str, password: &str, default_db: &str) -> Self {
        Self::new(ServiceKind::Postgres, host, port, user, password, default_db)
    }

    pub fn pgbouncer(host: &str, port: u16, user: &str, password: &str) -> Self {
        Self::new(ServiceKind::Pgbouncer, host, port, user, password, "pgbouncer")
    }

    /// The synthetic host service; always present in the repository.
    pub fn system() -> Self {
        Self::new(ServiceKind::System, "", 0, "", "", "")
    }

    fn new(
        kind: ServiceKind,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        default_db: &str,
    ) -> Self {
        Self {
            id: Arc::from(service_id(kind, port).as_str()),
            kind,
            host: host.to_string(),
            port,
            default_db: default_db.to_string(),
            version: 0,
            user: user.to_string(),
            password: password.to_string(),
            schedule: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Connection parameters targeting `db` on this endpoint.
    pub fn conninfo_for(&self, db: &str) -> Conninfo {
        let db = if db.is_empty() { &self.default_db } else { db };
        Conninfo {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: db.to_string(),
        }
    }

    /// Connection parameters for the default database.
    pub fn conninfo(&self) -> Conninfo {
        self.conninfo_for("")
    }

    /// Snapshot of the per-descriptor last-run table.
    pub(crate) fn last_runs(&self) -> HashMap<usize, Instant> {
        self.schedule.lock().expect("schedule lock poisoned").clone()
    }

    /// Record run instants for descriptors that actually executed this round.
    pub(crate) fn record_runs(&self, indices: impl IntoIterator<Item = usize>, at: Instant) {
        let mut table = self.schedule.lock().expect("schedule lock poisoned");
        for idx in indices {
            table.insert(idx, at);
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Live set of discovered services.
///
/// Append-mostly: discovery inserts confirmed endpoints and removes them
/// only on an explicit eviction signal, so an in-flight collection round is
/// never disrupted. Readers take snapshots; they never hold the lock while
/// collecting.
#[derive(Default)]
pub struct ServiceRepo {
    inner: RwLock<HashMap<Arc<str>, Arc<Service>>>,
}

impl ServiceRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent snapshot, ordered by service id for deterministic output.
    pub async fn snapshot(&self) -> Vec<Arc<Service>> {
        let guard = self.inner.read().await;
        let mut services: Vec<Arc<Service>> = guard.values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    /// Insert a service unless one with the same id already exists.
    /// Returns true when the service was inserted.
    pub async fn insert(&self, service: Service) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get(&service.id) {
            Some(_) => false,
            None => {
                guard.insert(Arc::clone(&service.id), Arc::new(service));
                true
            }
        }
    }

    /// Remove a service by id. Returns true when it existed.
    pub async fn remove(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_id_is_pure() {
        assert_eq!(service_id(ServiceKind::Postgres, 5432), "postgres_5432");
        assert_eq!(
            service_id(ServiceKind::Postgres, 5432),
            service_id(ServiceKind::Postgres, 5432)
        );
        assert_eq!(service_id(ServiceKind::Pgbouncer, 6432), "pgbouncer_6432");
        assert_eq!(service_id(ServiceKind::System, 0), "system");
    }

    #[test]
    fn test_conninfo_targets_requested_database() {
        let svc = Service::postgres("127.0.0.1", 5432, "monitor", "secret", "postgres");

        let conninfo = svc.conninfo_for("appdb");
        assert_eq!(conninfo.host, "127.0.0.1");
        assert_eq!(conninfo.port, 5432);
        assert_eq!(conninfo.user, "monitor");
        assert_eq!(conninfo.database, "appdb");

        assert_eq!(svc.conninfo().database, "postgres");
    }

    #[tokio::test]
    async fn test_repo_insert_is_idempotent() {
        let repo = ServiceRepo::new();
        assert!(repo.insert(Service::system()).await);
        assert!(!repo.insert(Service::system()).await);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_repo_snapshot_sorted_by_id() {
        let repo = ServiceRepo::new();
        repo.insert(Service::system()).await;
        repo.insert(Service::postgres("127.0.0.1", 5433, "u", "p", "postgres"))
            .await;
        repo.insert(Service::postgres("127.0.0.1", 5432, "u", "p", "postgres"))
            .await;

        let ids: Vec<String> = repo
            .snapshot()
            .await
            .iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["postgres_5432", "postgres_5433", "system"]);
    }

    #[tokio::test]
    async fn test_repo_remove() {
        let repo = ServiceRepo::new();
        repo.insert(Service::pgbouncer("127.0.0.1", 6432, "u", "p"))
            .await;
        assert!(repo.remove("pgbouncer_6432").await);
        assert!(!repo.remove("pgbouncer_6432").await);
        assert!(repo.is_empty().await);
    }
}
