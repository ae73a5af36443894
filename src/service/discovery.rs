//! Service discovery.
//!
//! Periodically enumerates LISTEN sockets from the kernel's socket tables,
//! matches them against the well-known Postgres/PgBouncer port sets, and
//! validates candidates with a real handshake before admitting them to the
//! repository. The synthetic host service is always present.
//!
//! Discovery failures are warnings, never fatal. A known service is evicted
//! only after several consecutive failed re-probes; a single unreachable
//! round never removes it.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::collector::postgres;
use crate::config::{Credentials, DiscoveryConfig};
use crate::service::{Service, ServiceKind, ServiceRepo, service_id};
use crate::store::{Querier, StoreError};

/// Maintenance database used for Postgres handshakes and probe connections.
const POSTGRES_MAINTENANCE_DB: &str = "postgres";

/// Background service discovery.
pub struct Discovery {
    repo: Arc<ServiceRepo>,
    querier: Arc<dyn Querier>,
    credentials: Credentials,
    postgres_ports: Vec<u16>,
    pgbouncer_ports: Vec<u16>,
    interval: Duration,
    eviction_threshold: u32,
    /// Consecutive failed re-probes per known service id.
    failures: Mutex<HashMap<String, u32>>,
}

impl Discovery {
    pub fn new(
        repo: Arc<ServiceRepo>,
        querier: Arc<dyn Querier>,
        credentials: Credentials,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            repo,
            querier,
            credentials,
            postgres_ports: config.postgres_ports.clone(),
            pgbouncer_ports: config.pgbouncer_ports.clone(),
            interval: config.interval,
            eviction_threshold: config.eviction_threshold,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// One full discovery pass.
    ///
    /// Only a socket-table read failure is an error; handshake failures are
    /// handled per candidate.
    pub async fn run_once(&self) -> io::Result<()> {
        if self.repo.insert(Service::system()).await {
            tracing::info!(service = "system", "discovered service");
        }

        let listening = listening_ports()?;
        for &port in &self.postgres_ports {
            self.check_endpoint(ServiceKind::Postgres, port, &listening)
                .await;
        }
        for &port in &self.pgbouncer_ports {
            self.check_endpoint(ServiceKind::Pgbouncer, port, &listening)
                .await;
        }
        Ok(())
    }

    /// Background loop: sleep, rediscover, until cancelled.
    pub async fn run(&self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = token.cancelled() => {
                    tracing::debug!("discovery loop exiting");
                    return;
                }
            }
            if let Err(e) = self.run_once().await {
                tracing::warn!(error = %e, "discovery pass failed");
            }
        }
    }

    async fn check_endpoint(&self, kind: ServiceKind, port: u16, listening: &HashSet<u16>) {
        let id = service_id(kind, port);
        let known = self.repo.contains(&id).await;

        if !listening.contains(&port) {
            if known {
                self.record_failure(&id, "port no longer listening").await;
            }
            return;
        }

        match self.handshake(kind, port).await {
            Ok(version) => {
                self.failures
                    .lock()
                    .expect("failures lock poisoned")
                    .remove(&id);
                if !known {
                    let service = self.build_service(kind, port).with_version(version);
                    if self.repo.insert(service).await {
                        tracing::info!(service = %id, kind = %kind, port, "discovered service");
                    }
                }
            }
            Err(e) => {
                if known {
                    self.record_failure(&id, &e.to_string()).await;
                } else {
                    tracing::debug!(kind = %kind, port, error = %e, "candidate handshake failed");
                }
            }
        }
    }

    async fn handshake(&self, kind: ServiceKind, port: u16) -> Result<i32, StoreError> {
        let conninfo = self.build_service(kind, port).conninfo();
        match kind {
            ServiceKind::Postgres => {
                let res = self.querier.query(&conninfo, postgres::VERSION_SQL).await?;
                Ok(res.scalar().and_then(|v| v.parse().ok()).unwrap_or(0))
            }
            ServiceKind::Pgbouncer => {
                self.querier.query(&conninfo, "SHOW VERSION").await?;
                Ok(0)
            }
            ServiceKind::System => Ok(0),
        }
    }

    fn build_service(&self, kind: ServiceKind, port: u16) -> Service {
        match kind {
            ServiceKind::Postgres => Service::postgres(
                "127.0.0.1",
                port,
                &self.credentials.postgres_user,
                &self.credentials.postgres_password,
                POSTGRES_MAINTENANCE_DB,
            ),
            ServiceKind::Pgbouncer => Service::pgbouncer(
                "127.0.0.1",
                port,
                &self.credentials.pgbouncer_user,
                &self.credentials.pgbouncer_password,
            ),
            ServiceKind::System => Service::system(),
        }
    }

    /// Count a failed re-probe of a known service; evict once the budget is
    /// exhausted. Eviction is the only path that removes a service.
    async fn record_failure(&self, id: &str, reason: &str) {
        let count = {
            let mut failures = self.failures.lock().expect("failures lock poisoned");
            let count = failures.entry(id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if count >= self.eviction_threshold {
            self.repo.remove(id).await;
            self.failures
                .lock()
                .expect("failures lock poisoned")
                .remove(id);
            tracing::info!(service = %id, failures = count, "evicting unreachable service");
        } else {
            tracing::warn!(service = %id, failures = count, reason, "service re-probe failed");
        }
    }
}

/// LISTEN ports from the kernel socket tables (IPv4 and IPv6).
fn listening_ports() -> io::Result<HashSet<u16>> {
    let mut ports = parse_listen_ports(&std::fs::read_to_string("/proc/net/tcp")?);
    if let Ok(tcp6) = std::fs::read_to_string("/proc/net/tcp6") {
        ports.extend(parse_listen_ports(&tcp6));
    }
    Ok(ports)
}

/// Extract local ports of sockets in LISTEN state (0A) from a
/// /proc/net/tcp-format table.
fn parse_listen_ports(content: &str) -> HashSet<u16> {
    let mut ports = HashSet::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[3] != "0A" {
            continue;
        }
        let Some((_, port_hex)) = fields[1].rsplit_once(':') else {
            continue;
        };
        if let Ok(port) = u16::from_str_radix(port_hex, 16) {
            ports.insert(port);
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_ports() {
        let content = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1538 00000000:0000 0A 00000000:00000000 00:00000000 00000000   102        0 22642
   1: 00000000:1922 00000000:0000 0A 00000000:00000000 00:00000000 00000000   105        0 23521
   2: 0100007F:A1B2 0100007F:1538 01 00000000:00000000 00:00000000 00000000  1000        0 31337
";
        let ports = parse_listen_ports(content);
        // 0x1538 = 5432, 0x1922 = 6434; the established socket is ignored
        assert!(ports.contains(&5432));
        assert!(ports.contains(&6434));
        assert_eq!(ports.len(), 2);
    }

    #[test]
    fn test_parse_listen_ports_empty_table() {
        let content = "  sl  local_address rem_address   st\n";
        assert!(parse_listen_ports(content).is_empty());
    }
}
