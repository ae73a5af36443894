//! Push-mode dispatch: the tick loop.
//!
//! A fixed-interval ticker drives the scheduler. Every service produces a
//! separate payload POSTed to `<url>/metrics/job/<jobLabel>`. The job label
//! exists purely to prevent overwrites on the aggregator side and is
//! expected to be stripped before storage. Delivery is at-most-once: a
//! failed push is a warning and the payload is dropped; the next tick fires
//! at the configured interval regardless.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header;
use tokio_util::sync::CancellationToken;

use super::{DispatchError, collect_services};
use crate::collector::Scheduler;
use crate::metrics::exposition;
use crate::service::ServiceRepo;

/// Push transport settings.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Aggregator base URL.
    pub url: String,
    /// Optional API key sent as a bearer Authorization header.
    pub api_key: Option<String>,
    /// Tick interval.
    pub interval: Duration,
    /// Host identity, part of every job label.
    pub identity: String,
    /// Labels attached to every sample.
    pub base_labels: Arc<Vec<(String, String)>>,
}

/// Run the push loop until the token is cancelled.
///
/// Cancellation is honored at the tick boundary: an in-flight round is
/// bounded and allowed to complete.
pub async fn run(
    config: PushConfig,
    repo: Arc<ServiceRepo>,
    scheduler: Arc<Scheduler>,
    token: CancellationToken,
) -> Result<(), DispatchError> {
    let client = reqwest::Client::builder()
        .timeout(config.interval)
        .build()
        .map_err(DispatchError::Client)?;

    tracing::info!(
        url = %config.url,
        interval_secs = config.interval.as_secs(),
        "push mode, sending metrics"
    );

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; consume it so the loop body
    // below pushes once per interval
    ticker.tick().await;

    loop {
        push_once(&client, &config, &repo, &scheduler).await;

        tokio::select! {
            _ = ticker.tick() => continue,
            _ = token.cancelled() => {
                tracing::info!("exit signaled, stop pushing metrics");
                return Ok(());
            }
        }
    }
}

/// Collect and push one payload per service.
///
/// Exposed for tests; failures are logged and swallowed, matching the
/// at-most-once delivery contract.
pub async fn push_once(
    client: &reqwest::Client,
    config: &PushConfig,
    repo: &ServiceRepo,
    scheduler: &Arc<Scheduler>,
) {
    tracing::debug!("push round started");

    for service in repo.snapshot().await {
        let service_id = service.id.to_string();
        let points = collect_services(Arc::clone(scheduler), vec![service]).await;
        if points.is_empty() {
            tracing::debug!(service = %service_id, "nothing collected, skipping push");
            continue;
        }

        let body = exposition::encode(&points, &config.base_labels);
        let job = format!("db_system_{}_{}", config.identity, service_id);
        let url = format!("{}/metrics/job/{}", config.url.trim_end_matches('/'), job);

        let mut request = client
            .post(&url)
            .header(header::CONTENT_TYPE, exposition::CONTENT_TYPE)
            .body(body);
        if let Some(key) = &config.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(service = %service_id, "metrics pushed");
            }
            Ok(response) => {
                tracing::warn!(service = %service_id, status = %response.status(),
                    "could not push metrics");
            }
            Err(e) => {
                tracing::warn!(service = %service_id, error = %e, "could not push metrics");
            }
        }
    }

    tracing::debug!("push round finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_label_format() {
        // the job label keys payloads per (host, service) on the aggregator
        let identity = "abc123";
        let service_id = "postgres_5432";
        let job = format!("db_system_{identity}_{service_id}");
        assert_eq!(job, "db_system_abc123_postgres_5432");
    }
}
