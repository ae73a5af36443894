//! Supervisor: wires the agent together and owns shutdown ordering.
//!
//! Startup: configuration is already loaded and validated; the supervisor
//! computes the host identity, builds the registry and the SQL seam, runs
//! one synchronous discovery pass (fatal on error), starts background
//! discovery, and enters the selected dispatch mode.
//!
//! Shutdown: cancelling the root token stops the scrape server from
//! accepting, returns the push loop at its tick boundary, and wakes the
//! discovery loop out of its sleep. In-flight collection completes; nothing
//! is interrupted mid-round.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::collector::Scheduler;
use crate::config::{AppConfig, RuntimeMode};
use crate::dispatch::{pull, push};
use crate::identity;
use crate::metrics::exposition;
use crate::registry::Registry;
use crate::service::ServiceRepo;
use crate::service::discovery::Discovery;
use crate::store::PgQuerier;

/// Run the agent until cancellation or a fatal startup error.
pub async fn run(
    config: AppConfig,
    token: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let host_id = identity::host_identity();
    tracing::info!(identity = %host_id, "host identity initialized");

    let mut base_labels = vec![(exposition::IDENTITY_LABEL.to_string(), host_id.clone())];
    if let Some(project) = &config.project_id {
        base_labels.push(("project_id".to_string(), project.clone()));
    }
    let base_labels = Arc::new(base_labels);

    let registry = Arc::new(Registry::build(&config.filters)?);
    let querier = Arc::new(PgQuerier::new(config.connect_timeout));
    let scheduler = Arc::new(Scheduler::new(registry, querier.clone()));
    let repo = Arc::new(ServiceRepo::new());

    let discovery = Arc::new(Discovery::new(
        Arc::clone(&repo),
        querier,
        config.credentials.clone(),
        &config.discovery,
    ));

    // One synchronous pass so dispatch starts with a populated repository;
    // a socket-table read failure here is a fatal startup error.
    discovery.run_once().await?;
    tracing::info!(services = repo.len().await, "initial discovery complete");

    let discovery_task = tokio::spawn({
        let discovery = Arc::clone(&discovery);
        let token = token.clone();
        async move { discovery.run(token).await }
    });

    let result = match config.mode {
        RuntimeMode::Pull => {
            let state = pull::AppState {
                repo,
                scheduler,
                base_labels,
            };
            pull::serve(&config.listen, state, token.clone()).await
        }
        RuntimeMode::Push => {
            let url = config
                .metric_service_url
                .clone()
                .ok_or("push mode requires metric_service_url")?;
            let push_config = push::PushConfig {
                url,
                api_key: config.api_key.clone(),
                interval: config.send_interval,
                identity: host_id,
                base_labels,
            };
            push::run(push_config, repo, scheduler, token.clone()).await
        }
    };

    // Dispatch returned (cancellation or transport failure); make sure the
    // discovery loop exits before we do.
    token.cancel();
    let _ = discovery_task.await;

    result?;
    tracing::info!("shutdown complete");
    Ok(())
}
