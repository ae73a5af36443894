//! Metric dispatch.
//!
//! Two delivery modes over a single collection engine: a pull-mode scrape
//! server and a push-mode tick loop. Both run the scheduler across the
//! repository snapshot and encode the drained point stream as text
//! exposition; neither buffers anything between rounds.

pub mod pull;
pub mod push;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::collector::Scheduler;
use crate::metrics::{MetricPoint, SINK_CAPACITY, Sink};
use crate::service::Service;

/// Dispatch-layer failures. Collector and scheduler errors never reach
/// here; only transport setup problems do.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to bind listen address: {0}")]
    Bind(#[source] std::io::Error),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("http client setup failed: {0}")]
    Client(#[source] reqwest::Error),
}

/// Run one collection round over `services` and return the drained points.
///
/// The scheduler writes into the channel while this function drains it, so
/// sink capacity never stalls a collector for long; when the round finishes
/// the channel closes and the drain completes.
pub(crate) async fn collect_services(
    scheduler: Arc<Scheduler>,
    services: Vec<Arc<Service>>,
) -> Vec<MetricPoint> {
    let (tx, mut rx) = mpsc::channel(SINK_CAPACITY);

    let rounds = tokio::spawn(async move {
        for service in services {
            let sink = Sink::new(tx.clone(), &service.id);
            scheduler.run_round(&service, &sink).await;
        }
        // tx drops here, closing the channel
    });

    let mut points = Vec::new();
    while let Some(point) = rx.recv().await {
        points.push(point);
    }
    let _ = rounds.await;
    points
}
