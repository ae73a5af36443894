//! Pull-mode dispatch: the scrape server.
//!
//! Exposes `GET /metrics`; every scrape triggers one collection round
//! across every service in the repository. Scrapes are concurrent-safe:
//! each works on its own repository snapshot and its own sink, and always
//! answers 200 with whatever was successfully collected.

use std::sync::Arc;

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::{DispatchError, collect_services};
use crate::collector::Scheduler;
use crate::metrics::exposition;
use crate::service::ServiceRepo;

/// Shared scrape-handler state.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<ServiceRepo>,
    pub scheduler: Arc<Scheduler>,
    /// Labels attached to every sample (identity, optional project).
    pub base_labels: Arc<Vec<(String, String)>>,
}

/// Create the router serving the scrape endpoint.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let services = state.repo.snapshot().await;
    let points = collect_services(Arc::clone(&state.scheduler), services).await;
    let body = exposition::encode(&points, &state.base_labels);
    ([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body)
}

/// Serve the scrape endpoint until the token is cancelled.
pub async fn serve(
    listen: &str,
    state: AppState,
    token: CancellationToken,
) -> Result<(), DispatchError> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(DispatchError::Bind)?;
    tracing::info!("pull mode, accepting requests on http://{listen}/metrics");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .map_err(DispatchError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::service::Service;
    use crate::store::{Conninfo, Querier, SqlResult, StoreError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use tower::ServiceExt;

    /// Querier that refuses every connection, like a host with no databases.
    struct Unreachable;

    #[async_trait]
    impl Querier for Unreachable {
        async fn query(&self, _conninfo: &Conninfo, _sql: &str) -> Result<SqlResult, StoreError> {
            Err(StoreError::Unavailable("unreachable".to_string()))
        }
    }

    async fn test_state() -> AppState {
        let registry = Arc::new(Registry::build(&HashMap::new()).unwrap());
        let scheduler = Arc::new(Scheduler::new(registry, Arc::new(Unreachable)));
        let repo = Arc::new(ServiceRepo::new());
        repo.insert(Service::system()).await;
        AppState {
            repo,
            scheduler,
            base_labels: Arc::new(vec![("machine_id".to_string(), "test-host".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_scrape_returns_200_with_host_metrics() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8_lossy(&bytes);

        // host-only repository still produces the node families
        assert!(body.contains("node_uptime_seconds"), "body: {body}");
        assert!(body.contains("node_memory_MemTotal_bytes"), "body: {body}");
        // the identity label is on every sample line
        for line in body.lines().filter(|l| !l.starts_with('#') && !l.is_empty()) {
            assert!(line.contains("machine_id=\"test-host\""), "line: {line}");
        }
    }

    #[tokio::test]
    async fn test_scrape_with_unreachable_postgres_still_200() {
        let state = test_state().await;
        state
            .repo
            .insert(Service::postgres("127.0.0.1", 5432, "u", "p", "postgres"))
            .await;

        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // a failed probe skips that service, never the scrape
        assert_eq!(response.status(), StatusCode::OK);
    }
}
