//! Metric Data Model
//!
//! Core types shared by every collector: pre-built metric descriptors,
//! metric points, and the sink collectors emit into.
//!
//! # Architecture
//!
//! - [`DescHandle`]: immutable, pre-built descriptor for one metric family
//! - [`MetricPoint`]: one sample (handle + label values + value)
//! - [`Sink`]: per-service write handle over an MPSC channel
//!
//! Collectors never format text themselves; they emit points and the
//! dispatcher encodes the drained stream with [`exposition`].

pub mod exposition;
pub mod filters;

use std::sync::Arc;

use tokio::sync::mpsc;

/// Default sink channel capacity.
pub const SINK_CAPACITY: usize = 4096;

/// Metric value semantics, mapped to the exposition `# TYPE` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically increasing value.
    Counter,
    /// Value that can go up and down.
    Gauge,
}

impl MetricKind {
    /// Exposition format type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

/// Pre-built descriptor for one metric family.
///
/// Handles are created once at registry build time (or, for probe collectors
/// with dynamic field names, at collection time) and shared via `Arc` so that
/// emitting a point is constant-time.
#[derive(Debug)]
pub struct DescHandle {
    /// Full back-end-visible metric name, e.g. `postgres_database_size_bytes`.
    pub metric_name: String,
    /// Help text for the `# HELP` line.
    pub help: String,
    /// Counter or gauge.
    pub kind: MetricKind,
    /// Domain label names, in emission order.
    pub label_names: Vec<String>,
}

impl DescHandle {
    pub fn new(
        metric_name: impl Into<String>,
        help: impl Into<String>,
        kind: MetricKind,
        label_names: &[&str],
    ) -> Arc<Self> {
        Arc::new(Self {
            metric_name: metric_name.into(),
            help: help.into(),
            kind,
            label_names: label_names.iter().map(|s| s.to_string()).collect(),
        })
    }
}

/// One collected sample.
#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub desc: Arc<DescHandle>,
    /// Label values, aligned with `desc.label_names`.
    pub label_values: Vec<String>,
    pub value: f64,
    /// Id of the service this point was collected from.
    pub service_id: Arc<str>,
}

/// Write-only handle collectors emit metric points into.
///
/// A `Sink` is scoped to one service: every point sent through it carries
/// that service's id. The receiving side is owned by the dispatcher, which
/// drains the channel and encodes the stream once the round completes.
#[derive(Clone)]
pub struct Sink {
    tx: mpsc::Sender<MetricPoint>,
    service_id: Arc<str>,
}

impl Sink {
    /// Create a sink scoped to `service_id` on top of an existing channel.
    pub fn new(tx: mpsc::Sender<MetricPoint>, service_id: &str) -> Self {
        Self {
            tx,
            service_id: Arc::from(service_id),
        }
    }

    /// Emit one point. Fails only when the dispatcher has torn down the
    /// receiving side, in which case the collection round must abort cleanly.
    pub async fn send(
        &self,
        desc: &Arc<DescHandle>,
        label_values: Vec<String>,
        value: f64,
    ) -> Result<(), SinkClosed> {
        self.tx
            .send(MetricPoint {
                desc: Arc::clone(desc),
                label_values,
                value,
                service_id: Arc::clone(&self.service_id),
            })
            .await
            .map_err(|_| SinkClosed)
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("service_id", &self.service_id)
            .finish_non_exhaustive()
    }
}

/// The dispatcher closed the receiving side of the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl std::fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("metric sink closed")
    }
}

impl std::error::Error for SinkClosed {}
