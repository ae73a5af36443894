//! Panoptes - PostgreSQL Ecosystem Telemetry Agent
//!
//! This crate provides the core functionality for the Panoptes agent. It
//! can be used as a library by other Rust projects, or run as a standalone
//! binary with the `panoptes` executable.
//!
//! # Architecture
//!
//! - **Discovery**: finds local Postgres/PgBouncer endpoints by inspecting
//!   kernel socket tables and validating with a real handshake
//! - **Registry**: the static, ordered catalog of collector descriptors
//! - **Scheduler**: per-round orchestration (oneshot dedup, per-database
//!   fan-out, cadence, version-adapted SQL)
//! - **Dispatch**: a pull-mode scrape server and a push-mode tick loop over
//!   the same collection engine
//! - **Identity**: a stable per-host label partitioning metrics on the
//!   back-end

pub mod bootstrap;
pub mod collector;
pub mod config;
pub mod dispatch;
pub mod identity;
pub mod metrics;
pub mod registry;
pub mod service;
pub mod store;
pub mod supervisor;

// Re-export public types
pub use collector::{CollectError, Scheduler};
pub use config::{AppConfig, ConfigError, Credentials, RuntimeMode};
pub use metrics::{DescHandle, MetricKind, MetricPoint, Sink};
pub use registry::{Descriptor, Registry};
pub use service::{Service, ServiceKind, ServiceRepo};
pub use store::{Conninfo, PgQuerier, Querier, SqlResult, StoreError};
