//! Prometheus Exporter for Axum
//!
//! Request-level Prometheus instrumentation for axum applications: default
//! HTTP metrics, per-route trackers, a scrape endpoint and multiprocess
//! aggregation.
//!
//! # Features
//!
//! - **Default HTTP Metrics**: latency, request and failure counts per
//!   method, group and status, installed with one layer
//! - **Per-Route Trackers**: counters, gauges, histograms and summaries
//!   wrapped around individual routes, with labels resolved from the
//!   request or the response
//! - **Scrape Endpoint**: text or protobuf exposition with `name[]`
//!   family filtering, in-app or on a standalone port
//! - **Multiprocess Aggregation**: merge metrics across worker processes
//!   through a shared snapshot directory
//!
//! # Example
//!
//! ```ignore
//! use axum::{routing::get, Router};
//! use promgate::{DefaultsConfig, HttpMetrics};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let metrics = HttpMetrics::new();
//!     let defaults = metrics.export_defaults(DefaultsConfig::default())?;
//!
//!     let by_path = metrics
//!         .counter("index_requests_total", "Requests to the index page")
//!         .build()?;
//!
//!     let app = Router::new()
//!         .route("/", get(|| async { "hello" }).layer(by_path.layer()))
//!         .layer(defaults)
//!         .merge(metrics.metrics_router());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod defaults;
pub mod endpoint;
pub mod error;
pub mod exclusion;
pub mod exporter;
pub mod labels;
pub mod multiprocess;
pub mod registry;
pub mod server;
pub mod summary;
pub mod track;

pub use context::{do_not_track, exclude_all_metrics, MetricsContext};
pub use defaults::{DefaultsConfig, DefaultsLayer, GroupBy, Latency, NO_PREFIX};
pub use error::ExporterError;
pub use exporter::{HttpMetrics, HttpMetricsBuilder, DEFAULT_METRICS_PATH};
pub use labels::{LabelSource, RequestInfo, ResponseView};
pub use multiprocess::{MultiprocessConfig, MULTIPROC_DIR_ENV, MULTIPROC_DIR_ENV_LEGACY};
pub use server::{MetricsConfig, MetricsServer};
pub use summary::SummaryVec;
pub use track::{Tracker, TrackerBuilder, TrackLayer};

// Re-export prometheus types for convenience
pub use prometheus::{Encoder, Registry, TextEncoder};
