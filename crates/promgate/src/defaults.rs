// Copyright (C) 2026  promgate contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//! Built-in HTTP request metrics.
//!
//! One layer records, for every request it sees: a latency histogram (or
//! summary) grouped by a configurable request dimension, a total-request
//! counter, and a counter of requests whose inner service failed. Requests
//! marked do-not-track or exclude-all and paths matching the instance's
//! exclusion rules record nothing.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use tower::{Layer, Service};
use tracing::debug;

use crate::context::{context_for, MetricsContext};
use crate::error::ExporterError;
use crate::exporter::HttpMetrics;
use crate::labels::RequestInfo;
use crate::registry::{bind_metric, MetricHandle, MetricKind};

/// Sentinel for unprefixed default metric names. Deliberately uses
/// characters that are invalid in Prometheus metric names so it can never
/// collide with a real prefix.
pub const NO_PREFIX: &str = "#no_prefix";

const DEFAULT_PREFIX: &str = "axum";

/// The request dimension used to partition the default latency metric.
#[derive(Clone)]
pub enum GroupBy {
    /// The request path as sent by the client.
    Path,
    /// The path including the query string.
    FullPath,
    /// The matched route pattern (e.g. `/items/:id`).
    MatchedRule,
    /// A user-supplied function of the request snapshot. The label name
    /// must be given explicitly and be a valid Prometheus label.
    Custom {
        name: String,
        resolve: Arc<dyn Fn(&RequestInfo) -> String + Send + Sync>,
    },
}

impl GroupBy {
    pub fn custom<F>(name: impl Into<String>, resolve: F) -> Self
    where
        F: Fn(&RequestInfo) -> String + Send + Sync + 'static,
    {
        GroupBy::Custom {
            name: name.into(),
            resolve: Arc::new(resolve),
        }
    }

    fn label_name(&self) -> &str {
        match self {
            GroupBy::Path => "path",
            GroupBy::FullPath => "full_path",
            GroupBy::MatchedRule => "rule",
            GroupBy::Custom { name, .. } => name,
        }
    }

    fn value(&self, info: &RequestInfo) -> String {
        match self {
            GroupBy::Path => info.path().to_owned(),
            GroupBy::FullPath => info.full_path(),
            GroupBy::MatchedRule => info.matched_rule().to_owned(),
            GroupBy::Custom { resolve, .. } => resolve(info),
        }
    }
}

impl fmt::Debug for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::Path => f.write_str("Path"),
            GroupBy::FullPath => f.write_str("FullPath"),
            GroupBy::MatchedRule => f.write_str("MatchedRule"),
            GroupBy::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

/// Latency representation for the default duration metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    Histogram,
    Summary,
}

/// Configuration for [`HttpMetrics::export_defaults`].
#[derive(Debug, Clone)]
pub struct DefaultsConfig {
    group_by: GroupBy,
    prefix: String,
    buckets: Option<Vec<f64>>,
    latency: Latency,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            group_by: GroupBy::Path,
            prefix: DEFAULT_PREFIX.to_owned(),
            buckets: None,
            latency: Latency::Histogram,
        }
    }
}

impl DefaultsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }

    /// Prefix joined to the default metric names with an underscore.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Produce unprefixed default metric names.
    pub fn no_prefix(mut self) -> Self {
        self.prefix = NO_PREFIX.to_owned();
        self
    }

    /// Bucket boundaries for the duration histogram.
    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    /// Record latency as a summary (count and sum) instead of a histogram.
    pub fn latency_as_summary(mut self) -> Self {
        self.latency = Latency::Summary;
        self
    }
}

struct DefaultMetrics {
    duration: MetricHandle,
    total: MetricHandle,
    exceptions: MetricHandle,
    group_by: GroupBy,
    static_values: Vec<String>,
    exporter: HttpMetrics,
}

impl DefaultMetrics {
    fn record(&self, info: &RequestInfo, ctx: &MetricsContext, status: StatusCode, failed: bool) {
        let method = info.method().as_str();
        let status = status.as_u16().to_string();

        if failed {
            let mut values = vec![method, status.as_str()];
            values.extend(self.static_values.iter().map(String::as_str));
            self.exceptions.with_label_values(&values).inc();
        }

        // Duration needs the start stamp from the entry hook; without it
        // there is nothing to observe and the request is only counted.
        if let Some(start) = ctx.start() {
            let group = self.group_by.value(info);
            let mut values = vec![method, group.as_str(), status.as_str()];
            values.extend(self.static_values.iter().map(String::as_str));
            self.duration
                .with_label_values(&values)
                .observe(start.elapsed().as_secs_f64());
        }

        let mut values = vec![method, status.as_str()];
        values.extend(self.static_values.iter().map(String::as_str));
        self.total.with_label_values(&values).inc();
    }
}

impl HttpMetrics {
    /// Register the default HTTP metric families and return the layer that
    /// feeds them.
    ///
    /// Family names are `<prefix>_http_request_duration_seconds`,
    /// `<prefix>_http_request_total`, `<prefix>_http_request_exceptions_total`
    /// and `<prefix>_exporter_info` (no prefix with [`NO_PREFIX`]).
    /// Installing a second time with the same prefix is a no-op: the
    /// duplicate registration of the info gauge is taken as "already
    /// installed" and a passthrough layer is returned. A different prefix
    /// creates a parallel family set.
    pub fn export_defaults(&self, config: DefaultsConfig) -> Result<DefaultsLayer, ExporterError> {
        let group_label = config.group_by.label_name().to_owned();
        validate_label_name(&group_label)?;

        let prefix = if config.prefix == NO_PREFIX {
            String::new()
        } else {
            format!("{}_", config.prefix)
        };

        let version = env!("CARGO_PKG_VERSION");
        let mut info_labels: Vec<(&str, &str)> = vec![("version", version)];
        info_labels.extend(
            self.static_labels()
                .iter()
                .map(|(n, v)| (n.as_str(), v.as_str())),
        );
        match self.info(
            &format!("{prefix}exporter_info"),
            "Information about the promgate exporter",
            &info_labels,
        ) {
            Ok(_) => {}
            Err(err) if err.is_duplicate_registration() => {
                debug!(prefix = %config.prefix, "default metrics already installed");
                return Ok(DefaultsLayer { metrics: None });
            }
            Err(err) => return Err(err),
        }

        let static_names: Vec<&str> = self.static_labels().iter().map(|(n, _)| n.as_str()).collect();
        let static_values: Vec<String> =
            self.static_labels().iter().map(|(_, v)| v.clone()).collect();

        let mut duration_labels = vec!["method", group_label.as_str(), "status"];
        duration_labels.extend(&static_names);
        let duration_kind = match config.latency {
            Latency::Histogram => MetricKind::Histogram,
            Latency::Summary => MetricKind::Summary,
        };
        let duration = bind_metric(
            duration_kind,
            &format!("{prefix}http_request_duration_seconds"),
            "HTTP request duration in seconds",
            &duration_labels,
            config.buckets.clone(),
            self.registry(),
        )?;

        let mut count_labels = vec!["method", "status"];
        count_labels.extend(&static_names);
        let total = bind_metric(
            MetricKind::Counter,
            &format!("{prefix}http_request_total"),
            "Total number of HTTP requests",
            &count_labels,
            None,
            self.registry(),
        )?;
        let exceptions = bind_metric(
            MetricKind::Counter,
            &format!("{prefix}http_request_exceptions_total"),
            "Total number of HTTP requests that failed",
            &count_labels,
            None,
            self.registry(),
        )?;

        Ok(DefaultsLayer {
            metrics: Some(Arc::new(DefaultMetrics {
                duration,
                total,
                exceptions,
                group_by: config.group_by,
                static_values,
                exporter: self.clone(),
            })),
        })
    }
}

fn validate_label_name(name: &str) -> Result<(), ExporterError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ExporterError::InvalidGroupLabel(name.to_owned()))
    }
}

/// Layer feeding the default HTTP metrics. A `None` inner marks the
/// already-installed passthrough.
#[derive(Clone)]
pub struct DefaultsLayer {
    metrics: Option<Arc<DefaultMetrics>>,
}

impl fmt::Debug for DefaultsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultsLayer")
            .field("installed", &self.metrics.is_some())
            .finish()
    }
}

impl<S> Layer<S> for DefaultsLayer {
    type Service = DefaultsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

/// The default-metrics middleware service.
#[derive(Clone)]
pub struct DefaultsService<S> {
    inner: S,
    metrics: Option<Arc<DefaultMetrics>>,
}

impl<S> Service<Request> for DefaultsService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let metrics = self.metrics.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let Some(metrics) = metrics else {
                // Second install with the same prefix: pure passthrough.
                return inner.call(req).await;
            };

            let ctx = context_for(&mut req);
            ctx.stamp_start(Instant::now());
            let info = RequestInfo::from_request(&req);

            let outcome = inner.call(req).await;

            if ctx.is_do_not_track() || ctx.is_exclude_all() {
                return outcome;
            }
            if metrics.exporter.exclusions().matches(info.path()) {
                return outcome;
            }

            match &outcome {
                Ok(response) => metrics.record(&info, &ctx, response.status(), false),
                Err(_) => {
                    metrics.record(&info, &ctx, StatusCode::INTERNAL_SERVER_ERROR, true);
                }
            }
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tower::{service_fn, ServiceExt};

    /// Push one observation through an installed layer so its families have
    /// a child series; gather drops families without one.
    fn record_one(layer: &DefaultsLayer, failed: bool) {
        let metrics = layer.metrics.as_ref().expect("layer installed");
        let req = Request::builder().uri("/x").body(Body::empty()).unwrap();
        let info = RequestInfo::from_request(&req);
        let ctx = MetricsContext::default();
        ctx.stamp_start(Instant::now());
        metrics.record(&info, &ctx, StatusCode::OK, failed);
    }

    #[test]
    fn test_validate_label_name() {
        assert!(validate_label_name("path").is_ok());
        assert!(validate_label_name("_private").is_ok());
        assert!(validate_label_name("by_host_2").is_ok());
        assert!(validate_label_name("").is_err());
        assert!(validate_label_name("2fast").is_err());
        assert!(validate_label_name("with-dash").is_err());
    }

    #[test]
    fn test_group_by_label_names() {
        assert_eq!(GroupBy::Path.label_name(), "path");
        assert_eq!(GroupBy::FullPath.label_name(), "full_path");
        assert_eq!(GroupBy::MatchedRule.label_name(), "rule");
        let custom = GroupBy::custom("host", |_| String::new());
        assert_eq!(custom.label_name(), "host");
    }

    #[test]
    fn test_custom_group_requires_valid_name() {
        let metrics = HttpMetrics::new();
        let err = metrics
            .export_defaults(
                DefaultsConfig::new().group_by(GroupBy::custom("", |_| String::new())),
            )
            .unwrap_err();
        assert!(matches!(err, ExporterError::InvalidGroupLabel(_)));
    }

    #[test]
    fn test_install_registers_families() {
        let metrics = HttpMetrics::new();
        let layer = metrics.export_defaults(DefaultsConfig::default()).unwrap();
        record_one(&layer, true);

        let names: Vec<String> = metrics
            .registry()
            .gather()
            .iter()
            .map(|f| f.get_name().to_owned())
            .collect();
        assert!(names.contains(&"axum_http_request_duration_seconds".to_owned()));
        assert!(names.contains(&"axum_http_request_total".to_owned()));
        assert!(names.contains(&"axum_http_request_exceptions_total".to_owned()));
        assert!(names.contains(&"axum_exporter_info".to_owned()));
    }

    #[test]
    fn test_no_prefix_names() {
        let metrics = HttpMetrics::new();
        let layer = metrics
            .export_defaults(DefaultsConfig::new().no_prefix())
            .unwrap();
        record_one(&layer, false);
        assert!(metrics
            .registry()
            .gather()
            .iter()
            .any(|f| f.get_name() == "http_request_total"));
    }

    #[test]
    fn test_second_install_is_noop() {
        let metrics = HttpMetrics::new();
        metrics.export_defaults(DefaultsConfig::default()).unwrap();
        let families = metrics.registry().gather().len();

        let layer = metrics.export_defaults(DefaultsConfig::default()).unwrap();
        assert!(layer.metrics.is_none());
        assert_eq!(metrics.registry().gather().len(), families);
    }

    #[test]
    fn test_parallel_prefixes_coexist() {
        let metrics = HttpMetrics::new();
        metrics.export_defaults(DefaultsConfig::default()).unwrap();
        let layer = metrics
            .export_defaults(DefaultsConfig::new().prefix("internal"))
            .unwrap();
        assert!(layer.metrics.is_some());
        record_one(&layer, false);
        assert!(metrics
            .registry()
            .gather()
            .iter()
            .any(|f| f.get_name() == "internal_http_request_total"));
    }

    #[tokio::test]
    async fn test_failing_service_records_exception_counters() {
        let metrics = HttpMetrics::new();
        let layer = metrics.export_defaults(DefaultsConfig::default()).unwrap();
        let svc = layer.layer(service_fn(|_req: Request| async {
            Err::<Response, _>(std::io::Error::other("boom"))
        }));

        let req = Request::builder().uri("/fail").body(Body::empty()).unwrap();
        let err = svc.oneshot(req).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let families = metrics.registry().gather();
        let by_name = |name: &str| {
            families
                .iter()
                .find(|f| f.get_name() == name)
                .expect("family")
        };

        let exceptions = &by_name("axum_http_request_exceptions_total").get_metric()[0];
        assert_eq!(exceptions.get_counter().get_value(), 1.0);
        assert!(exceptions
            .get_label()
            .iter()
            .any(|l| l.get_name() == "status" && l.get_value() == "500"));

        let total = &by_name("axum_http_request_total").get_metric()[0];
        assert_eq!(total.get_counter().get_value(), 1.0);
        assert!(total
            .get_label()
            .iter()
            .any(|l| l.get_name() == "status" && l.get_value() == "500"));

        let duration = by_name("axum_http_request_duration_seconds").get_metric()[0].get_histogram();
        assert_eq!(duration.get_sample_count(), 1);
    }
}
