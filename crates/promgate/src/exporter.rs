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
//! The exporter root handle.
//!
//! [`HttpMetrics`] owns (or shares) a Prometheus registry together with the
//! instance-wide configuration: static labels, exclusion rules and the
//! multiprocess policy. Trackers, default metric layers and the scrape
//! endpoint are all created from it and share its inner state.

use std::fmt;
use std::sync::Arc;

use prometheus::{GaugeVec, Opts, Registry};

use crate::error::ExporterError;
use crate::exclusion::ExclusionRules;
use crate::multiprocess::MultiprocessConfig;
use crate::registry::MetricKind;
use crate::track::TrackerBuilder;

/// Default scrape endpoint path.
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Prometheus metrics export configuration for an axum application.
///
/// Thread-safe handle that can be cloned and shared across tasks; all
/// clones operate on the same registry and configuration.
///
/// ```ignore
/// let metrics = HttpMetrics::new();
/// let defaults = metrics.export_defaults(DefaultsConfig::default())?;
///
/// let app = Router::new()
///     .route("/", get(index))
///     .layer(defaults)
///     .merge(metrics.metrics_router());
/// ```
#[derive(Clone)]
pub struct HttpMetrics {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    registry: Registry,
    static_labels: Vec<(String, String)>,
    exclusions: ExclusionRules,
    exclude_user_defaults: bool,
    multiprocess: Option<MultiprocessConfig>,
    scrape_path: String,
}

impl HttpMetrics {
    /// Create an exporter with a fresh registry and no options.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Registry::new(),
                static_labels: Vec::new(),
                exclusions: ExclusionRules::default(),
                exclude_user_defaults: false,
                multiprocess: MultiprocessConfig::detect(),
                scrape_path: DEFAULT_METRICS_PATH.to_owned(),
            }),
        }
    }

    pub fn builder() -> HttpMetricsBuilder {
        HttpMetricsBuilder::default()
    }

    /// The backing registry, for gathering or registering extra collectors.
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub(crate) fn static_labels(&self) -> &[(String, String)] {
        &self.shared.static_labels
    }

    pub(crate) fn exclusions(&self) -> &ExclusionRules {
        &self.shared.exclusions
    }

    pub(crate) fn exclude_user_defaults(&self) -> bool {
        self.shared.exclude_user_defaults
    }

    pub(crate) fn multiprocess(&self) -> Option<&MultiprocessConfig> {
        self.shared.multiprocess.as_ref()
    }

    pub(crate) fn scrape_path(&self) -> &str {
        &self.shared.scrape_path
    }

    /// Track invocation counts of the wrapped routes with a counter.
    pub fn counter(&self, name: impl Into<String>, help: impl Into<String>) -> TrackerBuilder {
        TrackerBuilder::new(self.clone(), MetricKind::Counter, name.into(), help.into())
    }

    /// Track in-progress requests of the wrapped routes with a gauge.
    pub fn gauge(&self, name: impl Into<String>, help: impl Into<String>) -> TrackerBuilder {
        TrackerBuilder::new(self.clone(), MetricKind::Gauge, name.into(), help.into())
    }

    /// Track execution time of the wrapped routes with a histogram.
    pub fn histogram(&self, name: impl Into<String>, help: impl Into<String>) -> TrackerBuilder {
        TrackerBuilder::new(self.clone(), MetricKind::Histogram, name.into(), help.into())
    }

    /// Track execution time of the wrapped routes with a summary
    /// (count and sum, no quantiles).
    pub fn summary(&self, name: impl Into<String>, help: impl Into<String>) -> TrackerBuilder {
        TrackerBuilder::new(self.clone(), MetricKind::Summary, name.into(), help.into())
    }

    /// Report static information as a gauge fixed at 1.
    ///
    /// ```ignore
    /// metrics.info("app_info", "Application info", &[("version", "1.0.3")])?;
    /// ```
    pub fn info(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
    ) -> Result<prometheus::Gauge, ExporterError> {
        let names: Vec<&str> = labels.iter().map(|(n, _)| *n).collect();
        let values: Vec<&str> = labels.iter().map(|(_, v)| *v).collect();

        let vec = GaugeVec::new(Opts::new(name, help), &names)?;
        self.shared.registry.register(Box::new(vec.clone()))?;

        let gauge = vec.with_label_values(&values);
        gauge.set(1.0);
        Ok(gauge)
    }
}

impl Default for HttpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HttpMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMetrics")
            .field("static_labels", &self.shared.static_labels)
            .field("exclusions", &self.shared.exclusions)
            .field("exclude_user_defaults", &self.shared.exclude_user_defaults)
            .field("multiprocess", &self.shared.multiprocess)
            .field("scrape_path", &self.shared.scrape_path)
            .finish_non_exhaustive()
    }
}

/// Builder for [`HttpMetrics`] with non-default options.
#[derive(Default)]
pub struct HttpMetricsBuilder {
    registry: Option<Registry>,
    static_labels: Vec<(String, String)>,
    excluded_paths: Vec<String>,
    exclude_user_defaults: bool,
    multiprocess_required: bool,
    scrape_path: Option<String>,
}

impl HttpMetricsBuilder {
    /// Use an existing registry instead of a fresh one.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Attach a static label to every metric created by this instance.
    /// Per-metric labels with the same name take precedence.
    pub fn static_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_labels.push((name.into(), value.into()));
        self
    }

    /// Exclude paths matching this pattern (anchored at the start of the
    /// path) from default instrumentation.
    pub fn exclude_path(mut self, pattern: impl Into<String>) -> Self {
        self.excluded_paths.push(pattern.into());
        self
    }

    /// Also apply the exclusion rules to trackers registered for every
    /// endpoint via [`Tracker::default_layer`](crate::track::Tracker::default_layer).
    pub fn exclude_user_defaults(mut self) -> Self {
        self.exclude_user_defaults = true;
        self
    }

    /// Require multiprocess mode. Building fails if the
    /// `PROMETHEUS_MULTIPROC_DIR` marker (either spelling) is unset or not
    /// a directory.
    pub fn multiprocess(mut self) -> Self {
        self.multiprocess_required = true;
        self
    }

    /// Serve the scrape endpoint on this path instead of `/metrics`.
    pub fn scrape_path(mut self, path: impl Into<String>) -> Self {
        self.scrape_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<HttpMetrics, ExporterError> {
        let exclusions = ExclusionRules::compile(&self.excluded_paths)?;
        let multiprocess = if self.multiprocess_required {
            Some(MultiprocessConfig::from_env()?)
        } else {
            MultiprocessConfig::detect()
        };

        Ok(HttpMetrics {
            shared: Arc::new(Shared {
                registry: self.registry.unwrap_or_default(),
                static_labels: self.static_labels,
                exclusions,
                exclude_user_defaults: self.exclude_user_defaults,
                multiprocess,
                scrape_path: self
                    .scrape_path
                    .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_owned()),
            }),
        })
    }
}
