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
//! Metric creation against a backing registry.
//!
//! All metric families go through [`bind_metric`], which fixes the label
//! name set at creation time and propagates the registry's duplicate-name
//! error instead of swallowing it; the default exporter relies on that
//! error to detect re-entrant setup.

use std::fmt;

use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
};

use crate::error::ExporterError;
use crate::summary::{SummaryChild, SummaryVec};

/// The four metric kinds a tracker can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

/// A registered metric family with its label names fixed.
#[derive(Clone)]
pub enum MetricHandle {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
    Summary(SummaryVec),
}

/// One labeled series selected from a [`MetricHandle`].
#[derive(Clone)]
pub enum MetricSeries {
    Counter(prometheus::Counter),
    Gauge(prometheus::Gauge),
    Histogram(prometheus::Histogram),
    Summary(SummaryChild),
}

/// Create a metric of the given kind and register it.
///
/// `buckets` only applies to histograms; `None` keeps the backing crate's
/// default boundaries. A second call with the same name on the same
/// registry fails with the registry's duplicate error.
pub(crate) fn bind_metric(
    kind: MetricKind,
    name: &str,
    help: &str,
    label_names: &[&str],
    buckets: Option<Vec<f64>>,
    registry: &Registry,
) -> Result<MetricHandle, ExporterError> {
    let handle = match kind {
        MetricKind::Counter => {
            let metric = CounterVec::new(Opts::new(name, help), label_names)?;
            registry.register(Box::new(metric.clone()))?;
            MetricHandle::Counter(metric)
        }
        MetricKind::Gauge => {
            let metric = GaugeVec::new(Opts::new(name, help), label_names)?;
            registry.register(Box::new(metric.clone()))?;
            MetricHandle::Gauge(metric)
        }
        MetricKind::Histogram => {
            let mut opts = HistogramOpts::new(name, help);
            if let Some(buckets) = buckets {
                opts = opts.buckets(buckets);
            }
            let metric = HistogramVec::new(opts, label_names)?;
            registry.register(Box::new(metric.clone()))?;
            MetricHandle::Histogram(metric)
        }
        MetricKind::Summary => {
            let metric = SummaryVec::new(name, help, label_names)?;
            registry.register(Box::new(metric.clone()))?;
            MetricHandle::Summary(metric)
        }
    };
    Ok(handle)
}

impl fmt::Debug for MetricHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MetricHandle").field(&self.kind()).finish()
    }
}

impl MetricHandle {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricHandle::Counter(_) => MetricKind::Counter,
            MetricHandle::Gauge(_) => MetricKind::Gauge,
            MetricHandle::Histogram(_) => MetricKind::Histogram,
            MetricHandle::Summary(_) => MetricKind::Summary,
        }
    }

    /// Fetch or create the series for the given label values.
    pub fn with_label_values(&self, values: &[&str]) -> MetricSeries {
        match self {
            MetricHandle::Counter(m) => MetricSeries::Counter(m.with_label_values(values)),
            MetricHandle::Gauge(m) => MetricSeries::Gauge(m.with_label_values(values)),
            MetricHandle::Histogram(m) => MetricSeries::Histogram(m.with_label_values(values)),
            MetricHandle::Summary(m) => MetricSeries::Summary(m.with_label_values(values)),
        }
    }
}

impl MetricSeries {
    /// The gauge before-hook: bump the in-progress count.
    pub(crate) fn inc(&self) {
        match self {
            MetricSeries::Counter(m) => m.inc(),
            MetricSeries::Gauge(m) => m.inc(),
            MetricSeries::Histogram(_) | MetricSeries::Summary(_) => {}
        }
    }

    /// The gauge commit/revert: undo the before-hook increment.
    pub(crate) fn dec(&self) {
        if let MetricSeries::Gauge(m) = self {
            m.dec();
        }
    }

    pub(crate) fn observe(&self, value: f64) {
        match self {
            MetricSeries::Histogram(m) => m.observe(value),
            MetricSeries::Summary(m) => m.observe(value),
            MetricSeries::Counter(_) | MetricSeries::Gauge(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_each_kind() {
        let registry = Registry::new();
        for (kind, name) in [
            (MetricKind::Counter, "c"),
            (MetricKind::Gauge, "g"),
            (MetricKind::Histogram, "h"),
            (MetricKind::Summary, "s"),
        ] {
            let handle = bind_metric(kind, name, "help", &["l"], None, &registry).unwrap();
            assert_eq!(handle.kind(), kind);
            // families without a child series are dropped at gather time
            let series = handle.with_label_values(&["v"]);
            series.inc();
            series.observe(0.1);
        }
        assert_eq!(registry.gather().len(), 4);
    }

    #[test]
    fn test_duplicate_name_propagates() {
        let registry = Registry::new();
        bind_metric(MetricKind::Counter, "dup", "help", &[], None, &registry).unwrap();
        let err = bind_metric(MetricKind::Counter, "dup", "help", &[], None, &registry)
            .unwrap_err();
        assert!(err.is_duplicate_registration());
    }

    #[test]
    fn test_histogram_custom_buckets() {
        let registry = Registry::new();
        let handle = bind_metric(
            MetricKind::Histogram,
            "h",
            "help",
            &[],
            Some(vec![0.1, 1.0, 10.0]),
            &registry,
        )
        .unwrap();
        handle.with_label_values(&[]).observe(0.5);

        let families = registry.gather();
        let histogram = families[0].get_metric()[0].get_histogram();
        // three configured buckets; +Inf is implicit at exposition
        assert_eq!(histogram.get_bucket().len(), 3);
        assert_eq!(histogram.get_sample_count(), 1);
    }

    #[test]
    fn test_series_operations_by_kind() {
        let registry = Registry::new();
        let counter = bind_metric(MetricKind::Counter, "c", "help", &[], None, &registry).unwrap();
        counter.with_label_values(&[]).inc();
        let gauge = bind_metric(MetricKind::Gauge, "g", "help", &[], None, &registry).unwrap();
        let series = gauge.with_label_values(&[]);
        series.inc();
        series.inc();
        series.dec();

        let families = registry.gather();
        let by_name = |name: &str| {
            families
                .iter()
                .find(|f| f.get_name() == name)
                .expect("family")
        };
        assert_eq!(by_name("c").get_metric()[0].get_counter().get_value(), 1.0);
        assert_eq!(by_name("g").get_metric()[0].get_gauge().get_value(), 1.0);
    }
}
