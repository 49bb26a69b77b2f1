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
//! Per-route metric tracking.
//!
//! A [`Tracker`] wraps the services below it and commits one observation
//! per call: counters count invocations, histograms and summaries observe
//! wall-clock time, gauges count in-progress calls (incremented before the
//! inner service runs, decremented after, whatever the outcome).
//!
//! All configuration is validated in [`TrackerBuilder::build`]; nothing
//! configuration-related can fail while a request is in flight. Inner
//! service failures are recorded against a synthetic 500 view and then
//! re-propagated untouched.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::Request;
use axum::response::Response;
use tower::{Layer, Service};

use crate::context::context_for;
use crate::error::ExporterError;
use crate::exporter::HttpMetrics;
use crate::labels::{LabelSet, LabelSource, RequestInfo, ResponseView};
use crate::registry::{bind_metric, MetricHandle, MetricKind, MetricSeries};

/// A metric bound to a registry, ready to wrap routes.
///
/// Created through [`HttpMetrics::counter`], [`HttpMetrics::gauge`],
/// [`HttpMetrics::histogram`] or [`HttpMetrics::summary`]. Clones share
/// the same metric, so one tracker can wrap several routes.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    kind: MetricKind,
    handle: MetricHandle,
    labels: LabelSet,
    exporter: HttpMetrics,
}

impl Tracker {
    /// Layer for wrapping individual routes.
    pub fn layer(&self) -> TrackLayer {
        TrackLayer {
            tracker: self.clone(),
            as_default: false,
        }
    }

    /// Layer for applying this tracker to every endpoint of a router, the
    /// way the built-in default metrics are. Honors the instance's
    /// exclusion rules when `exclude_user_defaults` is set.
    pub fn default_layer(&self) -> TrackLayer {
        TrackLayer {
            tracker: self.clone(),
            as_default: true,
        }
    }

    fn series(&self, info: &RequestInfo, response: Option<&ResponseView<'_>>) -> MetricSeries {
        let values = self.inner.labels.resolve(info, response);
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        self.inner.handle.with_label_values(&refs)
    }

    fn commit(&self, series: &MetricSeries, elapsed: f64) {
        match self.inner.kind {
            MetricKind::Counter => series.inc(),
            MetricKind::Gauge => series.dec(),
            MetricKind::Histogram | MetricKind::Summary => series.observe(elapsed),
        }
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("kind", &self.inner.kind)
            .field("labels", &self.inner.labels.names())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Tracker`].
pub struct TrackerBuilder {
    exporter: HttpMetrics,
    kind: MetricKind,
    name: String,
    help: String,
    labels: LabelSet,
    buckets: Option<Vec<f64>>,
}

impl TrackerBuilder {
    pub(crate) fn new(exporter: HttpMetrics, kind: MetricKind, name: String, help: String) -> Self {
        Self {
            exporter,
            kind,
            name,
            help,
            labels: LabelSet::new(),
            buckets: None,
        }
    }

    /// Attach a label with an explicit value source.
    pub fn label(mut self, name: impl Into<String>, source: LabelSource) -> Self {
        self.labels.insert(name, source);
        self
    }

    /// Attach a constant label.
    pub fn const_label(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.label(name, LabelSource::constant(value))
    }

    /// Attach a label derived from the request snapshot.
    pub fn request_label<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RequestInfo) -> String + Send + Sync + 'static,
    {
        self.label(name, LabelSource::from_request(f))
    }

    /// Attach a label derived from the finished response.
    pub fn response_label<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ResponseView<'_>) -> String + Send + Sync + 'static,
    {
        self.label(name, LabelSource::from_response(f))
    }

    /// Histogram bucket boundaries. Ignored for other kinds.
    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    /// Validate the configuration and register the metric.
    pub fn build(self) -> Result<Tracker, ExporterError> {
        let labels = LabelSet::merged(self.exporter.static_labels(), &self.labels);

        // Gauges resolve their series before the handler runs, when no
        // response exists yet.
        if self.kind == MetricKind::Gauge {
            if let Some(label) = labels.first_response_label() {
                return Err(ExporterError::ResponseLabelOnGauge(label.to_owned()));
            }
        }

        let names = labels.names();
        let handle = bind_metric(
            self.kind,
            &self.name,
            &self.help,
            &names,
            self.buckets,
            self.exporter.registry(),
        )?;

        Ok(Tracker {
            inner: Arc::new(TrackerInner {
                kind: self.kind,
                handle,
                labels,
                exporter: self.exporter,
            }),
        })
    }
}

/// Tower layer produced by a [`Tracker`].
#[derive(Clone)]
pub struct TrackLayer {
    tracker: Tracker,
    as_default: bool,
}

impl<S> Layer<S> for TrackLayer {
    type Service = TrackService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrackService {
            inner,
            tracker: self.tracker.clone(),
            as_default: self.as_default,
        }
    }
}

/// The tracking middleware service.
#[derive(Clone)]
pub struct TrackService<S> {
    inner: S,
    tracker: Tracker,
    as_default: bool,
}

impl<S> Service<Request> for TrackService<S>
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
        let tracker = self.tracker.clone();
        let as_default = self.as_default;
        // Take the service that was polled ready, leave the clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let ctx = context_for(&mut req);
            let info = RequestInfo::from_request(&req);

            let skip = ctx.is_exclude_all()
                || (as_default
                    && tracker.inner.exporter.exclude_user_defaults()
                    && tracker.inner.exporter.exclusions().matches(info.path()));
            if skip {
                return inner.call(req).await;
            }

            // In-progress gauges increment before the handler body runs.
            let before = if tracker.inner.kind == MetricKind::Gauge {
                let series = tracker.series(&info, None);
                series.inc();
                Some(series)
            } else {
                None
            };

            let start = Instant::now();
            let outcome = inner.call(req).await;
            let elapsed = start.elapsed().as_secs_f64();

            // The handler opted the whole request out mid-flight: drop the
            // observation and undo the before-hook.
            if ctx.is_exclude_all() {
                if let Some(series) = before {
                    series.dec();
                }
                return outcome;
            }

            match outcome {
                Ok(response) => {
                    let series = match before {
                        Some(series) => series,
                        None => {
                            let view = ResponseView::of(&response);
                            tracker.series(&info, Some(&view))
                        }
                    };
                    tracker.commit(&series, elapsed);
                    Ok(response)
                }
                Err(err) => {
                    // No response to resolve labels from; record against a
                    // synthetic 500 and let the failure travel on unchanged.
                    let series = match before {
                        Some(series) => series,
                        None => {
                            let view = ResponseView::server_error();
                            tracker.series(&info, Some(&view))
                        }
                    };
                    tracker.commit(&series, elapsed);
                    Err(err)
                }
            }
        })
    }
}
