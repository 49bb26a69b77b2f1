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
//! Multiprocess aggregation.
//!
//! When an application runs as several worker processes, each process keeps
//! its own in-memory registry and periodically flushes a JSON snapshot of it
//! to a shared directory, one file per pid. At scrape time the serving
//! process merges its live registry with every snapshot in the directory, so
//! the scrape sees the whole fleet regardless of which worker answered.
//!
//! The directory comes from the `PROMETHEUS_MULTIPROC_DIR` environment
//! variable; the legacy lowercase spelling `prometheus_multiproc_dir` is
//! accepted too.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use prometheus::{proto, Registry};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ExporterError;

/// Environment variable naming the shared snapshot directory.
pub const MULTIPROC_DIR_ENV: &str = "PROMETHEUS_MULTIPROC_DIR";
/// Legacy lowercase spelling of [`MULTIPROC_DIR_ENV`].
pub const MULTIPROC_DIR_ENV_LEGACY: &str = "prometheus_multiproc_dir";

const SNAPSHOT_PREFIX: &str = "promgate_";
const SNAPSHOT_SUFFIX: &str = ".json";

/// Multiprocess mode configuration: the shared snapshot directory.
#[derive(Debug, Clone)]
pub struct MultiprocessConfig {
    dir: PathBuf,
}

impl MultiprocessConfig {
    /// Use an explicit snapshot directory. It must already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ExporterError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(ExporterError::MultiprocessDirMissing);
        }
        Ok(Self { dir })
    }

    /// Read the snapshot directory from the environment, accepting both
    /// spellings of the variable.
    pub fn from_env() -> Result<Self, ExporterError> {
        let dir = std::env::var_os(MULTIPROC_DIR_ENV)
            .or_else(|| std::env::var_os(MULTIPROC_DIR_ENV_LEGACY))
            .ok_or(ExporterError::MultiprocessDirMissing)?;
        Self::new(PathBuf::from(dir))
    }

    /// Multiprocess mode if the environment asks for it, single-process
    /// mode otherwise.
    pub fn detect() -> Option<Self> {
        Self::from_env().ok()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, pid: u32) -> PathBuf {
        self.dir
            .join(format!("{SNAPSHOT_PREFIX}{pid}{SNAPSHOT_SUFFIX}"))
    }

    /// Write this process's snapshot. The file is written to a temporary
    /// name first and renamed into place, so readers never see a torn file.
    pub fn flush(&self, registry: &Registry) -> Result<(), ExporterError> {
        self.flush_as(registry, std::process::id())
    }

    fn flush_as(&self, registry: &Registry, pid: u32) -> Result<(), ExporterError> {
        let snapshot = RegistrySnapshot {
            pid,
            families: registry.gather().iter().map(FamilySnapshot::of).collect(),
        };
        let path = self.snapshot_path(pid);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), families = snapshot.families.len(), "flushed snapshot");
        Ok(())
    }

    /// Merge the live registry with every snapshot in the directory.
    ///
    /// The live registry is flushed first so the current process always
    /// contributes its latest values. Series are summed across processes.
    pub fn gather(&self, registry: &Registry) -> Result<Vec<proto::MetricFamily>, ExporterError> {
        self.flush(registry)?;

        let mut merged: BTreeMap<String, FamilySnapshot> = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(SNAPSHOT_PREFIX) || !name.ends_with(SNAPSHOT_SUFFIX) {
                continue;
            }
            let snapshot: RegistrySnapshot = match serde_json::from_slice(&fs::read(&path)?) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    // A worker may be mid-write with a stale tool or the
                    // file may be truncated from a crash; skip it rather
                    // than failing the whole scrape.
                    warn!(path = %path.display(), error = %err, "skipping unreadable snapshot");
                    continue;
                }
            };
            for family in snapshot.families {
                match merged.get_mut(&family.name) {
                    Some(existing) => existing.merge(family),
                    None => {
                        merged.insert(family.name.clone(), family);
                    }
                }
            }
        }

        Ok(merged.into_values().map(|f| f.into_proto()).collect())
    }

    /// Remove a dead worker's snapshot so its stale values stop being
    /// merged into scrapes.
    pub fn mark_process_dead(&self, pid: u32) -> Result<(), ExporterError> {
        let path = self.snapshot_path(pid);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Flush the registry on a fixed interval from a background task.
    pub fn spawn_flusher(
        &self,
        registry: Registry,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let config = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = config.flush(&registry) {
                    warn!(error = %err, "periodic snapshot flush failed");
                }
            }
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistrySnapshot {
    pid: u32,
    families: Vec<FamilySnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FamilySnapshot {
    name: String,
    help: String,
    kind: SnapshotKind,
    series: Vec<SeriesSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SnapshotKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

#[derive(Debug, Serialize, Deserialize)]
struct SeriesSnapshot {
    labels: Vec<(String, String)>,
    value: SampleValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SampleValue {
    Counter {
        value: f64,
    },
    Gauge {
        value: f64,
    },
    Histogram {
        sample_count: u64,
        sample_sum: f64,
        /// `(upper_bound, cumulative_count)` pairs; the implicit `+Inf`
        /// bucket is not stored (JSON cannot carry it) and is restored from
        /// `sample_count` at exposition.
        buckets: Vec<(f64, u64)>,
    },
    Summary {
        sample_count: u64,
        sample_sum: f64,
    },
}

impl FamilySnapshot {
    fn of(family: &proto::MetricFamily) -> Self {
        let kind = match family.get_field_type() {
            proto::MetricType::COUNTER => SnapshotKind::Counter,
            proto::MetricType::GAUGE => SnapshotKind::Gauge,
            proto::MetricType::HISTOGRAM => SnapshotKind::Histogram,
            proto::MetricType::SUMMARY => SnapshotKind::Summary,
            proto::MetricType::UNTYPED => SnapshotKind::Untyped,
        };
        let series = family
            .get_metric()
            .iter()
            .map(|metric| {
                let labels = metric
                    .get_label()
                    .iter()
                    .map(|p| (p.get_name().to_owned(), p.get_value().to_owned()))
                    .collect();
                let value = match kind {
                    SnapshotKind::Counter => SampleValue::Counter {
                        value: metric.get_counter().get_value(),
                    },
                    SnapshotKind::Gauge | SnapshotKind::Untyped => SampleValue::Gauge {
                        value: metric.get_gauge().get_value(),
                    },
                    SnapshotKind::Histogram => {
                        let histogram = metric.get_histogram();
                        SampleValue::Histogram {
                            sample_count: histogram.get_sample_count(),
                            sample_sum: histogram.get_sample_sum(),
                            buckets: histogram
                                .get_bucket()
                                .iter()
                                .filter(|b| b.get_upper_bound().is_finite())
                                .map(|b| (b.get_upper_bound(), b.get_cumulative_count()))
                                .collect(),
                        }
                    }
                    SnapshotKind::Summary => {
                        let summary = metric.get_summary();
                        SampleValue::Summary {
                            sample_count: summary.get_sample_count(),
                            sample_sum: summary.get_sample_sum(),
                        }
                    }
                };
                SeriesSnapshot { labels, value }
            })
            .collect();
        Self {
            name: family.get_name().to_owned(),
            help: family.get_help().to_owned(),
            kind,
            series,
        }
    }

    /// Fold another process's view of the same family into this one,
    /// summing series with identical label sets.
    fn merge(&mut self, other: FamilySnapshot) {
        for incoming in other.series {
            match self
                .series
                .iter_mut()
                .find(|existing| existing.labels == incoming.labels)
            {
                Some(existing) => existing.value.add(&incoming.value),
                None => self.series.push(incoming),
            }
        }
    }

    fn into_proto(self) -> proto::MetricFamily {
        let mut family = proto::MetricFamily::default();
        family.set_name(self.name);
        family.set_help(self.help);
        family.set_field_type(match self.kind {
            SnapshotKind::Counter => proto::MetricType::COUNTER,
            SnapshotKind::Gauge => proto::MetricType::GAUGE,
            SnapshotKind::Histogram => proto::MetricType::HISTOGRAM,
            SnapshotKind::Summary => proto::MetricType::SUMMARY,
            SnapshotKind::Untyped => proto::MetricType::UNTYPED,
        });

        for series in self.series {
            let mut metric = proto::Metric::default();
            for (name, value) in series.labels {
                let mut pair = proto::LabelPair::default();
                pair.set_name(name);
                pair.set_value(value);
                metric.mut_label().push(pair);
            }
            match series.value {
                SampleValue::Counter { value } => {
                    let mut counter = proto::Counter::default();
                    counter.set_value(value);
                    metric.set_counter(counter);
                }
                SampleValue::Gauge { value } => {
                    let mut gauge = proto::Gauge::default();
                    gauge.set_value(value);
                    metric.set_gauge(gauge);
                }
                SampleValue::Histogram {
                    sample_count,
                    sample_sum,
                    buckets,
                } => {
                    let mut histogram = proto::Histogram::default();
                    histogram.set_sample_count(sample_count);
                    histogram.set_sample_sum(sample_sum);
                    for (upper_bound, cumulative_count) in buckets {
                        let mut bucket = proto::Bucket::default();
                        bucket.set_upper_bound(upper_bound);
                        bucket.set_cumulative_count(cumulative_count);
                        histogram.mut_bucket().push(bucket);
                    }
                    metric.set_histogram(histogram);
                }
                SampleValue::Summary {
                    sample_count,
                    sample_sum,
                } => {
                    let mut summary = proto::Summary::default();
                    summary.set_sample_count(sample_count);
                    summary.set_sample_sum(sample_sum);
                    metric.set_summary(summary);
                }
            }
            family.mut_metric().push(metric);
        }
        family
    }
}

impl SampleValue {
    fn add(&mut self, other: &SampleValue) {
        match (self, other) {
            (SampleValue::Counter { value }, SampleValue::Counter { value: rhs }) => {
                *value += rhs;
            }
            (SampleValue::Gauge { value }, SampleValue::Gauge { value: rhs }) => {
                *value += rhs;
            }
            (
                SampleValue::Histogram {
                    sample_count,
                    sample_sum,
                    buckets,
                },
                SampleValue::Histogram {
                    sample_count: rhs_count,
                    sample_sum: rhs_sum,
                    buckets: rhs_buckets,
                },
            ) => {
                *sample_count += rhs_count;
                *sample_sum += rhs_sum;
                for (upper_bound, cumulative_count) in rhs_buckets {
                    match buckets.iter_mut().find(|(b, _)| b == upper_bound) {
                        Some((_, count)) => *count += cumulative_count,
                        None => buckets.push((*upper_bound, *cumulative_count)),
                    }
                }
                buckets.sort_by(|(a, _), (b, _)| a.total_cmp(b));
            }
            (
                SampleValue::Summary {
                    sample_count,
                    sample_sum,
                },
                SampleValue::Summary {
                    sample_count: rhs_count,
                    sample_sum: rhs_sum,
                },
            ) => {
                *sample_count += rhs_count;
                *sample_sum += rhs_sum;
            }
            // Mismatched kinds under one name means the snapshots disagree;
            // keep the first value seen.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts};

    fn registry_with_counter(name: &str, by: f64) -> Registry {
        let registry = Registry::new();
        let counter = CounterVec::new(Opts::new(name, "help"), &["path"]).unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.with_label_values(&["/a"]).inc_by(by);
        registry
    }

    #[test]
    fn test_env_missing_is_error() {
        std::env::remove_var(MULTIPROC_DIR_ENV);
        std::env::remove_var(MULTIPROC_DIR_ENV_LEGACY);
        assert!(matches!(
            MultiprocessConfig::from_env(),
            Err(ExporterError::MultiprocessDirMissing)
        ));
        assert!(MultiprocessConfig::detect().is_none());
    }

    #[test]
    fn test_new_rejects_missing_dir() {
        assert!(MultiprocessConfig::new("/definitely/not/a/dir").is_err());
    }

    #[test]
    fn test_flush_and_merge_sums_across_pids() {
        let dir = tempfile::tempdir().unwrap();
        let config = MultiprocessConfig::new(dir.path()).unwrap();

        config
            .flush_as(&registry_with_counter("reqs", 2.0), 101)
            .unwrap();
        config
            .flush_as(&registry_with_counter("reqs", 3.0), 102)
            .unwrap();

        let live = registry_with_counter("reqs", 1.0);
        let families = config.gather(&live).unwrap();
        let family = families.iter().find(|f| f.get_name() == "reqs").unwrap();
        assert_eq!(family.get_metric()[0].get_counter().get_value(), 6.0);
    }

    #[test]
    fn test_mark_process_dead_removes_contribution() {
        let dir = tempfile::tempdir().unwrap();
        let config = MultiprocessConfig::new(dir.path()).unwrap();

        config
            .flush_as(&registry_with_counter("reqs", 5.0), 201)
            .unwrap();
        config.mark_process_dead(201).unwrap();
        // removing an absent snapshot is fine too
        config.mark_process_dead(201).unwrap();

        let live = registry_with_counter("reqs", 1.0);
        let families = config.gather(&live).unwrap();
        let family = families.iter().find(|f| f.get_name() == "reqs").unwrap();
        assert_eq!(family.get_metric()[0].get_counter().get_value(), 1.0);
    }

    #[test]
    fn test_histogram_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = MultiprocessConfig::new(dir.path()).unwrap();

        let registry = Registry::new();
        let histogram = HistogramVec::new(
            HistogramOpts::new("lat", "help").buckets(vec![0.5, 1.0]),
            &[],
        )
        .unwrap();
        registry.register(Box::new(histogram.clone())).unwrap();
        histogram.with_label_values(&[]).observe(0.25);
        histogram.with_label_values(&[]).observe(0.75);

        let families = config.gather(&registry).unwrap();
        let family = families.iter().find(|f| f.get_name() == "lat").unwrap();
        let merged = family.get_metric()[0].get_histogram();
        assert_eq!(merged.get_sample_count(), 2);
        let buckets = merged.get_bucket();
        assert!(buckets.iter().all(|b| b.get_upper_bound().is_finite()));
        assert_eq!(buckets[0].get_cumulative_count(), 1);
        assert_eq!(buckets[1].get_cumulative_count(), 2);
    }

    #[tokio::test]
    async fn test_spawn_flusher_writes_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let config = MultiprocessConfig::new(dir.path()).unwrap();

        // first tick fires immediately
        let flusher =
            config.spawn_flusher(registry_with_counter("reqs", 4.0), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        flusher.abort();

        let path = dir
            .path()
            .join(format!("promgate_{}.json", std::process::id()));
        let snapshot: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(snapshot["families"][0]["name"], "reqs");
        assert_eq!(snapshot["families"][0]["series"][0]["value"]["value"], 4.0);
    }

    #[test]
    fn test_unreadable_snapshot_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = MultiprocessConfig::new(dir.path()).unwrap();
        fs::write(dir.path().join("promgate_999.json"), b"not json").unwrap();

        let live = registry_with_counter("reqs", 1.0);
        let families = config.gather(&live).unwrap();
        let family = families.iter().find(|f| f.get_name() == "reqs").unwrap();
        assert_eq!(family.get_metric()[0].get_counter().get_value(), 1.0);
    }
}
