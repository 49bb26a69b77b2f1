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
//! Quantile-less summary metric.
//!
//! The backing `prometheus` crate offers no Summary type, so this is a
//! small custom [`Collector`]: per label combination it keeps an
//! observation count and a running sum, and exposes them as a `summary`
//! family (`<name>_count` / `<name>_sum`, no quantiles).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use prometheus::core::{Atomic, AtomicF64, AtomicU64, Collector, Desc};
use prometheus::proto;

/// A summary metric family with variable labels.
///
/// Clones share the same underlying series, mirroring how the vector
/// types in the backing crate behave.
#[derive(Clone)]
pub struct SummaryVec {
    core: Arc<SummaryVecCore>,
}

struct SummaryVecCore {
    desc: Desc,
    children: RwLock<BTreeMap<Vec<String>, SummaryChild>>,
}

/// One labeled series of a [`SummaryVec`].
#[derive(Clone, Default)]
pub struct SummaryChild {
    inner: Arc<SummaryCore>,
}

struct SummaryCore {
    count: AtomicU64,
    sum: AtomicF64,
}

impl Default for SummaryCore {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicF64::new(0.0),
        }
    }
}

impl SummaryChild {
    pub fn observe(&self, value: f64) {
        self.inner.count.inc_by(1);
        self.inner.sum.inc_by(value);
    }

    pub fn count(&self) -> u64 {
        self.inner.count.get()
    }

    pub fn sum(&self) -> f64 {
        self.inner.sum.get()
    }
}

impl SummaryVec {
    pub fn new(name: &str, help: &str, label_names: &[&str]) -> prometheus::Result<Self> {
        let desc = Desc::new(
            name.to_owned(),
            help.to_owned(),
            label_names.iter().map(|s| (*s).to_owned()).collect(),
            HashMap::new(),
        )?;
        Ok(Self {
            core: Arc::new(SummaryVecCore {
                desc,
                children: RwLock::new(BTreeMap::new()),
            }),
        })
    }

    /// Fetch or create the series for the given label values.
    ///
    /// The caller supplies exactly as many values as the metric has label
    /// names; the engine builds both from the same label set, so the
    /// cardinality always lines up.
    pub fn with_label_values(&self, values: &[&str]) -> SummaryChild {
        let key: Vec<String> = values.iter().map(|s| (*s).to_owned()).collect();
        if let Ok(children) = self.core.children.read() {
            if let Some(child) = children.get(&key) {
                return child.clone();
            }
        }
        let mut children = match self.core.children.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        children.entry(key).or_default().clone()
    }
}

impl Collector for SummaryVec {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.core.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let children = match self.core.children.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut family = proto::MetricFamily::default();
        family.set_name(self.core.desc.fq_name.clone());
        family.set_help(self.core.desc.help.clone());
        family.set_field_type(proto::MetricType::SUMMARY);

        for (values, child) in children.iter() {
            let mut metric = proto::Metric::default();
            for (name, value) in self.core.desc.variable_labels.iter().zip(values) {
                let mut pair = proto::LabelPair::default();
                pair.set_name(name.clone());
                pair.set_value(value.clone());
                metric.mut_label().push(pair);
            }
            let mut summary = proto::Summary::default();
            summary.set_sample_count(child.count());
            summary.set_sample_sum(child.sum());
            metric.set_summary(summary);
            family.mut_metric().push(metric);
        }

        vec![family]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn test_observe_accumulates() {
        let summary = SummaryVec::new("lat", "latency", &["path"]).unwrap();
        let child = summary.with_label_values(&["/a"]);
        child.observe(0.5);
        child.observe(1.5);
        assert_eq!(child.count(), 2);
        assert!((child.sum() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_children_are_shared() {
        let summary = SummaryVec::new("lat", "latency", &["path"]).unwrap();
        summary.with_label_values(&["/a"]).observe(1.0);
        assert_eq!(summary.with_label_values(&["/a"]).count(), 1);
        assert_eq!(summary.with_label_values(&["/b"]).count(), 0);
    }

    #[test]
    fn test_collect_emits_summary_family() {
        let summary = SummaryVec::new("lat", "latency", &["path"]).unwrap();
        summary.with_label_values(&["/a"]).observe(0.25);

        let families = summary.collect();
        assert_eq!(families.len(), 1);
        let family = &families[0];
        assert_eq!(family.get_name(), "lat");
        assert_eq!(family.get_field_type(), proto::MetricType::SUMMARY);
        let metric = &family.get_metric()[0];
        assert_eq!(metric.get_label()[0].get_value(), "/a");
        assert_eq!(metric.get_summary().get_sample_count(), 1);
    }

    #[test]
    fn test_registers_and_detects_duplicates() {
        let registry = Registry::new();
        let summary = SummaryVec::new("lat", "latency", &[]).unwrap();
        registry.register(Box::new(summary.clone())).unwrap();

        let duplicate = SummaryVec::new("lat", "latency", &[]).unwrap();
        let err = registry.register(Box::new(duplicate)).unwrap_err();
        assert!(matches!(err, prometheus::Error::AlreadyReg));

        summary.with_label_values(&[]).observe(1.0);
        let gathered = registry.gather();
        assert_eq!(gathered[0].get_name(), "lat");
    }
}
