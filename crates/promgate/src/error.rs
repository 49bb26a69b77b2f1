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
//! Error types for exporter configuration and multiprocess aggregation.

use thiserror::Error;

/// Errors surfaced while configuring the exporter or aggregating snapshots.
///
/// Everything in here is a setup-time failure: trackers and default metric
/// layers validate their configuration when they are built, never while a
/// request is in flight.
#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("metrics registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("invalid grouping label name `{0}`: must be a valid Prometheus label identifier")]
    InvalidGroupLabel(String),

    #[error(
        "label `{0}` derives its value from the response and cannot be used \
         on a gauge; gauges resolve their series before the handler runs"
    )]
    ResponseLabelOnGauge(String),

    #[error("invalid exclusion pattern `{pattern}`: {source}")]
    InvalidExclusionPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(
        "env prometheus_multiproc_dir/PROMETHEUS_MULTIPROC_DIR \
         is not set or not a directory"
    )]
    MultiprocessDirMissing,

    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot decode error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl ExporterError {
    /// Whether this error is the backing registry reporting a duplicate
    /// metric registration. The default exporter uses this as its
    /// "already installed" guard.
    pub fn is_duplicate_registration(&self) -> bool {
        matches!(self, ExporterError::Prometheus(prometheus::Error::AlreadyReg))
    }
}
