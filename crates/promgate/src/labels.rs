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
//! Label sources and label-set resolution.
//!
//! A metric's label names are fixed when it is registered; the *values* may
//! be constants or derived per call from the request or the finished
//! response. [`LabelSource`] captures the three shapes as an explicit sum
//! type so the choice is made once at registration time.

use std::fmt;
use std::sync::Arc;

use axum::extract::{MatchedPath, Request};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;

/// A snapshot of the request taken before the handler runs.
///
/// Request-derived labels read from this snapshot, so they observe the same
/// state in the before-hook and commit phases of a single call.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    method: Method,
    path: String,
    query: Option<String>,
    matched_rule: Option<String>,
}

impl RequestInfo {
    pub(crate) fn from_request(req: &Request) -> Self {
        Self {
            method: req.method().clone(),
            path: req.uri().path().to_owned(),
            query: req.uri().query().map(str::to_owned),
            matched_rule: req
                .extensions()
                .get::<MatchedPath>()
                .map(|m| m.as_str().to_owned()),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path including the query string, when one was sent.
    pub fn full_path(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// The matched route pattern (e.g. `/items/:id`), falling back to the
    /// raw path when the request was not routed through a matcher.
    pub fn matched_rule(&self) -> &str {
        self.matched_rule.as_deref().unwrap_or(&self.path)
    }
}

/// A borrowed view of the finished response, handed to response-derived
/// label sources. When the inner service fails outright the engine
/// synthesizes a 500 view so the observation still carries labels.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    status: StatusCode,
    headers: Option<&'a HeaderMap>,
}

impl<'a> ResponseView<'a> {
    pub(crate) fn of(response: &'a Response) -> Self {
        Self {
            status: response.status(),
            headers: Some(response.headers()),
        }
    }

    pub(crate) fn server_error() -> ResponseView<'static> {
        ResponseView {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .and_then(|h| h.get(name))
            .and_then(|v| v.to_str().ok())
    }
}

/// Where a label value comes from at observation time.
#[derive(Clone)]
pub enum LabelSource {
    /// The same value for every observation.
    Constant(String),
    /// Derived from the request snapshot.
    Request(Arc<dyn Fn(&RequestInfo) -> String + Send + Sync>),
    /// Derived from the finished response.
    Response(Arc<dyn Fn(&ResponseView<'_>) -> String + Send + Sync>),
}

impl LabelSource {
    pub fn constant(value: impl Into<String>) -> Self {
        LabelSource::Constant(value.into())
    }

    pub fn from_request<F>(f: F) -> Self
    where
        F: Fn(&RequestInfo) -> String + Send + Sync + 'static,
    {
        LabelSource::Request(Arc::new(f))
    }

    pub fn from_response<F>(f: F) -> Self
    where
        F: Fn(&ResponseView<'_>) -> String + Send + Sync + 'static,
    {
        LabelSource::Response(Arc::new(f))
    }

    fn resolve(&self, info: &RequestInfo, response: Option<&ResponseView<'_>>) -> String {
        match self {
            LabelSource::Constant(v) => v.clone(),
            LabelSource::Request(f) => f(info),
            // Gauges reject response sources at build time, so `response`
            // is always present on this arm.
            LabelSource::Response(f) => response.map(|r| f(r)).unwrap_or_default(),
        }
    }
}

impl fmt::Debug for LabelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelSource::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            LabelSource::Request(_) => f.write_str("Request(..)"),
            LabelSource::Response(_) => f.write_str("Response(..)"),
        }
    }
}

/// Ordered mapping of label name to value source.
///
/// Insertion order is the label order used at registration; overlaying an
/// existing name replaces its source but keeps its position, matching how
/// instance-wide static labels are overridden per metric.
#[derive(Debug, Clone, Default)]
pub struct LabelSet {
    entries: Vec<(String, LabelSource)>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Static labels first, then the per-metric labels on top.
    pub(crate) fn merged(static_labels: &[(String, String)], specific: &LabelSet) -> Self {
        let mut set = LabelSet::new();
        for (name, value) in static_labels {
            set.insert(name.clone(), LabelSource::constant(value.clone()));
        }
        for (name, source) in &specific.entries {
            set.insert(name.clone(), source.clone());
        }
        set
    }

    pub fn insert(&mut self, name: impl Into<String>, source: LabelSource) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = source;
        } else {
            self.entries.push((name, source));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// The first label whose value would come from the response, if any.
    pub(crate) fn first_response_label(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, s)| matches!(s, LabelSource::Response(_)))
            .map(|(n, _)| n.as_str())
    }

    /// Resolve every label value, in name order.
    pub(crate) fn resolve(
        &self,
        info: &RequestInfo,
        response: Option<&ResponseView<'_>>,
    ) -> Vec<String> {
        self.entries
            .iter()
            .map(|(_, source)| source.resolve(info, response))
            .collect()
    }
}
