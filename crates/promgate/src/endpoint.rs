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
//! The scrape endpoint.
//!
//! A small router serving the exporter's registry in the Prometheus text
//! format, or the protobuf format when the scraper asks for it. Repeated
//! `name[]` query parameters restrict the output to the named families,
//! matching what the Prometheus server sends for federated scrapes.
//! Requests to the endpoint itself are marked do-not-track so scrapes do
//! not inflate the default HTTP metrics.

use axum::extract::RawQuery;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{proto, Encoder, ProtobufEncoder, TextEncoder};
use tracing::error;

use crate::context::do_not_track;
use crate::exporter::HttpMetrics;

const PROTOBUF_CONTENT_TYPE: &str = "application/vnd.google.protobuf";

impl HttpMetrics {
    /// A router serving the scrape endpoint on the configured path, to be
    /// merged into the application router.
    pub fn metrics_router(&self) -> Router {
        let metrics = self.clone();
        Router::new()
            .route(
                self.scrape_path(),
                get(move |headers: HeaderMap, RawQuery(query): RawQuery| {
                    let metrics = metrics.clone();
                    async move { scrape(&metrics, &headers, query.as_deref()) }
                }),
            )
            .route_layer(middleware::from_fn(do_not_track))
    }
}

fn scrape(metrics: &HttpMetrics, headers: &HeaderMap, query: Option<&str>) -> Response {
    let mut families = match metrics.multiprocess() {
        Some(multiprocess) => match multiprocess.gather(metrics.registry()) {
            Ok(families) => families,
            Err(err) => {
                error!(error = %err, "multiprocess aggregation failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "multiprocess aggregation failed\n",
                )
                    .into_response();
            }
        },
        None => metrics.registry().gather(),
    };

    let filter = name_filter(query.unwrap_or(""));
    if !filter.is_empty() {
        families.retain(|family| filter.iter().any(|name| name == family.get_name()));
    }

    if wants_protobuf(headers) {
        encode_with(&ProtobufEncoder::new(), &families)
    } else {
        encode_with(&TextEncoder::new(), &families)
    }
}

fn encode_with<E: Encoder>(encoder: &E, families: &[proto::MetricFamily]) -> Response {
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(families, &mut buffer) {
        error!(error = %err, "metrics encoding failed");
        return (StatusCode::INTERNAL_SERVER_ERROR, "encoding failed\n").into_response();
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_owned())],
        buffer,
    )
        .into_response()
}

fn wants_protobuf(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(PROTOBUF_CONTENT_TYPE))
}

/// Family names requested via repeated `name[]` parameters. The bracket
/// pair arrives either literally or percent-encoded depending on the
/// scraper.
fn name_filter(query: &str) -> Vec<String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let is_name = key == "name[]" || key.eq_ignore_ascii_case("name%5b%5d");
            (is_name && !value.is_empty()).then(|| value.to_owned())
        })
        .collect()
}
