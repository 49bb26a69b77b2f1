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
//! Demo application wiring every promgate feature into a small axum app.

use std::time::Duration;

use anyhow::Result;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{middleware, routing::get, Router};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use promgate::{DefaultsConfig, GroupBy, HttpMetrics, MetricsConfig, MetricsServer};

#[derive(Parser, Debug)]
#[command(name = "promgate-demo", about = "Instrumented demo HTTP server")]
struct Args {
    /// Address to bind the application server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port for the application server
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Serve metrics on this separate port instead of the app router
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promgate_demo=debug,promgate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let metrics = HttpMetrics::builder()
        .static_label("service", "demo")
        .exclude_path("/internal")
        .build()?;
    let defaults = metrics.export_defaults(
        DefaultsConfig::default().group_by(GroupBy::MatchedRule),
    )?;

    let by_item = metrics
        .counter("demo_item_requests_total", "Requests per item")
        .request_label("item", |info| {
            info.path().rsplit('/').next().unwrap_or("").to_owned()
        })
        .response_label("status", |r| r.status().as_u16().to_string())
        .build()?;
    let slow_latency = metrics
        .histogram("demo_slow_seconds", "Latency of the slow endpoint")
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0])
        .build()?;

    let mut app = Router::new()
        .route("/", get(index))
        .route("/items/:id", get(item).layer(by_item.layer()))
        .route("/slow", get(slow).layer(slow_latency.layer()))
        .route(
            "/ping",
            get(ping).route_layer(middleware::from_fn(promgate::do_not_track)),
        )
        .layer(defaults);

    match args.metrics_port {
        Some(port) => {
            let server =
                MetricsServer::with_config(metrics.clone(), MetricsConfig::with_port(port));
            tokio::spawn(async move {
                if let Err(err) = server.serve().await {
                    tracing::error!("Metrics server failed: {}", err);
                }
            });
        }
        None => {
            app = app.merge(metrics.metrics_router());
        }
    }

    let addr = format!("{}:{}", args.bind, args.port);
    tracing::info!("Demo server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> &'static str {
    "promgate demo\n"
}

async fn item(Path(id): Path<u32>) -> (StatusCode, String) {
    if id == 0 {
        (StatusCode::NOT_FOUND, "no such item\n".to_owned())
    } else {
        (StatusCode::OK, format!("item {id}\n"))
    }
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_millis(100)).await;
    "done\n"
}

async fn ping() -> &'static str {
    "pong\n"
}
