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
//! Standalone HTTP server for the scrape endpoint.
//!
//! Serves the exporter's metrics on a separate port so the scrape traffic
//! stays off the application listener. Useful when the application port
//! sits behind authentication the Prometheus server does not have.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::exporter::HttpMetrics;

/// Configuration for [`MetricsServer`].
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Address to bind the server to
    pub bind_address: String,
    /// Whether the server is enabled
    pub enabled: bool,
}

impl MetricsConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            bind_address: "127.0.0.1".to_owned(),
            enabled: true,
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// HTTP server exposing an exporter's scrape endpoint out of band.
///
/// The served endpoint is identical to the one [`HttpMetrics::metrics_router`]
/// mounts in the application: same path, same filtering and format
/// negotiation, same multiprocess aggregation.
#[derive(Clone)]
pub struct MetricsServer {
    metrics: HttpMetrics,
    config: MetricsConfig,
}

impl MetricsServer {
    pub fn new(metrics: HttpMetrics, port: u16) -> Self {
        Self {
            metrics,
            config: MetricsConfig::with_port(port),
        }
    }

    pub fn with_config(metrics: HttpMetrics, config: MetricsConfig) -> Self {
        Self { metrics, config }
    }

    pub fn bind_address(&self) -> String {
        self.config.socket_addr()
    }

    /// Start the metrics server
    ///
    /// This method runs the server indefinitely. It should typically be spawned
    /// as a background task.
    ///
    /// # Example
    /// ```ignore
    /// let server = MetricsServer::new(metrics, 9090);
    /// tokio::spawn(async move {
    ///     server.serve().await
    /// });
    /// ```
    pub async fn serve(self) -> anyhow::Result<()> {
        if !self.config.enabled {
            info!("Metrics server disabled");
            return Ok(());
        }

        let addr = self.config.socket_addr();
        let path = self.metrics.scrape_path().to_owned();
        info!("Starting metrics server on http://{}{}", addr, path);

        let app = Router::new()
            .merge(self.metrics.metrics_router())
            .route("/health", get(health_handler));

        let listener = TcpListener::bind(&addr).await?;
        info!("Metrics server listening on {}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| anyhow::anyhow!("Metrics server error: {}", e))
    }
}

/// Handler for `/health` endpoint
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_server_creation() {
        let server = MetricsServer::new(HttpMetrics::new(), 9191);
        assert_eq!(server.bind_address(), "127.0.0.1:9191");
    }

    #[tokio::test]
    async fn test_server_with_config() {
        let config = MetricsConfig {
            port: 8080,
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
        };
        let server = MetricsServer::with_config(HttpMetrics::new(), config);
        assert_eq!(server.bind_address(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = HttpMetrics::new();
        metrics
            .info("app_info", "Application info", &[("version", "1.0.3")])
            .unwrap();

        let server = MetricsServer::new(metrics, 19390);
        let addr = server.bind_address().clone();

        tokio::spawn(async move {
            let _ = server.serve().await;
        });

        // Give server time to start
        sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let url = format!("http://{}/metrics", addr);

        match client.get(&url).send().await {
            Ok(response) => {
                assert_eq!(response.status(), StatusCode::OK.as_u16());
                let body = response.text().await.unwrap();
                assert!(body.contains("app_info"));
            }
            Err(e) => {
                // Server might not be ready yet, that's ok for this test
                eprintln!("Warning: Could not connect to metrics server: {}", e);
            }
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = MetricsServer::new(HttpMetrics::new(), 19391);
        let addr = server.bind_address().clone();

        tokio::spawn(async move {
            let _ = server.serve().await;
        });

        sleep(Duration::from_millis(100)).await;

        let client = reqwest::Client::new();
        let url = format!("http://{}/health", addr);

        match client.get(&url).send().await {
            Ok(response) => {
                assert_eq!(response.status(), StatusCode::OK.as_u16());
                assert_eq!(response.text().await.unwrap(), "OK");
            }
            Err(e) => {
                eprintln!("Warning: Could not connect to health endpoint: {}", e);
            }
        }
    }

    #[tokio::test]
    async fn test_disabled_server() {
        let config = MetricsConfig {
            port: 9392,
            enabled: false,
            bind_address: "127.0.0.1".to_string(),
        };
        let server = MetricsServer::with_config(HttpMetrics::new(), config);
        assert!(server.serve().await.is_ok());
    }
}
