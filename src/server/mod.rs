//! The bundled synthetic test server.
//!
//! Hosts the endpoints the measurement core depends on — `HEAD`/`GET
//! /probe`, `GET /payload/{mb}`, `POST /upload`, `GET /info` — with
//! artificial delays drawn from configurable [`NetworkConditions`]
//! envelopes. Useful both as the reference server for the CLI's `serve`
//! subcommand and, spawned in-process, as a deterministic fixture for
//! integration tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, head, post};
use axum::Router;
use bytes::Bytes;
use log::info;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;

use crate::errors::{MeasureError, Result};

pub mod conditions;
mod routes;

pub use conditions::{NetworkConditions, Shaper};

/// Size of the fixed download payload served by `GET /probe`.
pub const PROBE_PAYLOAD_BYTES: usize = 2 * 1024 * 1024;

/// Upload test payload tiers, in MiB.
pub const PAYLOAD_TIERS_MB: [u64; 6] = [1, 2, 4, 5, 10, 25];

/// Uploads beyond this size are rejected outright.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Test server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: SocketAddr,
    /// RNG seed for reproducible shaping; entropy-seeded when absent.
    pub seed: Option<u64>,
    /// Synthetic network envelopes.
    pub conditions: NetworkConditions,
    /// ISP label reported by `GET /info`.
    pub isp: String,
    /// Data-center label reported by `GET /info`.
    pub data_center: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            seed: None,
            conditions: NetworkConditions::default(),
            isp: "Development Environment".to_string(),
            data_center: "Local Server".to_string(),
        }
    }
}

/// Shared state behind the route handlers.
pub(crate) struct ServerState {
    pub(crate) shaper: Shaper,
    pub(crate) probe_payload: Bytes,
    pub(crate) payloads: HashMap<u64, Bytes>,
    pub(crate) isp: String,
    pub(crate) data_center: String,
}

/// The synthetic test server.
pub struct TestServer {
    config: ServerConfig,
}

impl TestServer {
    /// Create a server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Serve until ctrl-c, then shut down gracefully.
    pub async fn serve(self) -> Result<()> {
        let listener = bind(self.config.bind).await?;
        let addr = listener.local_addr().map_err(|error| {
            MeasureError::config("could not resolve listen address")
                .with_source(error)
        })?;
        info!("test server listening on http://{}", addr);

        let app = self.into_router();

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down test server");
        })
        .await
        .map_err(|error| {
            MeasureError::new(
                crate::errors::ErrorKind::Unknown,
                "test server failed",
            )
            .with_source(error)
        })
    }

    /// Bind and serve on a background task, for in-process use. Bind to
    /// port 0 to get an ephemeral address.
    pub async fn spawn(self) -> Result<SpawnedServer> {
        let listener = bind(self.config.bind).await?;
        let addr = listener.local_addr().map_err(|error| {
            MeasureError::config("could not resolve listen address")
                .with_source(error)
        })?;

        let app = self.into_router();
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;
        });

        Ok(SpawnedServer { addr, shutdown_tx, handle })
    }

    fn into_router(self) -> Router {
        let state = Arc::new(ServerState {
            shaper: Shaper::new(self.config.conditions, self.config.seed),
            probe_payload: Bytes::from(vec![0u8; PROBE_PAYLOAD_BYTES]),
            payloads: PAYLOAD_TIERS_MB
                .iter()
                .map(|&mb| {
                    (mb, Bytes::from(vec![0u8; (mb * 1024 * 1024) as usize]))
                })
                .collect(),
            isp: self.config.isp,
            data_center: self.config.data_center,
        });

        Router::new()
            .route(
                "/probe",
                head(routes::probe_head).get(routes::probe_download),
            )
            .route("/payload/{mb}", get(routes::payload))
            .route("/upload", post(routes::upload))
            .route("/info", get(routes::info))
            .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
            .with_state(state)
    }
}

async fn bind(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr).await.map_err(|error| {
        MeasureError::config(format!("could not bind {}", addr))
            .with_source(error)
    })
}

/// Handle to a server running on a background task.
pub struct SpawnedServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl SpawnedServer {
    /// The address the server actually bound.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL clients should measure against.
    pub fn url(&self) -> Url {
        let raw = format!("http://{}/", self.addr);
        Url::parse(&raw).unwrap_or_else(|_| {
            unreachable!("socket address {} always forms a valid URL", raw)
        })
    }

    /// Stop the server and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tiers_cover_reference_sizes() {
        assert_eq!(PAYLOAD_TIERS_MB, [1, 2, 4, 5, 10, 25]);
        assert_eq!(PROBE_PAYLOAD_BYTES, 2 * 1024 * 1024);
    }

    #[test]
    fn test_default_config_binds_loopback() {
        let config = ServerConfig::default();
        assert!(config.bind.ip().is_loopback());
        assert_eq!(config.seed, None);
    }
}
