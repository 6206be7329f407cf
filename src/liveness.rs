//! # Liveness Server
//!
//! An `axum` server answering `GET /` with a fixed plaintext body so that a
//! hosting platform keeps the process running. It carries no application
//! data. When a Prometheus handle is supplied, `/metrics` is served as well.
//!
//! The server stops when the shutdown signal flips.

use axum::{http::header, response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

/// Body returned by `GET /`.
pub const ALIVE_BODY: &str = "I'm alive";

async fn alive() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], ALIVE_BODY)
}

/// Builds the router: `/` always, `/metrics` when a handle is given.
pub fn router(prom_handle: Option<PrometheusHandle>) -> Router {
    let app = Router::new().route("/", get(alive));
    match prom_handle {
        Some(handle) => app.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ),
        None => app,
    }
}

/// The liveness HTTP server.
pub struct LivenessServer {
    listener: TcpListener,
    prom_handle: Option<PrometheusHandle>,
    shutdown_rx: watch::Receiver<bool>,
}

impl LivenessServer {
    /// Creates a new `LivenessServer` but does not spawn it.
    ///
    /// # Arguments
    ///
    /// * `listener` - A `TcpListener` that has already been bound to an address.
    /// * `prom_handle` - Renders `/metrics` when present.
    /// * `shutdown_rx` - A watch channel receiver for graceful shutdown.
    pub fn new(
        listener: TcpListener,
        prom_handle: Option<PrometheusHandle>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            prom_handle,
            shutdown_rx,
        }
    }

    /// Returns a future that runs the server until a shutdown signal is received.
    pub fn run(mut self) -> impl Future<Output = ()> {
        let app = router(self.prom_handle.take());

        async move {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    trace!("Liveness server received shutdown signal via select.");
                }
                result = axum::serve(self.listener, app.into_make_service()) => {
                    if let Err(e) = result {
                        error!("Liveness server error: {}", e);
                    }
                }
            }
            trace!("Liveness server task finished.");
        }
    }
}
