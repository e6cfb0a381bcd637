//! Standalone forwarding server.
//!
//! # Responsibilities
//! - Create the Axum router that forwards every path to the configured base
//! - Wire up middleware (tracing, request ID)
//! - Serve until the shutdown signal, then close the forwarder

use std::future::Future;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::error::SetupError;
use crate::forward::{ForwardOptions, Forwarder};
use crate::http::request::MakeRequestUuidV4;

/// HTTP server whose only route forwards upstream.
pub struct ForwardServer {
    router: Router,
    forwarder: Forwarder,
}

impl ForwardServer {
    pub fn new(forwarder: Forwarder) -> Self {
        let router = Self::build_router(forwarder.clone());
        Self { router, forwarder }
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self, SetupError> {
        Ok(Self::new(Forwarder::new(config.forwarding.clone())?))
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(forwarder: Forwarder) -> Router {
        Router::new()
            .route("/{*path}", any(forward_handler))
            .route("/", any(forward_handler))
            .with_state(forwarder)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// Serve on `listener` until `shutdown` resolves, then tear down the transport.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            transport = self.forwarder.transport_name(),
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.forwarder.close().await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn forward_handler(State(forwarder): State<Forwarder>, request: Request<Body>) -> Response {
    match forwarder.forward(request, None, ForwardOptions::new()).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, code = err.code(), "Forwarding rejected");
            err.into_response()
        }
    }
}
