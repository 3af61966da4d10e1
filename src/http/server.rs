//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy and admin handlers
//! - Wire up middleware (tracing, timeout, request ID)
//! - Start and stop background health checking with the server
//! - Apply configuration updates while serving
//! - Serve until the shutdown signal fires, then drain

use axum::{
    body::Body,
    extract::State,
    http::{Request, Uri},
    response::Response,
    routing::{any, get},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::handlers::{get_health, get_service_stats, get_stats};
use crate::config::GatewayConfig;
use crate::http::request::{split_service_path, MakeRequestUuid};
use crate::http::response::{error_response, ProxyError};
use crate::proxy::Gateway;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    gateway: Arc<Gateway>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_gateway(Arc::new(Gateway::new(config)))
    }

    /// Serve an already-built gateway.
    pub fn with_gateway(gateway: Arc<Gateway>) -> Self {
        let config = gateway.config();
        let state = AppState {
            gateway: gateway.clone(),
        };
        let router = Self::build_router(&config, state);
        Self { router, gateway }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/health", get(get_health))
            .route("/stats", get(get_stats))
            .route("/stats/{service}", get(get_service_stats))
            .route("/{service}", any(proxy_handler))
            .route("/{service}/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// The router, for serving on a custom transport or testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Configurations received on `config_updates` are applied in order.
    /// Returns once `shutdown` fires and in-flight requests have drained.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            services = ?self.gateway.service_names(),
            "HTTP server starting"
        );

        self.gateway.start_health_checking();

        let gateway = self.gateway.clone();
        let reload = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                tracing::info!(services = config.services.len(), "Applying new configuration");
                gateway.reconfigure(config).await;
            }
        });

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        reload.abort();
        self.gateway.stop_health_checking().await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Strip `/{service}` from the URI and hand the request to the gateway.
async fn proxy_handler(State(state): State<AppState>, mut request: Request<Body>) -> Response<Body> {
    let Some((service, rest)) = split_service_path(request.uri()) else {
        return error_response(ProxyError::UnknownService(String::new()), "", None, 0);
    };

    tracing::debug!(
        service = %service,
        method = %request.method(),
        path = %rest,
        "Proxying request"
    );

    *request.uri_mut() = Uri::from(rest);
    state.gateway.dispatch(&service, request).await
}
