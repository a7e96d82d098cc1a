use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{
    accounts::AccountService, boot::BootAggregator, cache::CacheBackend, config::AppConfig,
    events::EventBus, middleware as app_middleware, routes,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub boot: Arc<BootAggregator>,
    pub accounts: Arc<AccountService>,
    pub bus: Arc<dyn EventBus>,
    pub cache: CacheBackend,
}

pub struct GatehouseServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;

    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz))
        .route("/boot", get(routes::boot::boot))
        .route("/boot/companion", get(routes::boot::companion))
        .route("/boot/features", get(routes::boot::features))
        .route("/users/me", get(routes::users::me).delete(routes::users::delete_me))
        .route("/users/me/info", get(routes::users::info))
        .route("/users/me/roles", get(routes::users::roles))
        .route("/users/logout", post(routes::users::logout))
        .route("/users/{id}", get(routes::users::profile))
        .route("/landing", get(routes::redirects::landing))
        .route("/get", get(routes::redirects::download))
        .route("/download", get(routes::redirects::download))
        .route("/flagsmith/reset", post(routes::flagsmith::reset))
        .with_state(state)
        // Middleware stack (order: request id -> compression/cors/trace -> body limit)
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    // Health checks are polled constantly
                    if matches!(req.uri().path(), "/healthz" | "/readyz") {
                        return tracing::span!(tracing::Level::TRACE, "noop");
                    }
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        if span.metadata().is_some_and(|meta| meta.name() != "noop") {
                            tracing::info!(
                                status = res.status().as_u16(),
                                latency_ms = latency.as_millis() as u64,
                                "request completed"
                            );
                        }
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Connects storage, cache and event bus, then wires the routes.
    pub async fn build(self) -> anyhow::Result<GatehouseServer> {
        let storage = crate::create_storage(&self.config.database).await?;
        let cache = crate::create_cache_backend(&self.config.redis).await;
        let bus = crate::create_event_bus(&cache);
        let state = crate::build_state(Arc::new(self.config), storage, cache, bus)?;

        Ok(GatehouseServer {
            addr: self.addr,
            app: build_app(state),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatehouseServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
