//! HTTP surface: list and run agents and teams.

pub mod openai;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use agentry_config::Config;
use agentry_core::{Catalog, Runtime};
use anyhow::Result;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use routes::{ModelChoice, RunRequest};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
}

impl AppState {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    pub fn config(&self) -> &Config {
        &self.catalog.runtime().config
    }
}

/// `"*"` (or nothing) allows any origin without credentials. Explicit origins
/// are allowed with credentials, mirroring the requested methods and headers.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o.trim() == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Ignoring invalid CORS origin '{o}': {e}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

pub fn router(state: AppState) -> Router {
    let server = &state.config().server;
    let cors = cors_layer(&server.cors_origins);
    let mut app = Router::new()
        .route("/health", get(routes::health))
        .route("/agents", get(routes::list_agents))
        .route("/agents/{agent_id}/runs", post(routes::run_agent))
        .route("/teams", get(routes::list_teams))
        .route("/teams/{team_id}/runs", post(routes::run_team));
    if server.docs_enabled {
        app = app.route("/docs", get(routes::docs));
    }
    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Route table served at `/docs`.
pub(crate) const ROUTES: &[(&str, &str, &str)] = &[
    ("GET", "/health", "Service status"),
    ("GET", "/agents", "List agent ids"),
    ("POST", "/agents/{agent_id}/runs", "Run an agent"),
    ("GET", "/teams", "List team ids"),
    ("POST", "/teams/{team_id}/runs", "Run a team"),
];

/// Open storage, discover the catalog and serve until Ctrl-C.
pub async fn serve(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {e}"))?;

    let title = config.server.title.clone();
    let catalog = Catalog::builtin(Runtime::new(config)?);
    let app = router(AppState::new(catalog));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("{title} listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {e}");
            }
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
