use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realtime_gateway::auth::jwt::JwtVerifier;
use realtime_gateway::config::Config;
use realtime_gateway::services::http::BackendClient;
use realtime_gateway::services::memory::MemoryBackend;
use realtime_gateway::services::{IdentityVerifier, Services};
use realtime_gateway::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let identity: Arc<dyn IdentityVerifier> = Arc::new(JwtVerifier::new(&config.jwt_secret));
    let services = match &config.backend_url {
        Some(url) => {
            tracing::info!(backend_url = %url, "using REST backend");
            let backend = BackendClient::new(url, config.backend_service_token.clone())
                .unwrap_or_else(|err| panic!("BACKEND_URL is not usable: {err}"));
            Services::from_backend(identity, Arc::new(backend))
        }
        None => {
            tracing::warn!("BACKEND_URL not set, using empty in-memory backend");
            Services::from_backend(identity, Arc::new(MemoryBackend::new()))
        }
    };

    let state = AppState::new(services);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(realtime_gateway::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "realtime-gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
