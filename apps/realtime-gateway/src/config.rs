/// Realtime gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// HS256 secret shared with the platform's auth service.
    pub jwt_secret: String,
    /// Origin of the platform REST backend (e.g. `http://localhost:4000`).
    /// When unset the gateway runs against an in-memory backend.
    pub backend_url: Option<String>,
    /// Bearer token presented on backend calls.
    pub backend_service_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4010),
            jwt_secret: required_var("JWT_SECRET"),
            backend_url: optional_var("BACKEND_URL"),
            backend_service_token: optional_var("BACKEND_SERVICE_TOKEN"),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
