//! Web server module: status dashboard and JSON API.

mod handlers;

pub use handlers::*;

use crate::db::Store;
use crate::health::ServiceId;
use crate::history::HistoryBook;

use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const UNKNOWN: u8 = 0;
const DOWN: u8 = 1;
const UP: u8 = 2;

/// Up/down flag of the latest cycle per service, fed by the poller hook.
#[derive(Debug, Default)]
pub struct LiveStatus {
    tcp: AtomicU8,
    http: AtomicU8,
}

impl LiveStatus {
    fn slot(&self, service: ServiceId) -> &AtomicU8 {
        match service {
            ServiceId::Tcp => &self.tcp,
            ServiceId::Http => &self.http,
        }
    }

    pub fn set(&self, service: ServiceId, up: bool) {
        self.slot(service).store(if up { UP } else { DOWN }, Ordering::Relaxed);
    }

    /// `None` until the service completed its first cycle.
    pub fn get(&self, service: ServiceId) -> Option<bool> {
        match self.slot(service).load(Ordering::Relaxed) {
            UNKNOWN => None,
            v => Some(v == UP),
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub history: Arc<HistoryBook>,
    pub live: Arc<LiveStatus>,
}

/// Web server for echowatch.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, state: AppState) -> Self {
        Self { port, state }
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = routes(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Build the router with all routes.
pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        // Dashboard and notification opt-in
        .route("/", get(handlers::handle_dashboard).post(handlers::handle_opt_in))
        // API endpoints
        .route("/api/status", get(handlers::handle_get_status))
        .route("/api/history", get(handlers::handle_get_history))
        // Static assets
        .route("/favicon.ico", get(handlers::handle_favicon))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_status_starts_unknown() {
        let live = LiveStatus::default();
        assert_eq!(live.get(ServiceId::Tcp), None);

        live.set(ServiceId::Tcp, false);
        live.set(ServiceId::Http, true);
        assert_eq!(live.get(ServiceId::Tcp), Some(false));
        assert_eq!(live.get(ServiceId::Http), Some(true));
    }
}
