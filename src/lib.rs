pub mod chat;
pub mod config;
pub mod events;
pub mod fabric;
pub mod presence;
pub mod res;
pub mod session;
pub mod store;

use std::sync::Arc;

use axum::{
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use config::Config;
use fabric::Hub;
use session::Coordinator;
use store::SqliteStore;

pub type ChatCoordinator = Coordinator<SqliteStore, Hub>;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub chat: Arc<ChatCoordinator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: SqliteStore, config: Config) -> Self {
        let hub = Hub::new(config.broadcast_capacity);
        let chat = Coordinator::new(store, hub, config.history_limit);
        Self {
            chat: Arc::new(chat),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(res::index))
        .merge(chat::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}\n\n{}", self.0, self.0.backtrace()),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
