mod history;
mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use history::MAX_HISTORY_LIMIT;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
        .route("/history", get(history::history))
}
