use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{config::Config, store::{ChatMessage, MessageStore}, AppResult, ChatCoordinator};

pub const MAX_HISTORY_LIMIT: u32 = 500;

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    limit: Option<u32>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn history(
    Query(HistoryQuery { limit }): Query<HistoryQuery>,
    State(chat): State<Arc<ChatCoordinator>>,
    State(config): State<Arc<Config>>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let limit = limit
        .unwrap_or(config.history_limit)
        .clamp(1, MAX_HISTORY_LIMIT);

    Ok(Json(chat.store().recent(limit).await?))
}
