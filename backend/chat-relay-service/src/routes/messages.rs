use actix_web::{get, web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::message::Message;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub messages: Vec<Message>,
    pub count: usize,
}

/// Recent messages, oldest first
#[get("/api/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> AppResult<HttpResponse> {
    let limit = query
        .limit
        .unwrap_or(state.config.history_limit)
        .clamp(1, state.config.max_history_limit);

    let messages = state.store.recent(limit).await.map_err(|e| {
        tracing::warn!(backend = state.store.backend(), error = %e, "history query failed");
        AppError::from(e)
    })?;

    Ok(HttpResponse::Ok().json(HistoryResponse {
        success: true,
        count: messages.len(),
        messages,
    }))
}
