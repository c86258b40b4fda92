//! Event Log API Handlers

use axum::{
    Json,
    extract::{Query, State},
};

use crate::core::ServerState;
use crate::events::{EventListResponse, EventQuery};
use crate::utils::{AppError, AppResult};

/// GET /api/events - 事件日志查询
///
/// 过滤参数：from/to（毫秒时间戳）、kind、severity、machine、offset/limit。
pub async fn list(
    State(state): State<ServerState>,
    Query(query): Query<EventQuery>,
) -> AppResult<Json<EventListResponse>> {
    let response = state
        .events
        .query(&query)
        .await
        .map_err(|e| AppError::database(e.to_string()))?;
    Ok(Json(response))
}
