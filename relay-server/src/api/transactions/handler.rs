//! Transaction API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::api::convert::strip_table_prefix;
use crate::core::ServerState;
use crate::db::models::Transaction;
use crate::utils::AppResult;
use shared::request::PaginationQuery;

/// GET /api/transactions - 最近交易（分页，新的在前）
pub async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PaginationQuery>,
) -> AppResult<Json<Vec<Transaction>>> {
    let txns = state
        .transactions
        .find_recent(page.offset(), page.limit())
        .await?;
    Ok(Json(txns))
}

/// GET /api/transactions/machine/{id} - 某台机器的交易
pub async fn by_machine(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Transaction>>> {
    let key = strip_table_prefix("machine", &id);
    let machine_ref = format!("machine:{}", key);
    let txns = state.transactions.find_by_machine(&machine_ref).await?;
    Ok(Json(txns))
}
