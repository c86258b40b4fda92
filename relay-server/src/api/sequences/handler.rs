//! Sequence API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;

use crate::api::convert::strip_table_prefix;
use crate::core::ServerState;
use crate::db::models::{Sequence, SequenceUpdate};
use crate::utils::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct CreateSequenceRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<crate::db::models::SequenceStep>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub actor_id: Option<String>,
}

/// GET /api/sequences - 获取所有序列
pub async fn list(State(state): State<ServerState>) -> AppResult<Json<Vec<Sequence>>> {
    let sequences = state.sequences.find_all().await?;
    Ok(Json(sequences))
}

/// GET /api/sequences/default - 当前默认序列
pub async fn get_default(State(state): State<ServerState>) -> AppResult<Json<Sequence>> {
    let sequence = state
        .sequences
        .find_default()
        .await?
        .ok_or_else(|| AppError::not_found("No default sequence configured"))?;
    Ok(Json(sequence))
}

/// GET /api/sequences/{id} - 获取单条序列
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<Sequence>> {
    let key = strip_table_prefix("sequence", &id);
    let sequence = state
        .sequences
        .find_by_key(key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Sequence {} not found", key)))?;
    Ok(Json(sequence))
}

/// POST /api/sequences - 创建序列
pub async fn create(
    State(state): State<ServerState>,
    Json(payload): Json<CreateSequenceRequest>,
) -> AppResult<Json<Sequence>> {
    let actor = payload.actor_id.clone();
    let sequence = state
        .sequences
        .create(
            crate::db::models::SequenceCreate {
                name: payload.name,
                description: payload.description,
                steps: payload.steps,
                is_default: payload.is_default,
            },
            actor.clone(),
        )
        .await?;

    state
        .events
        .info(
            format!("Sequence \"{}\" created", sequence.name),
            serde_json::json!({
                "steps_count": sequence.steps.len(),
                "total_duration": sequence.total_duration,
            }),
            None,
            actor,
        )
        .await;

    Ok(Json(sequence))
}

/// PUT /api/sequences/{id} - 更新序列
pub async fn update(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(payload): Json<SequenceUpdate>,
) -> AppResult<Json<Sequence>> {
    let key = strip_table_prefix("sequence", &id);
    let sequence = state.sequences.update(key, payload).await?;

    state
        .events
        .info(
            format!("Sequence \"{}\" updated", sequence.name),
            serde_json::json!({ "steps_count": sequence.steps.len() }),
            None,
            None,
        )
        .await;

    Ok(Json(sequence))
}

/// DELETE /api/sequences/{id} - 删除序列（被机器引用时拒绝）
pub async fn delete(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<bool>> {
    let key = strip_table_prefix("sequence", &id);
    let sequence_ref = crate::db::repository::SequenceRepository::ref_string(key);
    let referencing = state.machines.count_referencing_sequence(&sequence_ref).await?;

    let sequence = state.sequences.delete(key, referencing).await?;

    state
        .events
        .warning(
            format!("Sequence \"{}\" deleted", sequence.name),
            serde_json::Value::Null,
            None,
            None,
        )
        .await;

    Ok(Json(true))
}
