//! Machine API Handlers
//!
//! 管理面 CRUD。读取面一律回推导后的 status，不让落库的滞后值漏出去。

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;

use crate::api::convert::strip_table_prefix;
use crate::core::ServerState;
use crate::db::models::{GpioConfig, Machine, MachineCreate, MachineUpdate};
use crate::utils::{AppError, AppResult};
use shared::util::now_millis;

fn with_effective_status(mut machine: Machine, state: &ServerState, now: i64) -> Machine {
    machine.status = machine.effective_status(now, state.config.heartbeat_timeout_ms);
    machine
}

/// GET /api/machines - 获取所有机器
pub async fn list(State(state): State<ServerState>) -> AppResult<Json<Vec<Machine>>> {
    let now = now_millis();
    let machines = state
        .machines
        .find_all()
        .await?
        .into_iter()
        .map(|m| with_effective_status(m, &state, now))
        .collect();
    Ok(Json(machines))
}

/// GET /api/machines/{id} - 获取单台机器
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<Machine>> {
    let key = strip_table_prefix("machine", &id);
    let machine = state
        .machines
        .find_by_key(key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Machine {} not found", key)))?;
    Ok(Json(with_effective_status(machine, &state, now_millis())))
}

/// POST /api/machines - 注册机器
pub async fn create(
    State(state): State<ServerState>,
    Json(payload): Json<MachineCreate>,
) -> AppResult<Json<Machine>> {
    let machine = state.machines.create(payload).await?;

    state
        .events
        .info(
            format!("Machine '{}' registered", machine.machine_id),
            serde_json::json!({ "location": machine.location }),
            machine.id.as_ref().map(|id| id.to_string()),
            None,
        )
        .await;

    Ok(Json(machine))
}

/// PUT /api/machines/{id} - 更新机器
pub async fn update(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(payload): Json<MachineUpdate>,
) -> AppResult<Json<Machine>> {
    let key = strip_table_prefix("machine", &id);
    let machine = state.machines.update(key, payload).await?;
    Ok(Json(with_effective_status(machine, &state, now_millis())))
}

/// DELETE /api/machines/{id} - 删除机器（执行期间拒绝）
pub async fn delete(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<bool>> {
    let key = strip_table_prefix("machine", &id);
    let result = state.machines.delete(key).await?;
    Ok(Json(result))
}

/// GET /api/machines/{id}/gpios - pin 配置
pub async fn get_gpios(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let key = strip_table_prefix("machine", &id);
    let machine = state
        .machines
        .find_by_key(key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Machine {} not found", key)))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "gpios": machine.gpios,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateGpiosRequest {
    pub gpios: Vec<GpioConfig>,
    #[serde(default)]
    pub actor_id: Option<String>,
}

/// PUT /api/machines/{id}/gpios - 替换 pin 配置（执行期间拒绝）
pub async fn update_gpios(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateGpiosRequest>,
) -> AppResult<Json<Machine>> {
    let key = strip_table_prefix("machine", &id);
    let count = payload.gpios.len();
    let machine = state.machines.update_gpio_config(key, payload.gpios).await?;

    state
        .events
        .info(
            format!("GPIO configuration updated for machine {}", machine.machine_id),
            serde_json::json!({ "gpio_count": count }),
            machine.id.as_ref().map(|id| id.to_string()),
            payload.actor_id,
        )
        .await;

    Ok(Json(with_effective_status(machine, &state, now_millis())))
}
