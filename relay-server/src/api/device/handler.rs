//! Device API Handlers
//!
//! 心跳永远先落账，再做别的：在线判定、重连和解都挂在这条路径上。

use axum::{
    Json,
    extract::{Path, State},
};

use crate::core::ServerState;
use crate::db::models::GpioState;
use crate::utils::{AppError, AppResult};
use shared::request::{DeviceErrorReport, GpioStateUpdate, HeartbeatRequest};
use shared::response::{GpioStatesResponse, HeartbeatResponse};
use shared::util::now_millis;

/// POST /api/device/heartbeat - 控制器心跳
///
/// 无条件刷新 `last_heartbeat`；若构成 离线→在线 跃迁且机器仍持锁，
/// 触发重连和解（整条序列从第 0 步重跑或超窗解锁）。
pub async fn heartbeat(
    State(state): State<ServerState>,
    Json(payload): Json<HeartbeatRequest>,
) -> AppResult<Json<HeartbeatResponse>> {
    if payload.machine_id.trim().is_empty() {
        return Err(AppError::invalid("Machine ID required"));
    }

    let now = now_millis();
    let outcome = state
        .machines
        .record_heartbeat(
            &payload.machine_id,
            &payload,
            now,
            state.config.heartbeat_timeout_ms,
        )
        .await?
        .ok_or_else(|| AppError::not_found(format!("Machine '{}' not registered", payload.machine_id)))?;

    let machine = &outcome.machine;

    if outcome.came_online {
        state
            .events
            .device_connected(machine, payload.ip_address.as_deref())
            .await;
        tracing::info!(
            machine = %machine.machine_id,
            ip = ?payload.ip_address,
            "Controller connected"
        );

        // 断连期间锁没释放 → 有一条被打断的序列等着和解
        if machine.process_locked
            && let Err(e) = state.engine.restart_after_reconnect(&machine.key()).await
        {
            tracing::error!(
                machine = %machine.machine_id,
                error = %e,
                "Reconnection restart failed"
            );
        }
    }

    Ok(Json(HeartbeatResponse {
        success: true,
        status: machine
            .effective_status(now, state.config.heartbeat_timeout_ms)
            .as_str()
            .to_string(),
        process_locked: machine.process_locked,
        pending_restart: outcome.pending_restart,
        gpios: machine.gpio_views(),
    }))
}

/// GET /api/device/gpio-states/{machine_id} - 控制器拉取 pin 状态
///
/// 轮询也算一次轻量心跳（只刷时间戳）。
pub async fn gpio_states(
    State(state): State<ServerState>,
    Path(machine_id): Path<String>,
) -> AppResult<Json<GpioStatesResponse>> {
    let machine = state
        .machines
        .touch_heartbeat(&machine_id, now_millis())
        .await?
        .ok_or_else(|| AppError::not_found(format!("Machine '{}' not found", machine_id)))?;

    Ok(Json(GpioStatesResponse {
        success: true,
        gpios: machine.gpio_views(),
        process_locked: machine.process_locked,
        current_step: machine.current_step,
    }))
}

/// POST /api/device/state-update - 设备回报实际驱动结果
pub async fn state_update(
    State(state): State<ServerState>,
    Json(payload): Json<GpioStateUpdate>,
) -> AppResult<Json<serde_json::Value>> {
    let machine = state
        .machines
        .find_by_machine_id(&payload.machine_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Machine '{}' not found", payload.machine_id)))?;

    let gpio_state = match payload.state.as_str() {
        "ON" => GpioState::On,
        "OFF" => GpioState::Off,
        other => {
            return Err(AppError::validation(format!("Invalid GPIO state: {}", other)));
        }
    };

    let found = state
        .machines
        .set_gpio_state_by_number(&machine.key(), payload.gpio_number, gpio_state)
        .await?;
    if !found {
        tracing::debug!(
            machine = %machine.machine_id,
            pin = payload.gpio_number,
            "State update for unconfigured pin, ignored"
        );
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

/// POST /api/device/error - 控制器错误上报
pub async fn error_report(
    State(state): State<ServerState>,
    Json(payload): Json<DeviceErrorReport>,
) -> AppResult<Json<serde_json::Value>> {
    if let Some(machine) = state.machines.find_by_machine_id(&payload.machine_id).await? {
        state
            .events
            .error(
                format!("Controller error: {}", payload.error_message),
                serde_json::json!({ "error_code": payload.error_code }),
                machine.id.as_ref().map(|id| id.to_string()),
                None,
            )
            .await;
    }

    Ok(Json(serde_json::json!({ "success": true })))
}
