//! Control API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use crate::api::convert::strip_table_prefix;
use crate::core::ServerState;
use crate::db::models::{GpioState, Sequence};
use crate::utils::{AppError, AppResponse, AppResult, ok};
use shared::response::GpioStateView;
use shared::util::now_millis;

#[derive(Debug, Deserialize)]
pub struct StartSequenceRequest {
    pub sequence_id: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    #[serde(default)]
    pub actor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleGpioRequest {
    pub gpio_name: String,
    #[serde(default)]
    pub actor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PulseGpioRequest {
    pub gpio_name: String,
    /// Pulse width in milliseconds
    pub duration_ms: u64,
    #[serde(default)]
    pub actor_id: Option<String>,
}

/// 流程状态快照
#[derive(Debug, Serialize)]
pub struct ProcessStatus {
    pub machine_status: String,
    pub process_locked: bool,
    pub current_sequence: Option<Sequence>,
    pub current_step: u32,
    pub process_start_time: Option<i64>,
    /// 估算剩余秒数 = 序列总时长 − 已运行时长。
    /// 临近收尾可能为负，调用方自行钳位。
    pub remaining_time: f64,
    pub gpios: Vec<GpioStateView>,
}

/// POST /api/control/start-sequence/{machine_id} - 手动启动序列
///
/// 成功即返回（fire-and-forget）：执行体异步推进，之后的失败只能
/// 从事件日志和 status 轮询观测到。
pub async fn start_sequence(
    State(state): State<ServerState>,
    Path(machine_id): Path<String>,
    Json(payload): Json<StartSequenceRequest>,
) -> AppResult<Json<AppResponse<String>>> {
    if payload.sequence_id.trim().is_empty() {
        return Err(AppError::invalid("Sequence ID required"));
    }

    let machine_key = strip_table_prefix("machine", &machine_id);
    let sequence_key = strip_table_prefix("sequence", &payload.sequence_id);

    state
        .engine
        .start_sequence(machine_key, sequence_key, payload.transaction_id)
        .await?;

    Ok(ok("Sequence started successfully".to_string()))
}

/// POST /api/control/emergency-stop/{machine_id} - 急停
///
/// 对已空闲的机器也可调用（幂等归零，但照记一条事件）。
pub async fn emergency_stop(
    State(state): State<ServerState>,
    Path(machine_id): Path<String>,
    Json(payload): Json<ActorRequest>,
) -> AppResult<Json<AppResponse<String>>> {
    let machine_key = strip_table_prefix("machine", &machine_id);
    let actor = payload.actor_id.as_deref().unwrap_or("operator");

    state.engine.emergency_stop(machine_key, actor).await?;

    Ok(ok("Emergency stop executed successfully".to_string()))
}

/// GET /api/control/status/{machine_id} - 流程状态
pub async fn status(
    State(state): State<ServerState>,
    Path(machine_id): Path<String>,
) -> AppResult<Json<AppResponse<ProcessStatus>>> {
    let machine_key = strip_table_prefix("machine", &machine_id);
    let machine = state
        .machines
        .find_by_key(machine_key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Machine {}", machine_key)))?;

    // populate current sequence
    let current_sequence = match &machine.current_sequence {
        Some(id) => state.sequences.find_by_key(&id.key().to_string()).await?,
        None => None,
    };

    let now = now_millis();
    let remaining_time = match (&current_sequence, machine.process_start_time) {
        (Some(seq), Some(start)) => {
            let elapsed = (now - start) as f64 / 1000.0;
            seq.total_duration - elapsed
        }
        _ => 0.0,
    };

    Ok(ok(ProcessStatus {
        machine_status: machine
            .effective_status(now, state.config.heartbeat_timeout_ms)
            .as_str()
            .to_string(),
        process_locked: machine.process_locked,
        current_step: machine.current_step,
        process_start_time: machine.process_start_time,
        remaining_time,
        gpios: machine.gpio_views(),
        current_sequence,
    }))
}

/// POST /api/control/toggle-gpio/{machine_id} - 手动切换 pin
///
/// 与序列执行互斥：持锁期间一律拒绝（`Locked`），不排队不插队。
pub async fn toggle_gpio(
    State(state): State<ServerState>,
    Path(machine_id): Path<String>,
    Json(payload): Json<ToggleGpioRequest>,
) -> AppResult<Json<AppResponse<GpioStateView>>> {
    let machine_key = strip_table_prefix("machine", &machine_id);
    let machine = state
        .machines
        .find_by_key(machine_key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Machine {}", machine_key)))?;

    if machine.process_locked {
        return Err(AppError::locked(machine.machine_id));
    }
    let now = now_millis();
    if !machine.is_online(now, state.config.heartbeat_timeout_ms) {
        return Err(AppError::offline(machine.machine_id));
    }

    let gpio = machine
        .find_gpio(&payload.gpio_name)
        .ok_or_else(|| AppError::not_found(format!("GPIO '{}'", payload.gpio_name)))?;
    let new_state = gpio.current_state.toggled();

    state
        .machines
        .set_gpio_state(machine_key, &payload.gpio_name, new_state)
        .await?;

    state
        .events
        .gpio_toggle(
            &machine,
            &payload.gpio_name,
            new_state.as_str(),
            payload.actor_id.as_deref(),
        )
        .await;

    let mut view = gpio.view();
    view.state = new_state.as_str().to_string();
    Ok(ok(view))
}

/// POST /api/control/pulse-gpio/{machine_id} - 脉冲（ON，`duration_ms` 后自动 OFF）
///
/// 自动 OFF 是一发延时续延，独立于序列引擎；醒来时 pin 已不是 ON
/// 或机器已进入序列执行则什么都不做。
pub async fn pulse_gpio(
    State(state): State<ServerState>,
    Path(machine_id): Path<String>,
    Json(payload): Json<PulseGpioRequest>,
) -> AppResult<Json<AppResponse<GpioStateView>>> {
    if payload.duration_ms == 0 || payload.duration_ms > 600_000 {
        return Err(AppError::validation(
            "duration_ms must be between 1 and 600000",
        ));
    }

    let machine_key = strip_table_prefix("machine", &machine_id);
    let machine = state
        .machines
        .find_by_key(machine_key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Machine {}", machine_key)))?;

    if machine.process_locked {
        return Err(AppError::locked(machine.machine_id));
    }
    let now = now_millis();
    if !machine.is_online(now, state.config.heartbeat_timeout_ms) {
        return Err(AppError::offline(machine.machine_id));
    }

    let gpio = machine
        .find_gpio(&payload.gpio_name)
        .ok_or_else(|| AppError::not_found(format!("GPIO '{}'", payload.gpio_name)))?;

    state
        .machines
        .set_gpio_state(machine_key, &payload.gpio_name, GpioState::On)
        .await?;
    state
        .events
        .gpio_toggle(&machine, &payload.gpio_name, "ON", payload.actor_id.as_deref())
        .await;

    // Schedule the automatic OFF
    let machines = state.machines.clone();
    let events = state.events.clone();
    let key = machine_key.to_string();
    let gpio_name = payload.gpio_name.clone();
    let duration = std::time::Duration::from_millis(payload.duration_ms);
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;

        // 醒来后重新读库：手动 OFF、急停或已开始的序列都让这次脉冲让位
        let machine = match machines.find_by_key(&key).await {
            Ok(Some(m)) => m,
            _ => return,
        };
        let still_on = machine
            .find_gpio(&gpio_name)
            .map(|g| g.current_state == GpioState::On)
            .unwrap_or(false);
        if !still_on || machine.process_locked {
            return;
        }
        if let Err(e) = machines.set_gpio_state(&key, &gpio_name, GpioState::Off).await {
            tracing::error!(machine = %key, gpio = %gpio_name, error = %e, "Pulse auto-OFF failed");
            return;
        }
        events.gpio_toggle(&machine, &gpio_name, "OFF", None).await;
    });

    let mut view = gpio.view();
    view.state = "ON".to_string();
    Ok(ok(view))
}

/// POST /api/control/restart-device/{machine_id} - 令控制器重启
///
/// 只是在下一次心跳里捎带一个标志；执行期间拒绝（先急停）。
pub async fn restart_device(
    State(state): State<ServerState>,
    Path(machine_id): Path<String>,
) -> AppResult<Json<AppResponse<String>>> {
    let machine_key = strip_table_prefix("machine", &machine_id);
    let machine = state
        .machines
        .find_by_key(machine_key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Machine {}", machine_key)))?;

    if machine.process_locked {
        return Err(AppError::locked(format!(
            "{} — use emergency stop first",
            machine.machine_id
        )));
    }

    state.machines.set_pending_restart(machine_key).await?;

    Ok(ok(
        "Restart queued — controller will reboot on next heartbeat".to_string(),
    ))
}
