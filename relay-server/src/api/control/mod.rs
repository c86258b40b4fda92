//! Control API 模块
//!
//! 操作员控制面：启停序列、急停、手动 GPIO。
//! 急停是关键端点 —— 任何锁态下都必须可用。

mod handler;

use axum::{Router, routing::{get, post}};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/control", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/start-sequence/{machine_id}", post(handler::start_sequence))
        .route("/emergency-stop/{machine_id}", post(handler::emergency_stop))
        .route("/status/{machine_id}", get(handler::status))
        .route("/toggle-gpio/{machine_id}", post(handler::toggle_gpio))
        .route("/pulse-gpio/{machine_id}", post(handler::pulse_gpio))
        .route("/restart-device/{machine_id}", post(handler::restart_device))
}
