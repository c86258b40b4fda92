//! Device API 模块
//!
//! 控制器侧接口：设备永远是发起方（无推送通道），心跳即链路。

mod handler;

use axum::{Router, routing::{get, post}};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/device", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/heartbeat", post(handler::heartbeat))
        .route("/gpio-states/{machine_id}", get(handler::gpio_states))
        .route("/state-update", post(handler::state_update))
        .route("/error", post(handler::error_report))
}
