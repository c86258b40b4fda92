//! Payments API 模块
//!
//! 支付 webhook：公开端点，靠 HMAC-SHA256 签名认证。
//! 支付在外部完成（二维码/支付链接），这里只落账交易并触发默认序列。

mod handler;

use axum::{Router, routing::post};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/payments/webhook", post(handler::webhook))
}
