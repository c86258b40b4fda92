//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查
//! - [`device`] - 控制器侧接口（心跳、pin 状态、错误上报）
//! - [`control`] - 操作员控制（启停序列、急停、手动 GPIO）
//! - [`machines`] - 机器管理接口
//! - [`sequences`] - 序列管理接口
//! - [`payments`] - 支付 webhook
//! - [`transactions`] - 交易记录查询
//! - [`events`] - 事件日志查询

pub mod convert;

pub mod control;
pub mod device;
pub mod events;
pub mod health;
pub mod machines;
pub mod payments;
pub mod sequences;
pub mod transactions;

// Re-export common types for handlers
pub use crate::utils::{AppResponse, AppResult};
