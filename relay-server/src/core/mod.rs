//! 核心模块
//!
//! - [`config`] - 环境变量配置
//! - [`state`] - 服务器状态 (ServerState)
//! - [`server`] - HTTP 服务器与路由装配
//! - [`tasks`] - 后台任务管理

pub mod config;
pub mod server;
pub mod state;
pub mod tasks;

pub use config::Config;
pub use server::{Server, build_app};
pub use state::ServerState;
pub use tasks::{BackgroundTasks, TaskKind};
