//! Relay Supervision Server - 远程继电器机群监管服务
//!
//! # 架构概述
//!
//! 远端控制器（挂物理继电器的现场设备）只有请求/响应链路，没有常驻
//! 连接：心跳上行维持在线判定，所有"下行"都是设备主动拉取。核心是
//! 序列执行引擎 —— 把一台机器按定时步骤推完一整条继电器动作序列，
//! 每机一把流程锁，断连重连走和解路径，急停随时抢断。
//!
//! # 模块结构
//!
//! ```text
//! relay-server/src/
//! ├── core/      # 配置、状态、服务器、后台任务
//! ├── db/        # 嵌入式 SurrealDB、模型、仓储
//! ├── engine/    # 存活判定 + 序列执行引擎
//! ├── events/    # 追加式事件日志（mpsc worker）
//! ├── api/       # HTTP 路由和处理器
//! └── utils/     # 错误、日志
//! ```

pub mod api;
pub mod core;
pub mod db;
pub mod engine;
pub mod events;
pub mod utils;

// Re-export 公共类型
// (crate:: 前缀避开和内建 core crate 的同名歧义)
pub use crate::core::{BackgroundTasks, Config, Server, ServerState, TaskKind, build_app};
pub use crate::engine::{EngineConfig, ProcessEngine};
pub use crate::utils::{AppError, AppResult};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

/// 设置运行环境 (dotenv + 日志)
pub fn setup_environment() {
    let _ = dotenv::dotenv();

    let log_level = std::env::var("LOG_LEVEL").ok();
    let log_dir = std::env::var("LOG_DIR").ok();
    init_logger_with_file(log_level.as_deref(), log_dir.as_deref());
}
