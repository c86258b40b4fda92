//! 工具模块
//!
//! - [`error`] - 统一错误处理
//! - [`logger`] - 日志初始化

pub mod error;
pub mod logger;

pub use error::{AppError, AppResponse, AppResult, ok};
pub use logger::{init_logger, init_logger_with_file};
