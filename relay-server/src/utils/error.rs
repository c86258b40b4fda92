//! 统一错误处理
//!
//! 提供应用级错误类型和响应结构：
//! - [`AppError`] - 应用错误枚举
//! - [`AppResponse`] - API 响应结构
//!
//! # 错误码规范
//!
//! | 前缀 | 分类 | 示例 |
//! |------|------|------|
//! | E0xxx | 通用错误 | E0003 资源不存在 |
//! | E1xxx | 设备/流程状态冲突 | E1002 序列已在执行 |
//! | E9xxx | 系统错误 | E9002 数据库错误 |
//!
//! # 使用示例
//!
//! ```ignore
//! // 返回错误
//! Err(AppError::not_found("Machine VND-001"))
//!
//! // 返回成功响应
//! Ok(ok(data))
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

/// API 统一响应结构
///
/// ```json
/// {
///   "code": "E0000",
///   "message": "Success",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct AppResponse<T> {
    /// 错误码 (E0000 表示成功)
    pub code: String,
    /// 消息
    pub message: String,
    /// 响应数据
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// 应用错误枚举
///
/// 前四个变体直接对应流程引擎的失败语义：设备不在线、序列互斥、
/// 手动控制被流程锁拒绝、重连超出恢复窗口。
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== 资源错误 ==========
    #[error("Resource not found: {0}")]
    /// 资源不存在 (404)
    NotFound(String),

    // ========== 设备/流程状态冲突 ==========
    #[error("Machine is offline: {0}")]
    /// 设备离线，无法执行 (409)
    Offline(String),

    #[error("Machine is already running a sequence: {0}")]
    /// 流程锁已被占用 (409)
    AlreadyRunning(String),

    #[error("Manual control rejected while sequence is running: {0}")]
    /// 序列执行期间拒绝手动控制 (409)
    Locked(String),

    #[error("Interrupted run is too old to resume: {0}")]
    /// 重连恢复窗口已过期 (410)
    Stale(String),

    // ========== 请求错误 ==========
    #[error("Validation failed: {0}")]
    /// 验证失败 (400)
    Validation(String),

    #[error("Invalid request: {0}")]
    /// 无效请求 (400)
    Invalid(String),

    // ========== 系统错误 ==========
    #[error("Database error: {0}")]
    /// 数据库错误 (500)
    Database(String),

    #[error("Internal server error: {0}")]
    /// 内部错误 (500)
    Internal(String),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn offline(msg: impl Into<String>) -> Self {
        Self::Offline(msg.into())
    }

    pub fn already_running(msg: impl Into<String>) -> Self {
        Self::AlreadyRunning(msg.into())
    }

    pub fn locked(msg: impl Into<String>) -> Self {
        Self::Locked(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 错误码（机器可读，客户端据此分支）
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "E0003",
            AppError::Offline(_) => "E1001",
            AppError::AlreadyRunning(_) => "E1002",
            AppError::Locked(_) => "E1003",
            AppError::Stale(_) => "E1004",
            AppError::Validation(_) => "E0002",
            AppError::Invalid(_) => "E0006",
            AppError::Database(_) => "E9002",
            AppError::Internal(_) => "E9001",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Offline(_) | AppError::AlreadyRunning(_) | AppError::Locked(_) => {
                StatusCode::CONFLICT
            }
            AppError::Stale(_) => StatusCode::GONE,
            AppError::Validation(_) | AppError::Invalid(_) => StatusCode::BAD_REQUEST,
            AppError::Database(msg) => {
                error!(target: "database", error = %msg, "Database error occurred");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Internal(msg) => {
                error!(target: "internal", error = %msg, "Internal error occurred");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(AppResponse::<()> {
            code: self.code().to_string(),
            message: self.to_string(),
            data: None,
        });

        (status, body).into_response()
    }
}

impl From<crate::db::repository::RepoError> for AppError {
    fn from(e: crate::db::repository::RepoError) -> Self {
        use crate::db::repository::RepoError;
        match e {
            RepoError::NotFound(msg) => AppError::NotFound(msg),
            RepoError::Duplicate(msg) => AppError::Validation(msg),
            RepoError::Validation(msg) => AppError::Validation(msg),
            RepoError::Locked(msg) => AppError::Locked(msg),
            RepoError::Database(msg) => AppError::Database(msg),
        }
    }
}

/// Result type for handlers and services
pub type AppResult<T> = Result<T, AppError>;

/// Create a successful response
pub fn ok<T: Serialize>(data: T) -> Json<AppResponse<T>> {
    Json(AppResponse {
        code: "E0000".to_string(),
        message: "Success".to_string(),
        data: Some(data),
    })
}
