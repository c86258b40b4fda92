//! 事件日志模块
//!
//! 追加式事件流（设备链路、序列执行、手动控制、支付），
//! 引擎写入、运营面查询。
//!
//! # 结构
//!
//! - [`types`] - 事件类型与查询参数
//! - [`storage`] - SurrealDB 存储
//! - [`service`] - 非阻塞写入服务（mpsc）
//! - [`worker`] - 后台消费者

pub mod service;
pub mod storage;
pub mod types;
pub mod worker;

pub use service::{EventLogRequest, EventLogService};
pub use storage::{EventStorage, EventStorageError};
pub use types::{EventEntry, EventKind, EventListResponse, EventQuery, Severity};
pub use worker::EventLogWorker;
