//! 事件日志服务
//!
//! `EventLogService` 对外提供非阻塞的 `log()`：请求经 mpsc 通道交给
//! 后台 worker 落库，调用方（引擎步进循环、HTTP handler）永不等待磁盘。
//! 查询操作直接读 storage。
//!
//! 按事件类型提供有名 helper，调用点不手拼 metadata。

use std::sync::Arc;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use tokio::sync::mpsc;

use super::storage::{EventStorage, EventStorageError};
use super::types::{EventEntry, EventKind, EventListResponse, EventQuery, Severity};
use crate::db::models::{Machine, Sequence};

/// 发送到后台 worker 的日志请求
pub struct EventLogRequest {
    pub kind: EventKind,
    pub severity: Severity,
    pub message: String,
    pub metadata: serde_json::Value,
    pub machine: Option<String>,
    pub actor: Option<String>,
}

/// 事件日志服务
pub struct EventLogService {
    storage: EventStorage,
    tx: mpsc::Sender<EventLogRequest>,
}

impl std::fmt::Debug for EventLogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogService").finish_non_exhaustive()
    }
}

fn machine_ref(machine: &Machine) -> Option<String> {
    machine.id.as_ref().map(|id| id.to_string())
}

impl EventLogService {
    /// 创建服务与后台通道
    pub fn new(db: Surreal<Db>, buffer_size: usize) -> (Arc<Self>, mpsc::Receiver<EventLogRequest>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        let storage = EventStorage::new(db);
        (Arc::new(Self { storage, tx }), rx)
    }

    /// 异步记录事件（非阻塞）
    ///
    /// 通道满时等待 — 事件日志不允许丢失。
    pub async fn log(&self, req: EventLogRequest) {
        if self.tx.send(req).await.is_err() {
            tracing::error!("Event log channel closed — event entry lost!");
        }
    }

    /// 查询事件日志
    pub async fn query(&self, q: &EventQuery) -> Result<EventListResponse, EventStorageError> {
        let (items, total) = self.storage.query(q).await?;
        Ok(EventListResponse { items, total })
    }

    /// 存储引用（测试断言用）
    pub fn storage(&self) -> &EventStorage {
        &self.storage
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    pub async fn info(
        &self,
        message: impl Into<String>,
        metadata: serde_json::Value,
        machine: Option<String>,
        actor: Option<String>,
    ) {
        self.log(EventLogRequest {
            kind: EventKind::Info,
            severity: Severity::Info,
            message: message.into(),
            metadata,
            machine,
            actor,
        })
        .await;
    }

    pub async fn warning(
        &self,
        message: impl Into<String>,
        metadata: serde_json::Value,
        machine: Option<String>,
        actor: Option<String>,
    ) {
        self.log(EventLogRequest {
            kind: EventKind::Warning,
            severity: Severity::Warning,
            message: message.into(),
            metadata,
            machine,
            actor,
        })
        .await;
    }

    pub async fn error(
        &self,
        message: impl Into<String>,
        metadata: serde_json::Value,
        machine: Option<String>,
        actor: Option<String>,
    ) {
        self.log(EventLogRequest {
            kind: EventKind::Error,
            severity: Severity::Error,
            message: message.into(),
            metadata,
            machine,
            actor,
        })
        .await;
    }

    /// 离线→在线跃迁
    pub async fn device_connected(&self, machine: &Machine, ip: Option<&str>) {
        self.log(EventLogRequest {
            kind: EventKind::DeviceConnected,
            severity: Severity::Info,
            message: format!(
                "Controller connected from {}",
                ip.unwrap_or("unknown address")
            ),
            metadata: serde_json::json!({ "ip_address": ip }),
            machine: machine_ref(machine),
            actor: None,
        })
        .await;
    }

    /// 序列边界检查发现设备失联
    pub async fn device_disconnected(&self, machine: &Machine) {
        self.log(EventLogRequest {
            kind: EventKind::DeviceDisconnected,
            severity: Severity::Warning,
            message: "Controller disconnected (heartbeat timeout)".to_string(),
            metadata: serde_json::Value::Null,
            machine: machine_ref(machine),
            actor: None,
        })
        .await;
    }

    pub async fn sequence_start(
        &self,
        machine: &Machine,
        sequence: &Sequence,
        transaction: Option<&str>,
    ) {
        self.log(EventLogRequest {
            kind: EventKind::SequenceStart,
            severity: Severity::Info,
            message: format!("Sequence \"{}\" started", sequence.name),
            metadata: serde_json::json!({
                "sequence_id": sequence.id.as_ref().map(|id| id.to_string()),
                "sequence_name": sequence.name,
                "transaction_id": transaction,
            }),
            machine: machine_ref(machine),
            actor: None,
        })
        .await;
    }

    pub async fn sequence_end(
        &self,
        machine: &Machine,
        sequence: &Sequence,
        transaction: Option<&str>,
    ) {
        self.log(EventLogRequest {
            kind: EventKind::SequenceEnd,
            severity: Severity::Info,
            message: format!("Sequence \"{}\" completed", sequence.name),
            metadata: serde_json::json!({
                "sequence_id": sequence.id.as_ref().map(|id| id.to_string()),
                "sequence_name": sequence.name,
                "transaction_id": transaction,
            }),
            machine: machine_ref(machine),
            actor: None,
        })
        .await;
    }

    pub async fn sequence_interrupted(&self, machine: &Machine, sequence: &Sequence, reason: &str) {
        self.log(EventLogRequest {
            kind: EventKind::SequenceInterrupted,
            severity: Severity::Warning,
            message: format!("Sequence interrupted: {}", reason),
            metadata: serde_json::json!({
                "sequence_id": sequence.id.as_ref().map(|id| id.to_string()),
                "sequence_name": sequence.name,
                "reason": reason,
            }),
            machine: machine_ref(machine),
            actor: None,
        })
        .await;
    }

    pub async fn emergency_stop(&self, machine: &Machine, actor: &str) {
        self.log(EventLogRequest {
            kind: EventKind::EmergencyStop,
            severity: Severity::Critical,
            message: "Emergency stop activated".to_string(),
            metadata: serde_json::json!({ "stopped_by": actor }),
            machine: machine_ref(machine),
            actor: Some(actor.to_string()),
        })
        .await;
    }

    pub async fn gpio_toggle(&self, machine: &Machine, gpio_name: &str, state: &str, actor: Option<&str>) {
        self.log(EventLogRequest {
            kind: EventKind::GpioToggle,
            severity: Severity::Info,
            message: format!("GPIO \"{}\" toggled to {}", gpio_name, state),
            metadata: serde_json::json!({
                "gpio_name": gpio_name,
                "state": state,
                "triggered_by": actor.unwrap_or("system"),
            }),
            machine: machine_ref(machine),
            actor: actor.map(str::to_string),
        })
        .await;
    }

    pub async fn payment_received(&self, machine: &Machine, payment_id: &str, amount: f64) {
        self.log(EventLogRequest {
            kind: EventKind::PaymentReceived,
            severity: Severity::Info,
            message: format!("Payment received: {:.2}", amount),
            metadata: serde_json::json!({
                "payment_id": payment_id,
                "amount": amount,
            }),
            machine: machine_ref(machine),
            actor: None,
        })
        .await;
    }

    pub async fn payment_failed(&self, machine: Option<&Machine>, payment_id: &str, reason: &str) {
        self.log(EventLogRequest {
            kind: EventKind::PaymentFailed,
            severity: Severity::Error,
            message: format!("Payment failed: {}", reason),
            metadata: serde_json::json!({
                "payment_id": payment_id,
                "reason": reason,
            }),
            machine: machine.and_then(machine_ref),
            actor: None,
        })
        .await;
    }

    /// 直接写一条事件（启动/关闭等没有 worker 的场景）
    pub async fn log_sync(
        &self,
        kind: EventKind,
        severity: Severity,
        message: impl Into<String>,
        metadata: serde_json::Value,
        machine: Option<String>,
    ) -> Result<EventEntry, EventStorageError> {
        self.storage
            .append(kind, severity, message.into(), metadata, machine, None)
            .await
    }
}
