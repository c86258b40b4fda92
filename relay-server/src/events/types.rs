//! 事件日志类型定义
//!
//! 追加式事件流：引擎的每一次状态跃迁都落一条记录，
//! 也是"先应答、后静默失败"模型下唯一的事后观测面。

use serde::{Deserialize, Serialize};

/// 事件类型（枚举，非自由文本）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    // ═══ 设备链路 ═══
    /// 离线→在线跃迁
    DeviceConnected,
    /// 序列边界检查发现设备失联
    DeviceDisconnected,

    // ═══ 序列执行 ═══
    /// 序列启动（锁已获取）
    SequenceStart,
    /// 序列正常完成
    SequenceEnd,
    /// 序列中断（离线等原因，锁被强制释放）
    SequenceInterrupted,
    /// 急停
    EmergencyStop,

    // ═══ 手动控制 ═══
    /// 操作员手动切换 pin
    GpioToggle,

    // ═══ 支付 ═══
    /// 收到已验签的支付确认
    PaymentReceived,
    /// 支付失败通知
    PaymentFailed,

    // ═══ 通用 ═══
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 事件日志条目（不可变，追加式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    /// 事件类型
    pub kind: EventKind,
    /// 严重级别
    pub severity: Severity,
    /// 人类可读消息
    pub message: String,
    /// 结构化详情（JSON）
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// 关联机器（record-id 字符串，系统事件为 None）
    #[serde(default)]
    pub machine: Option<String>,
    /// 操作人（系统事件为 None）
    #[serde(default)]
    pub actor: Option<String>,
    /// 时间戳（Unix 毫秒）
    #[serde(default)]
    pub created_at: i64,
}

/// 事件查询参数
#[derive(Debug, Clone, Deserialize)]
pub struct EventQuery {
    /// 起始时间（Unix 毫秒，含）
    pub from: Option<i64>,
    /// 截止时间（Unix 毫秒，含）
    pub to: Option<i64>,
    /// 事件类型过滤
    pub kind: Option<EventKind>,
    /// 严重级别过滤
    pub severity: Option<Severity>,
    /// 机器过滤（record-id 字符串）
    pub machine: Option<String>,
    /// 分页偏移
    #[serde(default)]
    pub offset: u64,
    /// 分页大小（默认 50）
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            kind: None,
            severity: None,
            machine: None,
            offset: 0,
            limit: default_limit(),
        }
    }
}

/// 事件列表响应
#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub items: Vec<EventEntry>,
    pub total: usize,
}
