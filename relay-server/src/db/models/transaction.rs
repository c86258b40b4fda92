//! Transaction Model
//!
//! 支付确认事件落下的交易记录。引擎只回写 sequence_* 字段，
//! 支付状态本身归外部账务所有。

use super::serde_helpers;
use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

/// Payment/transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl Default for TransactionStatus {
    fn default() -> Self {
        TransactionStatus::Pending
    }
}

/// Transaction entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, with = "serde_helpers::option_record_id")]
    pub id: Option<RecordId>,
    /// Machine the payment targets
    #[serde(with = "serde_helpers::record_id")]
    pub machine: RecordId,
    /// External payment reference, unique (dedup key)
    pub payment_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    /// Major currency units
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Payer handle (UPI VPA or similar), display only
    #[serde(default)]
    pub payer_ref: Option<String>,
    #[serde(default)]
    pub status: TransactionStatus,
    // ===== 引擎回写区 =====
    #[serde(default, with = "serde_helpers::option_record_id")]
    pub sequence: Option<RecordId>,
    #[serde(default, deserialize_with = "serde_helpers::bool_false")]
    pub sequence_started: bool,
    #[serde(default, deserialize_with = "serde_helpers::bool_false")]
    pub sequence_completed: bool,
    #[serde(default)]
    pub sequence_start_time: Option<i64>,
    #[serde(default)]
    pub sequence_end_time: Option<i64>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_currency() -> String {
    "INR".to_string()
}

impl Transaction {
    pub fn key(&self) -> String {
        self.id
            .as_ref()
            .map(|id| id.key().to_string())
            .unwrap_or_default()
    }
}
