//! Sequence Model
//!
//! 一条序列 = 有序的定时继电器动作列表，描述一次完整的作业周期。

use super::serde_helpers;
use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

/// Single timed pin activation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    /// Logical pin name, resolved against the machine at run time
    pub gpio_name: String,
    /// Seconds the pin stays ON
    pub on_time: f64,
    /// Optional settle delay before the next step, seconds
    #[serde(default)]
    pub off_time: f64,
}

/// Sequence entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    #[serde(default, with = "serde_helpers::option_record_id")]
    pub id: Option<RecordId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<SequenceStep>,
    /// 全局至多一条序列持有此标记（支付触发时选用）
    #[serde(default, deserialize_with = "serde_helpers::bool_false")]
    pub is_default: bool,
    /// Σ(on_time + off_time)，仓储层在每次写入时重算，外部不可设置
    #[serde(default)]
    pub total_duration: f64,
    /// Actor who created the sequence (audit only)
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Sequence {
    /// 重算总时长
    pub fn computed_total(steps: &[SequenceStep]) -> f64 {
        steps.iter().map(|s| s.on_time + s.off_time).sum()
    }

    pub fn key(&self) -> String {
        self.id
            .as_ref()
            .map(|id| id.key().to_string())
            .unwrap_or_default()
    }
}

/// Create sequence payload
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceCreate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<SequenceStep>,
    #[serde(default)]
    pub is_default: bool,
}

/// Update sequence payload
#[derive(Debug, Clone, Deserialize)]
pub struct SequenceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<SequenceStep>>,
    /// Some(true) 夺取默认标记；Some(false) 仅放弃自身标记
    pub is_default: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_duration_sums_on_and_off() {
        let steps = vec![
            SequenceStep {
                gpio_name: "pump".into(),
                on_time: 2.0,
                off_time: 1.0,
            },
            SequenceStep {
                gpio_name: "valve".into(),
                on_time: 1.0,
                off_time: 0.0,
            },
        ];
        assert_eq!(Sequence::computed_total(&steps), 4.0);
        assert_eq!(Sequence::computed_total(&[]), 0.0);
    }
}
