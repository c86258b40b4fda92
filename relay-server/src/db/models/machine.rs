//! Machine Model
//!
//! 机器实体：一台挂在继电器上的物理设备，由远端控制器上报心跳。
//! 在线状态不落库轮询，而是读取时由 `last_heartbeat` 惰性推导。

use super::serde_helpers;
use serde::{Deserialize, Serialize};
use shared::response::GpioStateView;
use surrealdb::RecordId;

/// Logical pin state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpioState {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl GpioState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpioState::On => "ON",
            GpioState::Off => "OFF",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            GpioState::On => GpioState::Off,
            GpioState::Off => GpioState::On,
        }
    }
}

impl Default for GpioState {
    fn default() -> Self {
        GpioState::Off
    }
}

/// Relay polarity — inert metadata for the on-device driver.
/// Engine logic never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayLogic {
    /// LOW = ON (the common relay board wiring)
    #[serde(rename = "LOW_ON")]
    LowOn,
    #[serde(rename = "HIGH_ON")]
    HighOn,
}

impl RelayLogic {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayLogic::LowOn => "LOW_ON",
            RelayLogic::HighOn => "HIGH_ON",
        }
    }
}

impl Default for RelayLogic {
    fn default() -> Self {
        RelayLogic::LowOn
    }
}

/// Machine status 三态
///
/// OFFLINE 由心跳年龄推导；RUNNING 当且仅当流程锁被持有。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineStatus {
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "OFFLINE")]
    Offline,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Idle => "IDLE",
            MachineStatus::Running => "RUNNING",
            MachineStatus::Offline => "OFFLINE",
        }
    }
}

impl Default for MachineStatus {
    fn default() -> Self {
        MachineStatus::Offline
    }
}

/// Pin descriptor (继电器通道)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gpio {
    /// Physical pin number on the controller
    pub gpio_number: u8,
    /// Logical name, unique within the machine
    pub gpio_name: String,
    /// Idle-state the pin returns to
    #[serde(default)]
    pub default_state: GpioState,
    #[serde(default)]
    pub current_state: GpioState,
    #[serde(default)]
    pub relay_logic: RelayLogic,
}

impl Gpio {
    pub fn view(&self) -> GpioStateView {
        GpioStateView {
            pin: self.gpio_number,
            name: self.gpio_name.clone(),
            state: self.current_state.as_str().to_string(),
            relay_logic: self.relay_logic.as_str().to_string(),
        }
    }
}

/// Machine entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    #[serde(default, with = "serde_helpers::option_record_id")]
    pub id: Option<RecordId>,
    /// External/physical label, unique
    pub machine_id: String,
    pub location: String,
    /// Price charged per default run (display/billing metadata)
    #[serde(default)]
    pub fixed_price: f64,
    /// Stored status — read surfaces always re-derive via [`Machine::effective_status`]
    #[serde(default)]
    pub status: MachineStatus,
    /// Unix millis of the last heartbeat, None until first contact
    #[serde(default)]
    pub last_heartbeat: Option<i64>,
    #[serde(default = "default_firmware")]
    pub firmware_version: String,
    #[serde(default)]
    pub gpios: Vec<Gpio>,
    /// Sequence currently owning this machine, None when idle
    #[serde(
        default,
        with = "serde_helpers::option_record_id"
    )]
    pub current_sequence: Option<RecordId>,
    /// 流程锁 — 每台机器唯一的并发闸门
    #[serde(default, deserialize_with = "serde_helpers::bool_false")]
    pub process_locked: bool,
    /// Controller reboots on next heartbeat when set
    #[serde(default, deserialize_with = "serde_helpers::bool_false")]
    pub pending_restart: bool,
    /// 1-based running step, 0 = not started
    #[serde(default)]
    pub current_step: u32,
    #[serde(default)]
    pub process_start_time: Option<i64>,
    #[serde(default)]
    pub process_end_time: Option<i64>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub wifi_ssid: Option<String>,
    #[serde(default)]
    pub signal_strength: Option<i32>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_firmware() -> String {
    "v1.0.0".to_string()
}

impl Machine {
    /// 是否在线：最近一次心跳距 `now` 不超过 `timeout_ms`
    pub fn is_online(&self, now: i64, timeout_ms: i64) -> bool {
        crate::engine::liveness::is_online(self.last_heartbeat, now, timeout_ms)
    }

    /// 推导三态：OFFLINE > RUNNING > IDLE
    ///
    /// 落库的 `status` 可能滞后（设备悄悄失联不会触发任何写入），
    /// 所有读取面必须用这里的推导值。
    pub fn effective_status(&self, now: i64, timeout_ms: i64) -> MachineStatus {
        if !self.is_online(now, timeout_ms) {
            MachineStatus::Offline
        } else if self.process_locked {
            MachineStatus::Running
        } else {
            MachineStatus::Idle
        }
    }

    pub fn find_gpio(&self, name: &str) -> Option<&Gpio> {
        self.gpios.iter().find(|g| g.gpio_name == name)
    }

    pub fn gpio_views(&self) -> Vec<GpioStateView> {
        self.gpios.iter().map(Gpio::view).collect()
    }

    /// Record key ("machine:xyz" 的 xyz 部分)
    pub fn key(&self) -> String {
        self.id
            .as_ref()
            .map(|id| id.key().to_string())
            .unwrap_or_default()
    }
}

/// Create machine payload
#[derive(Debug, Clone, Deserialize)]
pub struct MachineCreate {
    pub machine_id: String,
    pub location: String,
    #[serde(default)]
    pub fixed_price: f64,
    #[serde(default)]
    pub gpios: Vec<GpioConfig>,
}

/// Update machine payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_price: Option<f64>,
}

/// Pin configuration as submitted by an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    pub gpio_number: u8,
    pub gpio_name: String,
    #[serde(default)]
    pub default_state: GpioState,
    #[serde(default)]
    pub relay_logic: RelayLogic,
}

impl GpioConfig {
    /// 展开为完整 pin 描述符，当前状态取 idle 态
    pub fn into_gpio(self) -> Gpio {
        Gpio {
            gpio_number: self.gpio_number,
            gpio_name: self.gpio_name,
            default_state: self.default_state,
            current_state: self.default_state,
            relay_logic: self.relay_logic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with_heartbeat(last: Option<i64>) -> Machine {
        Machine {
            id: None,
            machine_id: "VND-001".into(),
            location: "test".into(),
            fixed_price: 0.0,
            status: MachineStatus::Offline,
            last_heartbeat: last,
            firmware_version: "v1.0.0".into(),
            gpios: vec![],
            current_sequence: None,
            process_locked: false,
            pending_restart: false,
            current_step: 0,
            process_start_time: None,
            process_end_time: None,
            ip_address: None,
            wifi_ssid: None,
            signal_strength: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn never_seen_machine_is_offline() {
        let m = machine_with_heartbeat(None);
        assert!(!m.is_online(10_000, 10_000));
        assert_eq!(m.effective_status(10_000, 10_000), MachineStatus::Offline);
    }

    #[test]
    fn heartbeat_age_drives_liveness() {
        let m = machine_with_heartbeat(Some(5_000));
        assert!(m.is_online(14_999, 10_000));
        assert!(!m.is_online(15_000, 10_000));
    }

    #[test]
    fn locked_online_machine_is_running() {
        let mut m = machine_with_heartbeat(Some(1_000));
        m.process_locked = true;
        assert_eq!(m.effective_status(2_000, 10_000), MachineStatus::Running);
        m.process_locked = false;
        assert_eq!(m.effective_status(2_000, 10_000), MachineStatus::Idle);
    }

    #[test]
    fn stale_stored_status_is_overridden() {
        // 落库 RUNNING 但心跳早已超时 → 读取面必须报 OFFLINE
        let mut m = machine_with_heartbeat(Some(0));
        m.status = MachineStatus::Running;
        m.process_locked = true;
        assert_eq!(m.effective_status(60_000, 10_000), MachineStatus::Offline);
    }
}
