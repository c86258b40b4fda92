//! Response types for field controllers
//!
//! What the server hands back on the device-facing endpoints. Kept in the
//! shared crate so firmware-side tooling and the server agree on the wire
//! format.

use serde::{Deserialize, Serialize};

/// Per-pin state as shipped to the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioStateView {
    /// Physical pin number on the controller
    pub pin: u8,
    /// Logical name (unique within the machine)
    pub name: String,
    /// "ON" | "OFF" — logical state, polarity translation happens on-device
    pub state: String,
    /// "LOW_ON" | "HIGH_ON" relay polarity, inert metadata for the driver
    pub relay_logic: String,
}

/// Heartbeat acknowledgement
///
/// The device mirrors whatever the server says here: pin states are
/// authoritative server-side, the controller only executes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    /// "IDLE" | "RUNNING" | "OFFLINE" (effective, heartbeat-derived)
    pub status: String,
    pub process_locked: bool,
    /// Controller should reboot itself after acknowledging
    #[serde(default)]
    pub pending_restart: bool,
    pub gpios: Vec<GpioStateView>,
}

/// Full pin snapshot for the polling endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioStatesResponse {
    pub success: bool,
    pub gpios: Vec<GpioStateView>,
    pub process_locked: bool,
    /// 1-based index of the running step, 0 when no sequence has started
    pub current_step: u32,
}
