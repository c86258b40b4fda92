//! Request types for the shared crate
//!
//! Payloads sent by field controllers to the supervision server.

use serde::{Deserialize, Serialize};

/// Controller heartbeat payload
///
/// Sent every few seconds over plain request/response — there is no
/// persistent socket to the device, the heartbeat IS the link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// External machine label (printed on the unit)
    pub machine_id: String,
    /// Firmware version reported by the controller
    #[serde(default)]
    pub firmware_version: Option<String>,
    /// Local IP address of the controller
    #[serde(default)]
    pub ip_address: Option<String>,
    /// WiFi SSID the controller is joined to
    #[serde(default)]
    pub wifi_ssid: Option<String>,
    /// RSSI in dBm
    #[serde(default)]
    pub signal_strength: Option<i32>,
}

/// Device-confirmed pin state change
///
/// The controller reports back after actually driving a relay, so the
/// registry can reflect physical reality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioStateUpdate {
    pub machine_id: String,
    pub gpio_number: u8,
    /// "ON" | "OFF"
    pub state: String,
}

/// Error report from a controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceErrorReport {
    pub machine_id: String,
    pub error_message: String,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Pagination query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationQuery {
    /// Page number (1-based, default: 1)
    #[serde(default = "default_page")]
    pub page: u32,

    /// Items per page (default: 20, max: 100)
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl PaginationQuery {
    /// Get the offset for database queries
    pub fn offset(&self) -> u64 {
        (self.page.saturating_sub(1)) as u64 * self.per_page as u64
    }

    /// Get the limit (clamped to max 100)
    pub fn limit(&self) -> u32 {
        std::cmp::min(self.per_page, 100)
    }
}
