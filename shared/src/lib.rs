//! Shared types for the relay supervision platform
//!
//! Wire types exchanged between the supervision server and field
//! controllers, plus small utilities used by every crate.

pub mod request;
pub mod response;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use request::{DeviceErrorReport, GpioStateUpdate, HeartbeatRequest};
pub use response::{GpioStateView, GpioStatesResponse, HeartbeatResponse};
