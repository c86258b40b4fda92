//! 流程引擎模块
//!
//! - [`liveness`] - 心跳年龄 → 在线/离线的惰性判定
//! - [`process`] - 序列执行引擎（每机一把锁、协作式取消、重连和解）

pub mod liveness;
pub mod process;

pub use process::{EngineConfig, ProcessEngine, lock_state_consistent};
