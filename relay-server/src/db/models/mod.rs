//! Database Models

// Serde helpers
pub mod serde_helpers;

// Device domain
pub mod machine;
pub mod sequence;
pub mod transaction;

// Re-exports
pub use machine::{
    Gpio, GpioConfig, GpioState, Machine, MachineCreate, MachineStatus, MachineUpdate, RelayLogic,
};
pub use sequence::{Sequence, SequenceCreate, SequenceStep, SequenceUpdate};
pub use transaction::{Transaction, TransactionStatus};
