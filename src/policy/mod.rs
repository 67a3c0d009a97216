//! Policy state consulted by the decision engine
//!
//! Four stores, all in memory and bounded:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  control-plane (set_mode / block / clear_allow_set)          │
//! └───────┬───────────────────┬─────────────────────┬────────────┘
//!         ▼                   ▼                     ▼
//!   ┌───────────┐      ┌─────────────┐      ┌───────────────┐
//!   │ ModeStore │      │  DenyList   │      │   AllowSet    │◄── learn (engine)
//!   │ pid→Mode  │      │  {pid}      │      │ {(pid, file)} │
//!   └───────────┘      └─────────────┘      └───────────────┘
//!                                                   │
//!                     ViolationCounter ◄── deny ────┘
//!                       pid → u64
//! ```
//!
//! A store that is full rejects new keys and keeps what it has. Absence is
//! always the safe reading: no mode means Off, no allow-set entry means the
//! file was never learned.

pub mod allow_set;
mod bounded;
pub mod deny_list;
pub mod mode;
pub mod violations;

pub use allow_set::{AllowKey, AllowSet};
pub use bounded::{Access, Inserted};
pub use deny_list::DenyList;
pub use mode::{Mode, ModeStore};
pub use violations::ViolationCounter;

/// Identifier of the process (thread-group) whose open is evaluated.
pub type ProcessId = u32;

/// Error type for store writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The store already holds `capacity` keys
    Full { capacity: usize },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Full { capacity } => {
                write!(f, "store full ({} entries)", capacity)
            }
        }
    }
}

impl std::error::Error for StoreError {}
