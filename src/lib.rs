//! readfence - per-process file-open access control
//!
//! A decision engine called synchronously on every intercepted file open.
//! Two policies share it:
//!
//! - a static **deny-list**: listed processes may not open anything
//! - a dynamic **learn/enforce** policy: in Learn, every file a process reads
//!   is recorded by device and inode; in Enforce, only recorded files may be
//!   read
//!
//! # Modules
//!
//! - `engine` - the decision engine and the control-plane trait
//! - `policy` - bounded concurrent stores (modes, deny-list, allow-set, violations)
//! - `identity` - file identity extraction from device/inode and open flags
//! - `events` - bounded, non-blocking audit channel
//! - `audit` - pattern auditor that escalates repeat offenders to the deny-list
//! - `replay` - JSON-lines trace replay
//! - `config` - configuration
//! - `telemetry` - logging and trace export
//! - `metrics` - Prometheus metrics
//!
//! # Quick Start
//!
//! ```ignore
//! use readfence::{
//!     DecisionEngine, EngineConfig, FileMeta, InvocationContext, Mode, OpenRequest, PolicyControl,
//! };
//!
//! let (engine, consumer) = DecisionEngine::new(&EngineConfig::default());
//! engine.set_mode(100, Mode::Learn)?;
//!
//! let req = OpenRequest::new(100, FileMeta::new(8, 1, 50), libc::O_RDONLY);
//! let decision = engine.evaluate(&req, InvocationContext::atomic());
//! assert!(decision.is_allowed());
//! ```

pub mod audit;
pub mod config;
pub mod engine;
pub mod events;
pub mod identity;
pub mod metrics;
pub mod policy;
pub mod replay;
pub mod telemetry;

// Re-export commonly used types at crate root for convenience
pub use config::{AuditConfig, Config, EngineConfig};
pub use engine::{Decision, DecisionEngine, InvocationContext, OpenRequest, PolicyControl};
pub use events::{EventConsumer, EventRecord};
pub use identity::{FileIdentity, FileMeta};
pub use policy::{Mode, ProcessId};
