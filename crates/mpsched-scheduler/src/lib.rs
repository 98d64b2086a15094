//! mpsched-scheduler — per-connection scheduling state and the decision path.
//!
//! Ties the program registry and interpreter from `mpsched-runtime` to the
//! transport's view of its subflows:
//!
//! - **Registers**: per-connection values an application writes to steer
//!   its bound program, published copy-on-write
//! - **Decision engine**: snapshot, pre-filter, execute, fall back,
//!   post-filter, emit
//! - **Heuristics**: lowest RTT (mode 0) and bandwidth-proportional weights
//!   (mode 1) for every case a program cannot decide
//! - **Control API**: [`SchedulerRuntime`], the one entry point for
//!   applications and the transport
//!
//! # Architecture
//!
//! ```text
//! SchedulerRuntime
//!   ├── Arc<Registry>                       (mpsched-runtime)
//!   ├── ConnectionTable
//!   │     └── Connection { RegisterFile, user, binding, phase, seq }
//!   └── DecisionEngine
//!         ├── Arc<dyn PathState>             (transport-supplied subflows)
//!         ├── vm::execute + StepBudget
//!         ├── heuristics / shaping
//!         └── Diagnostics                    (rate-limited warnings)
//! ```

pub mod connection;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod heuristics;
pub mod path_state;
pub mod registers;
pub mod runtime;
pub mod shaping;

pub use connection::{Connection, DecisionPhase};
pub use diagnostics::Diagnostics;
pub use engine::{DecisionEngine, DecisionOrigin, DecisionTicket, FallbackReason};
pub use error::{ControlError, ControlResult};
pub use heuristics::FallbackMode;
pub use path_state::{PathState, StaticPathState};
pub use registers::RegisterFile;
pub use runtime::SchedulerRuntime;
pub use shaping::BandwidthBounds;
