//! mpsched-runtime — program registry and bounded-step interpreter.
//!
//! Scheduler programs are compiled once by `mpsched-lang`, registered under
//! their declared name, and interpreted on every scheduling opportunity.
//! The runtime manages:
//!
//! - **Registry**: named programs with bound-connection reference counts,
//!   published copy-on-write so lookups never wait on loads or removals
//! - **Interpreter**: executes a program against a read-only snapshot
//! - **Step budget**: caps instructions per evaluation so every evaluation
//!   terminates, whatever the program does
//!
//! # Architecture
//!
//! ```text
//! Registry
//!   ├── ArcSwap<name → Entry>   (lock-free reads)
//!   │     └── Entry { Arc<SchedulerProgram>, bound refcount }
//!   └── Mutex<versions>          (serializes writers)
//!
//! vm::execute(program, EvalContext, step_limit)
//!   └── StepBudget (one step per executed instruction)
//! ```

pub mod budget;
pub mod error;
pub mod registry;
pub mod vm;

pub use budget::StepBudget;
pub use error::{Fault, RegistryError, RegistryResult};
pub use registry::{ProgramHandle, Registry, SchedulerProgram};
pub use vm::{EvalContext, Evaluation, Outcome, execute};
