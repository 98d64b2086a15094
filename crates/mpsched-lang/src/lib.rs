//! mpsched-lang — the scheduler program language.
//!
//! Turns program text into a validated, flat instruction sequence that the
//! runtime interprets under a step budget. Nothing here executes a program.
//!
//! # Pipeline
//!
//! ```text
//! source ──tokenize──▶ tokens ──parse──▶ ast::Program
//!        ──lower──▶ CompiledProgram ──validate──▶ ready to register
//! ```
//!
//! # Example
//!
//! ```text
//! SCHEDULER lowest_rtt;
//! USES R1;
//!
//! VAR best = 0;
//! VAR i = 1;
//! WHILE (i < SUBFLOWS.COUNT) {
//!     IF (SUBFLOW[i].RTT < SUBFLOW[best].RTT) { SET best = i; }
//!     SET i = i + 1;
//! }
//! IF (SUBFLOWS.COUNT == 0) { FALLBACK; }
//! EMIT SUBFLOW[best];
//! ```

pub mod ast;
pub mod compile;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod validate;

use mpsched_core::config::LimitsConfig;
use tracing::debug;

pub use compile::CompiledProgram;
pub use error::{LoadError, LoadResult, Location, ParseError, ValidationError};
pub use ir::{Instr, Slot, Source};
pub use parser::scheduler_name;

/// Limits the compiler enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub register_count: u8,
    pub max_instructions: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for CompileOptions {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            register_count: limits.register_count,
            max_instructions: limits.max_instructions,
        }
    }
}

/// Parse, lower and validate program text.
pub fn compile(source: &str, options: &CompileOptions) -> LoadResult<CompiledProgram> {
    let ast = parser::parse(source)?;
    let program = compile::lower(&ast, options)?;
    validate::validate(&program, options.max_instructions)?;
    debug!(
        name = %program.name,
        instructions = program.instructions.len(),
        slots = program.slot_count,
        "scheduler program compiled"
    );
    Ok(program)
}
