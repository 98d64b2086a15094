//! Runtime error types.

use mpsched_lang::LoadError;
use thiserror::Error;

/// Errors from registry (control-plane) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("scheduler already loaded: {0}")]
    DuplicateSchedulerName(String),

    #[error("scheduler not found: {0}")]
    SchedulerNotFound(String),

    #[error("scheduler {name} is bound to {bound} connection(s)")]
    SchedulerInUse { name: String, bound: usize },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Reasons an evaluation stops without a usable program decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("evaluation exceeded step budget of {limit}")]
    BudgetExceeded { limit: u64 },

    #[error("division by zero at instruction {pc}")]
    DivideByZero { pc: usize },

    #[error("subflow index {index} out of range (candidates: {len})")]
    SubflowOutOfRange { index: i64, len: usize },

    #[error("weight index {index} out of range (candidates: {len})")]
    WeightOutOfRange { index: i64, len: usize },

    #[error("emitted weight vector is all zero")]
    EmptyWeights,
}
