//! Control API error types.

use mpsched_core::{ConnectionId, RegisterIndex};
use mpsched_lang::{LoadError, ParseError, ValidationError};
use mpsched_runtime::RegistryError;
use thiserror::Error;

/// Failures returned synchronously by control-plane calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("parse error: {0}")]
    Parse(ParseError),

    #[error("validation error: {0}")]
    Validation(ValidationError),

    #[error("scheduler already loaded: {0}")]
    DuplicateSchedulerName(String),

    #[error("scheduler not found: {0}")]
    SchedulerNotFound(String),

    #[error("scheduler {name} is bound to {bound} connection(s)")]
    SchedulerInUse { name: String, bound: usize },

    #[error("invalid register index {index}, valid range is R1..=R{count}")]
    InvalidRegisterIndex { index: RegisterIndex, count: u8 },

    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("connection {0} is not multipath capable")]
    NoMultipathCapability(ConnectionId),
}

impl From<RegistryError> for ControlError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Load(LoadError::Parse(e)) => ControlError::Parse(e),
            RegistryError::Load(LoadError::Validation(e)) => ControlError::Validation(e),
            RegistryError::DuplicateSchedulerName(name) => ControlError::DuplicateSchedulerName(name),
            RegistryError::SchedulerNotFound(name) => ControlError::SchedulerNotFound(name),
            RegistryError::SchedulerInUse { name, bound } => {
                ControlError::SchedulerInUse { name, bound }
            }
        }
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
