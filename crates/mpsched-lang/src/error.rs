//! Loader error types.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// 1-based position in program source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Malformed program text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{location}: {message}")]
pub struct ParseError {
    pub location: Location,
    pub message: String,
}

impl ParseError {
    pub fn new(location: Location, message: impl Into<String>) -> Self {
        Self {
            location,
            message: message.into(),
        }
    }
}

/// Well-formed program text that breaks a static rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{location}: register R{index} is not declared")]
    UndeclaredRegister { index: u64, location: Location },

    #[error("{location}: control can reach this point without emitting a decision")]
    MissingTerminalDecision { location: Location },

    #[error("{location}: unreachable code")]
    UnreachableCode { location: Location },

    #[error("{location}: integer literal {literal} does not fit in 64 bits")]
    LiteralOverflow { literal: String, location: Location },

    #[error("program compiles to {count} instructions, limit is {max}")]
    ProgramTooLarge { count: usize, max: usize },
}

/// Any failure turning source text into a compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

pub type LoadResult<T> = Result<T, LoadError>;
