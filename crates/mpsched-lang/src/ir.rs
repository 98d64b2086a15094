//! Compiled instruction set.
//!
//! A flat, tagged instruction sequence over numbered local slots. Control
//! flow is expressed with absolute instruction targets; a target equal to
//! the program length means "fall off the end", which the validator rejects.

use mpsched_core::RegisterIndex;

pub use crate::ast::{BinOp, Field, UnaryOp};

/// Index of a local value slot.
pub type Slot = u16;

/// Where a `Load` reads its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Const(i64),
    Register(RegisterIndex),
    User,
    SubflowCount,
    Slot(Slot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// Register, constant, or connection-level value into `dst`.
    Load { dst: Slot, src: Source },
    /// Metric of the candidate at position `slots[index]`.
    LoadField { dst: Slot, index: Slot, field: Field },
    Unary { op: UnaryOp, dst: Slot, src: Slot },
    Binary {
        op: BinOp,
        dst: Slot,
        lhs: Slot,
        rhs: Slot,
    },
    /// `dst = cond != 0 ? if_true : if_false`.
    Select {
        dst: Slot,
        cond: Slot,
        if_true: Slot,
        if_false: Slot,
    },
    BranchIfZero { cond: Slot, target: usize },
    Jump { target: usize },
    /// Set the weight of the candidate at position `slots[index]`.
    SetWeight { index: Slot, value: Slot },
    /// Terminal: choose the candidate at position `slots[index]`.
    EmitSubflow { index: Slot },
    /// Terminal: emit the weight vector built by `SetWeight`.
    EmitWeights,
    /// Terminal: defer to the engine's built-in heuristic.
    Fallback,
}

impl Instr {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Instr::EmitSubflow { .. } | Instr::EmitWeights | Instr::Fallback
        )
    }

    /// Control-flow successors. `len` stands for "past the last instruction".
    pub fn successors(&self, pc: usize) -> Vec<usize> {
        match self {
            Instr::EmitSubflow { .. } | Instr::EmitWeights | Instr::Fallback => Vec::new(),
            Instr::Jump { target } => vec![*target],
            Instr::BranchIfZero { target, .. } => vec![pc + 1, *target],
            _ => vec![pc + 1],
        }
    }
}
