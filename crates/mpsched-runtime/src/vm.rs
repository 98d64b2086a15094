//! Bounded-step interpreter for compiled scheduler programs.
//!
//! Executes against a read-only snapshot: the connection's registers, its
//! user value, and the candidate subflows of this evaluation. Arithmetic
//! wraps on overflow; division by zero and out-of-range candidate indices
//! are faults. Logical `&&`/`||` evaluate both operands.

use mpsched_core::{Subflow, SubflowId};
use mpsched_lang::ir::{BinOp, Field, Instr, Slot, Source, UnaryOp};

use crate::budget::StepBudget;
use crate::error::Fault;
use crate::registry::SchedulerProgram;

/// Read-only inputs of one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Register file snapshot; index 0 holds R1.
    pub registers: &'a [i64],
    pub user: i64,
    /// Candidate subflows, sorted by id.
    pub candidates: &'a [Subflow],
}

/// What a program asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Subflow(SubflowId),
    /// One weight per candidate, in candidate order. Never all zero.
    Weights(Vec<u64>),
    /// The program deferred to the built-in heuristic.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub outcome: Outcome,
    pub steps: u64,
}

/// Run `program` to its terminal instruction or until the step limit is hit.
pub fn execute(
    program: &SchedulerProgram,
    ctx: &EvalContext<'_>,
    step_limit: u64,
) -> Result<Evaluation, Fault> {
    let instrs = program.instructions();
    let mut slots = vec![0i64; program.slot_count()];
    let mut weights = vec![0u64; ctx.candidates.len()];
    let mut budget = StepBudget::new(step_limit);
    let mut pc = 0usize;

    let finish = |outcome: Outcome, budget: &StepBudget| Evaluation {
        outcome,
        steps: budget.used(),
    };

    loop {
        // Validated programs cannot run past their last instruction.
        let Some(instr) = instrs.get(pc) else {
            return Ok(finish(Outcome::Fallback, &budget));
        };
        budget.charge()?;

        match *instr {
            Instr::Load { dst, src } => {
                let value = match src {
                    Source::Const(v) => v,
                    Source::Register(reg) => reg
                        .0
                        .checked_sub(1)
                        .and_then(|i| ctx.registers.get(usize::from(i)))
                        .copied()
                        .unwrap_or(0),
                    Source::User => ctx.user,
                    Source::SubflowCount => saturate(ctx.candidates.len() as u64),
                    Source::Slot(s) => slots[usize::from(s)],
                };
                slots[usize::from(dst)] = value;
            }
            Instr::LoadField { dst, index, field } => {
                let i = candidate(get(&slots, index), ctx.candidates.len())?;
                let sbf = &ctx.candidates[i];
                slots[usize::from(dst)] = match field {
                    Field::Id => i64::from(sbf.id),
                    Field::Rtt => saturate(sbf.rtt_us),
                    Field::Cwnd => i64::from(sbf.cwnd),
                    Field::Bandwidth => saturate(sbf.bandwidth),
                };
            }
            Instr::Unary { op, dst, src } => {
                let v = get(&slots, src);
                slots[usize::from(dst)] = match op {
                    UnaryOp::Neg => v.wrapping_neg(),
                    UnaryOp::Not => i64::from(v == 0),
                };
            }
            Instr::Binary { op, dst, lhs, rhs } => {
                let value = binary(op, get(&slots, lhs), get(&slots, rhs), pc)?;
                slots[usize::from(dst)] = value;
            }
            Instr::Select {
                dst,
                cond,
                if_true,
                if_false,
            } => {
                let pick = if get(&slots, cond) != 0 { if_true } else { if_false };
                slots[usize::from(dst)] = get(&slots, pick);
            }
            Instr::BranchIfZero { cond, target } => {
                if get(&slots, cond) == 0 {
                    pc = target;
                    continue;
                }
            }
            Instr::Jump { target } => {
                pc = target;
                continue;
            }
            Instr::SetWeight { index, value } => {
                let raw = get(&slots, index);
                let i = usize::try_from(raw)
                    .ok()
                    .filter(|&i| i < weights.len())
                    .ok_or(Fault::WeightOutOfRange {
                        index: raw,
                        len: weights.len(),
                    })?;
                // Negative weights mean "do not use".
                weights[i] = u64::try_from(get(&slots, value)).unwrap_or(0);
            }
            Instr::EmitSubflow { index } => {
                let i = candidate(get(&slots, index), ctx.candidates.len())?;
                return Ok(finish(Outcome::Subflow(ctx.candidates[i].id), &budget));
            }
            Instr::EmitWeights => {
                if weights.iter().all(|&w| w == 0) {
                    return Err(Fault::EmptyWeights);
                }
                return Ok(finish(Outcome::Weights(weights), &budget));
            }
            Instr::Fallback => return Ok(finish(Outcome::Fallback, &budget)),
        }
        pc += 1;
    }
}

fn get(slots: &[i64], slot: Slot) -> i64 {
    slots[usize::from(slot)]
}

fn saturate(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn candidate(value: i64, len: usize) -> Result<usize, Fault> {
    usize::try_from(value)
        .ok()
        .filter(|&i| i < len)
        .ok_or(Fault::SubflowOutOfRange { index: value, len })
}

fn binary(op: BinOp, l: i64, r: i64, pc: usize) -> Result<i64, Fault> {
    let value = match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::Div | BinOp::Rem if r == 0 => return Err(Fault::DivideByZero { pc }),
        BinOp::Div => l.wrapping_div(r),
        BinOp::Rem => l.wrapping_rem(r),
        BinOp::Eq => i64::from(l == r),
        BinOp::Ne => i64::from(l != r),
        BinOp::Lt => i64::from(l < r),
        BinOp::Le => i64::from(l <= r),
        BinOp::Gt => i64::from(l > r),
        BinOp::Ge => i64::from(l >= r),
        BinOp::And => i64::from(l != 0 && r != 0),
        BinOp::Or => i64::from(l != 0 || r != 0),
        BinOp::Min => l.min(r),
        BinOp::Max => l.max(r),
    };
    Ok(value)
}
