//! Static checks over compiled programs. Never executes anything.

use crate::compile::CompiledProgram;
use crate::error::ValidationError;

/// Run every structural check, in order: size, reachability, termination.
pub fn validate(program: &CompiledProgram, max_instructions: usize) -> Result<(), ValidationError> {
    let instrs = &program.instructions;
    let len = instrs.len();
    if len > max_instructions {
        return Err(ValidationError::ProgramTooLarge {
            count: len,
            max: max_instructions,
        });
    }
    let location_of = |pc: usize| {
        program
            .locations
            .get(pc)
            .copied()
            .unwrap_or(program.location)
    };

    // Forward reachability from entry; index `len` is the virtual end node.
    let mut reachable = vec![false; len + 1];
    let mut falls_off_from: Option<usize> = None;
    let mut stack = vec![0usize];
    while let Some(pc) = stack.pop() {
        if reachable[pc] {
            continue;
        }
        reachable[pc] = true;
        if pc == len {
            continue;
        }
        for next in instrs[pc].successors(pc) {
            if next == len && falls_off_from.is_none() {
                falls_off_from = Some(pc);
            }
            if next <= len && !reachable[next] {
                stack.push(next);
            }
        }
    }

    if reachable[len] {
        let location = falls_off_from.map_or(program.location, location_of);
        return Err(ValidationError::MissingTerminalDecision { location });
    }

    if let Some(pc) = (0..len).find(|&pc| !reachable[pc]) {
        return Err(ValidationError::UnreachableCode {
            location: location_of(pc),
        });
    }

    // Backward: every reachable instruction must be able to reach a terminal.
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); len];
    for (pc, instr) in instrs.iter().enumerate() {
        for next in instr.successors(pc) {
            if next < len {
                predecessors[next].push(pc);
            }
        }
    }
    let mut finishes = vec![false; len];
    let mut stack: Vec<usize> = (0..len).filter(|&pc| instrs[pc].is_terminal()).collect();
    while let Some(pc) = stack.pop() {
        if finishes[pc] {
            continue;
        }
        finishes[pc] = true;
        stack.extend(predecessors[pc].iter().copied().filter(|&p| !finishes[p]));
    }
    if let Some(pc) = (0..len).find(|&pc| !finishes[pc]) {
        return Err(ValidationError::MissingTerminalDecision {
            location: location_of(pc),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::compile::lower;
    use crate::error::Location;
    use crate::ir::{Instr, Source};
    use crate::parser::parse;
    use crate::CompileOptions;

    fn check(source: &str) -> Result<(), ValidationError> {
        let program = lower(&parse(source).unwrap(), &CompileOptions::default()).unwrap();
        validate(&program, 4096)
    }

    fn raw(instructions: Vec<Instr>) -> CompiledProgram {
        let locations = (0..instructions.len())
            .map(|i| Location::new(i as u32 + 1, 1))
            .collect();
        CompiledProgram {
            name: "raw".into(),
            instructions,
            locations,
            declared_registers: BTreeSet::new(),
            slot_count: 1,
            location: Location::new(1, 1),
        }
    }

    #[test]
    fn accepts_terminating_programs() {
        assert!(check("SCHEDULER p; FALLBACK;").is_ok());
        assert!(check("SCHEDULER p; IF (R1) { EMIT SUBFLOW[0]; } FALLBACK;").is_ok());
        assert!(check("SCHEDULER p; VAR i = 0; WHILE (1) { SET i = i + 1; } FALLBACK;").is_ok());
    }

    #[test]
    fn empty_program_has_no_decision() {
        assert!(matches!(
            check("SCHEDULER p;"),
            Err(ValidationError::MissingTerminalDecision { .. })
        ));
    }

    #[test]
    fn if_without_else_can_fall_off_the_end() {
        let err = check("SCHEDULER p;\nIF (R1 > 0) {\n  EMIT SUBFLOW[0];\n}").unwrap_err();
        assert!(matches!(err, ValidationError::MissingTerminalDecision { .. }));
    }

    #[test]
    fn statements_after_emit_are_unreachable() {
        let err = check("SCHEDULER p;\nFALLBACK;\nVAR x = 1;\nFALLBACK;").unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnreachableCode {
                location: Location::new(3, 9)
            }
        );
    }

    #[test]
    fn size_cap_is_static() {
        let program = lower(
            &parse("SCHEDULER p; VAR a = 1; VAR b = 2; FALLBACK;").unwrap(),
            &CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(
            validate(&program, 2),
            Err(ValidationError::ProgramTooLarge { count: 3, max: 2 })
        );
    }

    #[test]
    fn cycle_without_exit_never_decides() {
        let program = raw(vec![
            Instr::Load { dst: 0, src: Source::Const(1) },
            Instr::Jump { target: 0 },
        ]);
        assert!(matches!(
            validate(&program, 16),
            Err(ValidationError::MissingTerminalDecision { .. })
        ));
    }

    #[test]
    fn branch_into_cycle_is_rejected() {
        // Entry branches either to a terminal or into a closed cycle.
        let program = raw(vec![
            Instr::BranchIfZero { cond: 0, target: 2 },
            Instr::Fallback,
            Instr::Jump { target: 3 },
            Instr::Jump { target: 2 },
        ]);
        assert_eq!(
            validate(&program, 16),
            Err(ValidationError::MissingTerminalDecision {
                location: Location::new(3, 1)
            })
        );
    }
}
