//! Lowering from syntax tree to the flat instruction set.
//!
//! Variables are program-scoped: every `VAR` gets a fixed slot for the
//! whole program and all slots start at zero. Expression temporaries live
//! above the variable slots and are only valid within one statement.

use std::collections::{BTreeSet, HashMap, HashSet};

use mpsched_core::RegisterIndex;

use crate::CompileOptions;
use crate::ast::*;
use crate::error::{LoadError, Location, ParseError, ValidationError};
use crate::ir::{Instr, Slot, Source};

/// Output of the compiler, before static validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    pub name: String,
    pub instructions: Vec<Instr>,
    /// Source location of each instruction.
    pub locations: Vec<Location>,
    pub declared_registers: BTreeSet<u8>,
    pub slot_count: usize,
    /// Location of the `SCHEDULER` header.
    pub location: Location,
}

type CResult<T> = Result<T, LoadError>;

pub fn lower(program: &Program, options: &CompileOptions) -> CResult<CompiledProgram> {
    let mut vars = HashMap::new();
    collect_vars(&program.body, &mut vars)?;

    let uses = match &program.uses {
        Some(list) => {
            let mut set = BTreeSet::new();
            for &(index, location) in list {
                set.insert(in_range(index, options.register_count, location)?);
            }
            Some(set)
        }
        None => None,
    };

    let mut compiler = Compiler {
        register_count: options.register_count,
        next_temp: vars.len(),
        slot_count: vars.len(),
        vars,
        declared: HashSet::new(),
        uses,
        referenced: BTreeSet::new(),
        instructions: Vec::new(),
        locations: Vec::new(),
    };
    for stmt in &program.body {
        compiler.statement(stmt)?;
    }

    let declared_registers = compiler.uses.clone().unwrap_or(compiler.referenced);
    Ok(CompiledProgram {
        name: program.name.clone(),
        instructions: compiler.instructions,
        locations: compiler.locations,
        declared_registers,
        slot_count: compiler.slot_count,
        location: program.location,
    })
}

fn collect_vars(body: &[Stmt], vars: &mut HashMap<String, Slot>) -> CResult<()> {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Var { name, .. } => {
                if vars.contains_key(name) {
                    return Err(ParseError::new(
                        stmt.location,
                        format!("variable `{name}` is already declared"),
                    )
                    .into());
                }
                let slot = slot_from(vars.len(), stmt.location)?;
                vars.insert(name.clone(), slot);
            }
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                collect_vars(then_body, vars)?;
                collect_vars(else_body, vars)?;
            }
            StmtKind::While { body, .. } => collect_vars(body, vars)?,
            _ => {}
        }
    }
    Ok(())
}

fn slot_from(index: usize, location: Location) -> CResult<Slot> {
    Slot::try_from(index).map_err(|_| {
        ParseError::new(location, "program needs more value slots than supported").into()
    })
}

fn in_range(index: u64, count: u8, location: Location) -> CResult<u8> {
    match u8::try_from(index) {
        Ok(i) if i >= 1 && i <= count => Ok(i),
        _ => Err(ValidationError::UndeclaredRegister { index, location }.into()),
    }
}

struct Compiler {
    register_count: u8,
    vars: HashMap<String, Slot>,
    declared: HashSet<String>,
    uses: Option<BTreeSet<u8>>,
    referenced: BTreeSet<u8>,
    instructions: Vec<Instr>,
    locations: Vec<Location>,
    next_temp: usize,
    slot_count: usize,
}

impl Compiler {
    fn emit(&mut self, instr: Instr, location: Location) -> usize {
        self.instructions.push(instr);
        self.locations.push(location);
        self.instructions.len() - 1
    }

    fn patch(&mut self, at: usize) {
        let here = self.instructions.len();
        match &mut self.instructions[at] {
            Instr::BranchIfZero { target, .. } | Instr::Jump { target } => *target = here,
            _ => {}
        }
    }

    fn temp(&mut self, location: Location) -> CResult<Slot> {
        let slot = slot_from(self.next_temp, location)?;
        self.next_temp += 1;
        self.slot_count = self.slot_count.max(self.next_temp);
        Ok(slot)
    }

    fn var_slot(&self, name: &str, location: Location) -> CResult<Slot> {
        match self.vars.get(name) {
            Some(slot) if self.declared.contains(name) => Ok(*slot),
            _ => Err(ParseError::new(location, format!("unknown variable `{name}`")).into()),
        }
    }

    fn register(&mut self, index: u64, location: Location) -> CResult<RegisterIndex> {
        let i = in_range(index, self.register_count, location)?;
        if let Some(uses) = &self.uses {
            if !uses.contains(&i) {
                return Err(ValidationError::UndeclaredRegister { index, location }.into());
            }
        }
        self.referenced.insert(i);
        Ok(RegisterIndex(i))
    }

    fn statement(&mut self, stmt: &Stmt) -> CResult<()> {
        self.next_temp = self.vars.len();
        let location = stmt.location;
        match &stmt.kind {
            StmtKind::Var { name, value } => {
                let dst = self.vars[name];
                self.expr(value, Some(dst))?;
                self.declared.insert(name.clone());
            }
            StmtKind::Set { name, value } => {
                let dst = self.var_slot(name, location)?;
                self.expr(value, Some(dst))?;
            }
            StmtKind::Weight { index, value } => {
                let index = self.expr(index, None)?;
                let value = self.expr(value, None)?;
                self.emit(Instr::SetWeight { index, value }, location);
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = self.expr(cond, None)?;
                let branch = self.emit(Instr::BranchIfZero { cond, target: 0 }, location);
                for s in then_body {
                    self.statement(s)?;
                }
                if else_body.is_empty() {
                    self.patch(branch);
                } else {
                    let skip = if block_terminates(then_body) {
                        None
                    } else {
                        Some(self.emit(Instr::Jump { target: 0 }, location))
                    };
                    self.patch(branch);
                    for s in else_body {
                        self.statement(s)?;
                    }
                    if let Some(skip) = skip {
                        self.patch(skip);
                    }
                }
            }
            StmtKind::While { cond, body } => {
                let start = self.instructions.len();
                let cond = self.expr(cond, None)?;
                let exit = self.emit(Instr::BranchIfZero { cond, target: 0 }, location);
                for s in body {
                    self.statement(s)?;
                }
                if !block_terminates(body) {
                    self.emit(Instr::Jump { target: start }, location);
                }
                self.patch(exit);
            }
            StmtKind::EmitSubflow { index } => {
                let index = self.expr(index, None)?;
                self.emit(Instr::EmitSubflow { index }, location);
            }
            StmtKind::EmitWeights => {
                self.emit(Instr::EmitWeights, location);
            }
            StmtKind::Fallback => {
                self.emit(Instr::Fallback, location);
            }
        }
        Ok(())
    }

    /// Compile `expr`, writing into `dst` when given. Returns the slot holding the value.
    fn expr(&mut self, expr: &Expr, dst: Option<Slot>) -> CResult<Slot> {
        let location = expr.location;
        let target = |c: &mut Self| -> CResult<Slot> {
            match dst {
                Some(d) => Ok(d),
                None => c.temp(location),
            }
        };

        match &expr.kind {
            ExprKind::Int(text) => {
                let value = text
                    .parse::<i64>()
                    .map_err(|_| ValidationError::LiteralOverflow {
                        literal: text.clone(),
                        location,
                    })?;
                let d = target(self)?;
                self.emit(Instr::Load { dst: d, src: Source::Const(value) }, location);
                Ok(d)
            }
            ExprKind::Var(name) => {
                let slot = self.var_slot(name, location)?;
                match dst {
                    Some(d) if d != slot => {
                        self.emit(Instr::Load { dst: d, src: Source::Slot(slot) }, location);
                        Ok(d)
                    }
                    _ => Ok(slot),
                }
            }
            ExprKind::Register(index) => {
                let reg = self.register(*index, location)?;
                let d = target(self)?;
                self.emit(Instr::Load { dst: d, src: Source::Register(reg) }, location);
                Ok(d)
            }
            ExprKind::User => {
                let d = target(self)?;
                self.emit(Instr::Load { dst: d, src: Source::User }, location);
                Ok(d)
            }
            ExprKind::SubflowCount => {
                let d = target(self)?;
                self.emit(Instr::Load { dst: d, src: Source::SubflowCount }, location);
                Ok(d)
            }
            ExprKind::SubflowField { index, field } => {
                let index = self.expr(index, None)?;
                let d = target(self)?;
                self.emit(
                    Instr::LoadField {
                        dst: d,
                        index,
                        field: *field,
                    },
                    location,
                );
                Ok(d)
            }
            ExprKind::Unary { op, operand } => {
                let src = self.expr(operand, None)?;
                let d = target(self)?;
                self.emit(Instr::Unary { op: *op, dst: d, src }, location);
                Ok(d)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs, None)?;
                let rhs = self.expr(rhs, None)?;
                let d = target(self)?;
                self.emit(Instr::Binary { op: *op, dst: d, lhs, rhs }, location);
                Ok(d)
            }
            ExprKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                let cond = self.expr(cond, None)?;
                let if_true = self.expr(if_true, None)?;
                let if_false = self.expr(if_false, None)?;
                let d = target(self)?;
                self.emit(
                    Instr::Select {
                        dst: d,
                        cond,
                        if_true,
                        if_false,
                    },
                    location,
                );
                Ok(d)
            }
        }
    }
}
