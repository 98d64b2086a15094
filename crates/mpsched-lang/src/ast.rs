//! Syntax tree produced by the parser.

use crate::error::Location;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub name: String,
    pub location: Location,
    /// Explicit `USES` list, if the program declares one.
    pub uses: Option<Vec<(u64, Location)>>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Var { name: String, value: Expr },
    Set { name: String, value: Expr },
    Weight { index: Expr, value: Expr },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While { cond: Expr, body: Vec<Stmt> },
    EmitSubflow { index: Expr },
    EmitWeights,
    Fallback,
}

impl Stmt {
    /// Whether control never continues past this statement.
    pub fn terminates(&self) -> bool {
        match &self.kind {
            StmtKind::EmitSubflow { .. } | StmtKind::EmitWeights | StmtKind::Fallback => true,
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => block_terminates(then_body) && block_terminates(else_body),
            _ => false,
        }
    }
}

pub fn block_terminates(body: &[Stmt]) -> bool {
    body.last().is_some_and(Stmt::terminates)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Literal text, with a leading `-` when negated in source.
    Int(String),
    Var(String),
    Register(u64),
    User,
    SubflowCount,
    SubflowField { index: Box<Expr>, field: Field },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Select {
        cond: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
}

/// Per-subflow metric readable by programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Rtt,
    Cwnd,
    Bandwidth,
}

impl Field {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ID" => Some(Field::Id),
            "RTT" => Some(Field::Rtt),
            "CWND" => Some(Field::Cwnd),
            "BW" => Some(Field::Bandwidth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Min,
    Max,
}
