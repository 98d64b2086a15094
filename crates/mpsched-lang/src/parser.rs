//! Recursive-descent parser for scheduler programs.

use crate::ast::*;
use crate::error::{Location, ParseError};
use crate::lexer::{Token, TokenKind, tokenize};

const KEYWORDS: &[&str] = &[
    "SCHEDULER", "USES", "VAR", "SET", "WEIGHT", "IF", "ELSE", "WHILE", "EMIT", "SUBFLOW",
    "SUBFLOWS", "WEIGHTS", "FALLBACK", "USER", "COUNT", "MIN", "MAX", "SELECT",
];

type PResult<T> = Result<T, ParseError>;

/// Deepest nesting of blocks, `ELSE IF` links, sub-expressions and
/// operator chains the parser accepts. Keeps every recursive pass over the
/// tree well inside a thread's stack.
pub const MAX_NESTING: usize = 64;

/// Parse complete program text.
pub fn parse(source: &str) -> PResult<Program> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).program()
}

/// Read the `SCHEDULER <name>;` header without parsing the body.
pub fn scheduler_name(source: &str) -> Option<String> {
    let tokens = tokenize(source).ok()?;
    let mut parser = Parser::new(tokens);
    parser.header().ok().map(|(name, _)| name)
}

fn register_index(ident: &str) -> Option<u64> {
    let digits = ident.strip_prefix('R')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits.parse::<u64>().unwrap_or(u64::MAX))
}

fn is_reserved(ident: &str) -> bool {
    KEYWORDS.contains(&ident) || register_index(ident).is_some()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.deeper()?;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn deeper(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new(
                self.location(),
                format!("nesting too deep (limit {MAX_NESTING})"),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn peek(&self) -> &Token {
        // tokenize always ends with Eof and the parser never advances past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn location(&self) -> Location {
        self.peek().location
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Location> {
        if self.check(&kind) {
            Ok(self.advance().location)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(text) if text == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> PResult<Location> {
        if self.check_keyword(keyword) {
            Ok(self.advance().location)
        } else {
            Err(self.unexpected(keyword))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let found = match &self.peek().kind {
            TokenKind::Ident(text) => format!("`{text}`"),
            TokenKind::Int(text) => format!("literal {text}"),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("{other:?}"),
        };
        ParseError::new(self.location(), format!("expected {expected}, found {found}"))
    }

    /// A user identifier (variable name).
    fn name(&mut self) -> PResult<(String, Location)> {
        let location = self.location();
        match &self.peek().kind {
            TokenKind::Ident(text) if !is_reserved(text) => {
                let text = text.clone();
                self.advance();
                Ok((text, location))
            }
            TokenKind::Ident(text) => Err(ParseError::new(
                location,
                format!("`{text}` is reserved and cannot be used as a name"),
            )),
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn header(&mut self) -> PResult<(String, Location)> {
        self.expect_keyword("SCHEDULER")?;
        let name = self.name()?;
        self.expect(TokenKind::Semi, "`;`")?;
        Ok(name)
    }

    fn program(mut self) -> PResult<Program> {
        let (name, location) = self.header()?;

        let uses = if self.eat_keyword("USES") {
            let mut regs = Vec::new();
            loop {
                let loc = self.location();
                let index = match &self.peek().kind {
                    TokenKind::Ident(text) => register_index(text),
                    _ => None,
                };
                let Some(index) = index else {
                    return Err(self.unexpected("register"));
                };
                self.advance();
                regs.push((index, loc));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Semi, "`;`")?;
            Some(regs)
        } else {
            None
        };

        let mut body = Vec::new();
        while !self.check(&TokenKind::Eof) {
            body.push(self.statement()?);
        }

        Ok(Program {
            name,
            location,
            uses,
            body,
        })
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.unexpected("`}`"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn statement(&mut self) -> PResult<Stmt> {
        let location = self.location();
        let kind = if self.eat_keyword("VAR") {
            let (name, _) = self.name()?;
            self.expect(TokenKind::Assign, "`=`")?;
            let value = self.expr()?;
            self.expect(TokenKind::Semi, "`;`")?;
            StmtKind::Var { name, value }
        } else if self.eat_keyword("SET") {
            let (name, _) = self.name()?;
            self.expect(TokenKind::Assign, "`=`")?;
            let value = self.expr()?;
            self.expect(TokenKind::Semi, "`;`")?;
            StmtKind::Set { name, value }
        } else if self.eat_keyword("WEIGHT") {
            self.expect(TokenKind::LBracket, "`[`")?;
            let index = self.expr()?;
            self.expect(TokenKind::RBracket, "`]`")?;
            self.expect(TokenKind::Assign, "`=`")?;
            let value = self.expr()?;
            self.expect(TokenKind::Semi, "`;`")?;
            StmtKind::Weight { index, value }
        } else if self.check_keyword("IF") {
            return self.if_statement();
        } else if self.eat_keyword("WHILE") {
            self.expect(TokenKind::LParen, "`(`")?;
            let cond = self.expr()?;
            self.expect(TokenKind::RParen, "`)`")?;
            let body = self.block()?;
            StmtKind::While { cond, body }
        } else if self.eat_keyword("EMIT") {
            let kind = if self.eat_keyword("WEIGHTS") {
                StmtKind::EmitWeights
            } else if self.eat_keyword("SUBFLOW") {
                self.expect(TokenKind::LBracket, "`[`")?;
                let index = self.expr()?;
                self.expect(TokenKind::RBracket, "`]`")?;
                StmtKind::EmitSubflow { index }
            } else {
                return Err(self.unexpected("`SUBFLOW` or `WEIGHTS`"));
            };
            self.expect(TokenKind::Semi, "`;`")?;
            kind
        } else if self.eat_keyword("FALLBACK") {
            self.expect(TokenKind::Semi, "`;`")?;
            StmtKind::Fallback
        } else {
            return Err(self.unexpected("statement"));
        };
        Ok(Stmt { kind, location })
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        self.nested(Self::if_chain)
    }

    fn if_chain(&mut self) -> PResult<Stmt> {
        let location = self.expect_keyword("IF")?;
        self.expect(TokenKind::LParen, "`(`")?;
        let cond = self.expr()?;
        self.expect(TokenKind::RParen, "`)`")?;
        let then_body = self.block()?;
        let else_body = if self.eat_keyword("ELSE") {
            if self.check_keyword("IF") {
                vec![self.if_statement()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If {
                cond,
                then_body,
                else_body,
            },
            location,
        })
    }

    // ── Expressions ─────────────────────────────────────────────────

    fn expr(&mut self) -> PResult<Expr> {
        self.nested(|p| p.binary(0))
    }

    fn binary_op(&self, level: usize) -> Option<BinOp> {
        let op = match (&self.peek().kind, level) {
            (TokenKind::OrOr, 0) => BinOp::Or,
            (TokenKind::AndAnd, 1) => BinOp::And,
            (TokenKind::EqEq, 2) => BinOp::Eq,
            (TokenKind::NotEq, 2) => BinOp::Ne,
            (TokenKind::Lt, 3) => BinOp::Lt,
            (TokenKind::Le, 3) => BinOp::Le,
            (TokenKind::Gt, 3) => BinOp::Gt,
            (TokenKind::Ge, 3) => BinOp::Ge,
            (TokenKind::Plus, 4) => BinOp::Add,
            (TokenKind::Minus, 4) => BinOp::Sub,
            (TokenKind::Star, 5) => BinOp::Mul,
            (TokenKind::Slash, 5) => BinOp::Div,
            (TokenKind::Percent, 5) => BinOp::Rem,
            _ => return None,
        };
        Some(op)
    }

    fn binary(&mut self, level: usize) -> PResult<Expr> {
        if level > 5 {
            return self.unary();
        }
        let mut chain = 0;
        let result = self.binary_chain(level, &mut chain);
        self.depth -= chain;
        result
    }

    /// Left-folds operators of one precedence level. Each operator folded
    /// in deepens the tree's left spine, so it counts as one more level.
    fn binary_chain(&mut self, level: usize, chain: &mut usize) -> PResult<Expr> {
        let mut lhs = self.binary(level + 1)?;
        while let Some(op) = self.binary_op(level) {
            self.deeper()?;
            *chain += 1;
            let location = self.advance().location;
            let rhs = self.binary(level + 1)?;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                location,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let location = self.location();
        if self.eat(&TokenKind::Minus) {
            // Fold `-<literal>` so that i64::MIN is expressible.
            if let TokenKind::Int(text) = &self.peek().kind {
                let text = format!("-{text}");
                self.advance();
                return Ok(Expr {
                    kind: ExprKind::Int(text),
                    location,
                });
            }
            let operand = self.nested(Self::unary)?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                location,
            });
        }
        if self.eat(&TokenKind::Bang) {
            let operand = self.nested(Self::unary)?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                location,
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> PResult<Expr> {
        let location = self.location();
        let token = self.peek().clone();
        let kind = match token.kind {
            TokenKind::Int(text) => {
                self.advance();
                ExprKind::Int(text)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(TokenKind::RParen, "`)`")?;
                return Ok(inner);
            }
            TokenKind::Ident(ref text) => match text.as_str() {
                "USER" => {
                    self.advance();
                    ExprKind::User
                }
                "SUBFLOWS" => {
                    self.advance();
                    self.expect(TokenKind::Dot, "`.`")?;
                    self.expect_keyword("COUNT")?;
                    ExprKind::SubflowCount
                }
                "SUBFLOW" => {
                    self.advance();
                    self.expect(TokenKind::LBracket, "`[`")?;
                    let index = self.expr()?;
                    self.expect(TokenKind::RBracket, "`]`")?;
                    self.expect(TokenKind::Dot, "`.`")?;
                    let field_loc = self.location();
                    let field = match &self.peek().kind {
                        TokenKind::Ident(name) => Field::from_name(name),
                        _ => None,
                    };
                    let Some(field) = field else {
                        return Err(ParseError::new(
                            field_loc,
                            "expected subflow field ID, RTT, CWND or BW",
                        ));
                    };
                    self.advance();
                    ExprKind::SubflowField {
                        index: Box::new(index),
                        field,
                    }
                }
                "MIN" | "MAX" => {
                    let op = if text == "MIN" { BinOp::Min } else { BinOp::Max };
                    self.advance();
                    self.expect(TokenKind::LParen, "`(`")?;
                    let lhs = self.expr()?;
                    self.expect(TokenKind::Comma, "`,`")?;
                    let rhs = self.expr()?;
                    self.expect(TokenKind::RParen, "`)`")?;
                    ExprKind::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    }
                }
                "SELECT" => {
                    self.advance();
                    self.expect(TokenKind::LParen, "`(`")?;
                    let cond = self.expr()?;
                    self.expect(TokenKind::Comma, "`,`")?;
                    let if_true = self.expr()?;
                    self.expect(TokenKind::Comma, "`,`")?;
                    let if_false = self.expr()?;
                    self.expect(TokenKind::RParen, "`)`")?;
                    ExprKind::Select {
                        cond: Box::new(cond),
                        if_true: Box::new(if_true),
                        if_false: Box::new(if_false),
                    }
                }
                other => {
                    if let Some(index) = register_index(other) {
                        self.advance();
                        ExprKind::Register(index)
                    } else {
                        let (name, _) = self.name()?;
                        ExprKind::Var(name)
                    }
                }
            },
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr { kind, location })
    }
}
