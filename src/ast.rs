use std::fmt::Display;

use crate::span::Position;
use crate::tokenizer::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Number {
    pub pos: Position,
    pub value: i64,
}

/// The line number identifying a statement and the target of GOTO/GOSUB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub pos: Position,
    pub value: i64,
}

impl From<Number> for Label {
    fn from(n: Number) -> Label {
        Label {
            pos: n.pos,
            value: n.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub pos: Position,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Number),
    Variable(Variable),
    String { pos: Position, value: String },
    Binary { op: Token, x: Box<Expr>, y: Box<Expr> },
    Paren { lparen: Token, x: Box<Expr>, rparen: Token },
    // PRINT argument separator; never produced inside an expression
    Punct { pos: Position, kind: TokenKind },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    End(EndStmt),
    For(ForStmt),
    Goto(GotoStmt),
    Gosub(GosubStmt),
    If(IfStmt),
    Let(LetStmt),
    Next(NextStmt),
    Peek(PeekStmt),
    Poke(PokeStmt),
    Print(PrintStmt),
    Return(ReturnStmt),
}

impl Stmt {
    pub fn label(&self) -> &Label {
        match self {
            Stmt::End(s) => &s.label,
            Stmt::For(s) => &s.label,
            Stmt::Goto(s) => &s.label,
            Stmt::Gosub(s) => &s.label,
            Stmt::If(s) => &s.label,
            Stmt::Let(s) => &s.label,
            Stmt::Next(s) => &s.label,
            Stmt::Peek(s) => &s.label,
            Stmt::Poke(s) => &s.label,
            Stmt::Print(s) => &s.label,
            Stmt::Return(s) => &s.label,
        }
    }

    pub fn line(&self) -> i64 {
        self.label().value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndStmt {
    pub label: Label,
    pub keyword: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub label: Label,
    pub keyword: Token,
    pub var: Variable,
    pub start: Expr,
    pub to: Token,
    pub end: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GotoStmt {
    pub label: Label,
    pub keyword: Token,
    pub location: Number,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GosubStmt {
    pub label: Label,
    pub keyword: Token,
    pub location: Number,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub label: Label,
    pub keyword: Token,
    pub cond: Expr,
    pub then: Token,
    pub body: Box<Stmt>,
    pub else_branch: Option<ElseStmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseStmt {
    pub label: Label,
    pub keyword: Token,
    pub body: Box<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetStmt {
    pub label: Label,
    pub keyword: Option<Token>,
    pub var: Variable,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NextStmt {
    pub label: Label,
    pub keyword: Token,
    pub var: Variable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeekStmt {
    pub label: Label,
    pub keyword: Token,
    pub addr: Expr,
    pub var: Variable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PokeStmt {
    pub label: Label,
    pub keyword: Token,
    pub addr: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintStmt {
    pub label: Label,
    pub keyword: Token,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub label: Label,
    pub keyword: Token,
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

// Statements render back to parseable source form; the REPL's program
// listing relies on this.
impl Display for Stmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stmt::End(s) => write!(f, "{} END", s.label),
            Stmt::For(s) => write!(
                f,
                "{} FOR {} = {} TO {}",
                s.label, s.var, s.start, s.end
            ),
            Stmt::Goto(s) => write!(f, "{} GOTO {}", s.label, s.location.value),
            Stmt::Gosub(s) => write!(f, "{} GOSUB {}", s.label, s.location.value),
            Stmt::If(s) => {
                write!(f, "{} IF {} THEN\n{}", s.label, s.cond, s.body)?;
                if let Some(else_branch) = &s.else_branch {
                    write!(f, "\n{} ELSE\n{}", else_branch.label, else_branch.body)?;
                }
                Ok(())
            }
            Stmt::Let(s) => {
                if s.keyword.is_some() {
                    write!(f, "{} LET {} = {}", s.label, s.var, s.value)
                } else {
                    write!(f, "{} {} = {}", s.label, s.var, s.value)
                }
            }
            Stmt::Next(s) => write!(f, "{} NEXT {}", s.label, s.var),
            Stmt::Peek(s) => write!(f, "{} PEEK {}, {}", s.label, s.addr, s.var),
            Stmt::Poke(s) => write!(f, "{} POKE {}, {}", s.label, s.addr, s.value),
            Stmt::Print(s) => {
                write!(f, "{} PRINT", s.label)?;
                for arg in &s.args {
                    match arg {
                        Expr::Punct { .. } => write!(f, "{}", arg)?,
                        _ => write!(f, " {}", arg)?,
                    }
                }
                Ok(())
            }
            Stmt::Return(s) => write!(f, "{} RETURN", s.label),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n.value),
            Expr::Variable(v) => write!(f, "{}", v),
            Expr::String { value, .. } => write!(f, "{:?}", value),
            Expr::Binary { op, x, y } => write!(f, "{} {} {}", x, op.text, y),
            Expr::Paren { x, .. } => write!(f, "({})", x),
            Expr::Punct { kind, .. } => write!(f, "{}", kind),
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
