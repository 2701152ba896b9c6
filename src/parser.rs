use crate::ast::{
    ElseStmt, EndStmt, Expr, ForStmt, GosubStmt, GotoStmt, IfStmt, Label, LetStmt, NextStmt,
    Number, PeekStmt, PokeStmt, PrintStmt, ReturnStmt, Stmt, Variable,
};
use crate::span::Position;
use crate::tokenizer::{Token, TokenKind, Tokenizer};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{pos}: expected {expected}, but got {found}")]
    Expected {
        pos: Position,
        expected: TokenKind,
        found: TokenKind,
    },
    #[error("{pos}: {message}")]
    Lexical { pos: Position, message: String },
    #[error("{pos}: invalid number {text:?}: {source}")]
    InvalidNumber {
        pos: Position,
        text: String,
        source: std::num::ParseIntError,
    },
    #[error("{pos}: invalid string {text}: {message}")]
    InvalidString {
        pos: Position,
        text: String,
        message: String,
    },
    #[error("{pos}: unsupported statement {text:?}")]
    UnsupportedStatement { pos: Position, text: String },
    #[error("{pos}: unknown print argument {text:?}")]
    UnknownPrintArgument { pos: Position, text: String },
}

/// Recursive-descent parser producing one statement per `line` call.
/// Holds at most one pushed-back token, used to undo the speculative
/// read that resolves a dangling ELSE.
pub struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    tok: Token,
    pushback: Option<Token>,
}

impl<'a> Parser<'a> {
    pub fn new(tokenizer: Tokenizer<'a>) -> Self {
        let mut p = Parser {
            tokenizer,
            tok: Token {
                pos: Position::default(),
                kind: TokenKind::Eof,
                text: String::new(),
            },
            pushback: None,
        };
        p.advance();
        p
    }

    /// Parses one statement. Returns `Ok(None)` at clean end of input.
    /// On error, the parser has already resynchronized past the next
    /// line terminator, so the caller can keep going.
    pub fn line(&mut self) -> Result<Option<Stmt>, ParseError> {
        self.skip_cr();
        match self.tok.kind {
            TokenKind::Eof => Ok(None),
            TokenKind::Error => Err(self.lexical()),
            _ => Ok(Some(self.stmt()?)),
        }
    }

    fn advance(&mut self) {
        if let Some(tok) = self.pushback.take() {
            self.tok = tok;
            return;
        }
        // Comment tokens never reach the grammar.
        loop {
            let tok = self.tokenizer.token();
            if tok.kind != TokenKind::Rem {
                self.tok = tok;
                return;
            }
        }
    }

    fn skip_cr(&mut self) {
        while self.tok.kind == TokenKind::Cr {
            self.advance();
        }
    }

    // Discards tokens through the next line terminator so the following
    // `line` call starts fresh.
    fn synch(&mut self) {
        loop {
            self.advance();
            if self.tok.kind == TokenKind::Cr || self.tok.kind == TokenKind::Eof {
                self.advance();
                return;
            }
        }
    }

    fn fail(&mut self, err: ParseError) -> ParseError {
        self.synch();
        err
    }

    fn lexical(&mut self) -> ParseError {
        let err = ParseError::Lexical {
            pos: self.tok.pos.clone(),
            message: self.tok.text.clone(),
        };
        self.fail(err)
    }

    fn expected(&mut self, expected: TokenKind) -> ParseError {
        if self.tok.kind == TokenKind::Error {
            return self.lexical();
        }
        let err = ParseError::Expected {
            pos: self.tok.pos.clone(),
            expected,
            found: self.tok.kind,
        };
        self.fail(err)
    }

    fn accept(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.tok.kind != kind {
            return Err(self.expected(kind));
        }
        let tok = self.tok.clone();
        self.advance();
        Ok(tok)
    }

    fn accept_number(&mut self) -> Result<Number, ParseError> {
        let tok = self.accept(TokenKind::Number)?;
        match tok.text.parse::<i64>() {
            Ok(value) => Ok(Number {
                pos: tok.pos,
                value,
            }),
            Err(source) => {
                let err = ParseError::InvalidNumber {
                    pos: tok.pos,
                    text: tok.text,
                    source,
                };
                Err(self.fail(err))
            }
        }
    }

    fn accept_variable(&mut self) -> Result<Variable, ParseError> {
        let tok = self.accept(TokenKind::Variable)?;
        Ok(Variable {
            pos: tok.pos,
            name: tok.text,
        })
    }

    fn accept_cr(&mut self) -> Result<(), ParseError> {
        if self.tok.kind == TokenKind::Cr {
            self.advance();
            return Ok(());
        }
        if self.tok.kind != TokenKind::Eof {
            return Err(self.expected(TokenKind::Cr));
        }
        Ok(())
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        self.skip_cr();

        let label = Label::from(self.accept_number()?);
        let mut cr = true;

        let s = match self.tok.kind {
            TokenKind::Print => Stmt::Print(self.print_stmt(label)?),
            TokenKind::If => {
                // IF leaves terminator handling to its nested statement.
                cr = false;
                Stmt::If(self.if_stmt(label)?)
            }
            TokenKind::Goto => Stmt::Goto(self.goto_stmt(label)?),
            TokenKind::Gosub => Stmt::Gosub(self.gosub_stmt(label)?),
            TokenKind::Return => Stmt::Return(self.return_stmt(label)?),
            TokenKind::For => Stmt::For(self.for_stmt(label)?),
            TokenKind::Peek => Stmt::Peek(self.peek_stmt(label)?),
            TokenKind::Poke => Stmt::Poke(self.poke_stmt(label)?),
            TokenKind::Next => Stmt::Next(self.next_stmt(label)?),
            TokenKind::End => Stmt::End(self.end_stmt(label)?),
            TokenKind::Let | TokenKind::Variable => Stmt::Let(self.let_stmt(label)?),
            TokenKind::Error => return Err(self.lexical()),
            _ => {
                let err = ParseError::UnsupportedStatement {
                    pos: self.tok.pos.clone(),
                    text: self.tok.text.clone(),
                };
                return Err(self.fail(err));
            }
        };
        if cr {
            self.accept_cr()?;
        }

        Ok(s)
    }

    fn print_stmt(&mut self, label: Label) -> Result<PrintStmt, ParseError> {
        let keyword = self.accept(TokenKind::Print)?;

        let mut args = Vec::new();
        loop {
            match self.tok.kind {
                TokenKind::String => {
                    let tok = self.tok.clone();
                    self.advance();
                    match unquote(&tok.text) {
                        Ok(value) => args.push(Expr::String {
                            pos: tok.pos,
                            value,
                        }),
                        Err(message) => {
                            let err = ParseError::InvalidString {
                                pos: tok.pos,
                                text: tok.text,
                                message,
                            };
                            return Err(self.fail(err));
                        }
                    }
                }
                TokenKind::Comma | TokenKind::Semicolon => {
                    args.push(Expr::Punct {
                        pos: self.tok.pos.clone(),
                        kind: self.tok.kind,
                    });
                    self.advance();
                }
                TokenKind::Variable | TokenKind::Number => args.push(self.expr()?),
                TokenKind::Cr | TokenKind::Eof => break,
                TokenKind::Error => return Err(self.lexical()),
                _ => {
                    let err = ParseError::UnknownPrintArgument {
                        pos: self.tok.pos.clone(),
                        text: self.tok.text.clone(),
                    };
                    return Err(self.fail(err));
                }
            }
        }

        Ok(PrintStmt {
            label,
            keyword,
            args,
        })
    }

    fn if_stmt(&mut self, label: Label) -> Result<IfStmt, ParseError> {
        let keyword = self.accept(TokenKind::If)?;
        let cond = self.relation()?;
        let then = self.accept(TokenKind::Then)?;
        self.accept_cr()?;
        let body = Box::new(self.stmt()?);

        // Speculatively read the next line's label to see whether a
        // dangling ELSE follows; if not, push the consumed tokens back
        // so the next `line` call re-parses that line on its own.
        let mut else_branch = None;
        if !matches!(self.tok.kind, TokenKind::Eof | TokenKind::Cr) {
            let saved = self.tok.clone();
            let num = self.accept_number()?;
            if self.tok.kind == TokenKind::Else {
                let else_keyword = self.accept(TokenKind::Else)?;
                self.accept_cr()?;
                let body = Box::new(self.stmt()?);
                else_branch = Some(ElseStmt {
                    label: Label::from(num),
                    keyword: else_keyword,
                    body,
                });
            } else {
                self.pushback = Some(self.tok.clone());
                self.tok = saved;
            }
        }

        Ok(IfStmt {
            label,
            keyword,
            cond,
            then,
            body,
            else_branch,
        })
    }

    fn goto_stmt(&mut self, label: Label) -> Result<GotoStmt, ParseError> {
        let keyword = self.accept(TokenKind::Goto)?;
        let location = self.accept_number()?;
        Ok(GotoStmt {
            label,
            keyword,
            location,
        })
    }

    fn gosub_stmt(&mut self, label: Label) -> Result<GosubStmt, ParseError> {
        let keyword = self.accept(TokenKind::Gosub)?;
        let location = self.accept_number()?;
        Ok(GosubStmt {
            label,
            keyword,
            location,
        })
    }

    fn return_stmt(&mut self, label: Label) -> Result<ReturnStmt, ParseError> {
        let keyword = self.accept(TokenKind::Return)?;
        Ok(ReturnStmt { label, keyword })
    }

    fn for_stmt(&mut self, label: Label) -> Result<ForStmt, ParseError> {
        let keyword = self.accept(TokenKind::For)?;
        let var = self.accept_variable()?;
        self.accept(TokenKind::Eq)?;
        let start = self.expr()?;
        let to = self.accept(TokenKind::To)?;
        let end = self.expr()?;
        Ok(ForStmt {
            label,
            keyword,
            var,
            start,
            to,
            end,
        })
    }

    fn peek_stmt(&mut self, label: Label) -> Result<PeekStmt, ParseError> {
        let keyword = self.accept(TokenKind::Peek)?;
        let addr = self.expr()?;
        self.accept(TokenKind::Comma)?;
        let var = self.accept_variable()?;
        Ok(PeekStmt {
            label,
            keyword,
            addr,
            var,
        })
    }

    fn poke_stmt(&mut self, label: Label) -> Result<PokeStmt, ParseError> {
        let keyword = self.accept(TokenKind::Poke)?;
        let addr = self.expr()?;
        self.accept(TokenKind::Comma)?;
        let value = self.expr()?;
        Ok(PokeStmt {
            label,
            keyword,
            addr,
            value,
        })
    }

    fn next_stmt(&mut self, label: Label) -> Result<NextStmt, ParseError> {
        let keyword = self.accept(TokenKind::Next)?;
        let var = self.accept_variable()?;
        Ok(NextStmt {
            label,
            keyword,
            var,
        })
    }

    fn end_stmt(&mut self, label: Label) -> Result<EndStmt, ParseError> {
        let keyword = self.accept(TokenKind::End)?;
        Ok(EndStmt { label, keyword })
    }

    fn let_stmt(&mut self, label: Label) -> Result<LetStmt, ParseError> {
        let keyword = if self.tok.kind == TokenKind::Let {
            Some(self.accept(TokenKind::Let)?)
        } else {
            None
        };
        let var = self.accept_variable()?;
        self.accept(TokenKind::Eq)?;
        let value = self.expr()?;
        Ok(LetStmt {
            label,
            keyword,
            var,
            value,
        })
    }

    fn relation(&mut self) -> Result<Expr, ParseError> {
        let mut x = self.expr()?;
        loop {
            match self.tok.kind {
                TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::Leq
                | TokenKind::Geq
                | TokenKind::Neq
                | TokenKind::Eq => {
                    let op = self.tok.clone();
                    self.advance();
                    let y = self.expr()?;
                    x = Expr::Binary {
                        op,
                        x: Box::new(x),
                        y: Box::new(y),
                    };
                }
                _ => return Ok(x),
            }
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut x = self.term()?;
        loop {
            match self.tok.kind {
                TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::Xor => {
                    let op = self.tok.clone();
                    self.advance();
                    let y = self.term()?;
                    x = Expr::Binary {
                        op,
                        x: Box::new(x),
                        y: Box::new(y),
                    };
                }
                _ => return Ok(x),
            }
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut x = self.factor()?;
        loop {
            match self.tok.kind {
                TokenKind::Star | TokenKind::Slash | TokenKind::Percent => {
                    let op = self.tok.clone();
                    self.advance();
                    let y = self.factor()?;
                    x = Expr::Binary {
                        op,
                        x: Box::new(x),
                        y: Box::new(y),
                    };
                }
                _ => return Ok(x),
            }
        }
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        match self.tok.kind {
            TokenKind::Number => Ok(Expr::Number(self.accept_number()?)),
            TokenKind::Lparen => {
                let lparen = self.accept(TokenKind::Lparen)?;
                let x = self.expr()?;
                let rparen = self.accept(TokenKind::Rparen)?;
                Ok(Expr::Paren {
                    lparen,
                    x: Box::new(x),
                    rparen,
                })
            }
            _ => Ok(Expr::Variable(self.accept_variable()?)),
        }
    }
}

// The tokenizer hands string literals over with their quotes intact;
// escape decoding happens here so failures carry a parse position.
fn unquote(text: &str) -> Result<String, String> {
    let inner = text
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| "not a quoted string".to_string())?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some(ch) => return Err(format!("unknown escape \\{}", ch)),
            None => return Err("trailing backslash".to_string()),
        }
    }
    Ok(out)
}
