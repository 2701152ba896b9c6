use std::io::{self, BufRead, Write};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::{
    Expr, ForStmt, GosubStmt, GotoStmt, IfStmt, LetStmt, NextStmt, PeekStmt, PokeStmt, PrintStmt,
    ReturnStmt, Stmt,
};
use crate::parser::{ParseError, Parser};
use crate::span::Position;
use crate::tokenizer::{TokenKind, Tokenizer};

/// The memory and console capability a program runs against: PRINT
/// output goes through `io::Write`, PEEK/POKE through `peek`/`poke`.
pub trait Mach: io::Write {
    fn peek(&mut self, addr: i64) -> i64;
    fn poke(&mut self, addr: i64, value: i64);
}

/// Reference mach: output to stdout, peek/poke backed by an
/// address-to-value map that defaults unwritten addresses to zero.
#[derive(Debug, Default)]
pub struct Stdio {
    values: FxHashMap<i64, i64>,
}

impl Stdio {
    pub fn new() -> Self {
        Self::default()
    }
}

impl io::Write for Stdio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

impl Mach for Stdio {
    fn peek(&mut self, addr: i64) -> i64 {
        self.values.get(&addr).copied().unwrap_or(0)
    }

    fn poke(&mut self, addr: i64, value: i64) {
        self.values.insert(addr, value);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("line {label}: {kind}")]
pub struct ExecutionError {
    pub label: i64,
    pub kind: ExecutionErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionErrorKind {
    #[error("goto: line {0} does not exist")]
    UndefinedGotoLine(i64),
    #[error("gosub: line {0} does not exist")]
    UndefinedGosubLine(i64),
    #[error("non-matching return")]
    ReturnWithoutGosub,
    #[error("non-matching next")]
    NextWithoutFor,
    #[error("{pos}: unknown variable name {name}")]
    UnknownVariable { pos: Position, name: String },
    #[error("{pos}: division by zero")]
    DivisionByZero { pos: Position },
    #[error("{pos}: unknown binary operator {op}")]
    UnknownOperator { pos: Position, op: TokenKind },
    #[error("{pos}: unexpected operand")]
    UnexpectedOperand { pos: Position },
    #[error("unknown print argument")]
    UnknownPrintArgument,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// One active FOR loop: where NEXT resumes, which variable it steps,
/// and the inclusive end bound.
#[derive(Debug, Clone)]
struct ForFrame {
    block: usize,
    var: String,
    to: i64,
}

pub struct Interpreter<M> {
    mach: M,
    halt: bool,
    pc: usize,

    vars: FxHashMap<String, i64>,
    subs: Vec<usize>,
    fors: Vec<ForFrame>,
    locs: FxHashMap<i64, usize>,
    lines: Vec<Rc<Stmt>>,
}

impl<M: Mach> Interpreter<M> {
    pub fn new(mach: M) -> Self {
        Interpreter {
            mach,
            halt: false,
            pc: 0,
            vars: FxHashMap::default(),
            subs: Vec::new(),
            fors: Vec::new(),
            locs: FxHashMap::default(),
            lines: Vec::new(),
        }
    }

    pub fn mach(&self) -> &M {
        &self.mach
    }

    pub fn mach_mut(&mut self) -> &mut M {
        &mut self.mach
    }

    pub fn halted(&self) -> bool {
        self.halt
    }

    /// Clears all run state. The stored program is kept.
    pub fn reset(&mut self) {
        self.halt = false;
        self.pc = 0;
        self.vars.clear();
        self.subs.clear();
        self.fors.clear();
    }

    /// Adds a statement to the program. A statement whose label is
    /// already taken replaces the old one, the label map is rebuilt,
    /// and the counter is left pointing at the new line.
    pub fn add_line(&mut self, stmt: Stmt) {
        if let Some(&n) = self.locs.get(&stmt.line()) {
            self.lines.remove(n);
        }
        self.lines.push(Rc::new(stmt));
        self.rebuild_locs();
        self.pc = self.lines.len() - 1;
    }

    fn rebuild_locs(&mut self) {
        self.locs.clear();
        for (i, stmt) in self.lines.iter().enumerate() {
            self.locs.insert(stmt.line(), i);
        }
    }

    /// Executes exactly one statement, advancing or redirecting the
    /// counter. Sets the halt flag when the counter passes the end.
    pub fn step(&mut self) -> Result<(), ExecutionError> {
        if self.pc >= self.lines.len() {
            self.halt = true;
        }
        if self.halt {
            return Ok(());
        }

        let stmt = Rc::clone(&self.lines[self.pc]);
        self.pc += 1;
        self.eval(&stmt)
    }

    /// Steps until the program halts, surfacing the first fatal error.
    pub fn run(&mut self) -> Result<(), ExecutionError> {
        while !self.halt {
            self.step()?;
        }
        Ok(())
    }

    pub fn eval(&mut self, stmt: &Stmt) -> Result<(), ExecutionError> {
        self.exec(stmt).map_err(|kind| ExecutionError {
            label: stmt.line(),
            kind,
        })
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<(), ExecutionErrorKind> {
        match stmt {
            Stmt::For(s) => self.exec_for(s),
            Stmt::Next(s) => self.exec_next(s),
            Stmt::If(s) => self.exec_if(s),
            Stmt::Goto(s) => self.exec_goto(s),
            Stmt::Gosub(s) => self.exec_gosub(s),
            Stmt::Return(s) => self.exec_return(s),
            Stmt::Let(s) => self.exec_let(s),
            Stmt::End(_) => {
                self.halt = true;
                Ok(())
            }
            Stmt::Peek(s) => self.exec_peek(s),
            Stmt::Poke(s) => self.exec_poke(s),
            Stmt::Print(s) => self.exec_print(s),
        }
    }

    fn exec_for(&mut self, s: &ForStmt) -> Result<(), ExecutionErrorKind> {
        let start = self.expr(&s.start)?;
        let to = self.expr(&s.end)?;
        self.vars.insert(s.var.name.clone(), start);
        // The frame records the already-advanced counter, so NEXT
        // resumes at the statement after this FOR.
        self.fors.push(ForFrame {
            block: self.pc,
            var: s.var.name.clone(),
            to,
        });
        Ok(())
    }

    fn exec_next(&mut self, s: &NextStmt) -> Result<(), ExecutionErrorKind> {
        let Some(frame) = self.fors.last().cloned() else {
            return Err(ExecutionErrorKind::NextWithoutFor);
        };
        // A mismatched variable name skips the increment, nothing more.
        if frame.var == s.var.name {
            let counter = self.vars.entry(frame.var.clone()).or_insert(0);
            *counter = counter.wrapping_add(1);
        }
        let value = self.vars.get(&frame.var).copied().unwrap_or(0);
        if value <= frame.to {
            self.pc = frame.block;
        } else {
            self.fors.pop();
        }
        Ok(())
    }

    fn exec_if(&mut self, s: &IfStmt) -> Result<(), ExecutionErrorKind> {
        if self.expr(&s.cond)? != 0 {
            self.exec(&s.body)
        } else if let Some(else_branch) = &s.else_branch {
            self.exec(&else_branch.body)
        } else {
            Ok(())
        }
    }

    fn exec_goto(&mut self, s: &GotoStmt) -> Result<(), ExecutionErrorKind> {
        match self.locs.get(&s.location.value) {
            Some(&loc) => {
                self.pc = loc;
                Ok(())
            }
            None => Err(ExecutionErrorKind::UndefinedGotoLine(s.location.value)),
        }
    }

    fn exec_gosub(&mut self, s: &GosubStmt) -> Result<(), ExecutionErrorKind> {
        // The return address is pushed before the target is resolved.
        self.subs.push(self.pc);
        match self.locs.get(&s.location.value) {
            Some(&loc) => {
                self.pc = loc;
                Ok(())
            }
            None => Err(ExecutionErrorKind::UndefinedGosubLine(s.location.value)),
        }
    }

    fn exec_return(&mut self, _s: &ReturnStmt) -> Result<(), ExecutionErrorKind> {
        match self.subs.pop() {
            Some(pc) => {
                self.pc = pc;
                Ok(())
            }
            None => Err(ExecutionErrorKind::ReturnWithoutGosub),
        }
    }

    fn exec_let(&mut self, s: &LetStmt) -> Result<(), ExecutionErrorKind> {
        let value = self.expr(&s.value)?;
        self.vars.insert(s.var.name.clone(), value);
        Ok(())
    }

    fn exec_peek(&mut self, s: &PeekStmt) -> Result<(), ExecutionErrorKind> {
        let addr = self.expr(&s.addr)?;
        let value = self.mach.peek(addr);
        self.vars.insert(s.var.name.clone(), value);
        Ok(())
    }

    fn exec_poke(&mut self, s: &PokeStmt) -> Result<(), ExecutionErrorKind> {
        let addr = self.expr(&s.addr)?;
        let value = self.expr(&s.value)?;
        self.mach.poke(addr, value);
        Ok(())
    }

    // PRINT never emits a line terminator of its own; `,` prints a
    // single space, `;` nothing.
    fn exec_print(&mut self, s: &PrintStmt) -> Result<(), ExecutionErrorKind> {
        for arg in &s.args {
            match arg {
                Expr::String { value, .. } => write!(self.mach, "{}", value)?,
                Expr::Punct {
                    kind: TokenKind::Comma,
                    ..
                } => write!(self.mach, " ")?,
                Expr::Punct {
                    kind: TokenKind::Semicolon,
                    ..
                } => {}
                Expr::Punct { .. } => return Err(ExecutionErrorKind::UnknownPrintArgument),
                expr => {
                    let value = self.expr(expr)?;
                    write!(self.mach, "{}", value)?;
                }
            }
        }
        Ok(())
    }

    fn expr(&mut self, e: &Expr) -> Result<i64, ExecutionErrorKind> {
        match e {
            Expr::Number(n) => Ok(n.value),
            Expr::Variable(v) => {
                self.vars
                    .get(&v.name)
                    .copied()
                    .ok_or_else(|| ExecutionErrorKind::UnknownVariable {
                        pos: v.pos.clone(),
                        name: v.name.clone(),
                    })
            }
            Expr::Paren { x, .. } => self.expr(x),
            Expr::Binary { op, x, y } => {
                let l = self.expr(x)?;
                let r = self.expr(y)?;
                // Arithmetic wraps at 64 bits; comparisons yield 1/0.
                match op.kind {
                    TokenKind::Plus => Ok(l.wrapping_add(r)),
                    TokenKind::Minus => Ok(l.wrapping_sub(r)),
                    TokenKind::Star => Ok(l.wrapping_mul(r)),
                    TokenKind::Slash if r == 0 => Err(ExecutionErrorKind::DivisionByZero {
                        pos: op.pos.clone(),
                    }),
                    TokenKind::Slash => Ok(l.wrapping_div(r)),
                    TokenKind::Percent if r == 0 => Err(ExecutionErrorKind::DivisionByZero {
                        pos: op.pos.clone(),
                    }),
                    TokenKind::Percent => Ok(l.wrapping_rem(r)),
                    TokenKind::And => Ok(l & r),
                    TokenKind::Or => Ok(l | r),
                    TokenKind::Xor => Ok(l ^ r),
                    TokenKind::Lt => Ok((l < r) as i64),
                    TokenKind::Gt => Ok((l > r) as i64),
                    TokenKind::Leq => Ok((l <= r) as i64),
                    TokenKind::Geq => Ok((l >= r) as i64),
                    TokenKind::Neq => Ok((l != r) as i64),
                    TokenKind::Eq => Ok((l == r) as i64),
                    kind => Err(ExecutionErrorKind::UnknownOperator {
                        pos: op.pos.clone(),
                        op: kind,
                    }),
                }
            }
            Expr::String { pos, .. } | Expr::Punct { pos, .. } => {
                Err(ExecutionErrorKind::UnexpectedOperand { pos: pos.clone() })
            }
        }
    }
}

/// Batch entry: parses every line of `src` (failing fast on the first
/// parse error), then executes from a fresh state until the program
/// halts or a fatal error surfaces.
pub fn run<M: Mach>(mach: M, name: &str, src: &str) -> Result<(), Error> {
    let mut parser = Parser::new(Tokenizer::new(name, src));
    let mut interpreter = Interpreter::new(mach);

    while let Some(stmt) = parser.line()? {
        interpreter.lines.push(Rc::new(stmt));
    }
    interpreter.rebuild_locs();

    interpreter.reset();
    interpreter.run()?;
    Ok(())
}

/// Interactive entry: reads statements one line at a time, editing a
/// persistent program. Errors on an entered line are reported and the
/// session continues; end of the input stream ends the session.
pub fn repl<M: Mach, R: BufRead>(mach: M, input: R) -> Result<(), Error> {
    let mut interpreter = Interpreter::new(mach);
    let mut lines = input.lines();

    loop {
        write!(interpreter.mach, "> ")?;
        interpreter.mach.flush()?;

        let Some(line) = lines.next() else {
            writeln!(interpreter.mach)?;
            break;
        };
        let line = line?;
        let line = line.trim();

        match line {
            "p" => {
                for stmt in &interpreter.lines {
                    writeln!(interpreter.mach, "{}", stmt)?;
                }
                continue;
            }
            "q" => break,
            _ => {}
        }

        let mut parser = Parser::new(Tokenizer::new("", line));
        let stmt = match parser.line() {
            Ok(Some(stmt)) => stmt,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("{}", err);
                continue;
            }
        };

        let jumps = matches!(stmt, Stmt::Goto(_) | Stmt::Gosub(_));
        let deferred = matches!(stmt, Stmt::Next(_) | Stmt::End(_));
        interpreter.add_line(stmt);

        if jumps {
            // A control transfer entered directly runs the program
            // from the line just added.
            if let Err(err) = repl_run(&mut interpreter) {
                eprintln!("{}", err);
            }
        } else if !deferred {
            if let Some(stmt) = interpreter.lines.last().map(Rc::clone) {
                if let Err(err) = interpreter.eval(&stmt) {
                    eprintln!("{}", err);
                }
            }
        }
    }

    Ok(())
}

fn repl_run<M: Mach>(interpreter: &mut Interpreter<M>) -> Result<(), ExecutionError> {
    interpreter.pc = interpreter.lines.len().saturating_sub(1);
    interpreter.halt = false;
    while !interpreter.halt {
        interpreter.step()?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Default, Clone)]
    struct TestMach {
        out: Rc<RefCell<Vec<u8>>>,
        values: Rc<RefCell<FxHashMap<i64, i64>>>,
    }

    impl io::Write for TestMach {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.out.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Mach for TestMach {
        fn peek(&mut self, addr: i64) -> i64 {
            self.values.borrow().get(&addr).copied().unwrap_or(0)
        }

        fn poke(&mut self, addr: i64, value: i64) {
            self.values.borrow_mut().insert(addr, value);
        }
    }

    fn run_source(src: &str) -> Result<String, Error> {
        let mach = TestMach::default();
        let out = mach.out.clone();
        run(mach, "test", src)?;
        let out = out.borrow().clone();
        Ok(String::from_utf8(out).expect("output should be UTF-8"))
    }

    fn kind_of(err: Error) -> (i64, ExecutionErrorKind) {
        match err {
            Error::Execution(ExecutionError { label, kind }) => (label, kind),
            other => panic!("expected execution error, got {other}"),
        }
    }

    #[test]
    fn test_print_separators() {
        // Comma prints one space, semicolon nothing, no line terminator.
        assert_eq!(run_source("10 PRINT 1, 2; 3").unwrap(), "1 23");
    }

    #[test]
    fn test_truncating_division() {
        assert_eq!(
            run_source("10 x = 0 - 7\n20 PRINT x / 2; x % 2").unwrap(),
            "-3-1"
        );
    }

    #[test]
    fn test_bitwise_operators() {
        assert_eq!(run_source("10 PRINT 6 & 3, 6 | 3, 6 ^ 3").unwrap(), "2 7 5");
    }

    #[test]
    fn test_comparison_yields_one() {
        let src = "10 IF 1 < 2 = 1 THEN\n20 PRINT \"T\"";
        assert_eq!(run_source(src).unwrap(), "T");
    }

    #[test]
    fn test_wrapping_arithmetic() {
        assert_eq!(
            run_source("10 x = 9223372036854775807\n20 PRINT x + 1").unwrap(),
            "-9223372036854775808"
        );
    }

    #[test]
    fn test_division_by_zero() {
        let (label, kind) = kind_of(run_source("10 PRINT 1 / 0").unwrap_err());
        assert_eq!(label, 10);
        assert!(matches!(kind, ExecutionErrorKind::DivisionByZero { .. }));
    }

    #[test]
    fn test_modulo_by_zero() {
        let (_, kind) = kind_of(run_source("10 PRINT 1 % 0").unwrap_err());
        assert!(matches!(kind, ExecutionErrorKind::DivisionByZero { .. }));
    }

    #[test]
    fn test_unknown_variable() {
        let (label, kind) = kind_of(run_source("10 PRINT A").unwrap_err());
        assert_eq!(label, 10);
        assert!(matches!(
            kind,
            ExecutionErrorKind::UnknownVariable { name, .. } if name == "A"
        ));
    }

    #[test]
    fn test_goto_undefined_line() {
        let (label, kind) = kind_of(run_source("10 GOTO 99").unwrap_err());
        assert_eq!(label, 10);
        assert!(matches!(kind, ExecutionErrorKind::UndefinedGotoLine(99)));
    }

    #[test]
    fn test_return_without_gosub() {
        let (_, kind) = kind_of(run_source("10 RETURN").unwrap_err());
        assert!(matches!(kind, ExecutionErrorKind::ReturnWithoutGosub));
    }

    #[test]
    fn test_next_without_for() {
        let (_, kind) = kind_of(run_source("10 NEXT I").unwrap_err());
        assert!(matches!(kind, ExecutionErrorKind::NextWithoutFor));
    }

    #[test]
    fn test_end_halts() {
        assert_eq!(
            run_source("10 PRINT \"a\"\n20 END\n30 PRINT \"b\"").unwrap(),
            "a"
        );
    }

    #[test]
    fn test_if_else_branches() {
        let src = "10 IF 0 THEN\n20 PRINT \"t\"\n30 ELSE\n40 PRINT \"f\"\n50 END";
        assert_eq!(run_source(src).unwrap(), "f");
        let src = "10 IF 1 THEN\n20 PRINT \"t\"\n30 ELSE\n40 PRINT \"f\"\n50 END";
        assert_eq!(run_source(src).unwrap(), "t");
    }

    #[test]
    fn test_if_body_is_not_a_program_line() {
        // The body belongs to the IF; execution continues at line 30.
        let src = "10 IF 1 THEN\n20 PRINT \"t\"\n30 PRINT \"u\"";
        assert_eq!(run_source(src).unwrap(), "tu");
        let src = "10 IF 0 THEN\n20 PRINT \"t\"\n30 PRINT \"u\"";
        assert_eq!(run_source(src).unwrap(), "u");
    }

    #[test]
    fn test_peek_poke() {
        let src = "10 POKE 100, 42\n20 PEEK 100, x\n30 PEEK 200, y\n40 PRINT x, y";
        assert_eq!(run_source(src).unwrap(), "42 0");
    }

    #[test]
    fn test_duplicate_label_resolves_to_latest() {
        let src = "5 GOTO 10\n10 PRINT \"a\"\n10 PRINT \"b\"\n20 END";
        assert_eq!(run_source(src).unwrap(), "b");
    }

    #[test]
    fn test_mismatched_next_variable_skips_increment() {
        // NEXT J leaves I untouched; the loop still exits because I
        // already sits past the bound.
        let src = "10 FOR I = 5 TO 3\n20 NEXT J\n30 PRINT I";
        assert_eq!(run_source(src).unwrap(), "5");
    }

    #[test]
    fn test_nested_for_loops() {
        let src = "\
10 FOR I = 1 TO 2
20 FOR J = 1 TO 2
30 PRINT I; J; \" \"
40 NEXT J
50 NEXT I";
        assert_eq!(run_source(src).unwrap(), "11 12 21 22 ");
    }

    #[test]
    fn test_gosub_return_resumes_after_call() {
        let src = "10 GOSUB 40\n20 PRINT \"b\"\n30 END\n40 PRINT \"a\"\n50 RETURN";
        assert_eq!(run_source(src).unwrap(), "ab");
    }

    #[test]
    fn test_empty_program_halts() {
        assert_eq!(run_source("").unwrap(), "");
    }
}
