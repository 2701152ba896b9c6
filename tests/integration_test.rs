use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

use rustc_hash::FxHashMap;
use ubasic::interpreter::{self, Error, Mach};

#[derive(Debug, Default, Clone)]
struct SharedMach {
    out: Rc<RefCell<Vec<u8>>>,
    values: Rc<RefCell<FxHashMap<i64, i64>>>,
}

impl Write for SharedMach {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Mach for SharedMach {
    fn peek(&mut self, addr: i64) -> i64 {
        self.values.borrow().get(&addr).copied().unwrap_or(0)
    }

    fn poke(&mut self, addr: i64, value: i64) {
        self.values.borrow_mut().insert(addr, value);
    }
}

fn run_program(source: &str) -> Result<String, Error> {
    let mach = SharedMach::default();
    let out = mach.out.clone();
    interpreter::run(mach, "test", source)?;
    let out = out.borrow().clone();
    Ok(String::from_utf8(out).expect("output should be valid UTF-8"))
}

/// Feeds `input` to an interactive session and returns the full
/// transcript (prompts and program output interleaved).
fn run_repl(input: &str) -> String {
    let mach = SharedMach::default();
    let out = mach.out.clone();
    interpreter::repl(mach, input.as_bytes()).expect("session should survive test input");
    let out = out.borrow().clone();
    String::from_utf8(out).expect("output should be valid UTF-8")
}

#[test]
fn test_for_loop_prints_each_value() {
    let source = r#"
    10 FOR I = 1 TO 3
    20 PRINT I
    30 NEXT I
    "#;
    assert_eq!(run_program(source).unwrap(), "123");
}

#[test]
fn test_gosub_returns_and_end_halts() {
    let source = r#"
    10 GOSUB 30
    20 END
    30 PRINT "X"
    40 RETURN
    "#;
    assert_eq!(run_program(source).unwrap(), "X");
}

#[test]
fn test_subroutine_before_loop() {
    let source = r#"
    10 GOSUB 100
    20 FOR I = 1 TO 3
    30 PRINT I; " "
    40 NEXT I
    50 END
    100 PRINT "start "
    110 RETURN
    "#;
    assert_eq!(run_program(source).unwrap(), "start 1 2 3 ");
}

#[test]
fn test_unbound_variable_error_names_line_and_variable() {
    let err = run_program("10 PRINT A").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("line 10"), "{msg}");
    assert!(msg.contains("unknown variable name A"), "{msg}");
}

#[test]
fn test_unterminated_string_is_a_parse_error() {
    let err = run_program("10 PRINT \"abc").unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
    assert!(err.to_string().contains("unterminated string"));
}

#[test]
fn test_else_attaches_to_preceding_if() {
    let source = r#"
    10 IF 0 THEN
    20 PRINT "a"
    30 ELSE
    40 PRINT "b"
    "#;
    assert_eq!(run_program(source).unwrap(), "b");
}

#[test]
fn test_non_else_line_after_if_body_stays_a_program_line() {
    let source = r#"
    10 IF 0 THEN
    20 PRINT "a"
    40 PRINT "c"
    "#;
    assert_eq!(run_program(source).unwrap(), "c");

    let source = r#"
    10 IF 1 THEN
    20 PRINT "a"
    40 PRINT "c"
    "#;
    assert_eq!(run_program(source).unwrap(), "ac");
}

#[test]
fn test_string_escapes_reach_output() {
    let source = r#"10 PRINT "a\tb\nc""#;
    assert_eq!(run_program(source).unwrap(), "a\tb\nc");
}

#[test]
fn test_poke_then_peek_through_the_mach() {
    let source = r#"
    10 POKE 7, 99
    20 PEEK 7, v
    30 PRINT v
    "#;
    assert_eq!(run_program(source).unwrap(), "99");
}

#[test]
fn test_trailing_comments_are_ignored() {
    let source = r#"
    10 x = 1 REM nothing to see here
    20 PRINT "ok"; x
    "#;
    assert_eq!(run_program(source).unwrap(), "ok1");
}

#[test]
fn test_repl_replaces_line_with_same_label() {
    // Both entries run immediately; the listing keeps only the newer
    // line 10.
    let transcript = run_repl("10 PRINT \"A\"\n10 PRINT \"B\"\np\nq\n");
    assert_eq!(transcript, "> A> B> 10 PRINT \"B\"\n> ");
}

#[test]
fn test_repl_state_persists_between_entries() {
    let transcript = run_repl("10 x = 2\n20 PRINT x * 3\nq\n");
    assert_eq!(transcript, "> > 6> ");
}

#[test]
fn test_repl_defers_end_and_runs_on_goto() {
    let input = "10 x = 1\n20 PRINT x\n30 END\n40 GOTO 10\n";
    // Line 20 prints once when entered, then the GOTO replays the
    // whole program; end of input prints a final newline.
    assert_eq!(run_repl(input), "> > 1> > 1> \n");
}

#[test]
fn test_repl_lists_stored_program() {
    let input = "10 LET a = 1\n20 PRINT a; \",\"\n30 END\np\nq\n";
    let transcript = run_repl(input);
    assert!(
        transcript.contains("10 LET a = 1\n20 PRINT a; \",\"\n30 END\n"),
        "{transcript}"
    );
}

#[test]
fn test_repl_survives_a_parse_error() {
    // The bad line is reported (to stderr) and dropped; the session
    // keeps accepting input.
    let transcript = run_repl("10 GOTO )\n10 PRINT \"ok\"\np\nq\n");
    assert_eq!(transcript, "> > ok> 10 PRINT \"ok\"\n> ");
}
