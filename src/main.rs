use std::io::BufReader;

use clap::{Args, Parser, Subcommand};

use ubasic::interpreter::{self, Stdio};

#[derive(Debug, Parser)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Repl)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one or more program files to completion.
    Run(RunArgs),
    /// Start an interactive session (the default).
    Repl,
}

#[derive(Debug, Args)]
struct RunArgs {
    files: Vec<String>,
}

fn main() {
    let args = Cli::parse();

    let ok = match args.command() {
        Command::Repl => repl_command(),
        Command::Run(args) => run_command(args),
    };
    if !ok {
        std::process::exit(1);
    }
}

fn repl_command() -> bool {
    let stdin = std::io::stdin();
    match interpreter::repl(Stdio::new(), BufReader::new(stdin.lock())) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("ubasic: {e}");
            false
        }
    }
}

fn run_command(args: &RunArgs) -> bool {
    let mut ok = true;
    for file in &args.files {
        if let Err(e) = run_file(file) {
            eprintln!("ubasic: {e}");
            ok = false;
        }
    }
    ok
}

fn run_file(file: &str) -> Result<(), interpreter::Error> {
    let source = std::fs::read_to_string(file)?;
    interpreter::run(Stdio::new(), file, &source)
}
