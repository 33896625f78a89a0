use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use quill::vm::{InterpretResult, VM};

#[derive(Parser)]
#[command(name = "quill", version, about = "Bytecode VM for the quill scripting language")]
struct Cli {
    /// Script to run; starts a REPL when omitted.
    script: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    match cli.script {
        Some(path) => run_file(&path),
        None => repl(),
    }
}

fn run_file(path: &Path) {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read \"{}\": {}", path.display(), error);
            process::exit(74);
        }
    };

    let mut vm = VM::new();
    match vm.interpret(&source) {
        InterpretResult::InterpretOk => {}
        InterpretResult::InterpretCompileError => process::exit(65),
        InterpretResult::InterpretRuntimeError => process::exit(70),
    }
}

fn repl() {
    let mut vm = VM::new();
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().expect("Failed to flush stdout");

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {
                vm.interpret(&line);
            }
            Err(error) => {
                eprintln!("Could not read input: {}", error);
                break;
            }
        }
    }
}
