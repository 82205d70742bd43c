mod reporter;

use reporter::CliReporter;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::process::exit;
use vm::{InterpretResult, Vm};

const HELP: &str = "usage:
  qatam-byte [path]

With no arguments, starts an interactive REPL. With a path, compiles and
runs that file, then exits.
";

fn main() {
    let args: Vec<String> = std::env::args().collect();
    match args.len() {
        1 => run_repl(),
        2 => run_file(PathBuf::from(&args[1])),
        _ => {
            eprintln!("{HELP}");
            exit(exitcode::USAGE);
        }
    }
}

fn run_repl() {
    let mut reporter = CliReporter::new();
    let mut stdout = std::io::stdout();
    let mut vm = Vm::new(&mut reporter, &mut stdout);
    let mut editor = DefaultEditor::new().expect("failed to initialize line editor");

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                vm.interpret(&line);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{err}");
                break;
            }
        }
    }
}

fn run_file(path: PathBuf) {
    let source = match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file '{}': {err}", path.display());
            exit(exitcode::IOERR);
        }
    };

    let mut reporter = CliReporter::new();
    let mut stdout = std::io::stdout();
    let result = {
        let mut vm = Vm::new(&mut reporter, &mut stdout);
        vm.interpret(&source)
    };

    match result {
        InterpretResult::Ok => exit(exitcode::OK),
        InterpretResult::CompileError => exit(exitcode::DATAERR),
        InterpretResult::RuntimeError => exit(exitcode::SOFTWARE),
    }
}
