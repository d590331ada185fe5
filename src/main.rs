mod call_frame;
mod chunk;
mod compiler;
mod constants;
mod debug;
mod gc;
mod memory;
mod objects;
mod scanner;
mod std_mod;
mod table;
mod value;
mod vm;

use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process;

use vm::{InterpretResult, VM};

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("Usage: mocha [path]");
            process::exit(64);
        }
    }
}

fn repl() {
    let mut vm = VM::new();
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().expect("failed to flush stdout");

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                vm.interpret(&line);
            }
            Err(error) => {
                eprintln!("failed to read line: {}", error);
                break;
            }
        }
    }
}

fn run_file(path: &str) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Could not read file \"{}\": {}", path, error);
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
