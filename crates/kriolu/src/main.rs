use std::env;
use std::fs;
use std::process;

use kriolu_vm::InterpretResult;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Error: few arguments to run.\n");
        print_usage();
        process::exit(64);
    }

    let path = &args[1];
    if !path.ends_with(".k") {
        eprintln!("Error: file extension not supported.\n");
        print_usage();
        process::exit(64);
    }

    let mut flag_lexer = false;
    let mut flag_ast = false;
    let mut flag_bytecode = false;
    for arg in &args[2..] {
        match arg.as_str() {
            "-lexer" => flag_lexer = true,
            "-ast" => flag_ast = true,
            "-bytecode" => flag_bytecode = true,
            other => {
                eprintln!("Error: unknown flag '{}'.\n", other);
                print_usage();
                process::exit(64);
            }
        }
    }

    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: could not read file \"{}\": {}.", path, e);
            process::exit(74);
        }
    };

    if flag_lexer {
        kriolu_lexer::dump_tokens(&source);
    }
    if flag_ast && !kriolu_vm::dump_ast(&source) {
        process::exit(65);
    }
    if flag_bytecode && !kriolu_vm::dump_bytecode(&source) {
        process::exit(65);
    }
    if flag_lexer || flag_ast || flag_bytecode {
        return;
    }

    match kriolu_vm::interpret(&source) {
        InterpretResult::Ok => {}
        InterpretResult::CompileError => process::exit(65),
        InterpretResult::RuntimeError => process::exit(70),
    }
}

fn print_usage() {
    println!("Kriolu interpreter v0.1.0\n");
    println!("Usage:");
    println!("  kriolu <filename.k> [optional flags]\n");
    println!("Optional flags:");
    println!("  -lexer                   Sends tokens to stdout.");
    println!("  -ast                     Sends the parsed tree to stdout.");
    println!("  -bytecode                Sends disassembled bytecode to stdout.");
}
