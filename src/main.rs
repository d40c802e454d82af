// main.rs - crucible driver: hex loader, Forth VM and C compiler on one stdin pipeline

use crucible::compiler;
use crucible::loader::{self, LoadOutcome};
use crucible::region::{JitRegion, REGION_SIZE};
use crucible::source::Source;
use crucible::vm::{EXTENSIONS, VM};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::env;
use std::fmt::Display;
use std::io;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    let mode = args.get(1).map(String::as_str).unwrap_or("pipeline");
    let code = match mode {
        "load" => run_load(),
        "forth" => run_forth(),
        "cc" => run_cc(),
        "pipeline" => run_pipeline(),
        "help" | "-h" | "--help" => {
            print_usage();
            0
        }
        other => {
            eprintln!("crucible: unknown mode: {}", other);
            print_usage();
            2
        }
    };
    process::exit(code);
}

fn print_usage() {
    println!("Usage: crucible [mode]");
    println!();
    println!("Modes:");
    println!("  load      read hex pairs from stdin, then execute them");
    println!("  forth     run the Forth VM over stdin (REPL on a terminal)");
    println!("  cc        compile C from stdin to ARM64 assembly on stdout");
    println!("  pipeline  hex prefix, sentinel, then Forth source (default)");
}

fn fail<E: Display>(e: &E) -> i32 {
    eprintln!("crucible: {}", e);
    1
}

fn stdin_source() -> Source {
    Source::from_reader(Box::new(io::stdin()))
}

fn stdin_is_tty() -> bool {
    unsafe { libc::isatty(0) == 1 }
}

/// Stage-zero behavior: fill the region, seal it, branch to it.
fn run_load() -> i32 {
    let mut src = stdin_source();
    let mut region = match JitRegion::new(REGION_SIZE) {
        Ok(region) => region,
        Err(e) => return fail(&e),
    };
    if let Err(e) = loader::load(&mut src, &mut region) {
        return fail(&e);
    }
    let sealed = match region.seal() {
        Ok(sealed) => sealed,
        Err(e) => return fail(&e),
    };
    unsafe { sealed.enter() };
    0
}

fn run_forth() -> i32 {
    if stdin_is_tty() {
        return repl();
    }
    let mut vm = VM::new(stdin_source(), Box::new(io::stdout()));
    vm.preload(EXTENSIONS);
    match vm.interpret() {
        Ok(()) => 0,
        Err(e) => fail(&e),
    }
}

fn run_cc() -> i32 {
    let mut src = stdin_source();
    let mut out = io::stdout();
    match compiler::compile(&mut src, &mut out) {
        Ok(()) => 0,
        Err(e) => fail(&e),
    }
}

/// The bootstrap pipeline: a hex prefix up to the sentinel, then Forth
/// source (extensions, the compiler word, C source) on the same stream.
/// Without a sentinel the loader's image is executed directly.
fn run_pipeline() -> i32 {
    let mut src = stdin_source();
    let mut region = match JitRegion::new(REGION_SIZE) {
        Ok(region) => region,
        Err(e) => return fail(&e),
    };
    match loader::load(&mut src, &mut region) {
        Ok(LoadOutcome::Sentinel) => {
            // The audited image stays sealed while the VM takes over.
            let _image = match region.seal() {
                Ok(sealed) => sealed,
                Err(e) => return fail(&e),
            };
            let mut vm = VM::new(src, Box::new(io::stdout()));
            match vm.interpret() {
                Ok(()) => 0,
                Err(e) => fail(&e),
            }
        }
        Ok(LoadOutcome::Eof) => {
            let sealed = match region.seal() {
                Ok(sealed) => sealed,
                Err(e) => return fail(&e),
            };
            unsafe { sealed.enter() };
            0
        }
        Err(e) => fail(&e),
    }
}

fn repl() -> i32 {
    println!("crucible Forth v0.1.0");
    println!("Type BYE to exit");
    println!();

    let mut vm = VM::new(Source::empty(), Box::new(io::stdout()));
    vm.preload(EXTENSIONS);
    if let Err(e) = vm.interpret() {
        return fail(&e);
    }

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => return fail(&e),
    };
    let history_file = dirs::home_dir().map(|mut p| {
        p.push(".crucible_history");
        p
    });
    if let Some(ref path) = history_file {
        let _ = rl.load_history(path);
    }

    loop {
        let prompt = if vm.is_compiling() { "... " } else { "" };
        match rl.readline(prompt) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);
                match vm.eval_line(input) {
                    Ok(()) => {
                        if vm.finished() {
                            break;
                        }
                        println!(" ok");
                    }
                    Err(e) => {
                        println!(" {}", e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(e) => {
                eprintln!("crucible: {:?}", e);
                break;
            }
        }
    }

    if let Some(ref path) = history_file {
        let _ = rl.save_history(path);
    }
    0
}
