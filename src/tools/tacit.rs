mod includes;
mod repl;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use tacit::{execute_program, Vm};

/// Tacit language runtime: execute source files and/or run a REPL.
#[derive(Clone, Debug, Parser)]
struct Args {
    /// execute the files and exit instead of entering the REPL
    #[arg(long)]
    no_interactive: bool,
    /// source files to execute, in order
    files: Vec<PathBuf>,
}

fn run_file(vm: &mut Vm, path: &PathBuf) -> Result<()> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    vm.compiler.source_name = Some(path.display().to_string());
    execute_program(vm, &source)
        .with_context(|| format!("executing {}", path.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut vm = Vm::new();
    vm.set_include_host(Box::new(includes::FileIncludeHost));

    for file in &args.files {
        run_file(&mut vm, file)?;
    }
    if !args.no_interactive {
        repl::repl(&mut vm)?;
    }
    Ok(())
}
