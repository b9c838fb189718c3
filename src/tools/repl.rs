use std::io::{self, BufRead, Write};

use anyhow::Result;

use tacit::{execute_program, Vm};

/// Read-eval-print loop. Every input is compiled and run on the shared VM;
/// errors are printed with the surviving stack depth and the loop goes on.
pub fn repl(vm: &mut Vm) -> Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "bye" {
            break;
        }
        match execute_program(vm, input) {
            Ok(()) => println!(" ok"),
            Err(err) => {
                println!("Error: {err}");
                println!("stack depth: {}", vm.stack_depth());
            }
        }
    }
    Ok(())
}
