#![forbid(unsafe_code)]
pub mod compile;
pub mod dict;
pub mod digest;
pub mod error;
pub mod format;
pub mod interp;
pub mod mem;
pub mod ops;
pub mod tagged;
pub mod vm;

#[cfg(test)]
mod test;

pub use compile::{
    parse, IncludeHost, ParseOptions, ResolvedInclude, Tokenizer,
};
pub use error::{Result, VmError};
pub use interp::{execute_program, run};
pub use tagged::{Tag, Word};
pub use vm::{Console, StdoutConsole, Vm};

/// Build a fresh VM with the builtin words pre-registered.
pub fn create_vm() -> Vm {
    Vm::new()
}

/// Resolve a word to its dictionary payload: a BUILTIN, a CODE address, a
/// REF for a global, or a literal word.
pub fn resolve_symbol(vm: &Vm, name: &str) -> Result<Word> {
    let payload = dict::lookup(vm, name)?;
    if payload.is_nil() {
        return Err(VmError::domain(format!("Symbol not found: {name}")));
    }
    Ok(payload)
}

/// Resolve a word and push its payload; pair with `eval` to apply it.
pub fn push_symbol_ref(vm: &mut Vm, name: &str) -> Result<()> {
    let payload = resolve_symbol(vm, name)?;
    vm.push(payload)
}
