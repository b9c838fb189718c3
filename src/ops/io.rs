use crate::error::Result;
use crate::format;
use crate::vm::Vm;

/// `.` — pop the TOS object and print it formatted.
pub fn dot(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, ".")?;
    let (text, span) = format::format_tos(vm)?;
    vm.sp -= span;
    vm.console_emit(&text);
    vm.console_emit(" ");
    Ok(())
}

/// `print` — pop the TOS object and print its internal representation.
pub fn raw_print(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, "print")?;
    let (text, span) = format::raw_tos(vm)?;
    vm.sp -= span;
    vm.console_emit(&text);
    vm.console_emit("\n");
    Ok(())
}
