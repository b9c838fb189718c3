use crate::dict;
use crate::error::{Result, VmError};
use crate::mem::{GLOBAL_CELLS, GLOBAL_CELL_BASE};
use crate::tagged::{Tag, Word};
use crate::vm::Vm;

use super::list::{object_span, tos_span};

// Bump-heap opcodes. Objects on the heap keep the list layout (payload
// below, header at the highest cell), so the topmost object's span is
// always readable from its header.

/// `gpush` — deep-copy the TOS object onto the GLOBAL heap, dropping it
/// from the data stack.
pub fn gpush(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, "gpush")?;
    if vm.peek()?.is_list() {
        let span = tos_span(vm, "gpush")?;
        if vm.gp + span > GLOBAL_CELLS {
            return Err(VmError::domain("global heap overflow"));
        }
        vm.mem
            .copy_cells(GLOBAL_CELL_BASE + vm.gp, vm.sp - span, span)?;
        vm.gp += span;
        vm.sp -= span;
        Ok(())
    } else {
        let value = vm.pop()?;
        vm.gpush(value)?;
        Ok(())
    }
}

/// `gpop` — rewind GP past the topmost heap object.
pub fn gpop(vm: &mut Vm) -> Result<()> {
    if vm.gp == 0 {
        return Err(VmError::domain("global heap underflow"));
    }
    let top = GLOBAL_CELL_BASE + vm.gp - 1;
    let span = object_span(vm, top)?;
    if span > vm.gp {
        return Err(VmError::InvariantViolation(format!(
            "heap object span {span} exceeds live heap"
        )));
    }
    vm.gp -= span;
    Ok(())
}

/// `gpeek` — push a REF to the topmost heap object.
pub fn gpeek(vm: &mut Vm) -> Result<()> {
    if vm.gp == 0 {
        return Err(VmError::domain("global heap underflow"));
    }
    vm.push(Word::reference((GLOBAL_CELL_BASE + vm.gp - 1) as u16))
}

/// `gmark` — push the current GP as a plain number.
pub fn gmark(vm: &mut Vm) -> Result<()> {
    vm.push(Word::number(vm.gp as f32))
}

/// `mark` — push the current heap top as a REF.
pub fn mark(vm: &mut Vm) -> Result<()> {
    vm.push(Word::reference((GLOBAL_CELL_BASE + vm.gp) as u16))
}

fn mark_value(vm: &mut Vm, op: &'static str) -> Result<i64> {
    vm.ensure_stack(1, op)?;
    let word = vm.pop()?;
    match word.tag() {
        Tag::Ref => {
            let cell = word.payload() as i64;
            Ok(cell - GLOBAL_CELL_BASE as i64)
        }
        Tag::Number | Tag::Integer => Ok(word.try_number()? as i64),
        _ => Err(VmError::domain("forget mark out of range")),
    }
}

/// `gsweep` — pop a numeric mark and restore GP to it.
pub fn gsweep(vm: &mut Vm) -> Result<()> {
    let mark = mark_value(vm, "gsweep")?;
    dict::forget(vm, mark)
}

/// `forget` — pop a REF (or numeric) mark and restore GP to it, dropping
/// every dictionary entry defined past the mark.
pub fn forget(vm: &mut Vm) -> Result<()> {
    let mark = mark_value(vm, "forget")?;
    dict::forget(vm, mark)
}
