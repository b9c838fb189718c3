use crate::error::{Result, VmError};
use crate::mem::{GLOBAL_CELLS, GLOBAL_CELL_BASE, RSTACK_CELL_TOP};
use crate::tagged::{Tag, Word};
use crate::vm::Vm;

use super::list::{
    element_addr, find_addr, push_object_from, resolve_ref_cell, tos_span,
};
use super::operand_u16;

// Variable access and in-place compound mutation. A variable slot holds a
// simple value directly, or a REF to the header of a frame- or
// heap-resident list; `fetch`/`store` resolve that one level of
// indirection so bare reads materialise whole lists.

/// Effective target of a REF: the list header a variable slot points at,
/// or the referenced cell itself.
fn effective_cell(vm: &Vm, reference: Word) -> Result<usize> {
    let cell = resolve_ref_cell(vm, reference)?;
    let value = vm.mem.read_cell(cell)?;
    if value.is_ref() {
        let target = resolve_ref_cell(vm, value)?;
        if vm.mem.read_cell(target)?.is_list() {
            return Ok(target);
        }
    }
    Ok(cell)
}

/// `fetch` — ( ref -- value ). Simples come back as themselves; a cell
/// holding (a REF to) a list header materialises the whole list.
pub fn fetch(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, "fetch")?;
    let reference = vm.pop()?;
    if !reference.is_ref() {
        return Err(VmError::TagMismatch {
            expected: Tag::Ref,
            actual: reference.tag(),
        });
    }
    let cell = effective_cell(vm, reference)?;
    if vm.mem.read_cell(cell)?.is_list() {
        push_object_from(vm, cell)
    } else {
        let value = vm.mem.read_cell(cell)?;
        vm.push(value)
    }
}

/// `store` — ( value ref -- ). Simple-to-simple writes the cell;
/// compound-to-compound requires equal spans and copies the payload in
/// place; mixing the two is an error.
pub fn store(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(2, "store")?;
    let reference = vm.pop()?;
    if !reference.is_ref() {
        return Err(VmError::domain("store expects REF address"));
    }
    let target = effective_cell(vm, reference)?;
    let existing = vm.mem.read_cell(target)?;
    let incoming = vm.peek()?;
    match (existing.is_list(), incoming.is_list()) {
        (true, true) => {
            let span = tos_span(vm, "store")?;
            if existing.payload() != incoming.payload() {
                return Err(VmError::domain(
                    "Incompatible compound assignment: slot count or type mismatch",
                ));
            }
            vm.mem.copy_cells(target + 1 - span, vm.sp - span, span)?;
            vm.sp -= span;
            Ok(())
        }
        (false, false) => {
            let value = vm.pop()?;
            vm.mem.write_cell(target, value)
        }
        _ => Err(VmError::domain(
            "Cannot assign simple to compound or compound to simple",
        )),
    }
}

/// Pop the path list off the stack, returning its elements first-first.
/// Path elements must be simples (numbers or string keys).
fn pop_path(vm: &mut Vm, op: &'static str) -> Result<Vec<Word>> {
    vm.ensure_stack(1, op)?;
    let header = vm.peek()?;
    if !header.is_list() {
        return Err(VmError::TagMismatch {
            expected: Tag::List,
            actual: header.tag(),
        });
    }
    let span = tos_span(vm, op)?;
    let header_cell = vm.sp - 1;
    let mut elements = Vec::new();
    let mut index = 0;
    while let Some(cell) = element_addr(vm, header_cell, index)? {
        let element = vm.mem.read_cell(cell)?;
        if element.is_list() {
            return Err(VmError::domain(format!(
                "{op} path elements must be numbers or string keys"
            )));
        }
        elements.push(element);
        index += 1;
    }
    vm.sp -= span;
    Ok(elements)
}

/// Walk a path from a target REF down to the addressed cell.
/// An empty path, or any miss along the way, yields None.
fn walk_path(
    vm: &Vm,
    target: Word,
    path: &[Word],
) -> Result<Option<usize>> {
    if path.is_empty() || !target.is_ref() {
        return Ok(None);
    }
    let mut cell = effective_cell(vm, target)?;
    for step in path {
        let next = match step.tag() {
            Tag::Number | Tag::Integer => {
                element_addr(vm, cell, step.try_number()? as i32)?
            }
            Tag::String => find_addr(vm, cell, step.payload())?,
            _ => {
                return Err(VmError::domain(
                    "select path elements must be numbers or string keys",
                ))
            }
        };
        match next {
            Some(addr) => cell = addr,
            None => return Ok(None),
        }
    }
    Ok(Some(cell))
}

/// `select` — ( target path -- ref | NIL ).
pub fn select(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(2, "select")?;
    let path = pop_path(vm, "select")?;
    let target = vm.pop()?;
    match walk_path(vm, target, &path)? {
        Some(cell) => vm.push(Word::reference(cell as u16)),
        None => vm.push(Word::NIL),
    }
}

/// `retrieve` — ( target path -- value | NIL ).
pub fn retrieve(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(2, "retrieve")?;
    let path = pop_path(vm, "retrieve")?;
    let target = vm.pop()?;
    match walk_path(vm, target, &path)? {
        Some(cell) => {
            if vm.mem.read_cell(cell)?.is_list() {
                push_object_from(vm, cell)
            } else {
                let value = vm.mem.read_cell(cell)?;
                vm.push(value)
            }
        }
        None => vm.push(Word::NIL),
    }
}

/// `update` — ( value target path -- ), store through a path.
pub fn update(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(3, "update")?;
    let path = pop_path(vm, "update")?;
    let target = vm.pop()?;
    match walk_path(vm, target, &path)? {
        Some(cell) => {
            vm.push(Word::reference(cell as u16))?;
            store(vm)
        }
        None => Err(VmError::domain("update target not found")),
    }
}

/// `VarRef slot` — push a REF to the local slot at BP + slot.
pub fn var_ref(vm: &mut Vm) -> Result<()> {
    let slot = operand_u16(vm)? as usize;
    let cell = vm.bp + slot;
    vm.push(Word::reference(cell as u16))
}

/// `GlobalRef cell` — push a REF to an absolute data-area cell.
pub fn global_ref(vm: &mut Vm) -> Result<()> {
    let cell = operand_u16(vm)?;
    vm.push(Word::reference(cell))
}

/// `Reserve n` — create the local slots of the current frame.
pub fn reserve(vm: &mut Vm) -> Result<()> {
    let count = operand_u16(vm)? as usize;
    if vm.rsp + count > RSTACK_CELL_TOP {
        return Err(VmError::ReturnStackOverflow { op: "reserve" });
    }
    for cell in vm.rsp..vm.rsp + count {
        vm.mem.write_cell(cell, Word::NIL)?;
    }
    vm.rsp += count;
    Ok(())
}

/// `InitVar slot` — pop TOS into a local slot. Compounds transfer their
/// payload onto RSTACK inside the frame; the slot keeps a REF to the
/// header, freed automatically when the frame exits.
pub fn init_var(vm: &mut Vm) -> Result<()> {
    let slot = operand_u16(vm)? as usize;
    let cell = vm.bp + slot;
    if cell >= vm.rsp {
        return Err(VmError::InvariantViolation(format!(
            "InitVar slot {slot} outside the reserved frame"
        )));
    }
    vm.ensure_stack(1, "var")?;
    if vm.peek()?.is_list() {
        let span = tos_span(vm, "var")?;
        if vm.rsp + span > RSTACK_CELL_TOP {
            return Err(VmError::ReturnStackOverflow { op: "var" });
        }
        vm.mem.copy_cells(vm.rsp, vm.sp - span, span)?;
        let header = vm.rsp + span - 1;
        vm.rsp += span;
        vm.sp -= span;
        vm.mem.write_cell(cell, Word::reference(header as u16))
    } else {
        let value = vm.pop()?;
        vm.mem.write_cell(cell, value)
    }
}

/// `GlobalInit cell` — pop TOS into a global value cell. Compounds are
/// deep-copied onto the GLOBAL heap; the value cell keeps a REF to the
/// copied header.
pub fn global_init(vm: &mut Vm) -> Result<()> {
    let cell = operand_u16(vm)? as usize;
    vm.ensure_stack(1, "global")?;
    if vm.peek()?.is_list() {
        let span = tos_span(vm, "global")?;
        if vm.gp + span > GLOBAL_CELLS {
            return Err(VmError::domain("global heap overflow"));
        }
        let dest = GLOBAL_CELL_BASE + vm.gp;
        vm.mem.copy_cells(dest, vm.sp - span, span)?;
        vm.gp += span;
        vm.sp -= span;
        vm.mem.write_cell(cell, Word::reference((dest + span - 1) as u16))
    } else {
        let value = vm.pop()?;
        vm.mem.write_cell(cell, value)
    }
}
