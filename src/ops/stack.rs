use crate::error::{Result, VmError};
use crate::mem::{STACK_CELL_BASE, STACK_CELL_TOP};
use crate::tagged::Word;
use crate::vm::Vm;

use super::list::{object_span, tos_span};

// Span-aware stack shuffles: a LIST header at TOS stands for the whole
// `n + 1` cell object, so shuffles move lists as units.

/// Boundaries of the top `count` objects, top-down: (bottom_cell, span).
fn top_objects(
    vm: &Vm,
    count: usize,
    op: &'static str,
) -> Result<Vec<(usize, usize)>> {
    let mut objects = Vec::with_capacity(count);
    let mut top = vm.sp;
    for _ in 0..count {
        if top == STACK_CELL_BASE {
            return Err(VmError::StackUnderflow {
                op,
                required: count,
                stack: vm.stack_snapshot(),
            });
        }
        let span = object_span(vm, top - 1)?;
        if span > top - STACK_CELL_BASE {
            return Err(VmError::InvariantViolation(format!(
                "{op}: list span {span} exceeds stack depth"
            )));
        }
        objects.push((top - span, span));
        top -= span;
    }
    Ok(objects)
}

fn read_cells(vm: &Vm, bottom: usize, span: usize) -> Result<Vec<Word>> {
    (bottom..bottom + span)
        .map(|cell| vm.mem.read_cell(cell))
        .collect()
}

/// Replace the stack region occupied by the top `objects` with the given
/// scratch objects, bottom-up, adjusting SP for any size change.
fn rewrite_top(
    vm: &mut Vm,
    region_bottom: usize,
    objects: &[Vec<Word>],
) -> Result<()> {
    let mut cell = region_bottom;
    for object in objects {
        for &word in object {
            if cell >= STACK_CELL_TOP {
                return Err(VmError::StackOverflow {
                    op: "stack shuffle",
                    stack: vm.stack_snapshot(),
                });
            }
            vm.mem.write_cell(cell, word)?;
            cell += 1;
        }
    }
    vm.sp = cell;
    Ok(())
}

/// `dup` — duplicate the TOS object.
pub fn dup(vm: &mut Vm) -> Result<()> {
    let span = tos_span(vm, "dup")?;
    let bottom = vm.sp - span;
    for cell in bottom..bottom + span {
        let word = vm.mem.read_cell(cell)?;
        vm.push(word)?;
    }
    Ok(())
}

/// `drop` — drop the TOS object, all of it.
pub fn drop(vm: &mut Vm) -> Result<()> {
    let span = tos_span(vm, "drop")?;
    vm.sp -= span;
    Ok(())
}

/// `swap` — ( a b -- b a ).
pub fn swap(vm: &mut Vm) -> Result<()> {
    let bounds = top_objects(vm, 2, "swap")?;
    let b = read_cells(vm, bounds[0].0, bounds[0].1)?;
    let a = read_cells(vm, bounds[1].0, bounds[1].1)?;
    rewrite_top(vm, bounds[1].0, &[b, a])
}

/// `over` — ( a b -- a b a ).
pub fn over(vm: &mut Vm) -> Result<()> {
    let bounds = top_objects(vm, 2, "over")?;
    let a = read_cells(vm, bounds[1].0, bounds[1].1)?;
    for word in a {
        vm.push(word)?;
    }
    Ok(())
}

/// `rot` — ( a b c -- b c a ).
pub fn rot(vm: &mut Vm) -> Result<()> {
    let bounds = top_objects(vm, 3, "rot")?;
    let c = read_cells(vm, bounds[0].0, bounds[0].1)?;
    let b = read_cells(vm, bounds[1].0, bounds[1].1)?;
    let a = read_cells(vm, bounds[2].0, bounds[2].1)?;
    rewrite_top(vm, bounds[2].0, &[b, c, a])
}

/// `revrot` — ( a b c -- c a b ), the inverse of `rot`.
pub fn revrot(vm: &mut Vm) -> Result<()> {
    let bounds = top_objects(vm, 3, "revrot")?;
    let c = read_cells(vm, bounds[0].0, bounds[0].1)?;
    let b = read_cells(vm, bounds[1].0, bounds[1].1)?;
    let a = read_cells(vm, bounds[2].0, bounds[2].1)?;
    rewrite_top(vm, bounds[2].0, &[c, a, b])
}

/// `pick` — ( .. n -- .. x ), copy the n-th object from the top, 0-based.
/// `0 pick` is `dup`.
pub fn pick(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, "pick")?;
    let n = vm.pop()?.try_number()? as i32;
    if n < 0 {
        return Err(VmError::domain("pick expects a non-negative index"));
    }
    let bounds = top_objects(vm, n as usize + 1, "pick")?;
    let (bottom, span) = bounds[n as usize];
    let object = read_cells(vm, bottom, span)?;
    for word in object {
        vm.push(word)?;
    }
    Ok(())
}

/// `tuck` — ( a b -- b a b ).
pub fn tuck(vm: &mut Vm) -> Result<()> {
    let bounds = top_objects(vm, 2, "tuck")?;
    let b = read_cells(vm, bounds[0].0, bounds[0].1)?;
    let a = read_cells(vm, bounds[1].0, bounds[1].1)?;
    rewrite_top(vm, bounds[1].0, &[b.clone(), a, b])
}

/// `nip` — ( a b -- b ).
pub fn nip(vm: &mut Vm) -> Result<()> {
    let bounds = top_objects(vm, 2, "nip")?;
    let b = read_cells(vm, bounds[0].0, bounds[0].1)?;
    rewrite_top(vm, bounds[1].0, &[b])
}
