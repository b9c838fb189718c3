use crate::error::{Result, VmError};
use crate::mem::{region_of_cell, STACK_CELL_BASE};
use crate::tagged::{Tag, Word, SENTINEL_OPEN_LIST};
use crate::vm::Vm;

// Lists live header-at-TOS: payload cells below, the LIST header on top.
// The header's payload is the number of payload cells (spans, not logical
// elements), so a whole list is always `n + 1` contiguous cells.

/// Span of the object whose highest cell is `top_cell`: 1 for simples,
/// `n + 1` for a list header.
pub fn object_span(vm: &Vm, top_cell: usize) -> Result<usize> {
    let word = vm.mem.read_cell(top_cell)?;
    if word.is_list() {
        Ok(word.payload() as usize + 1)
    } else {
        Ok(1)
    }
}

/// Span of the TOS object, validated against the stack depth.
pub fn tos_span(vm: &Vm, op: &'static str) -> Result<usize> {
    vm.ensure_stack(1, op)?;
    let span = object_span(vm, vm.sp - 1)?;
    if span > vm.stack_depth() {
        return Err(VmError::InvariantViolation(format!(
            "{op}: list span {span} exceeds stack depth"
        )));
    }
    Ok(span)
}

/// Cell index of logical element `index` of the list headed at
/// `header_cell`, walking payload spans downward. None when out of range.
pub fn element_addr(
    vm: &Vm,
    header_cell: usize,
    index: i32,
) -> Result<Option<usize>> {
    if index < 0 {
        return Ok(None);
    }
    let header = vm.mem.read_cell(header_cell)?;
    if !header.is_list() {
        return Ok(None);
    }
    let slots = header.payload() as usize;
    let bottom = header_cell - slots;
    let mut cursor = header_cell.checked_sub(1);
    let mut remaining = index;
    while let Some(cell) = cursor {
        if cell < bottom {
            break;
        }
        if remaining == 0 {
            return Ok(Some(cell));
        }
        remaining -= 1;
        cursor = cell.checked_sub(object_span(vm, cell)?);
    }
    Ok(None)
}

/// Logical element count of the list headed at `header_cell`.
pub fn element_count(vm: &Vm, header_cell: usize) -> Result<usize> {
    let header = vm.mem.read_cell(header_cell)?;
    if !header.is_list() {
        return Ok(0);
    }
    let slots = header.payload() as usize;
    let bottom = header_cell - slots;
    let mut count = 0;
    let mut cursor = header_cell.checked_sub(1);
    while let Some(cell) = cursor {
        if cell < bottom {
            break;
        }
        count += 1;
        cursor = cell.checked_sub(object_span(vm, cell)?);
    }
    Ok(count)
}

/// Association-list walk: elements alternate key/value; returns the cell of
/// the value following the first key element equal to `key_id`.
pub fn find_addr(
    vm: &Vm,
    header_cell: usize,
    key_id: u16,
) -> Result<Option<usize>> {
    let header = vm.mem.read_cell(header_cell)?;
    if !header.is_list() {
        return Ok(None);
    }
    let slots = header.payload() as usize;
    let bottom = header_cell - slots;
    let mut cursor = header_cell.checked_sub(1);
    while let Some(key_cell) = cursor {
        if key_cell < bottom {
            break;
        }
        let key = vm.mem.read_cell(key_cell)?;
        let value_cell =
            key_cell.checked_sub(object_span(vm, key_cell)?);
        let Some(value_cell) = value_cell else { break };
        if value_cell < bottom {
            break;
        }
        if key.tag() == Tag::String && key.payload() == key_id {
            return Ok(Some(value_cell));
        }
        cursor = value_cell.checked_sub(object_span(vm, value_cell)?);
    }
    Ok(None)
}

/// Copy the object ending at `header_cell` onto the data stack, preserving
/// its layout (payload deepest, header on top).
pub fn push_object_from(vm: &mut Vm, top_cell: usize) -> Result<()> {
    let span = object_span(vm, top_cell)?;
    let bottom = top_cell + 1 - span;
    for cell in bottom..=top_cell {
        let word = vm.mem.read_cell(cell)?;
        vm.push(word)?;
    }
    Ok(())
}

/// Read the whole TOS object bottom-up into a scratch buffer.
fn read_object(vm: &Vm, top_cell: usize) -> Result<Vec<Word>> {
    let span = object_span(vm, top_cell)?;
    let bottom = top_cell + 1 - span;
    (bottom..=top_cell).map(|cell| vm.mem.read_cell(cell)).collect()
}

/// Collect objects downward from `top_cell` until exactly `cells` cells are
/// covered. Errors if a boundary would split an object.
fn collect_objects(
    vm: &Vm,
    top_cell: usize,
    cells: usize,
    op: &'static str,
) -> Result<Vec<Vec<Word>>> {
    let mut objects = Vec::new();
    let mut covered = 0usize;
    let mut cursor = top_cell;
    while covered < cells {
        let object = read_object(vm, cursor)?;
        covered += object.len();
        if covered > cells {
            return Err(VmError::domain(format!(
                "{op} count splits a list"
            )));
        }
        cursor = match cursor.checked_sub(object.len()) {
            Some(next) => next,
            None => usize::MAX, // covered == cells, loop exits
        };
        objects.push(object);
    }
    Ok(objects)
}

/// Rewrite `cells` stack cells ending at `top_cell` from scratch objects
/// laid out first-object-lowest.
fn write_objects(
    vm: &mut Vm,
    base_cell: usize,
    objects: &[Vec<Word>],
) -> Result<usize> {
    let mut cell = base_cell;
    for object in objects {
        for &word in object {
            vm.mem.write_cell(cell, word)?;
            cell += 1;
        }
    }
    Ok(cell)
}

/// `(` — push the open-list sentinel; `)` closes it.
pub fn open_list(vm: &mut Vm) -> Result<()> {
    vm.push(Word::sentinel(SENTINEL_OPEN_LIST))
}

/// `)` — reverse everything above the nearest open-list sentinel so the
/// payload ends up first-element-highest, then replace the sentinel region
/// with payload + LIST header at TOS.
pub fn close_list(vm: &mut Vm) -> Result<()> {
    let mut marker = None;
    let mut cell = vm.sp;
    while cell > STACK_CELL_BASE {
        cell -= 1;
        let word = vm.mem.read_cell(cell)?;
        if word.tag() == Tag::Sentinel
            && word.payload() == SENTINEL_OPEN_LIST
        {
            marker = Some(cell);
            break;
        }
        // skip whole nested objects so their payloads are never scanned
        cell = cell + 1 - object_span(vm, cell)?;
    }
    let Some(marker) = marker else {
        return Err(VmError::domain("close-list without open-list"));
    };
    let slots = vm.sp - marker - 1;
    if slots > u16::MAX as usize {
        return Err(VmError::range("list slot count exceeds 16 bits"));
    }
    let objects = if slots == 0 {
        Vec::new()
    } else {
        collect_objects(vm, vm.sp - 1, slots, "close-list")?
    };
    let top = write_objects(vm, marker, &objects)?;
    vm.mem.write_cell(top, Word::list(slots as u16))?;
    Ok(())
}

/// `length` — pop the list, push its slot count.
pub fn length(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, "length")?;
    let header = vm.peek()?;
    if !header.is_list() {
        return Err(VmError::TagMismatch {
            expected: Tag::List,
            actual: header.tag(),
        });
    }
    let span = tos_span(vm, "length")?;
    vm.sp -= span;
    vm.push(Word::number(header.payload() as f32))
}

/// `pack` — pop a cell count `n`, turn the top `n` cells into `LIST:n`.
pub fn pack(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, "pack")?;
    let count = vm.pop()?.try_number()? as i32;
    if count < 0 {
        return Err(VmError::domain("pack expects a non-negative count"));
    }
    let count = count as usize;
    vm.ensure_stack(count, "pack")?;
    if count > u16::MAX as usize {
        return Err(VmError::range("list slot count exceeds 16 bits"));
    }
    let objects = if count == 0 {
        Vec::new()
    } else {
        collect_objects(vm, vm.sp - 1, count, "pack")?
    };
    let base = vm.sp - count;
    write_objects(vm, base, &objects)?;
    vm.push(Word::list(count as u16))
}

/// `unpack` — inverse of `pack`: spread the payload back into push order
/// and leave the slot count on top.
pub fn unpack(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, "unpack")?;
    let header = vm.peek()?;
    if !header.is_list() {
        return Err(VmError::TagMismatch {
            expected: Tag::List,
            actual: header.tag(),
        });
    }
    let slots = header.payload() as usize;
    let span = tos_span(vm, "unpack")?;
    let objects = if slots == 0 {
        Vec::new()
    } else {
        collect_objects(vm, vm.sp - 2, slots, "unpack")?
    };
    let base = vm.sp - span;
    write_objects(vm, base, &objects)?;
    vm.sp -= 1;
    vm.push(Word::number(slots as f32))
}

/// `reverse` — reverse the element order of the list at TOS, in place.
pub fn reverse(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, "reverse")?;
    let header = vm.peek()?;
    if !header.is_list() {
        return Err(VmError::TagMismatch {
            expected: Tag::List,
            actual: header.tag(),
        });
    }
    let slots = header.payload() as usize;
    if slots == 0 {
        return Ok(());
    }
    tos_span(vm, "reverse")?;
    // elements come out first-element-first; writing them back lowest-first
    // is exactly the reversed layout
    let elements = collect_objects(vm, vm.sp - 2, slots, "reverse")?;
    let base = vm.sp - 1 - slots;
    write_objects(vm, base, &elements)?;
    Ok(())
}

/// Resolve an elem/find target: a REF (following one level of variable
/// indirection) or a list object sitting on the stack. Returns the header
/// cell and the stack span to drop (0 for refs).
fn target_header(vm: &mut Vm, op: &'static str) -> Result<(Option<usize>, usize)> {
    vm.ensure_stack(1, op)?;
    let top = vm.peek()?;
    if top.is_ref() {
        vm.pop()?;
        let cell = resolve_ref_cell(vm, top)?;
        let value = vm.mem.read_cell(cell)?;
        if value.is_list() {
            return Ok((Some(cell), 0));
        }
        if value.is_ref() {
            let target = resolve_ref_cell(vm, value)?;
            if vm.mem.read_cell(target)?.is_list() {
                return Ok((Some(target), 0));
            }
        }
        return Ok((None, 0));
    }
    if top.is_list() {
        let span = tos_span(vm, op)?;
        return Ok((Some(vm.sp - 1), span));
    }
    Err(VmError::TagMismatch {
        expected: Tag::Ref,
        actual: top.tag(),
    })
}

/// Bounds-check a REF payload against the unified data area.
pub fn resolve_ref_cell(vm: &Vm, reference: Word) -> Result<usize> {
    let cell = reference.payload() as usize;
    if region_of_cell(cell).is_none() {
        return Err(VmError::range(format!(
            "REF cell {cell:#x} outside the data area"
        )));
    }
    Ok(cell)
}

/// `elem` — ( target idx -- ref | NIL ).
pub fn elem(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(2, "elem")?;
    let index = vm.pop()?.try_number()? as i32;
    let (header, drop_span) = target_header(vm, "elem")?;
    let found = match header {
        Some(cell) => element_addr(vm, cell, index)?,
        None => None,
    };
    vm.sp -= drop_span;
    match found {
        Some(cell) => vm.push(Word::reference(cell as u16)),
        None => vm.push(Word::NIL),
    }
}

/// `find` — ( target key -- ref | NIL ), association-list lookup.
pub fn find(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(2, "find")?;
    let key = vm.pop()?;
    if key.tag() != Tag::String {
        return Err(VmError::TagMismatch {
            expected: Tag::String,
            actual: key.tag(),
        });
    }
    let (header, drop_span) = target_header(vm, "find")?;
    let found = match header {
        Some(cell) => find_addr(vm, cell, key.payload())?,
        None => None,
    };
    vm.sp -= drop_span;
    match found {
        Some(cell) => vm.push(Word::reference(cell as u16)),
        None => vm.push(Word::NIL),
    }
}

/// `enlist` — wrap the TOS object in a one-element list.
pub fn enlist(vm: &mut Vm) -> Result<()> {
    let span = tos_span(vm, "enlist")?;
    if span > u16::MAX as usize {
        return Err(VmError::range("list slot count exceeds 16 bits"));
    }
    vm.push(Word::list(span as u16))
}

/// `drop-list` — drop the whole list at TOS.
pub fn drop_list(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, "drop-list")?;
    if !vm.peek()?.is_list() {
        return Err(VmError::TagMismatch {
            expected: Tag::List,
            actual: vm.peek()?.tag(),
        });
    }
    let span = tos_span(vm, "drop-list")?;
    vm.sp -= span;
    Ok(())
}
