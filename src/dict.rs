use crate::error::{Result, VmError};
use crate::mem::{GLOBAL_CELLS, GLOBAL_CELL_BASE};
use crate::tagged::{Tag, Word};
use crate::vm::Vm;

// An entry is three record cells [name, payload, link] followed by one
// header cell holding Ref(record_start). `vm.head` is the newest header's
// absolute cell index, 0 when the dictionary is empty. Hiding an entry
// retags its header Ref -> Sentinel; the record is untouched.

const ENTRY_CELLS: usize = 4;

/// Raw entry info, hidden entries included.
#[derive(Debug, Clone, Copy)]
pub struct EntryInfo {
    pub header: usize,
    pub record: usize,
    pub name_id: u16,
    pub payload: Word,
    pub link: usize,
    pub hidden: bool,
}

/// Append a named entry whose payload is an arbitrary tagged word
/// (typically CODE, BUILTIN, or REF to a global value cell).
pub fn define(vm: &mut Vm, name: &str, payload: Word) -> Result<()> {
    let name_id = vm.intern(name)?;
    if vm.gp + ENTRY_CELLS > GLOBAL_CELLS {
        return Err(VmError::domain("global heap overflow"));
    }
    let record = GLOBAL_CELL_BASE + vm.gp;
    let link = Word::tagged(Tag::Integer, vm.head as i32)?;
    vm.mem.write_cell(record, Word::string(name_id))?;
    vm.mem.write_cell(record + 1, payload)?;
    vm.mem.write_cell(record + 2, link)?;
    let header = record + 3;
    vm.mem
        .write_cell(header, Word::tagged(Tag::Ref, record as i32)?)?;
    vm.gp += ENTRY_CELLS;
    vm.head = header;
    Ok(())
}

fn read_entry(vm: &Vm, header: usize) -> Result<EntryInfo> {
    let header_word = vm.mem.read_cell(header)?;
    let hidden = match header_word.tag() {
        Tag::Ref => false,
        Tag::Sentinel => true,
        tag => {
            return Err(VmError::InvariantViolation(format!(
                "dictionary header at cell {header} has tag {tag:?}"
            )))
        }
    };
    let record = header_word.payload() as usize;
    let name = vm.mem.read_cell(record)?;
    if name.tag() != Tag::String {
        return Err(VmError::InvariantViolation(format!(
            "dictionary record at cell {record} has no name"
        )));
    }
    let payload = vm.mem.read_cell(record + 1)?;
    let link = vm.mem.read_cell(record + 2)?.payload() as usize;
    Ok(EntryInfo {
        header,
        record,
        name_id: name.payload(),
        payload,
        link,
        hidden,
    })
}

/// Resolve `name` to the payload of the newest visible entry, or NIL.
/// Shadowing is by recency: the most recent visible definition wins.
pub fn lookup(vm: &Vm, name: &str) -> Result<Word> {
    let Some(name_id) = vm.digest.find(name) else {
        // never interned, so never defined
        return Ok(Word::NIL);
    };
    let mut header = vm.head;
    while header != 0 {
        let entry = read_entry(vm, header)?;
        if !entry.hidden && entry.name_id == name_id {
            return Ok(entry.payload);
        }
        header = entry.link;
    }
    Ok(Word::NIL)
}

/// Raw walk that sees hidden entries too (include guards, compile state).
pub fn find_entry_by_name(vm: &Vm, name: &str) -> Result<Option<EntryInfo>> {
    let Some(name_id) = vm.digest.find(name) else {
        return Ok(None);
    };
    let mut header = vm.head;
    while header != 0 {
        let entry = read_entry(vm, header)?;
        if entry.name_id == name_id {
            return Ok(Some(entry));
        }
        header = entry.link;
    }
    Ok(None)
}

fn set_hidden(vm: &mut Vm, header: usize, hidden: bool) -> Result<()> {
    let entry = read_entry(vm, header)?;
    let tag = if hidden { Tag::Sentinel } else { Tag::Ref };
    vm.mem
        .write_cell(header, Word::tagged(tag, entry.record as i32)?)
}

pub fn hide_entry(vm: &mut Vm, header: usize) -> Result<()> {
    set_hidden(vm, header, true)
}

pub fn unhide_entry(vm: &mut Vm, header: usize) -> Result<()> {
    set_hidden(vm, header, false)
}

pub fn hide_head(vm: &mut Vm) -> Result<()> {
    if vm.head == 0 {
        return Err(VmError::domain("hide on empty dictionary"));
    }
    hide_entry(vm, vm.head)
}

pub fn unhide_head(vm: &mut Vm) -> Result<()> {
    if vm.head == 0 {
        return Err(VmError::domain("unhide on empty dictionary"));
    }
    unhide_entry(vm, vm.head)
}

/// Restore `vm.gp` to `mark`, bulk-forgetting every heap object and
/// dictionary entry allocated after it. The head pointer is rewound until
/// it lands on an entry that still lives in the surviving range.
pub fn forget(vm: &mut Vm, mark: i64) -> Result<()> {
    if mark < 0 {
        return Err(VmError::domain("forget mark out of range"));
    }
    let mark = mark as usize;
    if mark > vm.gp {
        return Err(VmError::domain("forget mark beyond current heap top"));
    }
    vm.gp = mark;
    let live_top = GLOBAL_CELL_BASE + vm.gp;
    while vm.head != 0 && vm.head >= live_top {
        // the freed record bytes are still intact, walking them is fine
        vm.head = read_entry(vm, vm.head)?.link;
    }
    Ok(())
}
