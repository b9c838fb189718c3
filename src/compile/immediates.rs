use crate::dict;
use crate::error::{Result, VmError};
use crate::mem::STACK_CELL_BASE;
use crate::ops::Op;
use crate::tagged::{Tag, Word, SENTINEL_MATCH_FRAME};
use crate::vm::Vm;

use super::{
    emit_branch_placeholder, emit_op, emit_u16, emit_x1516, parse,
    patch_branch, FuncContext, OpenDef, ParseOptions, ResolvedInclude,
    Token, Tokenizer,
};

// Control-flow immediates run at compile time and keep their state as
// tagged sentinel pairs on the data stack, so nested constructs compose.
// A closer marker is a CODE word whose payload sits above the reachable
// CODE space, which keeps it distinct from any block literal a program
// could have left on the stack.

const CLOSER_BASE: u16 = 0xFF00;

fn closer(op: Op) -> Word {
    Word::tagged_raw(Tag::Code, CLOSER_BASE | op as u16)
}

/// Closer marker carried by a CODE-tagged word, if any.
pub(crate) fn is_closer(word: Word) -> Option<Op> {
    if word.tag() != Tag::Code || word.payload() & CLOSER_BASE != CLOSER_BASE
    {
        return None;
    }
    match Op::try_from((word.payload() & 0xFF) as u8) {
        Ok(
            op @ (Op::EndIf
            | Op::EndMatch
            | Op::EndWith
            | Op::EndDefinition
            | Op::EndBlock),
        ) => Some(op),
        _ => None,
    }
}

fn expect_word<'s>(
    tok: &mut Tokenizer<'s>,
    what: &str,
) -> Result<&'s str> {
    match tok.next_token()? {
        Token::Word(name) => Ok(name),
        token => Err(VmError::syntax(format!(
            "{what} expects a name, got {token:?}"
        ))),
    }
}

/// Fail when leftover closer markers are on the data stack: an `if` or
/// `match` was never closed. Called at end-of-input and before entering a
/// definition body.
pub(crate) fn ensure_no_open_conditionals(vm: &Vm) -> Result<()> {
    for cell in STACK_CELL_BASE..vm.sp {
        let word = vm.mem.read_cell(cell)?;
        match is_closer(word) {
            Some(Op::EndIf) => {
                return Err(VmError::syntax("Unclosed IF"))
            }
            Some(Op::EndMatch) | Some(Op::EndWith) => {
                return Err(VmError::syntax("Unclosed match"))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Dispatch an immediate word encountered by the compile loop.
pub(crate) fn immediate(
    vm: &mut Vm,
    tok: &mut Tokenizer,
    op: Op,
) -> Result<()> {
    match op {
        Op::IfImm => if_imm(vm),
        Op::ElseImm => else_imm(vm),
        Op::MatchImm => match_imm(vm),
        Op::WithImm => with_imm(vm),
        Op::VarImm => var_imm(vm, tok),
        Op::GlobalImm => global_imm(vm, tok),
        Op::IncludeImm => include_imm(vm, tok),
        Op::RecurseImm => recurse_imm(vm),
        _ => Err(VmError::domain(format!("{op:?} is not an immediate"))),
    }
}

fn if_imm(vm: &mut Vm) -> Result<()> {
    let pos = emit_branch_placeholder(vm, Op::IfFalseBranch)?;
    vm.push(Word::tagged(Tag::Code, pos as i32)?)?;
    vm.push(closer(Op::EndIf))
}

fn else_imm(vm: &mut Vm) -> Result<()> {
    if vm.stack_depth() == 0 || is_closer(vm.peek()?) != Some(Op::EndIf) {
        return Err(VmError::syntax("else without if"));
    }
    vm.pop()?;
    let pos = vm.pop()?;
    let exit = emit_branch_placeholder(vm, Op::Branch)?;
    let here = vm.compiler.cp;
    patch_branch(vm, pos.payload() as usize, here)?;
    vm.push(Word::tagged(Tag::Code, exit as i32)?)?;
    vm.push(closer(Op::EndIf))
}

fn match_imm(vm: &mut Vm) -> Result<()> {
    vm.push(Word::sentinel(SENTINEL_MATCH_FRAME))?;
    vm.push(closer(Op::EndMatch))
}

fn with_imm(vm: &mut Vm) -> Result<()> {
    if vm.stack_depth() == 0 || is_closer(vm.peek()?) != Some(Op::EndMatch)
    {
        return Err(VmError::syntax("with outside match"));
    }
    let pos = emit_branch_placeholder(vm, Op::IfFalseBranch)?;
    vm.push(Word::tagged(Tag::Code, pos as i32)?)?;
    vm.push(closer(Op::EndWith))
}

fn close_if(vm: &mut Vm) -> Result<()> {
    vm.pop()?;
    let pos = vm.pop()?;
    if pos.tag() != Tag::Code {
        return Err(VmError::syntax("corrupt if frame"));
    }
    let here = vm.compiler.cp;
    patch_branch(vm, pos.payload() as usize, here)
}

fn close_clause(vm: &mut Vm) -> Result<()> {
    vm.pop()?;
    let pos = vm.pop()?;
    if pos.tag() != Tag::Code {
        return Err(VmError::syntax("corrupt match frame"));
    }
    if vm.stack_depth() == 0 || is_closer(vm.peek()?) != Some(Op::EndMatch)
    {
        return Err(VmError::syntax("match clause outside match"));
    }
    vm.pop()?;
    // jump over the remaining clauses; the next clause starts right after
    let exit = emit_branch_placeholder(vm, Op::Branch)?;
    let here = vm.compiler.cp;
    patch_branch(vm, pos.payload() as usize, here)?;
    vm.push(Word::tagged(Tag::Code, exit as i32)?)?;
    vm.push(closer(Op::EndMatch))
}

fn close_match(vm: &mut Vm) -> Result<()> {
    vm.pop()?;
    loop {
        let word = vm.pop()?;
        if word.tag() == Tag::Sentinel
            && word.payload() == SENTINEL_MATCH_FRAME
        {
            return Ok(());
        }
        if word.tag() != Tag::Code {
            return Err(VmError::syntax("corrupt match frame"));
        }
        let here = vm.compiler.cp;
        patch_branch(vm, word.payload() as usize, here)?;
    }
}

/// `;` — close the innermost open construct: an if/else arm, a match
/// clause, the whole match, or the current definition.
pub(crate) fn end_construct(vm: &mut Vm) -> Result<()> {
    if vm.stack_depth() > 0 {
        match is_closer(vm.peek()?) {
            Some(Op::EndIf) => return close_if(vm),
            Some(Op::EndWith) => return close_clause(vm),
            Some(Op::EndMatch) => return close_match(vm),
            // a `;` never closes a block literal, `}` does
            _ => {}
        }
    }
    if vm.compiler.open_def.is_some() {
        return close_definition(vm);
    }
    Err(VmError::syntax("Unexpected ;"))
}

/// `: name` — open a definition: dictionary entry with a CODE payload at
/// the body start, hidden while the body compiles, a forward jump past the
/// body, and a fresh function compile context.
pub(crate) fn begin_definition(
    vm: &mut Vm,
    tok: &mut Tokenizer,
) -> Result<()> {
    if vm.compiler.open_def.is_some() {
        return Err(VmError::syntax("Nested definition"));
    }
    ensure_no_open_conditionals(vm)?;
    let name = expect_word(tok, ":")?;
    let prev_head = vm.head;
    let prev_gp = vm.gp;
    let patch_pos = emit_branch_placeholder(vm, Op::Branch)?;
    let body_start = vm.compiler.cp;
    dict::define(vm, name, Word::tagged(Tag::Code, body_start as i32)?)?;
    dict::hide_head(vm)?;
    vm.compiler.open_def = Some(OpenDef {
        patch_pos,
        body_start,
        entry_header: vm.head,
        prev_head,
        prev_gp,
        open_lists_at_entry: vm.compiler.open_lists,
        open_blocks_at_entry: vm.compiler.open_blocks,
    });
    vm.compiler.func = Some(FuncContext::default());
    vm.compiler.last_def_addr = Some(body_start);
    Ok(())
}

fn close_definition(vm: &mut Vm) -> Result<()> {
    let def = vm
        .compiler
        .open_def
        .take()
        .expect("caller checked an open definition");
    if vm.compiler.open_lists != def.open_lists_at_entry {
        return Err(VmError::syntax("Unclosed list"));
    }
    if vm.compiler.open_blocks != def.open_blocks_at_entry {
        return Err(VmError::syntax("Unclosed block"));
    }
    emit_op(vm, Op::Exit)?;
    let here = vm.compiler.cp;
    patch_branch(vm, def.patch_pos, here)?;
    if let Some(func) = vm.compiler.func.take() {
        if let Some(pos) = func.reserve_pos {
            vm.mem.write16(pos, func.count)?;
        }
    }
    dict::unhide_entry(vm, def.entry_header)
}

/// `var name` — declare a local, reserving frame space on first use, and
/// initialise it from TOS.
fn var_imm(vm: &mut Vm, tok: &mut Tokenizer) -> Result<()> {
    let name = expect_word(tok, "var")?;
    if vm.compiler.func.is_none() {
        return Err(VmError::syntax("var is only valid inside a definition"));
    }
    let (slot, first) = {
        let func = vm.compiler.func.as_mut().unwrap();
        let slot = func.count;
        func.count += 1;
        func.locals.insert(name.to_owned(), slot);
        (slot, func.reserve_pos.is_none())
    };
    if first {
        emit_op(vm, Op::Reserve)?;
        let pos = vm.compiler.cp;
        emit_u16(vm, 0)?;
        vm.compiler
            .func
            .as_mut()
            .unwrap()
            .reserve_pos = Some(pos);
    }
    emit_op(vm, Op::InitVar)?;
    emit_u16(vm, slot)
}

/// `global name` — allocate the value cell now so later words in the same
/// unit resolve, define the entry with a REF payload, and emit the
/// runtime initialiser.
fn global_imm(vm: &mut Vm, tok: &mut Tokenizer) -> Result<()> {
    let name = expect_word(tok, "global")?;
    let cell = vm.gpush(Word::NIL)?;
    dict::define(vm, name, Word::tagged(Tag::Ref, cell as i32)?)?;
    emit_op(vm, Op::GlobalInit)?;
    emit_u16(vm, cell as u16)
}

/// `include "path"` — parse another source in place, guarded by a hidden
/// dictionary sentinel under the canonical path (pragma-once; recursive
/// includes short-circuit on the still-hidden guard).
fn include_imm(vm: &mut Vm, tok: &mut Tokenizer) -> Result<()> {
    let target = match tok.next_token()? {
        Token::Str(text) => text.into_owned(),
        token => {
            return Err(VmError::syntax(format!(
                "include expects a string path, got {token:?}"
            )))
        }
    };
    let current = vm.compiler.source_name.clone();
    let resolved = match vm.compiler.include_host.as_deref() {
        Some(host) => host.resolve_include(&target, current.as_deref()),
        None => {
            return Err(VmError::syntax(
                "include is not available in this context",
            ))
        }
    };
    let Some(ResolvedInclude { canonical, source }) = resolved else {
        return Err(VmError::syntax(format!("include failed: {target}")));
    };
    if canonical.is_empty() {
        return Err(VmError::syntax(format!("include failed: {target}")));
    }
    if dict::find_entry_by_name(vm, &canonical)?.is_some() {
        // already included (or still including): nothing to do
        return Ok(());
    }
    dict::define(vm, &canonical, Word::NIL)?;
    dict::hide_head(vm)?;
    let guard = vm.head;
    let saved = vm.compiler.source_name.take();
    vm.compiler.source_name = Some(canonical);
    let mut child = Tokenizer::new(&source);
    let result = parse(
        vm,
        &mut child,
        ParseOptions {
            reset_compiler: false,
            emit_abort: false,
            source_name: None,
        },
    );
    vm.compiler.source_name = saved;
    result?;
    dict::unhide_entry(vm, guard)
}

/// `recurse` — call the enclosing definition, visible even while its name
/// is hidden.
fn recurse_imm(vm: &mut Vm) -> Result<()> {
    let Some(def) = &vm.compiler.open_def else {
        return Err(VmError::syntax(
            "recurse is only valid inside a definition",
        ));
    };
    let target = def.body_start;
    emit_op(vm, Op::Call)?;
    emit_x1516(vm, target)
}

/// `{` — open a code-block literal: jump over the body now, leave a CODE
/// value at run time.
pub(crate) fn begin_block(vm: &mut Vm) -> Result<()> {
    let patch_pos = emit_branch_placeholder(vm, Op::Branch)?;
    let body_start = vm.compiler.cp;
    vm.push(Word::tagged(Tag::Code, patch_pos as i32)?)?;
    vm.push(Word::tagged(Tag::Code, body_start as i32)?)?;
    vm.push(closer(Op::EndBlock))?;
    vm.compiler.open_blocks += 1;
    Ok(())
}

/// `}` — close the block: emit its `Exit`, patch the skip, and push the
/// block's CODE value.
pub(crate) fn end_block(vm: &mut Vm) -> Result<()> {
    if vm.stack_depth() == 0 || is_closer(vm.peek()?) != Some(Op::EndBlock)
    {
        return Err(VmError::syntax("Unexpected }"));
    }
    vm.pop()?;
    let body_start = vm.pop()?;
    let patch_pos = vm.pop()?;
    if body_start.tag() != Tag::Code || patch_pos.tag() != Tag::Code {
        return Err(VmError::syntax("corrupt block frame"));
    }
    emit_op(vm, Op::Exit)?;
    let here = vm.compiler.cp;
    patch_branch(vm, patch_pos.payload() as usize, here)?;
    emit_op(vm, Op::LiteralCode)?;
    emit_x1516(vm, body_start.payload() as usize)?;
    vm.compiler.open_blocks -= 1;
    Ok(())
}
