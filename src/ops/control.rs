use crate::error::{Result, VmError};
use crate::mem::CODE_SIZE;
use crate::tagged::{x1516, Tag, Word};
use crate::vm::Vm;

use super::{operand_i16, operand_u16, operand_u32, Op};

/// `LiteralNumber` — push the 4 raw operand bytes as a word. The operand
/// is a full word image, so any tagged literal can ride this opcode.
pub fn literal_number(vm: &mut Vm) -> Result<()> {
    let bits = operand_u32(vm)?;
    vm.push(Word::from_bits(bits))
}

/// `LiteralString` — push a STRING word for a digest id operand.
pub fn literal_string(vm: &mut Vm) -> Result<()> {
    let id = operand_u16(vm)?;
    vm.push(Word::string(id))
}

/// `LiteralCode` — push a CODE word for an X1516 address operand.
pub fn literal_code(vm: &mut Vm) -> Result<()> {
    let addr = x1516::decode(operand_u32(vm)?);
    vm.push(Word::tagged(Tag::Code, addr as i32)?)
}

fn branch_to(vm: &mut Vm, offset: i16) -> Result<()> {
    let target = vm.ip as i64 + offset as i64;
    if !(0..=CODE_SIZE as i64).contains(&target) {
        return Err(VmError::range(format!(
            "branch target {target:#x} outside CODE"
        )));
    }
    vm.ip = target as usize;
    Ok(())
}

/// `Branch off16` — unconditional jump, offset relative to past-the-operand.
pub fn branch(vm: &mut Vm) -> Result<()> {
    let offset = operand_i16(vm)?;
    branch_to(vm, offset)
}

/// `IfFalseBranch off16` — pop the condition; zero (or NIL) branches.
pub fn if_false_branch(vm: &mut Vm) -> Result<()> {
    let offset = operand_i16(vm)?;
    vm.ensure_stack(1, "if")?;
    let condition = vm.pop()?;
    if !condition.is_truthy() {
        branch_to(vm, offset)?;
    }
    Ok(())
}

/// Shared call-frame entry: save return address and caller BP, then jump.
pub fn enter_call(vm: &mut Vm, target: usize) -> Result<()> {
    if target >= CODE_SIZE {
        return Err(VmError::range(format!(
            "call target {target:#x} outside CODE"
        )));
    }
    vm.rpush(Word::tagged(Tag::Code, vm.ip as i32)?)?;
    vm.rpush(Word::tagged(Tag::Integer, vm.bp as i32)?)?;
    vm.bp = vm.rsp;
    vm.ip = target;
    Ok(())
}

/// `Call x1516` — call a user definition by absolute code address.
pub fn call(vm: &mut Vm) -> Result<()> {
    let target = x1516::decode(operand_u32(vm)?) as usize;
    enter_call(vm, target)
}

/// `Exit` — discard the frame's locals, restore caller BP, return.
pub fn exit(vm: &mut Vm) -> Result<()> {
    vm.rsp = vm.bp;
    vm.bp = vm.rpop()?.payload() as usize;
    vm.ip = vm.rpop()?.payload() as usize;
    Ok(())
}

/// `Abort` — halt the VM.
pub fn abort(vm: &mut Vm) -> Result<()> {
    vm.running = false;
    vm.in_finally = false;
    Ok(())
}

/// `eval` — apply TOS: CODE calls, BUILTIN dispatches, everything else is
/// self-quoting and stays put.
pub fn eval(vm: &mut Vm) -> Result<()> {
    vm.ensure_stack(1, "eval")?;
    let value = vm.peek()?;
    match value.tag() {
        Tag::Code => {
            vm.pop()?;
            enter_call(vm, value.payload() as usize)
        }
        Tag::Builtin => {
            vm.pop()?;
            let op = Op::try_from(value.payload() as u8).map_err(|_| {
                VmError::domain(format!(
                    "unknown builtin opcode {}",
                    value.payload()
                ))
            })?;
            if op.is_immediate() {
                return Err(VmError::domain(format!(
                    "{op:?} is compile-only and cannot be evaluated"
                )));
            }
            crate::interp::dispatch(vm, op)
        }
        _ => Ok(()),
    }
}
