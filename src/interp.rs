use log::trace;

use crate::compile::{self, ParseOptions, Tokenizer};
use crate::error::{Result, VmError};
use crate::ops::{decode_opcode, Op};
use crate::vm::Vm;

/// Execute one opcode. User-defined words never reach this: they are
/// compiled as `Call` with a direct code address.
pub(crate) fn dispatch(vm: &mut Vm, op: Op) -> Result<()> {
    use crate::ops::{arith, control, heap, io, list, refs, stack};
    match op {
        Op::Nop => Ok(()),
        Op::LiteralNumber => control::literal_number(vm),
        Op::LiteralString => control::literal_string(vm),
        Op::LiteralCode => control::literal_code(vm),
        Op::Branch => control::branch(vm),
        Op::IfFalseBranch => control::if_false_branch(vm),
        Op::Call => control::call(vm),
        Op::Exit => control::exit(vm),
        Op::Abort => control::abort(vm),
        Op::Eval => control::eval(vm),
        Op::Add => arith::add(vm),
        Op::Sub => arith::sub(vm),
        Op::Mul => arith::mul(vm),
        Op::Div => arith::div(vm),
        Op::Mod => arith::modulo(vm),
        Op::Neg => arith::neg(vm),
        Op::Abs => arith::abs(vm),
        Op::Sign => arith::sign(vm),
        Op::Min => arith::min(vm),
        Op::Max => arith::max(vm),
        Op::Exp => arith::exp(vm),
        Op::Ln => arith::ln(vm),
        Op::Log10 => arith::log10(vm),
        Op::Sqrt => arith::sqrt(vm),
        Op::Pow => arith::pow(vm),
        Op::Recip => arith::recip(vm),
        Op::Floor => arith::floor(vm),
        Op::Not => arith::not(vm),
        Op::Eq => arith::eq(vm),
        Op::Lt => arith::lt(vm),
        Op::Le => arith::le(vm),
        Op::Gt => arith::gt(vm),
        Op::Ge => arith::ge(vm),
        Op::Dup => stack::dup(vm),
        Op::Drop => stack::drop(vm),
        Op::Swap => stack::swap(vm),
        Op::Over => stack::over(vm),
        Op::Rot => stack::rot(vm),
        Op::RevRot => stack::revrot(vm),
        Op::Pick => stack::pick(vm),
        Op::Tuck => stack::tuck(vm),
        Op::Nip => stack::nip(vm),
        Op::OpenList => list::open_list(vm),
        Op::CloseList => list::close_list(vm),
        Op::Length => list::length(vm),
        Op::Pack => list::pack(vm),
        Op::Unpack => list::unpack(vm),
        Op::Reverse => list::reverse(vm),
        Op::Elem => list::elem(vm),
        Op::Find => list::find(vm),
        Op::Enlist => list::enlist(vm),
        Op::DropList => list::drop_list(vm),
        Op::Fetch => refs::fetch(vm),
        Op::Store => refs::store(vm),
        Op::Select => refs::select(vm),
        Op::Retrieve => refs::retrieve(vm),
        Op::Update => refs::update(vm),
        Op::VarRef => refs::var_ref(vm),
        Op::GlobalRef => refs::global_ref(vm),
        Op::InitVar => refs::init_var(vm),
        Op::Reserve => refs::reserve(vm),
        Op::GlobalInit => refs::global_init(vm),
        Op::GPush => heap::gpush(vm),
        Op::GPop => heap::gpop(vm),
        Op::GPeek => heap::gpeek(vm),
        Op::GMark => heap::gmark(vm),
        Op::Mark => heap::mark(vm),
        Op::GSweep => heap::gsweep(vm),
        Op::Forget => heap::forget(vm),
        Op::Dot => io::dot(vm),
        Op::RawPrint => io::raw_print(vm),
        Op::IfImm
        | Op::ElseImm
        | Op::MatchImm
        | Op::WithImm
        | Op::VarImm
        | Op::GlobalImm
        | Op::IncludeImm
        | Op::RecurseImm => Err(VmError::domain(format!(
            "{op:?} is compile-only and cannot be dispatched"
        ))),
        Op::EndIf
        | Op::EndMatch
        | Op::EndWith
        | Op::EndDefinition
        | Op::EndBlock => Err(VmError::domain(format!(
            "compile-time marker {op:?} dispatched at runtime"
        ))),
    }
}

/// Fetch-decode-dispatch until `Abort` clears the running flag. Errors
/// unwind to the host caller; the loop itself never catches.
pub fn run(vm: &mut Vm) -> Result<()> {
    vm.running = true;
    while vm.running {
        let byte0 = vm.mem.read8(vm.ip)?;
        let byte1 = if byte0 >= 0x80 {
            vm.mem.read8(vm.ip + 1)?
        } else {
            0
        };
        let (id, consumed) = decode_opcode(byte0, byte1);
        vm.ip += consumed;
        if id > 0x7F {
            return Err(VmError::domain(format!(
                "opcode id {id} in the user range cannot be dispatched"
            )));
        }
        let op = Op::try_from(id as u8).map_err(|_| {
            VmError::domain(format!("unknown opcode {id}"))
        })?;
        if vm.debug {
            trace!("ip={:#06x} {:?} depth={}", vm.ip, op, vm.stack_depth());
        }
        dispatch(vm, op)?;
        if vm.debug {
            vm.ensure_invariants()?;
        }
    }
    Ok(())
}

/// Compile `source` at the current compile pointer and run it, leaving its
/// effects on the VM stack. On a compile error the partial unit is rolled
/// back; on a runtime error the stack is left for the driver to inspect.
pub fn execute_program(vm: &mut Vm, source: &str) -> Result<()> {
    let start = vm.compiler.cp;
    let mut tokenizer = Tokenizer::new(source);
    if let Err(err) = compile::parse(
        vm,
        &mut tokenizer,
        ParseOptions {
            reset_compiler: true,
            emit_abort: true,
            source_name: None,
        },
    ) {
        compile::recover(vm, start);
        return Err(err);
    }
    vm.ip = start;
    vm.err = false;
    match run(vm) {
        Ok(()) => Ok(()),
        Err(err) => {
            vm.err = true;
            vm.running = false;
            Err(err)
        }
    }
}
