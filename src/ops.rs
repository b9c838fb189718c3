use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::dict;
use crate::error::{Result, VmError};
use crate::tagged::Word;
use crate::vm::Vm;

pub mod arith;
pub mod control;
pub mod heap;
pub mod io;
pub mod list;
pub mod refs;
pub mod stack;

/// Builtin opcodes. Ids 0..=127 are the single-byte range; user-defined
/// words occupy the two-byte range 128..=32767 and are dispatched by code
/// address, never through this enum.
///
/// Operand bytes per opcode (little-endian, see the bytecode notes in the
/// interpreter): `LiteralNumber` 4 raw word bytes, `LiteralString` 2,
/// `LiteralCode`/`Call` 4 (X1516), `Branch`/`IfFalseBranch` 2 (signed
/// offset from past-the-operand), `VarRef`/`GlobalRef`/`InitVar`/`Reserve`/
/// `GlobalInit` 2, everything else none.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[repr(u8)]
pub enum Op {
    Nop = 0,
    LiteralNumber,
    LiteralString,
    LiteralCode,
    Branch,
    IfFalseBranch,
    Call,
    Exit,
    Abort,
    Eval,
    // arithmetic and comparison
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Abs,
    Sign,
    Min,
    Max,
    Exp,
    Ln,
    Log10,
    Sqrt,
    Pow,
    Recip,
    Floor,
    Not,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    // stack manipulation, span aware at TOS
    Dup,
    Drop,
    Swap,
    Over,
    Rot,
    RevRot,
    Pick,
    Tuck,
    Nip,
    // lists
    OpenList,
    CloseList,
    Length,
    Pack,
    Unpack,
    Reverse,
    Elem,
    Find,
    Enlist,
    DropList,
    // references and variables
    Fetch,
    Store,
    Select,
    Retrieve,
    Update,
    VarRef,
    GlobalRef,
    InitVar,
    Reserve,
    GlobalInit,
    // global heap
    GPush,
    GPop,
    GPeek,
    GMark,
    Mark,
    GSweep,
    Forget,
    // I/O
    Dot,
    RawPrint,
    // compile-time words; dispatching one at runtime is an error
    IfImm,
    ElseImm,
    MatchImm,
    WithImm,
    VarImm,
    GlobalImm,
    IncludeImm,
    RecurseImm,
    // reserved ids used only as compile-time closer markers
    EndIf,
    EndMatch,
    EndWith,
    EndDefinition,
    EndBlock,
}

impl Op {
    /// Words that run at compile time instead of being emitted.
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            Op::IfImm
                | Op::ElseImm
                | Op::MatchImm
                | Op::WithImm
                | Op::VarImm
                | Op::GlobalImm
                | Op::IncludeImm
                | Op::RecurseImm
        )
    }
}

// inline operand readers; each advances IP past what it consumed

pub(crate) fn operand_u16(vm: &mut Vm) -> Result<u16> {
    let value = vm.mem.read16(vm.ip)?;
    vm.ip += 2;
    Ok(value)
}

pub(crate) fn operand_i16(vm: &mut Vm) -> Result<i16> {
    Ok(operand_u16(vm)? as i16)
}

pub(crate) fn operand_u32(vm: &mut Vm) -> Result<u32> {
    let value = vm.mem.read32(vm.ip)?;
    vm.ip += 4;
    Ok(value)
}

/// Two-range opcode byte codec. Ids below 128 are one byte; ids up to
/// 32767 are two bytes, low 7 bits first with the high bit set.
pub fn encode_opcode(id: u16) -> Result<([u8; 2], usize)> {
    if id > 0x7FFF {
        return Err(VmError::range(format!(
            "opcode id {id} outside the 15-bit range"
        )));
    }
    if id < 0x80 {
        Ok(([id as u8, 0], 1))
    } else {
        Ok(([0x80 | (id & 0x7F) as u8, (id >> 7) as u8], 2))
    }
}

/// Inverse of [`encode_opcode`]; `byte1` is ignored for the one-byte form.
pub fn decode_opcode(byte0: u8, byte1: u8) -> (u16, usize) {
    if byte0 < 0x80 {
        (byte0 as u16, 1)
    } else {
        (((byte1 as u16) << 7) | (byte0 & 0x7F) as u16, 2)
    }
}

/// Word names registered into a fresh dictionary.
pub(crate) const BUILTIN_WORDS: &[(&str, Op)] = &[
    ("nop", Op::Nop),
    ("eval", Op::Eval),
    ("add", Op::Add),
    ("sub", Op::Sub),
    ("mul", Op::Mul),
    ("div", Op::Div),
    ("mod", Op::Mod),
    ("neg", Op::Neg),
    ("abs", Op::Abs),
    ("sign", Op::Sign),
    ("min", Op::Min),
    ("max", Op::Max),
    ("exp", Op::Exp),
    ("ln", Op::Ln),
    ("log10", Op::Log10),
    ("sqrt", Op::Sqrt),
    ("pow", Op::Pow),
    ("recip", Op::Recip),
    ("floor", Op::Floor),
    ("not", Op::Not),
    ("eq", Op::Eq),
    ("lt", Op::Lt),
    ("le", Op::Le),
    ("gt", Op::Gt),
    ("ge", Op::Ge),
    ("dup", Op::Dup),
    ("drop", Op::Drop),
    ("swap", Op::Swap),
    ("over", Op::Over),
    ("rot", Op::Rot),
    ("revrot", Op::RevRot),
    ("pick", Op::Pick),
    ("tuck", Op::Tuck),
    ("nip", Op::Nip),
    ("length", Op::Length),
    ("pack", Op::Pack),
    ("unpack", Op::Unpack),
    ("reverse", Op::Reverse),
    ("elem", Op::Elem),
    ("find", Op::Find),
    ("enlist", Op::Enlist),
    ("drop-list", Op::DropList),
    ("fetch", Op::Fetch),
    ("store", Op::Store),
    ("select", Op::Select),
    ("retrieve", Op::Retrieve),
    ("update", Op::Update),
    ("gpush", Op::GPush),
    ("gpop", Op::GPop),
    ("gpeek", Op::GPeek),
    ("gmark", Op::GMark),
    ("mark", Op::Mark),
    ("gsweep", Op::GSweep),
    ("forget", Op::Forget),
    (".", Op::Dot),
    ("print", Op::RawPrint),
    // immediates
    ("if", Op::IfImm),
    ("else", Op::ElseImm),
    ("match", Op::MatchImm),
    ("with", Op::WithImm),
    ("var", Op::VarImm),
    ("global", Op::GlobalImm),
    ("include", Op::IncludeImm),
    ("recurse", Op::RecurseImm),
];

/// Register every builtin word into the dictionary of a fresh VM.
pub(crate) fn register_builtins(vm: &mut Vm) -> Result<()> {
    for &(name, op) in BUILTIN_WORDS {
        dict::define(vm, name, Word::builtin(op as u16))?;
    }
    Ok(())
}
