use crate::compile::Compiler;
use crate::digest::Digest;
use crate::error::{Result, VmError};
use crate::mem::{
    Memory, GLOBAL_CELLS, GLOBAL_CELL_BASE, RSTACK_CELL_BASE, RSTACK_CELL_TOP,
    STACK_CELL_BASE, STACK_CELL_TOP,
};
use crate::ops;
use crate::tagged::Word;

/// Console collaborator for the print opcodes. The VM hands it fully
/// formatted text; it decides where the text goes.
pub trait Console {
    fn emit(&mut self, text: &str);
}

/// Default console: straight to stdout.
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn emit(&mut self, text: &str) {
        print!("{text}");
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
}

/// The VM: memory image, register set, string digest and compiler state.
///
/// One VM per session; tests construct fresh ones. All core operations take
/// the VM as an explicit parameter, there is no process-wide instance.
pub struct Vm {
    pub mem: Memory,
    /// byte offset of the next opcode in CODE
    pub ip: usize,
    /// absolute cell index one past the data-stack TOS
    pub sp: usize,
    /// absolute cell index one past the return-stack TOS
    pub rsp: usize,
    /// absolute cell index of the current frame base on RSTACK
    pub bp: usize,
    /// number of live cells in GLOBAL
    pub gp: usize,
    /// header cell of the newest dictionary entry, 0 when empty
    pub head: usize,
    pub running: bool,
    pub err: bool,
    pub in_finally: bool,
    /// when set, `ensure_invariants` runs after every dispatched opcode
    pub debug: bool,
    pub digest: Digest,
    pub compiler: Compiler,
    console: Box<dyn Console>,
}

impl Vm {
    /// Build a fresh VM with the builtin words pre-registered.
    pub fn new() -> Self {
        let mut vm = Vm {
            mem: Memory::new(),
            ip: 0,
            sp: STACK_CELL_BASE,
            rsp: RSTACK_CELL_BASE,
            bp: RSTACK_CELL_BASE,
            gp: 0,
            head: 0,
            running: false,
            err: false,
            in_finally: false,
            debug: false,
            digest: Digest::new(),
            compiler: Compiler::new(),
            console: Box::new(StdoutConsole),
        };
        ops::register_builtins(&mut vm)
            .expect("builtin registration fits the fresh image");
        vm
    }

    pub fn set_console(&mut self, console: Box<dyn Console>) {
        self.console = console;
    }

    pub fn console_emit(&mut self, text: &str) {
        self.console.emit(text);
    }

    pub fn intern(&mut self, text: &str) -> Result<u16> {
        self.digest.intern(&mut self.mem, text)
    }

    pub fn string(&self, id: u16) -> Result<String> {
        self.digest.get(&self.mem, id)
    }

    // data stack

    pub fn push(&mut self, value: Word) -> Result<()> {
        if self.sp >= STACK_CELL_TOP {
            return Err(VmError::StackOverflow {
                op: "push",
                stack: self.stack_snapshot(),
            });
        }
        self.mem.write_cell(self.sp, value)?;
        self.sp += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Word> {
        if self.sp == STACK_CELL_BASE {
            return Err(VmError::StackUnderflow {
                op: "pop",
                required: 1,
                stack: self.stack_snapshot(),
            });
        }
        self.sp -= 1;
        self.mem.read_cell(self.sp)
    }

    pub fn peek(&self) -> Result<Word> {
        if self.sp == STACK_CELL_BASE {
            return Err(VmError::StackUnderflow {
                op: "peek",
                required: 1,
                stack: self.stack_snapshot(),
            });
        }
        self.mem.read_cell(self.sp - 1)
    }

    pub fn stack_depth(&self) -> usize {
        self.sp - STACK_CELL_BASE
    }

    /// Current data-stack contents, bottom to top.
    pub fn stack_data(&self) -> Vec<Word> {
        (STACK_CELL_BASE..self.sp)
            .map(|cell| self.mem.read_cell(cell).unwrap_or(Word::NIL))
            .collect()
    }

    pub fn stack_snapshot(&self) -> String {
        let words: Vec<String> = self
            .stack_data()
            .iter()
            .map(|w| format!("{w:?}"))
            .collect();
        format!("[{}]", words.join(" "))
    }

    /// Fail with an underflow naming `op` unless `required` cells are on
    /// the data stack.
    pub fn ensure_stack(
        &self,
        required: usize,
        op: &'static str,
    ) -> Result<()> {
        if self.stack_depth() < required {
            return Err(VmError::StackUnderflow {
                op,
                required,
                stack: self.stack_snapshot(),
            });
        }
        Ok(())
    }

    // return stack

    pub fn rpush(&mut self, value: Word) -> Result<()> {
        if self.rsp >= RSTACK_CELL_TOP {
            return Err(VmError::ReturnStackOverflow { op: "rpush" });
        }
        self.mem.write_cell(self.rsp, value)?;
        self.rsp += 1;
        Ok(())
    }

    pub fn rpop(&mut self) -> Result<Word> {
        if self.rsp == RSTACK_CELL_BASE {
            return Err(VmError::ReturnStackUnderflow { op: "rpop" });
        }
        self.rsp -= 1;
        self.mem.read_cell(self.rsp)
    }

    // global heap, single-cell primitives

    /// Bump-allocate one GLOBAL cell holding `value`; returns its absolute
    /// cell index.
    pub fn gpush(&mut self, value: Word) -> Result<usize> {
        if self.gp >= GLOBAL_CELLS {
            return Err(VmError::domain("global heap overflow"));
        }
        let cell = GLOBAL_CELL_BASE + self.gp;
        self.mem.write_cell(cell, value)?;
        self.gp += 1;
        Ok(cell)
    }

    pub fn gpop(&mut self) -> Result<Word> {
        if self.gp == 0 {
            return Err(VmError::domain("global heap underflow"));
        }
        self.gp -= 1;
        self.mem.read_cell(GLOBAL_CELL_BASE + self.gp)
    }

    pub fn gpeek(&self) -> Result<Word> {
        if self.gp == 0 {
            return Err(VmError::domain("global heap underflow"));
        }
        self.mem.read_cell(GLOBAL_CELL_BASE + self.gp - 1)
    }

    /// Check the register invariants of the memory model. Run after every
    /// opcode when the debug flag is set; a failure is a bug in the core.
    pub fn ensure_invariants(&self) -> Result<()> {
        if !(STACK_CELL_BASE..=STACK_CELL_TOP).contains(&self.sp) {
            return Err(VmError::InvariantViolation(format!(
                "SP {:#x} outside data stack",
                self.sp
            )));
        }
        if !(RSTACK_CELL_BASE..=RSTACK_CELL_TOP).contains(&self.rsp) {
            return Err(VmError::InvariantViolation(format!(
                "RSP {:#x} outside return stack",
                self.rsp
            )));
        }
        if !(RSTACK_CELL_BASE..=self.rsp).contains(&self.bp) {
            return Err(VmError::InvariantViolation(format!(
                "BP {:#x} outside [RSTACK_BASE, RSP]",
                self.bp
            )));
        }
        if self.gp > GLOBAL_CELLS {
            return Err(VmError::InvariantViolation(format!(
                "GP {} beyond global segment",
                self.gp
            )));
        }
        if self.ip > crate::mem::CODE_SIZE {
            return Err(VmError::InvariantViolation(format!(
                "IP {:#x} outside CODE",
                self.ip
            )));
        }
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
