use crate::error::Qresult;
use crate::machine::Machine;

/// Execution token: a stable index into the dictionary arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Xt(pub usize);

pub type WordFn = fn(&mut Machine) -> Qresult;

/// Code handle of a dictionary entry.  The few handles with their own
/// variants are the ones the inner interpreter must treat specially
/// because they touch the instruction pointer or the word that was
/// dispatched; everything else is a plain native function.
#[derive(Clone, Copy, PartialEq)]
pub enum Code {
    /// Colon definition: push ip, continue inside the body.
    Enter,
    /// Pop ip from the return stack.
    Exit,
    /// Push the inline cell that follows.
    Lit,
    /// Like Lit but the value lands on the float stack.
    Flit,
    /// Push (addr, len) of the inline string that follows.
    Slit,
    /// ip moves by the byte displacement stored in the next cell.
    Branch,
    /// Branch if the popped flag is zero, else skip the displacement.
    BranchZ,
    /// Push ip past the displacement cell, then branch.
    Call,
    /// Pop an execution token and dispatch it.
    Execute,
    /// CREATEd word: push the address of its payload.
    DataField,
    /// CREATEd word after DOES>: push the payload address and continue
    /// at the stored continuation.
    DoDoes,
    /// Pop a throw code and raise it (THROW).
    Longjmp,
    /// Unwind the dictionary and HERE back to this word.
    Marker,
    /// Trampoline exit: hands control back to the outer interpreter.
    Repl,
    Native(WordFn),
}

pub const BIT_IMMEDIATE: u8 = 0x01;
pub const BIT_CREATED: u8 = 0x02;
pub const BIT_HIDDEN: u8 = 0x04;
pub const BIT_COMPILE_ONLY: u8 = 0x08;

/// One dictionary entry.  The body lives in data space starting at
/// `addr`; `ndata` counts its bytes.  Entries are only appended, so the
/// previous word is simply the previous arena slot and MARKER unwinds
/// by truncating the arena.
pub struct Word {
    pub name: String,
    pub bits: u8,
    pub code: Code,
    pub addr: usize,
    pub ndata: usize,
}

impl Word {
    pub fn is_immediate(&self) -> bool {
        self.bits & BIT_IMMEDIATE != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.bits & BIT_HIDDEN != 0
    }

    pub fn is_created(&self) -> bool {
        self.bits & BIT_CREATED != 0
    }

    pub fn is_compile_only(&self) -> bool {
        self.bits & BIT_COMPILE_ONLY != 0
    }
}

use std::fmt;

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ( {:#x} {} bits {:#x} )",
            if self.name.is_empty() { ":NONAME" } else { self.name.as_str() },
            self.addr,
            self.ndata,
            self.bits
        )
    }
}
