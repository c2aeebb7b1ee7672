//! The internal instruction representation.
//!
//! Parsed brainfuck and the optimizer's extended forms share one opcode. The
//! cell offset `off` lives next to the operation so that the level-4 pass can
//! retarget any instruction without moving the data pointer; raw parser
//! output always carries `off = 0`.

use std::fmt;

/// Operation payload of an [`Insn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Add `v` to `cells[ptr + off]`, wrapping at the cell width.
    Add(i64),
    /// Advance the data pointer by `v` cells.
    Move(i64),
    /// Output `cells[ptr + off]` truncated to 8 bit.
    Print,
    /// Overwrite `cells[ptr + off]` with an input byte, zero-extended.
    Read,
    /// If `cells[ptr + off] == 0` continue at `addr`.
    JumpForward(usize),
    /// If `cells[ptr + off] != 0` continue at `addr`.
    JumpBack(usize),
    /// Assign `cells[ptr + off] = v`, wrapping at the cell width.
    Set(i64),
    /// Multiply-accumulate: `cells[ptr + offset] += cells[ptr + off] * multiplier`.
    Mac { offset: i64, multiplier: i64 },
}

/// A single instruction: an operation plus the cell offset it acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn {
    pub off: i64,
    pub op: Op,
}

impl Insn {
    pub const fn new(op: Op) -> Insn {
        Insn { off: 0, op }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Op::Add(v) => write!(f, "add    [{:+}] {}", self.off, v),
            Op::Move(v) => write!(f, "move   {v:+}"),
            Op::Print => write!(f, "print  [{:+}]", self.off),
            Op::Read => write!(f, "read   [{:+}]", self.off),
            Op::JumpForward(addr) => write!(f, "jfwd   [{:+}] -> {addr}", self.off),
            Op::JumpBack(addr) => write!(f, "jback  [{:+}] -> {addr}", self.off),
            Op::Set(v) => write!(f, "set    [{:+}] {}", self.off, v),
            Op::Mac { offset, multiplier } => {
                write!(f, "mac    [{offset:+}] += [{:+}] * {multiplier}", self.off)
            }
        }
    }
}
