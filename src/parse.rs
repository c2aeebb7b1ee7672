//! Brainfuck character parser and bracket finalization.
//!
//! Parsing produces raw instructions with `off = 0` and zeroed jump targets.
//! Targets are filled in by [`finalize`] after the optimizer ran, since the
//! optimization passes reorder and replace instructions freely.

use crate::error::Error;
use crate::insn::{Insn, Op};
use crate::opt;

/// Parse a byte slice into raw instructions. Non-command bytes are skipped.
pub fn parse(src: &[u8]) -> Vec<Insn> {
    let mut insns = Vec::with_capacity(src.len());
    for byte in src {
        let op = match byte {
            b'+' => Op::Add(1),
            b'-' => Op::Add(-1),
            b'>' => Op::Move(1),
            b'<' => Op::Move(-1),
            b'.' => Op::Print,
            b',' => Op::Read,
            b'[' => Op::JumpForward(0),
            b']' => Op::JumpBack(0),
            _ => continue,
        };
        insns.push(Insn::new(op));
    }
    insns
}

/// Fill in matching jump targets with a single linear pass.
///
/// Each `[` ends up pointing at its matching `]` and vice versa. An open `[`
/// at the end of the stream yields [`Error::UnmatchedJumpForward`], which
/// interactive mode uses as a request for more input; a stray `]` is a fatal
/// syntax error.
pub fn finalize(insns: &mut [Insn]) -> Result<(), Error> {
    let mut open = Vec::new();
    for pc in 0..insns.len() {
        match insns[pc].op {
            Op::JumpForward(_) => open.push(pc),
            Op::JumpBack(_) => {
                let fwd = open.pop().ok_or(Error::UnmatchedJumpBack(pc))?;
                insns[fwd].op = Op::JumpForward(pc);
                insns[pc].op = Op::JumpBack(fwd);
            }
            _ => {}
        }
    }
    match open.pop() {
        Some(pc) => Err(Error::UnmatchedJumpForward(pc)),
        None => Ok(()),
    }
}

/// Largest absolute cell offset any instruction touches.
///
/// Zero until the level-4 pass folds moves into offsets. Drives the danger
/// zone size of the tape.
pub fn max_cell_offset(insns: &[Insn]) -> u64 {
    let mut max = 0u64;
    for ins in insns {
        max = max.max(ins.off.unsigned_abs());
        if let Op::Mac { offset, .. } = ins.op {
            max = max.max(offset.unsigned_abs());
        }
    }
    max
}

/// A finalized program: optimized instructions plus the offset reach that
/// sizes the danger zones.
#[derive(Debug)]
pub struct Program {
    pub insns: Vec<Insn>,
    pub max_off: u64,
}

impl Program {
    /// Parse, optimize at `level` and finalize `src`.
    pub fn compile(src: &[u8], level: u8) -> Result<Program, Error> {
        let insns = parse(src);
        let mut insns = opt::optimize(&insns, level);
        finalize(&mut insns)?;
        let max_off = max_cell_offset(&insns);
        Ok(Program { insns, max_off })
    }
}
