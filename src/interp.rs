//! Direct bytecode interpreter.

use crate::cell::Cell;
use crate::insn::{Insn, Op};
use crate::io::BfIo;
use crate::profile::Profile;
use crate::tape::Tape;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The program ran to completion.
    Completed,
    /// The instruction budget was exhausted; not an error.
    BudgetExhausted,
}

/// Interpreter over a finalized instruction stream.
///
/// Jump targets are absolute program-counter indices; all cell arithmetic
/// wraps at the cell width. `budget` bounds the number of executed
/// instructions, `profile` records per-pc counters when given.
pub fn run<T: Cell>(
    insns: &[Insn],
    tape: &mut Tape<T>,
    io: &mut dyn BfIo,
    budget: Option<u64>,
    mut profile: Option<&mut Profile>,
) -> RunExit {
    let mut pc = 0;
    let mut budget = budget;
    while let Some(&Insn { off, op }) = insns.get(pc) {
        if let Some(left) = budget.as_mut() {
            if *left == 0 {
                io.flush();
                return RunExit::BudgetExhausted;
            }
            *left -= 1;
        }

        // Taken jumps reassign pc; the profile is keyed by the executed
        // instruction, not its target.
        let fetch_pc = pc;
        let mut touched = None;
        let mut value = None;
        match op {
            Op::Add(v) => {
                let cell = tape.load(off).wrapping_add_i64(v);
                tape.store(off, cell);
                (touched, value) = (Some(off), Some(cell.to_u64()));
            }
            Op::Move(v) => tape.move_by(v),
            Op::Print => {
                let cell = tape.load(off);
                io.print(cell.to_u8());
                (touched, value) = (Some(off), Some(cell.to_u64()));
            }
            Op::Read => {
                let cell = T::from_i64(io.read() as i64);
                tape.store(off, cell);
                (touched, value) = (Some(off), Some(cell.to_u64()));
            }
            Op::JumpForward(addr) => {
                let cell = tape.load(off);
                if cell.is_zero() {
                    pc = addr;
                }
                (touched, value) = (Some(off), Some(cell.to_u64()));
            }
            Op::JumpBack(addr) => {
                let cell = tape.load(off);
                if !cell.is_zero() {
                    pc = addr;
                }
                (touched, value) = (Some(off), Some(cell.to_u64()));
            }
            Op::Set(v) => {
                let cell = T::from_i64(v);
                tape.store(off, cell);
                (touched, value) = (Some(off), Some(cell.to_u64()));
            }
            Op::Mac { offset, multiplier } => {
                let src = tape.load(off);
                let dst = tape.load(offset).wrapping_add(src.wrapping_mul_i64(multiplier));
                tape.store(offset, dst);
                (touched, value) = (Some(offset), Some(dst.to_u64()));
            }
        }

        if let Some(profile) = profile.as_deref_mut() {
            profile.record(fetch_pc, touched.map(|off| tape.index() as i64 + off), value);
        }

        pc += 1;
    }
    io.flush();
    RunExit::Completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::BufIo;
    use crate::parse::Program;

    fn run8(src: &[u8], input: &[u8], level: u8) -> (Vec<u8>, u8) {
        let prog = Program::compile(src, level).unwrap();
        let mut tape = Tape::<u8>::new(4096, 0).unwrap();
        tape.grow_danger_zone(prog.max_off).unwrap();
        let mut io = BufIo::new(input, 0);
        assert_eq!(run(&prog.insns, &mut tape, &mut io, None, None), RunExit::Completed);
        let current = tape.load(0);
        (io.output, current)
    }

    #[test]
    fn prints_uppercase_a() {
        for level in 0..=4 {
            let (out, current) = run8(b"++++++++[>++++++++<-]>+.", b"", level);
            assert_eq!(out, b"A", "level {level}");
            assert_eq!(current, 65, "level {level}");
        }
    }

    #[test]
    fn echoes_input() {
        for level in 0..=4 {
            let (out, _) = run8(b",[.,]", b"hi\n", level);
            assert_eq!(out, b"hi\n", "level {level}");
        }
    }

    #[test]
    fn budget_stops_infinite_loop() {
        let prog = Program::compile(b"+[]", 0).unwrap();
        let mut tape = Tape::<u8>::new(64, 0).unwrap();
        let mut io = BufIo::new(b"", 0);
        let exit = run(&prog.insns, &mut tape, &mut io, Some(10_000), None);
        assert_eq!(exit, RunExit::BudgetExhausted);
    }

    #[test]
    fn profile_counts_executions() {
        let prog = Program::compile(b"+++.", 0).unwrap();
        let mut tape = Tape::<u8>::new(64, 0).unwrap();
        let mut io = BufIo::new(b"", 0);
        let mut profile = Profile::new(prog.insns.len());
        run(&prog.insns, &mut tape, &mut io, None, Some(&mut profile));
        assert_eq!(profile.counts, vec![1, 1, 1, 1]);
        assert_eq!(profile.max_value, 3);
    }

    #[test]
    fn profile_credits_taken_jumps_to_their_own_pc() {
        // ++[-] : the `]` at pc 4 is taken once and falls through once; both
        // executions must land on its own counter, not on the `[` target.
        let prog = Program::compile(b"++[-]", 0).unwrap();
        let mut tape = Tape::<u8>::new(64, 0).unwrap();
        let mut io = BufIo::new(b"", 0);
        let mut profile = Profile::new(prog.insns.len());
        run(&prog.insns, &mut tape, &mut io, None, Some(&mut profile));
        assert_eq!(profile.counts, vec![1, 1, 1, 2, 2]);
    }

    #[test]
    fn wide_cells_wrap_at_width() {
        let prog = Program::compile(b"-", 1).unwrap();
        let mut tape = Tape::<u16>::new(64, 0).unwrap();
        let mut io = BufIo::new(b"", 0);
        run(&prog.insns, &mut tape, &mut io, None, None);
        assert_eq!(tape.load(0), u16::MAX);
    }
}
