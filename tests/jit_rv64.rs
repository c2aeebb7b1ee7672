//! Jit parity on riscv64 hosts.
#![cfg(target_arch = "riscv64")]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use brainlift::io::{set_jit_io, take_jit_io, BfIo, BufIo};
use brainlift::{interp, jit, Cell, Program, Tape};

fn jit_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Default)]
struct SharedIo {
    input: Arc<Mutex<VecDeque<u8>>>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl BfIo for SharedIo {
    fn read(&mut self) -> u8 {
        self.input.lock().unwrap().pop_front().unwrap_or(0)
    }

    fn print(&mut self, byte: u8) {
        self.output.lock().unwrap().push(byte);
    }
}

fn parity<T: Cell>(src: &[u8], input: &[u8]) {
    let _guard = jit_lock();
    for level in 0..=4 {
        let prog = Program::compile(src, level).unwrap();

        let mut tape = Tape::<T>::new(256, 0).unwrap();
        tape.grow_danger_zone(prog.max_off).unwrap();
        let io = SharedIo {
            input: Arc::new(Mutex::new(input.iter().copied().collect())),
            output: Arc::default(),
        };
        set_jit_io(Box::new(io.clone()));
        jit::run(&prog.insns, &mut tape).unwrap();
        take_jit_io();
        let jit_out = io.output.lock().unwrap().clone();
        let jit_index = tape.index();

        let mut tape = Tape::<T>::new(256, 0).unwrap();
        tape.grow_danger_zone(prog.max_off).unwrap();
        let mut ref_io = BufIo::new(input, 0);
        interp::run(&prog.insns, &mut tape, &mut ref_io, None, None);

        assert_eq!(jit_out, ref_io.output, "level {level}");
        assert_eq!(jit_index, tape.index(), "level {level}");
    }
}

#[test]
fn scenarios_match_interpreter() {
    parity::<u8>(b"++++++++[>++++++++<-]>+.", b"");
    parity::<u8>(b",[.,]", b"hi\n");
    parity::<u8>(b"+[-]+++++.", b"");
    parity::<u8>(b">+<[->+<]>.", b"");
    parity::<u8>(b"++>+++[<+>-]<.", b"");
}

#[test]
fn all_widths_match_interpreter() {
    parity::<u8>(b"+++[>++++++[>+++++++<-]<-]>>.", b"");
    parity::<u16>(b"+++[>++++++[>+++++++<-]<-]>>.", b"");
    parity::<u32>(b"+++[>++++++[>+++++++<-]<-]>>.", b"");
    parity::<u64>(b"+++[>++++++[>+++++++<-]<-]>>.", b"");
}

#[test]
fn mac_multipliers_use_mul() {
    // Multiplier 7 requires the M extension path.
    parity::<u8>(b"++++[>+++++++<-]>.", b"");
}
