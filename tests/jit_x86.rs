//! Jit parity: compiled programs must match the interpreter byte for byte.
//! Host-specific; these tests only exist on x86-64.
#![cfg(target_arch = "x86_64")]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use brainlift::io::{set_jit_io, take_jit_io, BfIo, BufIo};
use brainlift::{interp, jit, Cell, Program, Tape};

/// The jit callbacks route through process-wide state; hold this while a
/// compiled program runs.
fn jit_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Buffer-backed I/O whose handles survive handing ownership to the jit.
#[derive(Clone, Default)]
struct SharedIo {
    input: Arc<Mutex<VecDeque<u8>>>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl SharedIo {
    fn new(input: &[u8]) -> SharedIo {
        SharedIo {
            input: Arc::new(Mutex::new(input.iter().copied().collect())),
            output: Arc::default(),
        }
    }

    fn output(&self) -> Vec<u8> {
        self.output.lock().unwrap().clone()
    }
}

impl BfIo for SharedIo {
    fn read(&mut self) -> u8 {
        self.input.lock().unwrap().pop_front().unwrap_or(0)
    }

    fn print(&mut self, byte: u8) {
        self.output.lock().unwrap().push(byte);
    }
}

/// Run `src` under the jit; returns output, the final tape image and the
/// final cell index.
fn run_jit<T: Cell>(src: &[u8], input: &[u8], level: u8) -> (Vec<u8>, Vec<u64>, isize) {
    let prog = Program::compile(src, level).unwrap();
    let mut tape = Tape::<T>::new(256, 0).unwrap();
    tape.grow_danger_zone(prog.max_off).unwrap();

    let io = SharedIo::new(input);
    set_jit_io(Box::new(io.clone()));
    jit::run(&prog.insns, &mut tape).unwrap();
    take_jit_io();

    let index = tape.index();
    let image = (0..256).map(|i| tape.load(i - index as i64).to_u64()).collect();
    (io.output(), image, index)
}

fn run_interp<T: Cell>(src: &[u8], input: &[u8], level: u8) -> (Vec<u8>, Vec<u64>, isize) {
    let prog = Program::compile(src, level).unwrap();
    let mut tape = Tape::<T>::new(256, 0).unwrap();
    tape.grow_danger_zone(prog.max_off).unwrap();
    let mut io = BufIo::new(input, 0);
    interp::run(&prog.insns, &mut tape, &mut io, None, None);
    let index = tape.index();
    let image = (0..256).map(|i| tape.load(i - index as i64).to_u64()).collect();
    (io.output, image, index)
}

fn parity<T: Cell>(src: &[u8], input: &[u8]) {
    let _guard = jit_lock();
    for level in 0..=4 {
        let jit = run_jit::<T>(src, input, level);
        let reference = run_interp::<T>(src, input, level);
        assert_eq!(jit, reference, "level {level}");
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
fn hello_world_matches_interpreter() {
    let src = b"++++++++[>++++[>++>+++>+++>+<<<<-]>+>+>->>+[<]<-]\
                >>.>---.+++++++..+++.>>.<-.<.+++.------.--------.>>+.>++.";
    let _guard = jit_lock();
    for level in [0, 2, 4] {
        let (out, ..) = run_jit::<u8>(src, b"", level);
        assert_eq!(out, b"Hello World!\n", "level {level}");
    }
}

#[test]
fn all_widths_match_interpreter() {
    parity::<u8>(b"+++[>++++++[>+++++++<-]<-]>>.", b"");
    parity::<u16>(b"+++[>++++++[>+++++++<-]<-]>>.", b"");
    parity::<u32>(b"+++[>++++++[>+++++++<-]<-]>>.", b"");
    parity::<u64>(b"+++[>++++++[>+++++++<-]<-]>>.", b"");
}

#[test]
fn byte_wrapping_matches_interpreter() {
    // 300 pluses wrap the byte cell; mac multipliers exercise mul forms.
    let mut src = vec![b'+'; 300];
    src.extend_from_slice(b"[>+++++<-]>.");
    parity::<u8>(&src, b"");
    parity::<u16>(&src, b"");
}

#[test]
fn reads_feed_wider_cells() {
    parity::<u32>(b",>,[-<+>]<.", b"\x90\x70");
    parity::<u64>(b",>,[-<+>]<.", b"\xff\xff");
}

#[test]
fn final_pointer_round_trips() {
    let _guard = jit_lock();
    let (.., index) = run_jit::<u8>(b">>>><", b"", 0);
    assert_eq!(index, 3);
    let (.., index) = run_jit::<u8>(b">>>><", b"", 4);
    assert_eq!(index, 3);
}
