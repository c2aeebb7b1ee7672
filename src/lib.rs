//! An optimizing brainfuck toolchain: multi-pass optimizer, bytecode
//! interpreter, x86-64 and RV64IMC jit compilers, C/Rust transpilers and a
//! page-guarded tape that turns overruns into a controlled exit.
//!
//! The following runs a program through the optimizer and the interpreter.
//! ```rust
//! use brainlift::{interp, io::BufIo, Program, RunExit, Tape};
//!
//! // Prints 'A': 8 * 8 + 1 = 65.
//! let src = b"++++++++[>++++++++<-]>+.";
//!
//! let prog = Program::compile(src, 4).unwrap();
//! let mut tape = Tape::<u8>::new(30_000, 0).unwrap();
//! tape.grow_danger_zone(prog.max_off).unwrap();
//!
//! let mut io = BufIo::new(b"", 0);
//! let exit = interp::run(&prog.insns, &mut tape, &mut io, None, None);
//! assert_eq!(exit, RunExit::Completed);
//! assert_eq!(io.output, b"A");
//! ```
//!
//! Native execution goes through [`jit::run`], which compiles for the host,
//! maps the code W^X and calls it with the tape pointer and the I/O
//! callbacks. On unsupported hosts it reports
//! [`Error::UnsupportedArchitecture`] and callers fall back to the
//! interpreter.

mod cell;
mod error;
mod insn;
mod opt;
mod parse;
mod tape;

pub mod fault;
pub mod interp;
pub mod io;
pub mod jit;
pub mod profile;
pub mod transpile;

pub use cell::{Cell, CellWidth};
pub use error::Error;
pub use insn::{Insn, Op};
pub use interp::RunExit;
pub use opt::optimize;
pub use parse::{finalize, max_cell_offset, parse, Program};
pub use tape::Tape;
