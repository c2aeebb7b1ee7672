//! Program I/O.
//!
//! The interpreter talks to a [`BfIo`] implementation directly; jit-compiled
//! code calls back through the `extern "C"` shims at the bottom, which route
//! to a process-wide [`BfIo`] instance. [`StdIo`] is the production
//! implementation, [`BufIo`] backs tests and transcript capture.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Mutex;

/// Byte-oriented input and output of a running brainfuck program.
pub trait BfIo {
    /// Next input byte, or the configured EOF byte once input is exhausted.
    fn read(&mut self) -> u8;
    /// Best-effort write of one byte to the output.
    fn print(&mut self, byte: u8);
    /// Flush any buffered output.
    fn flush(&mut self) {}
}

/// Blocking line-buffered stdin/stdout.
///
/// End of input is signaled once by returning the EOF byte; a second read
/// past EOF flushes pending output and exits the process with status 1.
pub struct StdIo {
    eof_byte: u8,
    eof_seen: bool,
    pending: VecDeque<u8>,
    out: Vec<u8>,
}

impl StdIo {
    pub fn new(eof_byte: u8) -> StdIo {
        StdIo { eof_byte, eof_seen: false, pending: VecDeque::new(), out: Vec::new() }
    }
}

impl Default for StdIo {
    fn default() -> StdIo {
        StdIo::new(0)
    }
}

impl BfIo for StdIo {
    fn read(&mut self) -> u8 {
        if let Some(byte) = self.pending.pop_front() {
            return byte;
        }
        // Reads block per line; a terminal user typed a full line anyway and
        // pipes get drained in page-sized chunks.
        self.flush();
        let mut buf = [0u8; 4096];
        match std::io::stdin().read(&mut buf) {
            Ok(0) | Err(_) => {
                if self.eof_seen {
                    self.flush();
                    std::process::exit(1);
                }
                self.eof_seen = true;
                self.eof_byte
            }
            Ok(n) => {
                self.pending.extend(&buf[..n]);
                // Not empty, n > 0.
                self.pending.pop_front().unwrap()
            }
        }
    }

    fn print(&mut self, byte: u8) {
        self.out.push(byte);
        if byte == b'\n' || self.out.len() >= 4096 {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if !self.out.is_empty() {
            let _ = std::io::stdout().write_all(&self.out);
            let _ = std::io::stdout().flush();
            self.out.clear();
        }
    }
}

impl Drop for StdIo {
    fn drop(&mut self) {
        self.flush();
    }
}

/// In-memory I/O over byte buffers.
pub struct BufIo {
    input: VecDeque<u8>,
    pub output: Vec<u8>,
    eof_byte: u8,
}

impl BufIo {
    pub fn new(input: &[u8], eof_byte: u8) -> BufIo {
        BufIo { input: input.iter().copied().collect(), output: Vec::new(), eof_byte }
    }
}

impl BfIo for BufIo {
    fn read(&mut self) -> u8 {
        self.input.pop_front().unwrap_or(self.eof_byte)
    }

    fn print(&mut self, byte: u8) {
        self.output.push(byte);
    }
}

// -- Callbacks for jit-compiled code.
//
// The entry function receives these per the platform calling convention; they
// forward to whatever BfIo is installed. The core is single-threaded, the
// mutex only satisfies static safety.

static JIT_IO: Mutex<Option<Box<dyn BfIo + Send>>> = Mutex::new(None);

/// Install the I/O routed to jit-compiled code. Returns the previous one.
pub fn set_jit_io(io: Box<dyn BfIo + Send>) -> Option<Box<dyn BfIo + Send>> {
    JIT_IO.lock().unwrap().replace(io)
}

/// Remove and return the installed jit I/O, flushing it first.
pub fn take_jit_io() -> Option<Box<dyn BfIo + Send>> {
    let mut io = JIT_IO.lock().unwrap().take();
    if let Some(io) = io.as_mut() {
        io.flush();
    }
    io
}

fn with_jit_io<R>(f: impl FnOnce(&mut dyn BfIo) -> R) -> R {
    let mut guard = JIT_IO.lock().unwrap();
    let io = guard.get_or_insert_with(|| Box::new(StdIo::default()));
    f(io.as_mut())
}

/// `read` callback passed to jit-compiled programs.
pub extern "C" fn jit_read() -> u8 {
    with_jit_io(|io| io.read())
}

/// `print` callback passed to jit-compiled programs.
pub extern "C" fn jit_print(byte: u8) {
    with_jit_io(|io| io.print(byte))
}
