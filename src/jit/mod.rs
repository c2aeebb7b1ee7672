//! Native-code execution.
//!
//! The architecture-neutral driver picks a back-end for the host, moves the
//! emitted code into an executable mapping and calls it with the tape
//! pointer and the I/O callbacks. Code pages follow W^X: written while
//! writable, executed only after the write permission is dropped.

use std::num::NonZeroUsize;

use nix::sys::mman::{mmap, mprotect, munmap, MapFlags, ProtFlags};

use crate::cell::Cell;
use crate::error::Error;
use crate::insn::Insn;
use crate::io;
use crate::tape::Tape;

pub mod rv64;
pub mod x86_64;

/// `read` callback type: returns the next input byte.
pub type ReadFn = extern "C" fn() -> u8;
/// `print` callback type: outputs one byte.
pub type PrintFn = extern "C" fn(u8);

/// Signature of a compiled program: takes the cell pointer and the two I/O
/// callbacks, returns the final cell pointer.
type Entry = unsafe extern "C" fn(*mut libc::c_void, ReadFn, PrintFn) -> *mut libc::c_void;

/// Jit target architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    Rv64,
}

impl TargetArch {
    /// The host architecture, if the jit supports it.
    pub fn host() -> Result<TargetArch, Error> {
        if cfg!(target_arch = "x86_64") {
            Ok(TargetArch::X86_64)
        } else if cfg!(target_arch = "riscv64") {
            Ok(TargetArch::Rv64)
        } else {
            Err(Error::UnsupportedArchitecture)
        }
    }
}

/// Compile a finalized program for `arch`.
///
/// Pure byte emission; works for any target on any host, only [`run`] needs
/// the host to match.
pub fn compile(
    insns: &[Insn],
    width: crate::CellWidth,
    arch: TargetArch,
) -> Result<Vec<u8>, Error> {
    match arch {
        TargetArch::X86_64 => x86_64::compile(insns, width),
        TargetArch::Rv64 => rv64::compile(insns, width),
    }
}

/// An executable mapping holding emitted code.
pub struct CodeBuf {
    buf: *mut libc::c_void,
    len: usize,
}

impl CodeBuf {
    /// Map fresh writable pages, copy `code` in and flip them to
    /// read-execute.
    pub fn new(code: &[u8]) -> Result<CodeBuf, Error> {
        let len = code.len().max(1).next_multiple_of(4096);
        let buf = unsafe {
            mmap(
                None,
                NonZeroUsize::new(len).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                0, /* fd */
                0, /* off */
            )?
        };
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), buf.cast(), code.len());
            mprotect(buf, len, ProtFlags::PROT_READ | ProtFlags::PROT_EXEC)?;
        }
        Ok(CodeBuf { buf, len })
    }

    /// Entry point of the mapped code.
    ///
    /// # Safety
    ///
    /// The mapped bytes must be a complete program emitted by [`compile`]
    /// for the host architecture.
    pub unsafe fn entry(&self) -> Entry {
        unsafe { std::mem::transmute(self.buf) }
    }
}

impl Drop for CodeBuf {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.buf, self.len);
        }
    }
}

/// Compile for the host and execute against `tape`, routing I/O through the
/// process-wide jit callbacks. The tape's data pointer is updated from the
/// returned value.
pub fn run<T: Cell>(insns: &[Insn], tape: &mut Tape<T>) -> Result<(), Error> {
    let code = compile(insns, T::WIDTH, TargetArch::host()?)?;
    let buf = CodeBuf::new(&code)?;
    let entry = unsafe { buf.entry() };
    let ret = unsafe { entry(tape.data_ptr().cast(), io::jit_read, io::jit_print) };
    tape.set_data_ptr(ret.cast());
    Ok(())
}
