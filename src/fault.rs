//! Process-wide fault handler for tape overruns.
//!
//! The tape publishes its current mapping here; a segfault whose address
//! falls inside that mapping is a danger-zone hit and turns into a warning
//! plus `exit(1)`. Any other fault restores the default disposition and
//! re-raises. Publication ordering: assign before pages are protected, clear
//! before the mapping is unmapped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static ACTIVE_BASE: AtomicUsize = AtomicUsize::new(0);
static ACTIVE_LEN: AtomicUsize = AtomicUsize::new(0);
static INSTALL: Once = Once::new();

/// Publish `base..base+len` as the active tape mapping.
pub(crate) fn set_active(base: *mut libc::c_void, len: usize) {
    ACTIVE_BASE.store(base as usize, Ordering::Relaxed);
    ACTIVE_LEN.store(len, Ordering::Relaxed);
}

/// Withdraw the active mapping, e.g. ahead of unmapping it.
pub(crate) fn clear_active() {
    ACTIVE_BASE.store(0, Ordering::Relaxed);
    ACTIVE_LEN.store(0, Ordering::Relaxed);
}

/// Withdraw the active mapping only if it still is `base`.
pub(crate) fn clear_active_if(base: *mut libc::c_void) {
    if ACTIVE_BASE.load(Ordering::Relaxed) == base as usize {
        clear_active();
    }
}

/// Install the fault handler. Call once at startup; later calls are no-ops.
pub fn install() {
    INSTALL.call_once(|| {
        let action = SigAction::new(
            SigHandler::SigAction(on_fault),
            SaFlags::SA_SIGINFO,
            SigSet::empty(),
        );
        unsafe {
            sigaction(Signal::SIGSEGV, &action).expect("failed to install SIGSEGV handler");
            // Some systems report accesses to PROT_NONE pages as SIGBUS.
            sigaction(Signal::SIGBUS, &action).expect("failed to install SIGBUS handler");
        }
    });
}

extern "C" fn on_fault(signal: libc::c_int, info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    // Async-signal-safe context: raw write(2) and _exit(2) only.
    #[cfg(target_os = "linux")]
    let addr = unsafe { (*info).si_addr() } as usize;
    #[cfg(not(target_os = "linux"))]
    let addr = unsafe { (*info).si_addr } as usize;
    let base = ACTIVE_BASE.load(Ordering::Relaxed);
    let len = ACTIVE_LEN.load(Ordering::Relaxed);

    if base != 0 && addr >= base && addr < base + len {
        const MSG: &[u8] = b"Reached end of tape\n";
        unsafe {
            libc::write(libc::STDERR_FILENO, MSG.as_ptr().cast(), MSG.len());
            libc::_exit(1);
        }
    }

    // Not our mapping: hand the fault back to the default handler, which
    // fires again on return to the faulting instruction.
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    if let Ok(signal) = Signal::try_from(signal) {
        unsafe {
            let _ = sigaction(signal, &default);
        }
    }
}
