//! Error kinds surfaced by the parser, the bracket finalizer and the jit
//! back-ends.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The stream ended while a `[` was still open. Interactive mode treats
    /// this as a request for more input.
    #[error("unmatched '[' opened at instruction {0}")]
    UnmatchedJumpForward(usize),

    /// A `]` without a matching `[`.
    #[error("unmatched ']' at instruction {0}")]
    UnmatchedJumpBack(usize),

    /// The host is neither x86-64 nor riscv64; callers fall back to the
    /// interpreter.
    #[error("jit compilation is not supported on this architecture")]
    UnsupportedArchitecture,

    /// A displacement no longer fits the signed 32-bit form of the x86-64
    /// templates: a cell offset scaled by the cell size, a folded move, or a
    /// branch distance in an oversized program. Lowering the optimization
    /// level keeps offsets small.
    #[error("displacement {0} exceeds the signed 32-bit range, try a lower optimization level")]
    UnsupportedLargeOffset(i64),

    #[error("os error: {0}")]
    Os(#[from] nix::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
