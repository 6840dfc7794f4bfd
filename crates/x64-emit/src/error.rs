//! Error types for emission, patching and executable-memory acquisition.

use alloc::string::String;
use core::fmt;

/// Emission or patching failure.
///
/// Every variant describes a caller bug or an exhausted resource. The
/// emitter checks all of them before touching the arena, so a returned error
/// always means that no byte was written.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EmitError {
    /// Writing would run past the end of the arena.
    CapacityExceeded {
        /// Bytes the operation needed.
        requested: usize,
        /// Bytes left between the frontier and the end of the arena.
        available: usize,
    },

    /// An operand the addressing mode cannot represent, or a mnemonic used
    /// with an addressing mode it has no opcode for.
    InvalidOperand {
        /// Description of what was wrong.
        detail: String,
    },

    /// A relative branch target does not fit the requested displacement
    /// width.
    DisplacementOutOfRange {
        /// The displacement that was computed.
        disp: i64,
        /// Largest magnitude the form can encode.
        max: i64,
    },

    /// The bytes at a patch site do not look like the branch being patched.
    PatchMismatch {
        /// Address of the claimed patch site.
        addr: u64,
        /// Human-readable opcode pattern that was expected.
        expected: String,
        /// The opcode bytes actually found (first two, zero-padded).
        found: [u8; 2],
    },

    /// An address range lies outside the emitted part of the arena.
    AddressOutOfBounds {
        /// Start of the range.
        addr: u64,
        /// Length of the range in bytes.
        len: usize,
    },

    /// The operating system refused to provide or re-protect memory.
    OsError {
        /// The failing call (`mmap`, `mprotect`).
        op: String,
        /// `errno` reported by the call.
        errno: i32,
    },
}

impl EmitError {
    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        EmitError::InvalidOperand {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitError::CapacityExceeded {
                requested,
                available,
            } => {
                write!(
                    f,
                    "code block capacity exceeded: {} bytes requested, {} available",
                    requested, available
                )
            }
            EmitError::InvalidOperand { detail } => {
                write!(f, "invalid operand: {}", detail)
            }
            EmitError::DisplacementOutOfRange { disp, max } => {
                write!(
                    f,
                    "branch displacement {} out of range (max=±{})",
                    disp, max
                )
            }
            EmitError::PatchMismatch {
                addr,
                expected,
                found,
            } => {
                write!(
                    f,
                    "patch site {:#x} does not hold {} (found {:02X} {:02X})",
                    addr, expected, found[0], found[1]
                )
            }
            EmitError::AddressOutOfBounds { addr, len } => {
                write!(
                    f,
                    "address range {:#x}+{} is outside the emitted code",
                    addr, len
                )
            }
            EmitError::OsError { op, errno } => {
                write!(f, "{} failed (errno {})", op, errno)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EmitError {}
