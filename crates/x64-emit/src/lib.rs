//! # x64-emit: table-driven x86-64 emitter for JIT compilers
//!
//! `x64-emit` writes x86-64 machine code straight into a byte arena. There
//! is no text to parse and no intermediate representation: each call to a
//! mnemonic method encodes one instruction and appends it.
//!
//! ## Quick Start
//!
//! ```rust
//! use x64_emit::{DataBlock, X64Assembler, RAX, RDI};
//!
//! let mut a = X64Assembler::new(DataBlock::new(64).unwrap());
//! a.mov_reg64_reg64(RDI, RAX).unwrap();
//! a.add_imm32_reg64(1, RAX).unwrap();
//! a.ret().unwrap();
//! assert_eq!(a.code().as_slice(), &[0x48, 0x89, 0xF8, 0x48, 0x83, 0xC0, 0x01, 0xC3]);
//! ```
//!
//! ## Features
//!
//! - **Table-driven**: one [`Opcode`] descriptor per mnemonic drives every
//!   addressing mode through a single encoding engine.
//! - **Shortest forms**: imm8, accumulator and register-in-opcode encodings
//!   are picked automatically.
//! - **Patchable branches**: placeholders, aligned patch sites and atomic
//!   displacement rewrites.
//! - **Executable memory** (`std`, Unix): [`CodeBlock`] maps RWX pages.
//! - **`no_std` + `alloc`**: the encoder and heap arenas need no OS.

#![cfg_attr(not(feature = "std"), no_std)]
// ── Pedantic lint policy ─────────────────────────────────────────────────
// An encoder narrows and reinterprets integers all the time (i64→i32→u8,
// u64 addresses ↔ i64 immediates) and spells opcodes as bare hex.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::unreadable_literal,
    clippy::match_same_arms,
    clippy::wildcard_imports,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args,
    clippy::doc_markdown,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::return_self_not_must_use
)]

extern crate alloc;

/// Mnemonic façade: `X64Assembler` and its named operations.
pub mod assembler;
/// Byte arena with bump allocation and atomic rewrites.
pub mod block;
/// Direct/indirect branches, placeholders and patching.
pub mod branch;
/// Executable (RWX) arena backed by `mmap`.
#[cfg(all(unix, feature = "std"))]
pub mod code;
/// Encoding engine: REX, ModR/M, SIB, displacement and immediate selection.
pub mod encoder;
/// Error type shared by emission, patching and memory acquisition.
pub mod error;
/// Per-mnemonic opcode descriptors.
pub mod opcode;
/// Registers, condition codes, operand sizes and memory operands.
pub mod operand;

/// Absolute address of a byte inside an arena.
pub type CodeAddress = u64;

// Re-exports
pub use assembler::X64Assembler;
pub use block::{BlockOptions, DataBlock};
pub use branch::{CALL_LEN, JCC8_LEN, JCC_LEN, JMP8_LEN, JMP_LEN};
#[cfg(all(unix, feature = "std"))]
pub use code::{page_size, CodeBlock};
pub use encoder::{ImmSize, InstrBytes};
pub use error::EmitError;
pub use opcode::{OpFlags, Opcode};
pub use operand::{
    Cond, MemRef, OpSize, Reg, Segment, ARG_REGS, R10, R11, R12, R13, R14, R15, R8, R9, RAX, RBP,
    RBX, RCX, RDI, RDX, RSI, RSP, SCRATCH,
};
