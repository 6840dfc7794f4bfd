//! Opcode descriptor table.
//!
//! Every mnemonic the emitter knows is one `static` [`Opcode`]: six opcode
//! slots, one per addressing mode, plus a set of [`OpFlags`] that steer the
//! encoding engine. The engine never looks at mnemonic names; everything it
//! needs is in the descriptor.

use bitflags::bitflags;

bitflags! {
    /// Encoding hints attached to an [`Opcode`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpFlags: u16 {
        /// Register/memory operand order is reversed: the register operand
        /// is the destination (ModRM.reg), the r/m operand is the source.
        const REVERSE   = 0x0001;
        /// Opcode lives in the `0F` escape page.
        const TWO_BYTE  = 0x0002;
        /// Conditional jump; the condition selects the opcode.
        const JCC       = 0x0004;
        /// `imul` and its irregular slot usage.
        const IMUL      = 0x0008;
        /// A sign-extended 8-bit immediate form exists at `imm | 2`.
        const HAS_IMM8  = 0x0010;
        /// Shift or rotate; immediate is a single count byte.
        const SHIFT     = 0x0020;
        /// `ret`: the immediate is 16 bits.
        const RET       = 0x0040;
        /// Double-precision shift (`shld`/`shrd`).
        const SHIFTD    = 0x0080;
        /// Default operand size is 64 bits; never emit REX.W.
        const NO_REXW   = 0x0100;
        /// `mov`: may take a full 64-bit immediate.
        const MOV       = 0x0200;
        /// Register number is folded into the opcode byte.
        const COMPACT_R = 0x0400;
        /// Has a short accumulator-immediate form.
        const ACC       = 0x0800;
        /// `xchg`: has the `90+r` accumulator form.
        const XCHG      = 0x1000;
        /// Operates on a byte register; SPL/BPL/SIL/DIL need a bare REX.
        const BYTE_REG  = 0x2000;
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for OpFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.bits())
    }
}

/// One mnemonic's encoding descriptor.
///
/// Slot naming follows the addressing mode each byte serves. An absent
/// slot means the mnemonic has no encoding for that mode; asking the
/// engine for it is an error, never a placeholder byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Opcode {
    /// Mnemonic, for diagnostics and tracing.
    pub name: &'static str,
    /// `op r/m, reg`: register in ModRM.reg is the source.
    pub rm: Option<u8>,
    /// `op reg, r/m`: register in ModRM.reg is the destination.
    pub rm_rev: Option<u8>,
    /// Immediate form (`imm32`; `imm | 2` for `imm8` under `HAS_IMM8`).
    pub imm: Option<u8>,
    /// ModRM.reg opcode extension ("/digit") for single-operand forms.
    pub ext: u8,
    /// Accumulator-immediate short form.
    pub acc_imm: Option<u8>,
    /// Register-in-opcode short form.
    pub compact: Option<u8>,
    /// Encoding hints.
    pub flags: OpFlags,
}

impl Opcode {
    /// Whether all of `flags` are set.
    #[inline]
    pub const fn has(&self, flags: OpFlags) -> bool {
        self.flags.contains(flags)
    }
}

const fn op(
    name: &'static str,
    rm: Option<u8>,
    rm_rev: Option<u8>,
    imm: Option<u8>,
    ext: u8,
    acc_imm: Option<u8>,
    compact: Option<u8>,
    flags: OpFlags,
) -> Opcode {
    Opcode {
        name,
        rm,
        rm_rev,
        imm,
        ext,
        acc_imm,
        compact,
        flags,
    }
}

const fn f(bits: u16) -> OpFlags {
    OpFlags::from_bits_truncate(bits)
}

const NONE: Option<u8> = None;

// Flag shorthands for the table below.
const REV: u16 = OpFlags::REVERSE.bits();
const TWO: u16 = OpFlags::TWO_BYTE.bits();
const JCC: u16 = OpFlags::JCC.bits();
const IMUL_F: u16 = OpFlags::IMUL.bits();
const IMM8: u16 = OpFlags::HAS_IMM8.bits();
const SHIFT: u16 = OpFlags::SHIFT.bits();
const RET_F: u16 = OpFlags::RET.bits();
const SHIFTD: u16 = OpFlags::SHIFTD.bits();
const NOW: u16 = OpFlags::NO_REXW.bits();
const MOV_F: u16 = OpFlags::MOV.bits();
const CMP_R: u16 = OpFlags::COMPACT_R.bits();
const ACC: u16 = OpFlags::ACC.bits();
const XCHG_F: u16 = OpFlags::XCHG.bits();
const BYTE: u16 = OpFlags::BYTE_REG.bits();

// ─── Control flow ─────────────────────────────────────────────

/// Unconditional jump: `E9` rel32, `EB` rel8, `FF /4` indirect.
pub static JMP: Opcode = op("jmp", Some(0xFF), NONE, Some(0xE9), 4, Some(0xE9), NONE, f(ACC | NOW | IMM8));
/// Near call: `E8` rel32, `FF /2` indirect.
pub static CALL: Opcode = op("call", Some(0xFF), NONE, Some(0xE8), 2, Some(0xE8), NONE, f(ACC | NOW));
/// Conditional jump: `0F 80+cc` rel32, `70+cc` rel8.
pub static JCC_OP: Opcode = op("jcc", NONE, NONE, Some(0x80), 0, NONE, NONE, f(JCC | NOW | IMM8));
/// Near return, optionally popping an imm16 byte count.
pub static RET: Opcode = op("ret", NONE, NONE, Some(0xC2), 0, NONE, Some(0xC3), f(RET_F | CMP_R | NOW));

// ─── Stack ────────────────────────────────────────────────────

/// Push a register, memory operand or sign-extended immediate.
pub static PUSH: Opcode = op("push", Some(0xFF), NONE, Some(0x68), 6, NONE, Some(0x50), f(CMP_R | NOW | IMM8));
/// Pop into a register or memory operand.
pub static POP: Opcode = op("pop", Some(0x8F), NONE, NONE, 0, NONE, Some(0x58), f(CMP_R | NOW));

// ─── Unary ────────────────────────────────────────────────────

/// Increment by one.
pub static INC: Opcode = op("inc", Some(0xFF), NONE, NONE, 0, NONE, NONE, f(0));
/// Decrement by one.
pub static DEC: Opcode = op("dec", Some(0xFF), NONE, NONE, 1, NONE, NONE, f(0));
/// One's complement negation.
pub static NOT: Opcode = op("not", Some(0xF7), NONE, NONE, 2, NONE, NONE, f(0));
/// Two's complement negation.
pub static NEG: Opcode = op("neg", Some(0xF7), NONE, NONE, 3, NONE, NONE, f(0));

// ─── Binary ALU ───────────────────────────────────────────────

/// Integer addition.
pub static ADD: Opcode = op("add", Some(0x01), Some(0x03), Some(0x81), 0, Some(0x05), NONE, f(ACC | IMM8));
/// Bitwise or.
pub static OR: Opcode = op("or", Some(0x09), Some(0x0B), Some(0x81), 1, Some(0x0D), NONE, f(ACC | IMM8));
/// Addition with carry.
pub static ADC: Opcode = op("adc", Some(0x11), Some(0x13), Some(0x81), 2, Some(0x15), NONE, f(ACC | IMM8));
/// Subtraction with borrow.
pub static SBB: Opcode = op("sbb", Some(0x19), Some(0x1B), Some(0x81), 3, Some(0x1D), NONE, f(ACC | IMM8));
/// Bitwise and.
pub static AND: Opcode = op("and", Some(0x21), Some(0x23), Some(0x81), 4, Some(0x25), NONE, f(ACC | IMM8));
/// Integer subtraction.
pub static SUB: Opcode = op("sub", Some(0x29), Some(0x2B), Some(0x81), 5, Some(0x2D), NONE, f(ACC | IMM8));
/// Bitwise exclusive or.
pub static XOR: Opcode = op("xor", Some(0x31), Some(0x33), Some(0x81), 6, Some(0x35), NONE, f(ACC | IMM8));
/// Compare by subtraction, flags only.
pub static CMP: Opcode = op("cmp", Some(0x39), Some(0x3B), Some(0x81), 7, Some(0x3D), NONE, f(ACC | IMM8));
/// Compare by bitwise and, flags only.
pub static TEST: Opcode = op("test", Some(0x85), Some(0x85), Some(0xF7), 0, Some(0xA9), NONE, f(ACC));

// ─── Data movement ────────────────────────────────────────────

/// Move; the register form takes a full 64-bit immediate.
pub static MOV: Opcode = op("mov", Some(0x89), Some(0x8B), Some(0xC7), 0, NONE, Some(0xB8), f(MOV_F));
/// Load effective address.
pub static LEA: Opcode = op("lea", NONE, Some(0x8D), NONE, 0, NONE, NONE, f(0));
/// Exchange; `90+r` when one side is the accumulator.
pub static XCHG: Opcode = op("xchg", Some(0x87), Some(0x87), NONE, 0, NONE, Some(0x90), f(XCHG_F));
/// Sign-extend a 16-bit source.
pub static MOVSX16: Opcode = op("movswq", Some(0xBF), NONE, NONE, 0, NONE, NONE, f(REV | TWO));
/// Zero-extend a 16-bit source.
pub static MOVZX16: Opcode = op("movzwq", Some(0xB7), NONE, NONE, 0, NONE, NONE, f(REV | TWO));
/// Sign-extend an 8-bit source.
pub static MOVSX8: Opcode = op("movsbq", Some(0xBE), NONE, NONE, 0, NONE, NONE, f(BYTE | REV | TWO));
/// Zero-extend an 8-bit source.
pub static MOVZX8: Opcode = op("movzbq", Some(0xB6), NONE, NONE, 0, NONE, NONE, f(BYTE | REV | TWO));
/// Sign-extend a 32-bit source to 64 bits.
pub static MOVSXD: Opcode = op("movsxd", Some(0x63), NONE, NONE, 0, NONE, NONE, f(REV));
/// Sign-extend `rax` into `rdx:rax`.
pub static CQO: Opcode = op("cqo", NONE, NONE, NONE, 0, NONE, Some(0x99), f(CMP_R));
/// Sign-extend `eax` into `rax`.
pub static CDQE: Opcode = op("cdqe", NONE, NONE, NONE, 0, NONE, Some(0x98), f(CMP_R));

// ─── Multiply / divide ────────────────────────────────────────

/// Signed multiply: two-operand, three-operand with immediate, or one-operand.
pub static IMUL: Opcode = op("imul", Some(0xAF), Some(0xF7), Some(0x69), 5, NONE, NONE, f(REV | IMUL_F | IMM8));
/// Unsigned multiply of the accumulator.
pub static MUL: Opcode = op("mul", Some(0xF7), NONE, NONE, 4, NONE, NONE, f(0));
/// Unsigned divide of `rdx:rax`.
pub static DIV: Opcode = op("div", Some(0xF7), NONE, NONE, 6, NONE, NONE, f(0));
/// Signed divide of `rdx:rax`.
pub static IDIV: Opcode = op("idiv", Some(0xF7), NONE, NONE, 7, NONE, NONE, f(0));

// ─── Conditional ──────────────────────────────────────────────

/// Conditional move: `0F 40+cc`.
pub static CMOVCC: Opcode = op("cmovcc", Some(0x40), Some(0x40), NONE, 0, NONE, NONE, f(REV | TWO));
/// Set byte on condition: `0F 90+cc`.
pub static SETCC: Opcode = op("setcc", Some(0x90), NONE, NONE, 0, NONE, NONE, f(BYTE | NOW | TWO));

// ─── Shifts and rotates ───────────────────────────────────────

/// Rotate left.
pub static ROL: Opcode = op("rol", Some(0xD3), NONE, Some(0xC1), 0, NONE, NONE, f(SHIFT));
/// Rotate right.
pub static ROR: Opcode = op("ror", Some(0xD3), NONE, Some(0xC1), 1, NONE, NONE, f(SHIFT));
/// Rotate left through carry.
pub static RCL: Opcode = op("rcl", Some(0xD3), NONE, Some(0xC1), 2, NONE, NONE, f(SHIFT));
/// Rotate right through carry.
pub static RCR: Opcode = op("rcr", Some(0xD3), NONE, Some(0xC1), 3, NONE, NONE, f(SHIFT));
/// Logical shift left.
pub static SHL: Opcode = op("shl", Some(0xD3), NONE, Some(0xC1), 4, NONE, NONE, f(SHIFT));
/// Logical shift right.
pub static SHR: Opcode = op("shr", Some(0xD3), NONE, Some(0xC1), 5, NONE, NONE, f(SHIFT));
/// Arithmetic shift right.
pub static SAR: Opcode = op("sar", Some(0xD3), NONE, Some(0xC1), 7, NONE, NONE, f(SHIFT));
/// Double-precision shift left.
pub static SHLD: Opcode = op("shld", Some(0xA5), NONE, Some(0xA4), 0, NONE, NONE, f(SHIFTD | TWO));
/// Double-precision shift right.
pub static SHRD: Opcode = op("shrd", Some(0xAD), NONE, Some(0xAC), 0, NONE, NONE, f(SHIFTD | TWO));

// ─── Atomics ──────────────────────────────────────────────────

/// Exchange and add.
pub static XADD: Opcode = op("xadd", Some(0xC1), NONE, NONE, 0, NONE, NONE, f(TWO));
/// Compare and exchange with the accumulator.
pub static CMPXCHG: Opcode = op("cmpxchg", Some(0xB1), NONE, NONE, 0, NONE, NONE, f(TWO));

// ─── Misc ─────────────────────────────────────────────────────

/// One-byte no-op.
pub static NOP: Opcode = op("nop", NONE, NONE, NONE, 0, NONE, Some(0x90), f(CMP_R | NOW));
/// Breakpoint trap.
pub static INT3: Opcode = op("int3", NONE, NONE, NONE, 0, NONE, Some(0xCC), f(CMP_R | NOW));

/// Every descriptor, for table-wide checks.
pub static ALL: &[&Opcode] = &[
    &JMP, &CALL, &JCC_OP, &RET, &PUSH, &POP, &INC, &DEC, &NOT, &NEG, &ADD, &OR, &ADC, &SBB, &AND,
    &SUB, &XOR, &CMP, &TEST, &MOV, &LEA, &XCHG, &MOVSX16, &MOVZX16, &MOVSX8, &MOVZX8, &MOVSXD,
    &CQO, &CDQE, &IMUL, &MUL, &DIV, &IDIV, &CMOVCC, &SETCC, &ROL, &ROR, &RCL, &RCR, &SHL, &SHR,
    &SAR, &SHLD, &SHRD, &XADD, &CMPXCHG, &NOP, &INT3,
];
