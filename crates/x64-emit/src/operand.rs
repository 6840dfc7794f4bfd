//! Operand types: registers, condition codes, operand sizes, memory
//! references and segment overrides.

use core::fmt;

use crate::error::EmitError;

/// A general-purpose x86-64 register, numbered 0–15.
///
/// The number is the hardware encoding: the low three bits go into ModRM,
/// SIB or the opcode byte, and bit 3 becomes a REX extension bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reg(u8);

/// Accumulator.
pub const RAX: Reg = Reg(0);
/// Counter; the implicit shift count register (`CL`).
pub const RCX: Reg = Reg(1);
/// Data.
pub const RDX: Reg = Reg(2);
/// Base.
pub const RBX: Reg = Reg(3);
/// Stack pointer. Cannot be an index register.
pub const RSP: Reg = Reg(4);
/// Frame pointer. As a base it always needs a displacement byte.
pub const RBP: Reg = Reg(5);
/// Source index.
pub const RSI: Reg = Reg(6);
/// Destination index.
pub const RDI: Reg = Reg(7);
/// Extended register.
pub const R8: Reg = Reg(8);
/// Extended register.
pub const R9: Reg = Reg(9);
/// Extended register.
pub const R10: Reg = Reg(10);
/// Extended register.
pub const R11: Reg = Reg(11);
/// Extended register. Shares the RSP encoding, so as a base it needs SIB.
pub const R12: Reg = Reg(12);
/// Extended register. Shares the RBP encoding, so as a base it needs a
/// displacement byte.
pub const R13: Reg = Reg(13);
/// Extended register.
pub const R14: Reg = Reg(14);
/// Extended register.
pub const R15: Reg = Reg(15);

/// The register the emitter is allowed to clobber when it synthesizes
/// multi-instruction sequences (far jumps and calls, 64-bit immediates).
///
/// Callers must never keep a live value in it across an emitter call that
/// documents a clobber. Operations that would use it both as an operand and
/// as their temporary are rejected with [`EmitError::InvalidOperand`].
pub const SCRATCH: Reg = R10;

/// Integer argument registers of the System V AMD64 calling convention.
pub const ARG_REGS: [Reg; 6] = [RDI, RSI, RDX, RCX, R8, R9];

const NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

impl Reg {
    /// Build a register from its hardware number.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::InvalidOperand`] for numbers above 15.
    pub fn new(num: u8) -> Result<Reg, EmitError> {
        if num < 16 {
            Ok(Reg(num))
        } else {
            Err(EmitError::invalid(alloc::format!(
                "register number {} out of range 0..=15",
                num
            )))
        }
    }

    /// Full 4-bit register number.
    #[inline]
    pub const fn num(self) -> u8 {
        self.0
    }

    /// Low three bits, as placed in ModRM/SIB/opcode fields.
    #[inline]
    pub const fn low3(self) -> u8 {
        self.0 & 7
    }

    /// Whether the register needs a REX extension bit (R8–R15).
    #[inline]
    pub const fn is_extended(self) -> bool {
        self.0 & 8 != 0
    }

    /// Whether the low byte of this register (SPL/BPL/SIL/DIL) is only
    /// reachable with a REX prefix. Without REX, encodings 4–7 select
    /// AH/CH/DH/BH instead.
    #[inline]
    pub const fn needs_rex_for_byte(self) -> bool {
        self.0 >= 4 && self.0 <= 7
    }

    /// Whether this is the reserved scratch register.
    #[inline]
    pub const fn is_scratch(self) -> bool {
        self.0 == SCRATCH.0
    }

    /// All sixteen registers in encoding order.
    pub fn all() -> impl Iterator<Item = Reg> {
        (0..16u8).map(Reg)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(NAMES[self.0 as usize])
    }
}

/// Operand size of an instruction. Selects whether REX.W is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpSize {
    /// 32-bit operation; writes zero the upper half of the destination.
    Dword,
    /// 64-bit operation.
    #[default]
    Qword,
}

impl fmt::Display for OpSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpSize::Dword => write!(f, "dword"),
            OpSize::Qword => write!(f, "qword"),
        }
    }
}

/// Segment-override prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Segment {
    /// `FS:` override (0x64); thread-local storage on Linux.
    Fs,
    /// `GS:` override (0x65).
    Gs,
}

impl Segment {
    /// The prefix byte.
    #[inline]
    pub const fn prefix(self) -> u8 {
        match self {
            Segment::Fs => 0x64,
            Segment::Gs => 0x65,
        }
    }
}

/// x86 condition code, as folded into the low nibble of `Jcc`, `SETcc` and
/// `CMOVcc` opcodes.
///
/// Aliases (`Z` for `E`, `NAE` for `B`, …) are associated constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Cond {
    /// Overflow.
    O = 0x0,
    /// No overflow.
    NO = 0x1,
    /// Below (unsigned `<`), carry set.
    B = 0x2,
    /// Above or equal (unsigned `>=`), carry clear.
    AE = 0x3,
    /// Equal, zero set.
    E = 0x4,
    /// Not equal, zero clear.
    NE = 0x5,
    /// Below or equal (unsigned `<=`).
    BE = 0x6,
    /// Above (unsigned `>`).
    A = 0x7,
    /// Sign set.
    S = 0x8,
    /// Sign clear.
    NS = 0x9,
    /// Parity even.
    P = 0xA,
    /// Parity odd.
    NP = 0xB,
    /// Less (signed `<`).
    L = 0xC,
    /// Greater or equal (signed `>=`).
    GE = 0xD,
    /// Less or equal (signed `<=`).
    LE = 0xE,
    /// Greater (signed `>`).
    G = 0xF,
}

// Alternate mnemonics.
impl Cond {
    /// Alias for `E`.
    pub const Z: Cond = Cond::E;
    /// Alias for `NE`.
    pub const NZ: Cond = Cond::NE;
    /// Alias for `B`.
    pub const NAE: Cond = Cond::B;
    /// Alias for `B`.
    pub const C: Cond = Cond::B;
    /// Alias for `AE`.
    pub const NB: Cond = Cond::AE;
    /// Alias for `AE`.
    pub const NC: Cond = Cond::AE;
    /// Alias for `BE`.
    pub const NA: Cond = Cond::BE;
    /// Alias for `A`.
    pub const NBE: Cond = Cond::A;
    /// Alias for `P`.
    pub const PE: Cond = Cond::P;
    /// Alias for `NP`.
    pub const PO: Cond = Cond::NP;
    /// Alias for `L`.
    pub const NGE: Cond = Cond::L;
    /// Alias for `GE`.
    pub const NL: Cond = Cond::GE;
    /// Alias for `LE`.
    pub const NG: Cond = Cond::LE;
    /// Alias for `G`.
    pub const NLE: Cond = Cond::G;
}

impl Cond {
    const ALL: [Cond; 16] = [
        Cond::O,
        Cond::NO,
        Cond::B,
        Cond::AE,
        Cond::E,
        Cond::NE,
        Cond::BE,
        Cond::A,
        Cond::S,
        Cond::NS,
        Cond::P,
        Cond::NP,
        Cond::L,
        Cond::GE,
        Cond::LE,
        Cond::G,
    ];

    /// The 4-bit condition encoding.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Condition for the encoding `code & 0xF`.
    #[inline]
    pub const fn from_code(code: u8) -> Cond {
        Cond::ALL[(code & 0xF) as usize]
    }

    /// The opposite condition. Flipping bit 0 inverts every x86 condition.
    #[inline]
    pub const fn negate(self) -> Cond {
        Cond::from_code(self.code() ^ 1)
    }

    /// All sixteen conditions in encoding order.
    pub fn all() -> impl Iterator<Item = Cond> {
        Cond::ALL.into_iter()
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::O => "o",
            Cond::NO => "no",
            Cond::B => "b",
            Cond::AE => "ae",
            Cond::E => "e",
            Cond::NE => "ne",
            Cond::BE => "be",
            Cond::A => "a",
            Cond::S => "s",
            Cond::NS => "ns",
            Cond::P => "p",
            Cond::NP => "np",
            Cond::L => "l",
            Cond::GE => "ge",
            Cond::LE => "le",
            Cond::G => "g",
        };
        f.write_str(s)
    }
}

/// A memory operand: `[base + index*scale + disp]`, or `[rip + disp]`.
///
/// Use the constructors; they cover every form the encoder supports.
/// Validation (scale and index register) happens at encode time so that
/// operands can be built in `const` context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemRef {
    /// Base register, or `None` for an absolute 32-bit displacement.
    pub base: Option<Reg>,
    /// Index register for SIB addressing.
    pub index: Option<Reg>,
    /// Index scale: 1, 2, 4 or 8.
    pub scale: u8,
    /// Signed displacement.
    pub disp: i32,
    /// Displacement is relative to the next instruction (`[rip + disp]`).
    /// Only meaningful without base and index.
    pub rip_relative: bool,
}

impl MemRef {
    /// `[base + disp]`.
    #[inline]
    pub const fn base_disp(base: Reg, disp: i32) -> MemRef {
        MemRef {
            base: Some(base),
            index: None,
            scale: 1,
            disp,
            rip_relative: false,
        }
    }

    /// `[base + index*scale + disp]`.
    #[inline]
    pub const fn sib(base: Reg, index: Reg, scale: u8, disp: i32) -> MemRef {
        MemRef {
            base: Some(base),
            index: Some(index),
            scale,
            disp,
            rip_relative: false,
        }
    }

    /// `[index*scale + disp]`, no base register.
    #[inline]
    pub const fn index_disp(index: Reg, scale: u8, disp: i32) -> MemRef {
        MemRef {
            base: None,
            index: Some(index),
            scale,
            disp,
            rip_relative: false,
        }
    }

    /// `[disp32]`: absolute address in the low 2 GiB (sign-extended).
    #[inline]
    pub const fn absolute(disp: i32) -> MemRef {
        MemRef {
            base: None,
            index: None,
            scale: 1,
            disp,
            rip_relative: false,
        }
    }

    /// `[rip + disp]`, relative to the end of the instruction.
    #[inline]
    pub const fn rip(disp: i32) -> MemRef {
        MemRef {
            base: None,
            index: None,
            scale: 1,
            disp,
            rip_relative: true,
        }
    }

    /// Whether the base or index register is the given register.
    #[inline]
    pub fn uses(&self, reg: Reg) -> bool {
        self.base == Some(reg) || self.index == Some(reg)
    }

    /// Check the operand is encodable.
    pub(crate) fn validate(&self) -> Result<(), EmitError> {
        if !matches!(self.scale, 1 | 2 | 4 | 8) {
            return Err(EmitError::invalid(alloc::format!(
                "scale {} is not one of 1, 2, 4, 8",
                self.scale
            )));
        }
        if self.index == Some(RSP) {
            return Err(EmitError::invalid("rsp cannot be used as an index register"));
        }
        if self.rip_relative && (self.base.is_some() || self.index.is_some()) {
            return Err(EmitError::invalid(
                "rip-relative operands take no base or index register",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for MemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        let mut first = true;
        if self.rip_relative {
            f.write_str("rip")?;
            first = false;
        }
        if let Some(base) = self.base {
            write!(f, "{}", base)?;
            first = false;
        }
        if let Some(index) = self.index {
            if !first {
                f.write_str("+")?;
            }
            write!(f, "{}*{}", index, self.scale)?;
            first = false;
        }
        if first {
            write!(f, "{:#x}", self.disp)?;
        } else if self.disp < 0 {
            write!(f, "-{:#x}", self.disp.unsigned_abs())?;
        } else if self.disp > 0 {
            write!(f, "+{:#x}", self.disp)?;
        }
        f.write_str("]")
    }
}
