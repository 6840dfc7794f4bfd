//! Table-driven x86-64 encoding engine.
//!
//! Each `emit_*` function takes an [`Opcode`] descriptor plus one addressing
//! mode's operands and appends the complete instruction (REX, opcode, ModRM,
//! SIB, displacement, immediate) to an [`InstrBytes`]. Nothing here touches
//! the arena: the caller commits the finished buffer in one piece, so an
//! encoding error never leaves a half-written instruction behind.
//!
//! Operand order follows the "destination last" convention: in
//! [`emit_crr`], `r1` is the source and `r2` the destination unless the
//! descriptor is [`OpFlags::REVERSE`].

use crate::error::EmitError;
use crate::opcode::{OpFlags, Opcode};
use crate::operand::{Cond, MemRef, OpSize, Reg, RAX};

// ─── InstrBytes: stack-allocated instruction buffer ────────────────────

const CAPACITY: usize = 16;

/// Stack-allocated instruction byte buffer, so encoding never touches the
/// heap.
///
/// An x86-64 instruction is at most 15 bytes; the emitter's longest
/// single-buffer sequence (a 9-byte NOP, or `mov r10, imm64`) stays well
/// inside that.
#[derive(Clone)]
pub struct InstrBytes {
    data: [u8; CAPACITY],
    len: u8,
}

impl InstrBytes {
    /// Create an empty buffer.
    #[inline]
    pub const fn new() -> Self {
        Self {
            data: [0; CAPACITY],
            len: 0,
        }
    }

    /// Create a buffer pre-filled from a byte slice.
    #[inline]
    pub fn from_slice(src: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.extend_from_slice(src);
        buf
    }

    /// Append a single byte.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is already full.
    #[inline]
    pub fn push(&mut self, byte: u8) {
        assert!(
            (self.len as usize) < CAPACITY,
            "InstrBytes overflow: cannot push beyond {} bytes",
            CAPACITY
        );
        self.data[self.len as usize] = byte;
        self.len += 1;
    }

    /// Append a slice of bytes.
    ///
    /// # Panics
    ///
    /// Panics if appending would exceed the capacity.
    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let start = self.len as usize;
        let end = start + bytes.len();
        assert!(
            end <= CAPACITY,
            "InstrBytes overflow: {} + {} exceeds {}-byte capacity",
            start,
            bytes.len(),
            CAPACITY
        );
        self.data[start..end].copy_from_slice(bytes);
        self.len = end as u8;
    }

    /// Number of bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop all bytes.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for InstrBytes {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl core::ops::Deref for InstrBytes {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl AsRef<[u8]> for InstrBytes {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl core::fmt::Debug for InstrBytes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl PartialEq for InstrBytes {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl Eq for InstrBytes {}

impl PartialEq<[u8]> for InstrBytes {
    fn eq(&self, other: &[u8]) -> bool {
        **self == *other
    }
}

// ─── REX / ModR/M / SIB helpers ──────────────────────────────

const REX_W: u8 = 0x08;
const REX_R: u8 = 0x04;
const REX_X: u8 = 0x02;
const REX_B: u8 = 0x01;
/// Marker for "REX required even with no bits set" (byte registers 4–7).
const REX_FORCE: u8 = 0x40;

/// Push the REX prefix if any bit (or the force marker) is set.
#[inline]
fn push_rex(buf: &mut InstrBytes, rex: u8) {
    if rex != 0 {
        buf.push(0x40 | rex);
    }
}

#[inline]
fn rex_w(op: &Opcode, size: OpSize) -> u8 {
    if !op.has(OpFlags::NO_REXW) && size == OpSize::Qword {
        REX_W
    } else {
        0
    }
}

/// Build ModR/M byte.
#[inline]
pub(crate) fn modrm(mod_: u8, reg: u8, rm: u8) -> u8 {
    (mod_ << 6) | ((reg & 7) << 3) | (rm & 7)
}

/// Build SIB byte. `scale` must already be validated.
#[inline]
fn sib(scale: u8, index: u8, base: u8) -> u8 {
    let ss = match scale {
        1 => 0,
        2 => 1,
        4 => 2,
        _ => 3,
    };
    (ss << 6) | ((index & 7) << 3) | (base & 7)
}

#[inline]
fn cc_bits(cc: Option<Cond>) -> u8 {
    cc.map_or(0, Cond::code)
}

fn missing(op: &Opcode, form: &str) -> EmitError {
    EmitError::invalid(alloc::format!("{} has no {} form", op.name, form))
}

// ─── Immediates ───────────────────────────────────────────────

/// Width of an encoded immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmSize {
    /// 8-bit, sign-extended by the CPU.
    Byte,
    /// 16-bit (`ret imm16`).
    Word,
    /// 32-bit, sign-extended to 64 under REX.W.
    Dword,
    /// Full 64-bit (`mov r64, imm64` only).
    Qword,
}

/// Whether `v` survives a round trip through `i8`.
#[inline]
pub fn fits_i8(v: i64) -> bool {
    i8::try_from(v).is_ok()
}

/// Whether `v` survives a round trip through `i32`.
#[inline]
pub fn fits_i32(v: i64) -> bool {
    i32::try_from(v).is_ok()
}

/// Immediate width for `op`: dword by default, word for `ret`, narrowed to
/// a byte when the value fits and the descriptor has an imm8 form.
pub fn imm_size(op: &Opcode, imm: i64) -> ImmSize {
    if fits_i8(imm) && op.has(OpFlags::HAS_IMM8) {
        ImmSize::Byte
    } else if op.has(OpFlags::RET) {
        ImmSize::Word
    } else {
        ImmSize::Dword
    }
}

fn imm_size_for(op: &Opcode, imm: i64, size: OpSize) -> ImmSize {
    if op.has(OpFlags::MOV) && size == OpSize::Qword && !fits_i32(imm) {
        ImmSize::Qword
    } else {
        imm_size(op, imm)
    }
}

/// Range-check an immediate against what `op` at `size` can encode and
/// normalize it to the value the CPU will see.
///
/// 32-bit operations accept anything in `i32::MIN..=u32::MAX`; the bit
/// pattern is what gets encoded. Shift counts are masked to the operand
/// width like the hardware does.
fn check_imm(op: &Opcode, imm: i64, size: OpSize) -> Result<i64, EmitError> {
    if op.has(OpFlags::SHIFT) || op.has(OpFlags::SHIFTD) {
        let mask = if size == OpSize::Qword { 0x3F } else { 0x1F };
        return Ok(imm & mask);
    }
    if op.has(OpFlags::RET) {
        return if (0..=0xFFFF).contains(&imm) {
            Ok(imm)
        } else {
            Err(EmitError::invalid(alloc::format!(
                "ret immediate {} does not fit 16 bits",
                imm
            )))
        };
    }
    match size {
        OpSize::Qword if op.has(OpFlags::MOV) => Ok(imm),
        OpSize::Qword if fits_i32(imm) => Ok(imm),
        OpSize::Dword if (i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&imm) => {
            Ok(i64::from(imm as u32 as i32))
        }
        _ => Err(EmitError::invalid(alloc::format!(
            "{} immediate {:#x} does not fit a {} operand",
            op.name,
            imm,
            size
        ))),
    }
}

fn push_imm(buf: &mut InstrBytes, op: &Opcode, imm: i64, size: ImmSize) {
    if op.has(OpFlags::SHIFT) || op.has(OpFlags::SHIFTD) {
        // Count already masked by check_imm.
        buf.push(imm as u8);
        return;
    }
    match size {
        ImmSize::Byte => buf.push(imm as i8 as u8),
        ImmSize::Word => buf.extend_from_slice(&(imm as u16).to_le_bytes()),
        ImmSize::Dword => buf.extend_from_slice(&(imm as i32).to_le_bytes()),
        ImmSize::Qword => buf.extend_from_slice(&imm.to_le_bytes()),
    }
}

#[inline]
fn imm_opcode(base: u8, size: ImmSize) -> u8 {
    if size == ImmSize::Byte {
        base | 2
    } else {
        base
    }
}

// ─── Addressing-mode entry points ─────────────────────────────

/// `op r` (or `setcc r`): single register operand.
pub fn emit_cr(
    buf: &mut InstrBytes,
    op: &Opcode,
    cc: Option<Cond>,
    r: Reg,
    size: OpSize,
) -> Result<(), EmitError> {
    let mut rex = rex_w(op, size);
    if op.has(OpFlags::BYTE_REG) && r.needs_rex_for_byte() {
        rex |= REX_FORCE;
    }
    if r.is_extended() {
        rex |= REX_B;
    }

    if op.has(OpFlags::COMPACT_R) {
        let compact = op.compact.ok_or_else(|| missing(op, "compact register"))?;
        push_rex(buf, rex);
        buf.push(compact | r.low3());
        return Ok(());
    }

    let opcode = if op.has(OpFlags::REVERSE) {
        op.rm_rev
    } else {
        op.rm
    }
    .ok_or_else(|| missing(op, "register"))?;

    push_rex(buf, rex);
    if op.has(OpFlags::TWO_BYTE) {
        buf.push(0x0F);
    }
    buf.push(opcode | cc_bits(cc));
    buf.push(modrm(3, op.ext, r.low3()));
    Ok(())
}

/// `op r1, r2` in "destination last" order: `r1` is the source, `r2` the
/// destination.
pub fn emit_crr(
    buf: &mut InstrBytes,
    op: &Opcode,
    cc: Option<Cond>,
    r1: Reg,
    r2: Reg,
    size: OpSize,
) -> Result<(), EmitError> {
    let reverse = op.has(OpFlags::REVERSE);

    if op.has(OpFlags::XCHG) {
        let other = if r1 == RAX {
            Some(r2)
        } else if r2 == RAX {
            Some(r1)
        } else {
            None
        };
        // `xchg eax, eax` as 90 would be a plain nop and keep the upper half.
        if let Some(other) = other.filter(|&o| !(o == RAX && size == OpSize::Dword)) {
            let compact = op.compact.ok_or_else(|| missing(op, "accumulator"))?;
            let mut rex = rex_w(op, size);
            if other.is_extended() {
                rex |= REX_B;
            }
            push_rex(buf, rex);
            buf.push(compact | other.low3());
            return Ok(());
        }
    }

    let opcode = op.rm.ok_or_else(|| missing(op, "register-register"))?;

    let mut rex = rex_w(op, size);
    if op.has(OpFlags::BYTE_REG) && r1.needs_rex_for_byte() {
        rex |= REX_FORCE;
    }
    if r1.is_extended() {
        rex |= if reverse { REX_B } else { REX_R };
    }
    if r2.is_extended() {
        rex |= if reverse { REX_R } else { REX_B };
    }
    push_rex(buf, rex);
    if op.has(OpFlags::TWO_BYTE) || op.has(OpFlags::IMUL) {
        buf.push(0x0F);
    }
    buf.push(opcode | cc_bits(cc));
    if reverse {
        buf.push(modrm(3, r2.low3(), r1.low3()));
    } else {
        buf.push(modrm(3, r1.low3(), r2.low3()));
    }
    Ok(())
}

/// `op $imm, r`.
pub fn emit_ir(
    buf: &mut InstrBytes,
    op: &Opcode,
    r: Reg,
    imm: i64,
    size: OpSize,
) -> Result<(), EmitError> {
    let imm = check_imm(op, imm, size)?;
    let isz = imm_size_for(op, imm, size);

    let mut rex = rex_w(op, size);
    if r.is_extended() {
        rex |= REX_B;
    }

    if r == RAX && isz == ImmSize::Dword && op.has(OpFlags::ACC) {
        if let Some(acc) = op.acc_imm {
            push_rex(buf, rex);
            buf.push(acc);
            push_imm(buf, op, imm, isz);
            return Ok(());
        }
    }

    if isz == ImmSize::Qword {
        // Only MOV reaches here.
        let compact = op.compact.ok_or_else(|| missing(op, "64-bit immediate"))?;
        push_rex(buf, rex);
        buf.push(compact | r.low3());
        push_imm(buf, op, imm, isz);
        return Ok(());
    }

    if op.has(OpFlags::SHIFT) && imm == 1 {
        push_rex(buf, rex);
        buf.push(0xD1);
        buf.push(modrm(3, op.ext, r.low3()));
        return Ok(());
    }

    let base = op.imm.ok_or_else(|| missing(op, "immediate"))?;
    push_rex(buf, rex);
    buf.push(imm_opcode(base, isz));
    buf.push(modrm(3, op.ext, r.low3()));
    push_imm(buf, op, imm, isz);
    Ok(())
}

/// `op $imm, r1, r2`: three-operand immediate forms (`imul`, `shld`,
/// `shrd`).
pub fn emit_irr(
    buf: &mut InstrBytes,
    op: &Opcode,
    r1: Reg,
    r2: Reg,
    imm: i64,
    size: OpSize,
) -> Result<(), EmitError> {
    let base = op.imm.ok_or_else(|| missing(op, "immediate"))?;
    let imm = check_imm(op, imm, size)?;
    let isz = imm_size(op, imm);
    let reverse = op.has(OpFlags::REVERSE);

    let mut rex = rex_w(op, size);
    if r1.is_extended() {
        rex |= if reverse { REX_B } else { REX_R };
    }
    if r2.is_extended() {
        rex |= if reverse { REX_R } else { REX_B };
    }
    push_rex(buf, rex);
    if op.has(OpFlags::TWO_BYTE) {
        buf.push(0x0F);
    }
    buf.push(imm_opcode(base, isz));
    if reverse {
        buf.push(modrm(3, r2.low3(), r1.low3()));
    } else {
        buf.push(modrm(3, r1.low3(), r2.low3()));
    }
    push_imm(buf, op, imm, isz);
    Ok(())
}

/// `op $imm` with the immediate width chosen automatically.
pub fn emit_ci(
    buf: &mut InstrBytes,
    op: &Opcode,
    cc: Option<Cond>,
    imm: i64,
    size: OpSize,
) -> Result<(), EmitError> {
    let imm = check_imm(op, imm, size)?;
    emit_ci_sized(buf, op, cc, imm, imm_size(op, imm))
}

/// `op $imm` with a caller-chosen immediate width. Branches use this to
/// keep a fixed, patchable length whatever the current displacement is.
pub fn emit_ci_sized(
    buf: &mut InstrBytes,
    op: &Opcode,
    cc: Option<Cond>,
    imm: i64,
    isz: ImmSize,
) -> Result<(), EmitError> {
    let base = op.imm.ok_or_else(|| missing(op, "immediate"))?;
    if isz == ImmSize::Byte && !op.has(OpFlags::HAS_IMM8) {
        return Err(missing(op, "8-bit immediate"));
    }
    let fits = match isz {
        ImmSize::Byte => fits_i8(imm),
        ImmSize::Word => u16::try_from(imm).is_ok(),
        ImmSize::Dword => fits_i32(imm),
        ImmSize::Qword => true,
    };
    if !fits {
        return Err(EmitError::invalid(alloc::format!(
            "{} immediate {} does not fit {:?}",
            op.name,
            imm,
            isz
        )));
    }

    if !op.has(OpFlags::NO_REXW) {
        buf.push(0x48);
    }
    if op.has(OpFlags::JCC) {
        if isz == ImmSize::Byte {
            buf.push(0x70 | cc_bits(cc));
        } else {
            buf.push(0x0F);
            buf.push(0x80 | cc_bits(cc));
        }
    } else {
        buf.push(imm_opcode(base, isz) | cc_bits(cc));
    }
    push_imm(buf, op, imm, isz);
    Ok(())
}

/// The full memory form.
///
/// - `r == None, imm == None`: `op mem` (the descriptor's "/digit" fills
///   ModRM.reg).
/// - `r == None, imm == Some`: `op $imm, mem`.
/// - `r == Some, reverse == false`: `op r, mem` (store direction).
/// - `r == Some, reverse == true`: `op mem, r` (load direction).
/// - `r == Some, imm == Some`: `op $imm, mem, r` (`imul`).
#[allow(clippy::too_many_arguments)]
pub fn emit_cmx(
    buf: &mut InstrBytes,
    op: &Opcode,
    cc: Option<Cond>,
    mem: &MemRef,
    r: Option<Reg>,
    reverse: bool,
    imm: Option<i64>,
    size: OpSize,
) -> Result<(), EmitError> {
    mem.validate()?;
    let imm = imm.map(|v| check_imm(op, v, size)).transpose()?;
    // Memory forms carry at most a sign-extended imm32, even for `mov`.
    if let Some(v) = imm.filter(|&v| !fits_i32(v)) {
        return Err(EmitError::invalid(alloc::format!(
            "{} immediate {:#x} does not fit a sign-extended 32-bit field",
            op.name,
            v
        )));
    }
    let isz = imm.map(|v| imm_size(op, v));

    let mut reverse = reverse ^ op.has(OpFlags::REVERSE);
    let is_imul = op.has(OpFlags::IMUL);
    let two_byte = op.has(OpFlags::TWO_BYTE) || (is_imul && r.is_some() && imm.is_none());
    if is_imul && r.is_some() {
        reverse = !reverse;
    }

    // Shift by one has its own opcode and no immediate byte.
    let shift_by_one = op.has(OpFlags::SHIFT) && imm == Some(1);

    let opcode = match (imm, isz) {
        (Some(_), _) if shift_by_one => 0xD1,
        (Some(_), Some(isz)) => {
            imm_opcode(op.imm.ok_or_else(|| missing(op, "memory-immediate"))?, isz) | cc_bits(cc)
        }
        _ => {
            let slot = if is_imul {
                if r.is_none() {
                    op.rm_rev
                } else {
                    op.rm
                }
            } else if reverse {
                op.rm_rev
            } else {
                op.rm
            };
            slot.ok_or_else(|| missing(op, "memory"))? | cc_bits(cc)
        }
    };

    let mut rex = rex_w(op, size);
    if let Some(r) = r {
        if !reverse && op.has(OpFlags::BYTE_REG) && r.needs_rex_for_byte() {
            rex |= REX_FORCE;
        }
        if r.is_extended() {
            rex |= REX_R;
        }
    }
    if mem.index.is_some_and(Reg::is_extended) {
        rex |= REX_X;
    }
    if mem.base.is_some_and(Reg::is_extended) {
        rex |= REX_B;
    }
    push_rex(buf, rex);
    if two_byte {
        buf.push(0x0F);
    }
    buf.push(opcode);

    let reg_field = r.map_or(op.ext, Reg::low3);
    push_mem_operand(buf, reg_field, mem);

    if let (Some(imm), Some(isz)) = (imm, isz) {
        if !shift_by_one {
            push_imm(buf, op, imm, isz);
        }
    }
    Ok(())
}

/// ModR/M + SIB + displacement for a validated memory operand.
fn push_mem_operand(buf: &mut InstrBytes, reg_field: u8, mem: &MemRef) {
    #[derive(PartialEq)]
    enum Disp {
        None,
        Byte,
        Dword,
    }

    let sib_needed = mem.index.is_some()
        || match mem.base {
            Some(base) => base.low3() == 4,
            None => !mem.rip_relative,
        };

    let mut disp = if mem.disp == 0 {
        Disp::None
    } else if fits_i8(i64::from(mem.disp)) {
        Disp::Byte
    } else {
        Disp::Dword
    };

    let base_bits = match mem.base {
        // No base: rm/SIB base of 101 with mod 00 means disp32 follows
        // (RIP-relative without SIB, absolute with SIB).
        None => {
            disp = Disp::Dword;
            5
        }
        Some(base) => {
            // RBP and R13 have no mod-00 form; spend a zero disp8.
            if base.low3() == 5 && disp == Disp::None {
                disp = Disp::Byte;
            }
            base.low3()
        }
    };
    let mod_ = match (&disp, mem.base) {
        (_, None) | (Disp::None, _) => 0,
        (Disp::Byte, _) => 1,
        (Disp::Dword, _) => 2,
    };

    if sib_needed {
        let index_bits = mem.index.map_or(4, Reg::low3);
        buf.push(modrm(mod_, reg_field, 4));
        buf.push(sib(mem.scale, index_bits, base_bits));
    } else {
        buf.push(modrm(mod_, reg_field, base_bits));
    }

    match disp {
        Disp::None => {}
        Disp::Byte => buf.push(mem.disp as i8 as u8),
        Disp::Dword => buf.extend_from_slice(&mem.disp.to_le_bytes()),
    }
}

/// Operand-less instruction: REX.W unless `NO_REXW`, then the compact slot.
pub fn emit_plain(buf: &mut InstrBytes, op: &Opcode) -> Result<(), EmitError> {
    let compact = op.compact.ok_or_else(|| missing(op, "operand-less"))?;
    if !op.has(OpFlags::NO_REXW) {
        buf.push(0x48);
    }
    buf.push(compact);
    Ok(())
}

// ─── Padding ──────────────────────────────────────────────────

/// Recommended multi-byte NOP sequences, indexed by length.
pub(crate) const NOPS: [&[u8]; 10] = [
    &[],
    &[0x90],
    &[0x66, 0x90],
    &[0x0F, 0x1F, 0x00],
    &[0x0F, 0x1F, 0x40, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];

/// Longest single NOP instruction in [`NOPS`].
pub(crate) const MAX_NOP: usize = 9;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::*;
    use crate::operand::*;
    use alloc::vec::Vec;

    fn enc(f: impl FnOnce(&mut InstrBytes) -> Result<(), EmitError>) -> Vec<u8> {
        let mut buf = InstrBytes::new();
        f(&mut buf).unwrap();
        buf.to_vec()
    }

    // ─── InstrBytes ───────────────────────────────────────────

    #[test]
    fn instr_bytes_basic() {
        let mut buf = InstrBytes::new();
        assert!(buf.is_empty());
        buf.push(0x48);
        buf.extend_from_slice(&[0x89, 0xC3]);
        assert_eq!(buf.len(), 3);
        assert_eq!(&*buf, &[0x48, 0x89, 0xC3]);
        assert_eq!(buf, InstrBytes::from_slice(&[0x48, 0x89, 0xC3]));
        buf.clear();
        assert!(buf.is_empty());
    }

    #[test]
    #[should_panic(expected = "InstrBytes overflow")]
    fn instr_bytes_overflow_panics() {
        let mut buf = InstrBytes::new();
        buf.extend_from_slice(&[0u8; 17]);
    }

    // ─── Register forms ───────────────────────────────────────

    #[test]
    fn crr_mov() {
        assert_eq!(
            enc(|b| emit_crr(b, &MOV, None, RAX, RBX, OpSize::Qword)),
            [0x48, 0x89, 0xC3]
        );
        assert_eq!(
            enc(|b| emit_crr(b, &MOV, None, R9, RCX, OpSize::Qword)),
            [0x4C, 0x89, 0xC9]
        );
        assert_eq!(
            enc(|b| emit_crr(b, &MOV, None, RCX, R9, OpSize::Dword)),
            [0x41, 0x89, 0xC9]
        );
    }

    #[test]
    fn crr_reverse_swaps_rex_bits() {
        // cmovl r8, rax: 4C 0F 4C C0
        assert_eq!(
            enc(|b| emit_crr(b, &CMOVCC, Some(Cond::L), RAX, R8, OpSize::Qword)),
            [0x4C, 0x0F, 0x4C, 0xC0]
        );
        // imul rcx, r11: 49 0F AF CB
        assert_eq!(
            enc(|b| emit_crr(b, &IMUL, None, R11, RCX, OpSize::Qword)),
            [0x49, 0x0F, 0xAF, 0xCB]
        );
    }

    #[test]
    fn crr_byte_register_forces_rex() {
        // movzbl esi, esi needs a bare REX to reach SIL
        assert_eq!(
            enc(|b| emit_crr(b, &MOVZX8, None, RSI, RSI, OpSize::Dword)),
            [0x40, 0x0F, 0xB6, 0xF6]
        );
        assert_eq!(
            enc(|b| emit_crr(b, &MOVZX8, None, RBX, RAX, OpSize::Dword)),
            [0x0F, 0xB6, 0xC3]
        );
    }

    #[test]
    fn crr_xchg_accumulator() {
        assert_eq!(
            enc(|b| emit_crr(b, &XCHG, None, RAX, RCX, OpSize::Qword)),
            [0x48, 0x91]
        );
        assert_eq!(
            enc(|b| emit_crr(b, &XCHG, None, R12, RAX, OpSize::Qword)),
            [0x49, 0x94]
        );
        assert_eq!(
            enc(|b| emit_crr(b, &XCHG, None, RAX, RAX, OpSize::Dword)),
            [0x87, 0xC0]
        );
        assert_eq!(
            enc(|b| emit_crr(b, &XCHG, None, RBX, RCX, OpSize::Qword)),
            [0x48, 0x87, 0xD9]
        );
    }

    #[test]
    fn crr_missing_slot_is_error() {
        let mut buf = InstrBytes::new();
        let err = emit_crr(&mut buf, &LEA, None, RAX, RBX, OpSize::Qword).unwrap_err();
        assert!(matches!(err, EmitError::InvalidOperand { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn cr_forms() {
        assert_eq!(enc(|b| emit_cr(b, &PUSH, None, RBP, OpSize::Qword)), [0x55]);
        assert_eq!(enc(|b| emit_cr(b, &POP, None, R15, OpSize::Qword)), [0x41, 0x5F]);
        assert_eq!(
            enc(|b| emit_cr(b, &NOT, None, RAX, OpSize::Qword)),
            [0x48, 0xF7, 0xD0]
        );
        assert_eq!(
            enc(|b| emit_cr(b, &IMUL, None, RCX, OpSize::Qword)),
            [0x48, 0xF7, 0xE9]
        );
        assert_eq!(
            enc(|b| emit_cr(b, &INC, None, R8, OpSize::Dword)),
            [0x41, 0xFF, 0xC0]
        );
        assert_eq!(enc(|b| emit_cr(b, &JMP, None, R10, OpSize::Qword)), [0x41, 0xFF, 0xE2]);
        assert_eq!(
            enc(|b| emit_cr(b, &SHL, None, RDX, OpSize::Qword)),
            [0x48, 0xD3, 0xE2]
        );
    }

    #[test]
    fn cr_setcc() {
        assert_eq!(
            enc(|b| emit_cr(b, &SETCC, Some(Cond::E), RAX, OpSize::Qword)),
            [0x0F, 0x94, 0xC0]
        );
        assert_eq!(
            enc(|b| emit_cr(b, &SETCC, Some(Cond::NE), RDI, OpSize::Qword)),
            [0x40, 0x0F, 0x95, 0xC7]
        );
        assert_eq!(
            enc(|b| emit_cr(b, &SETCC, Some(Cond::G), R9, OpSize::Qword)),
            [0x41, 0x0F, 0x9F, 0xC1]
        );
    }

    // ─── Immediates ───────────────────────────────────────────

    #[test]
    fn ir_alu() {
        assert_eq!(
            enc(|b| emit_ir(b, &ADD, RDI, 5, OpSize::Qword)),
            [0x48, 0x83, 0xC7, 0x05]
        );
        assert_eq!(
            enc(|b| emit_ir(b, &SUB, RCX, 0x1000, OpSize::Qword)),
            [0x48, 0x81, 0xE9, 0x00, 0x10, 0x00, 0x00]
        );
        // rax with a dword immediate takes the accumulator form
        assert_eq!(
            enc(|b| emit_ir(b, &CMP, RAX, 0x1000, OpSize::Qword)),
            [0x48, 0x3D, 0x00, 0x10, 0x00, 0x00]
        );
        // but a byte immediate keeps the shorter 83 form
        assert_eq!(
            enc(|b| emit_ir(b, &CMP, RAX, 1, OpSize::Qword)),
            [0x48, 0x83, 0xF8, 0x01]
        );
        assert_eq!(
            enc(|b| emit_ir(b, &TEST, RAX, 1, OpSize::Dword)),
            [0xA9, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn ir_dword_accepts_unsigned_pattern() {
        // and ecx, 0xFFFFFFFF is and ecx, -1
        assert_eq!(
            enc(|b| emit_ir(b, &AND, RCX, 0xFFFF_FFFF, OpSize::Dword)),
            [0x83, 0xE1, 0xFF]
        );
        let mut buf = InstrBytes::new();
        assert!(emit_ir(&mut buf, &AND, RCX, 0x1_0000_0000, OpSize::Dword).is_err());
        assert!(emit_ir(&mut buf, &ADD, RCX, 0x8000_0000, OpSize::Qword).is_err());
    }

    #[test]
    fn ir_mov_widths() {
        assert_eq!(
            enc(|b| emit_ir(b, &MOV, RAX, 1, OpSize::Qword)),
            [0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            enc(|b| emit_ir(b, &MOV, R10, 0x1122_3344_5566_7788, OpSize::Qword)),
            [0x49, 0xBA, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
        assert_eq!(
            enc(|b| emit_ir(b, &MOV, RDX, 7, OpSize::Dword)),
            [0xC7, 0xC2, 0x07, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn ir_shifts() {
        assert_eq!(
            enc(|b| emit_ir(b, &SHL, RAX, 1, OpSize::Qword)),
            [0x48, 0xD1, 0xE0]
        );
        assert_eq!(
            enc(|b| emit_ir(b, &SAR, R11, 3, OpSize::Qword)),
            [0x49, 0xC1, 0xFB, 0x03]
        );
        // counts are masked to the operand width
        assert_eq!(
            enc(|b| emit_ir(b, &SHR, RCX, 33, OpSize::Dword)),
            [0xD1, 0xE9]
        );
        assert_eq!(
            enc(|b| emit_ir(b, &SHR, RCX, 65, OpSize::Qword)),
            [0x48, 0xD1, 0xE9]
        );
    }

    #[test]
    fn irr_forms() {
        // imul rax, rbx, 10
        assert_eq!(
            enc(|b| emit_irr(b, &IMUL, RBX, RAX, 10, OpSize::Qword)),
            [0x48, 0x6B, 0xC3, 0x0A]
        );
        // imul r9, rcx, 1000
        assert_eq!(
            enc(|b| emit_irr(b, &IMUL, RCX, R9, 1000, OpSize::Qword)),
            [0x4C, 0x69, 0xC9, 0xE8, 0x03, 0x00, 0x00]
        );
        // shld rax, rdx, 4
        assert_eq!(
            enc(|b| emit_irr(b, &SHLD, RDX, RAX, 4, OpSize::Qword)),
            [0x48, 0x0F, 0xA4, 0xD0, 0x04]
        );
    }

    #[test]
    fn ci_forms() {
        assert_eq!(enc(|b| emit_ci(b, &PUSH, None, 1, OpSize::Qword)), [0x6A, 0x01]);
        assert_eq!(
            enc(|b| emit_ci(b, &PUSH, None, 0x1234, OpSize::Qword)),
            [0x68, 0x34, 0x12, 0x00, 0x00]
        );
        assert_eq!(
            enc(|b| emit_ci(b, &RET, None, 16, OpSize::Qword)),
            [0xC2, 0x10, 0x00]
        );
        assert_eq!(
            enc(|b| emit_ci_sized(b, &JCC_OP, Some(Cond::E), 0, ImmSize::Dword)),
            [0x0F, 0x84, 0, 0, 0, 0]
        );
        assert_eq!(
            enc(|b| emit_ci_sized(b, &JCC_OP, Some(Cond::NE), -2, ImmSize::Byte)),
            [0x75, 0xFE]
        );
        assert_eq!(
            enc(|b| emit_ci_sized(b, &JMP, None, -2, ImmSize::Byte)),
            [0xEB, 0xFE]
        );
        assert_eq!(
            enc(|b| emit_ci_sized(b, &CALL, None, 0, ImmSize::Dword)),
            [0xE8, 0, 0, 0, 0]
        );
    }

    #[test]
    fn ci_rejects_bad_widths() {
        let mut buf = InstrBytes::new();
        assert!(emit_ci(&mut buf, &RET, None, 0x10000, OpSize::Qword).is_err());
        assert!(emit_ci_sized(&mut buf, &CALL, None, 0, ImmSize::Byte).is_err());
        assert!(emit_ci_sized(&mut buf, &JMP, None, 200, ImmSize::Byte).is_err());
        assert!(buf.is_empty());
    }

    // ─── Memory forms ─────────────────────────────────────────

    fn load(mem: MemRef, r: Reg) -> Vec<u8> {
        enc(|b| emit_cmx(b, &MOV, None, &mem, Some(r), true, None, OpSize::Qword))
    }

    #[test]
    fn cmx_base_disp() {
        // mov rax, [rbx]
        assert_eq!(load(MemRef::base_disp(RBX, 0), RAX), [0x48, 0x8B, 0x03]);
        // mov rax, [rbx+8]
        assert_eq!(load(MemRef::base_disp(RBX, 8), RAX), [0x48, 0x8B, 0x43, 0x08]);
        // mov rax, [rbx+0x100]
        assert_eq!(
            load(MemRef::base_disp(RBX, 0x100), RAX),
            [0x48, 0x8B, 0x83, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn cmx_rbp_r13_force_disp8() {
        assert_eq!(load(MemRef::base_disp(RBP, 0), RAX), [0x48, 0x8B, 0x45, 0x00]);
        assert_eq!(load(MemRef::base_disp(R13, 0), RAX), [0x49, 0x8B, 0x45, 0x00]);
    }

    #[test]
    fn cmx_rsp_r12_need_sib() {
        assert_eq!(load(MemRef::base_disp(RSP, 0), RAX), [0x48, 0x8B, 0x04, 0x24]);
        assert_eq!(
            load(MemRef::base_disp(R12, 16), RCX),
            [0x49, 0x8B, 0x4C, 0x24, 0x10]
        );
    }

    #[test]
    fn cmx_sib_and_absolute() {
        // mov rdx, [rax+r9*8+4]
        assert_eq!(
            load(MemRef::sib(RAX, R9, 8, 4), RDX),
            [0x4A, 0x8B, 0x54, 0xC8, 0x04]
        );
        // mov rax, [0x1000]
        assert_eq!(
            load(MemRef::absolute(0x1000), RAX),
            [0x48, 0x8B, 0x04, 0x25, 0x00, 0x10, 0x00, 0x00]
        );
        // mov rax, [rcx*4]
        assert_eq!(
            load(MemRef::index_disp(RCX, 4, 0), RAX),
            [0x48, 0x8B, 0x04, 0x8D, 0x00, 0x00, 0x00, 0x00]
        );
        // mov rax, [rip+0x10]
        assert_eq!(
            load(MemRef::rip(0x10), RAX),
            [0x48, 0x8B, 0x05, 0x10, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn cmx_rejects_bad_operands_without_writing() {
        let mut buf = InstrBytes::new();
        let bad_index = MemRef::sib(RAX, RSP, 1, 0);
        assert!(emit_cmx(&mut buf, &MOV, None, &bad_index, Some(RAX), true, None, OpSize::Qword).is_err());
        let bad_scale = MemRef::sib(RAX, RCX, 3, 0);
        assert!(emit_cmx(&mut buf, &MOV, None, &bad_scale, Some(RAX), true, None, OpSize::Qword).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn cmx_imm_and_digit_forms() {
        let m = MemRef::base_disp(RDI, 8);
        // add qword [rdi+8], 1
        assert_eq!(
            enc(|b| emit_cmx(b, &ADD, None, &m, None, false, Some(1), OpSize::Qword)),
            [0x48, 0x83, 0x47, 0x08, 0x01]
        );
        // mov dword [rdi+8], 0x12345678
        assert_eq!(
            enc(|b| emit_cmx(b, &MOV, None, &m, None, false, Some(0x1234_5678), OpSize::Dword)),
            [0xC7, 0x47, 0x08, 0x78, 0x56, 0x34, 0x12]
        );
        // inc dword [rdi+8]
        assert_eq!(
            enc(|b| emit_cmx(b, &INC, None, &m, None, false, None, OpSize::Dword)),
            [0xFF, 0x47, 0x08]
        );
        // jmp qword [rdi+8] has no REX.W
        assert_eq!(
            enc(|b| emit_cmx(b, &JMP, None, &m, None, false, None, OpSize::Qword)),
            [0xFF, 0x67, 0x08]
        );
    }

    #[test]
    fn cmx_mov_qword_immediate_must_sign_extend() {
        let m = MemRef::base_disp(RBX, 8);
        let mut buf = InstrBytes::new();
        assert!(matches!(
            emit_cmx(&mut buf, &MOV, None, &m, None, false, Some(0x1_0000_0005), OpSize::Qword),
            Err(EmitError::InvalidOperand { .. })
        ));
        assert!(buf.is_empty());
        // mov qword [rbx+8], -1
        assert_eq!(
            enc(|b| emit_cmx(b, &MOV, None, &m, None, false, Some(-1), OpSize::Qword)),
            [0x48, 0xC7, 0x43, 0x08, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn cmx_imul_and_lea() {
        let m = MemRef::base_disp(RSI, 0x10);
        // imul rax, [rsi+0x10]
        assert_eq!(
            enc(|b| emit_cmx(b, &IMUL, None, &m, Some(RAX), true, None, OpSize::Qword)),
            [0x48, 0x0F, 0xAF, 0x46, 0x10]
        );
        // imul qword [rsi+0x10]
        assert_eq!(
            enc(|b| emit_cmx(b, &IMUL, None, &m, None, false, None, OpSize::Qword)),
            [0x48, 0xF7, 0x6E, 0x10]
        );
        // lea rdx, [rsi+0x10]
        assert_eq!(
            enc(|b| emit_cmx(b, &LEA, None, &m, Some(RDX), true, None, OpSize::Qword)),
            [0x48, 0x8D, 0x56, 0x10]
        );
    }

    #[test]
    fn cmx_cmov_load() {
        // cmovge rcx, [rbp-8]
        let m = MemRef::base_disp(RBP, -8);
        assert_eq!(
            enc(|b| emit_cmx(b, &CMOVCC, Some(Cond::GE), &m, Some(RCX), true, None, OpSize::Qword)),
            [0x48, 0x0F, 0x4D, 0x4D, 0xF8]
        );
    }

    #[test]
    fn plain_forms() {
        assert_eq!(enc(|b| emit_plain(b, &RET)), [0xC3]);
        assert_eq!(enc(|b| emit_plain(b, &CQO)), [0x48, 0x99]);
        assert_eq!(enc(|b| emit_plain(b, &CDQE)), [0x48, 0x98]);
        assert_eq!(enc(|b| emit_plain(b, &INT3)), [0xCC]);
        let mut buf = InstrBytes::new();
        assert!(emit_plain(&mut buf, &ADD).is_err());
    }

    #[test]
    fn nop_table_lengths() {
        for (n, seq) in NOPS.iter().enumerate() {
            assert_eq!(seq.len(), n);
        }
        assert_eq!(NOPS[MAX_NOP].len(), MAX_NOP);
    }
}
