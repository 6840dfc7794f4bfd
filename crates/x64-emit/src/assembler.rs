//! Mnemonic façade: named x86-64 operations over a [`DataBlock`].
//!
//! Operand order is "destination last", `<op>_<src>_<dst>`, matching gas
//! and gdb rather than the Intel manuals. Every operation encodes into a
//! stack buffer first and then commits the finished instruction in one
//! append, so a failing call never leaves partial bytes in the arena.
//!
//! # Examples
//!
//! ```rust
//! use x64_emit::{DataBlock, X64Assembler, RAX, RBX, RDI};
//!
//! let mut a = X64Assembler::new(DataBlock::new(64).unwrap());
//! a.mov_reg64_reg64(RAX, RBX).unwrap();
//! a.add_imm32_reg64(5, RDI).unwrap();
//! a.ret().unwrap();
//! assert_eq!(a.code().as_slice(), &[0x48, 0x89, 0xC3, 0x48, 0x83, 0xC7, 0x05, 0xC3]);
//! ```

use crate::block::DataBlock;
use crate::encoder::{
    emit_ci, emit_cmx, emit_cr, emit_crr, emit_ir, emit_irr, emit_plain, fits_i32, InstrBytes,
    MAX_NOP, NOPS,
};
use crate::error::EmitError;
use crate::opcode::{self, Opcode};
use crate::operand::{Cond, MemRef, OpSize, Reg, Segment, RCX, SCRATCH};
use crate::CodeAddress;

use OpSize::{Dword, Qword};

/// x86-64 instruction emitter writing into an owned arena.
#[derive(Debug)]
pub struct X64Assembler {
    code: DataBlock,
}

impl X64Assembler {
    /// Emit into `block` (a [`DataBlock`] or a
    /// [`CodeBlock`](crate::CodeBlock)).
    pub fn new(block: impl Into<DataBlock>) -> X64Assembler {
        X64Assembler { code: block.into() }
    }

    /// Emit into a freshly mapped executable arena of `size` bytes.
    #[cfg(all(unix, feature = "std"))]
    pub fn new_executable(size: usize) -> Result<X64Assembler, EmitError> {
        Ok(Self::new(crate::code::CodeBlock::new(size)?))
    }

    /// The arena.
    #[inline]
    pub fn code(&self) -> &DataBlock {
        &self.code
    }

    /// The arena, mutably (frontier resets, data allocation).
    #[inline]
    pub fn code_mut(&mut self) -> &mut DataBlock {
        &mut self.code
    }

    /// Give the arena back.
    pub fn into_inner(self) -> DataBlock {
        self.code
    }

    /// Address of the next instruction.
    #[inline]
    pub fn frontier(&self) -> CodeAddress {
        self.code.frontier()
    }

    // ─── Commit ───────────────────────────────────────────────

    /// Append a sequence of finished instructions, all or nothing.
    pub(crate) fn commit_all(&mut self, bufs: &[InstrBytes]) -> Result<(), EmitError> {
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        if !self.code.can_emit(total) {
            return Err(EmitError::CapacityExceeded {
                requested: total,
                available: self.code.available(),
            });
        }
        for buf in bufs {
            let at = self.code.frontier();
            self.code.bytes(buf)?;
            log::trace!("{:#x}: {:02x?}", at, &**buf);
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn commit(&mut self, buf: &InstrBytes) -> Result<(), EmitError> {
        self.commit_all(core::slice::from_ref(buf))
    }

    /// Encode one instruction with `f` and commit it.
    #[inline]
    pub(crate) fn emit(
        &mut self,
        f: impl FnOnce(&mut InstrBytes) -> Result<(), EmitError>,
    ) -> Result<(), EmitError> {
        let mut buf = InstrBytes::new();
        f(&mut buf)?;
        self.commit(&buf)
    }

    /// `mov $imm, %scratch` followed by `op %scratch, %dst`, committed
    /// together.
    fn via_scratch(
        &mut self,
        imm: i64,
        dst: Reg,
        second: impl FnOnce(&mut InstrBytes) -> Result<(), EmitError>,
    ) -> Result<(), EmitError> {
        if dst.is_scratch() {
            return Err(EmitError::invalid(alloc::format!(
                "{} is the scratch register and cannot be an operand here",
                dst
            )));
        }
        let mut bufs = [InstrBytes::new(), InstrBytes::new()];
        emit_ir(&mut bufs[0], &opcode::MOV, SCRATCH, imm, Qword)?;
        second(&mut bufs[1])?;
        self.commit_all(&bufs)
    }

    // ─── Raw data ─────────────────────────────────────────────

    /// Append one raw byte.
    pub fn byte(&mut self, b: u8) -> Result<(), EmitError> {
        self.code.byte(b)
    }

    /// Append a raw 16-bit value.
    pub fn word(&mut self, w: u16) -> Result<(), EmitError> {
        self.code.word(w)
    }

    /// Append a raw 32-bit value.
    pub fn dword(&mut self, d: u32) -> Result<(), EmitError> {
        self.code.dword(d)
    }

    /// Append a raw 64-bit value.
    pub fn qword(&mut self, q: u64) -> Result<(), EmitError> {
        self.code.qword(q)
    }

    /// Append raw bytes.
    pub fn bytes(&mut self, bs: &[u8]) -> Result<(), EmitError> {
        self.code.bytes(bs)
    }

    // ─── Moves ────────────────────────────────────────────────

    /// `mov $imm, %dst`. Uses the sign-extended 32-bit form when the value
    /// allows it, the 10-byte `movabs` otherwise.
    pub fn mov_imm64_reg(&mut self, imm: i64, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_ir(b, &opcode::MOV, dst, imm, Qword))
    }

    /// `movl $imm, %dst32`; zeroes the upper half.
    pub fn mov_imm32_reg32(&mut self, imm: i64, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_ir(b, &opcode::MOV, dst, imm, Dword))
    }

    /// Materialize a constant in the cheapest way: `xor` for zero, a 32-bit
    /// move for values that zero-extend, otherwise a 64-bit move. The zero
    /// idiom clobbers flags.
    pub fn emit_imm_reg(&mut self, imm: i64, dst: Reg) -> Result<(), EmitError> {
        if imm == 0 {
            self.xor_reg32_reg32(dst, dst)
        } else if (0..=i64::from(u32::MAX)).contains(&imm) {
            self.mov_imm32_reg32(imm, dst)
        } else {
            self.mov_imm64_reg(imm, dst)
        }
    }

    /// `mov %src, %dst`.
    pub fn mov_reg64_reg64(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::MOV, None, src, dst, Qword))
    }

    /// `movl %src32, %dst32`; zeroes the upper half.
    pub fn mov_reg32_reg32(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::MOV, None, src, dst, Dword))
    }

    /// `mov disp(%base), %dst`.
    pub fn load_reg64_disp_reg64(&mut self, base: Reg, disp: i32, dst: Reg) -> Result<(), EmitError> {
        self.load_mem_reg64(&MemRef::base_disp(base, disp), dst)
    }

    /// `movl disp(%base), %dst32`.
    pub fn load_reg64_disp_reg32(&mut self, base: Reg, disp: i32, dst: Reg) -> Result<(), EmitError> {
        let mem = MemRef::base_disp(base, disp);
        self.emit(|b| emit_cmx(b, &opcode::MOV, None, &mem, Some(dst), true, None, Dword))
    }

    /// `mov disp32, %dst`: absolute address in the low 2 GiB.
    pub fn load_disp32_reg64(&mut self, disp: i32, dst: Reg) -> Result<(), EmitError> {
        self.load_mem_reg64(&MemRef::absolute(disp), dst)
    }

    /// `mov mem, %dst` for any addressing form.
    pub fn load_mem_reg64(&mut self, mem: &MemRef, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_cmx(b, &opcode::MOV, None, mem, Some(dst), true, None, Qword))
    }

    /// `mov %src, disp(%base)`.
    pub fn store_reg64_disp_reg64(&mut self, src: Reg, disp: i32, base: Reg) -> Result<(), EmitError> {
        self.store_reg64_mem(src, &MemRef::base_disp(base, disp))
    }

    /// `movl %src32, disp(%base)`.
    pub fn store_reg32_disp_reg64(&mut self, src: Reg, disp: i32, base: Reg) -> Result<(), EmitError> {
        let mem = MemRef::base_disp(base, disp);
        self.emit(|b| emit_cmx(b, &opcode::MOV, None, &mem, Some(src), false, None, Dword))
    }

    /// `mov %src, mem` for any addressing form.
    pub fn store_reg64_mem(&mut self, src: Reg, mem: &MemRef) -> Result<(), EmitError> {
        self.emit(|b| emit_cmx(b, &opcode::MOV, None, mem, Some(src), false, None, Qword))
    }

    /// `movl $imm, disp(%base)`.
    pub fn store_imm32_disp_reg(&mut self, imm: i64, disp: i32, base: Reg) -> Result<(), EmitError> {
        let mem = MemRef::base_disp(base, disp);
        self.emit(|b| emit_cmx(b, &opcode::MOV, None, &mem, None, false, Some(imm), Dword))
    }

    /// `movq $imm, disp(%base)`. Values outside the sign-extended 32-bit
    /// range go through the scratch register.
    pub fn store_imm64_disp_reg64(&mut self, imm: i64, disp: i32, base: Reg) -> Result<(), EmitError> {
        let mem = MemRef::base_disp(base, disp);
        if fits_i32(imm) {
            return self.emit(|b| emit_cmx(b, &opcode::MOV, None, &mem, None, false, Some(imm), Qword));
        }
        self.via_scratch(imm, base, |b| {
            emit_cmx(b, &opcode::MOV, None, &mem, Some(SCRATCH), false, None, Qword)
        })
    }

    /// `lea disp(%base), %dst`.
    pub fn lea_reg64_disp_reg64(&mut self, base: Reg, disp: i32, dst: Reg) -> Result<(), EmitError> {
        self.lea_mem_reg64(&MemRef::base_disp(base, disp), dst)
    }

    /// `lea mem, %dst` for any addressing form.
    pub fn lea_mem_reg64(&mut self, mem: &MemRef, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_cmx(b, &opcode::LEA, None, mem, Some(dst), true, None, Qword))
    }

    // ─── Extensions ───────────────────────────────────────────

    /// `movzbq %src8, %dst`.
    pub fn mov_reg8_reg64_unsigned(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::MOVZX8, None, src, dst, Qword))
    }

    /// `movsbq %src8, %dst`.
    pub fn mov_reg8_reg64_signed(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::MOVSX8, None, src, dst, Qword))
    }

    /// `movzwq %src16, %dst`.
    pub fn mov_reg16_reg64_unsigned(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::MOVZX16, None, src, dst, Qword))
    }

    /// `movswq %src16, %dst`.
    pub fn mov_reg16_reg64_signed(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::MOVSX16, None, src, dst, Qword))
    }

    /// `movslq %src32, %dst`.
    pub fn movsxd_reg32_reg64(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::MOVSXD, None, src, dst, Qword))
    }

    /// `cltq`: sign-extend `eax` into `rax`.
    pub fn cdqe(&mut self) -> Result<(), EmitError> {
        self.emit(|b| emit_plain(b, &opcode::CDQE))
    }

    /// `cqto`: sign-extend `rax` into `rdx:rax`.
    pub fn cqo(&mut self) -> Result<(), EmitError> {
        self.emit(|b| emit_plain(b, &opcode::CQO))
    }

    // ─── Shifts ───────────────────────────────────────────────

    /// `shld $count, %src, %dst`.
    pub fn shld_imm_reg64_reg64(&mut self, count: u8, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_irr(b, &opcode::SHLD, src, dst, i64::from(count), Qword))
    }

    /// `shld %cl, %src, %dst`.
    pub fn shld_cl_reg64_reg64(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::SHLD, None, src, dst, Qword))
    }

    /// `shrd $count, %src, %dst`.
    pub fn shrd_imm_reg64_reg64(&mut self, count: u8, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_irr(b, &opcode::SHRD, src, dst, i64::from(count), Qword))
    }

    /// `shrd %cl, %src, %dst`.
    pub fn shrd_cl_reg64_reg64(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::SHRD, None, src, dst, Qword))
    }

    // ─── Unary ────────────────────────────────────────────────

    fn unary(&mut self, op: &Opcode, r: Reg, size: OpSize) -> Result<(), EmitError> {
        self.emit(|b| emit_cr(b, op, None, r, size))
    }

    fn unary_mem(&mut self, op: &Opcode, base: Reg, disp: i32, size: OpSize) -> Result<(), EmitError> {
        let mem = MemRef::base_disp(base, disp);
        self.emit(|b| emit_cmx(b, op, None, &mem, None, false, None, size))
    }

    /// `not %r`.
    pub fn not_reg64(&mut self, r: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::NOT, r, Qword)
    }

    /// `neg %r`.
    pub fn neg_reg64(&mut self, r: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::NEG, r, Qword)
    }

    /// `inc %r`.
    pub fn inc_reg64(&mut self, r: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::INC, r, Qword)
    }

    /// `incl %r32`.
    pub fn inc_reg32(&mut self, r: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::INC, r, Dword)
    }

    /// `incq disp(%base)`.
    pub fn inc_mem64(&mut self, base: Reg, disp: i32) -> Result<(), EmitError> {
        self.unary_mem(&opcode::INC, base, disp, Qword)
    }

    /// `incl disp(%base)`.
    pub fn inc_mem32(&mut self, base: Reg, disp: i32) -> Result<(), EmitError> {
        self.unary_mem(&opcode::INC, base, disp, Dword)
    }

    /// `dec %r`.
    pub fn dec_reg64(&mut self, r: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::DEC, r, Qword)
    }

    /// `decl %r32`.
    pub fn dec_reg32(&mut self, r: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::DEC, r, Dword)
    }

    /// `decq disp(%base)`.
    pub fn dec_mem64(&mut self, base: Reg, disp: i32) -> Result<(), EmitError> {
        self.unary_mem(&opcode::DEC, base, disp, Qword)
    }

    /// `decl disp(%base)`.
    pub fn dec_mem32(&mut self, base: Reg, disp: i32) -> Result<(), EmitError> {
        self.unary_mem(&opcode::DEC, base, disp, Dword)
    }

    // ─── Multiply / divide ────────────────────────────────────

    /// `imul %src, %dst`.
    pub fn imul_reg64_reg64(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::IMUL, None, src, dst, Qword))
    }

    /// `imul $imm, %src, %dst`.
    pub fn imul_imm_reg64_reg64(&mut self, imm: i64, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_irr(b, &opcode::IMUL, src, dst, imm, Qword))
    }

    /// `imul %src`: signed `rdx:rax = rax * src`.
    pub fn imul(&mut self, src: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::IMUL, src, Qword)
    }

    /// `mul %src`: unsigned `rdx:rax = rax * src`.
    pub fn mul(&mut self, src: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::MUL, src, Qword)
    }

    /// `div %divisor`: unsigned divide of `rdx:rax`; quotient in `rax`,
    /// remainder in `rdx`.
    pub fn div(&mut self, divisor: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::DIV, divisor, Qword)
    }

    /// `idiv %divisor`: signed divide of `rdx:rax`; quotient in `rax`,
    /// remainder in `rdx`.
    pub fn idiv(&mut self, divisor: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::IDIV, divisor, Qword)
    }

    // ─── Stack ────────────────────────────────────────────────

    /// `push %r`.
    pub fn pushr(&mut self, r: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::PUSH, r, Qword)
    }

    /// `pop %r`.
    pub fn popr(&mut self, r: Reg) -> Result<(), EmitError> {
        self.unary(&opcode::POP, r, Qword)
    }

    /// `push $imm` (sign-extended to 64 bits).
    pub fn push_imm(&mut self, imm: i64) -> Result<(), EmitError> {
        self.emit(|b| emit_ci(b, &opcode::PUSH, None, imm, Qword))
    }

    /// `pushf`.
    pub fn pushf(&mut self) -> Result<(), EmitError> {
        self.code.byte(0x9C)
    }

    /// `popf`.
    pub fn popf(&mut self) -> Result<(), EmitError> {
        self.code.byte(0x9D)
    }

    // ─── Exchange / atomics ───────────────────────────────────

    /// `xchg %src, %dst`.
    pub fn xchg_reg64_reg64(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::XCHG, None, src, dst, Qword))
    }

    /// `xchgl %src32, %dst32`.
    pub fn xchg_reg32_reg32(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::XCHG, None, src, dst, Dword))
    }

    /// `xadd %src, disp(%base)`. Prefix with [`lock`](Self::lock) for an
    /// atomic fetch-add.
    pub fn xadd_reg64_disp_reg64(&mut self, src: Reg, disp: i32, base: Reg) -> Result<(), EmitError> {
        let mem = MemRef::base_disp(base, disp);
        self.emit(|b| emit_cmx(b, &opcode::XADD, None, &mem, Some(src), false, None, Qword))
    }

    /// `cmpxchg %src, disp(%base)`: compares with `rax`.
    pub fn cmpxchg_reg64_disp_reg64(&mut self, src: Reg, disp: i32, base: Reg) -> Result<(), EmitError> {
        let mem = MemRef::base_disp(base, disp);
        self.emit(|b| emit_cmx(b, &opcode::CMPXCHG, None, &mem, Some(src), false, None, Qword))
    }

    /// `lock` prefix for the next instruction.
    pub fn lock(&mut self) -> Result<(), EmitError> {
        self.code.byte(0xF0)
    }

    // ─── Conditional ──────────────────────────────────────────

    /// `set<cc> %r8`.
    pub fn setcc(&mut self, cc: Cond, r: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_cr(b, &opcode::SETCC, Some(cc), r, Qword))
    }

    /// `cmov<cc> %src, %dst`.
    pub fn cmov_reg64_reg64(&mut self, cc: Cond, src: Reg, dst: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_crr(b, &opcode::CMOVCC, Some(cc), src, dst, Qword))
    }

    /// `cmov<cc> disp(%base), %dst`.
    pub fn cload_reg64_disp_reg64(
        &mut self,
        cc: Cond,
        base: Reg,
        disp: i32,
        dst: Reg,
    ) -> Result<(), EmitError> {
        let mem = MemRef::base_disp(base, disp);
        self.emit(|b| emit_cmx(b, &opcode::CMOVCC, Some(cc), &mem, Some(dst), true, None, Qword))
    }

    // ─── Misc ─────────────────────────────────────────────────

    /// `ret`.
    pub fn ret(&mut self) -> Result<(), EmitError> {
        self.emit(|b| emit_plain(b, &opcode::RET))
    }

    /// `ret $imm16`: pop `imm` extra bytes.
    pub fn ret_imm(&mut self, imm: u16) -> Result<(), EmitError> {
        self.emit(|b| emit_ci(b, &opcode::RET, None, i64::from(imm), Qword))
    }

    /// One-byte `nop`.
    pub fn nop(&mut self) -> Result<(), EmitError> {
        self.emit(|b| emit_plain(b, &opcode::NOP))
    }

    /// `int3`.
    pub fn int3(&mut self) -> Result<(), EmitError> {
        self.emit(|b| emit_plain(b, &opcode::INT3))
    }

    /// `ud2`.
    pub fn ud2(&mut self) -> Result<(), EmitError> {
        self.commit(&InstrBytes::from_slice(&[0x0F, 0x0B]))
    }

    /// `n` bytes of padding using the fewest multi-byte NOPs.
    pub fn emit_nop(&mut self, n: usize) -> Result<(), EmitError> {
        if !self.code.can_emit(n) {
            return Err(EmitError::CapacityExceeded {
                requested: n,
                available: self.code.available(),
            });
        }
        let mut left = n;
        while left > 0 {
            let len = left.min(MAX_NOP);
            self.commit(&InstrBytes::from_slice(NOPS[len]))?;
            left -= len;
        }
        Ok(())
    }

    /// `n` bytes of `int3`.
    pub fn emit_int3s(&mut self, n: usize) -> Result<(), EmitError> {
        self.code.fill(n, 0xCC)
    }

    /// Segment-override prefix for the next instruction.
    pub fn segment(&mut self, seg: Segment) -> Result<(), EmitError> {
        self.code.byte(seg.prefix())
    }

    /// `fs:` prefix for the next instruction.
    pub fn fs(&mut self) -> Result<(), EmitError> {
        self.segment(Segment::Fs)
    }

    /// `gs:` prefix for the next instruction.
    pub fn gs(&mut self) -> Result<(), EmitError> {
        self.segment(Segment::Gs)
    }
}

// ─── Binary ALU families ──────────────────────────────────────

macro_rules! alu_ops {
    ($(
        $desc:ident: $rr64:ident, $rr32:ident, $ir64:ident, $ir32:ident, $imd32:ident,
        $imd64:ident, $i64r:ident, $rmd64:ident, $rmd32:ident;
    )*) => {
        impl X64Assembler {
            $(
                #[doc = concat!("`", stringify!($rr64), "`: `op %src, %dst`.")]
                pub fn $rr64(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
                    self.emit(|b| emit_crr(b, &opcode::$desc, None, src, dst, Qword))
                }

                #[doc = concat!("`", stringify!($rr32), "`: 32-bit `op %src, %dst`.")]
                pub fn $rr32(&mut self, src: Reg, dst: Reg) -> Result<(), EmitError> {
                    self.emit(|b| emit_crr(b, &opcode::$desc, None, src, dst, Dword))
                }

                #[doc = concat!("`", stringify!($ir64), "`: `op $imm32, %dst`.")]
                pub fn $ir64(&mut self, imm: i64, dst: Reg) -> Result<(), EmitError> {
                    self.emit(|b| emit_ir(b, &opcode::$desc, dst, imm, Qword))
                }

                #[doc = concat!("`", stringify!($ir32), "`: 32-bit `op $imm32, %dst`.")]
                pub fn $ir32(&mut self, imm: i64, dst: Reg) -> Result<(), EmitError> {
                    self.emit(|b| emit_ir(b, &opcode::$desc, dst, imm, Dword))
                }

                #[doc = concat!("`", stringify!($imd32), "`: 32-bit `op $imm, disp(%base)`.")]
                pub fn $imd32(&mut self, imm: i64, disp: i32, base: Reg) -> Result<(), EmitError> {
                    let mem = MemRef::base_disp(base, disp);
                    self.emit(|b| emit_cmx(b, &opcode::$desc, None, &mem, None, false, Some(imm), Dword))
                }

                #[doc = concat!("`", stringify!($imd64), "`: 64-bit `op $imm32, disp(%base)`.")]
                pub fn $imd64(&mut self, imm: i64, disp: i32, base: Reg) -> Result<(), EmitError> {
                    let mem = MemRef::base_disp(base, disp);
                    self.emit(|b| emit_cmx(b, &opcode::$desc, None, &mem, None, false, Some(imm), Qword))
                }

                #[doc = concat!(
                    "`", stringify!($i64r), "`: `op $imm, %dst` for any 64-bit value; ",
                    "values outside the 32-bit range are staged in the scratch register."
                )]
                pub fn $i64r(&mut self, imm: i64, dst: Reg) -> Result<(), EmitError> {
                    if fits_i32(imm) {
                        return self.$ir64(imm, dst);
                    }
                    self.via_scratch(imm, dst, |b| {
                        emit_crr(b, &opcode::$desc, None, SCRATCH, dst, Qword)
                    })
                }

                #[doc = concat!("`", stringify!($rmd64), "`: `op %src, disp(%base)`.")]
                pub fn $rmd64(&mut self, src: Reg, disp: i32, base: Reg) -> Result<(), EmitError> {
                    let mem = MemRef::base_disp(base, disp);
                    self.emit(|b| emit_cmx(b, &opcode::$desc, None, &mem, Some(src), false, None, Qword))
                }

                #[doc = concat!("`", stringify!($rmd32), "`: 32-bit `op %src, disp(%base)`.")]
                pub fn $rmd32(&mut self, src: Reg, disp: i32, base: Reg) -> Result<(), EmitError> {
                    let mem = MemRef::base_disp(base, disp);
                    self.emit(|b| emit_cmx(b, &opcode::$desc, None, &mem, Some(src), false, None, Dword))
                }
            )*
        }
    };
}

alu_ops! {
    ADD: add_reg64_reg64, add_reg32_reg32, add_imm32_reg64, add_imm32_reg32,
        add_imm32_disp_reg32, add_imm64_disp_reg64, add_imm64_reg64,
        add_reg64_disp_reg64, add_reg32_disp_reg64;
    SUB: sub_reg64_reg64, sub_reg32_reg32, sub_imm32_reg64, sub_imm32_reg32,
        sub_imm32_disp_reg32, sub_imm64_disp_reg64, sub_imm64_reg64,
        sub_reg64_disp_reg64, sub_reg32_disp_reg64;
    AND: and_reg64_reg64, and_reg32_reg32, and_imm32_reg64, and_imm32_reg32,
        and_imm32_disp_reg32, and_imm64_disp_reg64, and_imm64_reg64,
        and_reg64_disp_reg64, and_reg32_disp_reg64;
    OR: or_reg64_reg64, or_reg32_reg32, or_imm32_reg64, or_imm32_reg32,
        or_imm32_disp_reg32, or_imm64_disp_reg64, or_imm64_reg64,
        or_reg64_disp_reg64, or_reg32_disp_reg64;
    XOR: xor_reg64_reg64, xor_reg32_reg32, xor_imm32_reg64, xor_imm32_reg32,
        xor_imm32_disp_reg32, xor_imm64_disp_reg64, xor_imm64_reg64,
        xor_reg64_disp_reg64, xor_reg32_disp_reg64;
    CMP: cmp_reg64_reg64, cmp_reg32_reg32, cmp_imm32_reg64, cmp_imm32_reg32,
        cmp_imm32_disp_reg32, cmp_imm64_disp_reg64, cmp_imm64_reg64,
        cmp_reg64_disp_reg64, cmp_reg32_disp_reg64;
    TEST: test_reg64_reg64, test_reg32_reg32, test_imm32_reg64, test_imm32_reg32,
        test_imm32_disp_reg32, test_imm64_disp_reg64, test_imm64_reg64,
        test_reg64_disp_reg64, test_reg32_disp_reg64;
    ADC: adc_reg64_reg64, adc_reg32_reg32, adc_imm32_reg64, adc_imm32_reg32,
        adc_imm32_disp_reg32, adc_imm64_disp_reg64, adc_imm64_reg64,
        adc_reg64_disp_reg64, adc_reg32_disp_reg64;
    SBB: sbb_reg64_reg64, sbb_reg32_reg32, sbb_imm32_reg64, sbb_imm32_reg32,
        sbb_imm32_disp_reg32, sbb_imm64_disp_reg64, sbb_imm64_reg64,
        sbb_reg64_disp_reg64, sbb_reg32_disp_reg64;
}

// ─── Shift families ───────────────────────────────────────────

fn require_rcx(count: Reg) -> Result<(), EmitError> {
    if count == RCX {
        Ok(())
    } else {
        Err(EmitError::invalid(alloc::format!(
            "variable shift count must be in rcx, not {}",
            count
        )))
    }
}

macro_rules! shift_ops {
    ($($desc:ident: $imm64:ident, $imm32:ident, $cl64:ident, $cl32:ident;)*) => {
        impl X64Assembler {
            $(
                #[doc = concat!("`", stringify!($imm64), "`: shift `%dst` by a constant, masked to 0..=63.")]
                pub fn $imm64(&mut self, count: u8, dst: Reg) -> Result<(), EmitError> {
                    self.emit(|b| emit_ir(b, &opcode::$desc, dst, i64::from(count), Qword))
                }

                #[doc = concat!("`", stringify!($imm32), "`: shift `%dst32` by a constant, masked to 0..=31.")]
                pub fn $imm32(&mut self, count: u8, dst: Reg) -> Result<(), EmitError> {
                    self.emit(|b| emit_ir(b, &opcode::$desc, dst, i64::from(count), Dword))
                }

                #[doc = concat!("`", stringify!($cl64), "`: shift `%dst` by `%cl`.")]
                pub fn $cl64(&mut self, dst: Reg) -> Result<(), EmitError> {
                    self.unary(&opcode::$desc, dst, Qword)
                }

                #[doc = concat!("`", stringify!($cl32), "`: shift `%dst32` by `%cl`.")]
                pub fn $cl32(&mut self, dst: Reg) -> Result<(), EmitError> {
                    self.unary(&opcode::$desc, dst, Dword)
                }
            )*
        }
    };
}

shift_ops! {
    SHL: shl_imm_reg64, shl_imm_reg32, shl_cl_reg64, shl_cl_reg32;
    SHR: shr_imm_reg64, shr_imm_reg32, shr_cl_reg64, shr_cl_reg32;
    SAR: sar_imm_reg64, sar_imm_reg32, sar_cl_reg64, sar_cl_reg32;
    ROL: rol_imm_reg64, rol_imm_reg32, rol_cl_reg64, rol_cl_reg32;
    ROR: ror_imm_reg64, ror_imm_reg32, ror_cl_reg64, ror_cl_reg32;
    RCL: rcl_imm_reg64, rcl_imm_reg32, rcl_cl_reg64, rcl_cl_reg32;
    RCR: rcr_imm_reg64, rcr_imm_reg32, rcr_cl_reg64, rcr_cl_reg32;
}

// `shl`/`shr` also come in the ALU naming scheme. The register "source"
// is the shift count and must be `rcx`; immediate counts are masked.
macro_rules! shift_alu_ops {
    ($(
        $desc:ident: $rr64:ident, $rr32:ident, $ir64:ident, $ir32:ident, $imd32:ident,
        $imd64:ident, $i64r:ident, $rmd64:ident, $rmd32:ident;
    )*) => {
        impl X64Assembler {
            $(
                #[doc = concat!("`", stringify!($rr64), "`: shift `%dst` by `%cl`; `count` must be `rcx`.")]
                pub fn $rr64(&mut self, count: Reg, dst: Reg) -> Result<(), EmitError> {
                    require_rcx(count)?;
                    self.unary(&opcode::$desc, dst, Qword)
                }

                #[doc = concat!("`", stringify!($rr32), "`: shift `%dst32` by `%cl`; `count` must be `rcx`.")]
                pub fn $rr32(&mut self, count: Reg, dst: Reg) -> Result<(), EmitError> {
                    require_rcx(count)?;
                    self.unary(&opcode::$desc, dst, Dword)
                }

                #[doc = concat!("`", stringify!($ir64), "`: shift `%dst` by a constant.")]
                pub fn $ir64(&mut self, imm: i64, dst: Reg) -> Result<(), EmitError> {
                    self.emit(|b| emit_ir(b, &opcode::$desc, dst, imm, Qword))
                }

                #[doc = concat!("`", stringify!($ir32), "`: shift `%dst32` by a constant.")]
                pub fn $ir32(&mut self, imm: i64, dst: Reg) -> Result<(), EmitError> {
                    self.emit(|b| emit_ir(b, &opcode::$desc, dst, imm, Dword))
                }

                #[doc = concat!("`", stringify!($imd32), "`: shift a 32-bit memory operand by a constant.")]
                pub fn $imd32(&mut self, imm: i64, disp: i32, base: Reg) -> Result<(), EmitError> {
                    let mem = MemRef::base_disp(base, disp);
                    self.emit(|b| emit_cmx(b, &opcode::$desc, None, &mem, None, false, Some(imm), Dword))
                }

                #[doc = concat!("`", stringify!($imd64), "`: shift a 64-bit memory operand by a constant.")]
                pub fn $imd64(&mut self, imm: i64, disp: i32, base: Reg) -> Result<(), EmitError> {
                    let mem = MemRef::base_disp(base, disp);
                    self.emit(|b| emit_cmx(b, &opcode::$desc, None, &mem, None, false, Some(imm), Qword))
                }

                #[doc = concat!("`", stringify!($i64r), "`: same as the 32-bit immediate form; counts are masked.")]
                pub fn $i64r(&mut self, imm: i64, dst: Reg) -> Result<(), EmitError> {
                    self.$ir64(imm, dst)
                }

                #[doc = concat!("`", stringify!($rmd64), "`: shift a 64-bit memory operand by `%cl`.")]
                pub fn $rmd64(&mut self, count: Reg, disp: i32, base: Reg) -> Result<(), EmitError> {
                    require_rcx(count)?;
                    self.unary_mem(&opcode::$desc, base, disp, Qword)
                }

                #[doc = concat!("`", stringify!($rmd32), "`: shift a 32-bit memory operand by `%cl`.")]
                pub fn $rmd32(&mut self, count: Reg, disp: i32, base: Reg) -> Result<(), EmitError> {
                    require_rcx(count)?;
                    self.unary_mem(&opcode::$desc, base, disp, Dword)
                }
            )*
        }
    };
}

shift_alu_ops! {
    SHL: shl_reg64_reg64, shl_reg32_reg32, shl_imm32_reg64, shl_imm32_reg32,
        shl_imm32_disp_reg32, shl_imm64_disp_reg64, shl_imm64_reg64,
        shl_reg64_disp_reg64, shl_reg32_disp_reg64;
    SHR: shr_reg64_reg64, shr_reg32_reg32, shr_imm32_reg64, shr_imm32_reg32,
        shr_imm32_disp_reg32, shr_imm64_disp_reg64, shr_imm64_reg64,
        shr_reg64_disp_reg64, shr_reg32_disp_reg64;
}

// ─── set<cc> shorthands ───────────────────────────────────────

macro_rules! set_cc {
    ($($name:ident => $cc:ident,)*) => {
        impl X64Assembler {
            $(
                #[doc = concat!("`", stringify!($name), " %r8`.")]
                pub fn $name(&mut self, r: Reg) -> Result<(), EmitError> {
                    self.setcc(Cond::$cc, r)
                }
            )*
        }
    };
}

set_cc! {
    seto => O, setno => NO, setb => B, setnae => NAE, setnb => NB, setae => AE,
    sete => E, setz => Z, setne => NE, setnz => NZ, setbe => BE, setnbe => NBE,
    seta => A, sets => S, setns => NS, setp => P, setnp => NP, setl => L,
    setnge => NGE, setnl => NL, setge => GE, setng => NG, setle => LE,
    setnle => NLE, setg => G,
}
