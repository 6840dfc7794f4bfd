//! Relative branches, calls, placeholders and patching.
//!
//! Direct jumps and calls measure their displacement from the end of the
//! instruction. `jmp` and `call` fall back to an absolute transfer through
//! the scratch register when the target is more than ±2 GiB away; the
//! short and conditional forms have no fallback and report
//! [`EmitError::DisplacementOutOfRange`] instead.
//!
//! Forward references are emitted as placeholders that branch to
//! themselves and are patched once the target is known. Placeholders pad
//! themselves with NOPs so the whole instruction sits inside one aligned
//! 8-byte word, and a patch rewrites the displacement with a single store;
//! sites that would need more than one store are refused. A patched
//! placeholder is byte-identical to a branch emitted directly to the same
//! target after [`prepare_for_patch`](X64Assembler::prepare_for_patch).

use crate::assembler::X64Assembler;
use crate::encoder::{emit_ci_sized, emit_cmx, emit_cr, emit_ir, ImmSize, InstrBytes};
use crate::error::EmitError;
use crate::opcode::{self, Opcode};
use crate::operand::{Cond, MemRef, OpSize, Reg, ARG_REGS, SCRATCH};
use crate::CodeAddress;

/// Length of `jmp rel32`.
pub const JMP_LEN: usize = 5;
/// Length of `jmp rel8`.
pub const JMP8_LEN: usize = 2;
/// Length of `j<cc> rel32`.
pub const JCC_LEN: usize = 6;
/// Length of `j<cc> rel8`.
pub const JCC8_LEN: usize = 2;
/// Length of `call rel32`.
pub const CALL_LEN: usize = 5;

/// Displacement from the end of a `len`-byte instruction at `site` to
/// `dest`.
fn rel(site: CodeAddress, len: usize, dest: CodeAddress) -> i128 {
    i128::from(dest) - i128::from(site) - len as i128
}

fn out_of_range(delta: i128, max: i64) -> EmitError {
    let disp = i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX });
    EmitError::DisplacementOutOfRange { disp, max }
}

fn rel8(site: CodeAddress, len: usize, dest: CodeAddress) -> Result<i8, EmitError> {
    let delta = rel(site, len, dest);
    i8::try_from(delta).map_err(|_| out_of_range(delta, i64::from(i8::MAX)))
}

fn rel32(site: CodeAddress, len: usize, dest: CodeAddress) -> Result<i32, EmitError> {
    let delta = rel(site, len, dest);
    i32::try_from(delta).map_err(|_| out_of_range(delta, i64::from(i32::MAX)))
}

/// `jmp`/`call` to `dest` as if placed at `site`: `rel32` when it reaches,
/// `mov $dest, %r10; jmp/call *%r10` otherwise.
fn encode_far(
    buf: &mut InstrBytes,
    op: &Opcode,
    site: CodeAddress,
    dest: CodeAddress,
) -> Result<(), EmitError> {
    if let Ok(d) = rel32(site, JMP_LEN, dest) {
        return emit_ci_sized(buf, op, None, i64::from(d), ImmSize::Dword);
    }
    log::debug!("{:#x}: {} target {:#x} out of rel32 range, using r10", site, op.name, dest);
    emit_ir(buf, &opcode::MOV, SCRATCH, dest as i64, OpSize::Qword)?;
    emit_cr(buf, op, None, SCRATCH, OpSize::Qword)
}

/// The patchable branch shapes.
#[derive(Debug, Clone, Copy)]
enum Site {
    Jmp,
    Jmp8,
    Jcc,
    Jcc8,
    Call,
}

impl Site {
    fn len(self) -> usize {
        match self {
            Site::Jmp => JMP_LEN,
            Site::Jmp8 => JMP8_LEN,
            Site::Jcc => JCC_LEN,
            Site::Jcc8 => JCC8_LEN,
            Site::Call => CALL_LEN,
        }
    }

    fn is_short(self) -> bool {
        matches!(self, Site::Jmp8 | Site::Jcc8)
    }

    fn matches(self, head: &[u8]) -> bool {
        match self {
            Site::Jmp => head[0] == 0xE9,
            Site::Jmp8 => head[0] == 0xEB,
            Site::Jcc => head[0] == 0x0F && head[1] & 0xF0 == 0x80,
            Site::Jcc8 => head[0] & 0xF0 == 0x70,
            Site::Call => head[0] == 0xE8,
        }
    }

    fn expected(self) -> &'static str {
        match self {
            Site::Jmp => "jmp rel32 (E9)",
            Site::Jmp8 => "jmp rel8 (EB)",
            Site::Jcc => "jcc rel32 (0F 8x)",
            Site::Jcc8 => "jcc rel8 (7x)",
            Site::Call => "call rel32 (E8)",
        }
    }
}

impl X64Assembler {
    // ─── Direct branches ──────────────────────────────────────

    fn far(&mut self, op: &Opcode, dest: CodeAddress) -> Result<(), EmitError> {
        let site = self.frontier();
        self.emit(|b| encode_far(b, op, site, dest))
    }

    /// `jmp dest`: 5 bytes when in `rel32` range, up to 13 through `r10`
    /// when not.
    pub fn jmp(&mut self, dest: CodeAddress) -> Result<(), EmitError> {
        self.far(&opcode::JMP, dest)
    }

    /// `call dest`: 5 bytes when in `rel32` range, up to 13 through `r10`
    /// when not.
    pub fn call(&mut self, dest: CodeAddress) -> Result<(), EmitError> {
        self.far(&opcode::CALL, dest)
    }

    /// Two-byte `jmp dest`.
    pub fn jmp8(&mut self, dest: CodeAddress) -> Result<(), EmitError> {
        let d = rel8(self.frontier(), JMP8_LEN, dest)?;
        self.emit(|b| emit_ci_sized(b, &opcode::JMP, None, i64::from(d), ImmSize::Byte))
    }

    /// Two-byte `j<cc> dest`.
    pub fn jcc8(&mut self, cc: Cond, dest: CodeAddress) -> Result<(), EmitError> {
        let d = rel8(self.frontier(), JCC8_LEN, dest)?;
        self.emit(|b| emit_ci_sized(b, &opcode::JCC_OP, Some(cc), i64::from(d), ImmSize::Byte))
    }

    /// Six-byte `j<cc> dest`.
    pub fn jcc(&mut self, cc: Cond, dest: CodeAddress) -> Result<(), EmitError> {
        let d = rel32(self.frontier(), JCC_LEN, dest)?;
        self.emit(|b| emit_ci_sized(b, &opcode::JCC_OP, Some(cc), i64::from(d), ImmSize::Dword))
    }

    // ─── Indirect branches ────────────────────────────────────

    /// `jmp *%r`.
    pub fn jmp_reg(&mut self, r: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_cr(b, &opcode::JMP, None, r, OpSize::Qword))
    }

    /// `call *%r`.
    pub fn call_reg(&mut self, r: Reg) -> Result<(), EmitError> {
        self.emit(|b| emit_cr(b, &opcode::CALL, None, r, OpSize::Qword))
    }

    /// `jmp *mem`.
    pub fn jmp_mem(&mut self, mem: &MemRef) -> Result<(), EmitError> {
        self.emit(|b| emit_cmx(b, &opcode::JMP, None, mem, None, false, None, OpSize::Qword))
    }

    /// `call *mem`.
    pub fn call_mem(&mut self, mem: &MemRef) -> Result<(), EmitError> {
        self.emit(|b| emit_cmx(b, &opcode::CALL, None, mem, None, false, None, OpSize::Qword))
    }

    // ─── Calls with arguments ─────────────────────────────────

    /// Load up to six integer arguments into the System V argument
    /// registers, then `call dest`. The whole sequence is committed at once.
    pub fn call_with_args(&mut self, dest: CodeAddress, args: &[i64]) -> Result<(), EmitError> {
        if args.len() > ARG_REGS.len() {
            return Err(EmitError::invalid(alloc::format!(
                "{} arguments do not fit the {} argument registers",
                args.len(),
                ARG_REGS.len()
            )));
        }
        let mut bufs: [InstrBytes; 7] = Default::default();
        let mut site = self.frontier();
        for (buf, (&arg, &reg)) in bufs.iter_mut().zip(args.iter().zip(ARG_REGS.iter())) {
            emit_ir(buf, &opcode::MOV, reg, arg, OpSize::Qword)?;
            site += buf.len() as CodeAddress;
        }
        let n = args.len();
        encode_far(&mut bufs[n], &opcode::CALL, site, dest)?;
        self.commit_all(&bufs[..=n])
    }

    /// `call dest` with one argument in `rdi`.
    pub fn call1(&mut self, dest: CodeAddress, a1: i64) -> Result<(), EmitError> {
        self.call_with_args(dest, &[a1])
    }

    /// `call dest` with arguments in `rdi`, `rsi`.
    pub fn call2(&mut self, dest: CodeAddress, a1: i64, a2: i64) -> Result<(), EmitError> {
        self.call_with_args(dest, &[a1, a2])
    }

    /// `call dest` with arguments in `rdi`, `rsi`, `rdx`.
    pub fn call3(&mut self, dest: CodeAddress, a1: i64, a2: i64, a3: i64) -> Result<(), EmitError> {
        self.call_with_args(dest, &[a1, a2, a3])
    }

    /// `call dest` with arguments in `rdi` through `rcx`.
    pub fn call4(
        &mut self,
        dest: CodeAddress,
        a1: i64,
        a2: i64,
        a3: i64,
        a4: i64,
    ) -> Result<(), EmitError> {
        self.call_with_args(dest, &[a1, a2, a3, a4])
    }

    /// `call dest` with arguments in `rdi` through `r8`.
    pub fn call5(
        &mut self,
        dest: CodeAddress,
        a1: i64,
        a2: i64,
        a3: i64,
        a4: i64,
        a5: i64,
    ) -> Result<(), EmitError> {
        self.call_with_args(dest, &[a1, a2, a3, a4, a5])
    }

    /// `call dest` with arguments in all six argument registers.
    #[allow(clippy::too_many_arguments)]
    pub fn call6(
        &mut self,
        dest: CodeAddress,
        a1: i64,
        a2: i64,
        a3: i64,
        a4: i64,
        a5: i64,
        a6: i64,
    ) -> Result<(), EmitError> {
        self.call_with_args(dest, &[a1, a2, a3, a4, a5, a6])
    }

    // ─── Placeholders ─────────────────────────────────────────

    /// Pad with NOPs so the next `len` bytes sit inside one aligned 8-byte
    /// word, making a later patch a single atomic store.
    pub fn prepare_for_patch(&mut self, len: usize) -> Result<(), EmitError> {
        if len > 8 {
            return Err(EmitError::invalid(alloc::format!(
                "a {}-byte site cannot fit one 8-byte word",
                len
            )));
        }
        let misalign = (self.frontier() % 8) as usize;
        if misalign + len > 8 {
            self.emit_nop(8 - misalign)?;
        }
        Ok(())
    }

    /// Align for a `len`-byte site, then emit it branching to itself.
    /// Nothing stays emitted when the branch does not fit.
    fn placeholder(
        &mut self,
        len: usize,
        emit: impl FnOnce(&mut Self, CodeAddress) -> Result<(), EmitError>,
    ) -> Result<CodeAddress, EmitError> {
        let start = self.frontier();
        self.prepare_for_patch(len)?;
        let site = self.frontier();
        if let Err(err) = emit(self, site) {
            self.code_mut().set_frontier(start)?;
            return Err(err);
        }
        Ok(site)
    }

    /// `jmp` to itself, for [`patch_jmp`](Self::patch_jmp). Returns the
    /// site address, which is padded to sit inside one 8-byte word.
    pub fn jmp_placeholder(&mut self) -> Result<CodeAddress, EmitError> {
        self.placeholder(JMP_LEN, |a, site| a.jmp(site))
    }

    /// Two-byte `jmp` to itself, for [`patch_jmp8`](Self::patch_jmp8).
    pub fn jmp8_placeholder(&mut self) -> Result<CodeAddress, EmitError> {
        self.placeholder(JMP8_LEN, |a, site| a.jmp8(site))
    }

    /// `j<cc>` to itself, for [`patch_jcc`](Self::patch_jcc).
    pub fn jcc_placeholder(&mut self, cc: Cond) -> Result<CodeAddress, EmitError> {
        self.placeholder(JCC_LEN, |a, site| a.jcc(cc, site))
    }

    /// Two-byte `j<cc>` to itself, for [`patch_jcc8`](Self::patch_jcc8).
    pub fn jcc8_placeholder(&mut self, cc: Cond) -> Result<CodeAddress, EmitError> {
        self.placeholder(JCC8_LEN, |a, site| a.jcc8(cc, site))
    }

    /// `call` to itself, for [`patch_call`](Self::patch_call).
    pub fn call_placeholder(&mut self) -> Result<CodeAddress, EmitError> {
        self.placeholder(CALL_LEN, |a, site| a.call(site))
    }

    // ─── Patching ─────────────────────────────────────────────

    fn patch(&mut self, kind: Site, site: CodeAddress, dest: CodeAddress) -> Result<(), EmitError> {
        let len = kind.len();
        let head = self.code().read(site, len)?;
        if !kind.matches(head) {
            return Err(EmitError::PatchMismatch {
                addr: site,
                expected: kind.expected().into(),
                found: [head[0], head[1]],
            });
        }
        if kind.is_short() {
            let d = rel8(site, len, dest)?;
            self.code_mut().store_atomic(site + 1, &d.to_le_bytes())?;
        } else {
            let d = rel32(site, len, dest)?;
            self.code_mut().store_atomic(site + (len - 4) as CodeAddress, &d.to_le_bytes())?;
        }
        log::trace!("{:#x}: retarget {:?} -> {:#x}", site, kind, dest);
        Ok(())
    }

    /// Point the `jmp rel32` at `site` to `dest`.
    pub fn patch_jmp(&mut self, site: CodeAddress, dest: CodeAddress) -> Result<(), EmitError> {
        self.patch(Site::Jmp, site, dest)
    }

    /// Point the `jmp rel8` at `site` to `dest`.
    pub fn patch_jmp8(&mut self, site: CodeAddress, dest: CodeAddress) -> Result<(), EmitError> {
        self.patch(Site::Jmp8, site, dest)
    }

    /// Point the `j<cc> rel32` at `site` to `dest`; the condition is kept.
    pub fn patch_jcc(&mut self, site: CodeAddress, dest: CodeAddress) -> Result<(), EmitError> {
        self.patch(Site::Jcc, site, dest)
    }

    /// Point the `j<cc> rel8` at `site` to `dest`; the condition is kept.
    pub fn patch_jcc8(&mut self, site: CodeAddress, dest: CodeAddress) -> Result<(), EmitError> {
        self.patch(Site::Jcc8, site, dest)
    }

    /// Point the `call rel32` at `site` to `dest`.
    pub fn patch_call(&mut self, site: CodeAddress, dest: CodeAddress) -> Result<(), EmitError> {
        self.patch(Site::Call, site, dest)
    }
}

macro_rules! jump_cc {
    ($($name:ident => $cc:ident,)*) => {
        impl X64Assembler {
            $(
                #[doc = concat!("`", stringify!($name), " dest` (rel32).")]
                pub fn $name(&mut self, dest: CodeAddress) -> Result<(), EmitError> {
                    self.jcc(Cond::$cc, dest)
                }
            )*
        }
    };
}

jump_cc! {
    jo => O, jno => NO, jb => B, jnae => NAE, jnb => NB, jae => AE,
    je => E, jz => Z, jne => NE, jnz => NZ, jbe => BE, jnbe => NBE,
    ja => A, js => S, jns => NS, jp => P, jnp => NP, jl => L,
    jnge => NGE, jnl => NL, jge => GE, jng => NG, jle => LE,
    jnle => NLE, jg => G,
}
