//! Exact-byte encoding tests for the mnemonic façade.
//!
//! Every expectation here was checked against the Intel SDM encoding
//! tables. The decoder-based checks live in `cross_validate.rs`.

use x64_emit::*;

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn asm() -> X64Assembler {
    X64Assembler::new(DataBlock::new(1024).unwrap())
}

/// Run `f` on a fresh assembler and return what it emitted.
fn emit(f: impl FnOnce(&mut X64Assembler) -> Result<(), EmitError>) -> Vec<u8> {
    let mut a = asm();
    f(&mut a).unwrap_or_else(|e| panic!("emission failed: {e}"));
    a.code().as_slice().to_vec()
}

fn rex(w: bool, r: Reg, b: Reg) -> Option<u8> {
    let bits = (u8::from(w) << 3) | (u8::from(r.is_extended()) << 2) | u8::from(b.is_extended());
    (bits != 0).then_some(0x40 | bits)
}

// ─── Headline encodings ───────────────────────────────────────────────────────

#[test]
fn mov_add_ret() {
    assert_eq!(emit(|a| a.mov_reg64_reg64(RAX, RBX)), [0x48, 0x89, 0xC3]);
    assert_eq!(emit(|a| a.add_imm32_reg64(5, RDI)), [0x48, 0x83, 0xC7, 0x05]);
    assert_eq!(emit(|a| a.ret()), [0xC3]);
}

#[test]
fn mov_reg64_reg64_formula_holds_for_every_pair() {
    for src in Reg::all() {
        for dst in Reg::all() {
            let got = emit(|a| a.mov_reg64_reg64(src, dst));
            let mut want = vec![rex(true, src, dst).unwrap()];
            want.push(0x89);
            want.push(0xC0 | (src.low3() << 3) | dst.low3());
            assert_eq!(got, want, "mov {src} -> {dst}");
        }
    }
}

#[test]
fn mov_reg32_reg32_omits_rex_for_legacy_registers() {
    for src in Reg::all() {
        for dst in Reg::all() {
            let got = emit(|a| a.mov_reg32_reg32(src, dst));
            let mut want: Vec<u8> = rex(false, src, dst).into_iter().collect();
            want.extend([0x89, 0xC0 | (src.low3() << 3) | dst.low3()]);
            assert_eq!(got, want, "movl {src} -> {dst}");
        }
    }
}

// ─── Immediates ───────────────────────────────────────────────────────────────

#[test]
fn mov_imm64_reg_picks_narrowest_width() {
    assert_eq!(
        emit(|a| a.mov_imm64_reg(0x7FFF_FFFF, RAX)),
        [0x48, 0xC7, 0xC0, 0xFF, 0xFF, 0xFF, 0x7F]
    );
    assert_eq!(
        emit(|a| a.mov_imm64_reg(i64::from(i32::MIN), R15)),
        [0x49, 0xC7, 0xC7, 0x00, 0x00, 0x00, 0x80]
    );
    assert_eq!(
        emit(|a| a.mov_imm64_reg(0x8000_0000, RDX)),
        [0x48, 0xBA, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00]
    );
    assert_eq!(
        emit(|a| a.mov_imm64_reg(-0x8000_0001, R9)),
        [0x49, 0xB9, 0xFF, 0xFF, 0xFF, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF]
    );
}

#[test]
fn alu_immediate_widths() {
    // imm8 sign-extended
    assert_eq!(emit(|a| a.sub_imm32_reg64(-128, RSP)), [0x48, 0x83, 0xEC, 0x80]);
    // imm32
    assert_eq!(
        emit(|a| a.sub_imm32_reg64(128, RSP)),
        [0x48, 0x81, 0xEC, 0x80, 0x00, 0x00, 0x00]
    );
    // accumulator short form
    assert_eq!(
        emit(|a| a.and_imm32_reg32(0xFF00, RAX)),
        [0x25, 0x00, 0xFF, 0x00, 0x00]
    );
    // test has no imm8 form
    assert_eq!(
        emit(|a| a.test_imm32_reg64(1, RBX)),
        [0x48, 0xF7, 0xC3, 0x01, 0x00, 0x00, 0x00]
    );
}

#[test]
fn alu_immediate_range_errors_write_nothing() {
    let mut a = asm();
    assert!(matches!(
        a.add_imm32_reg64(0x8000_0000, RAX),
        Err(EmitError::InvalidOperand { .. })
    ));
    assert!(matches!(
        a.cmp_imm32_reg32(0x1_0000_0000, RAX),
        Err(EmitError::InvalidOperand { .. })
    ));
    assert_eq!(a.code().used(), 0);
}

#[test]
fn imm64_reg64_switches_to_scratch() {
    let b = emit(|a| a.cmp_imm64_reg64(0x1234_5678_9ABC, R11));
    assert_eq!(
        b,
        [0x49, 0xBA, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00, 0x4D, 0x39, 0xD3]
    );
}

// ─── Memory operands ─────────────────────────────────────────────────────────

#[test]
fn memory_operand_shapes() {
    // no SIB, mod 00
    assert_eq!(emit(|a| a.load_reg64_disp_reg64(RSI, 0, RAX)), [0x48, 0x8B, 0x06]);
    // RBP forces disp8
    assert_eq!(emit(|a| a.load_reg64_disp_reg64(RBP, 0, RAX)), [0x48, 0x8B, 0x45, 0x00]);
    // R13 too
    assert_eq!(emit(|a| a.store_reg64_disp_reg64(RAX, 0, R13)), [0x49, 0x89, 0x45, 0x00]);
    // RSP needs SIB
    assert_eq!(
        emit(|a| a.store_reg64_disp_reg64(R8, -8, RSP)),
        [0x4C, 0x89, 0x44, 0x24, 0xF8]
    );
    // R12 too, with disp32
    assert_eq!(
        emit(|a| a.load_reg64_disp_reg64(R12, 0x200, RCX)),
        [0x49, 0x8B, 0x8C, 0x24, 0x00, 0x02, 0x00, 0x00]
    );
}

#[test]
fn full_sib_forms() {
    // mov r8, [r12+r13*2-4]
    assert_eq!(
        emit(|a| a.load_mem_reg64(&MemRef::sib(R12, R13, 2, -4), R8)),
        [0x4F, 0x8B, 0x44, 0x6C, 0xFC]
    );
    // mov [rbp+rax*8], rdx
    assert_eq!(
        emit(|a| a.store_reg64_mem(RDX, &MemRef::sib(RBP, RAX, 8, 0))),
        [0x48, 0x89, 0x54, 0xC5, 0x00]
    );
    // lea rax, [rip+0x100]
    assert_eq!(
        emit(|a| a.lea_mem_reg64(&MemRef::rip(0x100), RAX)),
        [0x48, 0x8D, 0x05, 0x00, 0x01, 0x00, 0x00]
    );
}

#[test]
fn invalid_memory_operands_are_rejected() {
    let mut a = asm();
    assert!(a.load_mem_reg64(&MemRef::sib(RAX, RSP, 1, 0), RBX).is_err());
    assert!(a.load_mem_reg64(&MemRef::sib(RAX, RCX, 5, 0), RBX).is_err());
    assert_eq!(a.code().used(), 0);
}

#[test]
fn memory_immediate_and_register_forms() {
    assert_eq!(
        emit(|a| a.add_imm32_disp_reg32(1, 4, RDI)),
        [0x83, 0x47, 0x04, 0x01]
    );
    assert_eq!(
        emit(|a| a.cmp_imm64_disp_reg64(0x1000, 0, RAX)),
        [0x48, 0x81, 0x38, 0x00, 0x10, 0x00, 0x00]
    );
    assert_eq!(
        emit(|a| a.or_reg64_disp_reg64(R9, 0x10, RBX)),
        [0x4C, 0x09, 0x4B, 0x10]
    );
    assert_eq!(
        emit(|a| a.xor_reg32_disp_reg64(RDX, 0, R14)),
        [0x41, 0x31, 0x16]
    );
    assert_eq!(
        emit(|a| a.load_reg64_disp_reg32(RBX, 8, R10)),
        [0x44, 0x8B, 0x53, 0x08]
    );
}

// ─── Shifts ───────────────────────────────────────────────────────────────────

#[test]
fn shift_encodings() {
    assert_eq!(emit(|a| a.shl_imm32_reg64(1, RAX)), [0x48, 0xD1, 0xE0]);
    assert_eq!(emit(|a| a.shl_imm32_reg64(4, RAX)), [0x48, 0xC1, 0xE0, 0x04]);
    assert_eq!(emit(|a| a.shr_imm64_reg64(64 + 4, RAX)), [0x48, 0xC1, 0xE8, 0x04]);
    assert_eq!(emit(|a| a.sar_cl_reg32(R8)), [0x41, 0xD3, 0xF8]);
    assert_eq!(emit(|a| a.ror_imm_reg64(13, R14)), [0x49, 0xC1, 0xCE, 0x0D]);
    assert_eq!(emit(|a| a.rcl_cl_reg64(RBX)), [0x48, 0xD3, 0xD3]);
    assert_eq!(emit(|a| a.rcr_imm_reg32(1, RCX)), [0xD1, 0xD9]);
    // memory by one and by constant
    assert_eq!(emit(|a| a.shl_imm64_disp_reg64(1, 8, RDI)), [0x48, 0xD1, 0x67, 0x08]);
    assert_eq!(
        emit(|a| a.shr_imm32_disp_reg32(3, 0, RSI)),
        [0xC1, 0x2E, 0x03]
    );
    assert_eq!(emit(|a| a.shr_reg64_disp_reg64(RCX, 0, RDI)), [0x48, 0xD3, 0x2F]);
    assert_eq!(
        emit(|a| a.shld_imm_reg64_reg64(8, R9, RAX)),
        [0x4C, 0x0F, 0xA4, 0xC8, 0x08]
    );
    assert_eq!(emit(|a| a.shld_cl_reg64_reg64(RDX, RAX)), [0x48, 0x0F, 0xA5, 0xD0]);
    assert_eq!(
        emit(|a| a.shrd_imm_reg64_reg64(1, RDX, RAX)),
        [0x48, 0x0F, 0xAC, 0xD0, 0x01]
    );
}

// ─── Multiply / divide / unary ────────────────────────────────────────────────

#[test]
fn multiply_divide() {
    assert_eq!(emit(|a| a.imul_reg64_reg64(RBX, RAX)), [0x48, 0x0F, 0xAF, 0xC3]);
    assert_eq!(emit(|a| a.imul_reg64_reg64(R8, R9)), [0x4D, 0x0F, 0xAF, 0xC8]);
    assert_eq!(
        emit(|a| a.imul_imm_reg64_reg64(-3, RSI, RDI)),
        [0x48, 0x6B, 0xFE, 0xFD]
    );
    assert_eq!(emit(|a| a.imul(RCX)), [0x48, 0xF7, 0xE9]);
    assert_eq!(emit(|a| a.mul(R11)), [0x49, 0xF7, 0xE3]);
    assert_eq!(emit(|a| a.div(RBX)), [0x48, 0xF7, 0xF3]);
    assert_eq!(emit(|a| a.idiv(RCX)), [0x48, 0xF7, 0xF9]);
}

#[test]
fn unary_forms() {
    assert_eq!(emit(|a| a.not_reg64(R15)), [0x49, 0xF7, 0xD7]);
    assert_eq!(emit(|a| a.neg_reg64(RAX)), [0x48, 0xF7, 0xD8]);
    assert_eq!(emit(|a| a.inc_reg64(RCX)), [0x48, 0xFF, 0xC1]);
    assert_eq!(emit(|a| a.dec_reg32(RDX)), [0xFF, 0xCA]);
    assert_eq!(emit(|a| a.inc_mem64(RBP, -8)), [0x48, 0xFF, 0x45, 0xF8]);
    assert_eq!(emit(|a| a.dec_mem32(RSP, 0)), [0xFF, 0x0C, 0x24]);
    assert_eq!(emit(|a| a.inc_mem32(R12, 4)), [0x41, 0xFF, 0x44, 0x24, 0x04]);
    assert_eq!(emit(|a| a.dec_mem64(RAX, 0)), [0x48, 0xFF, 0x08]);
}

// ─── Exchange ─────────────────────────────────────────────────────────────────

#[test]
fn xchg_short_and_long_forms() {
    assert_eq!(emit(|a| a.xchg_reg64_reg64(RAX, RDX)), [0x48, 0x92]);
    assert_eq!(emit(|a| a.xchg_reg64_reg64(R9, RAX)), [0x49, 0x91]);
    assert_eq!(emit(|a| a.xchg_reg32_reg32(RBX, RAX)), [0x93]);
    assert_eq!(emit(|a| a.xchg_reg32_reg32(RAX, RAX)), [0x87, 0xC0]);
    assert_eq!(emit(|a| a.xchg_reg64_reg64(RAX, RAX)), [0x48, 0x90]);
    assert_eq!(emit(|a| a.xchg_reg64_reg64(RSI, RDI)), [0x48, 0x87, 0xF7]);
}

// ─── Conditional ──────────────────────────────────────────────────────────────

#[test]
fn setcc_every_condition() {
    for cc in Cond::all() {
        assert_eq!(
            emit(|a| a.setcc(cc, RCX)),
            [0x0F, 0x90 | cc.code(), 0xC1],
            "set{cc}"
        );
    }
    // SPL..DIL need a bare REX; R8B..R15B a REX.B
    assert_eq!(emit(|a| a.setl(RSP)), [0x40, 0x0F, 0x9C, 0xC4]);
    assert_eq!(emit(|a| a.setg(R15)), [0x41, 0x0F, 0x9F, 0xC7]);
}

#[test]
fn cmov_every_condition() {
    for cc in Cond::all() {
        assert_eq!(
            emit(|a| a.cmov_reg64_reg64(cc, R10, RDX)),
            [0x49, 0x0F, 0x40 | cc.code(), 0xD2],
            "cmov{cc}"
        );
    }
}

// ─── Emit-imm selection ───────────────────────────────────────────────────────

#[test]
fn emit_imm_reg_selection() {
    assert_eq!(emit(|a| a.emit_imm_reg(0, R12)), [0x45, 0x31, 0xE4]);
    assert_eq!(emit(|a| a.emit_imm_reg(42, RAX)), [0xC7, 0xC0, 42, 0, 0, 0]);
    assert_eq!(emit(|a| a.emit_imm_reg(-2, RAX)), [0x48, 0xC7, 0xC0, 0xFE, 0xFF, 0xFF, 0xFF]);
    assert_eq!(emit(|a| a.emit_imm_reg(i64::MIN, RAX))[..2], [0x48, 0xB8]);
}

// ─── Capacity ─────────────────────────────────────────────────────────────────

#[test]
fn over_capacity_writes_nothing() {
    let mut a = X64Assembler::new(DataBlock::new(8).unwrap());
    a.mov_imm64_reg(1, RAX).unwrap();
    let before = a.frontier();
    let err = a.mov_imm64_reg(1, RAX).unwrap_err();
    assert_eq!(
        err,
        EmitError::CapacityExceeded {
            requested: 7,
            available: 1
        }
    );
    assert_eq!(a.frontier(), before);
    a.ret().unwrap();
    assert!(a.ret().is_err());
    assert_eq!(a.code().available(), 0);
}

#[test]
fn raw_data_appends() {
    let b = emit(|a| {
        a.byte(0x90)?;
        a.word(0x1234)?;
        a.dword(0xDEAD_BEEF)?;
        a.qword(1)?;
        a.bytes(&[0xCC, 0xCC])
    });
    assert_eq!(
        b,
        [0x90, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE, 1, 0, 0, 0, 0, 0, 0, 0, 0xCC, 0xCC]
    );
}
