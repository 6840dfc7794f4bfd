//! Branch placeholder and patching scenarios.
//!
//! A JIT backend emits forward branches before it knows their targets,
//! then fixes them up once the layout is final. These tests walk through
//! that life cycle and check every way a patch can be refused.

use x64_emit::*;

fn asm(size: usize) -> X64Assembler {
    X64Assembler::new(DataBlock::new(size).unwrap())
}

fn rel32_at(a: &X64Assembler, addr: CodeAddress) -> i32 {
    let b = a.code().read(addr, 4).unwrap();
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

// ─── Life cycle ──────────────────────────────────────────────────────────────

#[test]
fn forward_exit_and_backward_loop() {
    // while (rdi != 0) { rax += rdi; rdi -= 1 }
    let mut a = asm(128);
    a.emit_imm_reg(0, RAX).unwrap();
    let head = a.frontier();
    a.test_reg64_reg64(RDI, RDI).unwrap();
    let exit = a.jcc_placeholder(Cond::E).unwrap();
    a.add_reg64_reg64(RDI, RAX).unwrap();
    a.dec_reg64(RDI).unwrap();
    a.jmp(head).unwrap();
    let done = a.frontier();
    a.ret().unwrap();

    a.patch_jcc(exit, done).unwrap();
    assert_eq!(
        rel32_at(&a, exit + 2),
        (done - (exit + JCC_LEN as u64)) as i32
    );
    // the loop-back jmp is 5 bytes and lands on `head`
    let jmp_site = done - JMP_LEN as u64;
    assert_eq!(a.code().read(jmp_site, 1).unwrap(), &[0xE9]);
    assert_eq!(
        i64::from(rel32_at(&a, jmp_site + 1)),
        head as i64 - done as i64
    );
}

#[test]
fn a_site_can_be_patched_repeatedly() {
    let mut a = asm(64);
    let site = a.jmp_placeholder().unwrap();
    a.emit_int3s(16).unwrap();
    for dest in [site + 5, site + 10, site, site + 21] {
        a.patch_jmp(site, dest).unwrap();
        assert_eq!(
            i64::from(rel32_at(&a, site + 1)),
            dest as i64 - (site as i64 + 5)
        );
    }
    // length never changes
    assert_eq!(a.code().used(), JMP_LEN + 16);
}

#[test]
fn patching_a_condition_keeps_it() {
    let mut a = asm(64);
    let long = a.jcc_placeholder(Cond::LE).unwrap();
    let short = a.jcc8_placeholder(Cond::NS).unwrap();
    let end = a.frontier() + 4;
    a.emit_nop(4).unwrap();
    a.patch_jcc(long, end).unwrap();
    a.patch_jcc8(short, end).unwrap();
    assert_eq!(a.code().read(long, 2).unwrap(), &[0x0F, 0x8E]);
    assert_eq!(a.code().read(short, 2).unwrap(), &[0x79, 0x04]);
}

// ─── Refusals ────────────────────────────────────────────────────────────────

#[test]
fn wrong_opcode_is_a_mismatch() {
    let mut a = asm(64);
    let site = a.frontier();
    a.mov_reg64_reg64(RAX, RBX).unwrap();
    a.emit_nop(8).unwrap();
    let before = a.code().as_slice().to_vec();
    for result in [
        a.patch_jmp(site, site),
        a.patch_jmp8(site, site),
        a.patch_jcc(site, site),
        a.patch_jcc8(site, site),
        a.patch_call(site, site),
    ] {
        match result {
            Err(EmitError::PatchMismatch { addr, found, .. }) => {
                assert_eq!(addr, site);
                assert_eq!(found, [0x48, 0x89]);
            }
            other => panic!("expected a mismatch, got {other:?}"),
        }
    }
    assert_eq!(a.code().as_slice(), &before[..]);
}

#[test]
fn jmp_and_call_are_not_interchangeable() {
    let mut a = asm(64);
    let j = a.jmp_placeholder().unwrap();
    let c = a.call_placeholder().unwrap();
    assert!(matches!(a.patch_call(j, c), Err(EmitError::PatchMismatch { .. })));
    assert!(matches!(a.patch_jmp(c, j), Err(EmitError::PatchMismatch { .. })));
}

#[test]
fn sites_outside_emitted_code_are_out_of_bounds() {
    let mut a = asm(64);
    let site = a.jmp_placeholder().unwrap();
    let past = a.frontier();
    assert_eq!(
        a.patch_jmp(past, site).unwrap_err(),
        EmitError::AddressOutOfBounds { addr: past, len: JMP_LEN }
    );
    assert!(matches!(
        a.patch_jmp(site.wrapping_sub(1), site),
        Err(EmitError::AddressOutOfBounds { .. })
    ));
    assert!(matches!(
        a.patch_call(0, site),
        Err(EmitError::AddressOutOfBounds { .. })
    ));
}

#[test]
fn out_of_range_target_leaves_site_untouched() {
    let mut a = asm(512);
    let site = a.jmp8_placeholder().unwrap();
    a.emit_int3s(300).unwrap();
    let before = a.code().as_slice().to_vec();
    let err = a.patch_jmp8(site, site + 300).unwrap_err();
    assert_eq!(
        err,
        EmitError::DisplacementOutOfRange { disp: 298, max: 127 }
    );
    assert_eq!(a.code().as_slice(), &before[..]);
    // the same distance is fine for the rel32 form
    let long = a.jmp_placeholder().unwrap();
    a.patch_jmp(long, site).unwrap();
}

// ─── Atomic patch sites ──────────────────────────────────────────────────────

#[test]
fn prepared_sites_patch_with_a_single_store() {
    let mut a = asm(1024);
    for pad in 0..16 {
        a.emit_int3s(pad).unwrap();
        a.prepare_for_patch(JMP_LEN).unwrap();
        let site = a.jmp_placeholder().unwrap();
        assert!(site % 8 + JMP_LEN as u64 <= 8, "site {site:#x} straddles a word");
        // the displacement field alone can always be stored atomically
        a.code_mut()
            .store_atomic(site + 1, &0_i32.to_le_bytes())
            .unwrap();
    }
}

#[test]
fn word_crossing_sites_are_refused() {
    let mut a = asm(64);
    a.emit_int3s(4).unwrap();
    // emitted directly, so the displacement lands on bytes 5..9
    let site = a.frontier();
    a.jmp(site).unwrap();
    a.emit_int3s(8).unwrap();
    let before = a.code().as_slice().to_vec();
    assert!(matches!(
        a.patch_jmp(site, site + 40),
        Err(EmitError::InvalidOperand { .. })
    ));
    assert_eq!(a.code().as_slice(), &before[..]);
}

#[test]
fn placeholders_align_themselves() {
    let mut a = asm(128);
    a.emit_int3s(4).unwrap();
    let jmp = a.jmp_placeholder().unwrap();
    let jcc = a.jcc_placeholder(Cond::NE).unwrap();
    let call = a.call_placeholder().unwrap();
    for (site, len) in [(jmp, JMP_LEN), (jcc, JCC_LEN), (call, CALL_LEN)] {
        assert!(site % 8 + len as u64 <= 8, "site {site:#x} straddles a word");
    }
    let end = a.frontier();
    a.patch_jmp(jmp, end).unwrap();
    a.patch_jcc(jcc, end).unwrap();
    a.patch_call(call, end).unwrap();
    assert_eq!(
        i64::from(rel32_at(&a, jmp + 1)),
        end as i64 - (jmp as i64 + 5)
    );
}

#[test]
fn store_atomic_refuses_word_crossing_spans() {
    let mut a = asm(64);
    a.emit_int3s(16).unwrap();
    let base = a.code().base();
    assert!(a.code_mut().store_atomic(base + 6, &[0x90; 4]).is_err());
    a.code_mut().store_atomic(base + 4, &[0x90; 4]).unwrap();
    assert_eq!(&a.code().as_slice()[4..8], &[0x90; 4]);
    assert_eq!(a.code().as_slice()[8], 0xCC);
}
