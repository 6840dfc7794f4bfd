#![no_main]
use libfuzzer_sys::fuzz_target;
use x64_emit::{Cond, DataBlock, EmitError, MemRef, Reg, X64Assembler};

fn reg(b: u8) -> Reg {
    Reg::new(b & 15).unwrap_or(x64_emit::RAX)
}

fn imm(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    let n = bytes.len().min(8);
    raw[..n].copy_from_slice(&bytes[..n]);
    i64::from_le_bytes(raw)
}

fuzz_target!(|data: &[u8]| {
    // Interpret the input as a stream of 10-byte commands. Every command must
    // either succeed or fail without touching the arena, and no command may
    // panic.
    let Ok(block) = DataBlock::new(512) else { return };
    let mut a = X64Assembler::new(block);
    let mut sites = Vec::new();

    for cmd in data.chunks(10) {
        let &[op, x, y, ref rest @ ..] = cmd else { break };
        let (src, dst) = (reg(x), reg(y));
        let v = imm(rest);
        let disp = v as i32;
        let before = a.code().as_slice().to_vec();

        let result: Result<(), EmitError> = match op % 24 {
            0 => a.mov_reg64_reg64(src, dst),
            1 => a.emit_imm_reg(v, dst),
            2 => a.add_imm64_reg64(v, dst),
            3 => a.cmp_imm32_reg32(v, dst),
            4 => a.sub_imm32_disp_reg32(v, disp >> 8, src),
            5 => a.load_reg64_disp_reg64(src, disp, dst),
            6 => a.store_imm64_disp_reg64(v, disp >> 8, src),
            7 => a.load_mem_reg64(
                &MemRef {
                    base: (x & 0x80 == 0).then_some(src),
                    index: (y & 0x80 == 0).then_some(dst),
                    scale: 1 << (op >> 6),
                    disp,
                    rip_relative: x & 0x40 != 0,
                },
                reg(op >> 4),
            ),
            8 => a.shl_imm_reg64(x, dst),
            9 => a.shr_reg64_reg64(src, dst),
            10 => a.imul_imm_reg64_reg64(v, src, dst),
            11 => a.xchg_reg32_reg32(src, dst),
            12 => a.setcc(Cond::from_code(x), dst),
            13 => a.cmov_reg64_reg64(Cond::from_code(x), src, dst),
            14 => a.cload_reg64_disp_reg64(Cond::from_code(x), src, disp, dst),
            15 => a.emit_nop(usize::from(x & 63)),
            16 => a.prepare_for_patch(usize::from(x & 15)),
            17 => a.jcc_placeholder(Cond::from_code(x)).map(|s| sites.push((0, s))),
            18 => a.jmp8_placeholder().map(|s| sites.push((1, s))),
            19 => a.call_placeholder().map(|s| sites.push((2, s))),
            20 => a.jmp(a.frontier().wrapping_add(v as u64)),
            21 => a.call_with_args(v as u64, &[v; 8][..usize::from(x % 8)]),
            22 => match sites.get(usize::from(x)) {
                Some(&(kind, site)) => {
                    let dest = site.wrapping_add(i64::from(disp >> 16) as u64);
                    match kind {
                        0 => a.patch_jcc(site, dest),
                        1 => a.patch_jmp8(site, dest),
                        _ => a.patch_call(site, dest),
                    }
                }
                None => a.patch_jmp(a.code().base().wrapping_add(v as u64), 0),
            },
            _ => a.ret_imm(v as u16),
        };

        match result {
            Ok(()) => assert!(a.code().used() >= before.len()),
            Err(_) => assert_eq!(a.code().as_slice(), &before[..], "failed command wrote bytes"),
        }
    }
});
