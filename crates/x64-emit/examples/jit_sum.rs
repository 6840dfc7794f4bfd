//! JIT-compile `sum(xs, n)` over an `i64` slice and run it.
//!
//! ```text
//! cargo run --example jit_sum
//! ```

#[cfg(all(target_arch = "x86_64", unix))]
fn main() -> Result<(), x64_emit::EmitError> {
    use x64_emit::{Cond, MemRef, X64Assembler, RAX, RCX, RDI, RDX, RSI};

    let mut a = X64Assembler::new_executable(4096)?;
    let entry = a.frontier();

    // rax = 0; rcx = 0
    a.emit_imm_reg(0, RAX)?;
    a.emit_imm_reg(0, RCX)?;
    let head = a.frontier();
    // while rcx < n
    a.cmp_reg64_reg64(RSI, RCX)?;
    let exit = a.jcc_placeholder(Cond::GE)?;
    a.load_mem_reg64(&MemRef::sib(RDI, RCX, 8, 0), RDX)?;
    a.add_reg64_reg64(RDX, RAX)?;
    a.inc_reg64(RCX)?;
    a.jmp8(head)?;
    let done = a.frontier();
    a.ret()?;
    a.patch_jcc(exit, done)?;

    for (i, byte) in a.code().as_slice().iter().enumerate() {
        print!("{byte:02x}{}", if i % 16 == 15 { "\n" } else { " " });
    }
    println!();

    // SAFETY: `entry` starts the function emitted above, which follows the
    // System V calling convention, and the arena outlives the calls.
    let sum: extern "C" fn(*const i64, i64) -> i64 =
        unsafe { core::mem::transmute(entry as usize as *const u8) };

    let xs: Vec<i64> = (1..=100).collect();
    println!("sum(1..=100) = {}", sum(xs.as_ptr(), xs.len() as i64));
    Ok(())
}

#[cfg(not(all(target_arch = "x86_64", unix)))]
fn main() {
    eprintln!("jit_sum needs an x86-64 Unix host");
}
