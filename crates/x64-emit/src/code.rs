//! Executable code arena.
//!
//! A [`CodeBlock`] is a [`DataBlock`] whose pages the operating system has
//! mapped readable, writable and executable, so the bytes the assembler
//! emits can be jumped to directly.

use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::block::{BlockOptions, DataBlock};
use crate::error::EmitError;

/// An arena backed by read+write+execute memory.
///
/// Dereferences to [`DataBlock`] for emission and inspection. The emission
/// target and the execution memory are the same pages.
#[derive(Debug)]
pub struct CodeBlock {
    block: DataBlock,
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// The system page size.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}

fn round_up(n: usize, to: usize) -> Option<usize> {
    Some(n.checked_add(to - 1)? & !(to - 1))
}

impl CodeBlock {
    /// Map a fresh RWX region of at least `size` bytes.
    ///
    /// # Errors
    ///
    /// [`EmitError::OsError`] if the mapping is refused.
    pub fn new(size: usize) -> Result<CodeBlock, EmitError> {
        Self::with_options(BlockOptions::default().size(size))
    }

    /// Map a fresh RWX region as described by `opts`. The mapping is
    /// page-rounded; `opts.size` stays the capacity. `alloc_align` is moot
    /// here since mappings are page aligned.
    pub fn with_options(opts: BlockOptions) -> Result<CodeBlock, EmitError> {
        let page = page_size();
        let map_len = round_up(opts.size.max(1), page)
            .ok_or_else(|| EmitError::invalid(alloc::format!("size {} overflows", opts.size)))?;

        // SAFETY: anonymous private mapping; no existing memory is affected.
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            let errno = last_errno();
            log::warn!("code block: mmap of {} bytes failed (errno {})", map_len, errno);
            return Err(EmitError::OsError {
                op: "mmap".into(),
                errno,
            });
        }
        let Some(base) = NonNull::new(addr.cast::<u8>()) else {
            return Err(EmitError::OsError {
                op: "mmap".into(),
                errno: 0,
            });
        };
        if let Some(byte) = opts.fill {
            // SAFETY: the mapping is writable for `map_len` bytes.
            unsafe { base.as_ptr().write_bytes(byte, map_len) };
        }
        log::debug!(
            "code block: mapped {} bytes at {:#x}",
            map_len,
            base.as_ptr() as usize
        );
        // SAFETY: `base` starts a fresh mapping of `map_len` bytes owned by
        // nobody else.
        let block = unsafe { DataBlock::from_mapping(base, opts.size, map_len) };
        Ok(CodeBlock { block })
    }

    /// Adopt caller memory as code: re-protect the pages covering
    /// `[start, start + len)` read+write+execute. The memory is not unmapped
    /// when the block is dropped.
    ///
    /// # Safety
    ///
    /// Same contract as [`DataBlock::from_raw`]. In addition, changing the
    /// protection of the whole pages around the range must not break any
    /// other user of those pages.
    pub unsafe fn from_raw(start: *mut u8, len: usize) -> Result<CodeBlock, EmitError> {
        let page = page_size();
        let first = start as usize & !(page - 1);
        let last = (start as usize)
            .checked_add(len)
            .and_then(|end| round_up(end, page))
            .ok_or_else(|| EmitError::invalid("code range overflows the address space"))?;
        let rc = libc::mprotect(
            first as *mut libc::c_void,
            last - first,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        );
        if rc != 0 {
            let errno = last_errno();
            log::warn!(
                "code block: mprotect {:#x}+{} failed (errno {})",
                first,
                last - first,
                errno
            );
            return Err(EmitError::OsError {
                op: "mprotect".into(),
                errno,
            });
        }
        let block = DataBlock::from_raw(start, len)?;
        Ok(CodeBlock { block })
    }

    /// Give up executable-ness bookkeeping and keep the arena. The mapping
    /// (if owned) still lives until the returned block is dropped.
    pub fn into_inner(self) -> DataBlock {
        self.block
    }
}

impl Deref for CodeBlock {
    type Target = DataBlock;

    fn deref(&self) -> &DataBlock {
        &self.block
    }
}

impl DerefMut for CodeBlock {
    fn deref_mut(&mut self) -> &mut DataBlock {
        &mut self.block
    }
}

impl From<CodeBlock> for DataBlock {
    fn from(code: CodeBlock) -> DataBlock {
        code.block
    }
}

/// Release a mapping made by [`CodeBlock::with_options`].
pub(crate) fn unmap(base: NonNull<u8>, len: usize) {
    // SAFETY: called once from `DataBlock::drop` for a mapping it owns.
    let rc = unsafe { libc::munmap(base.as_ptr().cast(), len) };
    if rc == 0 {
        log::debug!("code block: unmapped {} bytes at {:#x}", len, base.as_ptr() as usize);
    } else {
        log::warn!("code block: munmap failed (errno {})", last_errno());
    }
}
