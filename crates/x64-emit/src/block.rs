//! Bump-allocated byte arena with a movable frontier.
//!
//! [`DataBlock`] is the emission target for generated code and the home of
//! any data the generated code refers to. Memory comes from the heap, from
//! an OS mapping (see [`crate::code::CodeBlock`]), or from the caller.
//!
//! Writes of at most eight bytes that sit inside one naturally aligned
//! 8-byte word go through a single 64-bit atomic store, so another thread
//! executing the code never sees a torn instruction.

use alloc::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::EmitError;
use crate::CodeAddress;

/// Arena configuration.
///
/// # Examples
///
/// ```rust
/// use x64_emit::{BlockOptions, DataBlock};
///
/// let block = DataBlock::with_options(BlockOptions::default().size(4096).fill(0xCC)).unwrap();
/// assert_eq!(block.size(), 4096);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockOptions {
    /// Capacity in bytes. Default: 64 KiB.
    pub size: usize,
    /// Byte to pre-fill fresh memory with (`0xCC` makes stray jumps trap).
    /// Default: none, memory starts zeroed.
    pub fill: Option<u8>,
    /// Alignment of the arena base for heap-backed blocks. Must be a power
    /// of two. Default: 16.
    pub alloc_align: usize,
}

impl Default for BlockOptions {
    fn default() -> Self {
        Self {
            size: 64 * 1024,
            fill: None,
            alloc_align: 16,
        }
    }
}

impl BlockOptions {
    /// Set the capacity.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the pre-fill byte.
    pub fn fill(mut self, byte: u8) -> Self {
        self.fill = Some(byte);
        self
    }

    /// Set the base alignment.
    pub fn alloc_align(mut self, align: usize) -> Self {
        self.alloc_align = align;
        self
    }
}

enum Backing {
    /// Owned heap allocation.
    Heap(Layout),
    /// Caller memory; never freed here.
    Borrowed,
    /// Owned anonymous mapping of `len` bytes.
    #[cfg(all(unix, feature = "std"))]
    Mapped(usize),
}

/// A fixed-capacity byte arena.
///
/// Invariant: `base <= base + frontier <= base + size`. Every append either
/// writes all of its bytes and advances the frontier, or fails with
/// [`EmitError::CapacityExceeded`] and changes nothing.
pub struct DataBlock {
    base: NonNull<u8>,
    size: usize,
    frontier: usize,
    backing: Backing,
}

// SAFETY: the block exclusively owns (or was handed exclusive use of) its
// memory, and every mutation goes through `&mut self`.
unsafe impl Send for DataBlock {}

impl DataBlock {
    /// Heap-allocate a zeroed arena of `size` bytes, 16-byte aligned.
    pub fn new(size: usize) -> Result<DataBlock, EmitError> {
        Self::with_options(BlockOptions::default().size(size))
    }

    /// Heap-allocate an arena as described by `opts`.
    pub fn with_options(opts: BlockOptions) -> Result<DataBlock, EmitError> {
        let layout = Layout::from_size_align(opts.size.max(1), opts.alloc_align).map_err(|_| {
            EmitError::invalid(alloc::format!(
                "cannot lay out {} bytes at alignment {}",
                opts.size,
                opts.alloc_align
            ))
        })?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(base) = NonNull::new(raw) else {
            handle_alloc_error(layout)
        };
        if let Some(byte) = opts.fill {
            // SAFETY: `base` is valid for `layout.size()` bytes.
            unsafe { base.as_ptr().write_bytes(byte, layout.size()) };
        }
        log::debug!(
            "data block: {} bytes at {:#x} (heap)",
            opts.size,
            base.as_ptr() as usize
        );
        Ok(DataBlock {
            base,
            size: opts.size,
            frontier: 0,
            backing: Backing::Heap(layout),
        })
    }

    /// Wrap caller-owned memory. The block never frees it.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` initialized bytes
    /// for the whole lifetime of the returned block, and nothing else may
    /// access that memory through another path while the block is alive.
    pub unsafe fn from_raw(ptr: *mut u8, size: usize) -> Result<DataBlock, EmitError> {
        let base = NonNull::new(ptr).ok_or_else(|| EmitError::invalid("null arena base"))?;
        log::debug!("data block: {} bytes at {:#x} (borrowed)", size, ptr as usize);
        Ok(DataBlock {
            base,
            size,
            frontier: 0,
            backing: Backing::Borrowed,
        })
    }

    /// Take ownership of a fresh anonymous mapping.
    ///
    /// # Safety
    ///
    /// `ptr` must be the start of a live mapping of exactly `map_len` bytes
    /// that nothing else will unmap, and `size <= map_len`.
    #[cfg(all(unix, feature = "std"))]
    pub(crate) unsafe fn from_mapping(ptr: NonNull<u8>, size: usize, map_len: usize) -> DataBlock {
        debug_assert!(size <= map_len);
        DataBlock {
            base: ptr,
            size,
            frontier: 0,
            backing: Backing::Mapped(map_len),
        }
    }

    // ─── Geometry ─────────────────────────────────────────────

    /// Address of the first byte.
    #[inline]
    pub fn base(&self) -> CodeAddress {
        self.base.as_ptr() as CodeAddress
    }

    /// Address the next append will write to.
    #[inline]
    pub fn frontier(&self) -> CodeAddress {
        self.base() + self.frontier as CodeAddress
    }

    /// Move the frontier. Used by callers that carve the arena up
    /// themselves, and to rewind after a speculative emission.
    pub fn set_frontier(&mut self, addr: CodeAddress) -> Result<(), EmitError> {
        let off = addr
            .checked_sub(self.base())
            .filter(|&off| off <= self.size as u64)
            .ok_or(EmitError::AddressOutOfBounds { addr, len: 0 })?;
        self.frontier = off as usize;
        Ok(())
    }

    /// Capacity in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes between the base and the frontier.
    #[inline]
    pub fn used(&self) -> usize {
        self.frontier
    }

    /// Bytes between the frontier and the end.
    #[inline]
    pub fn available(&self) -> usize {
        self.size - self.frontier
    }

    /// Whether `n` more bytes fit.
    #[inline]
    pub fn can_emit(&self, n: usize) -> bool {
        n <= self.available()
    }

    /// Whether `addr` lies inside the arena (emitted or not).
    pub fn is_valid_address(&self, addr: CodeAddress) -> bool {
        addr >= self.base() && addr < self.base() + self.size as CodeAddress
    }

    /// Whether `[addr, addr + len)` lies inside the emitted bytes.
    pub fn contains(&self, addr: CodeAddress, len: usize) -> bool {
        self.emitted_offset(addr, len).is_some()
    }

    fn emitted_offset(&self, addr: CodeAddress, len: usize) -> Option<usize> {
        let off = usize::try_from(addr.checked_sub(self.base())?).ok()?;
        let end = off.checked_add(len)?;
        (end <= self.frontier).then_some(off)
    }

    /// The emitted bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the first `frontier` bytes are inside the allocation and
        // initialized; `&self` excludes concurrent writes through the block.
        unsafe { core::slice::from_raw_parts(self.base.as_ptr(), self.frontier) }
    }

    /// `len` emitted bytes starting at `addr`.
    pub fn read(&self, addr: CodeAddress, len: usize) -> Result<&[u8], EmitError> {
        let off = self
            .emitted_offset(addr, len)
            .ok_or(EmitError::AddressOutOfBounds { addr, len })?;
        Ok(&self.as_slice()[off..off + len])
    }

    // ─── Appends ──────────────────────────────────────────────

    fn reserve(&self, n: usize) -> Result<usize, EmitError> {
        if self.can_emit(n) {
            Ok(self.frontier)
        } else {
            Err(EmitError::CapacityExceeded {
                requested: n,
                available: self.available(),
            })
        }
    }

    /// Append one byte.
    pub fn byte(&mut self, value: u8) -> Result<(), EmitError> {
        self.bytes(&[value])
    }

    /// Append a little-endian 16-bit value.
    pub fn word(&mut self, value: u16) -> Result<(), EmitError> {
        self.bytes(&value.to_le_bytes())
    }

    /// Append a little-endian 32-bit value.
    pub fn dword(&mut self, value: u32) -> Result<(), EmitError> {
        self.bytes(&value.to_le_bytes())
    }

    /// Append a little-endian 64-bit value.
    pub fn qword(&mut self, value: u64) -> Result<(), EmitError> {
        self.bytes(&value.to_le_bytes())
    }

    /// Append a byte slice.
    pub fn bytes(&mut self, bytes: &[u8]) -> Result<(), EmitError> {
        let off = self.reserve(bytes.len())?;
        self.write_at(off, bytes);
        self.frontier = off + bytes.len();
        Ok(())
    }

    /// Append `n` copies of `byte`.
    pub fn fill(&mut self, n: usize, byte: u8) -> Result<(), EmitError> {
        let off = self.reserve(n)?;
        // SAFETY: `reserve` checked `off + n <= size`.
        unsafe { self.base.as_ptr().add(off).write_bytes(byte, n) };
        self.frontier = off + n;
        Ok(())
    }

    // ─── Bump allocation ──────────────────────────────────────

    /// Allocate `size` bytes aligned to `align` using an externally kept
    /// frontier offset. The block's own frontier is not touched.
    ///
    /// On success `frontier_off` is advanced past the allocation and the
    /// allocation's address is returned.
    pub fn alloc_at(
        &self,
        frontier_off: &mut usize,
        size: usize,
        align: usize,
    ) -> Result<CodeAddress, EmitError> {
        if !align.is_power_of_two() {
            return Err(EmitError::invalid(alloc::format!(
                "alignment {} is not a power of two",
                align
            )));
        }
        let exceeded = |pad: usize| EmitError::CapacityExceeded {
            requested: pad.saturating_add(size),
            available: self.size.saturating_sub(*frontier_off),
        };
        let addr = (self.base() as usize)
            .checked_add(*frontier_off)
            .ok_or_else(|| exceeded(0))?;
        let slop = addr & (align - 1);
        let pad = if slop == 0 { 0 } else { align - slop };
        let end = frontier_off
            .checked_add(pad)
            .and_then(|start| start.checked_add(size))
            .filter(|&end| end <= self.size)
            .ok_or_else(|| exceeded(pad))?;
        let start = end - size;
        *frontier_off = end;
        Ok(self.base() + start as CodeAddress)
    }

    /// Bump-allocate room for one `T` at the block's own frontier.
    ///
    /// The returned memory is not initialized for `T`; the caller writes it.
    pub fn alloc<T>(&mut self, align: usize) -> Result<NonNull<T>, EmitError> {
        let align = align.max(core::mem::align_of::<T>());
        let mut off = self.frontier;
        let addr = self.alloc_at(&mut off, core::mem::size_of::<T>(), align)?;
        self.frontier = off;
        let start = (addr - self.base()) as usize;
        // SAFETY: `alloc_at` checked `start + size_of::<T>() <= size`, so the
        // offset stays inside the non-null allocation.
        Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) }.cast::<T>())
    }

    // ─── Rewrites ─────────────────────────────────────────────

    /// Overwrite already-emitted bytes. Spans of at most eight bytes inside
    /// one aligned 8-byte word are written with a single atomic store.
    pub fn rewrite(&mut self, addr: CodeAddress, bytes: &[u8]) -> Result<(), EmitError> {
        let off = self
            .emitted_offset(addr, bytes.len())
            .ok_or(EmitError::AddressOutOfBounds {
                addr,
                len: bytes.len(),
            })?;
        self.write_at(off, bytes);
        Ok(())
    }

    /// Overwrite already-emitted bytes with one atomic 64-bit store.
    ///
    /// Fails with [`EmitError::InvalidOperand`] when the span crosses an
    /// 8-byte boundary, since no single store can cover it.
    pub fn store_atomic(&mut self, addr: CodeAddress, bytes: &[u8]) -> Result<(), EmitError> {
        let off = self
            .emitted_offset(addr, bytes.len())
            .ok_or(EmitError::AddressOutOfBounds {
                addr,
                len: bytes.len(),
            })?;
        if !self.single_word(off, bytes.len()) {
            return Err(EmitError::invalid(alloc::format!(
                "{} bytes at {:#x} span an 8-byte boundary",
                bytes.len(),
                addr
            )));
        }
        self.write_at(off, bytes);
        Ok(())
    }

    /// Whether `[off, off + len)` sits in one aligned word that lies wholly
    /// inside the arena.
    fn single_word(&self, off: usize, len: usize) -> bool {
        let addr = self.base.as_ptr() as usize + off;
        let word = addr & !7;
        len <= 8
            && addr + len <= word + 8
            && word >= self.base.as_ptr() as usize
            && word + 8 <= self.base.as_ptr() as usize + self.size
    }

    fn write_at(&mut self, off: usize, bytes: &[u8]) {
        debug_assert!(off + bytes.len() <= self.size);
        if bytes.is_empty() {
            return;
        }
        if self.single_word(off, bytes.len()) {
            let addr = self.base.as_ptr() as usize + off;
            let shift = addr & 7;
            // SAFETY: `single_word` proved the aligned word is inside the
            // allocation, and `&mut self` makes this the only writer.
            unsafe {
                let atom = AtomicU64::from_ptr(self.base.as_ptr().add(off - shift).cast::<u64>());
                let mut word = atom.load(Ordering::Relaxed).to_le_bytes();
                word[shift..shift + bytes.len()].copy_from_slice(bytes);
                atom.store(u64::from_le_bytes(word), Ordering::Release);
            }
        } else {
            // SAFETY: the caller checked `off + len <= size`.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    self.base.as_ptr().add(off),
                    bytes.len(),
                );
            }
        }
    }
}

impl Drop for DataBlock {
    fn drop(&mut self) {
        match self.backing {
            Backing::Heap(layout) => {
                log::debug!("data block: releasing {} bytes (heap)", self.size);
                // SAFETY: allocated in `with_options` with this layout.
                unsafe { dealloc(self.base.as_ptr(), layout) }
            }
            Backing::Borrowed => {}
            #[cfg(all(unix, feature = "std"))]
            Backing::Mapped(len) => crate::code::unmap(self.base, len),
        }
    }
}

impl fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBlock")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("size", &self.size)
            .field("used", &self.frontier)
            .finish()
    }
}
