//! Aligned byte buffers and the allocators that produce them.
//!
//! A [`Buffer`] is a contiguous, mutable, zero-initialized byte region. It is
//! produced by an [`Allocator`], whose release policy is the allocator's own
//! choice: [`GlobalAllocator`] reclaims automatically (Rust's ownership /
//! `Drop`), [`ArenaAllocator`] frees everything at once when the arena itself
//! is dropped, and [`SlicingAllocator`] carves sub-buffers out of a
//! caller-supplied buffer with no free operation at all.
//!
//! Producing an aligned heap allocation is inherently unsafe in Rust — there
//! is no safe API for "give me N bytes aligned to A" — so this module is the
//! one place in the crate that uses `unsafe`, in the same style as
//! `std::alloc::Allocator` implementations in the wild: a `NonNull<u8>` plus
//! the `Layout` it was allocated with, freed exactly once in `Drop`.

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::error::{Error, Result};

enum Owner {
    /// Owns its own heap allocation; freed in `Drop`.
    Global(Layout),
    /// Borrowed from an arena or a slicing allocator; the arena frees the
    /// whole backing allocation when its last buffer is dropped.
    Shared(Rc<ArenaBacking>),
}

/// A contiguous, mutable, zero-initialized byte region with a known base
/// alignment.
pub struct Buffer {
    ptr: NonNull<u8>,
    len: usize,
    alignment: usize,
    owner: Owner,
}

// SAFETY: `Buffer` owns (possibly shared via `Rc`, but never concurrently
// mutably aliased) the memory `ptr` points to; it behaves like a `Box<[u8]>`
// with a custom alignment requirement.
impl Buffer {
    fn new_global(ptr: NonNull<u8>, len: usize, alignment: usize, layout: Layout) -> Self {
        Self {
            ptr,
            len,
            alignment,
            owner: Owner::Global(layout),
        }
    }

    fn new_shared(ptr: NonNull<u8>, len: usize, alignment: usize, backing: Rc<ArenaBacking>) -> Self {
        Self {
            ptr,
            len,
            alignment,
            owner: Owner::Shared(backing),
        }
    }

    pub fn len(&self) -> u64 {
        self.len as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> u64 {
        self.alignment as u64
    }

    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.len == 0 {
            return &mut [];
        }
        // SAFETY: `ptr` is valid for `len` bytes, and `self` is borrowed
        // mutably so no other slice into it can be alive.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl std::ops::Deref for Buffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::ops::DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Owner::Global(layout) = &self.owner {
            // SAFETY: this is the unique owner of a `Global` allocation made
            // with exactly this layout, and it is only freed once.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), *layout) };
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("alignment", &self.alignment)
            .finish()
    }
}

/// A factory of zero-initialized, aligned [`Buffer`]s.
///
/// The returned buffer always satisfies `base mod align == 0`. Growth in the
/// containers calls `allocate` again and copies the live bytes over; a
/// container never frees a buffer itself; it is released according to
/// whatever lifecycle rule governs the allocator that produced it.
pub trait Allocator {
    fn allocate(&self, size: u64, align: u64) -> Result<Buffer>;
}

fn checked_layout(size: u64, align: u64) -> Result<Layout> {
    if align == 0 || (align & (align - 1)) != 0 {
        return Err(Error::invalid_argument(format!(
            "alignment must be a power of two, got {align}"
        )));
    }
    let size = usize::try_from(size)
        .map_err(|_| Error::invalid_argument("requested size overflows usize"))?;
    let align = usize::try_from(align).expect("already validated to be small");
    // Layout requires a non-zero size; a zero-sized allocation still needs a
    // well-aligned, dangling-but-valid pointer, handled by the caller.
    let layout_size = size.max(1);
    Layout::from_size_align(layout_size, align)
        .map_err(|e| Error::invalid_argument(format!("invalid layout: {e}")))
}

/// Reclaims its buffers automatically, the moment the last handle to each
/// one is dropped — Rust's ordinary ownership model. This is the allocator
/// to reach for unless a scope-wide bulk-free is worth the complexity.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalAllocator;

impl Allocator for GlobalAllocator {
    fn allocate(&self, size: u64, align: u64) -> Result<Buffer> {
        let layout = checked_layout(size, align)?;
        let len = usize::try_from(size).expect("validated above");
        // SAFETY: `layout` has non-zero size (enforced by `checked_layout`).
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            Error::invalid_argument(format!("global allocation of {size} bytes failed"))
        })?;
        Ok(Buffer::new_global(ptr, len, layout.align(), layout))
    }
}

/// Owns the single backing heap allocation that one or more bump-allocated
/// [`Buffer`]s point into; freed once, when the last `Buffer` referencing it
/// is dropped.
struct ArenaBacking {
    layout: Layout,
    ptr: NonNull<u8>,
}

/// Bump-allocate `size` bytes aligned to `align` out of the region starting
/// at `region_base` with `capacity` bytes available, advancing `cursor`.
/// `keepalive` is cloned into every `Buffer` produced so the backing
/// allocation outlives them all; it is not necessarily `region_base` itself
/// — a [`SlicingAllocator`] built from an already-sliced buffer bumps within
/// its own sub-region while keeping the *original* arena alive.
///
/// Shared by [`ArenaAllocator`] and [`SlicingAllocator`], which differ only
/// in how their region and backing allocation came to be.
fn bump_allocate(
    region_base: NonNull<u8>,
    capacity: usize,
    cursor: &Cell<usize>,
    keepalive: &Rc<ArenaBacking>,
    size: u64,
    align: u64,
) -> Result<Buffer> {
    if align == 0 || (align & (align - 1)) != 0 {
        return Err(Error::invalid_argument(format!(
            "alignment must be a power of two, got {align}"
        )));
    }
    let size = usize::try_from(size)
        .map_err(|_| Error::invalid_argument("requested size overflows usize"))?;
    let align = usize::try_from(align).expect("already validated");
    let base = region_base.as_ptr() as usize;
    let cursor_addr = base + cursor.get();
    let aligned_addr = (cursor_addr + align - 1) & !(align - 1);
    let start = aligned_addr - base;
    let end = start
        .checked_add(size)
        .ok_or_else(|| Error::invalid_argument("bump allocator offset overflow"))?;
    if end > capacity {
        return Err(Error::invalid_argument(format!(
            "bump allocator out of space: requested {size} bytes, {} remaining",
            capacity.saturating_sub(cursor.get())
        )));
    }
    cursor.set(end);
    // SAFETY: `start..end` is within `region_base`'s `capacity` bytes, and
    // the cursor only ever advances, so ranges handed out never overlap.
    let ptr = unsafe { NonNull::new_unchecked(region_base.as_ptr().add(start)) };
    Ok(Buffer::new_shared(ptr, size, align, Rc::clone(keepalive)))
}

impl Drop for ArenaBacking {
    fn drop(&mut self) {
        // SAFETY: this is the sole owner of the backing allocation; every
        // `Buffer` handed out holds an `Rc` clone that keeps it alive, so it
        // is freed exactly once, after the last handle is gone.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// A bump allocator that carves fixed-capacity sub-buffers out of one
/// backing allocation made up front, and frees the whole region in one shot
/// when the arena (and every buffer it produced) is dropped.
///
/// Single-threaded; `allocate` past the arena's capacity fails rather than
/// growing.
pub struct ArenaAllocator {
    backing: Rc<ArenaBacking>,
    capacity: usize,
    cursor: Cell<usize>,
}

impl ArenaAllocator {
    /// Reserve `capacity` bytes, aligned to `align`, to be doled out by
    /// subsequent `allocate` calls.
    pub fn new(capacity: u64, align: u64) -> Result<Self> {
        let layout = checked_layout(capacity, align)?;
        let capacity = usize::try_from(capacity).expect("validated above");
        // SAFETY: `layout` has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            Error::invalid_argument(format!("arena allocation of {capacity} bytes failed"))
        })?;
        log::trace!("reserved arena of {capacity} bytes, aligned to {}", layout.align());
        Ok(Self {
            backing: Rc::new(ArenaBacking { layout, ptr }),
            capacity,
            cursor: Cell::new(0),
        })
    }
}

impl Allocator for ArenaAllocator {
    fn allocate(&self, size: u64, align: u64) -> Result<Buffer> {
        bump_allocate(
            self.backing.ptr,
            self.capacity,
            &self.cursor,
            &self.backing,
            size,
            align,
        )
    }
}

/// Carves non-overlapping sub-buffers out of a single pre-existing [`Buffer`]
/// (stack style): no allocation of its own, and no free operation — going
/// past the end of the wrapped buffer fails rather than growing it.
///
/// `region_base`/`capacity` describe *this* allocator's own sub-region, which
/// may not coincide with `backing`'s region: wrapping a buffer that is itself
/// a sub-slice of another arena keeps that arena's `Rc<ArenaBacking>` alive
/// (so the root allocation is freed exactly once) while bumping within the
/// narrower sub-region the caller actually handed over.
pub struct SlicingAllocator {
    backing: Rc<ArenaBacking>,
    region_base: NonNull<u8>,
    capacity: usize,
    cursor: Cell<usize>,
    // Keeps the wrapped buffer's allocation alive for as long as this
    // allocator exists; its own `Drop` is suppressed below since `backing`
    // (new or reused) now owns the free.
    _owned: Buffer,
}

impl SlicingAllocator {
    /// Take ownership of `buffer` and dole out sub-buffers of it.
    pub fn new(buffer: Buffer) -> Self {
        let capacity = buffer.len as usize;
        let region_base = buffer.ptr;
        let mut buffer = buffer;
        let backing = match &buffer.owner {
            // Already carved from some arena: reuse its backing so the root
            // allocation is freed exactly once, by whichever `Rc` handle
            // drops last.
            Owner::Shared(backing) => Rc::clone(backing),
            // Sole owner of a global allocation: re-home it under a fresh
            // `ArenaBacking` so sub-buffers can share it via `Rc` the same
            // way `ArenaAllocator` does.
            Owner::Global(layout) => Rc::new(ArenaBacking {
                layout: *layout,
                ptr: region_base,
            }),
        };
        buffer.owner = Owner::Shared(Rc::clone(&backing));
        Self {
            backing,
            region_base,
            capacity,
            cursor: Cell::new(0),
            _owned: buffer,
        }
    }
}

impl Allocator for SlicingAllocator {
    fn allocate(&self, size: u64, align: u64) -> Result<Buffer> {
        bump_allocate(
            self.region_base,
            self.capacity,
            &self.cursor,
            &self.backing,
            size,
            align,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_allocator_zeroes_and_aligns() {
        let alloc = GlobalAllocator;
        let buf = alloc.allocate(37, 8).unwrap();
        assert_eq!(buf.len(), 37);
        assert_eq!(buf.base() % 8, 0);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn arena_allocator_hands_out_disjoint_ranges() {
        let arena = ArenaAllocator::new(64, 8).unwrap();
        let a = arena.allocate(16, 8).unwrap();
        let b = arena.allocate(16, 8).unwrap();
        assert_ne!(a.base(), b.base());
        assert!(a.base() + 16 <= b.base() || b.base() + 16 <= a.base());
    }

    #[test]
    fn arena_allocator_rejects_overflow() {
        let arena = ArenaAllocator::new(16, 8).unwrap();
        assert!(arena.allocate(8, 8).is_ok());
        assert!(arena.allocate(16, 8).is_err());
    }

    #[test]
    fn slicing_allocator_carves_up_a_buffer() {
        let global = GlobalAllocator;
        let buffer = global.allocate(32, 8).unwrap();
        let slicer = SlicingAllocator::new(buffer);
        let a = slicer.allocate(8, 4).unwrap();
        let b = slicer.allocate(8, 4).unwrap();
        assert_ne!(a.base(), b.base());
        assert!(slicer.allocate(32, 4).is_err());
    }
}
