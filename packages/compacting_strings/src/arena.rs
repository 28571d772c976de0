use std::alloc::{Layout, alloc, dealloc};
use std::cell::{Cell, RefCell};
use std::num::NonZero;
use std::ptr::NonNull;

use new_zealand::nz;
use tracing::debug;

use crate::{Error, Result};

/// Size of the first chunk an arena reserves if not configured otherwise.
const DEFAULT_CHUNK_SIZE: NonZero<usize> = nz!(4096);

/// Alignment of storage returned by [`Arena::allocate()`], sufficient for pointer-sized fields.
const DEFAULT_ALIGN: usize = align_of::<usize>();

/// A bump allocator for scratch storage that is reclaimed all at once.
///
/// Query execution uses one arena per statement to build temporary strings (see
/// [`StringRef::create_temporary()`][crate::StringRef::create_temporary]). Nothing issued by an
/// arena is ever freed individually or moved. All of it is reclaimed together by
/// [`reset()`][Self::reset] or by dropping the arena.
///
/// Temporary handles borrow the arena, so the borrow checker rejects any use of them after a
/// reset. The raw pointers returned by [`allocate()`][Self::allocate] and
/// [`allocate_layout()`][Self::allocate_layout] carry no such tie; the caller must stop using
/// them before resetting or dropping the arena.
///
/// # Resource usage
///
/// The arena reserves memory in chunks, each at least twice as large as the previous one. A reset
/// keeps the largest chunk for reuse and releases the rest.
///
/// # Examples
///
/// ```
/// use compacting_strings::Arena;
///
/// let mut arena = Arena::new();
///
/// let first = arena.allocate(16).unwrap();
/// let second = arena.allocate(16).unwrap();
/// assert_ne!(first, second);
/// assert_eq!(arena.allocated_bytes(), 32);
///
/// arena.reset();
/// assert_eq!(arena.allocated_bytes(), 0);
/// ```
#[derive(Debug)]
pub struct Arena {
    /// Chunks in order of creation. Only the last one is used for new allocations.
    chunks: RefCell<Vec<ArenaChunk>>,

    /// Offset of the first unused byte in the last chunk.
    cursor: Cell<usize>,

    /// Total bytes requested from the arena since creation or the last reset.
    allocated_bytes: Cell<usize>,

    chunk_size: NonZero<usize>,
}

impl Arena {
    /// Creates an empty arena with the default configuration.
    ///
    /// No memory is reserved until the first allocation.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`Arena`].
    pub fn builder() -> ArenaBuilder {
        ArenaBuilder::new()
    }

    fn new_inner(chunk_size: NonZero<usize>) -> Self {
        Self {
            chunks: RefCell::new(Vec::new()),
            cursor: Cell::new(0),
            allocated_bytes: Cell::new(0),
            chunk_size,
        }
    }

    /// Reserves `size` bytes of pointer-aligned, uninitialized storage.
    ///
    /// The storage remains valid until the arena is reset or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`] if `size` is zero and [`Error::OutOfMemory`] if a new chunk
    /// could not be reserved.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        let layout = Layout::from_size_align(size, DEFAULT_ALIGN)
            .ok()
            .ok_or(Error::OutOfMemory {
                requested_bytes: size,
            })?;

        self.allocate_layout(layout)
    }

    /// Reserves uninitialized storage matching `layout`.
    ///
    /// The storage remains valid until the arena is reset or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`] if the layout is zero-sized and [`Error::OutOfMemory`] if
    /// a new chunk could not be reserved.
    pub fn allocate_layout(&self, layout: Layout) -> Result<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(Error::InvalidSize {
                size: 0,
                max: isize::MAX.unsigned_abs(),
            });
        }

        let mut chunks = self.chunks.borrow_mut();

        let ptr = match chunks
            .last()
            .and_then(|chunk| chunk.bump(&self.cursor, layout))
        {
            Some(ptr) => ptr,
            None => {
                // Leave room for alignment padding, as we do not know where the chunk will land.
                let min_size = layout
                    .size()
                    .checked_add(layout.align())
                    .ok_or(Error::OutOfMemory {
                        requested_bytes: layout.size(),
                    })?;

                let size = chunks
                    .last()
                    .map_or(self.chunk_size.get(), |chunk| chunk.size().saturating_mul(2))
                    .max(min_size);

                let chunk = ArenaChunk::new(size)?;

                debug!(
                    chunk_size = size,
                    chunk_count = chunks.len().wrapping_add(1),
                    "arena reserved new chunk"
                );

                self.cursor.set(0);

                let ptr = chunk
                    .bump(&self.cursor, layout)
                    .expect("a fresh chunk is sized to fit the request including padding");

                chunks.push(chunk);
                ptr
            }
        };

        self.allocated_bytes
            .set(self.allocated_bytes.get().saturating_add(layout.size()));

        Ok(ptr)
    }

    /// Reclaims everything the arena has issued, in one step.
    ///
    /// The largest chunk is kept for reuse; all others are released.
    pub fn reset(&mut self) {
        let chunks = self.chunks.get_mut();

        if let Some(largest) = chunks.pop() {
            let released = chunks.len();
            chunks.clear();
            chunks.push(largest);

            debug!(released_chunks = released, "arena reset");
        }

        self.cursor.set(0);
        self.allocated_bytes.set(0);
    }

    /// Total bytes requested from the arena since it was created or last reset.
    ///
    /// Alignment padding is not included.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.get()
    }

    /// The number of chunks currently reserved by the arena.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.borrow().len()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: The raw pointers in the chunks refer to memory exclusively owned by the arena. Temporary
// handles borrow the arena, so it cannot move to another thread while any of them is alive. Raw
// storage pointers are not Send, so they cannot follow the arena to another thread either.
unsafe impl Send for Arena {}

/// Builder for creating an instance of [`Arena`].
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use compacting_strings::Arena;
///
/// let arena = Arena::builder()
///     .chunk_size(NonZero::new(64 * 1024).unwrap())
///     .build();
/// ```
#[derive(Debug)]
#[must_use]
pub struct ArenaBuilder {
    chunk_size: NonZero<usize>,
}

impl ArenaBuilder {
    fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the size of the first chunk the arena reserves. Later chunks double in size.
    pub fn chunk_size(mut self, size: NonZero<usize>) -> Self {
        self.chunk_size = size;
        self
    }

    /// Builds the arena with the specified configuration.
    #[must_use]
    pub fn build(self) -> Arena {
        Arena::new_inner(self.chunk_size)
    }
}

#[derive(Debug)]
struct ArenaChunk {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl ArenaChunk {
    fn new(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size, DEFAULT_ALIGN)
            .ok()
            .ok_or(Error::OutOfMemory {
                requested_bytes: size,
            })?;

        // SAFETY: The layout is not zero-sized because callers never request empty chunks.
        let ptr = NonNull::new(unsafe { alloc(layout) }).ok_or(Error::OutOfMemory {
            requested_bytes: size,
        })?;

        Ok(Self { ptr, layout })
    }

    fn size(&self) -> usize {
        self.layout.size()
    }

    /// Carves `layout` out of the unused tail of the chunk, advancing `cursor`.
    ///
    /// Returns `None` if the tail is too small.
    fn bump(&self, cursor: &Cell<usize>, layout: Layout) -> Option<NonNull<u8>> {
        let offset = cursor.get();
        debug_assert!(offset <= self.size());

        let padding = self
            .ptr
            .as_ptr()
            .wrapping_add(offset)
            .align_offset(layout.align());

        let start = offset.checked_add(padding)?;
        let end = start.checked_add(layout.size())?;

        if end > self.size() {
            return None;
        }

        cursor.set(end);

        // SAFETY: start < end <= chunk size, so the result stays inside our allocation.
        Some(unsafe { self.ptr.add(start) })
    }
}

impl Drop for ArenaChunk {
    fn drop(&mut self) {
        // SAFETY: The layout must match between alloc and dealloc. It does.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(Arena: Send);
    assert_not_impl_any!(Arena: Sync);

    #[test]
    fn new_arena_reserves_nothing() {
        let arena = Arena::new();

        assert_eq!(arena.chunk_count(), 0);
        assert_eq!(arena.allocated_bytes(), 0);
    }

    #[test]
    fn allocations_do_not_overlap() {
        let arena = Arena::new();

        let a = arena.allocate(10).unwrap();
        let b = arena.allocate(10).unwrap();

        // SAFETY: Both blocks are 10 bytes of storage we own until the arena goes away.
        unsafe {
            a.write_bytes(0xAA, 10);
        }
        // SAFETY: As above.
        unsafe {
            b.write_bytes(0xBB, 10);
        }

        // SAFETY: As above, and all bytes were initialized.
        let a_bytes = unsafe { std::slice::from_raw_parts(a.as_ptr(), 10) };
        assert!(a_bytes.iter().all(|b| *b == 0xAA));
        assert_eq!(arena.allocated_bytes(), 20);
        assert_eq!(arena.chunk_count(), 1);
    }

    #[test]
    fn allocations_are_aligned() {
        let arena = Arena::new();

        _ = arena.allocate(3).unwrap();
        let ptr = arena.allocate(8).unwrap();
        assert_eq!(ptr.as_ptr().align_offset(DEFAULT_ALIGN), 0);

        let layout = Layout::from_size_align(32, 64).unwrap();
        let ptr = arena.allocate_layout(layout).unwrap();
        assert_eq!(ptr.as_ptr().align_offset(64), 0);
    }

    #[test]
    fn grows_when_chunk_exhausted() {
        let arena = Arena::builder().chunk_size(nz!(64)).build();

        for _ in 0..8 {
            _ = arena.allocate(8).unwrap();
        }
        assert_eq!(arena.chunk_count(), 1);

        _ = arena.allocate(8).unwrap();
        assert_eq!(arena.chunk_count(), 2);
    }

    #[test]
    fn oversized_request_gets_large_enough_chunk() {
        let arena = Arena::builder().chunk_size(nz!(64)).build();

        let ptr = arena.allocate(10_000).unwrap();

        // SAFETY: We own 10000 bytes at this address.
        unsafe {
            ptr.write_bytes(1, 10_000);
        }

        assert_eq!(arena.allocated_bytes(), 10_000);
    }

    #[test]
    fn reset_keeps_one_chunk() {
        let mut arena = Arena::builder().chunk_size(nz!(64)).build();

        for _ in 0..100 {
            _ = arena.allocate(16).unwrap();
        }
        assert!(arena.chunk_count() > 1);

        arena.reset();

        assert_eq!(arena.chunk_count(), 1);
        assert_eq!(arena.allocated_bytes(), 0);

        // The kept chunk is reused.
        _ = arena.allocate(16).unwrap();
        assert_eq!(arena.chunk_count(), 1);
    }

    #[test]
    fn reset_hands_out_raw_storage_again() {
        let mut arena = Arena::new();

        let before = arena.allocate(16).unwrap();
        arena.reset();
        let after = arena.allocate(16).unwrap();

        // Raw pointers are not tied to the arena, the old one now aliases new storage.
        assert_eq!(before, after);
    }

    #[test]
    fn reset_of_empty_arena_is_noop() {
        let mut arena = Arena::new();
        arena.reset();

        assert_eq!(arena.chunk_count(), 0);
    }

    #[test]
    fn zero_size_is_invalid() {
        let arena = Arena::new();

        assert!(matches!(
            arena.allocate(0),
            Err(Error::InvalidSize { size: 0, .. })
        ));
        assert_eq!(arena.chunk_count(), 0);
    }

    #[test]
    fn absurd_size_is_out_of_memory() {
        let arena = Arena::new();

        assert!(matches!(
            arena.allocate(usize::MAX),
            Err(Error::OutOfMemory { .. })
        ));
    }
}
