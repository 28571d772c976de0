use std::alloc::{Layout, alloc, dealloc};
use std::cell::RefCell;
use std::num::NonZero;
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::thread::{self, ThreadId};

use tracing::{debug, error, trace};

use crate::{DropPolicy, Error, Result, SizeClass, StringRef};

/// A compacting pool shared between its registry and the handles allocated from it.
pub type SharedPool = Rc<RefCell<CompactingPool>>;

/// Owns the blocks of one [`SizeClass`] and keeps them densely packed.
///
/// Live blocks always occupy slots `0..len()`. When a block is freed from the middle of that
/// range, the last live block is moved into the hole and the [`StringRef`] that owns the moved
/// block is told its new address through the back-pointer stored in the slot header. Every free
/// is therefore O(1) and the pool never fragments, at the cost of relocating at most one other
/// block per free.
///
/// Slots are stored in chunks. Chunk `k` holds `first_chunk_slots << k` slots, so capacity grows
/// geometrically without ever moving a slot that already exists. When occupancy drops below a
/// quarter of capacity the trailing (necessarily empty) chunk is released again.
///
/// Pools are created on demand by a [`PoolRegistry`][crate::PoolRegistry] and are never shared
/// between threads.
///
/// # Teardown
///
/// Every live handle keeps its pool alive, so through the public API a pool is only dropped once
/// it is empty. Leaks are reported when the registry is torn down. The leak check in the pool's
/// own `Drop` is a second line that only fires if that invariant is broken.
#[derive(Debug)]
pub struct CompactingPool {
    size_class: SizeClass,

    /// Layout of one slot: header followed by payload, padded so slots can be laid out
    /// back to back.
    slot_layout: Layout,

    first_chunk_slots: NonZero<usize>,

    chunks: Vec<PoolChunk>,

    /// Total number of slots across all chunks.
    capacity: usize,

    /// Number of live blocks. These occupy slots `0..len`.
    len: usize,

    owner_thread: ThreadId,

    drop_policy: DropPolicy,
}

/// Hidden header that precedes every payload in the pool.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
struct SlotHeader {
    /// The handle that currently points at this slot's payload. `None` for vacant slots.
    owner: Option<NonNull<StringRef>>,

    /// The slot's own index, letting `free()` go from a payload address to its slot in O(1).
    index: usize,
}

impl SlotHeader {
    const VACANT: Self = Self {
        owner: None,
        index: usize::MAX,
    };
}

const HEADER_SIZE: usize = size_of::<SlotHeader>();

impl CompactingPool {
    /// Creates an empty pool. No memory is reserved until the first allocation.
    ///
    /// The first chunk holds as many slots as fit in `first_chunk_bytes`, but at least one.
    pub(crate) fn new(
        size_class: SizeClass,
        first_chunk_bytes: NonZero<usize>,
        drop_policy: DropPolicy,
    ) -> Self {
        let payload_layout = Layout::array::<u8>(size_class.block_size())
            .expect("block sizes are bounded by MAX_BLOCK_SIZE so the layout is always valid");

        let (slot_layout, payload_offset) = Layout::new::<SlotHeader>()
            .extend(payload_layout)
            .expect("layout extension cannot fail for block sizes bounded by MAX_BLOCK_SIZE");

        debug_assert_eq!(payload_offset, HEADER_SIZE);

        let slot_layout = slot_layout.pad_to_align();

        let first_chunk_slots = NonZero::new(
            first_chunk_bytes
                .get()
                .checked_div(slot_layout.size())
                .expect("slot layout always includes the header so is never zero-sized"),
        )
        .unwrap_or(NonZero::<usize>::MIN);

        Self {
            size_class,
            slot_layout,
            first_chunk_slots,
            chunks: Vec::new(),
            capacity: 0,
            len: 0,
            owner_thread: thread::current().id(),
            drop_policy,
        }
    }

    /// The size class whose blocks this pool stores.
    #[must_use]
    pub fn size_class(&self) -> SizeClass {
        self.size_class
    }

    /// The number of payload bytes in each block of this pool.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.size_class.block_size()
    }

    /// The number of live blocks in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the pool holds no live blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of blocks the pool can hold without reserving more memory.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of chunks of backing storage currently reserved.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Appends a block owned by `owner` and returns the address of its zeroed payload.
    ///
    /// `owner` becomes the block's back-pointer and will be notified through
    /// [`StringRef::update_location()`] whenever the block is relocated. It is not dereferenced
    /// by this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the pool is full and a new chunk cannot be reserved.
    /// The pool is left unchanged in that case.
    pub(crate) fn allocate(&mut self, owner: NonNull<StringRef>) -> Result<NonNull<u8>> {
        self.assert_owner_thread();

        if self.len == self.capacity {
            self.grow()?;
        }

        let index = self.len;

        // SAFETY: index < capacity as ensured above, so the header is inside one of our chunks
        // and properly aligned for SlotHeader.
        unsafe {
            self.header_ptr(index).write(SlotHeader {
                owner: Some(owner),
                index,
            });
        }

        let payload = self.payload_ptr(index);

        // SAFETY: The payload region of the slot is block_size bytes long and exclusively ours.
        unsafe {
            payload.write_bytes(0, self.block_size());
        }

        self.len = index
            .checked_add(1)
            .expect("guarded by index < capacity above");

        trace!(
            block_size = self.block_size(),
            index, "allocated string block"
        );

        Ok(payload)
    }

    /// Frees the block at `payload`, which must be owned by `owner`, then compacts the pool by
    /// moving the last live block into the vacated slot.
    ///
    /// # Panics
    ///
    /// Panics if the block is not a live block of this pool owned by `owner`, which indicates a
    /// double free or a block freed through the wrong pool.
    pub(crate) fn free(&mut self, payload: NonNull<u8>, owner: NonNull<StringRef>) {
        self.assert_owner_thread();

        // SAFETY: Every payload handed out by allocate() is preceded by its slot header and the
        // caller passes the location currently cached by the owning handle.
        let header = unsafe { payload.sub(HEADER_SIZE).cast::<SlotHeader>().read() };

        assert!(
            header.index < self.len
                && header.owner == Some(owner)
                && self.payload_ptr(header.index) == payload,
            "freed string block at slot {} is not a live block of the pool for {}-byte blocks owned by the caller; was it freed twice?",
            header.index,
            self.block_size()
        );

        let index = header.index;
        let last = self
            .len
            .checked_sub(1)
            .expect("guarded by index < len above");

        if index != last {
            self.relocate(last, index);
        }

        // SAFETY: last < len <= capacity, so the header is inside one of our chunks.
        unsafe {
            self.header_ptr(last).write(SlotHeader::VACANT);
        }

        self.len = last;

        self.shrink_if_sparse();
    }

    /// Moves the live block at slot `from` into the vacant slot `to` and tells its owner.
    fn relocate(&mut self, from: usize, to: usize) {
        // SAFETY: from < len, so the header is initialized and inside one of our chunks.
        let moved = unsafe { self.header_ptr(from).read() };

        let owner = moved
            .owner
            .expect("live slots always record the handle that owns them");

        let source = self.payload_ptr(from);
        let destination = self.payload_ptr(to);

        // SAFETY: Distinct slots never overlap and both payloads are block_size bytes inside our
        // chunks. The source payload was fully initialized when allocated.
        unsafe {
            ptr::copy_nonoverlapping(source.as_ptr(), destination.as_ptr(), self.block_size());
        }

        // SAFETY: to < len, so the header is inside one of our chunks.
        unsafe {
            self.header_ptr(to).write(SlotHeader {
                owner: Some(owner),
                index: to,
            });
        }

        // SAFETY: The back-pointer of a live block always names a live handle, because a handle
        // frees its block before its own storage is released.
        let owner = unsafe { owner.as_ref() };
        owner.update_location(destination);

        trace!(
            block_size = self.block_size(),
            from, to, "relocated string block"
        );
    }

    /// Releases all trailing chunks that contain no live blocks.
    ///
    /// Live blocks never move as a result of this.
    pub fn shrink_to_fit(&mut self) {
        while let Some(last_chunk) = self.chunks.last() {
            let remaining = self
                .capacity
                .checked_sub(last_chunk.slots)
                .expect("capacity is the sum of all chunk sizes");

            if remaining < self.len {
                break;
            }

            self.release_last_chunk();
        }
    }

    /// Releases the last chunk while occupancy is below a quarter of capacity.
    ///
    /// The last chunk always holds over a third of all slots, so it is known to be empty here.
    /// The first chunk is kept to avoid thrashing on a pool that alternates a few allocations.
    fn shrink_if_sparse(&mut self) {
        while self.chunks.len() > 1 && self.len.saturating_mul(4) < self.capacity {
            self.release_last_chunk();
        }
    }

    fn release_last_chunk(&mut self) {
        let chunk = self
            .chunks
            .pop()
            .expect("only called when there is a chunk to release");

        self.capacity = self
            .capacity
            .checked_sub(chunk.slots)
            .expect("capacity is the sum of all chunk sizes");

        assert!(
            self.len <= self.capacity,
            "released a chunk that still contained live blocks"
        );

        debug!(
            block_size = self.block_size(),
            released_slots = chunk.slots,
            capacity = self.capacity,
            "string pool released chunk"
        );
    }

    fn grow(&mut self) -> Result<()> {
        let chunk_index = self.chunks.len();

        let slots = u32::try_from(chunk_index)
            .ok()
            .and_then(|shift| 1_usize.checked_shl(shift))
            .and_then(|factor| self.first_chunk_slots.get().checked_mul(factor))
            .ok_or(Error::OutOfMemory {
                requested_bytes: usize::MAX,
            })?;

        let chunk = PoolChunk::new(self.slot_layout, slots)?;

        // Every slot starts out vacant so that integrity checks can tell live slots apart.
        for index_in_chunk in 0..slots {
            // SAFETY: The chunk holds `slots` slots of slot_layout size, aligned for SlotHeader.
            unsafe {
                chunk
                    .slot_ptr(self.slot_layout, index_in_chunk)
                    .cast::<SlotHeader>()
                    .write(SlotHeader::VACANT);
            }
        }

        self.chunks.push(chunk);
        self.capacity = self
            .capacity
            .checked_add(slots)
            .expect("capacity cannot exceed the address space");

        debug!(
            block_size = self.block_size(),
            chunk_index,
            slots,
            capacity = self.capacity,
            "string pool reserved chunk"
        );

        Ok(())
    }

    /// Maps a pool-wide slot index to its chunk and the index within that chunk.
    fn locate(&self, index: usize) -> (usize, usize) {
        let first = self.first_chunk_slots.get();

        // Chunk k starts at slot first * (2^k - 1), so k = floor(log2(index / first + 1)).
        #[expect(
            clippy::integer_division,
            reason = "we want the chunk boundary that index falls past"
        )]
        let scaled = (index / first)
            .checked_add(1)
            .expect("index is bounded by capacity, far below usize::MAX");

        let chunk_index = scaled.ilog2() as usize;

        let chunk_start = first.wrapping_mul((1_usize << chunk_index).wrapping_sub(1));

        (chunk_index, index.wrapping_sub(chunk_start))
    }

    fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.capacity,
            "slot {index} out of bounds in pool of capacity {} for {}-byte blocks",
            self.capacity,
            self.block_size()
        );

        let (chunk_index, index_in_chunk) = self.locate(index);

        self.chunks
            .get(chunk_index)
            .expect("every index below capacity maps to an existing chunk")
            .slot_ptr(self.slot_layout, index_in_chunk)
    }

    fn header_ptr(&self, index: usize) -> NonNull<SlotHeader> {
        self.slot_ptr(index).cast::<SlotHeader>()
    }

    fn payload_ptr(&self, index: usize) -> NonNull<u8> {
        // SAFETY: Every slot is at least HEADER_SIZE + block_size bytes long.
        unsafe { self.slot_ptr(index).add(HEADER_SIZE) }
    }

    fn assert_owner_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner_thread,
            "the pool for {}-byte blocks may only be used by the thread that created it",
            self.block_size()
        );
    }

    /// Verifies that live blocks form a gap-free prefix and that every back-pointer agrees with
    /// the location cached by the handle it names.
    ///
    /// # Panics
    ///
    /// Panics if any inconsistency is found.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub fn integrity_check(&self) {
        let chunk_slots = self
            .chunks
            .iter()
            .map(|chunk| chunk.slots)
            .fold(0_usize, usize::saturating_add);

        assert_eq!(
            chunk_slots, self.capacity,
            "capacity {} does not match the sum of chunk sizes {chunk_slots}",
            self.capacity
        );

        assert!(
            self.len <= self.capacity,
            "len {} exceeds capacity {}",
            self.len,
            self.capacity
        );

        for index in 0..self.capacity {
            // SAFETY: index < capacity and every slot header is initialized when its chunk is
            // reserved.
            let header = unsafe { self.header_ptr(index).read() };

            if index >= self.len {
                assert!(
                    header.owner.is_none(),
                    "slot {index} is past len {} but still has an owner",
                    self.len
                );
                continue;
            }

            assert_eq!(
                header.index, index,
                "slot {index} records the wrong index {}",
                header.index
            );

            let owner = header
                .owner
                .unwrap_or_else(|| panic!("live slot {index} has no owner"));

            // SAFETY: The back-pointer of a live block always names a live handle.
            let owner = unsafe { owner.as_ref() };

            assert_eq!(
                owner.get(),
                self.payload_ptr(index),
                "handle owning slot {index} caches a stale location"
            );

            assert!(
                owner.size() <= self.block_size(),
                "handle owning slot {index} is larger than the block"
            );
        }
    }
}

impl Drop for CompactingPool {
    fn drop(&mut self) {
        // Unreachable unless a handle outlived its pool, see the type docs.
        let leaked = self.len;

        // Release the memory first. If we are going to panic anyway, there is little good to
        // expect for the app itself.
        self.chunks.clear();

        if leaked == 0 {
            return;
        }

        error!(
            block_size = self.block_size(),
            leaked_blocks = leaked,
            "string pool dropped while still holding live blocks"
        );

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustNotDropItems && !thread::panicking() {
            panic!(
                "dropped a pool for {}-byte blocks with {leaked} live blocks with a policy that says it must be empty when dropped",
                self.block_size()
            );
        }
    }
}

/// One contiguous allocation of pool slots.
#[derive(Debug)]
struct PoolChunk {
    ptr: NonNull<u8>,
    slots: usize,
    layout: Layout,
}

impl PoolChunk {
    fn new(slot_layout: Layout, slots: usize) -> Result<Self> {
        let requested_bytes = slot_layout.size().saturating_mul(slots);

        let layout = slot_layout
            .size()
            .checked_mul(slots)
            .and_then(|size| Layout::from_size_align(size, slot_layout.align()).ok())
            .ok_or(Error::OutOfMemory { requested_bytes })?;

        // SAFETY: The layout is not zero-sized because slots >= 1 and every slot has a header.
        let ptr = NonNull::new(unsafe { alloc(layout) })
            .ok_or(Error::OutOfMemory { requested_bytes })?;

        Ok(Self { ptr, slots, layout })
    }

    fn slot_ptr(&self, slot_layout: Layout, index_in_chunk: usize) -> NonNull<u8> {
        debug_assert!(index_in_chunk < self.slots);

        // Cannot overflow because the whole chunk fits in the address space.
        let offset = index_in_chunk.wrapping_mul(slot_layout.size());

        // SAFETY: index_in_chunk < slots, so the offset is inside our allocation.
        unsafe { self.ptr.add(offset) }
    }
}

impl Drop for PoolChunk {
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
    use new_zealand::nz;
    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::PooledStringRef;

    assert_not_impl_any!(CompactingPool: Send, Sync);

    fn shared_pool(size: usize, first_chunk_bytes: NonZero<usize>) -> SharedPool {
        Rc::new(RefCell::new(CompactingPool::new(
            SizeClass::for_size(size).unwrap(),
            first_chunk_bytes,
            DropPolicy::MustNotDropItems,
        )))
    }

    fn filled(pool: &SharedPool, size: usize, fill: u8) -> PooledStringRef {
        let mut handle = PooledStringRef::allocate_in(pool, size).unwrap();
        handle.write(|bytes| bytes.fill(fill));
        handle
    }

    #[test]
    fn new_pool_is_empty() {
        let pool = shared_pool(10, nz!(4096));
        let pool = pool.borrow();

        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.chunk_count(), 0);
        assert_eq!(pool.block_size(), 12);
        pool.integrity_check();
    }

    #[test]
    fn allocation_payload_is_zeroed() {
        let pool = shared_pool(10, nz!(4096));
        let handle = PooledStringRef::allocate_in(&pool, 10).unwrap();

        assert_eq!(handle.to_vec(), vec![0; 10]);
        assert_eq!(pool.borrow().len(), 1);
    }

    #[test]
    fn free_of_last_block_moves_nothing() {
        let pool = shared_pool(10, nz!(4096));

        let a = filled(&pool, 10, 1);
        let b = filled(&pool, 10, 2);
        let a_location = a.get();

        b.destroy();

        assert_eq!(a.get(), a_location);
        assert_eq!(pool.borrow().len(), 1);
        pool.borrow().integrity_check();
    }

    #[test]
    fn free_from_middle_moves_last_block_into_hole() {
        let pool = shared_pool(10, nz!(4096));

        let a = filled(&pool, 10, 1);
        let b = filled(&pool, 10, 2);
        let c = filled(&pool, 10, 3);

        let a_location = a.get();
        let b_location = b.get();

        b.destroy();

        assert_eq!(a.get(), a_location);
        assert_eq!(c.get(), b_location);
        assert_eq!(c.to_vec(), vec![3; 10]);
        assert_eq!(a.to_vec(), vec![1; 10]);

        pool.borrow().integrity_check();
    }

    #[test]
    fn grows_geometrically_without_moving_blocks() {
        let pool = shared_pool(10, nz!(1));

        let handles = (0..50_u8)
            .map(|fill| filled(&pool, 10, fill))
            .collect::<Vec<_>>();
        let locations = handles.iter().map(|h| h.get()).collect::<Vec<_>>();

        // 1 + 2 + 4 + 8 + 16 + 32 slots.
        assert_eq!(pool.borrow().chunk_count(), 6);
        assert_eq!(pool.borrow().capacity(), 63);

        for ((handle, location), fill) in handles.iter().zip(&locations).zip(0_u8..) {
            assert_eq!(handle.get(), *location);
            assert_eq!(handle.to_vec(), vec![fill; 10]);
        }

        pool.borrow().integrity_check();
    }

    #[test]
    fn sparse_pool_releases_trailing_chunks() {
        let pool = shared_pool(10, nz!(1));

        let mut handles = (0..64_u8)
            .map(|fill| filled(&pool, 10, fill))
            .collect::<Vec<_>>();
        assert_eq!(pool.borrow().chunk_count(), 7);

        while handles.len() > 2 {
            drop(handles.pop());
            pool.borrow().integrity_check();
        }

        let chunk_count = pool.borrow().chunk_count();
        assert!(chunk_count < 7, "expected chunks to be released, have {chunk_count}");
        assert!(pool.borrow().capacity() >= 2);

        assert_eq!(handles[0].to_vec(), vec![0; 10]);
        assert_eq!(handles[1].to_vec(), vec![1; 10]);
    }

    #[test]
    fn shrink_to_fit_releases_only_empty_chunks() {
        let pool = shared_pool(10, nz!(1));

        let mut handles = (0..7_u8)
            .map(|fill| filled(&pool, 10, fill))
            .collect::<Vec<_>>();
        assert_eq!(pool.borrow().capacity(), 7);

        // 4 of 7 is above the automatic threshold.
        handles.truncate(4);
        assert_eq!(pool.borrow().capacity(), 7);

        pool.borrow_mut().shrink_to_fit();
        assert_eq!(pool.borrow().capacity(), 7);

        handles.truncate(3);
        pool.borrow_mut().shrink_to_fit();
        assert_eq!(pool.borrow().capacity(), 3);
        pool.borrow().integrity_check();

        handles.clear();
        pool.borrow_mut().shrink_to_fit();
        assert_eq!(pool.borrow().capacity(), 0);
        assert_eq!(pool.borrow().chunk_count(), 0);
    }

    #[test]
    fn reuses_memory_after_emptying() {
        let pool = shared_pool(100, nz!(4096));

        for round in 0..10_u8 {
            let handles = (0..20)
                .map(|_| filled(&pool, 100, round))
                .collect::<Vec<_>>();
            assert_eq!(pool.borrow().len(), 20);
            drop(handles);
            assert!(pool.borrow().is_empty());
        }

        assert_eq!(pool.borrow().chunk_count(), 1);
    }

    #[test]
    fn locate_maps_indexes_to_doubling_chunks() {
        let pool = CompactingPool::new(
            SizeClass::for_size(8).unwrap(),
            // Header is 16 bytes and payload 8 bytes, so this gives 4 slots in the first chunk.
            nz!(96),
            DropPolicy::MayDropItems,
        );

        assert_eq!(pool.first_chunk_slots.get(), 4);
        assert_eq!(pool.locate(0), (0, 0));
        assert_eq!(pool.locate(3), (0, 3));
        assert_eq!(pool.locate(4), (1, 0));
        assert_eq!(pool.locate(11), (1, 7));
        assert_eq!(pool.locate(12), (2, 0));
        assert_eq!(pool.locate(27), (2, 15));
        assert_eq!(pool.locate(28), (3, 0));
    }

    #[test]
    fn tiny_chunk_budget_still_holds_one_slot() {
        let pool = CompactingPool::new(
            SizeClass::for_size(4096).unwrap(),
            nz!(1),
            DropPolicy::MayDropItems,
        );

        assert_eq!(pool.first_chunk_slots.get(), 1);
    }

    #[test]
    fn live_handles_keep_pool_alive() {
        let pool = shared_pool(10, nz!(4096));

        let a = filled(&pool, 10, 1);
        let b = filled(&pool, 10, 2);
        assert_eq!(Rc::strong_count(&pool), 3);

        let weak = Rc::downgrade(&pool);
        drop(pool);

        // The pool is still reachable through the handles and has not been torn down.
        assert_eq!(weak.upgrade().unwrap().borrow().len(), 2);

        a.destroy();
        assert_eq!(b.to_vec(), vec![2; 10]);
        b.destroy();

        // The last handle took the now empty pool with it.
        assert!(weak.upgrade().is_none());
    }

    #[test]
    #[should_panic]
    fn drop_with_live_blocks_and_forbidding_policy_panics() {
        let mut pool = CompactingPool::new(
            SizeClass::for_size(10).unwrap(),
            nz!(4096),
            DropPolicy::MustNotDropItems,
        );

        // The owner is never dereferenced by allocate() and we never free or relocate.
        _ = pool.allocate(NonNull::dangling()).unwrap();
    }

    #[test]
    fn drop_with_live_blocks_and_permissive_policy_is_ok() {
        let mut pool = CompactingPool::new(
            SizeClass::for_size(10).unwrap(),
            nz!(4096),
            DropPolicy::MayDropItems,
        );

        // The owner is never dereferenced by allocate() and we never free or relocate.
        _ = pool.allocate(NonNull::dangling()).unwrap();
    }

    #[test]
    #[should_panic]
    fn free_with_wrong_owner_panics() {
        let pool = shared_pool(10, nz!(4096));
        let handle = filled(&pool, 10, 7);

        let location = handle.get();

        // The real owner stays alive and frees its block normally while unwinding.
        let _keep = handle;

        pool.borrow_mut().free(location, NonNull::dangling());
    }
}
