use std::cell::RefCell;
use std::num::NonZero;
use std::rc::Rc;
use std::thread;

use tracing::{debug, warn};

use crate::{
    CompactingPool, DropPolicy, PoolRegistryBuilder, PooledStringRef, Result, SharedPool,
    SizeClass,
};

thread_local! {
    // Created on first use by each thread and dropped when the thread exits. A leak is only
    // reported here because panicking in a thread-local destructor would abort the process.
    static CURRENT: PoolRegistry = PoolRegistry::builder()
        .drop_policy(DropPolicy::MayDropItems)
        .build();
}

/// Routes string allocations to the [`CompactingPool`] of the right [`SizeClass`], creating
/// pools on first use.
///
/// A registry belongs to one execution thread and is neither `Send` nor `Sync`. Every thread can
/// reach its own lazily created registry through [`with_current()`][Self::with_current], which is
/// what [`StringRef::create()`][crate::StringRef::create] uses. An engine that prefers explicit
/// context passing can instead create a registry per worker and pass it around.
///
/// # Teardown
///
/// When the registry is dropped, any pool that still holds live blocks is reported as a leak.
/// Under [`DropPolicy::MustNotDropItems`] the leak also causes a panic. Leaked handles keep their
/// pool alive, so a leak never turns into a dangling pointer.
///
/// # Examples
///
/// ```
/// use compacting_strings::PoolRegistry;
///
/// let registry = PoolRegistry::new();
///
/// let mut name = registry.create(5).unwrap();
/// name.write(|bytes| bytes.copy_from_slice(b"Alice"));
///
/// assert_eq!(registry.pool_count(), 1);
/// assert_eq!(registry.live_blocks(), 1);
///
/// name.destroy();
/// assert_eq!(registry.live_blocks(), 0);
/// ```
#[derive(Debug)]
pub struct PoolRegistry {
    /// One entry per size class, indexed by [`SizeClass::index()`].
    pools: RefCell<Vec<Option<SharedPool>>>,

    first_chunk_bytes: NonZero<usize>,

    drop_policy: DropPolicy,
}

impl PoolRegistry {
    /// Creates an empty registry with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`PoolRegistry`].
    pub fn builder() -> PoolRegistryBuilder {
        PoolRegistryBuilder::new()
    }

    pub(crate) fn new_inner(first_chunk_bytes: NonZero<usize>, drop_policy: DropPolicy) -> Self {
        Self {
            pools: RefCell::new(vec![None; SizeClass::COUNT]),
            first_chunk_bytes,
            drop_policy,
        }
    }

    /// Calls `f` with the calling thread's registry, creating it on first use.
    ///
    /// # Panics
    ///
    /// Panics if called while the thread's registry is being torn down at thread exit.
    pub fn with_current<R>(f: impl FnOnce(&Self) -> R) -> R {
        CURRENT.with(f)
    }

    /// Creates a pooled string of `size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`][crate::Error::InvalidSize] if `size` is zero or larger than
    /// [`MAX_BLOCK_SIZE`][crate::MAX_BLOCK_SIZE], and
    /// [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the pool could not grow.
    ///
    /// # Panics
    ///
    /// Panics if a string of the same size class is being accessed via
    /// [`read()`][crate::StringRef::read] or [`write()`][PooledStringRef::write].
    pub fn create(&self, size: usize) -> Result<PooledStringRef> {
        let pool = self.for_size(size)?;

        PooledStringRef::allocate_in(&pool, size)
    }

    /// Returns the pool responsible for strings of `size` bytes, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`][crate::Error::InvalidSize] if `size` is zero or larger than
    /// [`MAX_BLOCK_SIZE`][crate::MAX_BLOCK_SIZE].
    pub fn for_size(&self, size: usize) -> Result<SharedPool> {
        Ok(self.for_class(SizeClass::for_size(size)?))
    }

    /// Returns the pool for `size_class`, creating it on first use.
    #[must_use]
    pub fn for_class(&self, size_class: SizeClass) -> SharedPool {
        let mut pools = self.pools.borrow_mut();

        let entry = pools
            .get_mut(size_class.index())
            .expect("the registry has an entry for every size class");

        let pool = entry.get_or_insert_with(|| {
            debug!(
                block_size = size_class.block_size(),
                "creating string pool"
            );

            Rc::new(RefCell::new(CompactingPool::new(
                size_class,
                self.first_chunk_bytes,
                self.drop_policy,
            )))
        });

        Rc::clone(pool)
    }

    /// The number of pools created so far.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.borrow().iter().flatten().count()
    }

    /// The number of live strings across all pools of the registry.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.pools
            .borrow()
            .iter()
            .flatten()
            .map(|pool| pool.borrow().len())
            .fold(0_usize, usize::saturating_add)
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PoolRegistry {
    fn drop(&mut self) {
        let mut leaked_blocks: usize = 0;

        // Our references to the pools go away here. Pools with leaked blocks stay alive for as
        // long as the leaked handles do.
        for pool in self.pools.get_mut().drain(..).flatten() {
            let pool = pool.borrow();

            if pool.is_empty() {
                continue;
            }

            warn!(
                block_size = pool.block_size(),
                live_blocks = pool.len(),
                "string pool still holds live blocks at registry teardown"
            );

            leaked_blocks = leaked_blocks.saturating_add(pool.len());
        }

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if leaked_blocks > 0
            && self.drop_policy == DropPolicy::MustNotDropItems
            && !thread::panicking()
        {
            panic!(
                "dropped a pool registry with {leaked_blocks} live strings with a policy that says it must be empty when dropped"
            );
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::mem;

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::Error;

    assert_not_impl_any!(PoolRegistry: Send, Sync);

    #[test]
    fn new_registry_has_no_pools() {
        let registry = PoolRegistry::new();

        assert_eq!(registry.pool_count(), 0);
        assert_eq!(registry.live_blocks(), 0);
    }

    #[test]
    fn pools_are_created_per_size_class_on_demand() {
        let registry = PoolRegistry::new();

        let a = registry.create(9).unwrap();
        let b = registry.create(12).unwrap();
        assert_eq!(registry.pool_count(), 1);

        let c = registry.create(13).unwrap();
        assert_eq!(registry.pool_count(), 2);
        assert_eq!(registry.live_blocks(), 3);

        drop((a, b, c));
        assert_eq!(registry.live_blocks(), 0);

        // Empty pools are kept for reuse.
        assert_eq!(registry.pool_count(), 2);
    }

    #[test]
    fn for_size_returns_same_pool_for_same_class() {
        let registry = PoolRegistry::new();

        let first = registry.for_size(100).unwrap();
        let second = registry.for_size(128).unwrap();
        let other = registry.for_size(129).unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert!(!Rc::ptr_eq(&first, &other));
        assert_eq!(first.borrow().block_size(), 128);
    }

    #[test]
    fn for_size_rejects_invalid_sizes() {
        let registry = PoolRegistry::new();

        assert!(matches!(
            registry.for_size(0),
            Err(Error::InvalidSize { .. })
        ));
    }

    #[test]
    fn create_reports_out_of_memory_when_pool_cannot_grow() {
        let registry = PoolRegistry::builder()
            .first_chunk_bytes(NonZero::new(usize::MAX).unwrap())
            .build();

        assert!(matches!(
            registry.create(10),
            Err(Error::OutOfMemory { .. })
        ));

        // The pool was created but is left exactly as it was before the failed growth.
        let shared = registry.for_size(10).unwrap();

        // Only the registry and we refer to the pool, so the abandoned handle was released.
        assert_eq!(Rc::strong_count(&shared), 2);

        let pool = shared.borrow();

        assert_eq!(pool.len(), 0);
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.chunk_count(), 0);
        pool.integrity_check();

        assert_eq!(registry.live_blocks(), 0);
    }

    #[test]
    fn current_registry_is_per_thread() {
        let handle = PoolRegistry::with_current(|registry| registry.create(10).unwrap());

        let other_thread_blocks = thread::spawn(|| {
            PoolRegistry::with_current(|registry| {
                let _local = registry.create(10).unwrap();
                registry.live_blocks()
            })
        })
        .join()
        .unwrap();

        assert_eq!(other_thread_blocks, 1);
        assert!(PoolRegistry::with_current(PoolRegistry::live_blocks) >= 1);

        handle.destroy();
    }

    #[test]
    fn leak_with_permissive_policy_is_reported_only() {
        let registry = PoolRegistry::new();

        let handle = registry.create(10).unwrap();
        let raw = handle.into_raw();

        drop(registry);

        // The leaked handle kept its pool alive, so it can still be used and freed.
        // SAFETY: The pointer came from into_raw() and ownership was not restored before.
        let handle = unsafe { PooledStringRef::from_raw(raw) };
        assert_eq!(handle.to_vec(), vec![0; 10]);
        handle.destroy();
    }

    #[test]
    #[should_panic]
    fn leak_with_forbidding_policy_panics() {
        let registry = PoolRegistry::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        mem::forget(registry.create(10).unwrap());
    }

    #[test]
    fn empty_registry_with_forbidding_policy_drops_cleanly() {
        let registry = PoolRegistry::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        registry.create(10).unwrap().destroy();
    }
}
