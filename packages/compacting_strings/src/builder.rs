use std::num::NonZero;

use new_zealand::nz;

use crate::{DropPolicy, PoolRegistry};

/// How many bytes the first chunk of each pool should span if not configured otherwise.
///
/// Pools for large size classes get at least one slot regardless.
const DEFAULT_FIRST_CHUNK_BYTES: NonZero<usize> = nz!(16_384);

/// Builder for creating an instance of [`PoolRegistry`].
///
/// You only need to use this builder if you want to customize the registry configuration.
/// The default configuration used by [`PoolRegistry::new()`][1] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use compacting_strings::{DropPolicy, PoolRegistry};
///
/// let registry = PoolRegistry::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .first_chunk_bytes(NonZero::new(64 * 1024).unwrap())
///     .build();
/// ```
///
/// [1]: PoolRegistry::new
#[derive(Debug)]
#[must_use]
pub struct PoolRegistryBuilder {
    drop_policy: DropPolicy,
    first_chunk_bytes: NonZero<usize>,
}

impl PoolRegistryBuilder {
    pub(crate) fn new() -> Self {
        Self {
            drop_policy: DropPolicy::default(),
            first_chunk_bytes: DEFAULT_FIRST_CHUNK_BYTES,
        }
    }

    /// Sets the [drop policy][DropPolicy] for the registry and the pools it creates. This governs
    /// how to treat live strings that remain when the registry or a pool is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Sets how many bytes the first chunk of each pool should span. Later chunks of a pool
    /// double in size.
    pub fn first_chunk_bytes(mut self, bytes: NonZero<usize>) -> Self {
        self.first_chunk_bytes = bytes;
        self
    }

    /// Builds the registry with the specified configuration.
    #[must_use]
    pub fn build(self) -> PoolRegistry {
        PoolRegistry::new_inner(self.first_chunk_bytes, self.drop_policy)
    }
}
