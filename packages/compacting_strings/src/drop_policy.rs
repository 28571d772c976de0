/// Determines how a pool or registry treats live blocks that remain when it is dropped.
///
/// Live blocks at teardown always indicate a leak: some handle was never destroyed. The leak is
/// always reported through `tracing`; the policy decides whether it is also fatal.
///
/// # Examples
///
/// ```
/// use compacting_strings::{DropPolicy, PoolRegistry};
///
/// let registry = PoolRegistry::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Leaked blocks are logged and the teardown proceeds. This is the default.
    #[default]
    MayDropItems,

    /// The container will panic if it still contains live blocks when it is dropped.
    ///
    /// Use this where a leak must stop the process, e.g. in tests of the code that embeds
    /// handles in row storage.
    MustNotDropItems,
}
