use std::alloc::Layout;
use std::cell::{Cell, Ref};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;
use std::rc::Rc;
use std::slice;

use crate::{Arena, CompactingPool, PoolRegistry, Result, SharedPool, SizeClass};

const ERR_POOL_IN_USE: &str = "cannot modify a string pool while bytes of one of its strings are being accessed; \
                               strings of the same size class cannot be created or destroyed inside read() or write()";

/// A stable-address handle to a string whose bytes live in relocatable storage.
///
/// Row storage embeds a pointer to a `StringRef` in place of an inline value. The handle itself
/// never moves for as long as it exists, even though its bytes may be moved by the owning pool
/// whenever another string of the same size class is destroyed. The pool keeps the handle's
/// cached address up to date, so always go through the handle and never hold on to the raw
/// pointer returned by [`get()`][Self::get].
///
/// Handles come in two flavors:
///
/// * Pooled handles, created by [`StringRef::create()`] or [`PoolRegistry::create()`] and owned
///   through a [`PooledStringRef`]. Dropping or [destroying][PooledStringRef::destroy] the owner
///   returns the bytes to the pool.
/// * Temporary handles, created by [`StringRef::create_temporary()`] inside an [`Arena`]. They
///   are never destroyed individually; their storage is reclaimed together with the arena.
///
/// # Examples
///
/// ```
/// use compacting_strings::StringRef;
///
/// let mut greeting = StringRef::create(10).unwrap();
/// greeting.write(|bytes| bytes.copy_from_slice(b"HELLOWORLD"));
///
/// greeting.read(|bytes| assert_eq!(bytes, b"HELLOWORLD"));
///
/// greeting.destroy();
/// ```
pub struct StringRef {
    size: usize,

    temporary: bool,

    /// Address of the first payload byte. Updated by the owning pool on relocation.
    location: Cell<NonNull<u8>>,

    /// The pool that owns the payload. `None` for temporary handles.
    pool: Option<SharedPool>,
}

impl StringRef {
    /// Creates a pooled string of `size` zeroed bytes using the current thread's
    /// [`PoolRegistry`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`][crate::Error::InvalidSize] if `size` is zero or larger than
    /// [`MAX_BLOCK_SIZE`][crate::MAX_BLOCK_SIZE], and
    /// [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the pool could not grow.
    ///
    /// # Panics
    ///
    /// Panics if a string of the same size class is being accessed via [`read()`][Self::read]
    /// or [`write()`][Self::write] on this thread.
    pub fn create(size: usize) -> Result<PooledStringRef> {
        PoolRegistry::with_current(|registry| registry.create(size))
    }

    /// Creates a temporary string of `size` zeroed bytes, carving both the handle and its bytes
    /// out of `arena`.
    ///
    /// The handle is valid until the arena is reset or dropped and is never relocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`][crate::Error::InvalidSize] if `size` is zero or larger than
    /// [`MAX_BLOCK_SIZE`][crate::MAX_BLOCK_SIZE], and
    /// [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the arena could not grow.
    ///
    /// # Examples
    ///
    /// ```
    /// use compacting_strings::{Arena, StringRef};
    ///
    /// let mut arena = Arena::new();
    ///
    /// let scratch = StringRef::create_temporary(5, &arena).unwrap();
    /// scratch.write(|bytes| bytes.copy_from_slice(b"hello"));
    /// assert!(scratch.is_temporary());
    ///
    /// // Everything the arena issued is reclaimed at once.
    /// arena.reset();
    /// ```
    pub fn create_temporary(size: usize, arena: &Arena) -> Result<&mut Self> {
        // The arena could serve larger strings but we hold them to the same limit as pooled ones.
        SizeClass::for_size(size)?;

        let handle = arena.allocate_layout(Layout::new::<Self>())?.cast::<Self>();
        let payload = arena.allocate(size)?;

        // SAFETY: The arena just gave us `size` bytes of exclusively owned storage.
        unsafe {
            payload.write_bytes(0, size);
        }

        // SAFETY: The arena just gave us storage matching the layout of Self.
        unsafe {
            handle.write(Self {
                size,
                temporary: true,
                location: Cell::new(payload),
                pool: None,
            });
        }

        // SAFETY: The handle was initialized above and nobody else has a pointer to it. The
        // returned borrow is tied to the arena, which cannot be reset while it is alive.
        Ok(unsafe { &mut *handle.as_ptr() })
    }

    /// The number of bytes in the string.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the handle was created in an [`Arena`] rather than a pool.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    /// Returns the current address of the string's bytes.
    ///
    /// The pointer is valid for reads and writes of [`size()`][Self::size] bytes only until the
    /// next string of the same size class is destroyed on this thread, which may relocate the
    /// bytes. Prefer [`read()`][Self::read] and [`write()`][Self::write], which rule that out.
    #[must_use]
    pub fn get(&self) -> NonNull<u8> {
        self.location.get()
    }

    /// Calls `f` with the bytes of the string.
    ///
    /// While `f` runs, the owning pool cannot be modified: creating or destroying another string
    /// of the same size class inside `f` panics.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _pool_guard = self.borrow_pool();

        // SAFETY: The location always refers to `size` initialized bytes and the borrowed pool
        // cannot relocate them while we hold the guard.
        let bytes = unsafe { slice::from_raw_parts(self.location.get().as_ptr(), self.size) };

        f(bytes)
    }

    /// Calls `f` with exclusive access to the bytes of the string.
    ///
    /// Pooled strings are written through [`PooledStringRef::write()`] instead.
    pub fn write<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        // SAFETY: Exclusive access to the handle implies exclusive access to its bytes.
        unsafe { self.write_unchecked(f) }
    }

    /// Copies the bytes of the string into a new vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.read(<[u8]>::to_vec)
    }

    /// # Safety
    ///
    /// The caller must ensure that no other reference to the bytes of this string exists for
    /// the duration of the call.
    unsafe fn write_unchecked<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let _pool_guard = self.borrow_pool();

        // SAFETY: The location always refers to `size` initialized bytes, the borrowed pool
        // cannot relocate them while we hold the guard and the caller guarantees exclusivity.
        let bytes =
            unsafe { slice::from_raw_parts_mut(self.location.get().as_ptr(), self.size) };

        f(bytes)
    }

    fn borrow_pool(&self) -> Option<Ref<'_, CompactingPool>> {
        self.pool.as_ref().map(|pool| pool.borrow())
    }

    /// Points the handle at the new location of its bytes after the owning pool moved them.
    ///
    /// Only the pool that owns the bytes may call this, exactly once per relocation.
    pub(crate) fn update_location(&self, location: NonNull<u8>) {
        debug_assert!(!self.temporary, "temporary strings are never relocated");

        self.location.set(location);
    }
}

impl fmt::Debug for StringRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringRef")
            .field("size", &self.size)
            .field("temporary", &self.temporary)
            .field("location", &self.location.get())
            .finish_non_exhaustive()
    }
}

/// Owner of a pooled [`StringRef`].
///
/// Dereferences to the handle. Dropping the owner, or calling [`destroy()`][Self::destroy],
/// returns the bytes to their pool and releases the handle, after which the pool compacts itself.
///
/// Row storage keeps the fixed-width pointer obtained from [`into_raw()`][Self::into_raw] and
/// regains ownership with [`from_raw()`][Self::from_raw] when the row is deleted.
///
/// The owner is neither `Send` nor `Sync`: a pooled string may only be used and destroyed on the
/// thread whose registry created it.
pub struct PooledStringRef {
    string_ref: NonNull<StringRef>,
}

impl PooledStringRef {
    /// Allocates a handle and a block for `size` bytes from `pool`, installing the back-pointer.
    pub(crate) fn allocate_in(pool: &SharedPool, size: usize) -> Result<Self> {
        let string_ref = Box::new(StringRef {
            size,
            temporary: false,
            location: Cell::new(NonNull::dangling()),
            pool: Some(Rc::clone(pool)),
        });

        let string_ref = NonNull::from(Box::leak(string_ref));

        let allocated = {
            let mut pool = pool.try_borrow_mut().expect(ERR_POOL_IN_USE);
            debug_assert!(size <= pool.block_size());

            pool.allocate(string_ref)
        };

        match allocated {
            Ok(location) => {
                // SAFETY: We just created the handle and nothing else has a reference to it yet.
                unsafe { string_ref.as_ref() }.update_location(location);

                Ok(Self { string_ref })
            }
            Err(error) => {
                // SAFETY: The handle came from Box::leak above and the pool did not keep it.
                drop(unsafe { Box::from_raw(string_ref.as_ptr()) });

                Err(error)
            }
        }
    }

    /// Returns the bytes to the pool and releases the handle.
    ///
    /// Equivalent to dropping the owner.
    ///
    /// # Panics
    ///
    /// Panics if a string of the same size class is being accessed via [`StringRef::read()`] or
    /// [`write()`][Self::write] on this thread.
    pub fn destroy(self) {
        drop(self);
    }

    /// Calls `f` with exclusive access to the bytes of the string.
    ///
    /// While `f` runs, the owning pool cannot be modified: creating or destroying another string
    /// of the same size class inside `f` panics.
    pub fn write<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        // SAFETY: We are the unique owner and hold an exclusive borrow of ourselves, so nobody
        // else is accessing the bytes through this handle.
        unsafe { self.string_ref.as_ref().write_unchecked(f) }
    }

    /// Gives up ownership, returning the fixed-width pointer that row storage embeds.
    ///
    /// The handle stays alive and keeps receiving relocation updates. Ownership must eventually
    /// be restored with [`from_raw()`][Self::from_raw], otherwise the string leaks and is
    /// reported when the registry is torn down.
    #[must_use]
    pub fn into_raw(self) -> NonNull<StringRef> {
        let this = ManuallyDrop::new(self);
        this.string_ref
    }

    /// Regains ownership of a handle previously released with [`into_raw()`][Self::into_raw].
    ///
    /// # Safety
    ///
    /// The pointer must come from [`into_raw()`][Self::into_raw], ownership must not have been
    /// restored before, and this must be called on the thread that created the string.
    ///
    /// # Panics
    ///
    /// Panics if the pointer refers to a temporary handle, which can only be reclaimed by
    /// resetting or dropping its arena.
    #[must_use]
    pub unsafe fn from_raw(string_ref: NonNull<StringRef>) -> Self {
        // SAFETY: The caller guarantees the pointer refers to a live handle.
        let is_temporary = unsafe { string_ref.as_ref() }.is_temporary();

        assert!(
            !is_temporary,
            "temporary strings are reclaimed with their arena and cannot be destroyed individually"
        );

        Self { string_ref }
    }
}

impl Deref for PooledStringRef {
    type Target = StringRef;

    fn deref(&self) -> &StringRef {
        // SAFETY: The handle lives until we drop it and nobody holds an exclusive reference.
        unsafe { self.string_ref.as_ref() }
    }
}

impl Drop for PooledStringRef {
    fn drop(&mut self) {
        {
            // SAFETY: The handle lives until we release it below.
            let string_ref = unsafe { self.string_ref.as_ref() };

            let pool = string_ref
                .pool
                .as_ref()
                .expect("pooled strings always reference their pool");

            // If this panics, the handle is leaked rather than freed so the back-pointer
            // in the still-live block remains valid.
            pool.try_borrow_mut()
                .expect(ERR_POOL_IN_USE)
                .free(string_ref.get(), self.string_ref);
        }

        // SAFETY: The handle came from Box::leak in allocate_in() and the pool no longer refers
        // to it now that its block is freed.
        drop(unsafe { Box::from_raw(self.string_ref.as_ptr()) });
    }
}

impl fmt::Debug for PooledStringRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledStringRef").field(&**self).finish()
    }
}
