use crate::{Error, Result};

/// The largest string, in bytes, that can be stored in a pooled or temporary handle.
pub const MAX_BLOCK_SIZE: usize = 1 << 20;

const MIN_BLOCK_SIZE: usize = 8;
const MIN_BLOCK_SIZE_SHIFT: u32 = MIN_BLOCK_SIZE.trailing_zeros();

/// A bucket of block sizes served by one [`CompactingPool`][crate::CompactingPool].
///
/// The ladder consists of the powers of two starting at 8 bytes, with an extra class at the
/// 1.5x midpoint between each pair of them: 8, 12, 16, 24, 32, 48, 64 and so on, up to
/// [`MAX_BLOCK_SIZE`]. This keeps the number of pools small while wasting less than a third of
/// each block on slack once past the smallest class.
///
/// # Examples
///
/// ```
/// use compacting_strings::SizeClass;
///
/// let class = SizeClass::for_size(10).unwrap();
/// assert_eq!(class.block_size(), 12);
///
/// // The mapping is a pure function of the size.
/// assert_eq!(class, SizeClass::for_size(10).unwrap());
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SizeClass {
    index: usize,
}

impl SizeClass {
    /// The number of distinct size classes.
    pub const COUNT: usize = ((MAX_BLOCK_SIZE.trailing_zeros() - MIN_BLOCK_SIZE_SHIFT) * 2 + 1) as usize;

    /// Returns the size class responsible for strings of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`] if `size` is zero or exceeds [`MAX_BLOCK_SIZE`].
    pub fn for_size(size: usize) -> Result<Self> {
        if size == 0 || size > MAX_BLOCK_SIZE {
            return Err(Error::InvalidSize {
                size,
                max: MAX_BLOCK_SIZE,
            });
        }

        if size <= MIN_BLOCK_SIZE {
            return Ok(Self { index: 0 });
        }

        // Cannot overflow because size <= MAX_BLOCK_SIZE, which is itself a power of two.
        let upper = size.next_power_of_two();
        let shift = upper.trailing_zeros();

        // Every power of two past the minimum is preceded on the ladder by its midpoint class.
        // shift > MIN_BLOCK_SIZE_SHIFT because size > MIN_BLOCK_SIZE.
        let upper_index = (shift.wrapping_sub(MIN_BLOCK_SIZE_SHIFT) as usize).wrapping_mul(2);
        let midpoint = (upper >> 1) | (upper >> 2);

        let index = if size <= midpoint {
            // upper_index >= 2 here, see above.
            upper_index.wrapping_sub(1)
        } else {
            upper_index
        };

        Ok(Self { index })
    }

    /// Returns the size class at position `index` on the ladder, if there is one.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        (index < Self::COUNT).then_some(Self { index })
    }

    /// The position of this class on the ladder, in `0..SizeClass::COUNT`.
    #[must_use]
    pub fn index(self) -> usize {
        self.index
    }

    /// The number of payload bytes in every block of this class.
    ///
    /// This is never less than the size that was used to look up the class.
    #[must_use]
    pub fn block_size(self) -> usize {
        let steps = self.index >> 1;

        if self.index & 1 == 0 {
            MIN_BLOCK_SIZE << steps
        } else {
            (MIN_BLOCK_SIZE | (MIN_BLOCK_SIZE >> 1)) << steps
        }
    }
}
