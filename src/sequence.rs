//! The specialized sequence: a growable, contiguous array of `T` stored in a
//! single buffer rather than as heap-boxed elements.
//!
//! Capacity is always a power of two, at least 2; growth doubles capacity and
//! copies the live prefix into a fresh buffer from the same allocator.

use crate::access::Accessor;
use crate::alloc::{Allocator, Buffer};
use crate::error::{Error, Result};
use crate::value::Record;

const MAX_LEN: u64 = i32::MAX as u64;

fn next_pow2(n: u64) -> u64 {
    if n <= 1 {
        return 2;
    }
    let mut p = 1u64;
    while p < n {
        p <<= 1;
    }
    p
}

/// A growable, contiguous sequence of `T`, backed by one buffer from `A`.
pub struct SpecializedSequence<T: Record, A: Allocator> {
    allocator: A,
    element_access: Accessor<T>,
    buffer: Buffer,
    size: u64,
    capacity: u64,
}

impl<T: Record, A: Allocator> SpecializedSequence<T, A> {
    /// Create an empty sequence with capacity for at least `presize`
    /// elements (rounded up to `max(2, next_pow2(presize))`), using `T`'s own
    /// [`TypeDescriptor`](crate::descriptor::TypeDescriptor).
    pub fn new(allocator: A, presize: u64) -> Result<Self> {
        Self::with_accessor(allocator, presize, Accessor::for_type()?)
    }

    /// Like [`Self::new`], but with an explicitly supplied accessor —
    /// needed when `T` is [`crate::value::Value`], which has no fixed
    /// descriptor of its own.
    pub fn with_accessor(allocator: A, presize: u64, element_access: Accessor<T>) -> Result<Self> {
        let capacity = next_pow2(presize);
        let buffer = element_access.new_array(&allocator, capacity)?;
        Ok(Self {
            allocator,
            element_access,
            buffer,
            size: 0,
            capacity,
        })
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn check_index(&self, i: u64) -> Result<()> {
        if i >= self.size {
            return Err(Error::invalid_argument(format!(
                "index {i} out of range for a sequence of length {}",
                self.size
            )));
        }
        Ok(())
    }

    pub fn get(&self, i: u64) -> Result<T> {
        self.check_index(i)?;
        self.element_access.get_at(&self.buffer, i)
    }

    /// Overwrite the element at `i`, returning the value that was there.
    pub fn set(&mut self, i: u64, value: T) -> Result<T> {
        self.check_index(i)?;
        let old = self.element_access.get_at(&self.buffer, i)?;
        self.element_access.set_at(&mut self.buffer, i, &value)?;
        Ok(old)
    }

    fn grow_if_full(&mut self) -> Result<()> {
        if self.size < self.capacity {
            return Ok(());
        }
        let new_capacity = self
            .capacity
            .checked_mul(2)
            .filter(|&c| c <= MAX_LEN + 1)
            .ok_or_else(|| Error::capacity_exceeded("sequence would exceed i32::MAX elements"))?;
        log::trace!(
            "growing sequence: capacity {} -> {new_capacity}",
            self.capacity
        );
        let mut new_buffer = self
            .element_access
            .new_array(&self.allocator, new_capacity)?;
        let live_bytes = (self.size * self.element_access.stride()) as usize;
        new_buffer.as_mut_slice()[..live_bytes]
            .copy_from_slice(&self.buffer.as_slice()[..live_bytes]);
        self.buffer = new_buffer;
        self.capacity = new_capacity;
        Ok(())
    }

    /// Append `value` at the end; amortized O(1).
    pub fn push(&mut self, value: T) -> Result<()> {
        if self.size >= MAX_LEN {
            return Err(Error::capacity_exceeded(
                "sequence would exceed i32::MAX elements",
            ));
        }
        self.grow_if_full()?;
        self.element_access.set_at(&mut self.buffer, self.size, &value)?;
        self.size += 1;
        Ok(())
    }

    /// Insert `value` at index `i`, shifting `[i, size)` one stride right.
    pub fn insert(&mut self, i: u64, value: T) -> Result<()> {
        if i > self.size {
            return Err(Error::invalid_argument(format!(
                "insert index {i} out of range for a sequence of length {}",
                self.size
            )));
        }
        if self.size >= MAX_LEN {
            return Err(Error::capacity_exceeded(
                "sequence would exceed i32::MAX elements",
            ));
        }
        self.grow_if_full()?;
        let stride = self.element_access.stride() as usize;
        let from = (i * self.element_access.stride()) as usize;
        let to = from + stride;
        let tail_len = ((self.size - i) * self.element_access.stride()) as usize;
        self.buffer
            .as_mut_slice()
            .copy_within(from..from + tail_len, to);
        self.element_access.set_at(&mut self.buffer, i, &value)?;
        self.size += 1;
        Ok(())
    }

    /// Remove and return the element at `i`, shifting `[i+1, size)` one
    /// stride left.
    pub fn remove(&mut self, i: u64) -> Result<T> {
        self.check_index(i)?;
        let removed = self.element_access.get_at(&self.buffer, i)?;
        let from = ((i + 1) * self.element_access.stride()) as usize;
        let to = (i * self.element_access.stride()) as usize;
        let tail_len = ((self.size - i - 1) * self.element_access.stride()) as usize;
        self.buffer
            .as_mut_slice()
            .copy_within(from..from + tail_len, to);
        self.size -= 1;
        Ok(removed)
    }

    /// Compare the first `size` elements of `self` and `other` bytewise.
    /// Callers with heterogeneous sequences should fall back to an
    /// element-wise comparison via [`AnySequence`].
    pub fn equals(&self, other: &Self) -> bool {
        if self.size != other.size {
            return false;
        }
        let live_bytes = (self.size * self.element_access.stride()) as usize;
        self.buffer.as_slice()[..live_bytes] == other.buffer.as_slice()[..live_bytes]
    }
}

/// Type-erased element-wise comparison, used by [`SpecializedSequence::equals`]
/// callers that need to compare sequences of possibly different concrete
/// element types.
pub trait AnySequence<T: Record> {
    fn any_len(&self) -> u64;
    fn any_get(&self, i: u64) -> Result<T>;
}

impl<T: Record, A: Allocator> AnySequence<T> for SpecializedSequence<T, A> {
    fn any_len(&self) -> u64 {
        self.size
    }

    fn any_get(&self, i: u64) -> Result<T> {
        self.get(i)
    }
}

/// Element-wise equality across two [`AnySequence`] trait objects, used when
/// the two sequences are not known to share a concrete element type at
/// compile time.
pub fn equals_element_wise<T: Record + PartialEq>(
    a: &dyn AnySequence<T>,
    b: &dyn AnySequence<T>,
) -> Result<bool> {
    if a.any_len() != b.any_len() {
        return Ok(false);
    }
    for i in 0..a.any_len() {
        if a.any_get(i)? != b.any_get(i)? {
            return Ok(false);
        }
    }
    Ok(true)
}
