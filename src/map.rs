//! The specialized map: an open-addressed hash table with linear probing
//! and soft-delete tombstones, whose slots live contiguously in one buffer.
//!
//! A slot is `{ hash: u32, key: K, value: V }`, laid out by the layout engine
//! (§4.F) so `key`/`value` get whatever padding/alignment the layout engine
//! would give them as struct members — in particular the value field's
//! alignment is always taken from the value's own computed layout, not the
//! key's (a bug in one revision of the source this contract deliberately
//! avoids by construction: each field's alignment is resolved independently).

use std::hash::Hasher;
use std::rc::Rc;

use rustc_hash::FxHasher;

use crate::access::{decode_value, encode_value, Accessor};
use crate::alloc::{Allocator, Buffer};
use crate::descriptor::{PrimitiveKind, StructBuilder, TypeDescriptor};
use crate::error::{Error, Result};
use crate::value::Record;

const EMPTY: u32 = 0x0000_0000;
const TOMBSTONE: u32 = 0x7FFF_FFFF;
const HIGH_BIT: u32 = 0x8000_0000;

const MAX_ENTRIES: u64 = i32::MAX as u64;

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

/// An open-addressed hash table with `u32`-tagged slots.
pub struct SpecializedMap<K: Record, V: Record, A: Allocator> {
    allocator: A,
    key_access: Accessor<K>,
    value_access: Accessor<V>,
    slot_size: u64,
    slot_align: u64,
    key_offset: u64,
    key_size: u64,
    value_offset: u64,
    value_size: u64,
    buffer: Buffer,
    capacity: u64,
    size: u64,
    mod_count: u64,
}

impl<K: Record, V: Record, A: Allocator> SpecializedMap<K, V, A> {
    /// Create an empty map with capacity for at least `presize` entries
    /// (rounded up to `max(2, next_pow2(presize))`), using `K`/`V`'s own
    /// [`TypeDescriptor`]s.
    pub fn new(allocator: A, presize: u64) -> Result<Self> {
        Self::with_accessors(
            allocator,
            presize,
            Accessor::for_type()?,
            Accessor::for_type()?,
        )
    }

    /// Like [`Self::new`], but with explicitly supplied key/value accessors
    /// — needed when `K`/`V` is [`crate::value::Value`].
    pub fn with_accessors(
        allocator: A,
        presize: u64,
        key_access: Accessor<K>,
        value_access: Accessor<V>,
    ) -> Result<Self> {
        let slot_descriptor = slot_descriptor(key_access.descriptor(), value_access.descriptor());
        let slot_layout = crate::layout::layout_of(&slot_descriptor)?;
        let key_field = slot_layout.find_field("key")?;
        let value_field = slot_layout.find_field("value")?;
        let key_offset = key_field.offset;
        let value_offset = value_field.offset;
        let key_size = key_field.width;
        let value_size = value_field.width;
        let slot_size = slot_layout.size;
        let slot_align = slot_layout.alignment;

        let capacity = next_pow2(presize);
        let total = capacity
            .checked_mul(slot_size)
            .ok_or_else(|| Error::invalid_argument("map capacity overflows u64"))?;
        let buffer = allocator.allocate(total, slot_align)?;

        Ok(Self {
            allocator,
            key_access,
            value_access,
            slot_size,
            slot_align,
            key_offset,
            key_size,
            value_offset,
            value_size,
            buffer,
            capacity,
            size: 0,
            mod_count: 0,
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

    fn slot_bytes(&self, idx: u64) -> &[u8] {
        let start = (idx * self.slot_size) as usize;
        &self.buffer.as_slice()[start..start + self.slot_size as usize]
    }

    fn slot_bytes_mut(&mut self, idx: u64) -> &mut [u8] {
        let start = (idx * self.slot_size) as usize;
        &mut self.buffer.as_mut_slice()[start..start + self.slot_size as usize]
    }

    fn read_hash(&self, idx: u64) -> u32 {
        let slot = self.slot_bytes(idx);
        u32::from_ne_bytes(slot[0..4].try_into().expect("slot hash field is 4 bytes"))
    }

    fn write_hash(&mut self, idx: u64, hash: u32) {
        let slot = self.slot_bytes_mut(idx);
        slot[0..4].copy_from_slice(&hash.to_ne_bytes());
    }

    fn key_range(&self, idx: u64) -> (usize, usize) {
        let base = (idx * self.slot_size) as usize;
        let start = base + self.key_offset as usize;
        (start, start + self.key_size as usize)
    }

    fn value_range(&self, idx: u64) -> (usize, usize) {
        let base = (idx * self.slot_size) as usize;
        let start = base + self.value_offset as usize;
        (start, start + self.value_size as usize)
    }

    fn encode_key_bytes(&self, key: &K) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; self.key_size as usize];
        encode_value(self.key_access.layout(), &key.to_value(), &mut bytes)?;
        Ok(bytes)
    }

    fn user_hash(&self, key: &K) -> Result<u32> {
        let bytes = self.encode_key_bytes(key)?;
        let mut hasher = FxHasher::default();
        hasher.write(&bytes);
        Ok(hasher.finish() as u32)
    }

    fn key_equals(&self, idx: u64, key_bytes: &[u8]) -> bool {
        let (start, end) = self.key_range(idx);
        &self.buffer.as_slice()[start..end] == key_bytes
    }

    fn decode_value_at(&self, idx: u64) -> Result<V> {
        let (start, end) = self.value_range(idx);
        let value = decode_value(self.value_access.layout(), &self.buffer.as_slice()[start..end])?;
        V::from_value(value)
    }

    fn decode_key_at(&self, idx: u64) -> Result<K> {
        let (start, end) = self.key_range(idx);
        let value = decode_value(self.key_access.layout(), &self.buffer.as_slice()[start..end])?;
        K::from_value(value)
    }

    fn write_entry(&mut self, idx: u64, key_bytes: &[u8], value: &V) -> Result<()> {
        let (kstart, kend) = self.key_range(idx);
        self.buffer.as_mut_slice()[kstart..kend].copy_from_slice(key_bytes);
        let (vstart, vend) = self.value_range(idx);
        encode_value(
            self.value_access.layout(),
            &value.to_value(),
            &mut self.buffer.as_mut_slice()[vstart..vend],
        )
    }

    fn write_value(&mut self, idx: u64, value: &V) -> Result<()> {
        let (vstart, vend) = self.value_range(idx);
        encode_value(
            self.value_access.layout(),
            &value.to_value(),
            &mut self.buffer.as_mut_slice()[vstart..vend],
        )
    }

    /// Look up `key`; `None` if absent.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let h = self.user_hash(key)?;
        let tagged = h | HIGH_BIT;
        let key_bytes = self.encode_key_bytes(key)?;
        let mask = self.capacity - 1;
        let mut idx = (h as u64) & mask;
        loop {
            let slot_hash = self.read_hash(idx);
            if slot_hash == EMPTY {
                return Ok(None);
            }
            if slot_hash == tagged && self.key_equals(idx, &key_bytes) {
                return Ok(Some(self.decode_value_at(idx)?));
            }
            idx = (idx + 1) & mask;
        }
    }

    pub fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert or overwrite `key` → `value`; returns the value previously
    /// stored for `key`, if any.
    pub fn put(&mut self, key: &K, value: V) -> Result<Option<V>> {
        let h = self.user_hash(key)?;
        let tagged = h | HIGH_BIT;
        let key_bytes = self.encode_key_bytes(key)?;
        let mask = self.capacity - 1;
        let mut idx = (h as u64) & mask;
        loop {
            let slot_hash = self.read_hash(idx);
            if slot_hash & HIGH_BIT == 0 {
                // EMPTY or TOMBSTONE: this is where the new entry lands. If
                // committing it would also cross the rehash threshold, grow
                // first — a rehash failure must not leave a half-committed
                // insert behind (capacity/buffer/size stay untouched on
                // `rehash`'s own error paths, so bailing out here is safe).
                if self.size + 1 == self.capacity / 2 {
                    self.rehash()?;
                    return self.put(key, value);
                }
                self.write_hash(idx, tagged);
                self.write_entry(idx, &key_bytes, &value)?;
                self.size += 1;
                self.mod_count += 1;
                return Ok(None);
            }
            if slot_hash == tagged && self.key_equals(idx, &key_bytes) {
                let old = self.decode_value_at(idx)?;
                self.write_value(idx, &value)?;
                return Ok(Some(old));
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Remove `key`; returns the value that was stored for it, if any.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        let h = self.user_hash(key)?;
        let tagged = h | HIGH_BIT;
        let key_bytes = self.encode_key_bytes(key)?;
        let mask = self.capacity - 1;
        let mut idx = (h as u64) & mask;
        loop {
            let slot_hash = self.read_hash(idx);
            if slot_hash == EMPTY {
                return Ok(None);
            }
            if slot_hash == tagged && self.key_equals(idx, &key_bytes) {
                let old = self.decode_value_at(idx)?;
                self.write_hash(idx, TOMBSTONE);
                self.size -= 1;
                self.mod_count += 1;
                return Ok(Some(old));
            }
            idx = (idx + 1) & mask;
        }
    }

    fn rehash(&mut self) -> Result<()> {
        log::debug!(
            "rehashing map: capacity {} -> {}, size {}",
            self.capacity,
            self.capacity * 2,
            self.size
        );
        let new_capacity = self
            .capacity
            .checked_mul(2)
            .filter(|&c| c <= MAX_ENTRIES + 1)
            .ok_or_else(|| Error::capacity_exceeded("map would exceed i32::MAX elements"))?;
        let new_total = new_capacity
            .checked_mul(self.slot_size)
            .ok_or_else(|| Error::invalid_argument("map capacity overflows u64"))?;
        let mut new_buffer = self.allocator.allocate(new_total, self.slot_align)?;
        let new_mask = new_capacity - 1;

        for old_idx in 0..self.capacity {
            let old_hash = self.read_hash(old_idx);
            if old_hash & HIGH_BIT == 0 {
                continue;
            }
            let mut new_idx = (old_hash & 0x7FFF_FFFF) as u64 & new_mask;
            loop {
                let start = (new_idx * self.slot_size) as usize;
                let existing = u32::from_ne_bytes(
                    new_buffer.as_slice()[start..start + 4]
                        .try_into()
                        .expect("slot hash field is 4 bytes"),
                );
                if existing == EMPTY {
                    let old_start = (old_idx * self.slot_size) as usize;
                    let slot = self.buffer.as_slice()
                        [old_start..old_start + self.slot_size as usize]
                        .to_vec();
                    new_buffer.as_mut_slice()[start..start + self.slot_size as usize]
                        .copy_from_slice(&slot);
                    break;
                }
                new_idx = (new_idx + 1) & new_mask;
            }
        }

        self.buffer = new_buffer;
        self.capacity = new_capacity;
        Ok(())
    }

    /// Iterate the entry set. Snapshots `mod_count` at creation; any
    /// mutation other than through the iterator's own [`Iter::remove`]
    /// invalidates it.
    ///
    /// The iterator borrows the map mutably, so the borrow checker already
    /// rejects any other mutating call for its lifetime; the `mod_count`
    /// check exists to fail fast with [`Error::ConcurrentModification`]
    /// rather than silently reading stale state, matching the contract even
    /// in a hypothetical caller that reaches the map through shared
    /// interior mutability.
    pub fn iter(&mut self) -> Iter<'_, K, V, A> {
        let snapshot_mod_count = self.mod_count;
        Iter {
            map: self,
            idx: 0,
            snapshot_mod_count,
            last_returned: None,
        }
    }
}

fn slot_descriptor(
    key: &Rc<TypeDescriptor>,
    value: &Rc<TypeDescriptor>,
) -> Rc<TypeDescriptor> {
    StructBuilder::new()
        .field("hash", TypeDescriptor::primitive(PrimitiveKind::U32))
        .field("key", Rc::clone(key))
        .field("value", Rc::clone(value))
        .build()
}

/// An iterator over a [`SpecializedMap`]'s entry set, produced by
/// [`SpecializedMap::iter`].
pub struct Iter<'m, K: Record, V: Record, A: Allocator> {
    map: &'m mut SpecializedMap<K, V, A>,
    idx: u64,
    snapshot_mod_count: u64,
    last_returned: Option<u64>,
}

impl<'m, K: Record, V: Record, A: Allocator> Iter<'m, K, V, A> {
    /// Remove the most recently returned entry and continue iterating.
    pub fn remove(&mut self) -> Result<()> {
        let idx = self
            .last_returned
            .ok_or_else(|| Error::invalid_argument("remove called before next"))?;
        self.map.write_hash(idx, TOMBSTONE);
        self.map.size -= 1;
        self.map.mod_count += 1;
        self.snapshot_mod_count = self.map.mod_count;
        Ok(())
    }
}

impl<'m, K: Record, V: Record, A: Allocator> Iterator for Iter<'m, K, V, A> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.map.mod_count != self.snapshot_mod_count {
            return Some(Err(Error::ConcurrentModification));
        }
        while self.idx < self.map.capacity {
            let idx = self.idx;
            self.idx += 1;
            if self.map.read_hash(idx) & HIGH_BIT != 0 {
                self.last_returned = Some(idx);
                let entry = match (self.map.decode_key_at(idx), self.map.decode_value_at(idx)) {
                    (Ok(k), Ok(v)) => Ok((k, v)),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                };
                return Some(entry);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::GlobalAllocator;
    use crate::value::Value;

    fn i32_map(presize: u64) -> SpecializedMap<Value, Value, GlobalAllocator> {
        let key_access = Accessor::new(TypeDescriptor::primitive(PrimitiveKind::I32)).unwrap();
        let value_access = Accessor::new(TypeDescriptor::primitive(PrimitiveKind::I32)).unwrap();
        SpecializedMap::with_accessors(GlobalAllocator, presize, key_access, value_access).unwrap()
    }

    fn bool_map(presize: u64) -> SpecializedMap<Value, Value, GlobalAllocator> {
        let key_access = Accessor::new(TypeDescriptor::primitive(PrimitiveKind::Bool)).unwrap();
        let value_access = Accessor::new(TypeDescriptor::primitive(PrimitiveKind::Bool)).unwrap();
        SpecializedMap::with_accessors(GlobalAllocator, presize, key_access, value_access).unwrap()
    }

    #[test]
    fn idempotent_overwrite_keeps_size_at_one() {
        let mut m = i32_map(4);
        assert_eq!(m.put(&Value::I32(1), Value::I32(10)).unwrap(), None);
        assert_eq!(
            m.put(&Value::I32(1), Value::I32(20)).unwrap(),
            Some(Value::I32(10))
        );
        assert_eq!(m.get(&Value::I32(1)).unwrap(), Some(Value::I32(20)));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn put_many_distinct_keys_and_read_back() {
        let mut m = i32_map(4);
        for i in 0..2000 {
            m.put(&Value::I32(i), Value::I32(i)).unwrap();
        }
        assert_eq!(m.len(), 2000);
        for i in 0..2000 {
            assert_eq!(m.get(&Value::I32(i)).unwrap(), Some(Value::I32(i)));
            assert!(m.contains(&Value::I32(i)).unwrap());
        }
    }

    #[test]
    fn rehash_preserves_entries() {
        let mut m = i32_map(2);
        for i in 0..50 {
            m.put(&Value::I32(i), Value::I32(i * 2)).unwrap();
        }
        assert!(m.capacity() > 2);
        for i in 0..50 {
            assert_eq!(m.get(&Value::I32(i)).unwrap(), Some(Value::I32(i * 2)));
        }
    }

    #[test]
    fn tombstone_then_reinsert() {
        let mut m = i32_map(4);
        m.put(&Value::I32(1), Value::I32(10)).unwrap();
        assert_eq!(m.remove(&Value::I32(1)).unwrap(), Some(Value::I32(10)));
        assert_eq!(m.len(), 0);
        m.put(&Value::I32(1), Value::I32(30)).unwrap();
        assert_eq!(m.get(&Value::I32(1)).unwrap(), Some(Value::I32(30)));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn bool_key_and_value() {
        let mut m = bool_map(2);
        assert_eq!(m.put(&Value::Bool(true), Value::Bool(false)).unwrap(), None);
        assert_eq!(m.len(), 1);
        let entries: Vec<_> = m.iter().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(entries, vec![(Value::Bool(true), Value::Bool(false))]);
    }

    #[test]
    fn iterator_remove_updates_size_and_continues() {
        let mut m = i32_map(4);
        for i in 0..4 {
            m.put(&Value::I32(i), Value::I32(i)).unwrap();
        }
        let mut iter = m.iter();
        let (first_key, _) = iter.next().unwrap().unwrap();
        iter.remove().unwrap();
        let remaining: Vec<_> = iter.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(!remaining.iter().any(|(k, _)| *k == first_key));
        assert_eq!(m.len(), 3);
    }
}
