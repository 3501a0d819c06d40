//! The access engine: binds a [`TypeDescriptor`] to its [`ComputedLayout`]
//! and offers primitive field accessors, struct ↔ [`Value`] codecs, array
//! indexing, and path-based addressing.
//!
//! An [`Accessor<T>`] is built once per `(lookup-scope, type)` pair and
//! shared; construction walks the layout once and the resulting offset
//! tables are immutable afterwards (§9 design notes: prefer eager
//! construction over lazy per-call initialization).

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::alloc::{Allocator, Buffer};
use crate::descriptor::{PrimitiveKind, TypeDescriptor};
use crate::endianness::{ByteOrder, ResolvedByteOrder};
use crate::error::{Error, Result};
use crate::layout::{layout_of, ComputedLayout, Member, Shape};
use crate::path::{self, ResolvedPath};
use crate::value::{Record, Value};

/// An immutable object bound to a [`TypeDescriptor`] and its computed layout;
/// owns the compiled offset tables and decides whether a bulk codec is even
/// available for this shape (unions and unsized tail arrays never are).
pub struct Accessor<T: Record> {
    descriptor: Rc<TypeDescriptor>,
    layout: ComputedLayout,
    path_cache: RefCell<HashMap<String, ResolvedPath>>,
    _marker: PhantomData<T>,
}

impl<T: Record> Accessor<T> {
    /// Build an accessor for `T`'s own [`TypeDescriptor`].
    pub fn for_type() -> Result<Self> {
        Self::new(T::type_descriptor())
    }

    /// Build an accessor for an explicit descriptor; `T` is still the
    /// decoded/encoded Rust type, letting [`Value`] be used as `T` for a
    /// fully dynamic accessor over a descriptor with no fixed Rust type.
    pub fn new(descriptor: Rc<TypeDescriptor>) -> Result<Self> {
        let layout = layout_of(&descriptor)?;
        Ok(Self {
            descriptor,
            layout,
            path_cache: RefCell::new(HashMap::new()),
            _marker: PhantomData,
        })
    }

    pub fn descriptor(&self) -> &Rc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn layout(&self) -> &ComputedLayout {
        &self.layout
    }

    /// The byte distance between consecutive elements in an array of `T`.
    pub fn stride(&self) -> u64 {
        self.layout.size
    }

    /// Allocate one zeroed element's worth of storage.
    pub fn new_value(&self, alloc: &impl Allocator) -> Result<Buffer> {
        alloc.allocate(self.layout.size, self.layout.alignment)
    }

    /// Allocate one element's worth of storage and encode `value` into it.
    pub fn new_value_with(&self, alloc: &impl Allocator, value: &T) -> Result<Buffer> {
        let mut buf = self.new_value(alloc)?;
        self.set(&mut buf, value)?;
        Ok(buf)
    }

    /// Allocate `n` elements' worth of zeroed, stride-aligned storage.
    pub fn new_array(&self, alloc: &impl Allocator, n: u64) -> Result<Buffer> {
        let total = n
            .checked_mul(self.layout.size)
            .ok_or_else(|| Error::invalid_argument("array size overflows u64"))?;
        alloc.allocate(total, self.layout.alignment)
    }

    fn check_buffer(&self, buf: &Buffer) -> Result<()> {
        if buf.base() as u64 % self.layout.alignment != 0 {
            return Err(Error::invalid_argument(
                "buffer base is not aligned to the layout's alignment",
            ));
        }
        if buf.len() < self.layout.size {
            return Err(Error::invalid_argument(
                "buffer is smaller than one element's layout size",
            ));
        }
        Ok(())
    }

    fn check_bulk_supported(&self) -> Result<()> {
        if self.layout.has_unsupported_bulk_leaf() {
            return Err(Error::unsupported_layout(
                "layout contains a union or an unsized tail array; bulk get/set is unavailable",
            ));
        }
        Ok(())
    }

    /// Decode one element starting at offset 0.
    pub fn get(&self, buf: &Buffer) -> Result<T> {
        self.check_buffer(buf)?;
        self.check_bulk_supported()?;
        let value = decode_value(&self.layout, &buf.as_slice()[..self.layout.size as usize])?;
        T::from_value(value)
    }

    /// Encode `value` at offset 0.
    pub fn set(&self, buf: &mut Buffer, value: &T) -> Result<()> {
        self.check_buffer(buf)?;
        self.check_bulk_supported()?;
        let size = self.layout.size as usize;
        encode_value(&self.layout, &value.to_value(), &mut buf.as_mut_slice()[..size])
    }

    fn element_range(&self, buf: &Buffer, i: u64) -> Result<(usize, usize)> {
        let stride = self.layout.size;
        let start = i
            .checked_mul(stride)
            .ok_or_else(|| Error::invalid_argument("index overflows stride calculation"))?;
        let end = start
            .checked_add(stride)
            .ok_or_else(|| Error::invalid_argument("index overflows stride calculation"))?;
        if end > buf.len() {
            return Err(Error::invalid_argument(format!(
                "index {i} out of range for a buffer of {} elements",
                buf.len() / stride.max(1)
            )));
        }
        Ok((start as usize, end as usize))
    }

    /// Decode the element at index `i`.
    pub fn get_at(&self, buf: &Buffer, i: u64) -> Result<T> {
        self.check_bulk_supported()?;
        let (start, end) = self.element_range(buf, i)?;
        let value = decode_value(&self.layout, &buf.as_slice()[start..end])?;
        T::from_value(value)
    }

    /// Encode `value` at index `i`.
    pub fn set_at(&self, buf: &mut Buffer, i: u64, value: &T) -> Result<()> {
        self.check_bulk_supported()?;
        let (start, end) = self.element_range(buf, i)?;
        encode_value(&self.layout, &value.to_value(), &mut buf.as_mut_slice()[start..end])
    }

    /// Resolve `path` against this accessor's layout to a constant byte
    /// offset; fails if any `[]` step is present (use [`Accessor::accessor`]
    /// for paths that need runtime indices).
    pub fn byte_offset(&self, path: &str) -> Result<u64> {
        let steps = path::parse(path)?;
        let (offset, strides) = path::resolve_offset(&self.layout, &steps)?;
        if !strides.is_empty() {
            return Err(Error::invalid_argument(
                "path contains `[]` steps; use `accessor` for an indexed handle",
            ));
        }
        Ok(offset)
    }

    /// Resolve `path` into a [`TypedFieldAccessor`], memoizing the
    /// `path -> ResolvedPath` mapping for subsequent calls with the same
    /// string.
    pub fn accessor(&self, path: &str) -> Result<TypedFieldAccessor> {
        if let Some(resolved) = self.path_cache.borrow().get(path) {
            return Ok(TypedFieldAccessor {
                resolved: resolved.clone(),
            });
        }
        let steps = path::parse(path)?;
        let resolved = path::resolve_typed(&self.layout, &steps)?;
        self.path_cache
            .borrow_mut()
            .insert(path.to_string(), resolved.clone());
        Ok(TypedFieldAccessor { resolved })
    }

    /// A random-access view of `buf` as an array of `T`, with `set` support.
    pub fn list<'a>(&'a self, buf: &'a mut Buffer) -> SequenceView<'a, T> {
        SequenceView {
            accessor: self,
            buf,
        }
    }

    /// A lazy, non-restartable ordered sequence over `buf`.
    pub fn stream<'a>(&'a self, buf: &'a Buffer) -> LazySeq<'a, T> {
        let len = if self.layout.size == 0 {
            0
        } else {
            buf.len() / self.layout.size
        };
        LazySeq {
            accessor: self,
            buf,
            start: 0,
            end: len,
        }
    }
}

/// A path resolved to a primitive leaf, ready to read/write given zero or
/// more runtime indices (one per `[]` step).
#[derive(Clone)]
pub struct TypedFieldAccessor {
    resolved: ResolvedPath,
}

impl TypedFieldAccessor {
    pub fn arity(&self) -> usize {
        self.resolved.arity()
    }

    pub fn get(&self, buf: &Buffer, indices: &[u64]) -> Result<Value> {
        let offset = self.resolved.offset(indices)? as usize;
        let width = self.resolved.primitive().default_width() as usize;
        if offset + width > buf.len() as usize {
            return Err(Error::invalid_argument("resolved offset out of bounds"));
        }
        decode_primitive(
            self.resolved.primitive(),
            self.resolved.byte_order(),
            &buf.as_slice()[offset..offset + width],
        )
    }

    pub fn set(&self, buf: &mut Buffer, indices: &[u64], value: &Value) -> Result<()> {
        let offset = self.resolved.offset(indices)? as usize;
        let width = self.resolved.primitive().default_width() as usize;
        if offset + width > buf.len() as usize {
            return Err(Error::invalid_argument("resolved offset out of bounds"));
        }
        encode_primitive(
            self.resolved.primitive(),
            self.resolved.byte_order(),
            value,
            &mut buf.as_mut_slice()[offset..offset + width],
        )
    }
}

/// A random-access view of a [`Buffer`] as an array of `T`, per
/// [`Accessor::list`].
pub struct SequenceView<'a, T: Record> {
    accessor: &'a Accessor<T>,
    buf: &'a mut Buffer,
}

impl<'a, T: Record> SequenceView<'a, T> {
    pub fn len(&self) -> u64 {
        if self.accessor.layout.size == 0 {
            0
        } else {
            self.buf.len() / self.accessor.layout.size
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: u64) -> Result<T> {
        self.accessor.get_at(self.buf, i)
    }

    /// Overwrite the element at `i`, returning the value that was there.
    pub fn set(&mut self, i: u64, value: &T) -> Result<T> {
        let old = self.accessor.get_at(self.buf, i)?;
        self.accessor.set_at(self.buf, i, value)?;
        Ok(old)
    }
}

/// A lazy, forward-only, non-restartable ordered sequence of `T`, with
/// support for splitting into independent sub-sequences over disjoint index
/// ranges (since the underlying view is random-access).
pub struct LazySeq<'a, T: Record> {
    accessor: &'a Accessor<T>,
    buf: &'a Buffer,
    start: u64,
    end: u64,
}

impl<'a, T: Record> LazySeq<'a, T> {
    /// Split this sequence in two at `at` (relative to the remaining range),
    /// consuming it. Both halves stay independently iterable.
    pub fn split_at(self, at: u64) -> Result<(Self, Self)> {
        let mid = self
            .start
            .checked_add(at)
            .filter(|&m| m <= self.end)
            .ok_or_else(|| Error::invalid_argument("split point out of range"))?;
        Ok((
            LazySeq {
                accessor: self.accessor,
                buf: self.buf,
                start: self.start,
                end: mid,
            },
            LazySeq {
                accessor: self.accessor,
                buf: self.buf,
                start: mid,
                end: self.end,
            },
        ))
    }
}

impl<'a, T: Record> Iterator for LazySeq<'a, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.start >= self.end {
            return None;
        }
        let result = self.accessor.get_at(self.buf, self.start);
        self.start += 1;
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.start) as usize;
        (remaining, Some(remaining))
    }
}

/// Decode a [`Value`] out of `bytes`, which must be exactly `layout.size`
/// long. Fails with [`Error::UnsupportedLayout`] on a union or unsized tail
/// array leaf encountered anywhere in `layout`.
pub(crate) fn decode_value(layout: &ComputedLayout, bytes: &[u8]) -> Result<Value> {
    match &layout.shape {
        Shape::Primitive(kind) => decode_primitive(*kind, ByteOrder::default(), bytes),
        Shape::Union(_) => Err(Error::unsupported_layout(
            "bulk decode encountered a union leaf",
        )),
        Shape::Array { element, count } => {
            if *count == 0 {
                return Err(Error::unsupported_layout(
                    "bulk decode encountered an unsized tail array",
                ));
            }
            let stride = element.size as usize;
            let mut elements = Vec::with_capacity(*count as usize);
            for i in 0..*count as usize {
                let start = i * stride;
                elements.push(decode_value(element, &bytes[start..start + stride])?);
            }
            Ok(Value::Array(elements))
        }
        Shape::Struct(members) => {
            let mut fields = Vec::new();
            for member in members {
                if let Member::Field(field) = member {
                    let child = layout_of(&field.ty)?;
                    let start = field.offset as usize;
                    let end = start + child.size as usize;
                    let value = match &child.shape {
                        Shape::Primitive(kind) => {
                            decode_primitive(*kind, field.byte_order, &bytes[start..end])?
                        }
                        _ => decode_value(&child, &bytes[start..end])?,
                    };
                    fields.push((Rc::from(field.name.as_str()), value));
                }
            }
            Ok(Value::Struct(fields))
        }
    }
}

/// Encode `value` into `bytes`, the mirror of [`decode_value`].
pub(crate) fn encode_value(layout: &ComputedLayout, value: &Value, bytes: &mut [u8]) -> Result<()> {
    match &layout.shape {
        Shape::Primitive(kind) => encode_primitive(*kind, ByteOrder::default(), value, bytes),
        Shape::Union(_) => Err(Error::unsupported_layout(
            "bulk encode encountered a union leaf",
        )),
        Shape::Array { element, count } => {
            if *count == 0 {
                return Err(Error::unsupported_layout(
                    "bulk encode encountered an unsized tail array",
                ));
            }
            let elements = value.elements()?;
            if elements.len() as u64 != *count {
                return Err(Error::invalid_argument(format!(
                    "expected {count} array elements, got {}",
                    elements.len()
                )));
            }
            let stride = element.size as usize;
            for (i, item) in elements.iter().enumerate() {
                let start = i * stride;
                encode_value(element, item, &mut bytes[start..start + stride])?;
            }
            Ok(())
        }
        Shape::Struct(members) => {
            for member in members {
                if let Member::Field(field) = member {
                    let child = layout_of(&field.ty)?;
                    let start = field.offset as usize;
                    let end = start + child.size as usize;
                    let field_value = value.field(&field.name)?;
                    match &child.shape {
                        Shape::Primitive(kind) => encode_primitive(
                            *kind,
                            field.byte_order,
                            field_value,
                            &mut bytes[start..end],
                        )?,
                        _ => encode_value(&child, field_value, &mut bytes[start..end])?,
                    }
                }
            }
            Ok(())
        }
    }
}

fn decode_primitive(kind: PrimitiveKind, byte_order: ByteOrder, bytes: &[u8]) -> Result<Value> {
    let resolved = byte_order.resolved();
    macro_rules! read {
        ($ty:ty, $variant:ident) => {{
            let mut arr = [0u8; std::mem::size_of::<$ty>()];
            arr.copy_from_slice(bytes);
            let v = match resolved {
                ResolvedByteOrder::Little => <$ty>::from_le_bytes(arr),
                ResolvedByteOrder::Big => <$ty>::from_be_bytes(arr),
            };
            Value::$variant(v)
        }};
    }
    Ok(match kind {
        PrimitiveKind::Bool => Value::Bool(bytes[0] != 0),
        PrimitiveKind::I8 => Value::I8(bytes[0] as i8),
        PrimitiveKind::U8 => Value::U8(bytes[0]),
        PrimitiveKind::I16 => read!(i16, I16),
        PrimitiveKind::U16 => read!(u16, U16),
        PrimitiveKind::Char16 => read!(u16, Char16),
        PrimitiveKind::I32 => read!(i32, I32),
        PrimitiveKind::U32 => read!(u32, U32),
        PrimitiveKind::F32 => {
            let mut arr = [0u8; 4];
            arr.copy_from_slice(bytes);
            let bits = match resolved {
                ResolvedByteOrder::Little => u32::from_le_bytes(arr),
                ResolvedByteOrder::Big => u32::from_be_bytes(arr),
            };
            Value::F32(f32::from_bits(bits))
        }
        PrimitiveKind::I64 => read!(i64, I64),
        PrimitiveKind::U64 => read!(u64, U64),
        PrimitiveKind::F64 => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            let bits = match resolved {
                ResolvedByteOrder::Little => u64::from_le_bytes(arr),
                ResolvedByteOrder::Big => u64::from_be_bytes(arr),
            };
            Value::F64(f64::from_bits(bits))
        }
    })
}

fn encode_primitive(
    kind: PrimitiveKind,
    byte_order: ByteOrder,
    value: &Value,
    bytes: &mut [u8],
) -> Result<()> {
    let resolved = byte_order.resolved();
    macro_rules! write_int {
        ($v:expr) => {{
            let encoded = match resolved {
                ResolvedByteOrder::Little => $v.to_le_bytes(),
                ResolvedByteOrder::Big => $v.to_be_bytes(),
            };
            bytes.copy_from_slice(&encoded);
        }};
    }
    match (kind, value) {
        (PrimitiveKind::Bool, Value::Bool(v)) => bytes[0] = *v as u8,
        (PrimitiveKind::I8, Value::I8(v)) => bytes[0] = *v as u8,
        (PrimitiveKind::U8, Value::U8(v)) => bytes[0] = *v,
        (PrimitiveKind::I16, Value::I16(v)) => write_int!(v),
        (PrimitiveKind::U16, Value::U16(v)) => write_int!(v),
        (PrimitiveKind::Char16, Value::Char16(v)) => write_int!(v),
        (PrimitiveKind::I32, Value::I32(v)) => write_int!(v),
        (PrimitiveKind::U32, Value::U32(v)) => write_int!(v),
        (PrimitiveKind::I64, Value::I64(v)) => write_int!(v),
        (PrimitiveKind::U64, Value::U64(v)) => write_int!(v),
        (PrimitiveKind::F32, Value::F32(v)) => {
            let bits = v.to_bits();
            write_int!(bits);
        }
        (PrimitiveKind::F64, Value::F64(v)) => {
            let bits = v.to_bits();
            write_int!(bits);
        }
        _ => {
            return Err(Error::invalid_argument(format!(
                "value does not match primitive kind {kind:?}"
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::GlobalAllocator;
    use crate::descriptor::StructBuilder;

    fn point_descriptor() -> Rc<TypeDescriptor> {
        StructBuilder::new()
            .field("x", TypeDescriptor::primitive(PrimitiveKind::I32))
            .field("y", TypeDescriptor::primitive(PrimitiveKind::I32))
            .build()
    }

    fn point(x: i32, y: i32) -> Value {
        Value::Struct(vec![
            (Rc::from("x"), Value::I32(x)),
            (Rc::from("y"), Value::I32(y)),
        ])
    }

    #[test]
    fn new_value_round_trips_zeroed_default() {
        let accessor: Accessor<Value> = Accessor::new(point_descriptor()).unwrap();
        let buf = accessor.new_value(&GlobalAllocator).unwrap();
        assert_eq!(accessor.get(&buf).unwrap(), point(0, 0));
    }

    #[test]
    fn new_value_with_round_trips() {
        let accessor: Accessor<Value> = Accessor::new(point_descriptor()).unwrap();
        let buf = accessor
            .new_value_with(&GlobalAllocator, &point(1, 2))
            .unwrap();
        assert_eq!(accessor.get(&buf).unwrap(), point(1, 2));
    }

    #[test]
    fn array_round_trip_get_at_set_at() {
        let accessor: Accessor<Value> = Accessor::new(point_descriptor()).unwrap();
        let mut buf = accessor.new_array(&GlobalAllocator, 10).unwrap();
        for i in 0..10 {
            accessor
                .set_at(&mut buf, i, &point(i as i32, -(i as i32)))
                .unwrap();
        }
        assert_eq!(accessor.get_at(&buf, 7).unwrap(), point(7, -7));
    }

    #[test]
    fn byte_offset_matches_layout() {
        let accessor: Accessor<Value> = Accessor::new(point_descriptor()).unwrap();
        assert_eq!(accessor.byte_offset(".x").unwrap(), 0);
        assert_eq!(accessor.byte_offset(".y").unwrap(), 4);
        assert_eq!(accessor.layout().size, 8);
    }

    #[test]
    fn stream_and_list_agree_with_get_at() {
        let accessor: Accessor<Value> = Accessor::new(point_descriptor()).unwrap();
        let mut buf = accessor.new_array(&GlobalAllocator, 4).unwrap();
        for i in 0..4 {
            accessor
                .set_at(&mut buf, i, &point(i as i32, i as i32))
                .unwrap();
        }
        let collected: Vec<Value> = accessor
            .stream(&buf)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let view = accessor.list(&mut buf);
        assert_eq!(view.len(), 4);
        for i in 0..4 {
            assert_eq!(view.get(i).unwrap(), collected[i as usize]);
        }
    }

    #[test]
    fn stream_split_covers_disjoint_ranges() {
        let accessor: Accessor<Value> = Accessor::new(point_descriptor()).unwrap();
        let mut buf = accessor.new_array(&GlobalAllocator, 6).unwrap();
        for i in 0..6 {
            accessor.set_at(&mut buf, i, &point(i as i32, 0)).unwrap();
        }
        let (left, right) = accessor.stream(&buf).split_at(3).unwrap();
        let left: Vec<_> = left.collect::<Result<Vec<_>>>().unwrap();
        let right: Vec<_> = right.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(left.len(), 3);
        assert_eq!(right.len(), 3);
        assert_eq!(left[0], point(0, 0));
        assert_eq!(right[0], point(3, 0));
    }

    #[test]
    fn sequence_view_set_returns_old_and_updates_buffer() {
        let accessor: Accessor<Value> = Accessor::new(point_descriptor()).unwrap();
        let mut buf = accessor.new_array(&GlobalAllocator, 4).unwrap();
        for i in 0..4 {
            accessor.set_at(&mut buf, i, &point(i as i32, i as i32)).unwrap();
        }
        let mut view = accessor.list(&mut buf);
        let old = view.set(2, &point(100, 100)).unwrap();
        assert_eq!(old, point(2, 2));
        assert_eq!(view.get(2).unwrap(), point(100, 100));
    }

    #[test]
    fn byte_order_override_swaps_raw_bytes_but_not_logical_value() {
        use crate::descriptor::FieldOpts;

        let little = StructBuilder::new()
            .field_with_opts(
                "v",
                TypeDescriptor::primitive(PrimitiveKind::I32),
                FieldOpts {
                    byte_order: ByteOrder::Little,
                    ..Default::default()
                },
            )
            .build();
        let big = StructBuilder::new()
            .field_with_opts(
                "v",
                TypeDescriptor::primitive(PrimitiveKind::I32),
                FieldOpts {
                    byte_order: ByteOrder::Big,
                    ..Default::default()
                },
            )
            .build();

        let value = Value::Struct(vec![(Rc::from("v"), Value::I32(0x0102_0304))]);

        let little_accessor: Accessor<Value> = Accessor::new(little).unwrap();
        let little_buf = little_accessor
            .new_value_with(&GlobalAllocator, &value)
            .unwrap();
        assert_eq!(
            little_buf.as_slice(),
            &[0x04, 0x03, 0x02, 0x01]
        );
        assert_eq!(little_accessor.get(&little_buf).unwrap(), value);

        let big_accessor: Accessor<Value> = Accessor::new(big).unwrap();
        let big_buf = big_accessor
            .new_value_with(&GlobalAllocator, &value)
            .unwrap();
        assert_eq!(big_buf.as_slice(), &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(big_accessor.get(&big_buf).unwrap(), value);

        assert_ne!(little_buf.as_slice(), big_buf.as_slice());
    }

    #[test]
    fn bulk_get_fails_on_union_leaf() {
        let desc = StructBuilder::union()
            .field("as_i32", TypeDescriptor::primitive(PrimitiveKind::I32))
            .field("as_i8", TypeDescriptor::primitive(PrimitiveKind::I8))
            .build();
        let accessor: Accessor<Value> = Accessor::new(desc).unwrap();
        let buf = accessor.new_value(&GlobalAllocator).unwrap();
        assert!(matches!(
            accessor.get(&buf),
            Err(Error::UnsupportedLayout(_))
        ));
    }
}
