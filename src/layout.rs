//! The layout engine: turns a [`TypeDescriptor`] into a deterministic,
//! byte-level [`ComputedLayout`] — offsets, padding, size and alignment —
//! matching the rules a standards-compliant C compiler would apply, with the
//! user-overridable knobs from [`FieldOpts`] and [`LayoutOpts`].

use std::rc::Rc;

use crate::descriptor::{EndPadding, FieldDescriptor, LayoutKind, PrimitiveKind, TypeDescriptor};
use crate::endianness::ByteOrder;
use crate::error::{Error, Result};

/// One entry of a computed struct/union layout: either padding (whose
/// contents are unspecified) or a named field at a concrete byte offset.
#[derive(Debug, Clone)]
pub enum Member {
    Padding(u64),
    Field(FieldLayout),
}

/// A single resolved field within a [`ComputedLayout`].
#[derive(Debug, Clone)]
pub struct FieldLayout {
    pub name: String,
    pub ty: Rc<TypeDescriptor>,
    pub offset: u64,
    pub width: u64,
    pub byte_order: ByteOrder,
}

/// The shape-specific part of a [`ComputedLayout`], distinguishing structs
/// and unions (which carry members) from primitives and arrays (which don't).
#[derive(Debug, Clone)]
pub enum Shape {
    Primitive(PrimitiveKind),
    Struct(Vec<Member>),
    Union(Vec<Member>),
    Array { element: Rc<ComputedLayout>, count: u64 },
}

/// The deterministic byte-level outcome of laying out a [`TypeDescriptor`].
#[derive(Debug, Clone)]
pub struct ComputedLayout {
    pub size: u64,
    pub alignment: u64,
    pub shape: Shape,
}

impl ComputedLayout {
    /// The ordered members of a struct or union layout; empty for
    /// primitives and arrays.
    pub fn members(&self) -> &[Member] {
        match &self.shape {
            Shape::Struct(members) | Shape::Union(members) => members,
            Shape::Primitive(_) | Shape::Array { .. } => &[],
        }
    }

    /// Look up a member by its effective name. Errors with [`Error::NotFound`]
    /// if no field with that name exists at this level.
    pub fn find_field(&self, name: &str) -> Result<&FieldLayout> {
        self.members()
            .iter()
            .filter_map(|m| match m {
                Member::Field(f) if f.name == name => Some(f),
                _ => None,
            })
            .next()
            .ok_or_else(|| Error::not_found(name))
    }

    /// The element layout and count of an array shape.
    pub fn as_array(&self) -> Option<(&Rc<ComputedLayout>, u64)> {
        match &self.shape {
            Shape::Array { element, count } => Some((element, *count)),
            _ => None,
        }
    }

    /// True if this layout, at any depth, contains a union or an open-ended
    /// (unsized) array leaf. Such layouts can be described, but the bulk
    /// [`crate::access::Accessor::get`]/[`crate::access::Accessor::set`]
    /// codecs refuse them (see §4.A failure modes).
    pub fn has_unsupported_bulk_leaf(&self) -> bool {
        match &self.shape {
            Shape::Union(_) => true,
            Shape::Struct(members) => members.iter().any(|m| match m {
                Member::Field(f) => layout_of(&f.ty)
                    .map(|l| l.has_unsupported_bulk_leaf())
                    .unwrap_or(false),
                Member::Padding(_) => false,
            }),
            Shape::Array { element, count } => *count == 0 || element.has_unsupported_bulk_leaf(),
            Shape::Primitive(_) => false,
        }
    }
}

fn is_power_of_two(n: u64) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

/// Compute the byte-level layout of `desc`. See §4.A of the layout contract
/// for the struct-packing algorithm this function implements.
pub fn layout_of(desc: &TypeDescriptor) -> Result<ComputedLayout> {
    match desc {
        TypeDescriptor::Primitive(kind) => Ok(ComputedLayout {
            size: kind.default_width(),
            alignment: kind.default_alignment(),
            shape: Shape::Primitive(*kind),
        }),
        TypeDescriptor::Array { element, count } => {
            let element_layout = Rc::new(layout_of(element)?);
            Ok(ComputedLayout {
                size: element_layout.size * count,
                alignment: element_layout.alignment,
                shape: Shape::Array {
                    element: element_layout,
                    count: *count,
                },
            })
        }
        TypeDescriptor::Union { fields, .. } => layout_union(fields),
        TypeDescriptor::Struct { fields, opts } => {
            layout_struct(fields, opts.auto_padding, opts.end_padding)
        }
    }
}

fn layout_union(fields: &[FieldDescriptor]) -> Result<ComputedLayout> {
    let mut members = Vec::with_capacity(fields.len());
    let mut size = 0u64;
    let mut alignment = 1u64;
    for field in fields {
        if field.opts.byte_order != ByteOrder::default() && !is_primitive(&field.ty) {
            return Err(Error::invalid_layout(format!(
                "byte_order override on non-primitive field `{}`",
                field.name
            )));
        }
        let child = layout_of(&field.ty)?;
        let field_alignment = resolve_field_alignment(field, &child)?;
        alignment = alignment.max(field_alignment);
        size = size.max(child.size);
        members.push(Member::Field(FieldLayout {
            name: field.effective_name().to_string(),
            ty: Rc::clone(&field.ty),
            offset: 0,
            width: child.size,
            byte_order: field.opts.byte_order,
        }));
    }
    Ok(ComputedLayout {
        size,
        alignment,
        shape: Shape::Union(members),
    })
}

fn layout_struct(
    fields: &[FieldDescriptor],
    auto_padding: bool,
    end_padding: EndPadding,
) -> Result<ComputedLayout> {
    let mut members = Vec::with_capacity(fields.len());
    let mut offset = 0u64;
    let mut max_align = 1u64;

    for field in fields {
        if field.opts.byte_order != ByteOrder::default() && !is_primitive(&field.ty) {
            return Err(Error::invalid_layout(format!(
                "byte_order override on non-primitive field `{}`",
                field.name
            )));
        }
        let child = layout_of(&field.ty)?;
        let field_alignment = resolve_field_alignment(field, &child)?;
        max_align = max_align.max(field_alignment);

        let pad = match field.opts.padding_before {
            Some(explicit) => explicit,
            None if auto_padding => {
                (field_alignment - (offset % field_alignment)) % field_alignment
            }
            None => 0,
        };
        if pad > 0 {
            members.push(Member::Padding(pad));
            offset += pad;
        }

        members.push(Member::Field(FieldLayout {
            name: field.effective_name().to_string(),
            ty: Rc::clone(&field.ty),
            offset,
            width: child.size,
            byte_order: field.opts.byte_order,
        }));
        offset += child.size;
    }

    let size = match end_padding {
        EndPadding::Explicit(extra) => offset + extra,
        EndPadding::Auto if auto_padding => {
            let pad = (max_align - (offset % max_align)) % max_align;
            offset + pad
        }
        EndPadding::Auto => offset,
    };

    Ok(ComputedLayout {
        size,
        alignment: max_align,
        shape: Shape::Struct(members),
    })
}

fn resolve_field_alignment(field: &FieldDescriptor, child: &ComputedLayout) -> Result<u64> {
    match field.opts.alignment_override {
        Some(a) => {
            if !is_power_of_two(a) {
                return Err(Error::invalid_layout(format!(
                    "alignment_override for field `{}` is not a power of two: {}",
                    field.name, a
                )));
            }
            Ok(a)
        }
        None => Ok(child.alignment),
    }
}

fn is_primitive(ty: &TypeDescriptor) -> bool {
    matches!(ty, TypeDescriptor::Primitive(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldOpts, PrimitiveKind, StructBuilder, TypeDescriptor};

    fn prim(kind: PrimitiveKind) -> Rc<TypeDescriptor> {
        TypeDescriptor::primitive(kind)
    }

    fn offsets(layout: &ComputedLayout) -> Vec<u64> {
        layout
            .members()
            .iter()
            .filter_map(|m| match m {
                Member::Field(f) => Some(f.offset),
                Member::Padding(_) => None,
            })
            .collect()
    }

    #[test]
    fn point_i32_i32() {
        let desc = StructBuilder::new()
            .field("x", prim(PrimitiveKind::I32))
            .field("y", prim(PrimitiveKind::I32))
            .build();
        let layout = layout_of(&desc).unwrap();
        assert_eq!(layout.size, 8);
        assert_eq!(layout.alignment, 4);
        assert_eq!(offsets(&layout), vec![0, 4]);
    }

    #[test]
    fn pair_i8_i8() {
        let desc = StructBuilder::new()
            .field("a", prim(PrimitiveKind::I8))
            .field("b", prim(PrimitiveKind::I8))
            .build();
        let layout = layout_of(&desc).unwrap();
        assert_eq!(layout.size, 2);
        assert_eq!(layout.alignment, 1);
        assert_eq!(offsets(&layout), vec![0, 1]);
    }

    #[test]
    fn i16_then_i32() {
        let desc = StructBuilder::new()
            .field("a", prim(PrimitiveKind::I16))
            .field("b", prim(PrimitiveKind::I32))
            .build();
        let layout = layout_of(&desc).unwrap();
        assert_eq!(layout.size, 8);
        assert_eq!(offsets(&layout), vec![0, 4]);
    }

    #[test]
    fn i8_i16_i32() {
        let desc = StructBuilder::new()
            .field("a", prim(PrimitiveKind::I8))
            .field("b", prim(PrimitiveKind::I16))
            .field("c", prim(PrimitiveKind::I32))
            .build();
        let layout = layout_of(&desc).unwrap();
        assert_eq!(layout.size, 8);
        assert_eq!(offsets(&layout), vec![0, 2, 4]);
    }

    #[test]
    fn i8_i8_i32() {
        let desc = StructBuilder::new()
            .field("a", prim(PrimitiveKind::I8))
            .field("b", prim(PrimitiveKind::I8))
            .field("c", prim(PrimitiveKind::I32))
            .build();
        let layout = layout_of(&desc).unwrap();
        assert_eq!(layout.size, 8);
        assert_eq!(offsets(&layout), vec![0, 1, 4]);
    }

    #[test]
    fn i32_then_i8_tiles_as_array_element() {
        let desc = StructBuilder::new()
            .field("a", prim(PrimitiveKind::I32))
            .field("b", prim(PrimitiveKind::I8))
            .build();
        let layout = layout_of(&desc).unwrap();
        assert_eq!(layout.size, 8);
        assert_eq!(offsets(&layout), vec![0, 4]);
    }

    #[test]
    fn char16_i64_i32() {
        let desc = StructBuilder::new()
            .field("a", prim(PrimitiveKind::Char16))
            .field("b", prim(PrimitiveKind::I64))
            .field("c", prim(PrimitiveKind::I32))
            .build();
        let layout = layout_of(&desc).unwrap();
        assert_eq!(layout.size, 24);
        assert_eq!(offsets(&layout), vec![0, 8, 16]);
    }

    #[test]
    fn no_auto_padding_with_explicit_end_padding() {
        let desc = StructBuilder::new()
            .auto_padding(false)
            .end_padding(EndPadding::Explicit(3))
            .field("i", prim(PrimitiveKind::I32))
            .field("b", prim(PrimitiveKind::I8))
            .build();
        let layout = layout_of(&desc).unwrap();
        assert_eq!(layout.size, 8);
        assert_eq!(offsets(&layout), vec![0, 4]);
    }

    #[test]
    fn union_overlaps_all_fields_at_zero() {
        let desc = StructBuilder::union()
            .field("as_i32", prim(PrimitiveKind::I32))
            .field("as_i8", prim(PrimitiveKind::I8))
            .build();
        let layout = layout_of(&desc).unwrap();
        assert_eq!(layout.size, 4);
        assert_eq!(layout.alignment, 4);
        assert_eq!(offsets(&layout), vec![0, 0]);
    }

    #[test]
    fn byte_order_override_on_struct_field_fails() {
        let nested = StructBuilder::new()
            .field("x", prim(PrimitiveKind::I32))
            .build();
        let desc = StructBuilder::new().field_with_opts(
            "n",
            nested,
            FieldOpts {
                byte_order: ByteOrder::Big,
                ..Default::default()
            },
        ).build();
        assert!(matches!(layout_of(&desc), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn non_power_of_two_alignment_override_fails() {
        let desc = StructBuilder::new()
            .field_with_opts(
                "a",
                prim(PrimitiveKind::I8),
                FieldOpts {
                    alignment_override: Some(3),
                    ..Default::default()
                },
            )
            .build();
        assert!(matches!(layout_of(&desc), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn unsized_tail_array_is_flagged_unsupported_for_bulk_codec() {
        let desc = StructBuilder::new()
            .field("len", prim(PrimitiveKind::U32))
            .field("tail", TypeDescriptor::array(prim(PrimitiveKind::U8), 0))
            .build();
        let layout = layout_of(&desc).unwrap();
        assert!(layout.has_unsupported_bulk_leaf());
    }
}
