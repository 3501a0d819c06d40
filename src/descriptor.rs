//! The abstract, immutable description of a composite value.
//!
//! A [`TypeDescriptor`] is produced by the embedding host's own
//! reflection mechanism (out of scope for this crate, see the crate-level
//! docs) and handed to [`crate::layout::layout_of`] to compute a byte-level
//! layout, and to [`crate::access::Accessor::new`] to build codecs over it.
//! `TypeDescriptor`, [`FieldDescriptor`] and friends are plain trees: building
//! one does not touch any buffer or allocator.

use std::rc::Rc;

/// The eight integer kinds, two float kinds, `bool` and `char16` a
/// [`TypeDescriptor::Primitive`] leaf can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// A UTF-16 code unit, stored as an unsigned 16-bit integer.
    Char16,
}

impl PrimitiveKind {
    /// The default width in bytes, per §6 of the layout contract.
    pub const fn default_width(self) -> u64 {
        match self {
            PrimitiveKind::Bool | PrimitiveKind::I8 | PrimitiveKind::U8 => 1,
            PrimitiveKind::I16 | PrimitiveKind::U16 | PrimitiveKind::Char16 => 2,
            PrimitiveKind::I32 | PrimitiveKind::U32 | PrimitiveKind::F32 => 4,
            PrimitiveKind::I64 | PrimitiveKind::U64 | PrimitiveKind::F64 => 8,
        }
    }

    /// The default alignment, which always equals the width for primitives.
    pub const fn default_alignment(self) -> u64 {
        self.default_width()
    }
}

/// Whether a composite descriptor lays its fields out overlapping (`Union`)
/// or sequentially with padding (`Struct`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Struct,
    Union,
}

/// How much padding follows the last field of a top-level struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndPadding {
    /// Pad to a multiple of the struct's alignment, so the layout tiles as an
    /// array element.
    Auto,
    /// Add exactly this many bytes (`0` means "no end padding at all").
    Explicit(u64),
}

impl Default for EndPadding {
    fn default() -> Self {
        EndPadding::Auto
    }
}

/// Layout-wide options attached to a [`TypeDescriptor::Struct`] or
/// [`TypeDescriptor::Union`].
#[derive(Debug, Clone, Copy)]
pub struct LayoutOpts {
    pub kind: LayoutKind,
    /// Whether the layout engine inserts padding to satisfy alignment.
    /// Ignored for unions, which never pad.
    pub auto_padding: bool,
    /// Only meaningful for a struct at the outermost level.
    pub end_padding: EndPadding,
}

impl Default for LayoutOpts {
    fn default() -> Self {
        Self {
            kind: LayoutKind::Struct,
            auto_padding: true,
            end_padding: EndPadding::Auto,
        }
    }
}

impl LayoutOpts {
    pub fn union() -> Self {
        Self {
            kind: LayoutKind::Union,
            auto_padding: false,
            end_padding: EndPadding::Explicit(0),
        }
    }
}

/// Per-field overrides layered on top of the layout engine's defaults.
#[derive(Debug, Clone, Default)]
pub struct FieldOpts {
    /// Rename the member in the computed layout without changing the
    /// declaration name used to look the field up in source form.
    pub name_override: Option<String>,
    /// Must be a power of two; overrides the child type's natural alignment.
    pub alignment_override: Option<u64>,
    /// Explicit padding immediately preceding this field, in bytes.
    pub padding_before: Option<u64>,
    /// Valid only on primitive fields.
    pub byte_order: crate::endianness::ByteOrder,
}

/// One named, typed member of a [`TypeDescriptor::Struct`] or
/// [`TypeDescriptor::Union`], in declaration order.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: Rc<TypeDescriptor>,
    pub opts: FieldOpts,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, ty: Rc<TypeDescriptor>) -> Self {
        Self {
            name: name.into(),
            ty,
            opts: FieldOpts::default(),
        }
    }

    pub fn with_opts(name: impl Into<String>, ty: Rc<TypeDescriptor>, opts: FieldOpts) -> Self {
        Self {
            name: name.into(),
            ty,
            opts,
        }
    }

    /// The name this field is addressed by in path strings and computed
    /// layouts: `opts.name_override` if set, else `name`.
    pub fn effective_name(&self) -> &str {
        self.opts.name_override.as_deref().unwrap_or(&self.name)
    }
}

/// A recursive, immutable description of a composite value's shape.
///
/// `TypeDescriptor` trees are cheap to share: clone the `Rc` rather than the
/// tree. The same tree is typically built once per (lookup-scope, type) pair
/// and cached (see [`crate::define_struct!`]).
#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    Primitive(PrimitiveKind),
    Struct {
        fields: Vec<FieldDescriptor>,
        opts: LayoutOpts,
    },
    Union {
        fields: Vec<FieldDescriptor>,
        opts: LayoutOpts,
    },
    /// `count == 0` denotes an unsized tail array: it may only appear as the
    /// last field of an outermost struct and matches "whatever is left".
    Array {
        element: Rc<TypeDescriptor>,
        count: u64,
    },
}

impl TypeDescriptor {
    pub fn primitive(kind: PrimitiveKind) -> Rc<Self> {
        Rc::new(TypeDescriptor::Primitive(kind))
    }

    pub fn array(element: Rc<TypeDescriptor>, count: u64) -> Rc<Self> {
        Rc::new(TypeDescriptor::Array { element, count })
    }

    pub fn is_union(&self) -> bool {
        matches!(self, TypeDescriptor::Union { .. })
    }
}

/// Builds a [`TypeDescriptor::Struct`] (or, via [`StructBuilder::union`], a
/// [`TypeDescriptor::Union`]) one field at a time.
///
/// # Example
/// ```
/// use valuestore::descriptor::{StructBuilder, TypeDescriptor, PrimitiveKind};
///
/// let point = StructBuilder::new()
///     .field("x", TypeDescriptor::primitive(PrimitiveKind::I32))
///     .field("y", TypeDescriptor::primitive(PrimitiveKind::I32))
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct StructBuilder {
    fields: Vec<FieldDescriptor>,
    opts: LayoutOpts,
}

impl StructBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn union() -> Self {
        Self {
            fields: Vec::new(),
            opts: LayoutOpts::union(),
        }
    }

    pub fn auto_padding(mut self, value: bool) -> Self {
        self.opts.auto_padding = value;
        self
    }

    pub fn end_padding(mut self, value: EndPadding) -> Self {
        self.opts.end_padding = value;
        self
    }

    pub fn field(mut self, name: impl Into<String>, ty: Rc<TypeDescriptor>) -> Self {
        self.fields.push(FieldDescriptor::new(name, ty));
        self
    }

    pub fn field_with_opts(
        mut self,
        name: impl Into<String>,
        ty: Rc<TypeDescriptor>,
        opts: FieldOpts,
    ) -> Self {
        self.fields.push(FieldDescriptor::with_opts(name, ty, opts));
        self
    }

    pub fn build(self) -> Rc<TypeDescriptor> {
        Rc::new(match self.opts.kind {
            LayoutKind::Struct => TypeDescriptor::Struct {
                fields: self.fields,
                opts: self.opts,
            },
            LayoutKind::Union => TypeDescriptor::Union {
                fields: self.fields,
                opts: self.opts,
            },
        })
    }
}
