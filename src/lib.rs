//! `valuestore` projects user-defined composite value types onto raw,
//! un-managed memory buffers, and builds two value-specialized container
//! data structures — a growable sequence and an open-addressed map — whose
//! elements live contiguously in those buffers instead of as references to
//! heap objects.
//!
//! Three tightly coupled subsystems do the work:
//! - the [`layout`] engine computes a deterministic, C-compatible byte-level
//!   layout (offsets, padding, size, alignment) from a [`descriptor::TypeDescriptor`];
//! - the [`access`] engine binds a layout to a buffer, offering primitive
//!   field accessors, path-based addressing (see [`path`]), and bulk
//!   record ↔ [`value::Value`] codecs;
//! - [`sequence::SpecializedSequence`] and [`map::SpecializedMap`] store
//!   their elements as bytes in a single contiguous [`alloc::Buffer`],
//!   obtained from a pluggable [`alloc::Allocator`].
//!
//! # Example
//! ```
//! use std::rc::Rc;
//! use once_cell::unsync::Lazy;
//! use valuestore::access::Accessor;
//! use valuestore::alloc::GlobalAllocator;
//! use valuestore::descriptor::{PrimitiveKind, StructBuilder, TypeDescriptor};
//! use valuestore::value::Value;
//!
//! // The embedding host builds a `TypeDescriptor` once per type and reuses
//! // it; a thread-local `Lazy` is a convenient way to pay that cost exactly
//! // once (`TypeDescriptor` trees are `Rc`-based and so, like `Accessor`
//! // itself, are not `Sync` — a thread-local rather than a process-wide
//! // static is the right shape for caching them).
//! thread_local! {
//!     static POINT: Lazy<Rc<TypeDescriptor>> = Lazy::new(|| {
//!         StructBuilder::new()
//!             .field("x", TypeDescriptor::primitive(PrimitiveKind::I32))
//!             .field("y", TypeDescriptor::primitive(PrimitiveKind::I32))
//!             .build()
//!     });
//! }
//!
//! let descriptor = POINT.with(|p| Rc::clone(&**p));
//! let accessor: Accessor<Value> = Accessor::new(descriptor).unwrap();
//! let buf = accessor
//!     .new_value_with(
//!         &GlobalAllocator,
//!         &Value::Struct(vec![(Rc::from("x"), Value::I32(1)), (Rc::from("y"), Value::I32(2))]),
//!     )
//!     .unwrap();
//! assert_eq!(accessor.byte_offset(".y").unwrap(), 4);
//! ```
//!
//! What this crate does not do: it has no opinion on where a
//! [`descriptor::TypeDescriptor`] comes from — the embedding host's own
//! reflection mechanism is expected to build one, typically once per type and
//! cached the way the example above does, since [`access::Accessor`]
//! construction is eager and meant to be amortized over many operations, not
//! repeated per call.

#![warn(missing_docs)]

pub mod access;
pub mod alloc;
pub mod descriptor;
pub mod endianness;
pub mod error;
pub mod layout;
pub mod map;
pub mod path;
pub mod sequence;
pub mod value;

/// Re-exports covering the common path through the crate: build a
/// descriptor, get its layout, bind an accessor, allocate.
pub mod prelude {
    pub use crate::access::Accessor;
    pub use crate::alloc::{Allocator, ArenaAllocator, Buffer, GlobalAllocator, SlicingAllocator};
    pub use crate::descriptor::{FieldOpts, LayoutOpts, PrimitiveKind, StructBuilder, TypeDescriptor};
    pub use crate::endianness::ByteOrder;
    pub use crate::error::{Error, Result};
    pub use crate::layout::{layout_of, ComputedLayout};
    pub use crate::map::SpecializedMap;
    pub use crate::sequence::SpecializedSequence;
    pub use crate::value::{Record, Value};
}
