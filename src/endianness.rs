//! Byte order used when a primitive field is encoded into a buffer.
//!
//! Unlike compile-time layout macros that bake the byte order into a marker type
//! the layout is built for, this crate resolves byte order at layout-computation
//! time: it is a per-field option (see [`crate::descriptor::FieldOpts`]) rather
//! than a property of an entire container.

/// The byte order a primitive field is encoded with.
///
/// `Native` defers to the host's byte order; it is the default for a field that
/// does not specify an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Native,
    Little,
    Big,
}

impl ByteOrder {
    /// Resolve `Native` to the concrete direction the host CPU actually uses.
    pub fn resolved(self) -> ResolvedByteOrder {
        match self {
            ByteOrder::Native => {
                if cfg!(target_endian = "big") {
                    ResolvedByteOrder::Big
                } else {
                    ResolvedByteOrder::Little
                }
            }
            ByteOrder::Little => ResolvedByteOrder::Little,
            ByteOrder::Big => ResolvedByteOrder::Big,
        }
    }
}

/// A byte order with `Native` already resolved to a concrete direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedByteOrder {
    Little,
    Big,
}
