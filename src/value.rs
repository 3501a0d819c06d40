//! [`Value`]: the dynamic, in-memory form a decoded record takes.
//!
//! The layout engine and access engine are generic over *shape* (a
//! [`crate::descriptor::TypeDescriptor`]), not over a concrete Rust type — the
//! embedding host is expected to own the mapping from its own structs to that
//! shape. `Value` is the crate's canonical carrier for "one decoded record",
//! and [`Record`] is the trait a host type implements to plug itself in.

use std::rc::Rc;

use crate::descriptor::TypeDescriptor;
use crate::error::{Error, Result};

/// A decoded (or to-be-encoded) instance of some [`TypeDescriptor`] shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// A UTF-16 code unit.
    Char16(u16),
    /// Struct and union values share a representation: an ordered list of
    /// named members (order only matters for structs).
    Struct(Vec<(Rc<str>, Value)>),
    Array(Vec<Value>),
}

impl Value {
    pub fn field(&self, name: &str) -> Result<&Value> {
        match self {
            Value::Struct(members) => members
                .iter()
                .find(|(n, _)| &**n == name)
                .map(|(_, v)| v)
                .ok_or_else(|| Error::not_found(name)),
            _ => Err(Error::invalid_argument("value is not a struct or union")),
        }
    }

    pub fn elements(&self) -> Result<&[Value]> {
        match self {
            Value::Array(elements) => Ok(elements),
            _ => Err(Error::invalid_argument("value is not an array")),
        }
    }
}

/// Bridges a host-defined Rust type to the [`Value`] representation the
/// layout and access engine operate on.
///
/// The blanket [`impl Record for Value`] lets callers use `Accessor<Value>`
/// directly when there is no host type to bridge to — a fully dynamic mode.
pub trait Record: Sized {
    /// The shape this type is laid out as. Called once per `Accessor`
    /// construction; implementations are expected to cache the tree (see
    /// [`crate::define_struct!`]).
    fn type_descriptor() -> Rc<TypeDescriptor>;

    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self>;
}

impl Record for Value {
    fn type_descriptor() -> Rc<TypeDescriptor> {
        panic!(
            "Value has no fixed TypeDescriptor; construct Accessor::new(desc) directly instead \
             of via Accessor::<Value>::for_type()"
        )
    }

    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}
