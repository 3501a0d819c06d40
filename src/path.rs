//! The path parser: turns a compact path string into navigation steps, and
//! resolves those steps against a [`ComputedLayout`] into either a constant
//! byte offset or an indexable accessor handle.
//!
//! Grammar (§6, normative): `path := step+`, `step := "." ident | "[]"`,
//! `ident := [A-Za-z_][A-Za-z0-9_]*`.

use crate::descriptor::PrimitiveKind;
use crate::endianness::ByteOrder;
use crate::error::{Error, Result};
use crate::layout::{ComputedLayout, Shape};

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Field(String),
    Array,
}

/// Parse a path string into an ordered list of [`Step`]s.
///
/// # Examples
/// ```
/// use valuestore::path::{parse, Step};
///
/// assert_eq!(parse(".x.y").unwrap(), vec![Step::Field("x".into()), Step::Field("y".into())]);
/// assert_eq!(parse("[].v").unwrap(), vec![Step::Array, Step::Field("v".into())]);
/// assert_eq!(parse("[][].v").unwrap(), vec![Step::Array, Step::Array, Step::Field("v".into())]);
/// assert!(parse("x.y").is_err());
/// ```
pub fn parse(path: &str) -> Result<Vec<Step>> {
    let bytes = path.as_bytes();
    let mut steps = Vec::new();
    let mut i = 0;
    if bytes.is_empty() {
        return Err(parse_error(path, "path must contain at least one step"));
    }
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && is_ident_char(bytes[end], end == start) {
                    end += 1;
                }
                if end == start {
                    return Err(parse_error(path, "expected an identifier after `.`"));
                }
                steps.push(Step::Field(path[start..end].to_string()));
                i = end;
            }
            b'[' => {
                if bytes.get(i + 1) != Some(&b']') {
                    return Err(parse_error(path, "expected `[]` for an array step"));
                }
                steps.push(Step::Array);
                i += 2;
            }
            other => {
                return Err(parse_error(
                    path,
                    format!(
                        "unexpected character `{}`, expected `.` or `[]`",
                        other as char
                    ),
                ));
            }
        }
    }
    Ok(steps)
}

fn is_ident_char(b: u8, is_first: bool) -> bool {
    let alpha = b.is_ascii_alphabetic() || b == b'_';
    if is_first {
        alpha
    } else {
        alpha || b.is_ascii_digit()
    }
}

fn parse_error(path: &str, reason: impl Into<String>) -> Error {
    Error::ParseError {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// A path resolved against a [`ComputedLayout`]: a constant offset plus one
/// stride per [`Step::Array`] encountered along the walk, in order.
///
/// Resolution is a pure function of the layout and the path string;
/// `path → handle` may be memoized by callers without changing semantics.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    const_offset: u64,
    strides: Vec<u64>,
    primitive: PrimitiveKind,
    byte_order: ByteOrder,
}

impl ResolvedPath {
    /// The number of runtime indices (one per `[]` step) this path needs.
    pub fn arity(&self) -> usize {
        self.strides.len()
    }

    pub fn primitive(&self) -> PrimitiveKind {
        self.primitive
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Compute the final byte offset given one index per array step.
    pub fn offset(&self, indices: &[u64]) -> Result<u64> {
        if indices.len() != self.strides.len() {
            return Err(Error::invalid_argument(format!(
                "path expects {} indices, got {}",
                self.strides.len(),
                indices.len()
            )));
        }
        let mut offset = self.const_offset;
        for (index, stride) in indices.iter().zip(&self.strides) {
            offset += index * stride;
        }
        Ok(offset)
    }
}

struct Walked {
    layout: ComputedLayout,
    const_offset: u64,
    strides: Vec<u64>,
    byte_order: ByteOrder,
}

fn walk(root: &ComputedLayout, steps: &[Step]) -> Result<Walked> {
    let mut layout = root.clone();
    let mut const_offset = 0u64;
    let mut strides = Vec::new();
    let mut byte_order = ByteOrder::default();

    for step in steps {
        match step {
            Step::Field(name) => {
                let field = layout.find_field(name)?.clone();
                const_offset += field.offset;
                byte_order = field.byte_order;
                layout = crate::layout::layout_of(&field.ty)?;
            }
            Step::Array => {
                let (element, _count) = layout
                    .as_array()
                    .ok_or_else(|| Error::invalid_argument("`[]` step on a non-array layout"))?;
                strides.push(element.size);
                layout = (**element).clone();
            }
        }
    }

    Ok(Walked {
        layout,
        const_offset,
        strides,
        byte_order,
    })
}

/// Resolve `steps` against `root`, requiring the final step to land on a
/// primitive leaf (needed for [`crate::access::TypedFieldAccessor`]).
pub fn resolve_typed(root: &ComputedLayout, steps: &[Step]) -> Result<ResolvedPath> {
    let walked = walk(root, steps)?;
    match walked.layout.shape {
        Shape::Primitive(kind) => Ok(ResolvedPath {
            const_offset: walked.const_offset,
            strides: walked.strides,
            primitive: kind,
            byte_order: walked.byte_order,
        }),
        _ => Err(Error::invalid_argument(
            "path does not resolve to a primitive field",
        )),
    }
}

/// Resolve `steps` against `root`, returning only the offset contributions;
/// the final step may land on any shape (used by `byte_offset`).
pub fn resolve_offset(root: &ComputedLayout, steps: &[Step]) -> Result<(u64, Vec<u64>)> {
    let walked = walk(root, steps)?;
    Ok((walked.const_offset, walked.strides))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_field_path() {
        assert_eq!(
            parse(".x.y").unwrap(),
            vec![Step::Field("x".into()), Step::Field("y".into())]
        );
    }

    #[test]
    fn single_array_step() {
        assert_eq!(
            parse("[].v").unwrap(),
            vec![Step::Array, Step::Field("v".into())]
        );
    }

    #[test]
    fn nested_array_steps() {
        assert_eq!(
            parse("[][].v").unwrap(),
            vec![Step::Array, Step::Array, Step::Field("v".into())]
        );
    }

    #[test]
    fn missing_leading_dot_or_bracket_is_a_parse_error() {
        assert!(parse("x.y").is_err());
        assert!(parse("").is_err());
    }
}
