//! Value-type tags and module valtype configuration.
//!
//! Every runtime value travels as a pair *(payload : valtype, tag : i32)*.
//! Tags below [`INTERNAL_TYPE_BASE`] are language-visible (they drive
//! `typeof`); tags at and above it are internal representations.  New tags
//! must stay within their partition to keep `typeof` lowering coherent.

use serde::Serialize;

/// A runtime type tag, carried as an `i32` alongside every payload.
pub type TypeTag = i32;

pub const TYPE_NUMBER: TypeTag = 0x00;
pub const TYPE_BOOLEAN: TypeTag = 0x01;
pub const TYPE_STRING: TypeTag = 0x02;
pub const TYPE_UNDEFINED: TypeTag = 0x03;
pub const TYPE_OBJECT: TypeTag = 0x04;
pub const TYPE_FUNCTION: TypeTag = 0x05;
pub const TYPE_SYMBOL: TypeTag = 0x06;
pub const TYPE_BIGINT: TypeTag = 0x07;

/// First internal (not language-visible) tag.
pub const INTERNAL_TYPE_BASE: TypeTag = 0x10;

pub const TYPE_ARRAY: TypeTag = 0x10;
pub const TYPE_REGEXP: TypeTag = 0x11;

/// Every known tag, visible first, in ascending order.
pub const ALL_TYPES: &[TypeTag] = &[
    TYPE_NUMBER,
    TYPE_BOOLEAN,
    TYPE_STRING,
    TYPE_UNDEFINED,
    TYPE_OBJECT,
    TYPE_FUNCTION,
    TYPE_SYMBOL,
    TYPE_BIGINT,
    TYPE_ARRAY,
    TYPE_REGEXP,
];

/// The distinguished `undefined` payload (type tag `undefined`).
pub const UNDEFINED: f64 = 0.0;
/// The distinguished `null` payload (type tag `object`).
pub const NULL: f64 = 0.0;

/// Registry display name of a tag.
pub fn type_name(tag: TypeTag) -> &'static str {
    match tag {
        TYPE_NUMBER => "number",
        TYPE_BOOLEAN => "boolean",
        TYPE_STRING => "string",
        TYPE_UNDEFINED => "undefined",
        TYPE_OBJECT => "object",
        TYPE_FUNCTION => "function",
        TYPE_SYMBOL => "symbol",
        TYPE_BIGINT => "bigint",
        TYPE_ARRAY => "_array",
        TYPE_REGEXP => "_regexp",
        _ => "unknown",
    }
}

/// The string `typeof` evaluates to for a value of this tag.
///
/// Internal tags collapse to `"object"`.
pub fn typeof_name(tag: TypeTag) -> &'static str {
    if tag >= INTERNAL_TYPE_BASE {
        return "object";
    }
    type_name(tag)
}

/// The module-wide primitive representation of numeric payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Valtype {
    I32,
    I64,
    F64,
}

impl Valtype {
    /// Byte size of one payload of this valtype.
    pub fn size(self) -> u32 {
        match self {
            Valtype::I32 => 4,
            Valtype::I64 | Valtype::F64 => 8,
        }
    }

    /// Parse a flag value (`i32`, `i64`, `f64`).
    pub fn parse(s: &str) -> Option<Valtype> {
        match s {
            "i32" => Some(Valtype::I32),
            "i64" => Some(Valtype::I64),
            "f64" => Some(Valtype::F64),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Valtype::I32 => "i32",
            Valtype::I64 => "i64",
            Valtype::F64 => "f64",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_and_internal_partitions() {
        assert!(TYPE_BIGINT < INTERNAL_TYPE_BASE);
        assert!(TYPE_ARRAY >= INTERNAL_TYPE_BASE);
        assert_eq!(typeof_name(TYPE_ARRAY), "object");
        assert_eq!(typeof_name(TYPE_REGEXP), "object");
        assert_eq!(typeof_name(TYPE_FUNCTION), "function");
    }

    #[test]
    fn display_names() {
        assert_eq!(type_name(TYPE_ARRAY), "_array");
        assert_eq!(type_name(TYPE_NUMBER), "number");
    }

    #[test]
    fn valtype_sizes() {
        assert_eq!(Valtype::I32.size(), 4);
        assert_eq!(Valtype::I64.size(), 8);
        assert_eq!(Valtype::F64.size(), 8);
        assert_eq!(Valtype::parse("f64"), Some(Valtype::F64));
        assert_eq!(Valtype::parse("f32"), None);
    }
}
