//! Scalar values and the C types they bind to.
//!
//! These types are pure data: conversion rules live here so both sides of the
//! process boundary derive identical bound values from identical inputs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// C scalar type named by a function signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    SizeT,
    SSizeT,
    Float,
    Double,
    CharPtr,
    VoidPtr,
    FunctionPointer,
}

/// How a value of a given type travels through the calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    Integer,
    Float,
}

const C_NAMES: &[(TypeTag, &[&str])] = &[
    (TypeTag::Bool, &["_Bool", "bool"]),
    (TypeTag::Char, &["char", "signed char"]),
    (TypeTag::UChar, &["unsigned char"]),
    (TypeTag::Short, &["short", "short int", "signed short"]),
    (TypeTag::UShort, &["unsigned short", "unsigned short int"]),
    (TypeTag::Int, &["int", "signed", "signed int"]),
    (TypeTag::UInt, &["unsigned int", "unsigned"]),
    (TypeTag::Long, &["long", "long int", "signed long"]),
    (TypeTag::ULong, &["unsigned long", "unsigned long int"]),
    (TypeTag::LongLong, &["long long", "long long int"]),
    (
        TypeTag::ULongLong,
        &["unsigned long long", "unsigned long long int"],
    ),
    (TypeTag::Int8, &["int8_t"]),
    (TypeTag::Int16, &["int16_t"]),
    (TypeTag::Int32, &["int32_t"]),
    (TypeTag::Int64, &["int64_t"]),
    (TypeTag::UInt8, &["uint8_t"]),
    (TypeTag::UInt16, &["uint16_t"]),
    (TypeTag::UInt32, &["uint32_t"]),
    (TypeTag::UInt64, &["uint64_t"]),
    (TypeTag::SizeT, &["size_t"]),
    (TypeTag::SSizeT, &["ssize_t"]),
    (TypeTag::Float, &["float"]),
    (TypeTag::Double, &["double"]),
    (TypeTag::CharPtr, &["char*", "const char*"]),
    (TypeTag::VoidPtr, &["void*", "const void*"]),
    (TypeTag::FunctionPointer, &["funcptr"]),
];

impl TypeTag {
    /// Map a C spelling (whitespace-insensitive around `*`) to a tag.
    pub fn from_c_name(name: &str) -> Option<TypeTag> {
        let normalized = normalize_c_name(name);
        C_NAMES
            .iter()
            .find(|(_, names)| names.contains(&normalized.as_str()))
            .map(|(tag, _)| *tag)
    }

    /// Canonical C spelling, used in error messages.
    pub fn c_name(self) -> &'static str {
        C_NAMES
            .iter()
            .find(|(tag, _)| *tag == self)
            .map(|(_, names)| names[0])
            .unwrap_or("?")
    }

    pub fn register_class(self) -> RegisterClass {
        match self {
            TypeTag::Float | TypeTag::Double => RegisterClass::Float,
            _ => RegisterClass::Integer,
        }
    }

    /// Width in bits and signedness for integer-like tags, `None` otherwise.
    ///
    /// Widths follow the LP64 data model.
    pub fn integer_layout(self) -> Option<(u32, bool)> {
        let layout = match self {
            TypeTag::Bool | TypeTag::UChar | TypeTag::UInt8 => (8, false),
            TypeTag::Char | TypeTag::Int8 => (8, true),
            TypeTag::Short | TypeTag::Int16 => (16, true),
            TypeTag::UShort | TypeTag::UInt16 => (16, false),
            TypeTag::Int | TypeTag::Int32 => (32, true),
            TypeTag::UInt | TypeTag::UInt32 => (32, false),
            TypeTag::Long | TypeTag::LongLong | TypeTag::Int64 | TypeTag::SSizeT => (64, true),
            TypeTag::ULong | TypeTag::ULongLong | TypeTag::UInt64 | TypeTag::SizeT => (64, false),
            _ => return None,
        };
        Some(layout)
    }

    /// Convert a caller-supplied scalar into a value of this type.
    ///
    /// Returns `None` when the value cannot be narrowed without loss; the
    /// binder turns that into an `IncorrectArgumentType` error.
    pub fn coerce(self, value: &Scalar) -> Option<BoundValue> {
        match self {
            TypeTag::Bool => coerce_bool(value).map(|b| BoundValue::Unsigned {
                tag: self,
                value: u64::from(b),
            }),
            TypeTag::Float => value.as_f64().map(|v| BoundValue::Float(v as f32)),
            TypeTag::Double => value.as_f64().map(BoundValue::Double),
            TypeTag::CharPtr => match value {
                Scalar::Str(text) if !text.contains('\0') => Some(BoundValue::Text(text.clone())),
                _ => None,
            },
            TypeTag::VoidPtr => value
                .as_i128()
                .and_then(|v| u64::try_from(v).ok())
                .map(BoundValue::Address),
            TypeTag::FunctionPointer => match value {
                Scalar::Str(symbol) if is_symbol_name(symbol) => {
                    Some(BoundValue::Function(symbol.clone()))
                }
                _ => None,
            },
            _ => {
                let (bits, signed) = self.integer_layout()?;
                let wide = value.as_i128()?;
                if signed {
                    let min = -(1i128 << (bits - 1));
                    let max = (1i128 << (bits - 1)) - 1;
                    (min..=max).contains(&wide).then(|| BoundValue::Signed {
                        tag: self,
                        value: wide as i64,
                    })
                } else {
                    let max = if bits == 64 {
                        i128::from(u64::MAX)
                    } else {
                        (1i128 << bits) - 1
                    };
                    (0..=max).contains(&wide).then(|| BoundValue::Unsigned {
                        tag: self,
                        value: wide as u64,
                    })
                }
            }
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

fn normalize_c_name(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.replace(" *", "*")
}

fn is_symbol_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn coerce_bool(value: &Scalar) -> Option<bool> {
    match value {
        Scalar::Bool(b) => Some(*b),
        Scalar::Int(0) | Scalar::UInt(0) => Some(false),
        Scalar::Int(1) | Scalar::UInt(1) => Some(true),
        Scalar::Str(text) => match text.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A caller-supplied scalar: an argument or run-option value.
///
/// Equality is numeric between `Int` and `UInt`, so a value that went through
/// an unsigned parameter still compares equal to the signed literal it came from.
/// NaN equals NaN, so a descriptor carrying one still matches its own result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(#[serde(with = "float_wire")] f64),
    Str(String),
}

/// JSON has no infinities or NaN, so those travel as `{"float": "inf"}`,
/// `{"float": "-inf"}` or `{"float": "nan"}`. Finite values stay plain numbers.
mod float_wire {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    struct Special {
        float: &'static str,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Finite(f64),
        Special { float: String },
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        let special = if value.is_nan() {
            "nan"
        } else if *value == f64::INFINITY {
            "inf"
        } else if *value == f64::NEG_INFINITY {
            "-inf"
        } else {
            return serializer.serialize_f64(*value);
        };
        Special { float: special }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Wire::deserialize(deserializer)? {
            Wire::Finite(value) => Ok(value),
            Wire::Special { float } => match float.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(D::Error::custom(format!("unknown float value '{other}'"))),
            },
        }
    }
}

impl Scalar {
    /// Integer view of this scalar, accepting integral floats and numeric strings.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Scalar::Bool(b) => Some(i128::from(*b)),
            Scalar::Int(v) => Some(i128::from(*v)),
            Scalar::UInt(v) => Some(i128::from(*v)),
            Scalar::Float(v) if v.fract() == 0.0 && v.is_finite() && v.abs() < 1.7e38 => {
                Some(*v as i128)
            }
            Scalar::Float(_) => None,
            Scalar::Str(text) => text.trim().parse::<i128>().ok(),
        }
    }

    /// Floating view of this scalar, accepting integers and numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Bool(_) => None,
            Scalar::Int(v) => Some(*v as f64),
            Scalar::UInt(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Str(text) => text.trim().parse::<f64>().ok(),
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Int(_) | Scalar::UInt(_), Scalar::Int(_) | Scalar::UInt(_)) => {
                self.as_i128() == other.as_i128()
            }
            (Scalar::Float(a), Scalar::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Scalar::Str(a), Scalar::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::UInt(v) => write!(f, "{v}"),
            Scalar::Float(v) => write_float(f, *v),
            Scalar::Str(text) => f.write_str(text),
        }
    }
}

/// Shortest round-trip digits, switching to `1e+308` style outside
/// `1e-4 <= |v| < 1e16`. Integral values keep a trailing `.0`.
fn write_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_nan() {
        return f.write_str("nan");
    }
    if v.is_infinite() {
        return f.write_str(if v > 0.0 { "inf" } else { "-inf" });
    }
    let scientific = format!("{v:e}");
    let Some((mantissa, exponent)) = scientific
        .split_once('e')
        .and_then(|(m, e)| Some((m, e.parse::<i32>().ok()?)))
    else {
        return write!(f, "{v}");
    };
    if (-4..16).contains(&exponent) {
        let fixed = v.to_string();
        if fixed.contains('.') {
            f.write_str(&fixed)
        } else {
            write!(f, "{fixed}.0")
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        write!(f, "{mantissa}e{sign}{:02}", exponent.abs())
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(i64::from(value))
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::UInt(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

/// A scalar converted to a parameter's declared type, in calling order.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Signed { tag: TypeTag, value: i64 },
    Unsigned { tag: TypeTag, value: u64 },
    Float(f32),
    Double(f64),
    Text(String),
    Address(u64),
    /// Name of a symbol in the same library, resolved just before the call.
    Function(String),
}

impl BoundValue {
    pub fn tag(&self) -> TypeTag {
        match self {
            BoundValue::Signed { tag, .. } | BoundValue::Unsigned { tag, .. } => *tag,
            BoundValue::Float(_) => TypeTag::Float,
            BoundValue::Double(_) => TypeTag::Double,
            BoundValue::Text(_) => TypeTag::CharPtr,
            BoundValue::Address(_) => TypeTag::VoidPtr,
            BoundValue::Function(_) => TypeTag::FunctionPointer,
        }
    }

    /// The scalar this value reads back as.
    pub fn to_scalar(&self) -> Scalar {
        match self {
            BoundValue::Unsigned {
                tag: TypeTag::Bool,
                value,
            } => Scalar::Bool(*value != 0),
            BoundValue::Signed { value, .. } => Scalar::Int(*value),
            BoundValue::Unsigned { value, .. } => Scalar::UInt(*value),
            BoundValue::Float(v) => Scalar::Float(f64::from(*v)),
            BoundValue::Double(v) => Scalar::Float(*v),
            BoundValue::Text(text) | BoundValue::Function(text) => Scalar::Str(text.clone()),
            BoundValue::Address(address) => Scalar::UInt(*address),
        }
    }
}

impl fmt::Display for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_scalar())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_names_resolve_regardless_of_spacing() {
        assert_eq!(
            TypeTag::from_c_name("unsigned   long int"),
            Some(TypeTag::ULong)
        );
        assert_eq!(TypeTag::from_c_name("char *"), Some(TypeTag::CharPtr));
        assert_eq!(TypeTag::from_c_name("const char *"), Some(TypeTag::CharPtr));
        assert_eq!(TypeTag::from_c_name("struct foo"), None);
    }

    #[test]
    fn integers_accept_numeric_looking_values() {
        assert_eq!(
            TypeTag::Int.coerce(&Scalar::from("42")),
            Some(BoundValue::Signed {
                tag: TypeTag::Int,
                value: 42
            })
        );
        assert_eq!(
            TypeTag::Int.coerce(&Scalar::Float(3.0)),
            Some(BoundValue::Signed {
                tag: TypeTag::Int,
                value: 3
            })
        );
        assert_eq!(TypeTag::Int.coerce(&Scalar::Float(3.5)), None);
        assert_eq!(TypeTag::Int.coerce(&Scalar::from("aoeu")), None);
    }

    #[test]
    fn integers_reject_out_of_range_values() {
        assert_eq!(TypeTag::UChar.coerce(&Scalar::Int(256)), None);
        assert_eq!(TypeTag::UInt.coerce(&Scalar::Int(-1)), None);
        assert_eq!(TypeTag::Int.coerce(&Scalar::Int(i64::from(i32::MAX) + 1)), None);
        assert!(TypeTag::UInt64.coerce(&Scalar::UInt(u64::MAX)).is_some());
        assert!(TypeTag::Int64.coerce(&Scalar::Int(i64::MIN)).is_some());
    }

    #[test]
    fn floats_accept_integers_but_not_words() {
        assert_eq!(
            TypeTag::Double.coerce(&Scalar::Int(2)),
            Some(BoundValue::Double(2.0))
        );
        assert_eq!(
            TypeTag::Float.coerce(&Scalar::from("1.5")),
            Some(BoundValue::Float(1.5))
        );
        assert_eq!(TypeTag::Float.coerce(&Scalar::from("one")), None);
        assert_eq!(TypeTag::Double.coerce(&Scalar::Bool(true)), None);
    }

    #[test]
    fn function_pointers_need_symbol_names() {
        assert_eq!(
            TypeTag::FunctionPointer.coerce(&Scalar::from("double_it")),
            Some(BoundValue::Function("double_it".to_string()))
        );
        assert_eq!(TypeTag::FunctionPointer.coerce(&Scalar::from("1abc")), None);
        assert_eq!(TypeTag::FunctionPointer.coerce(&Scalar::Int(4)), None);
    }

    #[test]
    fn bound_values_read_back_as_their_scalar() {
        let value = TypeTag::Bool.coerce(&Scalar::Int(1)).expect("bool");
        assert_eq!(value.to_scalar(), Scalar::Bool(true));
        let value = TypeTag::ULong.coerce(&Scalar::Int(7)).expect("ulong");
        assert_eq!(value.to_scalar(), Scalar::Int(7));
        assert_ne!(Scalar::Int(7), Scalar::from("7"));
    }

    #[test]
    fn nan_equals_nan() {
        assert_eq!(Scalar::Float(f64::NAN), Scalar::Float(f64::NAN));
        assert_ne!(Scalar::Float(f64::NAN), Scalar::Float(1.0));
        assert_eq!(Scalar::Float(f64::INFINITY), Scalar::Float(f64::INFINITY));
        assert_ne!(Scalar::Float(f64::INFINITY), Scalar::Float(f64::NEG_INFINITY));
    }

    #[test]
    fn floats_render_with_a_fraction_or_exponent() {
        let rendered = [
            2.0,
            1.5,
            -0.25,
            1e15,
            1e16,
            1e308,
            1.5e-7,
            0.0001,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NAN,
        ]
        .map(|v| Scalar::Float(v).to_string());
        assert_eq!(
            rendered,
            [
                "2.0",
                "1.5",
                "-0.25",
                "1000000000000000.0",
                "1e+16",
                "1e+308",
                "1.5e-07",
                "0.0001",
                "inf",
                "-inf",
                "nan",
            ]
        );
    }

    #[test]
    fn non_finite_floats_survive_json() {
        let values = vec![
            Scalar::Float(f64::INFINITY),
            Scalar::Float(f64::NEG_INFINITY),
            Scalar::Float(f64::NAN),
            Scalar::Float(0.5),
        ];
        let text = serde_json::to_string(&values).expect("serialize");
        assert_eq!(
            text,
            r#"[{"float":"inf"},{"float":"-inf"},{"float":"nan"},0.5]"#
        );
        let back: Vec<Scalar> = serde_json::from_str(&text).expect("parse");
        assert_eq!(back, values);
        assert!(matches!(back[2], Scalar::Float(v) if v.is_nan()));

        let err = serde_json::from_str::<Scalar>(r#"{"float":"huge"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn scalars_deserialize_untagged() {
        let values: Vec<Scalar> =
            serde_json::from_str(r#"[true, -1, 18446744073709551615, 1.5, "x"]"#).expect("parse");
        assert_eq!(
            values,
            vec![
                Scalar::Bool(true),
                Scalar::Int(-1),
                Scalar::UInt(u64::MAX),
                Scalar::Float(1.5),
                Scalar::from("x"),
            ]
        );
    }
}
