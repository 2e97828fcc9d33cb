//! Runtime type expressions for field type assertions.
//!
//! A [`TypeExpr`] describes what the JSON payload of a field must look like.
//! Every [`crate::Loadable`] type reports its own expression, so a record field
//! of type `Option<Vec<i32>>` checks against `Optional[list[int]]` without any
//! annotation from the user.

use std::fmt;

use crate::array::DType;
use crate::error::{Result, ZanjError};
use crate::json::{JsonValue, float_from_json, format_tag, is_external_ref};
use crate::table::TABLE_FORMAT;

/// Shape of a JSON payload expected by a field.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// Anything.
    Any,
    /// `null`.
    Null,
    /// A boolean.
    Bool,
    /// An integer.
    Int,
    /// An integer, a float or one of the non-finite float strings.
    Float,
    /// A string.
    Str,
    /// `null` or the inner expression.
    Optional(Box<TypeExpr>),
    /// Any of the alternatives.
    Union(Vec<TypeExpr>),
    /// A homogeneous list.
    Seq(Box<TypeExpr>),
    /// A homogeneous list without duplicates on the Rust side.
    Set(Box<TypeExpr>),
    /// A string-keyed mapping with homogeneous values.
    Map(Box<TypeExpr>),
    /// A fixed-arity list.
    Tuple(Vec<TypeExpr>),
    /// A typed record carrying the given format tag.
    Record(&'static str),
    /// A dense array, optionally of a fixed dtype.
    Array(Option<DType>),
    /// A tabular frame.
    Table,
    /// A filesystem path string.
    Path,
    /// A type that cannot be checked at runtime.
    Unsupported(String),
}

impl TypeExpr {
    /// `Optional[inner]`.
    pub fn optional(inner: TypeExpr) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// `list[inner]`.
    pub fn seq(inner: TypeExpr) -> Self {
        Self::Seq(Box::new(inner))
    }

    /// `dict[str, inner]`.
    pub fn map(inner: TypeExpr) -> Self {
        Self::Map(Box::new(inner))
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, items: &[TypeExpr], sep: &str) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(sep)?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Self::Any => f.write_str("Any"),
            Self::Null => f.write_str("None"),
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Str => f.write_str("str"),
            Self::Optional(inner) => write!(f, "Optional[{inner}]"),
            Self::Union(items) => {
                f.write_str("Union[")?;
                list(f, items, ", ")?;
                f.write_str("]")
            }
            Self::Seq(inner) => write!(f, "list[{inner}]"),
            Self::Set(inner) => write!(f, "set[{inner}]"),
            Self::Map(inner) => write!(f, "dict[str, {inner}]"),
            Self::Tuple(items) => {
                f.write_str("tuple[")?;
                list(f, items, ", ")?;
                f.write_str("]")
            }
            Self::Record(tag) => f.write_str(tag),
            Self::Array(Some(dtype)) => write!(f, "ndarray[{dtype}]"),
            Self::Array(None) => f.write_str("ndarray"),
            Self::Table => f.write_str("Table"),
            Self::Path => f.write_str("Path"),
            Self::Unsupported(name) => f.write_str(name),
        }
    }
}

/// Checks `node` against `expr`.
///
/// Reference stubs are accepted wherever a list, array or table is expected,
/// since their content is only known once the archive entry is read.
///
/// # Errors
///
/// [`ZanjError::UnsupportedTypeHint`] when `expr` (or a part of it that had to
/// be evaluated) cannot be checked.
pub fn validate_type(node: &JsonValue, expr: &TypeExpr) -> Result<bool> {
    match expr {
        TypeExpr::Any => Ok(true),
        TypeExpr::Null => Ok(node.is_null()),
        TypeExpr::Bool => Ok(node.is_boolean()),
        TypeExpr::Int => Ok(node.is_i64() || node.is_u64()),
        TypeExpr::Float => Ok(float_from_json(node).is_some()),
        TypeExpr::Str | TypeExpr::Path => Ok(node.is_string()),
        TypeExpr::Optional(inner) => Ok(node.is_null() || validate_type(node, inner)?),
        TypeExpr::Union(options) => {
            for option in options {
                if validate_type(node, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        TypeExpr::Seq(inner) | TypeExpr::Set(inner) => match node {
            JsonValue::Array(items) => all_valid(items, inner),
            JsonValue::Object(map) => Ok(is_external_ref(map) && map.contains_key("len")),
            _ => Ok(false),
        },
        TypeExpr::Map(inner) => match node {
            JsonValue::Object(map) if format_tag(map).is_none() => {
                for value in map.values() {
                    if !validate_type(value, inner)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        },
        TypeExpr::Tuple(items) => match node {
            JsonValue::Array(values) if values.len() == items.len() => {
                for (value, item) in values.iter().zip(items) {
                    if !validate_type(value, item)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            JsonValue::Object(map) => Ok(is_external_ref(map)
                && map.get("len").and_then(JsonValue::as_u64) == Some(items.len() as u64)),
            _ => Ok(false),
        },
        TypeExpr::Record(tag) => Ok(match node {
            JsonValue::Object(map) => format_tag(map).is_none_or(|t| t == *tag),
            _ => false,
        }),
        TypeExpr::Array(dtype) => Ok(match node {
            JsonValue::Array(_) => true,
            JsonValue::Object(map) => {
                let recorded = map.get("dtype").and_then(JsonValue::as_str);
                let tagged = format_tag(map).is_some_and(|t| {
                    t.ends_with(":external")
                        || t.ends_with(":zero_dim")
                        || t.ends_with("_meta")
                });
                tagged
                    && match (dtype, recorded) {
                        (Some(want), Some(have)) => want.as_str() == have,
                        _ => true,
                    }
            }
            _ => false,
        }),
        TypeExpr::Table => Ok(match node {
            JsonValue::Object(map) => {
                format_tag(map) == Some(TABLE_FORMAT)
                    || (is_external_ref(map) && map.contains_key("columns"))
            }
            _ => false,
        }),
        TypeExpr::Unsupported(name) => Err(ZanjError::UnsupportedTypeHint(name.clone())),
    }
}

fn all_valid(items: &[JsonValue], inner: &TypeExpr) -> Result<bool> {
    for item in items {
        if !validate_type(item, inner)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_containers_and_unions() -> Result<()> {
        let expr = TypeExpr::map(TypeExpr::seq(TypeExpr::Union(vec![TypeExpr::Int, TypeExpr::Str])));
        assert!(validate_type(&json!({"a": [1, "x"], "b": []}), &expr)?);
        assert!(!validate_type(&json!({"a": [1.5]}), &expr)?);
        assert_eq!(expr.to_string(), "dict[str, list[Union[int, str]]]");
        Ok(())
    }

    #[test]
    fn optional_and_tuple() -> Result<()> {
        let expr = TypeExpr::optional(TypeExpr::Tuple(vec![TypeExpr::Bool, TypeExpr::Float]));
        assert!(validate_type(&json!(null), &expr)?);
        assert!(validate_type(&json!([true, "NaN"]), &expr)?);
        assert!(!validate_type(&json!([true]), &expr)?);
        Ok(())
    }

    #[test]
    fn stubs_stand_in_for_bulk_values() -> Result<()> {
        let list_stub = json!({"__format__": "alloc::vec::Vec<i32>:external", "$ref": "xs.jsonl", "len": 300});
        assert!(validate_type(&list_stub, &TypeExpr::seq(TypeExpr::Int))?);
        let arr_stub = json!({"__format__": "ndarray.ArrayD:external", "$ref": "a.npy", "shape": [4], "dtype": "float32"});
        assert!(validate_type(&arr_stub, &TypeExpr::Array(Some(DType::Float32)))?);
        assert!(!validate_type(&arr_stub, &TypeExpr::Array(Some(DType::Int8)))?);
        let pair = TypeExpr::Tuple(vec![TypeExpr::Int, TypeExpr::Int]);
        let pair_stub = json!({"__format__": "(i32, i32):external", "$ref": "p.jsonl", "len": 2});
        assert!(validate_type(&pair_stub, &pair)?);
        let triple_stub = json!({"__format__": "(i32, i32, i32):external", "$ref": "p.jsonl", "len": 3});
        assert!(!validate_type(&triple_stub, &pair)?);
        Ok(())
    }

    #[test]
    fn unsupported_hints_are_errors() {
        let err = validate_type(&json!(1), &TypeExpr::Unsupported("fn(i32) -> i32".into()));
        assert!(matches!(err, Err(ZanjError::UnsupportedTypeHint(_))));
    }

    #[test]
    fn record_tag_must_match() -> Result<()> {
        let expr = TypeExpr::Record("Basic(SerializableDataclass)");
        assert!(validate_type(&json!({"__format__": "Basic(SerializableDataclass)"}), &expr)?);
        assert!(!validate_type(&json!({"__format__": "Other(SerializableDataclass)"}), &expr)?);
        Ok(())
    }
}
