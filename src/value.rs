//! The [`Serializable`] trait: how values present themselves to the serializer.
//!
//! A handler never reflects on a value directly. Instead every value returns
//! a borrowed [`ValueKind`] view of itself, and handlers match on that view
//! (or downcast through [`AsAny`] when they target a concrete type).

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use crate::array::ArrayRef;
use crate::error::Result;
use crate::json::JsonValue;
use crate::record::SerializableRecord;
use crate::table::Table;

/// Upcast to `dyn Any`, implemented for every `'static` type.
pub trait AsAny: Any {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Returns `self` as `Box<dyn Any>`.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A value the serializer can walk.
///
/// Implementations exist for primitives, strings, paths, the std containers,
/// tuples, [`ndarray::ArrayD`], [`crate::NdArray`], [`Table`],
/// `serde_json::Value` and every `#[derive(SerializableDataclass)]` record.
pub trait Serializable: AsAny {
    /// The view handlers dispatch on.
    fn describe(&self) -> ValueKind<'_>;

    /// Rust type name, recorded in errors and opaque payloads.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Human-readable representation used as the error substitute.
    fn repr(&self) -> String {
        format!("<{}>", self.type_name())
    }
}

impl fmt::Debug for dyn Serializable + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// Values that produce their own JSON, bypassing the handler chain.
pub trait DelegateSerialize {
    /// Returns the JSON form of `self`.
    fn serialize_json(&self) -> Result<JsonValue>;
}

/// Borrowed view of a value.
pub enum ValueKind<'a> {
    /// `null` / `None` / `()`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer too large for `i64`, or any unsigned integer.
    UInt(u64),
    /// A float, possibly non-finite.
    Float(f64),
    /// A string.
    Str(Cow<'a, str>),
    /// An ordered sequence (`Vec`, slice, fixed array, tuple).
    Seq(Vec<&'a dyn Serializable>),
    /// A mapping with keys already stringified, in output order.
    Map(Vec<(String, &'a dyn Serializable)>),
    /// A typed record.
    Record(&'a dyn SerializableRecord),
    /// Fixed named fields serialized as a plain mapping.
    NamedTuple(Vec<(&'static str, &'a dyn Serializable)>),
    /// A filesystem path.
    Path(&'a Path),
    /// An opaque type descriptor rendered as a string.
    Descriptor(String),
    /// A dense numeric array.
    Array(ArrayRef<'a>),
    /// A tabular frame.
    Table(&'a Table),
    /// Any other iterable, serialized as a list.
    Iterable(Vec<&'a dyn Serializable>),
    /// A value that serializes itself.
    Delegate(&'a dyn DelegateSerialize),
    /// Nothing the default chain understands.
    Opaque,
}

impl ValueKind<'_> {
    /// Short name of the variant, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Seq(_) => "seq",
            Self::Map(_) => "map",
            Self::Record(_) => "record",
            Self::NamedTuple(_) => "named_tuple",
            Self::Path(_) => "path",
            Self::Descriptor(_) => "descriptor",
            Self::Array(_) => "array",
            Self::Table(_) => "table",
            Self::Iterable(_) => "iterable",
            Self::Delegate(_) => "delegate",
            Self::Opaque => "opaque",
        }
    }

    /// True for the primitive variants.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::UInt(_) | Self::Float(_) | Self::Str(_)
        )
    }
}

impl fmt::Debug for ValueKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::UInt(u) => write!(f, "UInt({u})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Seq(items) | Self::Iterable(items) => write!(f, "{}(len={})", self.name(), items.len()),
            Self::Map(entries) => write!(f, "Map(len={})", entries.len()),
            Self::Array(a) => write!(f, "Array({}, {:?})", a.dtype(), a.shape()),
            other => f.write_str(other.name()),
        }
    }
}

/// A value together with its view, computed once per node.
pub struct Subject<'a> {
    /// The value.
    pub value: &'a dyn Serializable,
    /// Its view.
    pub kind: ValueKind<'a>,
}

impl<'a> Subject<'a> {
    /// Describes `value`.
    pub fn new(value: &'a dyn Serializable) -> Self {
        Self {
            kind: value.describe(),
            value,
        }
    }

    /// Rust type name of the value.
    pub fn type_name(&self) -> &'static str {
        self.value.type_name()
    }

    /// Downcasts the value to a concrete type.
    pub fn downcast<T: Any>(&self) -> Option<&'a T> {
        self.value.as_any().downcast_ref::<T>()
    }
}

/// Wraps any `serde::Serialize` value so that it serializes through `serde_json`.
///
/// ```rust
/// use zanj::{Serde, json_serialize};
///
/// #[derive(serde::Serialize)]
/// struct Point { x: i32, y: i32 }
///
/// let json = json_serialize(&Serde(Point { x: 1, y: 2 }))?;
/// assert_eq!(json, serde_json::json!({"x": 1, "y": 2}));
/// # Ok::<(), zanj::ZanjError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Serde<T>(pub T);

impl<T: serde::Serialize> DelegateSerialize for Serde<T> {
    fn serialize_json(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(&self.0)?)
    }
}

impl<T: serde::Serialize + 'static> Serializable for Serde<T> {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Delegate(self)
    }
}
