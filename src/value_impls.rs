//! [`Serializable`] implementations for standard library types, `ndarray`,
//! `serde_json` and the crate's own value types.
//!
//! Hash-based containers have no stable iteration order, so `HashMap` entries
//! are emitted sorted by their stringified key. `HashSet` elements keep the
//! iteration order of the set.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::ArrayD;

use crate::array::{DType, Element, NdArray};
use crate::error::Result;
use crate::json::JsonValue;
use crate::table::Table;
use crate::value::{DelegateSerialize, Serializable, ValueKind};

/// Keys of mappings: stringified on write, parsed back on typed load.
pub trait MapKey: Sized {
    /// The JSON object key.
    fn to_key(&self) -> String;
    /// Parses a JSON object key, `None` if it does not denote a `Self`.
    fn from_key(key: &str) -> Option<Self>;
}

impl MapKey for String {
    fn to_key(&self) -> String {
        self.clone()
    }

    fn from_key(key: &str) -> Option<Self> {
        Some(key.to_owned())
    }
}

impl MapKey for PathBuf {
    fn to_key(&self) -> String {
        self.to_string_lossy().replace('\\', "/")
    }

    fn from_key(key: &str) -> Option<Self> {
        Some(PathBuf::from(key))
    }
}

macro_rules! impl_map_key_parse {
    ($($t:ty),*) => {
        $(
            impl MapKey for $t {
                fn to_key(&self) -> String {
                    self.to_string()
                }

                fn from_key(key: &str) -> Option<Self> {
                    key.parse().ok()
                }
            }
        )*
    };
}

impl_map_key_parse!(bool, char, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

// --- Primitives ---

macro_rules! impl_serializable_int {
    ($variant:ident: $($t:ty),*) => {
        $(
            impl Serializable for $t {
                fn describe(&self) -> ValueKind<'_> {
                    ValueKind::$variant((*self).try_into().unwrap_or_default())
                }

                fn repr(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_serializable_int!(Int: i8, i16, i32, i64, isize);
impl_serializable_int!(UInt: u8, u16, u32, u64, usize);

impl Serializable for bool {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Bool(*self)
    }

    fn repr(&self) -> String {
        self.to_string()
    }
}

impl Serializable for f32 {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Float(f64::from(*self))
    }

    fn repr(&self) -> String {
        self.to_string()
    }
}

impl Serializable for f64 {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Float(*self)
    }

    fn repr(&self) -> String {
        self.to_string()
    }
}

impl Serializable for char {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Str(Cow::Owned(self.to_string()))
    }

    fn repr(&self) -> String {
        format!("{self:?}")
    }
}

impl Serializable for String {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Str(Cow::Borrowed(self))
    }

    fn repr(&self) -> String {
        format!("{self:?}")
    }
}

impl Serializable for &'static str {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Str(Cow::Borrowed(self))
    }

    fn repr(&self) -> String {
        format!("{self:?}")
    }
}

impl Serializable for Cow<'static, str> {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Str(Cow::Borrowed(self))
    }
}

impl Serializable for () {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Null
    }

    fn repr(&self) -> String {
        "()".into()
    }
}

impl Serializable for PathBuf {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Path(self)
    }

    fn repr(&self) -> String {
        format!("{self:?}")
    }
}

// --- Wrappers ---

impl<T: Serializable> Serializable for Option<T> {
    fn describe(&self) -> ValueKind<'_> {
        match self {
            Some(v) => v.describe(),
            None => ValueKind::Null,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Some(v) => v.type_name(),
            None => std::any::type_name::<Self>(),
        }
    }

    fn repr(&self) -> String {
        match self {
            Some(v) => v.repr(),
            None => "None".into(),
        }
    }
}

macro_rules! impl_serializable_pointer {
    ($($p:ident),*) => {
        $(
            impl<T: Serializable + ?Sized> Serializable for $p<T> {
                fn describe(&self) -> ValueKind<'_> {
                    (**self).describe()
                }

                fn type_name(&self) -> &'static str {
                    (**self).type_name()
                }

                fn repr(&self) -> String {
                    (**self).repr()
                }
            }
        )*
    };
}

impl_serializable_pointer!(Box, Arc, Rc);

// --- Sequences ---

impl<T: Serializable> Serializable for Vec<T> {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Seq(self.iter().map(|v| v as &dyn Serializable).collect())
    }
}

impl<T: Serializable, const N: usize> Serializable for [T; N] {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Seq(self.iter().map(|v| v as &dyn Serializable).collect())
    }
}

impl<T: Serializable> Serializable for VecDeque<T> {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Iterable(self.iter().map(|v| v as &dyn Serializable).collect())
    }
}

impl<T: Serializable> Serializable for BTreeSet<T> {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Iterable(self.iter().map(|v| v as &dyn Serializable).collect())
    }
}

impl<T: Serializable, S: 'static> Serializable for HashSet<T, S> {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Iterable(self.iter().map(|v| v as &dyn Serializable).collect())
    }
}

macro_rules! impl_serializable_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: Serializable),+> Serializable for ($($name,)+) {
            fn describe(&self) -> ValueKind<'_> {
                ValueKind::Seq(vec![$(&self.$idx as &dyn Serializable),+])
            }
        }
    };
}

impl_serializable_tuple!(A.0);
impl_serializable_tuple!(A.0, B.1);
impl_serializable_tuple!(A.0, B.1, C.2);
impl_serializable_tuple!(A.0, B.1, C.2, D.3);
impl_serializable_tuple!(A.0, B.1, C.2, D.3, E.4);
impl_serializable_tuple!(A.0, B.1, C.2, D.3, E.4, F.5);

// --- Mappings ---

impl<K, V, S> Serializable for HashMap<K, V, S>
where
    K: MapKey + Eq + Hash + 'static,
    V: Serializable,
    S: BuildHasher + 'static,
{
    fn describe(&self) -> ValueKind<'_> {
        let mut entries: Vec<(String, &dyn Serializable)> = self
            .iter()
            .map(|(k, v)| (k.to_key(), v as &dyn Serializable))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        ValueKind::Map(entries)
    }
}

impl<K: MapKey + 'static, V: Serializable> Serializable for BTreeMap<K, V> {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Map(self.iter().map(|(k, v)| (k.to_key(), v as &dyn Serializable)).collect())
    }
}

impl<K, V, S> Serializable for IndexMap<K, V, S>
where
    K: MapKey + 'static,
    V: Serializable,
    S: 'static,
{
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Map(self.iter().map(|(k, v)| (k.to_key(), v as &dyn Serializable)).collect())
    }
}

// --- Arrays, tables, JSON ---

impl<T: Element> Serializable for ArrayD<T> {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Array(T::view_array(self.view()))
    }

    fn repr(&self) -> String {
        format!("ArrayD<{}>{:?}", T::DTYPE, self.shape())
    }
}

impl Serializable for NdArray {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Array(self.view())
    }

    fn repr(&self) -> String {
        format!("NdArray<{}>{:?}", self.dtype(), self.shape())
    }
}

impl Serializable for DType {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Descriptor(self.as_str().to_owned())
    }

    fn repr(&self) -> String {
        self.as_str().to_owned()
    }
}

impl Serializable for Table {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Table(self)
    }

    fn repr(&self) -> String {
        format!("Table(columns={:?}, n_rows={})", self.columns(), self.len())
    }
}

impl DelegateSerialize for JsonValue {
    fn serialize_json(&self) -> Result<JsonValue> {
        Ok(self.clone())
    }
}

impl Serializable for JsonValue {
    fn describe(&self) -> ValueKind<'_> {
        ValueKind::Delegate(self)
    }

    fn repr(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_entries_are_sorted() {
        let map: HashMap<u32, bool> = [(10, true), (2, false), (7, true)].into_iter().collect();
        let ValueKind::Map(entries) = map.describe() else {
            panic!("expected a mapping view");
        };
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["10", "2", "7"]);
    }

    #[test]
    fn pointers_are_transparent() {
        let boxed: Box<dyn Serializable> = Box::new(5i32);
        assert!(matches!(boxed.describe(), ValueKind::Int(5)));
        assert_eq!(boxed.type_name(), "i32");
        assert!(matches!(Some(2.5f64).describe(), ValueKind::Float(x) if x == 2.5));
        assert!(matches!(None::<u8>.describe(), ValueKind::Null));
    }

    #[test]
    fn map_keys_parse_back() {
        assert_eq!(i64::from_key(&(-3i64).to_key()), Some(-3));
        assert_eq!(bool::from_key("true"), Some(true));
        assert_eq!(u8::from_key("x"), None);
    }
}
