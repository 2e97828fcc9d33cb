//! Typed loading: the [`Loadable`] trait and its implementations.
//!
//! [`Loadable`] is the static counterpart of [`crate::load_item`]. A record
//! field of type `Vec<Basic>` is rebuilt by `Vec::<Basic>::load_json`, which in
//! turn calls the derived loader of `Basic`, so no registry lookup happens for
//! statically typed fields.
//!
//! Bulk values (sequences, arrays, tables, raw JSON) resolve reference stubs
//! through the loader first, so the same impls work for inline trees, eagerly
//! grafted archives and lazy archives.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::ArrayD;
use serde::de::DeserializeOwned;

use crate::array::{DType, Element, NdArray, load_array_at, load_array_with_dtype};
use crate::error::{Result, ZanjError};
use crate::json::{JsonMap, JsonValue, float_from_json, format_tag};
use crate::loader::{JsonLoader, Loaded};
use crate::path::ObjectPath;
use crate::record::SerializableRecord;
use crate::table::Table;
use crate::types::TypeExpr;
use crate::value::Serde;
use crate::value_impls::MapKey;

/// A type that can be rebuilt from its serialized form.
pub trait Loadable: Sized {
    /// Rebuilds a value from `node`, found at `path`.
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self>;

    /// Shape of the payload this type expects, used by field type assertions.
    fn type_expr() -> TypeExpr;

    /// Applies a (possibly partial) serialized value to `self`.
    ///
    /// The default replaces `self` entirely. Records and options override it
    /// so that nested patches leave absent fields untouched.
    fn update_from(&mut self, node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<()> {
        *self = Self::load_json(node, loader, path)?;
        Ok(())
    }
}

/// Loads a `T` from a JSON tree with a default loader.
///
/// ```rust
/// let v: Vec<Option<i32>> = zanj::from_json(&serde_json::json!([1, null, 3]))?;
/// assert_eq!(v, vec![Some(1), None, Some(3)]);
/// # Ok::<(), zanj::ZanjError>(())
/// ```
pub fn from_json<T: Loadable>(node: &JsonValue) -> Result<T> {
    T::load_json(node, &JsonLoader::default(), &ObjectPath::root())
}

fn json_kind(node: &JsonValue) -> &'static str {
    match node {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(n) if n.is_f64() => "float",
        JsonValue::Number(_) => "int",
        JsonValue::String(_) => "str",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "mapping",
    }
}

fn mismatch(path: &ObjectPath, expected: impl std::fmt::Display, node: &JsonValue) -> ZanjError {
    ZanjError::type_error(
        path.to_string(),
        format!("expected {expected}, found {}", json_kind(node)),
    )
}

fn as_list<'n>(node: &'n JsonValue, path: &ObjectPath, expected: &TypeExpr) -> Result<&'n [JsonValue]> {
    match node {
        JsonValue::Array(items) => Ok(items),
        other => Err(mismatch(path, expected, other)),
    }
}

fn as_mapping<'n>(node: &'n JsonValue, path: &ObjectPath, expected: &TypeExpr) -> Result<&'n JsonMap> {
    match node {
        JsonValue::Object(map) if format_tag(map).is_none() => Ok(map),
        other => Err(mismatch(path, expected, other)),
    }
}

// --- Primitives ---

macro_rules! impl_loadable_int {
    ($($t:ty),*) => {
        $(
            impl Loadable for $t {
                fn load_json(node: &JsonValue, _: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
                    let converted = if let Some(i) = node.as_i64() {
                        <$t>::try_from(i).ok()
                    } else if let Some(u) = node.as_u64() {
                        <$t>::try_from(u).ok()
                    } else {
                        return Err(mismatch(path, stringify!($t), node));
                    };
                    converted.ok_or_else(|| {
                        ZanjError::type_error(path.to_string(), format!("{node} does not fit in {}", stringify!($t)))
                    })
                }

                fn type_expr() -> TypeExpr {
                    TypeExpr::Int
                }
            }
        )*
    };
}

impl_loadable_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl Loadable for f64 {
    fn load_json(node: &JsonValue, _: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        float_from_json(node).ok_or_else(|| mismatch(path, "float", node))
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Float
    }
}

impl Loadable for f32 {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        f64::load_json(node, loader, path).map(|x| x as f32)
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Float
    }
}

impl Loadable for bool {
    fn load_json(node: &JsonValue, _: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        node.as_bool().ok_or_else(|| mismatch(path, "bool", node))
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Bool
    }
}

impl Loadable for String {
    fn load_json(node: &JsonValue, _: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        node.as_str()
            .map(str::to_owned)
            .ok_or_else(|| mismatch(path, "str", node))
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Str
    }
}

impl Loadable for Cow<'static, str> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        String::load_json(node, loader, path).map(Cow::Owned)
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Str
    }
}

impl Loadable for char {
    fn load_json(node: &JsonValue, _: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        let s = node.as_str().ok_or_else(|| mismatch(path, "char", node))?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(ZanjError::type_error(
                path.to_string(),
                format!("expected a single character, found {s:?}"),
            )),
        }
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Str
    }
}

impl Loadable for PathBuf {
    fn load_json(node: &JsonValue, _: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        node.as_str()
            .map(PathBuf::from)
            .ok_or_else(|| mismatch(path, "path", node))
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Path
    }
}

impl Loadable for () {
    fn load_json(node: &JsonValue, _: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        if node.is_null() {
            Ok(())
        } else {
            Err(mismatch(path, "null", node))
        }
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Null
    }
}

impl Loadable for DType {
    fn load_json(node: &JsonValue, _: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        let s = node.as_str().ok_or_else(|| mismatch(path, "dtype", node))?;
        s.parse()
            .map_err(|_| ZanjError::type_error(path.to_string(), format!("unknown dtype `{s}`")))
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Str
    }
}

// --- Wrappers ---

impl<T: Loadable> Loadable for Option<T> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        if node.is_null() {
            Ok(None)
        } else {
            T::load_json(node, loader, path).map(Some)
        }
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::optional(T::type_expr())
    }

    fn update_from(&mut self, node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<()> {
        match self {
            Some(inner) if !node.is_null() => inner.update_from(node, loader, path),
            _ => {
                *self = Self::load_json(node, loader, path)?;
                Ok(())
            }
        }
    }
}

impl<T: Loadable> Loadable for Box<T> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        T::load_json(node, loader, path).map(Box::new)
    }

    fn type_expr() -> TypeExpr {
        T::type_expr()
    }

    fn update_from(&mut self, node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<()> {
        (**self).update_from(node, loader, path)
    }
}

impl<T: Loadable> Loadable for Arc<T> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        T::load_json(node, loader, path).map(Arc::new)
    }

    fn type_expr() -> TypeExpr {
        T::type_expr()
    }
}

impl<T: Loadable> Loadable for Rc<T> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        T::load_json(node, loader, path).map(Rc::new)
    }

    fn type_expr() -> TypeExpr {
        T::type_expr()
    }
}

impl<T: DeserializeOwned> Loadable for Serde<T> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        let node = loader.resolve(node, path)?;
        serde_json::from_value(node.into_owned())
            .map(Serde)
            .map_err(|e| ZanjError::type_error(path.to_string(), e.to_string()))
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Any
    }
}

// --- Sequences ---

fn load_elements<T, C>(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath, expected: TypeExpr) -> Result<C>
where
    T: Loadable,
    C: FromIterator<T>,
{
    let node = loader.resolve(node, path)?;
    as_list(&node, path, &expected)?
        .iter()
        .enumerate()
        .map(|(i, item)| T::load_json(item, loader, &path.child(i)))
        .collect()
}

impl<T: Loadable> Loadable for Vec<T> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        load_elements(node, loader, path, Self::type_expr())
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::seq(T::type_expr())
    }
}

impl<T: Loadable> Loadable for VecDeque<T> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        load_elements(node, loader, path, Self::type_expr())
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::seq(T::type_expr())
    }
}

impl<T: Loadable + Ord> Loadable for BTreeSet<T> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        load_elements(node, loader, path, Self::type_expr())
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Set(Box::new(T::type_expr()))
    }
}

impl<T, S> Loadable for HashSet<T, S>
where
    T: Loadable + Eq + Hash,
    S: BuildHasher + Default,
{
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        load_elements(node, loader, path, Self::type_expr())
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Set(Box::new(T::type_expr()))
    }
}

impl<T: Loadable, const N: usize> Loadable for [T; N] {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        let items: Vec<T> = load_elements(node, loader, path, Self::type_expr())?;
        let len = items.len();
        items.try_into().map_err(|_| {
            ZanjError::type_error(path.to_string(), format!("expected {N} elements, found {len}"))
        })
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::seq(T::type_expr())
    }
}

macro_rules! impl_loadable_tuple {
    ($len:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: Loadable),+> Loadable for ($($name,)+) {
            fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
                let node = loader.resolve(node, path)?;
                let items = as_list(&node, path, &Self::type_expr())?;
                if items.len() != $len {
                    return Err(ZanjError::type_error(
                        path.to_string(),
                        format!("expected a {}-tuple, found {} elements", $len, items.len()),
                    ));
                }
                Ok(($($name::load_json(&items[$idx], loader, &path.child($idx))?,)+))
            }

            fn type_expr() -> TypeExpr {
                TypeExpr::Tuple(vec![$($name::type_expr()),+])
            }
        }
    };
}

impl_loadable_tuple!(1; A 0);
impl_loadable_tuple!(2; A 0, B 1);
impl_loadable_tuple!(3; A 0, B 1, C 2);
impl_loadable_tuple!(4; A 0, B 1, C 2, D 3);
impl_loadable_tuple!(5; A 0, B 1, C 2, D 3, E 4);
impl_loadable_tuple!(6; A 0, B 1, C 2, D 3, E 4, F 5);

// --- Mappings ---

fn load_entries<K, V, C>(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath, expected: TypeExpr) -> Result<C>
where
    K: MapKey,
    V: Loadable,
    C: FromIterator<(K, V)>,
{
    as_mapping(node, path, &expected)?
        .iter()
        .map(|(key, value)| {
            let child = path.child(key.as_str());
            let k = K::from_key(key).ok_or_else(|| {
                ZanjError::type_error(child.to_string(), format!("cannot parse mapping key {key:?}"))
            })?;
            Ok((k, V::load_json(value, loader, &child)?))
        })
        .collect()
}

impl<K, V, S> Loadable for HashMap<K, V, S>
where
    K: MapKey + Eq + Hash,
    V: Loadable,
    S: BuildHasher + Default,
{
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        load_entries(node, loader, path, Self::type_expr())
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::map(V::type_expr())
    }
}

impl<K: MapKey + Ord, V: Loadable> Loadable for BTreeMap<K, V> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        load_entries(node, loader, path, Self::type_expr())
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::map(V::type_expr())
    }
}

impl<K, V, S> Loadable for IndexMap<K, V, S>
where
    K: MapKey + Eq + Hash,
    V: Loadable,
    S: BuildHasher + Default,
{
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        load_entries(node, loader, path, Self::type_expr())
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::map(V::type_expr())
    }
}

// --- Bulk values ---

impl Loadable for JsonValue {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        Ok(loader.resolve(node, path)?.into_owned())
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Any
    }
}

impl Loadable for NdArray {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        if let Some(array) = loader.resolve_array(node)? {
            return Ok(NdArray::clone(&array));
        }
        let node = loader.resolve(node, path)?;
        load_array_at(&node, None, path)
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Array(None)
    }
}

impl<T: Element> Loadable for ArrayD<T> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        let array = match loader.resolve_array(node)? {
            Some(array) if array.dtype() != T::DTYPE => {
                return Err(ZanjError::schema(
                    path,
                    format!("expected a {} array, payload records {}", T::DTYPE, array.dtype()),
                ));
            }
            Some(array) => NdArray::clone(&array),
            None => load_array_with_dtype(&*loader.resolve(node, path)?, T::DTYPE, path)?,
        };
        array
            .into_typed::<T>()
            .ok_or_else(|| ZanjError::type_error(path.to_string(), format!("expected a {} array", T::DTYPE)))
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Array(Some(T::DTYPE))
    }
}

impl Loadable for Table {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        let node = loader.resolve(node, path)?;
        Table::from_json(&node, path)
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Table
    }
}

impl Loadable for Loaded {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        loader.load_item(node, path)
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Any
    }
}

impl Loadable for Box<dyn SerializableRecord> {
    fn load_json(node: &JsonValue, loader: &JsonLoader<'_>, path: &ObjectPath) -> Result<Self> {
        match loader.load_item(node, path)? {
            Loaded::Record(record) => Ok(record),
            _ => Err(ZanjError::type_error(
                path.to_string(),
                "expected a mapping tagged with a registered record format",
            )),
        }
    }

    fn type_expr() -> TypeExpr {
        TypeExpr::Any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_are_range_checked() {
        assert_eq!(from_json::<u8>(&json!(255)).ok(), Some(255));
        let err = from_json::<u8>(&json!(256)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Type);
        assert!(from_json::<i32>(&json!(1.5)).is_err());
    }

    #[test]
    fn non_finite_floats_load_from_strings() -> Result<()> {
        assert!(from_json::<f64>(&json!("NaN"))?.is_nan());
        assert_eq!(from_json::<f64>(&json!("-Infinity"))?, f64::NEG_INFINITY);
        assert_eq!(from_json::<f32>(&json!(2))?, 2.0);
        Ok(())
    }

    #[test]
    fn integer_keys_parse_back() -> Result<()> {
        let map: BTreeMap<u32, String> = from_json(&json!({"1": "a", "20": "b"}))?;
        assert_eq!(map.get(&20).map(String::as_str), Some("b"));
        assert!(from_json::<BTreeMap<u32, String>>(&json!({"x": "a"})).is_err());
        Ok(())
    }

    #[test]
    fn tuples_and_fixed_arrays_check_arity() -> Result<()> {
        let t: (i32, String, bool) = from_json(&json!([1, "a", true]))?;
        assert_eq!(t, (1, "a".to_owned(), true));
        assert!(from_json::<(i32, i32)>(&json!([1])).is_err());
        assert!(from_json::<[u8; 3]>(&json!([1, 2])).is_err());
        Ok(())
    }

    #[test]
    fn errors_carry_the_path() {
        let err = from_json::<Vec<Vec<i32>>>(&json!([[1], [2, "x"]])).unwrap_err();
        assert!(err.to_string().contains("1/1"), "{err}");
    }

    #[test]
    fn typed_arrays_check_dtype() -> Result<()> {
        let a: ArrayD<i64> = from_json(&json!([[1, 2], [3, 4]]))?;
        assert_eq!(a.shape(), &[2, 2]);
        let tagged = crate::array::serialize_array(&NdArray::scalar(1.5f32).view(), Default::default())?;
        assert!(from_json::<ArrayD<f64>>(&tagged).is_err());
        Ok(())
    }

    #[test]
    fn option_update_patches_in_place() -> Result<()> {
        let mut v: Option<Vec<i32>> = None;
        v.update_from(&json!([1]), &JsonLoader::default(), &ObjectPath::root())?;
        assert_eq!(v, Some(vec![1]));
        v.update_from(&JsonValue::Null, &JsonLoader::default(), &ObjectPath::root())?;
        assert_eq!(v, None);
        Ok(())
    }
}
