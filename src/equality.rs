//! Structural equality that understands arrays.
//!
//! Scalars follow IEEE semantics, so a NaN field never equals itself. Arrays
//! compare element-wise and two NaN in the same position are equal; dtype and
//! shape must match.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::ArrayD;

use crate::array::{DType, Element, NdArray, arrays_equal};
use crate::json::JsonValue;
use crate::table::Table;
use crate::value::Serde;

/// Recursive value equality used by typed records.
pub trait DeepEq {
    /// True when `self` and `other` are structurally equal.
    fn deep_eq(&self, other: &Self) -> bool;
}

macro_rules! impl_deep_eq_partial {
    ($($t:ty),*) => {
        $(
            impl DeepEq for $t {
                fn deep_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

impl_deep_eq_partial!(
    bool, char, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, (), String,
    &'static str, PathBuf, JsonValue, Table
);

impl<T: DeepEq + ?Sized> DeepEq for Box<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        (**self).deep_eq(other)
    }
}

impl<T: DeepEq + ?Sized> DeepEq for Arc<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        (**self).deep_eq(other)
    }
}

impl<T: DeepEq + ?Sized> DeepEq for Rc<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        (**self).deep_eq(other)
    }
}

impl<T: DeepEq> DeepEq for Option<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.deep_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: DeepEq> DeepEq for [T] {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.deep_eq(b))
    }
}

impl<T: DeepEq, const N: usize> DeepEq for [T; N] {
    fn deep_eq(&self, other: &Self) -> bool {
        self[..].deep_eq(&other[..])
    }
}

impl<T: DeepEq> DeepEq for Vec<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        self[..].deep_eq(&other[..])
    }
}

impl<T: DeepEq> DeepEq for VecDeque<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.deep_eq(b))
    }
}

impl<T: Ord> DeepEq for BTreeSet<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl<T: Eq + Hash, S: BuildHasher> DeepEq for HashSet<T, S> {
    fn deep_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl<K: Eq + Hash, V: DeepEq, S: BuildHasher> DeepEq for HashMap<K, V, S> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|w| v.deep_eq(w)))
    }
}

impl<K: Ord, V: DeepEq> DeepEq for BTreeMap<K, V> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other)
                .all(|((ka, va), (kb, vb))| ka == kb && va.deep_eq(vb))
    }
}

/// Order-insensitive, like the other mappings.
impl<K: Eq + Hash, V: DeepEq, S: BuildHasher> DeepEq for IndexMap<K, V, S> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|w| v.deep_eq(w)))
    }
}

macro_rules! impl_deep_eq_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: DeepEq),+> DeepEq for ($($name,)+) {
            fn deep_eq(&self, other: &Self) -> bool {
                true $(&& self.$idx.deep_eq(&other.$idx))+
            }
        }
    };
}

impl_deep_eq_tuple!(A.0);
impl_deep_eq_tuple!(A.0, B.1);
impl_deep_eq_tuple!(A.0, B.1, C.2);
impl_deep_eq_tuple!(A.0, B.1, C.2, D.3);
impl_deep_eq_tuple!(A.0, B.1, C.2, D.3, E.4);
impl_deep_eq_tuple!(A.0, B.1, C.2, D.3, E.4, F.5);

impl<T: Element> DeepEq for ArrayD<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.shape() == other.shape() && self.iter().zip(other.iter()).all(|(a, b)| T::same(*a, *b))
    }
}

impl DeepEq for NdArray {
    fn deep_eq(&self, other: &Self) -> bool {
        arrays_equal(&self.view(), &other.view())
    }
}

impl<T: PartialEq> DeepEq for Serde<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl DeepEq for DType {
    fn deep_eq(&self, other: &Self) -> bool {
        self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn scalar_nan_is_unequal() {
        assert!(!f64::NAN.deep_eq(&f64::NAN));
        assert!(!Some(f32::NAN).deep_eq(&Some(f32::NAN)));
    }

    #[test]
    fn array_nan_in_same_slot_is_equal() {
        let a = array![1.0, f64::NAN, 3.0].into_dyn();
        let b = array![1.0, f64::NAN, 3.0].into_dyn();
        let c = array![1.0, 2.0, 3.0].into_dyn();
        assert!(a.deep_eq(&b));
        assert!(!a.deep_eq(&c));
    }

    #[test]
    fn dtype_and_shape_must_match() {
        let f = NdArray::from(array![1.0f64, 2.0].into_dyn());
        let i = NdArray::from(array![1i64, 2].into_dyn());
        let col = NdArray::from(array![[1.0f64], [2.0]].into_dyn());
        assert!(!f.deep_eq(&i));
        assert!(!f.deep_eq(&col));
    }

    #[test]
    fn maps_ignore_insertion_order() {
        let a: IndexMap<String, i32> = [("x".to_string(), 1), ("y".to_string(), 2)].into_iter().collect();
        let b: IndexMap<String, i32> = [("y".to_string(), 2), ("x".to_string(), 1)].into_iter().collect();
        assert!(a.deep_eq(&b));
    }
}
