//! Dense numeric arrays and their JSON encodings.
//!
//! [`NdArray`] owns an `ndarray::ArrayD` of one of the supported element types;
//! [`ArrayRef`] is the borrowed counterpart the serializer works with, so that an
//! `ArrayD<T>` field can be encoded without copying it first.
//!
//! ## Modes
//!
//! | mode              | `data` payload                               |
//! |-------------------|----------------------------------------------|
//! | `list`            | nested JSON lists, no metadata               |
//! | `array_list_meta` | nested JSON lists                            |
//! | `array_hex_meta`  | hex string of the little-endian bytes        |
//! | `array_b64_meta`  | standard base64 of the little-endian bytes   |
//! | `zero_dim`        | the scalar itself (used for every 0-d array) |
//!
//! The `*_meta` modes and `zero_dim` emit a mapping carrying `shape`, `dtype`,
//! `n_elements` and a format tag `<type>:<mode>`. `external` is only meaningful
//! inside an archive.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use npyz::WriterBuilder as _;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZanjError};
use crate::json::{FORMAT_KEY, JsonMap, JsonValue, float_from_json, float_to_json, format_tag};
use crate::path::ObjectPath;

/// Type name recorded in the format tag of arrays.
pub const ARRAY_TYPE_NAME: &str = "ndarray.ArrayD";

/// Storage mode of an encoded array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayMode {
    /// Nested lists without metadata.
    List,
    /// Nested lists with metadata.
    #[default]
    ArrayListMeta,
    /// Hex encoded bytes with metadata.
    ArrayHexMeta,
    /// Base64 encoded bytes with metadata.
    ArrayB64Meta,
    /// Stored in a side file of an archive.
    External,
    /// Zero-dimensional array holding one scalar.
    ZeroDim,
}

impl ArrayMode {
    /// Name used in format tags.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::ArrayListMeta => "array_list_meta",
            Self::ArrayHexMeta => "array_hex_meta",
            Self::ArrayB64Meta => "array_b64_meta",
            Self::External => "external",
            Self::ZeroDim => "zero_dim",
        }
    }
}

impl FromStr for ArrayMode {
    type Err = ZanjError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "list" => Ok(Self::List),
            "array_list_meta" => Ok(Self::ArrayListMeta),
            "array_hex_meta" => Ok(Self::ArrayHexMeta),
            "array_b64_meta" => Ok(Self::ArrayB64Meta),
            "external" => Ok(Self::External),
            "zero_dim" => Ok(Self::ZeroDim),
            other => Err(ZanjError::UnknownArrayMode(other.to_owned())),
        }
    }
}

impl fmt::Display for ArrayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// `bool`
    Bool,
    /// `i8`
    Int8,
    /// `i16`
    Int16,
    /// `i32`
    Int32,
    /// `i64`
    Int64,
    /// `u8`
    UInt8,
    /// `u16`
    UInt16,
    /// `u32`
    UInt32,
    /// `u64`
    UInt64,
    /// `f32`
    Float32,
    /// `f64`
    Float64,
}

impl DType {
    /// Canonical dtype string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Size of one element in bytes.
    pub fn item_size(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Parses a `.npy` type descriptor such as `<f8` or `|b1`.
    pub fn from_npy_descr(descr: &str) -> Result<Self> {
        let code = descr.trim_start_matches(['<', '>', '|', '=']);
        match code {
            "b1" => Ok(Self::Bool),
            "i1" => Ok(Self::Int8),
            "i2" => Ok(Self::Int16),
            "i4" => Ok(Self::Int32),
            "i8" => Ok(Self::Int64),
            "u1" => Ok(Self::UInt8),
            "u2" => Ok(Self::UInt16),
            "u4" => Ok(Self::UInt32),
            "u8" => Ok(Self::UInt64),
            "f4" => Ok(Self::Float32),
            "f8" => Ok(Self::Float64),
            other => Err(ZanjError::schema(
                ObjectPath::root(),
                format!("unsupported npy dtype `{other}`"),
            )),
        }
    }
}

impl FromStr for DType {
    type Err = ZanjError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bool" => Ok(Self::Bool),
            "int8" => Ok(Self::Int8),
            "int16" => Ok(Self::Int16),
            "int32" => Ok(Self::Int32),
            "int64" => Ok(Self::Int64),
            "uint8" => Ok(Self::UInt8),
            "uint16" => Ok(Self::UInt16),
            "uint32" => Ok(Self::UInt32),
            "uint64" => Ok(Self::UInt64),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            other => Err(ZanjError::schema(
                ObjectPath::root(),
                format!("unknown dtype `{other}`"),
            )),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A supported array element type.
pub trait Element:
    Copy + PartialEq + fmt::Debug + Send + Sync + npyz::AutoSerialize + npyz::Deserialize + 'static
{
    /// The dtype tag of this element type.
    const DTYPE: DType;

    /// Encodes one element as JSON.
    fn to_json(self) -> JsonValue;
    /// Decodes one element from JSON, `None` if it is not representable.
    fn from_json(node: &JsonValue) -> Option<Self>;
    /// Appends the little-endian bytes of the element.
    fn write_le(self, out: &mut Vec<u8>);
    /// Reads one element from exactly `DTYPE.item_size()` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
    /// Element equality used by array comparison. Floats treat NaN == NaN.
    fn same(a: Self, b: Self) -> bool {
        a == b
    }
    /// Wraps a typed array.
    fn into_array(array: ArrayD<Self>) -> NdArray;
    /// Wraps a typed view.
    fn view_array(view: ArrayViewD<'_, Self>) -> ArrayRef<'_>;
    /// Unwraps a typed array, `None` on dtype mismatch.
    fn from_array(array: NdArray) -> Option<ArrayD<Self>>;
}

macro_rules! impl_element_int {
    ($($t:ty => $variant:ident, $conv:ident);* $(;)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = DType::$variant;

                fn to_json(self) -> JsonValue {
                    JsonValue::from(self)
                }

                fn from_json(node: &JsonValue) -> Option<Self> {
                    node.$conv().and_then(|v| <$t>::try_from(v).ok())
                }

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }

                fn into_array(array: ArrayD<Self>) -> NdArray {
                    NdArray::$variant(array)
                }

                fn view_array(view: ArrayViewD<'_, Self>) -> ArrayRef<'_> {
                    ArrayRef::$variant(view)
                }

                fn from_array(array: NdArray) -> Option<ArrayD<Self>> {
                    match array {
                        NdArray::$variant(a) => Some(a),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_element_int! {
    i8 => Int8, as_i64;
    i16 => Int16, as_i64;
    i32 => Int32, as_i64;
    i64 => Int64, as_i64;
    u8 => UInt8, as_u64;
    u16 => UInt16, as_u64;
    u32 => UInt32, as_u64;
    u64 => UInt64, as_u64;
}

macro_rules! impl_element_float {
    ($($t:ty => $variant:ident);* $(;)?) => {
        $(
            impl Element for $t {
                const DTYPE: DType = DType::$variant;

                fn to_json(self) -> JsonValue {
                    float_to_json(f64::from(self))
                }

                #[allow(clippy::cast_possible_truncation)]
                fn from_json(node: &JsonValue) -> Option<Self> {
                    float_from_json(node).map(|v| v as $t)
                }

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }

                fn same(a: Self, b: Self) -> bool {
                    a == b || (a.is_nan() && b.is_nan())
                }

                fn into_array(array: ArrayD<Self>) -> NdArray {
                    NdArray::$variant(array)
                }

                fn view_array(view: ArrayViewD<'_, Self>) -> ArrayRef<'_> {
                    ArrayRef::$variant(view)
                }

                fn from_array(array: NdArray) -> Option<ArrayD<Self>> {
                    match array {
                        NdArray::$variant(a) => Some(a),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_element_float! {
    f32 => Float32;
    f64 => Float64;
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn to_json(self) -> JsonValue {
        JsonValue::Bool(self)
    }

    fn from_json(node: &JsonValue) -> Option<Self> {
        node.as_bool()
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes.first().is_some_and(|b| *b != 0)
    }

    fn into_array(array: ArrayD<Self>) -> NdArray {
        NdArray::Bool(array)
    }

    fn view_array(view: ArrayViewD<'_, Self>) -> ArrayRef<'_> {
        ArrayRef::Bool(view)
    }

    fn from_array(array: NdArray) -> Option<ArrayD<Self>> {
        match array {
            NdArray::Bool(a) => Some(a),
            _ => None,
        }
    }
}

/// An owned dense array of any supported dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum NdArray {
    /// `bool` elements.
    Bool(ArrayD<bool>),
    /// `i8` elements.
    Int8(ArrayD<i8>),
    /// `i16` elements.
    Int16(ArrayD<i16>),
    /// `i32` elements.
    Int32(ArrayD<i32>),
    /// `i64` elements.
    Int64(ArrayD<i64>),
    /// `u8` elements.
    UInt8(ArrayD<u8>),
    /// `u16` elements.
    UInt16(ArrayD<u16>),
    /// `u32` elements.
    UInt32(ArrayD<u32>),
    /// `u64` elements.
    UInt64(ArrayD<u64>),
    /// `f32` elements.
    Float32(ArrayD<f32>),
    /// `f64` elements.
    Float64(ArrayD<f64>),
}

/// A borrowed dense array of any supported dtype.
#[derive(Debug, Clone)]
pub enum ArrayRef<'a> {
    /// `bool` elements.
    Bool(ArrayViewD<'a, bool>),
    /// `i8` elements.
    Int8(ArrayViewD<'a, i8>),
    /// `i16` elements.
    Int16(ArrayViewD<'a, i16>),
    /// `i32` elements.
    Int32(ArrayViewD<'a, i32>),
    /// `i64` elements.
    Int64(ArrayViewD<'a, i64>),
    /// `u8` elements.
    UInt8(ArrayViewD<'a, u8>),
    /// `u16` elements.
    UInt16(ArrayViewD<'a, u16>),
    /// `u32` elements.
    UInt32(ArrayViewD<'a, u32>),
    /// `u64` elements.
    UInt64(ArrayViewD<'a, u64>),
    /// `f32` elements.
    Float32(ArrayViewD<'a, f32>),
    /// `f64` elements.
    Float64(ArrayViewD<'a, f64>),
}

/// Runs `$body` with `$a` bound to the typed array inside an [`NdArray`] or [`ArrayRef`].
macro_rules! with_array {
    ($enum:ident, $value:expr, $a:ident => $body:expr) => {
        match $value {
            $enum::Bool($a) => $body,
            $enum::Int8($a) => $body,
            $enum::Int16($a) => $body,
            $enum::Int32($a) => $body,
            $enum::Int64($a) => $body,
            $enum::UInt8($a) => $body,
            $enum::UInt16($a) => $body,
            $enum::UInt32($a) => $body,
            $enum::UInt64($a) => $body,
            $enum::Float32($a) => $body,
            $enum::Float64($a) => $body,
        }
    };
}

/// Runs `$body` with the type alias `$t` bound to the element type of `$dtype`.
macro_rules! by_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DType::Bool => {
                type $t = bool;
                $body
            }
            DType::Int8 => {
                type $t = i8;
                $body
            }
            DType::Int16 => {
                type $t = i16;
                $body
            }
            DType::Int32 => {
                type $t = i32;
                $body
            }
            DType::Int64 => {
                type $t = i64;
                $body
            }
            DType::UInt8 => {
                type $t = u8;
                $body
            }
            DType::UInt16 => {
                type $t = u16;
                $body
            }
            DType::UInt32 => {
                type $t = u32;
                $body
            }
            DType::UInt64 => {
                type $t = u64;
                $body
            }
            DType::Float32 => {
                type $t = f32;
                $body
            }
            DType::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}

pub(crate) use by_dtype;

impl NdArray {
    /// Builds an array from a flat row-major buffer.
    pub fn from_shape_vec<T: Element>(shape: &[usize], data: Vec<T>) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(T::into_array)
            .map_err(|e| ZanjError::schema(ObjectPath::root(), format!("shape {shape:?}: {e}")))
    }

    /// Builds a zero-dimensional array.
    pub fn scalar<T: Element>(value: T) -> Self {
        T::into_array(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Borrows the array.
    pub fn view(&self) -> ArrayRef<'_> {
        with_array!(NdArray, self, a => Element::view_array(a.view()))
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.view().dtype()
    }

    /// Shape.
    pub fn shape(&self) -> &[usize] {
        with_array!(NdArray, self, a => a.shape())
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        with_array!(NdArray, self, a => a.len())
    }

    /// True when the array holds no element.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extracts the typed array, `None` if the dtype differs.
    pub fn into_typed<T: Element>(self) -> Option<ArrayD<T>> {
        T::from_array(self)
    }
}

macro_rules! impl_from_arrayd {
    ($($t:ty),*) => {
        $(
            impl From<ArrayD<$t>> for NdArray {
                fn from(array: ArrayD<$t>) -> Self {
                    <$t as Element>::into_array(array)
                }
            }
        )*
    };
}

impl_from_arrayd!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl<'a> ArrayRef<'a> {
    /// Element type.
    pub fn dtype(&self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::Int8(_) => DType::Int8,
            Self::Int16(_) => DType::Int16,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::UInt8(_) => DType::UInt8,
            Self::UInt16(_) => DType::UInt16,
            Self::UInt32(_) => DType::UInt32,
            Self::UInt64(_) => DType::UInt64,
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
        }
    }

    /// Shape.
    pub fn shape(&self) -> &[usize] {
        with_array!(ArrayRef, self, a => a.shape())
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        with_array!(ArrayRef, self, a => a.len())
    }

    /// True when the array holds no element.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the view into an owned array.
    pub fn to_owned_array(&self) -> NdArray {
        with_array!(ArrayRef, self, a => Element::into_array(a.to_owned()))
    }

    /// Row-major little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.dtype().item_size());
        with_array!(ArrayRef, self, a => {
            for x in a.iter() {
                x.write_le(&mut out);
            }
        });
        out
    }

    /// Nested JSON lists following the shape; a 0-d array yields its scalar.
    pub fn to_nested_json(&self) -> JsonValue {
        with_array!(ArrayRef, self, a => {
            let mut iter = a.iter().copied();
            nest(a.shape(), &mut iter)
        })
    }

    /// Writes the array as a `.npy` document.
    pub fn write_npy(&self, out: &mut Vec<u8>) -> Result<()> {
        with_array!(ArrayRef, self, a => write_npy_typed(a, out))
    }
}

fn nest<T: Element>(shape: &[usize], iter: &mut impl Iterator<Item = T>) -> JsonValue {
    match shape.split_first() {
        None => iter.next().map_or(JsonValue::Null, Element::to_json),
        Some((&n, [])) => JsonValue::Array(iter.take(n).map(Element::to_json).collect()),
        Some((&n, rest)) => JsonValue::Array((0..n).map(|_| nest(rest, iter)).collect()),
    }
}

fn write_npy_typed<T: Element>(view: &ArrayViewD<'_, T>, out: &mut Vec<u8>) -> Result<()> {
    let shape: Vec<u64> = view.shape().iter().map(|&d| d as u64).collect();
    let mut writer = npyz::WriteOptions::new()
        .default_dtype()
        .shape(&shape)
        .writer(out)
        .begin_nd()?;
    writer.extend(view.iter().copied())?;
    writer.finish()?;
    Ok(())
}

/// Reads a `.npy` document.
pub fn read_npy(bytes: &[u8]) -> Result<NdArray> {
    let npy = npyz::NpyFile::new(bytes)?;
    let shape: Vec<usize> = npy.shape().iter().map(|&d| d as usize).collect();
    let descr = match npy.dtype() {
        npyz::DType::Plain(ts) => ts.to_string(),
        other => {
            return Err(ZanjError::schema(
                ObjectPath::root(),
                format!("structured npy dtype not supported: {other:?}"),
            ));
        }
    };
    let dtype = DType::from_npy_descr(&descr)?;
    by_dtype!(dtype, T => {
        let data: Vec<T> = npy.into_vec::<T>()?;
        NdArray::from_shape_vec(&shape, data)
    })
}

/// Number of elements of an array.
pub fn array_n_elements(array: &ArrayRef<'_>) -> usize {
    array.len()
}

/// `shape`, `dtype` and `n_elements` of an array as a JSON mapping.
pub fn arr_metadata(array: &ArrayRef<'_>) -> JsonMap {
    let mut meta = JsonMap::new();
    meta.insert("shape".into(), JsonValue::from(array.shape().to_vec()));
    meta.insert("dtype".into(), JsonValue::from(array.dtype().as_str()));
    meta.insert("n_elements".into(), JsonValue::from(array.len()));
    meta
}

/// Encodes an array tagged with [`ARRAY_TYPE_NAME`].
pub fn serialize_array(array: &ArrayRef<'_>, mode: ArrayMode) -> Result<JsonValue> {
    serialize_array_as(array, mode, ARRAY_TYPE_NAME)
}

/// Encodes an array, recording `type_name` in the format tag.
///
/// Zero-dimensional arrays are always written in `zero_dim` form.
pub fn serialize_array_as(array: &ArrayRef<'_>, mode: ArrayMode, type_name: &str) -> Result<JsonValue> {
    if array.ndim() == 0 {
        let mut out = JsonMap::new();
        out.insert(FORMAT_KEY.into(), JsonValue::from(format!("{type_name}:{}", ArrayMode::ZeroDim)));
        out.extend(arr_metadata(array));
        out.insert("data".into(), array.to_nested_json());
        return Ok(JsonValue::Object(out));
    }

    let data = match mode {
        ArrayMode::List => return Ok(array.to_nested_json()),
        ArrayMode::ArrayListMeta => array.to_nested_json(),
        ArrayMode::ArrayHexMeta => JsonValue::from(hex::encode(array.to_le_bytes())),
        ArrayMode::ArrayB64Meta => JsonValue::from(BASE64.encode(array.to_le_bytes())),
        ArrayMode::ZeroDim => {
            return Err(ZanjError::Policy(format!(
                "zero_dim mode requested for an array of shape {:?}",
                array.shape()
            )));
        }
        ArrayMode::External => {
            return Err(ZanjError::Policy(
                "external array mode is only available when writing an archive".into(),
            ));
        }
    };

    let mut out = JsonMap::new();
    out.insert(FORMAT_KEY.into(), JsonValue::from(format!("{type_name}:{mode}")));
    out.extend(arr_metadata(array));
    out.insert("data".into(), data);
    Ok(JsonValue::Object(out))
}

/// Infers the storage mode from the payload shape.
pub fn infer_array_mode(node: &JsonValue) -> Result<ArrayMode> {
    match node {
        JsonValue::Array(_) => Ok(ArrayMode::List),
        JsonValue::Object(map) => {
            let tag = format_tag(map).ok_or_else(|| {
                ZanjError::schema(ObjectPath::root(), "array mapping without a format tag")
            })?;
            let (_, mode) = tag.rsplit_once(':').ok_or_else(|| {
                ZanjError::schema(ObjectPath::root(), format!("array tag `{tag}` has no mode"))
            })?;
            mode.parse()
        }
        other => Err(ZanjError::schema(
            ObjectPath::root(),
            format!("not an array payload: {other}"),
        )),
    }
}

/// True for a tagged mapping whose tag names an array storage mode.
pub fn is_array_payload(map: &JsonMap) -> bool {
    format_tag(map)
        .and_then(|tag| tag.rsplit_once(':'))
        .is_some_and(|(_, mode)| {
            matches!(
                mode,
                "array_list_meta" | "array_hex_meta" | "array_b64_meta" | "zero_dim"
            )
        })
        && map.contains_key("dtype")
}

/// Decodes an array; the mode is inferred when not given.
pub fn load_array(node: &JsonValue, mode: Option<ArrayMode>) -> Result<NdArray> {
    load_array_at(node, mode, &ObjectPath::root())
}

/// [`load_array`] reporting errors at `path`.
pub fn load_array_at(node: &JsonValue, mode: Option<ArrayMode>, path: &ObjectPath) -> Result<NdArray> {
    let mode = match mode {
        Some(m) => m,
        None => infer_array_mode(node).map_err(|e| at_path(e, path))?,
    };

    match mode {
        ArrayMode::List => load_list(node, path),
        ArrayMode::ArrayListMeta | ArrayMode::ArrayHexMeta | ArrayMode::ArrayB64Meta => {
            let map = node
                .as_object()
                .ok_or_else(|| ZanjError::schema(path, format!("{mode} payload must be a mapping")))?;
            let (dtype, shape) = read_meta(map, path)?;
            let data = map
                .get("data")
                .ok_or_else(|| ZanjError::schema(path, "array payload has no `data`"))?;
            let array = match mode {
                ArrayMode::ArrayListMeta => decode_nested(data, dtype, &shape, path)?,
                ArrayMode::ArrayHexMeta => {
                    let text = data
                        .as_str()
                        .ok_or_else(|| ZanjError::schema(path, "hex data must be a string"))?;
                    let bytes = hex::decode(text).map_err(|e| ZanjError::schema(path, e.to_string()))?;
                    decode_bytes(&bytes, dtype, &shape, path)?
                }
                _ => {
                    let text = data
                        .as_str()
                        .ok_or_else(|| ZanjError::schema(path, "base64 data must be a string"))?;
                    let bytes = BASE64
                        .decode(text)
                        .map_err(|e| ZanjError::schema(path, e.to_string()))?;
                    decode_bytes(&bytes, dtype, &shape, path)?
                }
            };
            check_n_elements(map, &array, path)?;
            Ok(array)
        }
        ArrayMode::ZeroDim => {
            let map = node
                .as_object()
                .ok_or_else(|| ZanjError::schema(path, "zero_dim payload must be a mapping"))?;
            let (dtype, shape) = read_meta(map, path)?;
            if !shape.is_empty() {
                return Err(ZanjError::schema(
                    path,
                    format!("zero_dim payload records shape {shape:?}"),
                ));
            }
            let data = map
                .get("data")
                .ok_or_else(|| ZanjError::schema(path, "zero_dim payload has no `data`"))?;
            by_dtype!(dtype, T => {
                let value = <T as Element>::from_json(data).ok_or_else(|| {
                    ZanjError::schema(path, format!("`{data}` is not a {dtype} scalar"))
                })?;
                Ok(NdArray::scalar(value))
            })
        }
        ArrayMode::External => Err(ZanjError::schema(
            path,
            "external array reference must be resolved through its archive",
        )),
    }
}

/// Decodes an array whose element type is known up front.
///
/// Plain lists are decoded straight into `dtype`; tagged payloads must record
/// that same dtype.
pub fn load_array_with_dtype(node: &JsonValue, dtype: DType, path: &ObjectPath) -> Result<NdArray> {
    match infer_array_mode(node).map_err(|e| at_path(e, path))? {
        ArrayMode::List => {
            let (shape, _) = flatten(node, path)?;
            decode_nested(node, dtype, &shape, path)
        }
        mode => {
            let array = load_array_at(node, Some(mode), path)?;
            if array.dtype() != dtype {
                return Err(ZanjError::schema(
                    path,
                    format!("expected a {dtype} array, payload records {}", array.dtype()),
                ));
            }
            Ok(array)
        }
    }
}

fn at_path(err: ZanjError, path: &ObjectPath) -> ZanjError {
    match err {
        ZanjError::Schema { message, .. } => ZanjError::schema(path, message),
        other => other,
    }
}

fn read_meta(map: &JsonMap, path: &ObjectPath) -> Result<(DType, Vec<usize>)> {
    let dtype: DType = map
        .get("dtype")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| ZanjError::schema(path, "array payload has no `dtype`"))?
        .parse()
        .map_err(|e: ZanjError| ZanjError::schema(path, e.to_string()))?;
    let shape = map
        .get("shape")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| ZanjError::schema(path, "array payload has no `shape`"))?
        .iter()
        .map(|d| {
            d.as_u64()
                .and_then(|d| usize::try_from(d).ok())
                .ok_or_else(|| ZanjError::schema(path, format!("invalid dimension `{d}`")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((dtype, shape))
}

fn check_n_elements(map: &JsonMap, array: &NdArray, path: &ObjectPath) -> Result<()> {
    if let Some(n) = map.get("n_elements").and_then(JsonValue::as_u64)
        && n != array.len() as u64
    {
        return Err(ZanjError::schema(
            path,
            format!("n_elements is {n} but the decoded array has {} elements", array.len()),
        ));
    }
    Ok(())
}

/// Number of elements of `shape`; an overflowing product is a schema error.
fn element_count(shape: &[usize], path: &ObjectPath) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |n, &d| n.checked_mul(d))
        .ok_or_else(|| ZanjError::schema(path, format!("shape {shape:?} overflows the element count")))
}

fn decode_bytes(bytes: &[u8], dtype: DType, shape: &[usize], path: &ObjectPath) -> Result<NdArray> {
    let size = dtype.item_size();
    let needed = element_count(shape, path)?
        .checked_mul(size)
        .ok_or_else(|| ZanjError::schema(path, format!("shape {shape:?} of {dtype} overflows the byte count")))?;
    if bytes.len() != needed {
        return Err(ZanjError::schema(
            path,
            format!("shape {shape:?} of {dtype} needs {needed} bytes, payload has {}", bytes.len()),
        ));
    }
    by_dtype!(dtype, T => {
        let data: Vec<T> = bytes.chunks_exact(size).map(<T as Element>::read_le).collect();
        NdArray::from_shape_vec(shape, data).map_err(|e| ZanjError::schema(path, e.to_string()))
    })
}

fn decode_nested(data: &JsonValue, dtype: DType, shape: &[usize], path: &ObjectPath) -> Result<NdArray> {
    let (found_shape, leaves) = flatten(data, path)?;
    // Nested lists cannot express the axes after an empty one.
    let expressible = match shape.iter().position(|&d| d == 0) {
        Some(zero) => &shape[..=zero],
        None => shape,
    };
    if found_shape != expressible {
        return Err(ZanjError::schema(
            path,
            format!("recorded shape {shape:?} but data has shape {found_shape:?}"),
        ));
    }
    by_dtype!(dtype, T => {
        let values = leaves
            .iter()
            .map(|leaf| {
                <T as Element>::from_json(leaf)
                    .ok_or_else(|| ZanjError::schema(path, format!("`{leaf}` is not a {dtype} value")))
            })
            .collect::<Result<Vec<T>>>()?;
        NdArray::from_shape_vec(shape, values).map_err(|e| ZanjError::schema(path, e.to_string()))
    })
}

fn load_list(node: &JsonValue, path: &ObjectPath) -> Result<NdArray> {
    let (shape, leaves) = flatten(node, path)?;
    let dtype = if !leaves.is_empty() && leaves.iter().all(|v| v.is_boolean()) {
        DType::Bool
    } else if leaves.iter().all(|v| v.is_i64()) {
        DType::Int64
    } else {
        DType::Float64
    };
    decode_nested(node, dtype, &shape, path)
}

/// Walks a rectangular nested list, returning its shape and leaves in row-major order.
fn flatten<'n>(node: &'n JsonValue, path: &ObjectPath) -> Result<(Vec<usize>, Vec<&'n JsonValue>)> {
    let mut shape = Vec::new();
    let mut cursor = node;
    while let JsonValue::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    let mut leaves = Vec::new();
    collect_leaves(node, &shape, &mut leaves, path)?;
    Ok((shape, leaves))
}

fn collect_leaves<'n>(
    node: &'n JsonValue,
    shape: &[usize],
    out: &mut Vec<&'n JsonValue>,
    path: &ObjectPath,
) -> Result<()> {
    match (shape.split_first(), node) {
        (None, JsonValue::Array(_)) => Err(ZanjError::schema(path, "ragged nested list: too deep")),
        (None, leaf) => {
            out.push(leaf);
            Ok(())
        }
        (Some((&n, rest)), JsonValue::Array(items)) if items.len() == n => {
            for item in items {
                collect_leaves(item, rest, out, path)?;
            }
            Ok(())
        }
        (Some(_), _) => Err(ZanjError::schema(path, "ragged nested list")),
    }
}

/// Element-wise equality; dtype and shape must match, NaN equals NaN.
pub fn arrays_equal(a: &ArrayRef<'_>, b: &ArrayRef<'_>) -> bool {
    fn eq<T: Element>(x: &ArrayViewD<'_, T>, y: &ArrayViewD<'_, T>) -> bool {
        x.shape() == y.shape() && x.iter().zip(y.iter()).all(|(p, q)| T::same(*p, *q))
    }
    match (a, b) {
        (ArrayRef::Bool(x), ArrayRef::Bool(y)) => eq(x, y),
        (ArrayRef::Int8(x), ArrayRef::Int8(y)) => eq(x, y),
        (ArrayRef::Int16(x), ArrayRef::Int16(y)) => eq(x, y),
        (ArrayRef::Int32(x), ArrayRef::Int32(y)) => eq(x, y),
        (ArrayRef::Int64(x), ArrayRef::Int64(y)) => eq(x, y),
        (ArrayRef::UInt8(x), ArrayRef::UInt8(y)) => eq(x, y),
        (ArrayRef::UInt16(x), ArrayRef::UInt16(y)) => eq(x, y),
        (ArrayRef::UInt32(x), ArrayRef::UInt32(y)) => eq(x, y),
        (ArrayRef::UInt64(x), ArrayRef::UInt64(y)) => eq(x, y),
        (ArrayRef::Float32(x), ArrayRef::Float32(y)) => eq(x, y),
        (ArrayRef::Float64(x), ArrayRef::Float64(y)) => eq(x, y),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    fn sample() -> NdArray {
        NdArray::from(array![[1.5f32, -2.0, 3.25], [0.0, f32::NAN, 6.0]].into_dyn())
    }

    #[test]
    fn every_meta_mode_round_trips() -> Result<()> {
        let arr = sample();
        for mode in [ArrayMode::ArrayListMeta, ArrayMode::ArrayHexMeta, ArrayMode::ArrayB64Meta] {
            let json = serialize_array(&arr.view(), mode)?;
            assert_eq!(infer_array_mode(&json)?, mode);
            assert_eq!(json["dtype"], json!("float32"));
            assert_eq!(json["shape"], json!([2, 3]));
            let back = load_array(&json, None)?;
            assert_eq!(back.dtype(), DType::Float32);
            assert!(arrays_equal(&arr.view(), &back.view()));
        }
        Ok(())
    }

    #[test]
    fn list_mode_infers_shape_and_dtype() -> Result<()> {
        let ints = load_array(&json!([[1, 2], [3, 4], [5, 6]]), None)?;
        assert_eq!(ints.shape(), &[3, 2]);
        assert_eq!(ints.dtype(), DType::Int64);
        let floats = load_array(&json!([1, 2.5]), None)?;
        assert_eq!(floats.dtype(), DType::Float64);
        let bools = load_array(&json!([true, false]), None)?;
        assert_eq!(bools.dtype(), DType::Bool);
        Ok(())
    }

    #[test]
    fn ragged_lists_are_rejected() {
        assert!(load_array(&json!([[1, 2], [3]]), None).is_err());
        assert!(load_array(&json!([[1, 2], 3]), None).is_err());
    }

    #[test]
    fn zero_dim_keeps_dtype() -> Result<()> {
        let arr = NdArray::scalar(7u16);
        let json = serialize_array(&arr.view(), ArrayMode::ArrayB64Meta)?;
        assert_eq!(json["__format__"], json!("ndarray.ArrayD:zero_dim"));
        assert_eq!(json["data"], json!(7));
        assert_eq!(json["shape"], json!([]));
        assert_eq!(json["n_elements"], json!(1));
        let back = load_array(&json, None)?;
        assert_eq!(back.ndim(), 0);
        assert_eq!(back.dtype(), DType::UInt16);
        assert_eq!(back, arr);
        Ok(())
    }

    #[test]
    fn shape_mismatch_is_a_schema_error() {
        let mut json = serialize_array(&sample().view(), ArrayMode::ArrayHexMeta).unwrap_or_default();
        json["shape"] = json!([4, 3]);
        let err = load_array(&json, None).err();
        assert!(matches!(err, Some(ZanjError::Schema { .. })));
    }

    #[test]
    fn empty_leading_axis_round_trips() -> Result<()> {
        for shape in [[0usize, 3], [3, 0]] {
            let arr = NdArray::from_shape_vec(&shape, Vec::<f64>::new())?;
            for mode in [ArrayMode::ArrayListMeta, ArrayMode::ArrayHexMeta, ArrayMode::ArrayB64Meta] {
                let back = load_array(&serialize_array(&arr.view(), mode)?, None)?;
                assert_eq!(back.shape(), &shape, "{mode:?}");
                assert_eq!(back.dtype(), DType::Float64);
            }
        }
        // Only the axes up to the empty one are visible in nested data.
        let bad = json!({"__format__": "ndarray.ArrayD:array_list_meta", "shape": [0, 3], "dtype": "int8", "data": [[]]});
        assert!(load_array(&bad, None).is_err());
        Ok(())
    }

    #[test]
    fn overflowing_shapes_are_schema_errors() {
        let huge = 1u64 << 62;
        for (mode, data) in [("array_b64_meta", json!("")), ("array_hex_meta", json!("")), ("array_list_meta", json!([]))] {
            let json = json!({
                "__format__": format!("ndarray.ArrayD:{mode}"),
                "shape": [huge, 8],
                "dtype": "float64",
                "data": data
            });
            let err = load_array(&json, None).err();
            assert!(matches!(err, Some(ZanjError::Schema { .. })), "{mode}: {err:?}");
        }
    }

    #[test]
    fn unknown_mode_is_fatal() {
        let json = json!({"__format__": "ndarray.ArrayD:array_morse_meta", "data": []});
        let err = load_array(&json, None).err();
        assert!(err.is_some_and(|e| e.is_fatal()));
    }

    #[test]
    fn npy_round_trip() -> Result<()> {
        let arr = NdArray::from(ArrayD::from_shape_vec(IxDyn(&[4, 2]), (0..8i32).collect()).unwrap_or_default());
        let mut bytes = Vec::new();
        arr.view().write_npy(&mut bytes)?;
        let back = read_npy(&bytes)?;
        assert_eq!(back, arr);
        Ok(())
    }

    #[test]
    fn npy_descr_parsing() -> Result<()> {
        assert_eq!(DType::from_npy_descr("<f8")?, DType::Float64);
        assert_eq!(DType::from_npy_descr("|b1")?, DType::Bool);
        assert_eq!(DType::from_npy_descr(">u2")?, DType::UInt16);
        assert!(DType::from_npy_descr("<c16").is_err());
        Ok(())
    }
}
