#![allow(missing_docs)]

use ndarray::{ArrayD, IxDyn};
use serde_json::json;
use zanj::array::{load_array, serialize_array};
use zanj::{ArrayMode, DType, DeepEq, JsonSerializer, NdArray, ObjectPath, SerializerConfig, from_json};

const MODES: [ArrayMode; 3] = [
    ArrayMode::ArrayListMeta,
    ArrayMode::ArrayHexMeta,
    ArrayMode::ArrayB64Meta,
];

fn serialize_in(mode: ArrayMode, array: &NdArray) -> zanj::Result<serde_json::Value> {
    let config = SerializerConfig {
        array_mode: mode,
        ..SerializerConfig::default()
    };
    JsonSerializer::new(config).json_serialize(array, &ObjectPath::root())
}

fn sample_arrays() -> zanj::Result<Vec<NdArray>> {
    Ok(vec![
        NdArray::from_shape_vec(&[2, 3], vec![1i8, -2, 3, -4, 5, -6])?,
        NdArray::from_shape_vec(&[4], vec![0i16, 1, i16::MIN, i16::MAX])?,
        NdArray::from_shape_vec(&[2, 2], vec![7i32, 8, 9, 10])?,
        NdArray::from_shape_vec(&[3], vec![i64::MIN, 0, i64::MAX])?,
        NdArray::from_shape_vec(&[2, 1, 2], vec![0u8, 1, 254, 255])?,
        NdArray::from_shape_vec(&[2], vec![u16::MAX, 3])?,
        NdArray::from_shape_vec(&[2], vec![u32::MAX, 3])?,
        NdArray::from_shape_vec(&[2], vec![u64::MAX, 3])?,
        NdArray::from_shape_vec(&[3], vec![0.5f32, -1.25, 1e-3])?,
        NdArray::from_shape_vec(&[2, 2], vec![std::f64::consts::PI, -0.0, 1e300, 2.5])?,
        NdArray::from_shape_vec(&[3], vec![true, false, true])?,
        NdArray::from_shape_vec(&[0, 3], Vec::<f64>::new())?,
        NdArray::from_shape_vec(&[2, 0, 4], Vec::<i32>::new())?,
    ])
}

#[test]
fn test_modes_preserve_values_and_dtype() -> zanj::Result<()> {
    for array in sample_arrays()? {
        for mode in MODES {
            let json = serialize_in(mode, &array)?;
            assert_eq!(json["__format__"], format!("ndarray.ArrayD:{}", mode.as_str()));
            assert_eq!(json["dtype"], array.dtype().as_str());
            assert_eq!(json["shape"], json!(array.shape()));

            let back = load_array(&json, None)?;
            assert_eq!(back.dtype(), array.dtype(), "{mode:?}");
            assert!(back.deep_eq(&array), "{mode:?}: {back:?} != {array:?}");
        }
    }
    Ok(())
}

#[test]
fn test_list_mode_is_plain_nested_lists() -> zanj::Result<()> {
    let array = NdArray::from_shape_vec(&[2, 2], vec![1i64, 2, 3, 4])?;
    let json = serialize_in(ArrayMode::List, &array)?;
    assert_eq!(json, json!([[1, 2], [3, 4]]));

    // Without metadata the dtype comes from the target type.
    let back: ArrayD<i64> = from_json(&json)?;
    assert_eq!(back.shape(), &[2, 2]);
    Ok(())
}

#[test]
fn test_typed_arrays_round_trip() -> zanj::Result<()> {
    let array = ArrayD::from_shape_vec(IxDyn(&[3, 2]), (0..6).map(f64::from).collect())
        .map_err(|e| zanj::ZanjError::Policy(e.to_string()))?;
    let json = zanj::json_serialize(&array)?;
    let back: ArrayD<f64> = from_json(&json)?;
    assert_eq!(back, array);

    // A payload of another dtype is rejected rather than converted.
    assert!(from_json::<ArrayD<i32>>(&json).is_err());
    Ok(())
}

#[test]
fn test_empty_axis_reloads_in_default_mode() -> zanj::Result<()> {
    let array = ArrayD::<f64>::zeros(IxDyn(&[0, 3]));
    let json = zanj::json_serialize(&array)?;
    assert_eq!(json["data"], json!([]));
    let back: ArrayD<f64> = from_json(&json)?;
    assert_eq!(back.shape(), &[0, 3]);
    Ok(())
}

#[test]
fn test_overflowing_shape_is_an_error() {
    let bad = json!({
        "__format__": "ndarray.ArrayD:array_b64_meta",
        "shape": [1u64 << 62, 8],
        "dtype": "float64",
        "data": ""
    });
    let err = load_array(&bad, None).unwrap_err();
    assert_eq!(err.kind(), zanj::ErrorKind::Schema);
}

#[test]
fn test_zero_dim_arrays() -> zanj::Result<()> {
    let scalar = NdArray::scalar(42u16);
    for mode in MODES {
        let json = serialize_in(mode, &scalar)?;
        assert_eq!(json["__format__"], "ndarray.ArrayD:zero_dim");
        let back = load_array(&json, None)?;
        assert_eq!(back.ndim(), 0);
        assert_eq!(back.dtype(), DType::UInt16);
        assert!(back.deep_eq(&scalar));
    }
    Ok(())
}

#[test]
fn test_nan_elements_compare_equal() -> zanj::Result<()> {
    let array = NdArray::from_shape_vec(&[3], vec![1.0f64, f64::NAN, f64::INFINITY])?;
    for mode in MODES {
        let back = load_array(&serialize_in(mode, &array)?, None)?;
        assert!(back.deep_eq(&array), "{mode:?}");
    }
    Ok(())
}

#[test]
fn test_shape_mismatch_is_a_schema_error() {
    let bad = json!({
        "__format__": "ndarray.ArrayD:array_list_meta",
        "shape": [3],
        "dtype": "int32",
        "n_elements": 3,
        "data": [1, 2]
    });
    let err = load_array(&bad, None).unwrap_err();
    assert_eq!(err.kind(), zanj::ErrorKind::Schema);
}

#[test]
fn test_unknown_mode_is_rejected() {
    let bad = json!({
        "__format__": "ndarray.ArrayD:array_weird_meta",
        "shape": [1],
        "dtype": "int32",
        "data": [1]
    });
    assert!(load_array(&bad, None).is_err());
}

#[test]
fn test_external_mode_needs_an_archive() -> zanj::Result<()> {
    let array = NdArray::from_shape_vec(&[1], vec![1u8])?;
    assert!(serialize_array(&array.view(), ArrayMode::External).is_err());
    Ok(())
}
