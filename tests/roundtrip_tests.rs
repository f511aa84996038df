//! Values sent through the mock's identity methods come back unchanged.

mod common;

use common::{Echo, bind, serial, settle};
use gdbridge::codec::EngineValue;
use gdbridge::prelude::*;
use gdbridge::{AsArg, method};

fn echo() -> Gd<Echo> {
    Gd::<Echo>::construct().expect("construct Echo")
}

/// Send `value` through `Echo::identity_<type>` by ptrcall.
fn identity<T: EngineValue + AsArg>(echo: &Gd<Echo>, value: &T) -> BridgeResult<T> {
    let label = match T::VARIANT_TYPE {
        VariantType::Nil => "Variant",
        ty => ty.name(),
    };
    let name = format!("identity_{label}");
    let handle = bind("Echo", &name, &[label], Some(label));
    method::call(&handle, Some(echo.raw()), &[value])
}

fn bytes_of<T: Copy>(value: &T) -> Vec<u8> {
    unsafe { std::slice::from_raw_parts((value as *const T).cast::<u8>(), size_of::<T>()) }.to_vec()
}

macro_rules! assert_bit_identical {
    ($echo:expr, $($value:expr),* $(,)?) => {$(
        let value = $value;
        let back = identity(&$echo, &value).unwrap();
        assert_eq!(bytes_of(&back), bytes_of(&value), "{:?}", value);
    )*};
}

#[test]
fn test_primitive_kinds_round_trip() {
    let _guard = serial();
    let echo = echo();

    assert_eq!(identity(&echo, &true).unwrap(), true);
    assert_eq!(identity(&echo, &false).unwrap(), false);
    assert_eq!(identity(&echo, &i64::MIN).unwrap(), i64::MIN);
    assert_eq!(identity(&echo, &-7i32).unwrap(), -7i32);
    assert_eq!(identity(&echo, &255u8).unwrap(), 255u8);
    assert_eq!(identity(&echo, &f64::MAX).unwrap().to_bits(), f64::MAX.to_bits());
    assert_eq!(identity(&echo, &0.1f32).unwrap().to_bits(), 0.1f32.to_bits());

    assert_bit_identical!(
        echo,
        Vector2::new(1.5, -2.25),
        Vector2i { x: -3, y: 9 },
        Vector3 { x: 0.1, y: 0.2, z: 0.3 },
        Vector3i { x: 1, y: 2, z: 3 },
        Vector4 { x: 1.0, y: 2.0, z: 3.0, w: 4.0 },
        Vector4i { x: -1, y: -2, z: -3, w: -4 },
        Rect2 { position: Vector2::new(1.0, 2.0), size: Vector2::new(3.0, 4.0) },
        Rect2i { position: Vector2i { x: 1, y: 2 }, size: Vector2i { x: 3, y: 4 } },
        Transform2D {
            x: Vector2::new(0.0, 1.0),
            y: Vector2::new(-1.0, 0.0),
            origin: Vector2::new(10.0, 20.0),
        },
        Basis {
            rows: [
                Vector3 { x: 1.0, y: 0.0, z: 0.0 },
                Vector3 { x: 0.0, y: 0.5, z: 0.0 },
                Vector3 { x: 0.0, y: 0.0, z: 2.0 },
            ],
        },
        Transform3D {
            basis: Basis {
                rows: [
                    Vector3 { x: 0.0, y: 1.0, z: 0.0 },
                    Vector3 { x: -1.0, y: 0.0, z: 0.0 },
                    Vector3 { x: 0.0, y: 0.0, z: 1.0 },
                ],
            },
            origin: Vector3 { x: 5.0, y: 6.0, z: 7.0 },
        },
        Plane { normal: Vector3 { x: 0.0, y: 1.0, z: 0.0 }, d: -3.5 },
        Quaternion { x: 0.0, y: 0.707_106_8, z: 0.0, w: 0.707_106_8 },
        Aabb {
            position: Vector3 { x: -1.0, y: -1.0, z: -1.0 },
            size: Vector3 { x: 2.0, y: 2.0, z: 2.0 },
        },
        Projection {
            cols: [
                Vector4 { x: 1.0, y: 0.0, z: 0.0, w: 0.0 },
                Vector4 { x: 0.0, y: 1.0, z: 0.0, w: 0.0 },
                Vector4 { x: 0.0, y: 0.0, z: -1.0, w: -1.0 },
                Vector4 { x: 0.0, y: 0.0, z: -0.2, w: 0.0 },
            ],
        },
        Color::from_rgba(0.25, 0.5, 0.75, 1.0),
        Rid(0xDEAD_BEEF),
    );
}

#[test]
fn test_text_kinds_round_trip() {
    let _guard = serial();
    let echo = echo();

    let text = GString::new("héllo wörld").unwrap();
    assert_eq!(identity(&echo, &text).unwrap(), text);
    let name = StringName::new("_ready").unwrap();
    assert_eq!(identity(&echo, &name).unwrap().to_rust_string().unwrap(), "_ready");
    let path = NodePath::new("Root/Child:position").unwrap();
    assert_eq!(identity(&echo, &path).unwrap(), path);
    let empty = GString::new("").unwrap();
    assert_eq!(identity(&echo, &empty).unwrap().to_rust_string().unwrap(), "");
}

#[test]
fn test_packed_kinds_round_trip() {
    let _guard = serial();
    let echo = echo();

    macro_rules! check_packed {
        ($($ty:ty => $items:expr),* $(,)?) => {$(
            let items: Vec<_> = $items;
            let packed = <$ty>::from_slice(&items).unwrap();
            let back = identity(&echo, &packed).unwrap();
            assert_eq!(back.to_vec().unwrap(), items);
            assert_eq!(back, packed);
        )*};
    }

    check_packed! {
        PackedByteArray => vec![0u8, 1, 254, 255],
        PackedInt32Array => vec![i32::MIN, 0, i32::MAX],
        PackedInt64Array => vec![-1i64, 1 << 40],
        PackedFloat32Array => vec![0.5f32, -0.25, 8.0],
        PackedFloat64Array => vec![1e-300f64, 1e300],
        PackedVector2Array => vec![Vector2::new(1.0, 2.0), Vector2::ZERO],
        PackedVector3Array => vec![Vector3 { x: 1.0, y: 2.0, z: 3.0 }],
        PackedColorArray => vec![Color::RED, Color::BLUE],
        PackedFloat32Array => Vec::new(),
    }

    let strings = ["a", "bb", ""]
        .iter()
        .map(|text| GString::new(text).unwrap())
        .collect::<Vec<_>>();
    let packed = PackedStringArray::from_slice(&strings).unwrap();
    let back = identity(&echo, &packed).unwrap();
    assert_eq!(back.to_vec().unwrap(), strings);
}

#[test]
fn test_containers_round_trip() {
    let _guard = serial();
    let echo = echo();

    let items = gdbridge::varargs![
        1i64,
        2.5f64,
        GString::new("three").unwrap(),
        Color::RED,
        PackedInt32Array::from_slice(&[4, 5]).unwrap(),
    ]
    .unwrap();
    let array = VariantArray::from_variants(&items).unwrap();
    let back = identity(&echo, &array).unwrap();
    assert_eq!(back, array);
    assert_eq!(back.len().unwrap(), 5);
    assert_eq!(back.get(2).unwrap().unwrap().to::<GString>().unwrap().to_rust_string().unwrap(), "three");

    let nested = Dictionary::new().unwrap();
    nested.set(&Variant::from_value(&GString::new("list").unwrap()).unwrap(), &Variant::from_value(&array).unwrap()).unwrap();
    let back = identity(&echo, &nested).unwrap();
    assert_eq!(back, nested);
}

#[test]
fn test_variants_of_every_kind_round_trip() {
    let _guard = serial();
    let echo = echo();
    let gradient = Gd::<common::Gradient>::construct().unwrap();

    let variants = vec![
        Variant::nil().unwrap(),
        Variant::from_value(&true).unwrap(),
        Variant::from_value(&42i64).unwrap(),
        Variant::from_value(&0.5f64).unwrap(),
        Variant::from_value(&GString::new("s").unwrap()).unwrap(),
        Variant::from_value(&StringName::new("n").unwrap()).unwrap(),
        Variant::from_value(&NodePath::new("a/b").unwrap()).unwrap(),
        Variant::from_value(&Vector3 { x: 1.0, y: 2.0, z: 3.0 }).unwrap(),
        Variant::from_value(&Transform2D {
            x: Vector2::new(1.0, 0.0),
            y: Vector2::new(0.0, 1.0),
            origin: Vector2::ZERO,
        })
        .unwrap(),
        Variant::from_value(&Color::BLUE).unwrap(),
        Variant::from_value(&Rid(7)).unwrap(),
        Variant::from_value(&Dictionary::from_pairs(&[(1i64, 2i64)]).unwrap()).unwrap(),
        Variant::from_value(&VariantArray::new().unwrap()).unwrap(),
        Variant::from_value(&PackedByteArray::from_slice(&[1, 2, 3]).unwrap()).unwrap(),
        Variant::from_value(&gradient).unwrap(),
    ];

    for variant in &variants {
        let back = identity(&echo, variant).unwrap();
        assert_eq!(back.get_type().unwrap(), variant.get_type().unwrap());
        assert_eq!(&back, variant, "{variant:?}");
    }
}

/// A dictionary built on the host survives the trip, and the engine's copy
/// is gone once the call returns.
#[test]
fn test_dictionary_round_trip_releases_intermediate() {
    let _guard = serial();
    let echo = echo();

    let dictionary = Dictionary::from_pairs(&[
        (1i64, GString::new("a").unwrap()),
        (2i64, GString::new("b").unwrap()),
    ])
    .unwrap();
    settle();
    let before = gdbridge_mock::snapshot().cells_alive;

    let back = identity(&echo, &dictionary).unwrap();
    assert_eq!(back, dictionary);
    assert_eq!(back.len().unwrap(), 2);
    let two = Variant::from_value(&2i64).unwrap();
    let value = back.get(&two).unwrap().unwrap().to::<GString>().unwrap();
    assert_eq!(value.to_rust_string().unwrap(), "b");

    drop((back, two, value));
    settle();
    assert_eq!(gdbridge_mock::snapshot().cells_alive, before);
}

#[test]
fn test_object_round_trip_keeps_refcount() {
    let _guard = serial();
    let echo = echo();
    let gradient = Gd::<common::Gradient>::construct().unwrap();
    let handle = bind("Echo", "identity_Object", &["Object"], Some("Object"));

    let back: Gd<common::Gradient> = method::call(&handle, Some(echo.raw()), &[&gradient]).unwrap();
    assert_eq!(back, gradient);
    assert_eq!(gradient.reference_count().unwrap(), Some(2));

    drop(back);
    settle();
    assert_eq!(gradient.reference_count().unwrap(), Some(1));
}

#[test]
fn test_ints_outside_host_width_are_refused() {
    let _guard = serial();
    let echo = echo();
    let handle = bind("Echo", "identity_int", &["int"], Some("int"));

    let narrowed = method::call::<u8>(&handle, Some(echo.raw()), &[&300i64]);
    assert!(matches!(narrowed, Err(BridgeError::OutOfRange { target: "u8", .. })));
    let unsigned = method::call::<u32>(&handle, Some(echo.raw()), &[&-1i64]);
    assert!(matches!(unsigned, Err(BridgeError::OutOfRange { target: "u32", .. })));

    let before = gdbridge_mock::snapshot().ptrcalls;
    let err = identity(&echo, &u64::MAX).unwrap_err();
    assert!(matches!(err, BridgeError::OutOfRange { target: "i64", .. }));
    assert_eq!(gdbridge_mock::snapshot().ptrcalls, before);
    assert_eq!(identity(&echo, &(i64::MAX as u64)).unwrap(), i64::MAX as u64);

    let boxed = Variant::from_value(&300i64).unwrap();
    assert!(boxed.to::<u8>().is_err());
    assert_eq!(boxed.to::<u16>().unwrap(), 300);
    settle();
}
