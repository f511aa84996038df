//! Method binding and calls against the mock's native classes.

mod common;

use common::{Echo, Gradient, HeightMapShape3D, bind, bind_static, serial, settle};
use gdbridge::prelude::*;
use gdbridge::sys::CallErrorType;
use gdbridge::{engine_methods, method};
use std::sync::Barrier;

engine_methods! {
    static ADD_POINT = Gradient::add_point(float, Color);
    static POINT_COUNT = Gradient::get_point_count() -> int;
    static SAMPLE = Gradient::sample(float) -> Color;
}

#[test]
fn test_gradient_sample_midpoint() {
    let _guard = serial();
    let gradient = Gd::<Gradient>::construct().unwrap();

    ADD_POINT.call::<()>(gradient.raw(), &[&0.0f32, &Color::RED]).unwrap();
    ADD_POINT.call::<()>(gradient.raw(), &[&1.0f32, &Color::BLUE]).unwrap();
    let count: i64 = POINT_COUNT.call(gradient.raw(), &[]).unwrap();
    assert_eq!(count, 2);

    let mid: Color = SAMPLE.call(gradient.raw(), &[&0.5f32]).unwrap();
    let expected = Color::RED.lerp(Color::BLUE, 0.5);
    for (got, want) in [(mid.r, expected.r), (mid.g, expected.g), (mid.b, expected.b), (mid.a, expected.a)] {
        assert!((got - want).abs() < 1e-5, "{mid:?} != {expected:?}");
    }
}

#[test]
fn test_heightmap_min_max() {
    let _guard = serial();
    let shape = Gd::<HeightMapShape3D>::construct().unwrap();
    let set_width = bind("HeightMapShape3D", "set_map_width", &["int"], None);
    let set_depth = bind("HeightMapShape3D", "set_map_depth", &["int"], None);
    let set_data = bind("HeightMapShape3D", "set_map_data", &["PackedFloat32Array"], None);
    let get_data = bind("HeightMapShape3D", "get_map_data", &[], Some("PackedFloat32Array"));
    let min = bind("HeightMapShape3D", "get_min_height", &[], Some("float"));
    let max = bind("HeightMapShape3D", "get_max_height", &[], Some("float"));

    shape.call::<()>(&set_width, &[&4i64]).unwrap();
    shape.call::<()>(&set_depth, &[&4i64]).unwrap();
    let heights = [0.0f32, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 2.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0];
    let data = PackedFloat32Array::from_slice(&heights).unwrap();
    shape.call::<()>(&set_data, &[&data]).unwrap();

    assert_eq!(shape.call::<f64>(&min, &[]).unwrap(), 0.0);
    assert_eq!(shape.call::<f64>(&max, &[]).unwrap(), 4.0);
    let back: PackedFloat32Array = shape.call(&get_data, &[]).unwrap();
    assert_eq!(back.to_vec().unwrap(), heights);

    // A buffer of the wrong length is refused by the engine.
    let short = PackedFloat32Array::from_slice(&[9.0; 3]).unwrap();
    shape.call::<()>(&set_data, &[&short]).unwrap();
    assert_eq!(gdbridge_mock::take_errors().len(), 1);
    assert_eq!(shape.call::<f64>(&max, &[]).unwrap(), 4.0);
}

#[test]
fn test_wrong_hash_fails_and_publishes_nothing() {
    let _guard = serial();
    let right = method::signature_hash("sample", &["float"], Some("Color"));
    let wrong = method::signature_hash("sample", &["int"], Some("Color"));
    let cached = method::cached_methods();

    let err = method::bind("Gradient", "sample", wrong).unwrap_err();
    assert_eq!(
        err,
        BridgeError::SignatureVersionMismatch {
            class: "Gradient".into(),
            method: "sample".into(),
            expected: wrong,
            actual: right,
        }
    );
    assert_eq!(method::cached_methods(), cached);

    let err = method::bind("Gradient", "no_such_method", 1).unwrap_err();
    assert!(matches!(err, BridgeError::UnknownMethod { .. }));
    let err = method::bind("NoSuchClass", "sample", right).unwrap_err();
    assert_eq!(err, BridgeError::UnknownClass("NoSuchClass".into()));
}

#[test]
fn test_broken_shim_fails_loudly_on_every_call() {
    let _guard = serial();
    let wrong = method::signature_hash("sample", &["int"], Some("Color"));
    let shim = EngineMethod::new("Gradient", "sample", wrong);
    let gradient = Gd::<Gradient>::construct().unwrap();
    gdbridge_mock::take_errors();
    let calls_before = gdbridge_mock::snapshot().ptrcalls;

    for attempt in 1..=3 {
        let err = shim.call::<Color>(gradient.raw(), &[&0.5f32]).unwrap_err();
        assert!(matches!(err, BridgeError::SignatureVersionMismatch { .. }));
        assert!(shim.is_broken());
        let errors = gdbridge_mock::take_errors();
        assert_eq!(errors.len(), 1, "attempt {attempt}: {errors:?}");
        assert!(errors[0].contains("Gradient::sample"));
    }
    assert_eq!(gdbridge_mock::snapshot().ptrcalls, calls_before);
}

#[test]
fn test_concurrent_bind_yields_one_handle() {
    let _guard = serial();
    const THREADS: usize = 8;
    let hash = method::signature_hash("identity_Vector3i", &["Vector3i"], Some("Vector3i"));
    let cached = method::cached_methods();
    let barrier = Barrier::new(THREADS);

    let handles = std::thread::scope(|scope| {
        let workers = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    method::bind("Echo", "identity_Vector3i", hash).unwrap()
                })
            })
            .collect::<Vec<_>>();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert!(handles.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(method::cached_methods(), cached + 1);
}

#[test]
fn test_catalog_keyed_by_class_tag() {
    let _guard = serial();
    let hash = method::signature_hash("identity_Vector4i", &["Vector4i"], Some("Vector4i"));
    let cached = method::cached_methods();

    let first = method::bind("Echo", "identity_Vector4i", hash).unwrap();
    let tag = method::class_tag("Echo").unwrap();
    assert_eq!(method::class_tag("Echo").unwrap(), tag);
    assert_ne!(method::class_tag("Gradient").unwrap(), tag);
    let second = method::bind("Echo", "identity_Vector4i", hash).unwrap();

    assert_eq!(first, second);
    assert_eq!(method::cached_methods(), cached + 1);
}

#[test]
fn test_calls_from_many_threads() {
    let _guard = serial();
    let sum = bind_static("Echo", "static_sum", &["int", "int"], Some("int"));

    std::thread::scope(|scope| {
        for offset in 0..4i64 {
            let sum = &sum;
            scope.spawn(move || {
                for i in 0..100i64 {
                    let total: i64 = method::call(sum, None, &[&i, &offset]).unwrap();
                    assert_eq!(total, i + offset);
                }
            });
        }
    });
}

#[test]
fn test_static_and_variant_calls() {
    let _guard = serial();
    let sum = bind_static("Echo", "static_sum", &["int", "int"], Some("int"));
    assert!(sum.is_static());
    assert_eq!(method::call::<i64>(&sum, None, &[&2i64, &5i64]).unwrap(), 7);

    let args = gdbridge::varargs![20i64, 22i64].unwrap();
    let total = method::call_variant(&sum, None, &args).unwrap();
    assert_eq!(total.to::<i64>().unwrap(), 42);

    let err = method::call_variant(&sum, None, &args[..1]).unwrap_err();
    assert_eq!(
        err,
        BridgeError::EngineCall {
            error: CallErrorType::TooFewArguments,
            argument: 0,
            expected: 2,
        }
    );

    let wrong = gdbridge::varargs![1i64, GString::new("x").unwrap()].unwrap();
    let err = method::call_variant(&sum, None, &wrong).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::EngineCall { error: CallErrorType::InvalidArgument, argument: 1, .. }
    ));
}

#[test]
fn test_decoding_a_mismatched_variant() {
    let _guard = serial();
    let text = Variant::from_value(&GString::new("7").unwrap()).unwrap();
    let err = text.to::<i64>().unwrap_err();
    assert_eq!(
        err,
        BridgeError::TypeMismatch {
            expected: VariantType::Int,
            found: VariantType::String,
        }
    );
}

#[test]
fn test_host_callable_invoked_by_engine() {
    let _guard = serial();
    let echo = Gd::<Echo>::construct().unwrap();
    let invoke = bind("Echo", "invoke_callable", &["Callable", "Variant"], Some("Variant"));

    let double = Callable::from_fn("double", |args| {
        let value = args.first().ok_or(BridgeError::ArityMismatch { expected: 1, found: 0 })?;
        Variant::from_value(&(value.to::<i64>()? * 2))
    })
    .unwrap();

    let arg = Variant::from_value(&21i64).unwrap();
    let result: Variant = echo.call(&invoke, &[&double, &arg]).unwrap();
    assert_eq!(result.to::<i64>().unwrap(), 42);

    let direct = double.call(&[Variant::from_value(&4i64).unwrap()]).unwrap();
    assert_eq!(direct.to::<i64>().unwrap(), 8);

    // A failing closure surfaces as an engine call error and is logged.
    let text = Variant::from_value(&GString::new("x").unwrap()).unwrap();
    assert!(double.call(&[text]).is_err());
    assert_eq!(gdbridge_mock::take_errors().len(), 1);

    drop((double, result, direct));
    settle();
}

#[test]
fn test_host_callable_renders_into_engine_string() {
    let _guard = serial();
    let echo = Gd::<Echo>::construct().unwrap();
    let render = bind("Echo", "callable_text", &["Callable"], Some("String"));
    let double = Callable::from_fn("double", |args| args[0].try_clone()).unwrap();
    settle();
    let cells = gdbridge_mock::snapshot().cells_alive;

    let text: GString = echo.call(&render, &[&double]).unwrap();
    assert_eq!(text.to_rust_string().unwrap(), "<host callable double>");
    assert!(gdbridge_mock::take_errors().is_empty());

    drop(text);
    settle();
    assert_eq!(gdbridge_mock::snapshot().cells_alive, cells);
}

#[test]
fn test_packed_array_argument() {
    let _guard = serial();
    let echo = Gd::<Echo>::construct().unwrap();
    let packed_len = bind("Echo", "packed_len", &["PackedFloat32Array"], Some("int"));

    let samples = PackedFloat32Array::from_slice(&[0.5; 40]).unwrap();
    assert_eq!(echo.call::<i64>(&packed_len, &[&samples]).unwrap(), 40);
    samples.resize(3).unwrap();
    assert_eq!(samples.len().unwrap(), 3);
    assert_eq!(echo.call::<i64>(&packed_len, &[&samples]).unwrap(), 3);
}

#[test]
fn test_dictionary_keys_and_lookup() {
    let _guard = serial();
    let dictionary = Dictionary::from_pairs(&[(1i64, 10i64), (2i64, 20i64)]).unwrap();
    let keys = dictionary.keys().unwrap();
    assert_eq!(keys.len().unwrap(), 2);

    let missing = Variant::from_value(&3i64).unwrap();
    assert!(dictionary.get(&missing).unwrap().is_none());
    dictionary.set(&missing, &Variant::from_value(&30i64).unwrap()).unwrap();
    assert_eq!(dictionary.len().unwrap(), 3);
    let entries = dictionary.entries().unwrap();
    assert_eq!(entries.len(), 3);
}

#[test]
fn test_strings_with_multibyte_text() {
    let _guard = serial();
    let text = GString::new("ünïcödé ✓").unwrap();
    assert_eq!(text.to_rust_string().unwrap(), "ünïcödé ✓");
    let name = text.to_string_name().unwrap();
    assert_eq!(name.to_rust_string().unwrap(), "ünïcödé ✓");
    assert_eq!(name.to_gstring().unwrap(), text);
    let embedded = GString::new("nul\0inside").unwrap();
    assert_eq!(embedded.to_rust_string().unwrap(), "nul\0inside");
}
