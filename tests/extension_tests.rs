//! Host-defined classes driven by the engine: virtuals, properties,
//! exported methods, notifications and the callback guard.

mod common;

use common::{Resource, Translation, bind, serial, settle};
use gdbridge::prelude::*;
use gdbridge::registry::{self, with_instance};
use gdbridge::pointers::registry as pointer_registry;
use gdbridge::{RawGd, method, sys};
use gdbridge_mock::{Var, driver};
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};

static REGISTER: Once = Once::new();
static PROBES_DROPPED: AtomicUsize = AtomicUsize::new(0);

struct Probe {
    count: i64,
    ratio: f64,
    enabled: bool,
    title: GString,
    tag: StringName,
    offset: Vector2,
    tint: Color,
    samples: PackedFloat32Array,
    table: Dictionary,
    anything: Variant,
    last_notification: i32,
}

impl HostClass for Probe {
    type Base = RefCounted;
}

struct HostTranslation {
    prefix: String,
}

impl HostClass for HostTranslation {
    type Base = Translation;
}

struct Faulty;

impl HostClass for Faulty {
    type Base = RefCounted;
}

struct Shadow;

impl HostClass for Shadow {
    type Base = RefCounted;
}

fn register() {
    REGISTER.call_once(|| {
        ClassBuilder::<Probe>::new("Probe")
            .constructor(|_base| Probe {
                count: 0,
                ratio: 0.0,
                enabled: false,
                title: GString::new("").unwrap(),
                tag: StringName::new("").unwrap(),
                offset: Vector2::ZERO,
                tint: Color::default(),
                samples: PackedFloat32Array::new().unwrap(),
                table: Dictionary::new().unwrap(),
                anything: Variant::nil().unwrap(),
                last_notification: -1,
            })
            .destructor(|_| {
                PROBES_DROPPED.fetch_add(1, Ordering::SeqCst);
            })
            .virtual_method("_compute", |_this: &mut Probe, (a, b): (i64, f64)| Ok(a as f64 * b + 1.0))
            .virtual_method("_describe", |this: &mut Probe, (name, times): (StringName, i64)| {
                this.count += times;
                GString::new(&format!("{name}x{times}"))
            })
            .virtual_method("_measure", |_this: &mut Probe, (object,): (Gd<Resource>,)| {
                Ok(object.reference_count()?.unwrap_or(0))
            })
            .virtual_method("_spawn", |_this: &mut Probe, ()| Gd::<Resource>::construct())
            .method("add", |this: &mut Probe, (amount,): (i64,)| {
                this.count += amount;
                Ok(this.count)
            })
            .method("explode", |_this: &mut Probe, ()| -> BridgeResult<()> {
                panic!("probe exploded")
            })
            .method("fail", |_this: &mut Probe, ()| -> BridgeResult<i64> { Err(BridgeError::NullObject) })
            .property("count", |this: &Probe| Ok(this.count), |this, value: i64| {
                this.count = value;
                Ok(())
            })
            .property("ratio", |this: &Probe| Ok(this.ratio), |this, value: f64| {
                this.ratio = value;
                Ok(())
            })
            .property("enabled", |this: &Probe| Ok(this.enabled), |this, value: bool| {
                this.enabled = value;
                Ok(())
            })
            .property("title", |this: &Probe| Ok(this.title.clone()), |this, value: GString| {
                this.title = value;
                Ok(())
            })
            .property("tag", |this: &Probe| Ok(this.tag.clone()), |this, value: StringName| {
                this.tag = value;
                Ok(())
            })
            .property("offset", |this: &Probe| Ok(this.offset), |this, value: Vector2| {
                this.offset = value;
                Ok(())
            })
            .property("tint", |this: &Probe| Ok(this.tint), |this, value: Color| {
                this.tint = value;
                Ok(())
            })
            .property("samples", |this: &Probe| Ok(this.samples.clone()), |this, value: PackedFloat32Array| {
                this.samples = value;
                Ok(())
            })
            .property("table", |this: &Probe| Ok(this.table.clone()), |this, value: Dictionary| {
                this.table = value;
                Ok(())
            })
            .property("anything", |this: &Probe| this.anything.try_clone(), |this, value: Variant| {
                this.anything = value;
                Ok(())
            })
            .signal("counted", &[("total", VariantType::Int)])
            .on_notification(|this, what| this.last_notification = what)
            .to_string(|this| format!("Probe({})", this.count))
            .register()
            .unwrap();

        ClassBuilder::<HostTranslation>::new("HostTranslation")
            .constructor(|_base| HostTranslation { prefix: "X:".to_owned() })
            .virtual_method(
                "_get_message",
                |this: &mut HostTranslation, (src, _context): (StringName, StringName)| {
                    StringName::new(&format!("{}{src}", this.prefix))
                },
            )
            .register()
            .unwrap();

        ClassBuilder::<Faulty>::new("Faulty")
            .constructor(|_base| panic!("faulty constructor"))
            .register()
            .unwrap();
    });
}

fn setup() -> parking_lot::MutexGuard<'static, ()> {
    let guard = serial();
    register();
    guard
}

fn probe() -> RawGd {
    RawGd::construct("Probe").unwrap()
}

fn probe_ptr(probe: &RawGd) -> sys::ObjectPtr {
    probe.ptr().unwrap()
}

#[test]
fn test_registered_class_is_visible() {
    let _guard = setup();
    let info = driver::class_info("Probe").unwrap();
    assert!(info.is_extension);
    assert_eq!(info.parent.as_deref(), Some("RefCounted"));
    assert!(info.methods.iter().any(|name| name == "add"));
    assert_eq!(info.properties.len(), 10);
    assert_eq!(info.signals[0].name, "counted");
    assert!(registry::registered_classes().contains(&"Probe".to_owned()));

    let err = ClassBuilder::<Probe>::new("Probe").register().err();
    assert_eq!(err, Some(BridgeError::ClassAlreadyRegistered("Probe".into())));
}

#[test]
fn test_virtual_receives_and_returns_values() {
    let _guard = setup();
    let probe = probe();
    let ptr = probe_ptr(&probe);

    let result = driver::call_virtual(ptr, "_compute", &[Var::Int(3), Var::Float(1.5)], VariantType::Float);
    assert_eq!(result, Some(Var::Float(5.5)));

    let text = driver::call_virtual(
        ptr,
        "_describe",
        &[Var::string_name("beep"), Var::Int(2)],
        VariantType::String,
    );
    assert_eq!(text, Some(Var::string("beepx2")));
    assert_eq!(with_instance::<Probe, _>(&probe, |this| Ok(this.count)).unwrap(), 2);

    assert_eq!(driver::call_virtual(ptr, "_missing", &[], VariantType::Nil), None);
}

#[test]
fn test_virtual_object_argument_is_borrowed() {
    let _guard = setup();
    let probe = probe();
    let resource = driver::new_object("Resource").unwrap();

    let seen = driver::call_virtual(
        probe_ptr(&probe),
        "_measure",
        &[Var::Object(resource.clone())],
        VariantType::Int,
    );
    // The driver's two references plus the one the host took for the call.
    assert_eq!(seen, Some(Var::Int(3)));
    settle();
    assert_eq!(driver::reference_count(resource.ptr()), Some(1));
}

#[test]
fn test_virtual_object_return_hands_engine_a_reference() {
    let _guard = setup();
    let probe = probe();

    let spawned = driver::call_virtual(probe_ptr(&probe), "_spawn", &[], VariantType::Object).unwrap();
    let Var::Object(object) = spawned else {
        panic!("expected an object");
    };
    settle();
    assert_eq!(driver::reference_count(object.ptr()), Some(1));

    let ptr = object.ptr();
    drop(object);
    assert!(!driver::is_alive(ptr));
}

#[test]
fn test_property_set_then_get_for_every_kind() {
    let _guard = setup();
    let probe = probe();
    let ptr = probe_ptr(&probe);

    let values = [
        ("count", Var::Int(-12)),
        ("ratio", Var::Float(0.125)),
        ("enabled", Var::Bool(true)),
        ("title", Var::string("Title")),
        ("tag", Var::string_name("tag")),
        ("offset", Var::pod(VariantType::Vector2, &[3.0f32, 4.0])),
        ("tint", Var::pod(VariantType::Color, &[0.1f32, 0.2, 0.3, 0.4])),
        ("samples", Var::packed(VariantType::PackedFloat32Array, &[1.0f32, 2.0, 3.0])),
        ("table", Var::dictionary(vec![(Var::Int(1), Var::string("one"))])),
        ("anything", Var::array(vec![Var::Int(1), Var::Bool(false)])),
    ];
    for (name, value) in &values {
        assert!(driver::set_property(ptr, name, value), "set {name}");
        assert_eq!(driver::get_property(ptr, name).as_ref(), Some(value), "get {name}");
    }

    assert!(!driver::set_property(ptr, "missing", &Var::Int(1)));
    assert_eq!(driver::get_property(ptr, "missing"), None);

    // Wrong kind: rejected and reported, the old value stays.
    assert!(!driver::set_property(ptr, "count", &Var::string("nope")));
    assert_eq!(driver::get_property(ptr, "count"), Some(Var::Int(-12)));
    assert!(!gdbridge_mock::take_errors().is_empty());
}

#[test]
fn test_property_list() {
    let _guard = setup();
    let probe = probe();
    let names = driver::property_names(probe_ptr(&probe));
    assert_eq!(names.len(), 10);
    assert_eq!(names[0], ("count".to_owned(), VariantType::Int));
    assert!(names.contains(&("samples".to_owned(), VariantType::PackedFloat32Array)));
    assert!(names.contains(&("anything".to_owned(), VariantType::Nil)));
}

#[test]
fn test_exported_method_by_variant_and_ptrcall() {
    let _guard = setup();
    let probe = probe();
    let ptr = probe_ptr(&probe);

    assert_eq!(driver::call_variant(ptr, "add", &[Var::Int(4)]), Ok(Var::Int(4)));

    let add = bind("Probe", "add", &["int"], Some("int"));
    let total: i64 = method::call(&add, Some(&probe), &[&6i64]).unwrap();
    assert_eq!(total, 10);

    let few = driver::call_variant(ptr, "add", &[]).unwrap_err();
    assert_eq!(few.error, u32::from(sys::CallErrorType::TooFewArguments));
    let wrong = driver::call_variant(ptr, "add", &[Var::string("1")]).unwrap_err();
    assert_eq!(wrong.error, u32::from(sys::CallErrorType::InvalidArgument));
    assert_eq!(with_instance::<Probe, _>(&probe, |this| Ok(this.count)).unwrap(), 10);
}

#[test]
fn test_callback_failures_are_contained() {
    let _guard = setup();
    let probe = probe();
    let ptr = probe_ptr(&probe);

    let err = driver::call_variant(ptr, "explode", &[]).unwrap_err();
    assert_eq!(err.error, u32::from(sys::CallErrorType::InvalidMethod));
    let errors = gdbridge_mock::take_errors();
    assert!(errors.iter().any(|message| message.contains("probe exploded")), "{errors:?}");

    let err = driver::call_variant(ptr, "fail", &[]).unwrap_err();
    assert_eq!(err.error, u32::from(sys::CallErrorType::InvalidMethod));
    assert_eq!(gdbridge_mock::take_errors().len(), 1);

    // The instance is still usable afterwards.
    assert_eq!(driver::call_variant(ptr, "add", &[Var::Int(1)]), Ok(Var::Int(1)));
}

#[test]
fn test_notification_and_to_string() {
    let _guard = setup();
    let probe = probe();
    let ptr = probe_ptr(&probe);

    driver::notify(ptr, 42);
    assert_eq!(with_instance::<Probe, _>(&probe, |this| Ok(this.last_notification)).unwrap(), 42);

    driver::call_variant(ptr, "add", &[Var::Int(7)]).unwrap();
    assert_eq!(driver::object_to_string(ptr).as_deref(), Some("Probe(7)"));
}

#[test]
fn test_instance_freed_with_last_reference() {
    let _guard = setup();
    let probe = probe();
    let ptr = probe_ptr(&probe);
    let copy = probe.try_clone().unwrap();
    assert_eq!(
        registry::engine_reference_count::<Probe>(&copy).unwrap(),
        registry::engine_reference_count::<Probe>(&probe).unwrap()
    );

    let dropped = PROBES_DROPPED.load(Ordering::SeqCst);
    drop((probe, copy));
    settle();
    assert!(!driver::is_alive(ptr));
    assert_eq!(PROBES_DROPPED.load(Ordering::SeqCst), dropped + 1);
}

#[test]
fn test_wrong_instance_type_is_rejected() {
    let _guard = setup();
    let resource = Gd::<Resource>::construct().unwrap();
    let err = with_instance::<Probe, _>(resource.raw(), |_| Ok(())).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidCast { .. }));
}

#[test]
fn test_translation_override() {
    let _guard = setup();
    let translation = RawGd::construct("HostTranslation").unwrap();
    let ptr = translation.ptr().unwrap();

    let seen = driver::call_variant(ptr, "get_message", &[Var::string_name("hi"), Var::string_name("c")]);
    assert_eq!(seen, Ok(Var::string_name("X:hi")));

    let get_message = bind(
        "Translation",
        "get_message",
        &["StringName", "StringName"],
        Some("StringName"),
    );
    let src = StringName::new("hi").unwrap();
    let context = StringName::new("c").unwrap();
    let message: StringName = method::call(&get_message, Some(&translation), &[&src, &context]).unwrap();
    assert_eq!(message.to_rust_string().unwrap(), "X:hi");

    let plain = Gd::<Translation>::construct().unwrap();
    let message: StringName = plain.call(&get_message, &[&src, &context]).unwrap();
    assert_eq!(message.to_rust_string().unwrap(), "hi");
}

#[test]
fn test_failed_constructor_leaves_no_object() {
    let _guard = setup();
    let before = gdbridge_mock::snapshot();
    let live = pointer_registry().live();
    let destroyed = gdbridge_mock::destroyed("RefCounted");

    let err = RawGd::construct("Faulty").unwrap_err();
    assert_eq!(err, BridgeError::ConstructionFailed("Faulty".into()));
    let errors = gdbridge_mock::take_errors();
    assert!(errors.iter().any(|message| message.contains("faulty constructor")), "{errors:?}");

    assert!(driver::new_object("Faulty").is_none());
    gdbridge_mock::take_errors();
    settle();

    assert_eq!(gdbridge_mock::snapshot().objects_alive, before.objects_alive);
    assert_eq!(gdbridge_mock::destroyed("RefCounted"), destroyed + 2);
    assert_eq!(pointer_registry().live(), live);
}

#[test]
fn test_rejected_member_rolls_back_registration() {
    let _guard = setup();
    let err = ClassBuilder::<Shadow>::new("Shadow")
        .constructor(|_base| Shadow)
        .method("get_reference_count", |_this: &mut Shadow, ()| -> BridgeResult<i64> { Ok(0) })
        .register()
        .unwrap_err();
    assert_eq!(
        err,
        BridgeError::MethodAlreadyExists {
            class: "Shadow".into(),
            method: "get_reference_count".into(),
        }
    );
    assert!(driver::class_info("Shadow").is_none());
    assert!(!registry::registered_classes().contains(&"Shadow".to_owned()));

    ClassBuilder::<Shadow>::new("Shadow")
        .constructor(|_base| Shadow)
        .method("count", |_this: &mut Shadow, ()| -> BridgeResult<i64> { Ok(3) })
        .register()
        .unwrap();
    assert!(registry::registered_classes().contains(&"Shadow".to_owned()));
    let shadow = RawGd::construct("Shadow").unwrap();
    assert_eq!(driver::call_variant(shadow.ptr().unwrap(), "count", &[]), Ok(Var::Int(3)));
}

#[test]
fn test_engine_class_name_cannot_be_reused() {
    let _guard = setup();
    let err = ClassBuilder::<Shadow>::new("Gradient")
        .constructor(|_base| Shadow)
        .register()
        .unwrap_err();
    assert_eq!(err, BridgeError::ClassAlreadyRegistered("Gradient".into()));
    assert!(!driver::class_info("Gradient").unwrap().is_extension);
}
