//! Refcount conservation, stale handles and registry reclamation.

mod common;

use common::{Holder, Node, Resource, bind, ptr_of, serial, settle};
use gdbridge::pointers::{self, registry};
use gdbridge::prelude::*;
use gdbridge::{Ownership, ValueKind, method};
use gdbridge_mock::driver;

#[test]
fn test_retained_object_destroyed_exactly_once() {
    let _guard = serial();
    let hold = bind("Holder", "hold", &["Object"], None);
    let release_all = bind("Holder", "release_all", &[], None);
    let held_count = bind("Holder", "held_count", &[], Some("int"));

    let holders = (0..3)
        .map(|_| Gd::<Holder>::construct().unwrap())
        .collect::<Vec<_>>();
    let resource = Gd::<Resource>::construct().unwrap();
    let ptr = ptr_of(&resource);
    let destroyed_before = gdbridge_mock::destroyed("Resource");

    for holder in &holders {
        method::call::<()>(&hold, Some(holder.raw()), &[&resource]).unwrap();
        let count: i64 = method::call(&held_count, Some(holder.raw()), &[]).unwrap();
        assert_eq!(count, 1);
    }
    assert_eq!(driver::reference_count(ptr), Some(4));

    drop(resource);
    settle();
    assert_eq!(driver::reference_count(ptr), Some(3));

    for (index, holder) in holders.iter().enumerate() {
        assert!(driver::is_alive(ptr));
        method::call::<()>(&release_all, Some(holder.raw()), &[]).unwrap();
        assert_eq!(driver::reference_count(ptr).unwrap_or(0), 2 - index as i64);
    }
    assert!(!driver::is_alive(ptr));
    assert_eq!(gdbridge_mock::destroyed("Resource"), destroyed_before + 1);
}

#[test]
fn test_host_handles_hold_one_reference_each() {
    let _guard = serial();
    let resource = Gd::<Resource>::construct().unwrap();
    assert_eq!(resource.reference_count().unwrap(), Some(1));

    let copies = (0..4).map(|_| resource.clone()).collect::<Vec<_>>();
    assert_eq!(resource.reference_count().unwrap(), Some(5));

    drop(copies);
    // Nothing is released before the registry cycles.
    assert_eq!(resource.reference_count().unwrap(), Some(5));
    settle();
    assert_eq!(resource.reference_count().unwrap(), Some(1));
}

#[test]
fn test_ended_handle_never_reaches_engine() {
    let _guard = serial();
    let set_name = bind("Node", "set_name", &["String"], None);
    let node = Gd::<Node>::construct().unwrap();
    let handle = node.raw().handle();

    let ptr = registry().end(handle).unwrap();
    let before = gdbridge_mock::snapshot();

    assert_eq!(node.ptr(), Err(BridgeError::StaleHandle(handle)));
    let err = method::call::<()>(&set_name, Some(node.raw()), &[&"renamed"]).unwrap_err();
    assert_eq!(err, BridgeError::StaleHandle(handle));
    assert_eq!(node.reference_count().unwrap(), None);
    assert_eq!(registry().end(handle), Err(BridgeError::DoubleFree(handle)));
    let after = gdbridge_mock::snapshot();
    assert_eq!(after.ptrcalls, before.ptrcalls);
    assert_eq!(after.invalid_accesses, before.invalid_accesses);

    driver::free_object(ptr);
    drop(node);
    settle();
}

#[test]
fn test_free_destroys_plain_object() {
    let _guard = serial();
    let node = Gd::<Node>::construct().unwrap();
    let ptr = ptr_of(&node);
    node.free().unwrap();
    assert!(!driver::is_alive(ptr));

    let resource = Gd::<Resource>::construct().unwrap();
    assert!(matches!(
        resource.free(),
        Err(BridgeError::ManualFreeOfRefCounted(class)) if class == "Resource"
    ));
    settle();
}

#[test]
fn test_engine_owned_object_survives_host_drop() {
    let _guard = serial();
    let node = Gd::<Node>::construct().unwrap();
    let borrowed = node.transfer_to_engine().unwrap();
    let ptr = ptr_of(&borrowed);
    drop(borrowed);
    settle();
    assert!(driver::is_alive(ptr));
    driver::free_object(ptr);
}

#[test]
fn test_cycle_on_fresh_handle_is_idempotent() {
    let _guard = serial();
    let resource = Gd::<Resource>::construct().unwrap();
    let ptr = ptr_of(&resource);
    settle();
    let live = registry().live();

    drop(resource);
    assert_eq!(pointers::cycle(), 1);
    assert!(!driver::is_alive(ptr));
    assert_eq!(registry().live(), live - 1);

    let destroyed = gdbridge_mock::destroyed("Resource");
    assert_eq!(pointers::cycle(), 0);
    assert_eq!(pointers::cycle(), 0);
    assert_eq!(gdbridge_mock::destroyed("Resource"), destroyed);
    assert_eq!(registry().live(), live - 1);
}

#[test]
fn test_engine_owned_handle_reclaim_skips_engine() {
    let _guard = serial();
    let node = driver::new_object("Node").unwrap();
    let handle = registry().new_handle(
        node.ptr(),
        ValueKind::Object { refcounted: false },
        Ownership::OwnedByEngine,
    );
    registry().release(handle);
    assert_eq!(pointers::cycle(), 1);
    assert!(driver::is_alive(node.ptr()));
    driver::free_object(node.ptr());
}

#[test]
fn test_checked_cast() {
    let _guard = serial();
    let gradient = Gd::<common::Gradient>::construct().unwrap();
    let resource = gradient.clone().into_base();
    let back = resource.cast::<common::Gradient>().unwrap();
    assert_eq!(back, gradient);
    assert_eq!(back.class_name().unwrap(), "Gradient");

    let err = resource.cast::<Node>().unwrap_err();
    assert!(matches!(err, BridgeError::InvalidCast { ref to, .. } if to == "Node"));
    drop((gradient, resource, back));
    settle();
}

#[test]
fn test_instance_method_without_receiver() {
    let _guard = serial();
    let get_name = bind("Node", "get_name", &[], Some("String"));
    let calls_before = gdbridge_mock::snapshot().ptrcalls;
    let err = method::call::<GString>(&get_name, None, &[]).unwrap_err();
    assert!(matches!(err, BridgeError::NullSelfForInstanceMethod(_)));
    assert_eq!(gdbridge_mock::snapshot().ptrcalls, calls_before);
}
