//! Shared setup for the integration tests: one engine per test binary.

#![allow(dead_code)]

use gdbridge::prelude::*;
use gdbridge::{MethodHandle, method};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Once;

engine_class!(pub struct Resource: RefCounted, refcounted);
engine_class!(pub struct Gradient: Resource, refcounted);
engine_class!(pub struct HeightMapShape3D: Resource, refcounted);
engine_class!(pub struct Translation: Resource, refcounted);
engine_class!(pub struct Holder: RefCounted, refcounted);
engine_class!(pub struct Echo: RefCounted, refcounted);
engine_class!(pub struct Node: Object);

static INIT: Once = Once::new();
static SERIAL: Mutex<()> = Mutex::new(());

/// Load the mock engine once. Logging stays off so the engine's error log
/// only holds what the bridge reports itself.
pub fn init() {
    INIT.call_once(|| {
        let config = BridgeConfig::default().with_logging(false);
        unsafe {
            gdbridge::init::initialize(
                gdbridge_mock::get_proc_address,
                gdbridge_mock::library(),
                config,
            )
        }
        .expect("mock engine rejected the bridge");
    });
}

/// Initialize and take the lock that keeps engine counters private to one
/// test.
pub fn serial() -> MutexGuard<'static, ()> {
    init();
    let guard = SERIAL.lock();
    settle();
    gdbridge_mock::take_errors();
    gdbridge_mock::take_warnings();
    guard
}

/// Run registry cycles until nothing is left to reclaim.
pub fn settle() {
    while gdbridge::pointers::cycle() > 0 {}
}

/// Bind `class::method` with the hash of the given signature.
pub fn bind(class: &str, name: &str, args: &[&str], ret: Option<&str>) -> MethodHandle {
    let hash = method::signature_hash(name, args, ret);
    method::bind(class, name, hash).unwrap_or_else(|err| panic!("bind {class}::{name}: {err}"))
}

pub fn bind_static(class: &str, name: &str, args: &[&str], ret: Option<&str>) -> MethodHandle {
    let hash = method::signature_hash(name, args, ret);
    method::bind_static(class, name, hash).unwrap_or_else(|err| panic!("bind {class}::{name}: {err}"))
}

pub fn ptr_of<T: GodotClass>(gd: &Gd<T>) -> gdbridge::sys::ObjectPtr {
    gd.ptr().expect("live handle")
}
