//! Engine objects: identity, refcounts, extension instances and bindings.
//!
//! An object is a leaked [`ObjData`]; its address is the `ObjectPtr`. Every
//! access validates the address against the live set, so a pointer used
//! after destruction is counted instead of dereferenced.

use crate::natives::State;
use crate::value::{Cell, write_cell};
use crate::{classdb, stats};
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::ffi::c_void;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static LIVE: LazyLock<Mutex<FxHashSet<usize>>> = LazyLock::new(|| Mutex::new(FxHashSet::default()));

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Callback table of a registered extension class.
#[derive(Clone, Copy)]
pub(crate) struct ExtClass(pub(crate) sys::ClassCreationInfo);

// The callbacks and userdata belong to the library that registered them.
unsafe impl Send for ExtClass {}
unsafe impl Sync for ExtClass {}

/// Host instance attached with `object_set_instance`.
#[derive(Clone, Copy)]
pub(crate) struct Extension {
    pub(crate) instance: usize,
    pub(crate) class: ExtClass,
}

#[derive(Clone, Copy)]
struct Binding {
    token: usize,
    binding: usize,
    callbacks: sys::InstanceBindingCallbacks,
}

pub struct ObjData {
    id: u64,
    class: Mutex<String>,
    refcounted: bool,
    refcount: AtomicI64,
    pub(crate) state: Mutex<State>,
    extension: Mutex<Option<Extension>>,
    bindings: Mutex<Vec<Binding>>,
}

impl ObjData {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn class(&self) -> String {
        self.class.lock().clone()
    }

    pub fn is_refcounted(&self) -> bool {
        self.refcounted
    }

    pub fn refcount(&self) -> i64 {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn extension(&self) -> Option<Extension> {
        *self.extension.lock()
    }

    fn ptr(&self) -> sys::ObjectPtr {
        (self as *const ObjData).cast_mut().cast()
    }
}

/// Allocate an object of a native class. The refcount starts at zero.
pub(crate) fn create(class: &str, refcounted: bool, state: State) -> sys::ObjectPtr {
    let data = Box::new(ObjData {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        class: Mutex::new(class.to_owned()),
        refcounted,
        refcount: AtomicI64::new(0),
        state: Mutex::new(state),
        extension: Mutex::new(None),
        bindings: Mutex::new(Vec::new()),
    });
    let ptr = Box::into_raw(data);
    LIVE.lock().insert(ptr as usize);
    tracing::trace!(class, ?ptr, "object created");
    ptr.cast()
}

/// The object behind `ptr`, or `None` (counted) when it is not alive.
pub fn get<'a>(ptr: sys::ConstObjectPtr) -> Option<&'a ObjData> {
    if ptr.is_null() {
        return None;
    }
    if !LIVE.lock().contains(&(ptr as usize)) {
        stats::record_invalid_access();
        tracing::warn!(?ptr, "access to an object that is not alive");
        return None;
    }
    Some(unsafe { &*ptr.cast::<ObjData>() })
}

pub fn is_alive(ptr: sys::ConstObjectPtr) -> bool {
    !ptr.is_null() && LIVE.lock().contains(&(ptr as usize))
}

pub fn live_count() -> usize {
    LIVE.lock().len()
}

fn notify_reference(data: &ObjData, reference: bool) {
    if let Some(extension) = data.extension() {
        let callback = if reference {
            extension.class.0.reference_func
        } else {
            extension.class.0.unreference_func
        };
        if let Some(callback) = callback {
            unsafe { callback(extension.instance as sys::ClassInstancePtr) };
        }
    }
    let bindings = data.bindings.lock().clone();
    for binding in bindings {
        if let Some(callback) = binding.callbacks.reference_callback {
            let flag = if reference { sys::TRUE } else { sys::FALSE };
            unsafe { callback(binding.token as *mut c_void, binding.binding as *mut c_void, flag) };
        }
    }
}

/// First reference of a fresh object. `false` when it already had one.
pub(crate) fn init_ref(data: &ObjData) -> bool {
    if data.refcount.load(Ordering::Acquire) != 0 {
        return false;
    }
    reference(data)
}

pub(crate) fn reference(data: &ObjData) -> bool {
    if !data.refcounted {
        return false;
    }
    data.refcount.fetch_add(1, Ordering::AcqRel);
    notify_reference(data, true);
    true
}

/// Drop one reference; `true` when none are left and the object must go.
pub(crate) fn unreference(data: &ObjData) -> bool {
    if !data.refcounted {
        return false;
    }
    let left = data.refcount.fetch_sub(1, Ordering::AcqRel) - 1;
    notify_reference(data, false);
    if left < 0 {
        tracing::error!(id = data.id, left, "refcount dropped below zero");
    }
    left <= 0
}

/// Drop one reference and destroy the object when it was the last.
pub(crate) fn release(ptr: sys::ObjectPtr) {
    if let Some(data) = get(ptr) {
        if unreference(data) {
            destroy(ptr);
        }
    }
}

/// Free the host instance and bindings, then the object itself.
pub(crate) fn destroy(ptr: sys::ObjectPtr) {
    let Some(data) = get(ptr) else {
        return;
    };
    if let Some(extension) = data.extension.lock().take() {
        if let Some(free) = extension.class.0.free_instance_func {
            unsafe { free(extension.class.0.class_userdata, extension.instance as sys::ClassInstancePtr) };
        }
    }
    let bindings = std::mem::take(&mut *data.bindings.lock());
    for binding in bindings {
        if let Some(free) = binding.callbacks.free_callback {
            unsafe { free(binding.token as *mut c_void, ptr, binding.binding as *mut c_void) };
        }
    }

    let class = data.class();
    LIVE.lock().remove(&(ptr as usize));
    // Held references are released here and may cascade.
    drop(unsafe { Box::from_raw(ptr.cast::<ObjData>()) });
    stats::record_destroyed(&class);
    tracing::trace!(class, ?ptr, "object destroyed");
}

/// Whether `data`'s class is `ancestor` or derives from it.
pub(crate) fn is_instance_of(data: &ObjData, ancestor: &str) -> bool {
    classdb::inherits(&data.class(), ancestor)
}

// ========== REFERENCES ==========

/// Engine-side pointer to an object. Refcounted objects are kept alive by
/// the reference it holds; other objects are merely pointed at.
pub struct ObjRef {
    ptr: usize,
    counted: bool,
}

impl ObjRef {
    pub fn null() -> Self {
        Self { ptr: 0, counted: false }
    }

    /// Point at `ptr`, taking a reference of our own.
    pub fn acquire(ptr: sys::ObjectPtr) -> Self {
        let counted = match get(ptr) {
            Some(data) => reference(data),
            None => false,
        };
        Self { ptr: ptr as usize, counted }
    }

    /// Point at `ptr`, taking over a reference somebody already took.
    pub fn adopt(ptr: sys::ObjectPtr) -> Self {
        let counted = get(ptr).is_some_and(ObjData::is_refcounted);
        Self { ptr: ptr as usize, counted }
    }

    pub fn ptr(&self) -> sys::ObjectPtr {
        self.ptr as sys::ObjectPtr
    }

    pub fn is_null(&self) -> bool {
        self.ptr == 0
    }

    /// Give up the pointer together with the reference it holds.
    pub fn into_ptr(self) -> sys::ObjectPtr {
        let this = std::mem::ManuallyDrop::new(self);
        this.ptr()
    }
}

impl Clone for ObjRef {
    fn clone(&self) -> Self {
        if self.is_null() {
            return Self::null();
        }
        Self::acquire(self.ptr())
    }
}

impl Drop for ObjRef {
    fn drop(&mut self) {
        if self.counted {
            release(self.ptr());
        }
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl std::fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjRef({:#x})", self.ptr)
    }
}

// ========== INTERFACE ENTRIES ==========

pub(crate) unsafe extern "C" fn object_destroy(object: sys::ObjectPtr) {
    destroy(object);
}

pub(crate) unsafe extern "C" fn object_get_instance_binding(
    object: sys::ObjectPtr,
    token: *mut c_void,
    callbacks: *const sys::InstanceBindingCallbacks,
) -> *mut c_void {
    let Some(data) = get(object) else {
        return std::ptr::null_mut();
    };
    if let Some(found) = data.bindings.lock().iter().find(|b| b.token == token as usize) {
        return found.binding as *mut c_void;
    }
    let Some(callbacks) = (unsafe { callbacks.as_ref() }).copied() else {
        return std::ptr::null_mut();
    };
    let Some(create) = callbacks.create_callback else {
        return std::ptr::null_mut();
    };
    let binding = unsafe { create(token, object) };
    if !binding.is_null() {
        data.bindings.lock().push(Binding {
            token: token as usize,
            binding: binding as usize,
            callbacks,
        });
    }
    binding
}

pub(crate) unsafe extern "C" fn object_set_instance_binding(
    object: sys::ObjectPtr,
    token: *mut c_void,
    binding: *mut c_void,
    callbacks: *const sys::InstanceBindingCallbacks,
) {
    let Some(data) = get(object) else {
        return;
    };
    let callbacks = unsafe { callbacks.as_ref() }.copied().unwrap_or(sys::InstanceBindingCallbacks {
        create_callback: None,
        free_callback: None,
        reference_callback: None,
    });
    let mut bindings = data.bindings.lock();
    bindings.retain(|b| b.token != token as usize);
    bindings.push(Binding {
        token: token as usize,
        binding: binding as usize,
        callbacks,
    });
}

pub(crate) unsafe extern "C" fn object_free_instance_binding(object: sys::ObjectPtr, token: *mut c_void) {
    let Some(data) = get(object) else {
        return;
    };
    let removed = {
        let mut bindings = data.bindings.lock();
        let position = bindings.iter().position(|b| b.token == token as usize);
        position.map(|index| bindings.remove(index))
    };
    if let Some(binding) = removed {
        if let Some(free) = binding.callbacks.free_callback {
            unsafe { free(token, object, binding.binding as *mut c_void) };
        }
    }
}

pub(crate) unsafe extern "C" fn object_set_instance(
    object: sys::ObjectPtr,
    class_name: sys::ConstStringNamePtr,
    instance: sys::ClassInstancePtr,
) {
    let Some(data) = get(object) else {
        return;
    };
    let Some(class) = (unsafe { crate::value::cell_ref(class_name) }).and_then(Cell::text) else {
        return;
    };
    let Some(info) = classdb::extension_info(class) else {
        tracing::error!(class, "object_set_instance for a class without extension info");
        return;
    };
    *data.class.lock() = class.to_owned();
    *data.extension.lock() = Some(Extension {
        instance: instance as usize,
        class: info,
    });
}

pub(crate) unsafe extern "C" fn object_get_class_name(
    object: sys::ConstObjectPtr,
    _library: sys::ClassLibraryPtr,
    r_class_name: sys::UninitStringNamePtr,
) -> sys::Bool {
    let Some(data) = get(object) else {
        return sys::FALSE;
    };
    unsafe { write_cell(r_class_name, VariantType::StringName, Cell::StringName(data.class())) };
    sys::TRUE
}

pub(crate) unsafe extern "C" fn object_cast_to(
    object: sys::ConstObjectPtr,
    class_tag: *mut c_void,
) -> sys::ObjectPtr {
    let (Some(data), Some(target)) = (get(object), classdb::tag_name(class_tag)) else {
        return std::ptr::null_mut();
    };
    if is_instance_of(data, target) {
        data.ptr()
    } else {
        std::ptr::null_mut()
    }
}

pub(crate) unsafe extern "C" fn object_get_instance_id(object: sys::ConstObjectPtr) -> u64 {
    get(object).map_or(0, ObjData::id)
}

pub(crate) unsafe extern "C" fn ref_get_object(reference: sys::ConstRefPtr) -> sys::ObjectPtr {
    if reference.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { reference.cast::<sys::ObjectPtr>().read_unaligned() }
}

/// Point a reference slot at `object`, releasing whatever it held.
pub(crate) unsafe extern "C" fn ref_set_object(reference: sys::RefPtr, object: sys::ObjectPtr) {
    if reference.is_null() {
        return;
    }
    let fresh = ObjRef::acquire(object).into_ptr();
    let old = unsafe { reference.cast::<sys::ObjectPtr>().replace(fresh) };
    if !old.is_null() {
        release(old);
    }
}
