//! Method-bind dispatcher.
//!
//! Engine methods are looked up once by `(class tag, method, signature hash)`
//! and cached in a process-wide, insertion-only table. A call is a single
//! `object_method_bind_ptrcall` over a frame the codec has already filled.

use crate::codec::{AsArg, EngineValue};
use crate::error::{BridgeError, BridgeResult};
use crate::frame::CallFrame;
use crate::interface;
use crate::obj::{ObjectFlavor, RawGd};
use crate::string::StringName;
use crate::variant::Variant;
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::ffi::c_void;
use std::fmt;
use std::sync::{Arc, LazyLock};
use xxhash_rust::xxh64::xxh64;

/// Built-in method on a built-in type, called with a typed pointer array.
pub type BuiltinMethodFn =
    unsafe extern "C" fn(sys::TypePtr, *const sys::ConstTypePtr, sys::TypePtr, i32);

/// `(class tag, method, signature hash)`.
type CatalogKey = (usize, Box<str>, i64);

static METHODS: LazyLock<RwLock<FxHashMap<CatalogKey, MethodHandle>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

static CLASS_TAGS: LazyLock<RwLock<FxHashMap<Box<str>, usize>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

static BUILTIN_METHODS: LazyLock<RwLock<FxHashMap<(VariantType, Box<str>, i64), BuiltinMethodFn>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

/// A bound engine method. Cheap to clone.
#[derive(Clone)]
pub struct MethodHandle {
    bind: usize,
    is_static: bool,
    return_flavor: Option<ObjectFlavor>,
    name: Arc<str>,
}

impl MethodHandle {
    pub fn bind_ptr(&self) -> sys::MethodBindPtr {
        self.bind as sys::MethodBindPtr
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// `Class::method`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_flavor(&self) -> Option<ObjectFlavor> {
        self.return_flavor
    }

    /// Override the ownership of an object returned by this method.
    pub fn with_return_flavor(mut self, flavor: ObjectFlavor) -> Self {
        self.return_flavor = Some(flavor);
        self
    }
}

impl PartialEq for MethodHandle {
    fn eq(&self, other: &Self) -> bool {
        self.bind == other.bind && self.is_static == other.is_static
    }
}

impl Eq for MethodHandle {}

impl fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodHandle")
            .field("name", &self.name)
            .field("bind", &format_args!("{:#x}", self.bind))
            .field("is_static", &self.is_static)
            .finish()
    }
}

/// Content hash of a method signature, in the engine's 32-bit hash space.
///
/// Arguments and return are named by their variant type; object arguments
/// hash their class name instead.
pub fn signature_hash(method: &str, args: &[&str], ret: Option<&str>) -> i64 {
    let mut text = String::with_capacity(method.len() + 16 * (args.len() + 1));
    text.push_str(method);
    text.push('(');
    text.push_str(&args.join(","));
    text.push(')');
    if let Some(ret) = ret {
        text.push_str("->");
        text.push_str(ret);
    }
    (xxh64(text.as_bytes(), 0) & 0xFFFF_FFFF) as i64
}

/// Engine tag of `class`, cached after the first lookup.
///
/// # Errors
/// `UnknownClass` when the engine has no class of that name.
pub fn class_tag(class: &str) -> BridgeResult<*mut c_void> {
    if let Some(&tag) = CLASS_TAGS.read().get(class) {
        return Ok(tag as *mut c_void);
    }

    let interface = interface::get()?;
    let name = StringName::new(class)?;
    let tag = unsafe { (interface.classdb_get_class_tag)(name.ptr()?) };
    if tag.is_null() {
        return Err(BridgeError::UnknownClass(class.to_owned()));
    }
    CLASS_TAGS.write().entry(class.into()).or_insert(tag as usize);
    Ok(tag)
}

/// Look up an instance method.
///
/// # Errors
/// `UnknownClass`, `UnknownMethod`, or `SignatureVersionMismatch` when the
/// engine knows the method under another hash. Nothing is cached on failure.
pub fn bind(class: &str, method: &str, hash: i64) -> BridgeResult<MethodHandle> {
    let tag = class_tag(class)?;
    let key: CatalogKey = (tag as usize, method.into(), hash);
    if let Some(handle) = METHODS.read().get(&key) {
        return Ok(handle.clone());
    }

    let handle = fetch(class, method, hash)?;

    let mut methods = METHODS.write();
    // Another thread may have won the race; keep the published handle.
    let published = methods.entry(key).or_insert(handle);
    Ok(published.clone())
}

/// Look up a static method; calls pass no receiver.
pub fn bind_static(class: &str, method: &str, hash: i64) -> BridgeResult<MethodHandle> {
    let mut handle = bind(class, method, hash)?;
    handle.is_static = true;
    Ok(handle)
}

/// The engine resolves binds by class name; the tag only keys the catalog.
fn fetch(class: &str, method: &str, hash: i64) -> BridgeResult<MethodHandle> {
    let interface = interface::get()?;
    let class_name = StringName::new(class)?;
    let method_name = StringName::new(method)?;

    let bind = unsafe {
        (interface.classdb_get_method_bind)(class_name.ptr()?, method_name.ptr()?, hash)
    };
    if bind.is_null() {
        let actual =
            unsafe { (interface.classdb_get_method_hash)(class_name.ptr()?, method_name.ptr()?) };
        let err = match actual {
            0 => BridgeError::UnknownMethod {
                class: class.to_owned(),
                method: method.to_owned(),
            },
            actual => BridgeError::SignatureVersionMismatch {
                class: class.to_owned(),
                method: method.to_owned(),
                expected: hash,
                actual,
            },
        };
        tracing::warn!(class, method, hash, "method bind failed: {err}");
        return Err(err);
    }

    tracing::debug!(class, method, hash, "bound method");
    Ok(MethodHandle {
        bind: bind as usize,
        is_static: false,
        return_flavor: None,
        name: format!("{class}::{method}").into(),
    })
}

/// Perform one ptrcall over a populated frame.
///
/// # Errors
/// `NullSelfForInstanceMethod` when an instance method gets no receiver;
/// the engine is not called.
///
/// # Safety
/// The frame must hold the arguments the method expects and a return slot
/// prepared for its return kind. `this` must be a live object or null.
#[cfg_attr(feature = "profiling", profiling::function)]
pub unsafe fn call_ptr(
    handle: &MethodHandle,
    this: sys::ObjectPtr,
    frame: &mut CallFrame,
) -> BridgeResult<()> {
    if this.is_null() && !handle.is_static {
        return Err(BridgeError::NullSelfForInstanceMethod(handle.name.to_string()));
    }
    let interface = interface::get()?;
    let args = frame.arg_ptrs();
    let ret = frame.ret_ptr();
    tracing::trace!(method = %handle.name, argc = frame.arg_count(), "ptrcall");
    unsafe { (interface.object_method_bind_ptrcall)(handle.bind_ptr(), this, args, ret) };
    Ok(())
}

/// Encode `args`, call, and decode the return as `R`.
///
/// The receiver is checked out for the duration of the call.
pub fn call<R: EngineValue>(
    handle: &MethodHandle,
    this: Option<&RawGd>,
    args: &[&dyn AsArg],
) -> BridgeResult<R> {
    let mut frame = CallFrame::acquire();
    let receiver = match this {
        Some(raw) => frame.checkout_receiver(raw.handle())?,
        None => std::ptr::null_mut(),
    };
    call_in_frame(handle, receiver, &mut frame, args)
}

/// As [`call`] with a raw receiver pointer that is not in the registry.
pub fn call_raw<R: EngineValue>(
    handle: &MethodHandle,
    this: sys::ObjectPtr,
    args: &[&dyn AsArg],
) -> BridgeResult<R> {
    let mut frame = CallFrame::acquire();
    call_in_frame(handle, this, &mut frame, args)
}

fn call_in_frame<R: EngineValue>(
    handle: &MethodHandle,
    this: sys::ObjectPtr,
    frame: &mut CallFrame,
    args: &[&dyn AsArg],
) -> BridgeResult<R> {
    for arg in args {
        arg.push_arg(frame)?;
    }
    R::prepare_return(frame)?;
    unsafe { call_ptr(handle, this, frame)? };
    R::decode_ret(frame, handle.return_flavor)
}

/// Call through the variant path.
///
/// # Errors
/// `EngineCall` carrying the engine's call error verbatim.
pub fn call_variant(
    handle: &MethodHandle,
    this: Option<&RawGd>,
    args: &[Variant],
) -> BridgeResult<Variant> {
    let interface = interface::get()?;
    let mut frame = CallFrame::acquire();
    let receiver = match this {
        Some(raw) => frame.checkout_receiver(raw.handle())?,
        None if handle.is_static => std::ptr::null_mut(),
        None => return Err(BridgeError::NullSelfForInstanceMethod(handle.name.to_string())),
    };
    let arg_ptrs = args
        .iter()
        .map(|arg| arg.ptr().map(|ptr| ptr.cast_const()))
        .collect::<BridgeResult<Vec<_>>>()?;

    Variant::prepare_return(&mut frame)?;
    let mut error = sys::CallError::default();
    tracing::trace!(method = %handle.name, argc = args.len(), "variant call");
    unsafe {
        (interface.object_method_bind_call)(
            handle.bind_ptr(),
            receiver,
            arg_ptrs.as_ptr(),
            arg_ptrs.len() as sys::Int,
            frame.ret_ptr(),
            &raw mut error,
        )
    };
    BridgeError::from_call_error(&error)?;
    Variant::decode_ret(&mut frame, None)
}

/// Resolve a built-in method such as `PackedFloat32Array.resize`.
pub fn builtin_method(ty: VariantType, method: &str, hash: i64) -> BridgeResult<BuiltinMethodFn> {
    let key = (ty, Box::<str>::from(method), hash);
    if let Some(&function) = BUILTIN_METHODS.read().get(&key) {
        return Ok(function);
    }

    let interface = interface::get()?;
    let name = StringName::new(method)?;
    let function = unsafe { (interface.variant_get_ptr_builtin_method)(ty.raw(), name.ptr()?, hash) }
        .ok_or_else(|| BridgeError::UnknownBuiltinMethod {
            ty,
            method: method.to_owned(),
        })?;
    BUILTIN_METHODS.write().entry(key).or_insert(function);
    Ok(function)
}

/// Drop every cached handle and tag. Run at teardown.
pub fn clear_cache() {
    let methods = std::mem::take(&mut *METHODS.write()).len();
    let builtins = std::mem::take(&mut *BUILTIN_METHODS.write()).len();
    CLASS_TAGS.write().clear();
    tracing::debug!(methods, builtins, "cleared method caches");
}

/// Number of cached method handles.
pub fn cached_methods() -> usize {
    METHODS.read().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_hash_is_stable() {
        let a = signature_hash("sample", &["float"], Some("Color"));
        let b = signature_hash("sample", &["float"], Some("Color"));
        assert_eq!(a, b);
        assert!((0..=u32::MAX as i64).contains(&a));
    }

    #[test]
    fn test_signature_hash_covers_shape() {
        let base = signature_hash("add_point", &["float", "Color"], None);
        assert_ne!(base, signature_hash("add_point", &["Color", "float"], None));
        assert_ne!(base, signature_hash("add_point", &["float", "Color"], Some("int")));
        assert_ne!(base, signature_hash("add_points", &["float", "Color"], None));
    }

    #[test]
    fn test_bind_requires_interface() {
        assert_eq!(
            bind("Object", "get_class", 1).err(),
            Some(BridgeError::NotInitialized)
        );
    }
}
