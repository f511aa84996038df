//! Engine `Callable`, including callables backed by host closures.

use crate::codec::cell::{BuiltinCell, CellKind};
use crate::codec::{CallbackArgs, CallbackRet, EngineValue, impl_cell_value};
use crate::error::BridgeResult;
use crate::interface;
use crate::registry::guarded;
use crate::string::GString;
use crate::variant::Variant;
use gdbridge_sys as sys;
use gdbridge_sys::{CallErrorType, VariantType};
use std::ffi::c_void;
use std::fmt;

const CALLABLE: CellKind = CellKind::Builtin(VariantType::Callable);

type HostFn = dyn Fn(&[Variant]) -> BridgeResult<Variant> + Send + Sync;

/// Engine `Callable`.
pub struct Callable(pub(crate) BuiltinCell);

impl_cell_value!(Callable, CALLABLE, VariantType::Callable);

struct HostCallable {
    name: String,
    function: Box<HostFn>,
}

impl Callable {
    /// Wrap a host closure. Invoking the callable from the engine routes
    /// through the same callback guard as registered class methods.
    pub fn from_fn<F>(name: &str, function: F) -> BridgeResult<Self>
    where
        F: Fn(&[Variant]) -> BridgeResult<Variant> + Send + Sync + 'static,
    {
        Self::create(name, 0, Box::new(function))
    }

    /// As [`Callable::from_fn`], bound to the object with `object_id`.
    pub fn from_bound_fn<F>(name: &str, object_id: u64, function: F) -> BridgeResult<Self>
    where
        F: Fn(&[Variant]) -> BridgeResult<Variant> + Send + Sync + 'static,
    {
        Self::create(name, object_id, Box::new(function))
    }

    fn create(name: &str, object_id: u64, function: Box<HostFn>) -> BridgeResult<Self> {
        let interface = interface::get()?;
        let token = crate::init::library_token();
        let userdata = Box::into_raw(Box::new(HostCallable {
            name: name.to_owned(),
            function,
        }));
        let mut info = sys::CallableCustomInfo {
            callable_userdata: userdata.cast(),
            token,
            object_id,
            call_func: Some(call_host),
            is_valid_func: None,
            free_func: Some(free_host),
            hash_func: Some(hash_host),
            to_string_func: Some(to_string_host),
        };
        let cell = BuiltinCell::new_with(CALLABLE, |dst| {
            unsafe { (interface.callable_custom_create)(dst, &raw mut info) };
            Ok(())
        });
        if cell.is_err() {
            // The engine never saw the userdata.
            drop(unsafe { Box::from_raw(userdata) });
        }
        cell.map(Self)
    }

    /// Invoke through the engine.
    pub fn call(&self, args: &[Variant]) -> BridgeResult<Variant> {
        self.to_variant()?.call("call", args)
    }
}

unsafe extern "C" fn call_host(
    userdata: *mut c_void,
    args: *const sys::ConstVariantPtr,
    argc: sys::Int,
    r_return: sys::VariantPtr,
    r_error: *mut sys::CallError,
) {
    let callable = unsafe { &*userdata.cast::<HostCallable>() };
    let args = unsafe { CallbackArgs::from_varcall(args, argc.max(0) as usize) };
    let ok = guarded(&callable.name, || {
        let values = (0..args.len())
            .map(|index| args.get::<Variant>(index))
            .collect::<BridgeResult<Vec<_>>>()?;
        let result = (callable.function)(&values)?;
        result.encode_callback_ret(CallbackRet::Variant(r_return))
    });
    if !r_error.is_null() {
        let error = if ok {
            CallErrorType::Ok
        } else {
            CallErrorType::InvalidMethod
        };
        unsafe {
            *r_error = sys::CallError {
                error: error.into(),
                argument: 0,
                expected: 0,
            }
        };
    }
}

unsafe extern "C" fn free_host(userdata: *mut c_void) {
    drop(unsafe { Box::from_raw(userdata.cast::<HostCallable>()) });
}

unsafe extern "C" fn hash_host(userdata: *mut c_void) -> u32 {
    let callable = unsafe { &*userdata.cast::<HostCallable>() };
    xxhash_rust::xxh64::xxh64(callable.name.as_bytes(), userdata as u64) as u32
}

unsafe extern "C" fn to_string_host(
    userdata: *mut c_void,
    r_is_valid: *mut sys::Bool,
    r_out: sys::StringPtr,
) {
    let callable = unsafe { &*userdata.cast::<HostCallable>() };
    // The engine's string is replaced only once the new one exists.
    let written = guarded(&callable.name, || {
        let text = GString::new(&format!("<host callable {}>", callable.name))?;
        text.encode_callback_ret(CallbackRet::Ptr(r_out))
    });
    if !r_is_valid.is_null() {
        unsafe { *r_is_valid = if written { sys::TRUE } else { sys::FALSE } };
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        let (Ok(left), Ok(right)) = (self.0.ptr(), other.0.ptr()) else {
            return false;
        };
        interface::get()
            .and_then(|interface| unsafe {
                interface.builtins.equal(VariantType::Callable, left, right)
            })
            .unwrap_or(false)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callable").field(&self.0).finish()
    }
}
