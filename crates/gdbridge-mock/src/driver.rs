//! Engine-side actions a test performs the way the engine itself would:
//! constructing objects, calling methods by variant, invoking virtuals,
//! and driving the property and notification callbacks of extension classes.

use crate::classdb::{self, MethodDef};
use crate::object::{self, Extension, ObjRef};
use crate::value::{Cell, CellBox, Scratch, Var, cell_ref, default_typed, destroy_typed, var_from_typed, var_to_typed};
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use std::ffi::c_void;
use std::sync::Arc;

pub use crate::classdb::class_info;
pub use crate::object::is_alive;

/// A `StringName` slot the callbacks can read.
struct NameSlot(Option<CellBox>);

impl NameSlot {
    fn new(name: &str) -> Self {
        Self(Some(CellBox::new(Cell::StringName(name.to_owned()))))
    }

    fn ptr(&self) -> sys::ConstStringNamePtr {
        (&raw const self.0).cast()
    }
}

fn extension_of(ptr: sys::ObjectPtr) -> Option<Extension> {
    object::get(ptr)?.extension()
}

fn instance(extension: &Extension) -> sys::ClassInstancePtr {
    extension.instance as sys::ClassInstancePtr
}

/// Construct `class` through the class database. Refcounted objects come
/// back holding their first reference.
pub fn new_object(class: &str) -> Option<ObjRef> {
    let ptr = classdb::construct(class);
    let data = object::get(ptr)?;
    if data.is_refcounted() {
        object::init_ref(data);
    }
    Some(ObjRef::adopt(ptr))
}

/// Destroy an object outright, whatever its refcount.
pub fn free_object(ptr: sys::ObjectPtr) {
    object::destroy(ptr);
}

pub fn object_class(ptr: sys::ObjectPtr) -> Option<String> {
    object::get(ptr).map(|data| data.class())
}

pub fn reference_count(ptr: sys::ObjectPtr) -> Option<i64> {
    object::get(ptr).map(|data| data.refcount())
}

/// Signature hash the database holds for `class::method`.
pub fn method_hash(class: &str, method: &str) -> Option<i64> {
    classdb::find_method(class, method).map(|def| def.hash)
}

fn varcall(def: &Arc<MethodDef>, this: sys::ObjectPtr, args: &[Var]) -> Result<Var, sys::CallError> {
    let ptrs = args
        .iter()
        .map(|arg| (arg as *const Var).cast::<c_void>())
        .collect::<Vec<_>>();
    let mut ret = std::mem::MaybeUninit::<Var>::uninit();
    let mut error = sys::CallError::default();
    let bind: sys::MethodBindPtr = Arc::as_ptr(def).cast();
    let result = unsafe {
        classdb::object_method_bind_call(
            bind,
            this,
            ptrs.as_ptr(),
            ptrs.len() as sys::Int,
            ret.as_mut_ptr().cast(),
            &raw mut error,
        );
        ret.assume_init()
    };
    if error.error == u32::from(sys::CallErrorType::Ok) {
        Ok(result)
    } else {
        Err(error)
    }
}

fn invalid_method() -> sys::CallError {
    sys::CallError {
        error: sys::CallErrorType::InvalidMethod.into(),
        argument: 0,
        expected: 0,
    }
}

/// Call `method` on `object` with variant arguments, as a script would.
pub fn call_variant(object: sys::ObjectPtr, method: &str, args: &[Var]) -> Result<Var, sys::CallError> {
    let class = object_class(object).ok_or(sys::CallError {
        error: sys::CallErrorType::InstanceIsNull.into(),
        argument: 0,
        expected: 0,
    })?;
    let def = classdb::find_method(&class, method).ok_or_else(invalid_method)?;
    varcall(&def, object, args)
}

pub fn call_static(class: &str, method: &str, args: &[Var]) -> Result<Var, sys::CallError> {
    let def = classdb::find_method(class, method).ok_or_else(invalid_method)?;
    varcall(&def, std::ptr::null_mut(), args)
}

/// Invoke the virtual `name` an extension instance overrides. `None` when
/// the class does not override it.
pub fn call_virtual(object: sys::ObjectPtr, name: &str, args: &[Var], ret: VariantType) -> Option<Var> {
    let extension = extension_of(object)?;
    let info = extension.class.0;
    let (resolve, call) = (info.get_virtual_call_data_func?, info.call_virtual_with_data_func?);
    let name = NameSlot::new(name);
    let data = unsafe { resolve(info.class_userdata, name.ptr()) };
    if data.is_null() {
        return None;
    }

    let mut slots = args.iter().map(|_| Scratch::new()).collect::<Vec<_>>();
    let mut ptrs = Vec::with_capacity(args.len());
    for (arg, slot) in args.iter().zip(slots.iter_mut()) {
        match arg {
            Var::Object(object) => unsafe { slot.ptr().cast::<sys::ObjectPtr>().write(object.ptr()) },
            arg => unsafe { var_to_typed(arg.variant_type(), arg, slot.ptr()) },
        }
        ptrs.push(slot.ptr().cast_const());
    }

    let mut ret_slot = Scratch::new();
    if ret != VariantType::Object {
        unsafe { default_typed(ret, ret_slot.ptr()) };
    }
    unsafe {
        call(
            instance(&extension),
            name.ptr(),
            data,
            ptrs.as_ptr(),
            ptrs.len() as sys::Int,
            ret_slot.ptr(),
        )
    };

    let result = match ret {
        VariantType::Object => {
            let ptr = unsafe { ret_slot.ptr().cast::<sys::ObjectPtr>().read() };
            if ptr.is_null() { Var::Nil } else { Var::Object(ObjRef::adopt(ptr)) }
        }
        ty => unsafe {
            let value = var_from_typed(ty, ret_slot.ptr());
            destroy_typed(ty, ret_slot.ptr());
            value
        },
    };
    for (arg, slot) in args.iter().zip(slots.iter_mut()) {
        if !matches!(arg, Var::Object(_)) {
            unsafe { destroy_typed(arg.variant_type(), slot.ptr()) };
        }
    }
    Some(result)
}

/// Set a property through the instance's `set` callback.
pub fn set_property(object: sys::ObjectPtr, name: &str, value: &Var) -> bool {
    let Some(extension) = extension_of(object) else {
        return false;
    };
    let Some(set) = extension.class.0.set_func else {
        return false;
    };
    let name = NameSlot::new(name);
    let handled = unsafe { set(instance(&extension), name.ptr(), (value as *const Var).cast()) };
    handled != sys::FALSE
}

/// Read a property through the instance's `get` callback.
pub fn get_property(object: sys::ObjectPtr, name: &str) -> Option<Var> {
    let extension = extension_of(object)?;
    let get = extension.class.0.get_func?;
    let name = NameSlot::new(name);
    let mut out = Var::Nil;
    let handled = unsafe { get(instance(&extension), name.ptr(), (&raw mut out).cast()) };
    (handled != sys::FALSE).then_some(out)
}

/// Names and types from the instance's property list. The list is handed
/// back to the instance afterwards.
pub fn property_names(object: sys::ObjectPtr) -> Vec<(String, VariantType)> {
    let Some(extension) = extension_of(object) else {
        return Vec::new();
    };
    let info = extension.class.0;
    let Some(get_list) = info.get_property_list_func else {
        return Vec::new();
    };
    let mut count = 0u32;
    let list = unsafe { get_list(instance(&extension), &raw mut count) };
    if list.is_null() {
        return Vec::new();
    }
    let properties = unsafe { std::slice::from_raw_parts(list, count as usize) }
        .iter()
        .map(|property| {
            let name = unsafe { cell_ref(property.name) }
                .and_then(Cell::text)
                .unwrap_or_default()
                .to_owned();
            (name, VariantType::try_from(property.type_).unwrap_or(VariantType::Nil))
        })
        .collect();
    if let Some(free_list) = info.free_property_list_func {
        unsafe { free_list(instance(&extension), list, count) };
    }
    properties
}

/// Deliver notification `what` to the instance.
pub fn notify(object: sys::ObjectPtr, what: i32) {
    if let Some(extension) = extension_of(object) {
        if let Some(notification) = extension.class.0.notification_func {
            unsafe { notification(instance(&extension), what, sys::FALSE) };
        }
    }
}

/// The instance's own string form, `None` when it has none.
pub fn object_to_string(object: sys::ObjectPtr) -> Option<String> {
    let extension = extension_of(object)?;
    let render = extension.class.0.to_string_func?;
    let mut slot: Option<CellBox> = Some(CellBox::new(Cell::String(String::new())));
    let mut valid = sys::FALSE;
    unsafe { render(instance(&extension), &raw mut valid, (&raw mut slot).cast()) };
    if valid == sys::FALSE {
        return None;
    }
    slot.as_deref().and_then(Cell::text).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_varcall() {
        let gradient = new_object("Gradient").unwrap();
        let color = Var::pod(VariantType::Color, &[1.0f32, 0.0, 0.0, 1.0]);
        call_variant(gradient.ptr(), "add_point", &[Var::Float(0.0), color.clone()]).unwrap();
        let count = call_variant(gradient.ptr(), "get_point_count", &[]).unwrap();
        assert_eq!(count, Var::Int(1));
        assert_eq!(call_variant(gradient.ptr(), "sample", &[Var::Float(0.5)]).unwrap(), color);
    }

    #[test]
    fn test_varcall_errors() {
        let echo = new_object("Echo").unwrap();
        let few = call_variant(echo.ptr(), "identity_int", &[]).unwrap_err();
        assert_eq!(few.error, u32::from(sys::CallErrorType::TooFewArguments));
        assert_eq!(few.expected, 1);
        let wrong = call_variant(echo.ptr(), "identity_int", &[Var::Float(1.0)]).unwrap_err();
        assert_eq!(wrong.error, u32::from(sys::CallErrorType::InvalidArgument));
        assert_eq!(wrong.argument, 0);
        let sum = call_static("Echo", "static_sum", &[Var::Int(2), Var::Int(5)]).unwrap();
        assert_eq!(sum, Var::Int(7));
    }

    #[test]
    fn test_refcounted_object_freed_with_last_reference() {
        let holder = new_object("Holder").unwrap();
        let ptr = holder.ptr();
        assert_eq!(reference_count(ptr), Some(1));
        let extra = holder.clone();
        assert_eq!(reference_count(ptr), Some(2));
        drop(holder);
        drop(extra);
        assert!(!is_alive(ptr));
    }
}
