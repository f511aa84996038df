//! The class database: native classes, extension classes and method binds.
//!
//! A method bind is the address of a [`MethodDef`] kept in [`BINDS`]; both
//! call paths look the address up before touching it.

use crate::natives::{self, NativeCall, NativeFn};
use crate::object::{self, ExtClass, ObjData, ObjRef};
use crate::stats;
use crate::value::{
    Cell, Scratch, Var, cell_ref, default_typed, destroy_typed, var_from_typed, var_to_typed,
};
use gdbridge_sys as sys;
use gdbridge_sys::{CallErrorType, MethodFlags, VariantType};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::ffi::c_void;
use std::sync::{Arc, LazyLock};
use xxhash_rust::xxh64::xxh64;

static CLASSES: LazyLock<RwLock<FxHashMap<String, ClassDef>>> = LazyLock::new(|| {
    let classes = natives::native_classes()
        .into_iter()
        .map(|class| (class.name.clone(), class))
        .collect::<FxHashMap<_, _>>();
    let binds = classes
        .values()
        .flat_map(|class| class.methods.values())
        .map(|method| (Arc::as_ptr(method) as usize, method.clone()))
        .collect::<FxHashMap<_, _>>();
    BINDS.write().extend(binds);
    RwLock::new(classes)
});

static BINDS: LazyLock<RwLock<FxHashMap<usize, Arc<MethodDef>>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

/// Most arguments any method in the database takes.
const MAX_ARGS: usize = 8;

/// How a parameter or return value travels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Param {
    Value(VariantType),
    /// Object of the named class.
    Object(String),
    Variant,
}

impl Param {
    pub(crate) fn from_info(info: &sys::PropertyInfo) -> Self {
        match VariantType::try_from(info.type_) {
            Ok(VariantType::Nil) | Err(_) => Param::Variant,
            Ok(VariantType::Object) => {
                let class = unsafe { cell_ref(info.class_name) }
                    .and_then(Cell::text)
                    .filter(|name| !name.is_empty())
                    .unwrap_or("Object");
                Param::Object(class.to_owned())
            }
            Ok(ty) => Param::Value(ty),
        }
    }

    /// Name used in signature hashes.
    pub fn label(&self) -> &str {
        match self {
            Param::Value(ty) => ty.name(),
            Param::Object(class) => class,
            Param::Variant => "Variant",
        }
    }

    pub fn variant_type(&self) -> VariantType {
        match self {
            Param::Value(ty) => *ty,
            Param::Object(_) => VariantType::Object,
            Param::Variant => VariantType::Nil,
        }
    }

    fn accepts(&self, value: &Var) -> bool {
        match self {
            Param::Value(ty) => value.variant_type() == *ty,
            Param::Object(_) => matches!(value, Var::Object(_) | Var::Nil),
            Param::Variant => true,
        }
    }
}

/// Signature hash as the engine computes it.
pub fn signature_hash(method: &str, params: &[Param], ret: Option<&Param>) -> i64 {
    let labels = params.iter().map(Param::label).collect::<Vec<_>>();
    let mut text = format!("{method}({})", labels.join(","));
    if let Some(ret) = ret {
        text.push_str("->");
        text.push_str(ret.label());
    }
    (xxh64(text.as_bytes(), 0) & 0xFFFF_FFFF) as i64
}

pub(crate) enum MethodKind {
    Native(NativeFn),
    Extension {
        userdata: usize,
        call: Option<sys::ClassMethodCallFn>,
        ptrcall: Option<sys::ClassMethodPtrCallFn>,
    },
}

pub(crate) struct MethodDef {
    pub(crate) class: String,
    pub(crate) name: String,
    pub(crate) hash: i64,
    pub(crate) params: Vec<Param>,
    pub(crate) ret: Option<Param>,
    pub(crate) is_static: bool,
    /// The method keeps the references passed in object arguments.
    pub(crate) adopts_objects: bool,
    pub(crate) kind: MethodKind,
}

impl MethodDef {
    pub(crate) fn native(
        class: &str,
        name: &str,
        params: Vec<Param>,
        ret: Option<Param>,
        function: NativeFn,
    ) -> Self {
        Self {
            class: class.to_owned(),
            name: name.to_owned(),
            hash: signature_hash(name, &params, ret.as_ref()),
            params,
            ret,
            is_static: false,
            adopts_objects: false,
            kind: MethodKind::Native(function),
        }
    }

    pub(crate) fn with_hash(mut self, hash: i64) -> Self {
        self.hash = hash;
        self
    }

    pub(crate) fn into_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub(crate) fn adopting(mut self) -> Self {
        self.adopts_objects = true;
        self
    }
}

#[derive(Clone, Debug)]
pub struct PropertyDef {
    pub name: String,
    pub ty: VariantType,
}

#[derive(Clone, Debug)]
pub struct SignalDef {
    pub name: String,
    pub args: Vec<(String, VariantType)>,
}

pub(crate) struct ClassDef {
    pub(crate) name: String,
    pub(crate) parent: Option<String>,
    pub(crate) refcounted: bool,
    /// Leaked copy of the name; its address is the class tag.
    tag: &'static String,
    pub(crate) methods: FxHashMap<String, Arc<MethodDef>>,
    pub(crate) properties: Vec<PropertyDef>,
    pub(crate) signals: Vec<SignalDef>,
    pub(crate) extension: Option<ExtClass>,
}

impl ClassDef {
    pub(crate) fn native(name: &str, parent: Option<&str>, refcounted: bool) -> Self {
        Self {
            name: name.to_owned(),
            parent: parent.map(str::to_owned),
            refcounted,
            tag: Box::leak(Box::new(name.to_owned())),
            methods: FxHashMap::default(),
            properties: Vec::new(),
            signals: Vec::new(),
            extension: None,
        }
    }

    pub(crate) fn method(mut self, method: MethodDef) -> Self {
        self.methods.insert(method.name.clone(), Arc::new(method));
        self
    }
}

/// Public description of a class, for assertions.
#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: String,
    pub parent: Option<String>,
    pub refcounted: bool,
    pub is_extension: bool,
    pub methods: Vec<String>,
    pub properties: Vec<PropertyDef>,
    pub signals: Vec<SignalDef>,
}

pub fn class_info(name: &str) -> Option<ClassInfo> {
    let classes = CLASSES.read();
    let class = classes.get(name)?;
    let mut methods = class.methods.keys().cloned().collect::<Vec<_>>();
    methods.sort_unstable();
    Some(ClassInfo {
        name: class.name.clone(),
        parent: class.parent.clone(),
        refcounted: class.refcounted,
        is_extension: class.extension.is_some(),
        methods,
        properties: class.properties.clone(),
        signals: class.signals.clone(),
    })
}

pub(crate) fn inherits(class: &str, ancestor: &str) -> bool {
    let classes = CLASSES.read();
    let mut current = Some(class);
    while let Some(name) = current {
        if name == ancestor {
            return true;
        }
        current = classes.get(name).and_then(|def| def.parent.as_deref());
    }
    false
}

pub(crate) fn find_method(class: &str, method: &str) -> Option<Arc<MethodDef>> {
    let classes = CLASSES.read();
    let mut current = classes.get(class);
    while let Some(def) = current {
        if let Some(found) = def.methods.get(method) {
            return Some(found.clone());
        }
        current = def.parent.as_deref().and_then(|parent| classes.get(parent));
    }
    None
}

pub(crate) fn extension_info(class: &str) -> Option<ExtClass> {
    CLASSES.read().get(class).and_then(|def| def.extension)
}

pub(crate) fn tag_name(tag: *mut c_void) -> Option<&'static str> {
    if tag.is_null() {
        return None;
    }
    let classes = CLASSES.read();
    classes
        .values()
        .find(|def| std::ptr::eq(def.tag, tag.cast::<String>()))
        .map(|def| def.tag.as_str())
}

fn lookup_bind(bind: sys::MethodBindPtr) -> Option<Arc<MethodDef>> {
    let found = BINDS.read().get(&(bind as usize)).cloned();
    if found.is_none() {
        stats::record_invalid_access();
        tracing::warn!(?bind, "call through an unknown method bind");
    }
    found
}

unsafe fn name_arg<'a>(name: sys::ConstStringNamePtr) -> Option<&'a str> {
    unsafe { cell_ref(name) }.and_then(Cell::text)
}

// ========== CONSTRUCTION ==========

/// Construct `class` the way `classdb_construct_object` does.
pub(crate) fn construct(class: &str) -> sys::ObjectPtr {
    let (refcounted, extension) = {
        let classes = CLASSES.read();
        let Some(def) = classes.get(class) else {
            tracing::warn!(class, "construct of an unknown class");
            return std::ptr::null_mut();
        };
        (def.refcounted, def.extension)
    };

    let ptr = match extension {
        Some(ExtClass(info)) => {
            let Some(create) = info.create_instance_func.filter(|_| info.is_abstract == sys::FALSE)
            else {
                tracing::warn!(class, "construct of an abstract class");
                return std::ptr::null_mut();
            };
            unsafe { create(info.class_userdata) }
        }
        None => object::create(class, refcounted, natives::initial_state(class)),
    };
    if !ptr.is_null() {
        stats::record_constructed(class);
    }
    ptr
}

pub(crate) unsafe extern "C" fn classdb_construct_object(
    class_name: sys::ConstStringNamePtr,
) -> sys::ObjectPtr {
    match unsafe { name_arg(class_name) } {
        Some(class) => construct(class),
        None => std::ptr::null_mut(),
    }
}

pub(crate) unsafe extern "C" fn classdb_get_method_bind(
    class_name: sys::ConstStringNamePtr,
    method_name: sys::ConstStringNamePtr,
    hash: sys::Int,
) -> sys::MethodBindPtr {
    let (Some(class), Some(method)) = (unsafe { name_arg(class_name) }, unsafe { name_arg(method_name) })
    else {
        return std::ptr::null();
    };
    match find_method(class, method) {
        Some(def) if def.hash == hash => Arc::as_ptr(&def).cast(),
        Some(def) => {
            tracing::debug!(class, method, hash, known = def.hash, "method hash mismatch");
            std::ptr::null()
        }
        None => std::ptr::null(),
    }
}

pub(crate) unsafe extern "C" fn classdb_get_method_hash(
    class_name: sys::ConstStringNamePtr,
    method_name: sys::ConstStringNamePtr,
) -> sys::Int {
    let (Some(class), Some(method)) = (unsafe { name_arg(class_name) }, unsafe { name_arg(method_name) })
    else {
        return 0;
    };
    find_method(class, method).map_or(0, |def| def.hash)
}

pub(crate) unsafe extern "C" fn classdb_get_class_tag(class_name: sys::ConstStringNamePtr) -> *mut c_void {
    let Some(class) = (unsafe { name_arg(class_name) }) else {
        return std::ptr::null_mut();
    };
    CLASSES
        .read()
        .get(class)
        .map_or(std::ptr::null_mut(), |def| (def.tag as *const String).cast_mut().cast())
}

// ========== EXTENSION REGISTRATION ==========

pub(crate) unsafe extern "C" fn classdb_register_extension_class(
    _library: sys::ClassLibraryPtr,
    class_name: sys::ConstStringNamePtr,
    parent_class_name: sys::ConstStringNamePtr,
    info: *const sys::ClassCreationInfo,
) {
    let (Some(class), Some(parent), Some(info)) = (
        unsafe { name_arg(class_name) },
        unsafe { name_arg(parent_class_name) },
        unsafe { info.as_ref() },
    ) else {
        return;
    };
    let mut classes = CLASSES.write();
    if classes.contains_key(class) {
        crate::report_error(format!("class '{class}' is already registered"));
        return;
    }
    let Some(parent_refcounted) = classes.get(parent).map(|def| def.refcounted) else {
        crate::report_error(format!("parent class '{parent}' of '{class}' does not exist"));
        return;
    };
    let mut def = ClassDef::native(class, Some(parent), parent_refcounted);
    def.extension = Some(ExtClass(*info));
    classes.insert(class.to_owned(), def);
    tracing::debug!(class, parent, "extension class registered");
}

pub(crate) unsafe extern "C" fn classdb_register_extension_class_method(
    _library: sys::ClassLibraryPtr,
    class_name: sys::ConstStringNamePtr,
    info: *const sys::ClassMethodInfo,
) {
    let (Some(class), Some(info)) = (unsafe { name_arg(class_name) }, unsafe { info.as_ref() }) else {
        return;
    };
    let Some(name) = (unsafe { name_arg(info.name) }) else {
        return;
    };
    let params = (0..info.argument_count as usize)
        .map(|index| Param::from_info(unsafe { &*info.arguments_info.add(index) }))
        .collect::<Vec<_>>();
    let ret = (info.has_return_value != sys::FALSE)
        .then(|| unsafe { info.return_value_info.as_ref() })
        .flatten()
        .map(Param::from_info);
    let flags = MethodFlags::from_bits_truncate(info.method_flags);

    let method = Arc::new(MethodDef {
        class: class.to_owned(),
        name: name.to_owned(),
        hash: signature_hash(name, &params, ret.as_ref()),
        params,
        ret,
        is_static: flags.contains(MethodFlags::STATIC),
        adopts_objects: false,
        kind: MethodKind::Extension {
            userdata: info.method_userdata as usize,
            call: info.call_func,
            ptrcall: info.ptrcall_func,
        },
    });

    let mut classes = CLASSES.write();
    let Some(def) = classes.get_mut(class) else {
        crate::report_error(format!("method '{name}' registered on unknown class '{class}'"));
        return;
    };
    BINDS.write().insert(Arc::as_ptr(&method) as usize, method.clone());
    def.methods.insert(name.to_owned(), method);
}

pub(crate) unsafe extern "C" fn classdb_register_extension_class_property(
    _library: sys::ClassLibraryPtr,
    class_name: sys::ConstStringNamePtr,
    info: *const sys::PropertyInfo,
    _setter: sys::ConstStringNamePtr,
    _getter: sys::ConstStringNamePtr,
) {
    let (Some(class), Some(info)) = (unsafe { name_arg(class_name) }, unsafe { info.as_ref() }) else {
        return;
    };
    let Some(name) = (unsafe { name_arg(info.name) }) else {
        return;
    };
    let ty = VariantType::try_from(info.type_).unwrap_or(VariantType::Nil);
    if let Some(def) = CLASSES.write().get_mut(class) {
        def.properties.push(PropertyDef {
            name: name.to_owned(),
            ty,
        });
    }
}

pub(crate) unsafe extern "C" fn classdb_register_extension_class_signal(
    _library: sys::ClassLibraryPtr,
    class_name: sys::ConstStringNamePtr,
    signal_name: sys::ConstStringNamePtr,
    argument_info: *const sys::PropertyInfo,
    argument_count: sys::Int,
) {
    let (Some(class), Some(name)) = (unsafe { name_arg(class_name) }, unsafe { name_arg(signal_name) })
    else {
        return;
    };
    let args = (0..argument_count.max(0) as usize)
        .map(|index| {
            let info = unsafe { &*argument_info.add(index) };
            let name = unsafe { name_arg(info.name) }.unwrap_or_default().to_owned();
            (name, VariantType::try_from(info.type_).unwrap_or(VariantType::Nil))
        })
        .collect();
    if let Some(def) = CLASSES.write().get_mut(class) {
        def.signals.push(SignalDef {
            name: name.to_owned(),
            args,
        });
    }
}

pub(crate) unsafe extern "C" fn classdb_unregister_extension_class(
    _library: sys::ClassLibraryPtr,
    class_name: sys::ConstStringNamePtr,
) {
    let Some(class) = (unsafe { name_arg(class_name) }) else {
        return;
    };
    let mut classes = CLASSES.write();
    let has_children = classes
        .values()
        .any(|def| def.parent.as_deref() == Some(class));
    if has_children {
        crate::report_error(format!("class '{class}' still has subclasses"));
        return;
    }
    match classes.remove(class) {
        Some(def) if def.extension.is_some() => {
            let mut binds = BINDS.write();
            for method in def.methods.values() {
                binds.remove(&(Arc::as_ptr(method) as usize));
            }
            tracing::debug!(class, "extension class unregistered");
        }
        Some(def) => {
            crate::report_error(format!("class '{class}' is not an extension class"));
            classes.insert(class.to_owned(), def);
        }
        None => crate::report_error(format!("class '{class}' is not registered")),
    }
}

// ========== DISPATCH ==========

/// Run `def` on typed arguments. Object arguments carry a reference the
/// engine owns for the call; it is released afterwards unless the method
/// keeps it.
unsafe fn invoke(
    def: &MethodDef,
    this: Option<&ObjData>,
    args: *const sys::ConstTypePtr,
    ret: sys::TypePtr,
) {
    let args: &[sys::ConstTypePtr] = if def.params.is_empty() || args.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(args, def.params.len()) }
    };

    match &def.kind {
        MethodKind::Native(function) => {
            let call = unsafe { NativeCall::new(def, this, args, ret) };
            function(&call);
        }
        MethodKind::Extension { userdata, ptrcall, .. } => {
            let instance = this
                .and_then(ObjData::extension)
                .map_or(std::ptr::null_mut(), |ext| ext.instance as sys::ClassInstancePtr);
            if let Some(ptrcall) = *ptrcall {
                unsafe { ptrcall(*userdata as *mut c_void, instance, args.as_ptr(), ret) };
            }
        }
    }

    if !def.adopts_objects {
        for (param, arg) in def.params.iter().zip(args) {
            if matches!(param, Param::Object(_)) {
                let ptr = unsafe { arg.cast::<sys::ObjectPtr>().read_unaligned() };
                drop(ObjRef::adopt(ptr));
            }
        }
    }
}

pub(crate) unsafe extern "C" fn object_method_bind_ptrcall(
    method_bind: sys::MethodBindPtr,
    instance: sys::ObjectPtr,
    args: *const sys::ConstTypePtr,
    r_ret: sys::TypePtr,
) {
    stats::record_ptrcall();
    let Some(def) = lookup_bind(method_bind) else {
        return;
    };
    let this = if def.is_static {
        None
    } else {
        match object::get(instance) {
            Some(data) => Some(data),
            None => {
                crate::report_error(format!("{}::{} called on a dead object", def.class, def.name));
                return;
            }
        }
    };
    tracing::trace!(class = %def.class, method = %def.name, "ptrcall");
    unsafe { invoke(&def, this, args, r_ret) };
}

fn call_error(error: CallErrorType, argument: i32, expected: i32) -> sys::CallError {
    sys::CallError {
        error: error.into(),
        argument,
        expected,
    }
}

/// Check a variant call's receiver and arguments.
fn check_varcall(
    def: &MethodDef,
    this: Option<&ObjData>,
    args: &[&Var],
) -> Result<(), sys::CallError> {
    if !def.is_static && this.is_none() {
        return Err(call_error(CallErrorType::InstanceIsNull, 0, 0));
    }
    let expected = def.params.len() as i32;
    if args.len() < def.params.len() {
        return Err(call_error(CallErrorType::TooFewArguments, 0, expected));
    }
    if args.len() > def.params.len() {
        return Err(call_error(CallErrorType::TooManyArguments, 0, expected));
    }
    for (index, (param, arg)) in def.params.iter().zip(args).enumerate() {
        if !param.accepts(arg) {
            return Err(call_error(
                CallErrorType::InvalidArgument,
                index as i32,
                param.variant_type().raw() as i32,
            ));
        }
    }
    Ok(())
}

/// Native varcall: convert to typed slots, ptrcall, box the result.
unsafe fn varcall_native(def: &MethodDef, this: Option<&ObjData>, args: &[&Var]) -> Var {
    let mut slots: [Scratch; MAX_ARGS] = std::array::from_fn(|_| Scratch::new());
    let mut ptrs: Vec<sys::ConstTypePtr> = Vec::with_capacity(args.len());
    for ((param, arg), slot) in def.params.iter().zip(args).zip(slots.iter_mut()) {
        match param {
            Param::Value(ty) => unsafe { var_to_typed(*ty, arg, slot.ptr()) },
            Param::Object(_) => {
                let ptr = match arg {
                    Var::Object(object) => ObjRef::acquire(object.ptr()).into_ptr(),
                    _ => std::ptr::null_mut(),
                };
                unsafe { slot.ptr().cast::<sys::ObjectPtr>().write(ptr) };
            }
            Param::Variant => {
                ptrs.push((*arg as *const Var).cast());
                continue;
            }
        }
        ptrs.push(slot.ptr().cast_const());
    }

    let mut ret = Scratch::new();
    match &def.ret {
        Some(Param::Value(ty)) => unsafe { default_typed(*ty, ret.ptr()) },
        Some(Param::Variant) => unsafe { ret.ptr().cast::<Var>().write(Var::Nil) },
        Some(Param::Object(_)) | None => {}
    }

    unsafe { invoke(def, this, ptrs.as_ptr(), ret.ptr()) };

    let result = match &def.ret {
        Some(Param::Value(ty)) => unsafe {
            let boxed = var_from_typed(*ty, ret.ptr());
            destroy_typed(*ty, ret.ptr());
            boxed
        },
        Some(Param::Object(_)) => {
            let ptr = unsafe { ret.ptr().cast::<sys::ObjectPtr>().read() };
            if ptr.is_null() {
                Var::Nil
            } else {
                Var::Object(ObjRef::adopt(ptr))
            }
        }
        Some(Param::Variant) => unsafe { ret.ptr().cast::<Var>().read() },
        None => Var::Nil,
    };

    for (param, slot) in def.params.iter().zip(slots.iter_mut()) {
        if let Param::Value(ty) = param {
            unsafe { destroy_typed(*ty, slot.ptr()) };
        }
    }
    result
}

pub(crate) unsafe extern "C" fn object_method_bind_call(
    method_bind: sys::MethodBindPtr,
    instance: sys::ObjectPtr,
    args: *const sys::ConstVariantPtr,
    argc: sys::Int,
    r_ret: sys::UninitVariantPtr,
    r_error: *mut sys::CallError,
) {
    stats::record_varcall();
    unsafe { r_ret.cast::<Var>().write(Var::Nil) };
    let set_error = |error: sys::CallError| {
        if !r_error.is_null() {
            unsafe { *r_error = error };
        }
    };
    set_error(sys::CallError::default());

    let Some(def) = lookup_bind(method_bind) else {
        set_error(call_error(CallErrorType::InvalidMethod, 0, 0));
        return;
    };
    let this = if instance.is_null() { None } else { object::get(instance) };
    let argc = argc.max(0) as usize;
    let values: Vec<&Var> = if argc == 0 || args.is_null() {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(args, argc) }
            .iter()
            .map(|arg| unsafe { &*arg.cast::<Var>() })
            .collect()
    };

    if let Err(error) = check_varcall(&def, this, &values) {
        set_error(error);
        return;
    }
    if values.len() > MAX_ARGS {
        set_error(call_error(CallErrorType::TooManyArguments, 0, MAX_ARGS as i32));
        return;
    }

    match &def.kind {
        &MethodKind::Extension { userdata, call: Some(call), .. } => {
            let instance = this
                .and_then(ObjData::extension)
                .map_or(std::ptr::null_mut(), |ext| ext.instance as sys::ClassInstancePtr);
            unsafe { call(userdata as *mut c_void, instance, args, argc as sys::Int, r_ret, r_error) };
        }
        MethodKind::Extension { call: None, .. } => {
            set_error(call_error(CallErrorType::InvalidMethod, 0, 0));
        }
        MethodKind::Native(_) => {
            let result = unsafe { varcall_native(&def, this, &values) };
            unsafe { *r_ret.cast::<Var>() = result };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_hash_labels() {
        let a = signature_hash("hold", &[Param::Object("Object".into())], None);
        let b = signature_hash("hold", &[Param::Value(VariantType::Object)], None);
        assert_eq!(a, b);
        let c = signature_hash("identity_Variant", &[Param::Variant], Some(&Param::Variant));
        assert!((0..=u32::MAX as i64).contains(&c));
    }

    #[test]
    fn test_native_hierarchy() {
        assert!(inherits("Gradient", "RefCounted"));
        assert!(inherits("Node", "Object"));
        assert!(!inherits("Node", "RefCounted"));
        assert!(find_method("Gradient", "get_reference_count").is_some());
        assert!(find_method("Node", "reference").is_none());
    }

    #[test]
    fn test_param_accepts() {
        assert!(Param::Variant.accepts(&Var::Int(1)));
        assert!(Param::Value(VariantType::Int).accepts(&Var::Int(1)));
        assert!(!Param::Value(VariantType::Int).accepts(&Var::Float(1.0)));
        assert!(Param::Object("Object".into()).accepts(&Var::Nil));
    }
}
