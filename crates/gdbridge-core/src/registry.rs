//! Host-defined classes registered with the engine's class database.
//!
//! A class is described once with [`ClassBuilder`] and installed with
//! [`register_class`]. The record is leaked: the engine keeps raw pointers
//! into it for as long as the class exists, and teardown of the class
//! database is the engine's business.
//!
//! Every engine-to-host callback runs inside [`guarded`], which turns host
//! errors and panics into an engine-side error log and leaves the engine's
//! return buffer holding the well-formed default it was handed.

use crate::codec::{CallbackArgs, CallbackRet, EngineValue};
use crate::error::{BridgeError, BridgeResult};
use crate::interface;
use crate::obj::{Base, GodotClass, RawGd};
use crate::string::{GString, StringName};
use gdbridge_sys as sys;
use gdbridge_sys::{CallErrorType, VariantType};
use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::FxHashMap;
use std::any::TypeId;
use std::cell::RefCell;
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, Ordering};

/// Registered class names, in registration order.
static REGISTERED: LazyLock<Mutex<Vec<Box<str>>>> = LazyLock::new(|| Mutex::new(Vec::new()));

/// A host type that backs an extension class.
pub trait HostClass: Send + 'static {
    /// Engine class the extension derives from.
    type Base: GodotClass;
}

// ========== CALLBACK GUARD ==========

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_owned();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "non-string panic payload".to_owned()
}

/// Run `f`, catching errors and panics, and report failures.
pub(crate) fn catch_callback(
    label: &str,
    f: impl FnOnce() -> BridgeResult<()>,
) -> BridgeResult<()> {
    let err = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => err,
        Err(payload) => BridgeError::Panic(panic_message(payload.as_ref())),
    };
    tracing::error!(target: "gdbridge::callback", callback = label, "{err}");
    if crate::init::config().report_callback_errors {
        interface::print_error_to_engine(&format!("{label}: {err}"), label, file!(), line!());
    }
    Err(err)
}

/// Run a callback body; `false` when it failed and was reported.
pub fn guarded(label: &str, f: impl FnOnce() -> BridgeResult<()>) -> bool {
    catch_callback(label, f).is_ok()
}

// ========== ARGUMENT TUPLES ==========

/// Argument list of a host method or virtual, decoded from a callback buffer.
pub trait FromCallbackArgs: Sized {
    const ARITY: usize;

    fn arg_types() -> Vec<VariantType>;

    fn from_args(args: &CallbackArgs<'_>) -> BridgeResult<Self>;
}

macro_rules! impl_from_callback_args {
    ($arity:expr; $($name:ident : $index:tt),*) => {
        impl<$($name: EngineValue),*> FromCallbackArgs for ($($name,)*) {
            const ARITY: usize = $arity;

            fn arg_types() -> Vec<VariantType> {
                vec![$($name::VARIANT_TYPE),*]
            }

            #[allow(unused_variables)]
            fn from_args(args: &CallbackArgs<'_>) -> BridgeResult<Self> {
                args.expect_arity($arity)?;
                Ok(($(args.get::<$name>($index)?,)*))
            }
        }
    };
}

impl_from_callback_args!(0;);
impl_from_callback_args!(1; A: 0);
impl_from_callback_args!(2; A: 0, B: 1);
impl_from_callback_args!(3; A: 0, B: 1, C: 2);
impl_from_callback_args!(4; A: 0, B: 1, C: 2, D: 3);
impl_from_callback_args!(5; A: 0, B: 1, C: 2, D: 3, E: 4);

// ========== RECORDS ==========

type ErasedCall<T> =
    Box<dyn Fn(&mut T, &CallbackArgs<'_>, CallbackRet) -> BridgeResult<()> + Send + Sync>;
type Getter<T> = Box<dyn Fn(&T, CallbackRet) -> BridgeResult<()> + Send + Sync>;
type Setter<T> = Box<dyn Fn(&mut T, &CallbackArgs<'_>) -> BridgeResult<()> + Send + Sync>;

struct MethodRecord<T> {
    name: String,
    label: String,
    arg_types: Vec<VariantType>,
    ret_type: Option<VariantType>,
    call: ErasedCall<T>,
}

struct PropertyRecord<T> {
    name: String,
    ty: VariantType,
    get: Getter<T>,
    set: Setter<T>,
}

struct SignalRecord {
    name: String,
    args: Vec<(String, VariantType)>,
}

/// Everything the registry knows about one extension class.
pub struct ClassRecord<T: HostClass> {
    name: String,
    constructor: Option<Box<dyn Fn(Base<T::Base>) -> T + Send + Sync>>,
    destructor: Option<Box<dyn Fn(&mut T) + Send + Sync>>,
    virtuals: Vec<MethodRecord<T>>,
    methods: Vec<MethodRecord<T>>,
    properties: Vec<PropertyRecord<T>>,
    property_index: FxHashMap<String, usize>,
    signals: Vec<SignalRecord>,
    notification: Option<Box<dyn Fn(&mut T, i32) + Send + Sync>>,
    to_string: Option<Box<dyn Fn(&T) -> String + Send + Sync>>,
}

impl<T: HostClass> ClassRecord<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> &'static str {
        <T::Base as GodotClass>::CLASS_NAME
    }

    fn virtual_named(&self, name: &str) -> Option<&MethodRecord<T>> {
        self.virtuals.iter().find(|record| record.name == name)
    }
}

impl<T: HostClass> std::fmt::Debug for ClassRecord<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRecord").field("name", &self.name).finish_non_exhaustive()
    }
}

fn erase<T, A, R, F>(function: F) -> ErasedCall<T>
where
    A: FromCallbackArgs,
    R: EngineValue,
    F: Fn(&mut T, A) -> BridgeResult<R> + Send + Sync + 'static,
{
    Box::new(move |this, args, ret| {
        let args = A::from_args(args)?;
        function(this, args)?.encode_callback_ret(ret)
    })
}

fn ret_type<R: EngineValue>() -> Option<VariantType> {
    (size_of::<R>() != 0).then_some(R::VARIANT_TYPE)
}

/// Fluent description of an extension class.
///
/// ```ignore
/// ClassBuilder::<Greeter>::new("Greeter")
///     .constructor(|base| Greeter { base, greeting: "hi".into() })
///     .virtual_method("_get_message", |this, (src, _ctx): (StringName, StringName)| {
///         StringName::new(&format!("{}:{src}", this.greeting))
///     })
///     .register()?;
/// ```
pub struct ClassBuilder<T: HostClass> {
    record: ClassRecord<T>,
}

impl<T: HostClass> ClassBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            record: ClassRecord {
                name: name.into(),
                constructor: None,
                destructor: None,
                virtuals: Vec::new(),
                methods: Vec::new(),
                properties: Vec::new(),
                property_index: FxHashMap::default(),
                signals: Vec::new(),
                notification: None,
                to_string: None,
            },
        }
    }

    /// Without a constructor the class is abstract.
    pub fn constructor(
        mut self,
        constructor: impl Fn(Base<T::Base>) -> T + Send + Sync + 'static,
    ) -> Self {
        self.record.constructor = Some(Box::new(constructor));
        self
    }

    /// Runs before the host instance is dropped.
    pub fn destructor(mut self, destructor: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.record.destructor = Some(Box::new(destructor));
        self
    }

    /// Override the engine virtual `name`.
    pub fn virtual_method<A, R, F>(mut self, name: &str, function: F) -> Self
    where
        A: FromCallbackArgs,
        R: EngineValue,
        F: Fn(&mut T, A) -> BridgeResult<R> + Send + Sync + 'static,
    {
        self.record.virtuals.push(MethodRecord {
            name: name.to_owned(),
            label: format!("{}::{name}", self.record.name),
            arg_types: A::arg_types(),
            ret_type: ret_type::<R>(),
            call: erase(function),
        });
        self
    }

    /// Export a method callable from the engine.
    pub fn method<A, R, F>(mut self, name: &str, function: F) -> Self
    where
        A: FromCallbackArgs,
        R: EngineValue,
        F: Fn(&mut T, A) -> BridgeResult<R> + Send + Sync + 'static,
    {
        self.record.methods.push(MethodRecord {
            name: name.to_owned(),
            label: format!("{}::{name}", self.record.name),
            arg_types: A::arg_types(),
            ret_type: ret_type::<R>(),
            call: erase(function),
        });
        self
    }

    /// A property of kind `V`, read and written through the engine's
    /// set and get callbacks.
    pub fn property<V, G, S>(mut self, name: &str, getter: G, setter: S) -> Self
    where
        V: EngineValue,
        G: Fn(&T) -> BridgeResult<V> + Send + Sync + 'static,
        S: Fn(&mut T, V) -> BridgeResult<()> + Send + Sync + 'static,
    {
        let index = self.record.properties.len();
        self.record.properties.push(PropertyRecord {
            name: name.to_owned(),
            ty: V::VARIANT_TYPE,
            get: Box::new(move |this, ret| getter(this)?.encode_callback_ret(ret)),
            set: Box::new(move |this, args| {
                let value = args.get::<V>(0)?;
                setter(this, value)
            }),
        });
        self.record.property_index.insert(name.to_owned(), index);
        self
    }

    pub fn signal(mut self, name: &str, args: &[(&str, VariantType)]) -> Self {
        self.record.signals.push(SignalRecord {
            name: name.to_owned(),
            args: args
                .iter()
                .map(|(arg, ty)| ((*arg).to_owned(), *ty))
                .collect(),
        });
        self
    }

    pub fn on_notification(mut self, handler: impl Fn(&mut T, i32) + Send + Sync + 'static) -> Self {
        self.record.notification = Some(Box::new(handler));
        self
    }

    pub fn to_string(mut self, render: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.record.to_string = Some(Box::new(render));
        self
    }

    pub fn build(self) -> ClassRecord<T> {
        self.record
    }

    pub fn register(self) -> BridgeResult<&'static ClassRecord<T>> {
        register_class(self.build())
    }
}

// ========== INSTANCES ==========

/// Host side of one engine object of an extension class.
///
/// `type_id` comes first so a binding pointer can be checked before it is
/// treated as a storage of a particular `T`.
#[repr(C)]
struct InstanceStorage<T: HostClass> {
    type_id: TypeId,
    record: &'static ClassRecord<T>,
    object: sys::ObjectPtr,
    engine_refs: AtomicI64,
    instance: ReentrantMutex<RefCell<T>>,
    property_lists: Mutex<FxHashMap<usize, PropertyList>>,
}

// The object pointer is only passed back to the engine.
unsafe impl<T: HostClass> Send for InstanceStorage<T> {}
unsafe impl<T: HostClass> Sync for InstanceStorage<T> {}

impl<T: HostClass> InstanceStorage<T> {
    fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> BridgeResult<R>) -> BridgeResult<R> {
        let guard = self.instance.lock();
        let mut instance = guard
            .try_borrow_mut()
            .map_err(|_| BridgeError::InstanceBusy(self.record.name.clone()))?;
        f(&mut instance)
    }

    fn with_ref<R>(&self, f: impl FnOnce(&T) -> BridgeResult<R>) -> BridgeResult<R> {
        let guard = self.instance.lock();
        let instance = guard
            .try_borrow()
            .map_err(|_| BridgeError::InstanceBusy(self.record.name.clone()))?;
        f(&instance)
    }
}

/// Engine-side copy of the property list handed out by `get_property_list`.
struct PropertyList {
    infos: Vec<sys::PropertyInfo>,
    // Keeps the cells the infos point into alive.
    _names: Vec<StringName>,
    _class_name: StringName,
    _hint: GString,
}

// PropertyInfo holds pointers into the cells kept alongside it.
unsafe impl Send for PropertyList {}

static BINDING_CALLBACKS: sys::InstanceBindingCallbacks = sys::InstanceBindingCallbacks {
    create_callback: None,
    free_callback: Some(binding_free),
    reference_callback: Some(binding_reference),
};

unsafe extern "C" fn binding_free(_token: *mut c_void, _instance: *mut c_void, _binding: *mut c_void) {
    // The storage is freed by `free_instance`.
}

unsafe extern "C" fn binding_reference(
    _token: *mut c_void,
    _binding: *mut c_void,
    _reference: sys::Bool,
) -> sys::Bool {
    sys::TRUE
}

unsafe fn storage<'a, T: HostClass>(instance: sys::ClassInstancePtr) -> &'a InstanceStorage<T> {
    unsafe { &*instance.cast::<InstanceStorage<T>>() }
}

/// Run `f` on the host instance behind an engine object.
///
/// # Errors
/// `InvalidCast` when the object is not backed by a `T`, `InstanceBusy`
/// when a callback further up the stack holds the instance.
pub fn with_instance<T: HostClass, R>(
    object: &RawGd,
    f: impl FnOnce(&mut T) -> BridgeResult<R>,
) -> BridgeResult<R> {
    let interface = interface::get()?;
    let ptr = object.ptr()?;
    let binding = unsafe {
        (interface.object_get_instance_binding)(ptr, crate::init::library_token(), &BINDING_CALLBACKS)
    };
    if binding.is_null() || unsafe { *binding.cast::<TypeId>() } != TypeId::of::<T>() {
        return Err(BridgeError::InvalidCast {
            from: object.class_name()?,
            to: std::any::type_name::<T>().to_owned(),
        });
    }
    unsafe { storage::<T>(binding) }.with_mut(f)
}

/// Engine references reported through the reference callbacks.
pub fn engine_reference_count<T: HostClass>(object: &RawGd) -> BridgeResult<i64> {
    let ptr = object.ptr()?;
    let binding = unsafe {
        (interface::get()?.object_get_instance_binding)(
            ptr,
            crate::init::library_token(),
            &BINDING_CALLBACKS,
        )
    };
    if binding.is_null() || unsafe { *binding.cast::<TypeId>() } != TypeId::of::<T>() {
        return Err(BridgeError::NullObject);
    }
    Ok(unsafe { storage::<T>(binding) }.engine_refs.load(Ordering::Relaxed))
}

// ========== ENGINE CALLBACKS ==========

/// Destroys a freshly constructed engine object unless disarmed. Covers both
/// error returns and panics out of the host constructor.
struct PendingObject(sys::ObjectPtr);

impl PendingObject {
    fn disarm(self) -> sys::ObjectPtr {
        let ptr = self.0;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for PendingObject {
    fn drop(&mut self) {
        if let Ok(interface) = interface::get() {
            tracing::debug!(ptr = ?self.0, "destroying object of failed instance creation");
            unsafe { (interface.object_destroy)(self.0) };
        }
    }
}

unsafe extern "C" fn create_instance<T: HostClass>(class_userdata: *mut c_void) -> sys::ObjectPtr {
    let record = unsafe { &*class_userdata.cast::<ClassRecord<T>>() };
    let mut object = std::ptr::null_mut();
    guarded(&record.name, || {
        let interface = interface::get()?;
        let constructor = record
            .constructor
            .as_ref()
            .ok_or_else(|| BridgeError::UnknownClass(record.name.clone()))?;

        let parent = StringName::new(record.parent())?;
        let class_name = StringName::new(&record.name)?;
        let (parent_ptr, class_ptr) = (parent.ptr()?, class_name.ptr()?);
        let ptr = unsafe { (interface.classdb_construct_object)(parent_ptr) };
        if ptr.is_null() {
            return Err(BridgeError::UnknownClass(record.parent().to_owned()));
        }
        let pending = PendingObject(ptr);

        let instance = constructor(Base::new(ptr));
        let storage = Box::into_raw(Box::new(InstanceStorage {
            type_id: TypeId::of::<T>(),
            record,
            object: ptr,
            engine_refs: AtomicI64::new(0),
            instance: ReentrantMutex::new(RefCell::new(instance)),
            property_lists: Mutex::new(FxHashMap::default()),
        }));

        let ptr = pending.disarm();
        unsafe {
            (interface.object_set_instance)(ptr, class_ptr, storage.cast());
            (interface.object_set_instance_binding)(
                ptr,
                crate::init::library_token(),
                storage.cast(),
                &BINDING_CALLBACKS,
            );
        }
        tracing::trace!(class = %record.name, ?ptr, "created instance");
        object = ptr;
        Ok(())
    });
    object
}

unsafe extern "C" fn free_instance<T: HostClass>(
    class_userdata: *mut c_void,
    instance: sys::ClassInstancePtr,
) {
    let record = unsafe { &*class_userdata.cast::<ClassRecord<T>>() };
    if instance.is_null() {
        return;
    }
    guarded(&record.name, || {
        let storage = unsafe { Box::from_raw(instance.cast::<InstanceStorage<T>>()) };
        if let Some(destructor) = &record.destructor {
            storage.with_mut(|this| {
                destructor(this);
                Ok(())
            })?;
        }
        if let Ok(interface) = interface::get() {
            unsafe {
                (interface.object_free_instance_binding)(storage.object, crate::init::library_token())
            };
        }
        tracing::trace!(class = %record.name, "freed instance");
        Ok(())
    });
}

unsafe extern "C" fn get_virtual_call_data<T: HostClass>(
    class_userdata: *mut c_void,
    name: sys::ConstStringNamePtr,
) -> *mut c_void {
    let record = unsafe { &*class_userdata.cast::<ClassRecord<T>>() };
    let mut found = std::ptr::null_mut();
    guarded(&record.name, || {
        let name = unsafe { StringName::copy_slot(name)? }.to_rust_string()?;
        if let Some(method) = record.virtual_named(&name) {
            tracing::debug!(class = %record.name, virtual_name = %name, "resolved virtual");
            found = (method as *const MethodRecord<T>).cast_mut().cast();
        }
        Ok(())
    });
    found
}

unsafe extern "C" fn call_virtual_with_data<T: HostClass>(
    instance: sys::ClassInstancePtr,
    _name: sys::ConstStringNamePtr,
    virtual_userdata: *mut c_void,
    args: *const sys::ConstTypePtr,
    argc: sys::Int,
    r_ret: sys::TypePtr,
) {
    let method = unsafe { &*virtual_userdata.cast::<MethodRecord<T>>() };
    let storage = unsafe { storage::<T>(instance) };
    let args = unsafe { CallbackArgs::from_ptrcall(args, argc.max(0) as usize) };
    guarded(&method.label, || {
        storage.with_mut(|this| (method.call)(this, &args, CallbackRet::Ptr(r_ret)))
    });
}

unsafe extern "C" fn instance_set<T: HostClass>(
    instance: sys::ClassInstancePtr,
    name: sys::ConstStringNamePtr,
    value: sys::ConstVariantPtr,
) -> sys::Bool {
    let storage = unsafe { storage::<T>(instance) };
    let mut handled = false;
    guarded(&storage.record.name, || {
        let name = unsafe { StringName::copy_slot(name)? }.to_rust_string()?;
        let Some(&index) = storage.record.property_index.get(&name) else {
            return Ok(());
        };
        let values = [value];
        let args = CallbackArgs::Variant(&values);
        storage.with_mut(|this| (storage.record.properties[index].set)(this, &args))?;
        handled = true;
        Ok(())
    });
    if handled { sys::TRUE } else { sys::FALSE }
}

unsafe extern "C" fn instance_get<T: HostClass>(
    instance: sys::ClassInstancePtr,
    name: sys::ConstStringNamePtr,
    r_ret: sys::VariantPtr,
) -> sys::Bool {
    let storage = unsafe { storage::<T>(instance) };
    let mut handled = false;
    guarded(&storage.record.name, || {
        let name = unsafe { StringName::copy_slot(name)? }.to_rust_string()?;
        let Some(&index) = storage.record.property_index.get(&name) else {
            return Ok(());
        };
        storage.with_ref(|this| {
            (storage.record.properties[index].get)(this, CallbackRet::Variant(r_ret))
        })?;
        handled = true;
        Ok(())
    });
    if handled { sys::TRUE } else { sys::FALSE }
}

fn property_info(
    ty: VariantType,
    name: &StringName,
    class_name: &StringName,
    hint: &GString,
) -> BridgeResult<sys::PropertyInfo> {
    Ok(sys::PropertyInfo {
        type_: ty.raw(),
        name: name.ptr()?,
        class_name: class_name.ptr()?,
        hint: sys::PROPERTY_HINT_NONE,
        hint_string: hint.ptr()?,
        usage: sys::PropertyUsage::DEFAULT.bits(),
    })
}

/// Property infos for `fields`, with the cells they point into.
fn build_property_list(fields: &[(&str, VariantType)]) -> BridgeResult<PropertyList> {
    let names = fields
        .iter()
        .map(|(name, _)| StringName::new(name))
        .collect::<BridgeResult<Vec<_>>>()?;
    let class_name = StringName::new("")?;
    let hint = GString::new("")?;
    let infos = fields
        .iter()
        .zip(&names)
        .map(|((_, ty), name)| property_info(*ty, name, &class_name, &hint))
        .collect::<BridgeResult<Vec<_>>>()?;
    Ok(PropertyList {
        infos,
        _names: names,
        _class_name: class_name,
        _hint: hint,
    })
}

unsafe extern "C" fn get_property_list<T: HostClass>(
    instance: sys::ClassInstancePtr,
    r_count: *mut u32,
) -> *const sys::PropertyInfo {
    let storage = unsafe { storage::<T>(instance) };
    let mut list_ptr = std::ptr::null();
    let mut count = 0u32;
    guarded(&storage.record.name, || {
        let fields = storage
            .record
            .properties
            .iter()
            .map(|property| (property.name.as_str(), property.ty))
            .collect::<Vec<_>>();
        let list = build_property_list(&fields)?;
        list_ptr = list.infos.as_ptr();
        count = list.infos.len() as u32;
        storage.property_lists.lock().insert(list_ptr as usize, list);
        Ok(())
    });
    if !r_count.is_null() {
        unsafe { *r_count = count };
    }
    list_ptr
}

unsafe extern "C" fn free_property_list<T: HostClass>(
    instance: sys::ClassInstancePtr,
    list: *const sys::PropertyInfo,
    _count: u32,
) {
    let storage = unsafe { storage::<T>(instance) };
    // Dropping the entry releases the cells on the next registry cycle.
    storage.property_lists.lock().remove(&(list as usize));
}

unsafe extern "C" fn notification<T: HostClass>(
    instance: sys::ClassInstancePtr,
    what: i32,
    _reversed: sys::Bool,
) {
    let storage = unsafe { storage::<T>(instance) };
    if let Some(handler) = &storage.record.notification {
        guarded(&storage.record.name, || {
            storage.with_mut(|this| {
                handler(this, what);
                Ok(())
            })
        });
    }
}

unsafe extern "C" fn to_string<T: HostClass>(
    instance: sys::ClassInstancePtr,
    r_is_valid: *mut sys::Bool,
    r_out: sys::StringPtr,
) {
    let storage = unsafe { storage::<T>(instance) };
    let mut valid = false;
    if let Some(render) = &storage.record.to_string {
        valid = guarded(&storage.record.name, || {
            let text = storage.with_ref(|this| Ok(render(this)))?;
            GString::new(&text)?.encode_callback_ret(CallbackRet::Ptr(r_out))
        });
    }
    if !r_is_valid.is_null() {
        unsafe { *r_is_valid = if valid { sys::TRUE } else { sys::FALSE } };
    }
}

unsafe extern "C" fn reference<T: HostClass>(instance: sys::ClassInstancePtr) {
    let storage = unsafe { storage::<T>(instance) };
    storage.engine_refs.fetch_add(1, Ordering::Relaxed);
}

unsafe extern "C" fn unreference<T: HostClass>(instance: sys::ClassInstancePtr) {
    let storage = unsafe { storage::<T>(instance) };
    storage.engine_refs.fetch_sub(1, Ordering::Relaxed);
}

fn call_error_for(err: &BridgeError) -> sys::CallError {
    let (error, argument, expected) = match *err {
        BridgeError::ArityMismatch { expected, found } if found < expected => {
            (CallErrorType::TooFewArguments, 0, expected as i32)
        }
        BridgeError::ArityMismatch { expected, .. } => {
            (CallErrorType::TooManyArguments, 0, expected as i32)
        }
        BridgeError::TypeMismatch { expected, .. } => {
            (CallErrorType::InvalidArgument, 0, expected.raw() as i32)
        }
        _ => (CallErrorType::InvalidMethod, 0, 0),
    };
    sys::CallError {
        error: error.into(),
        argument,
        expected,
    }
}

unsafe extern "C" fn method_call<T: HostClass>(
    method_userdata: *mut c_void,
    instance: sys::ClassInstancePtr,
    args: *const sys::ConstVariantPtr,
    argc: sys::Int,
    r_return: sys::VariantPtr,
    r_error: *mut sys::CallError,
) {
    let method = unsafe { &*method_userdata.cast::<MethodRecord<T>>() };
    let args = unsafe { CallbackArgs::from_varcall(args, argc.max(0) as usize) };
    let result = if instance.is_null() {
        Err(BridgeError::NullSelfForInstanceMethod(method.label.clone()))
    } else {
        let storage = unsafe { storage::<T>(instance) };
        catch_callback(&method.label, || {
            storage.with_mut(|this| (method.call)(this, &args, CallbackRet::Variant(r_return)))
        })
    };
    if !r_error.is_null() {
        let error = match &result {
            Ok(()) => sys::CallError::default(),
            Err(BridgeError::NullSelfForInstanceMethod(_)) => sys::CallError {
                error: CallErrorType::InstanceIsNull.into(),
                argument: 0,
                expected: 0,
            },
            Err(err) => call_error_for(err),
        };
        unsafe { *r_error = error };
    }
}

unsafe extern "C" fn method_ptrcall<T: HostClass>(
    method_userdata: *mut c_void,
    instance: sys::ClassInstancePtr,
    args: *const sys::ConstTypePtr,
    r_ret: sys::TypePtr,
) {
    let method = unsafe { &*method_userdata.cast::<MethodRecord<T>>() };
    if instance.is_null() {
        return;
    }
    let storage = unsafe { storage::<T>(instance) };
    let args = unsafe { CallbackArgs::from_ptrcall(args, method.arg_types.len()) };
    guarded(&method.label, || {
        storage.with_mut(|this| (method.call)(this, &args, CallbackRet::Ptr(r_ret)))
    });
}

// ========== REGISTRATION ==========

/// Install `record` in the engine's class database.
///
/// # Errors
/// `ClassAlreadyRegistered` when a class of the same name was registered by
/// this library, `UnknownClass` when the parent does not exist.
pub fn register_class<T: HostClass>(record: ClassRecord<T>) -> BridgeResult<&'static ClassRecord<T>> {
    let interface = interface::get()?;
    let library = crate::init::library_token();

    let mut registered = REGISTERED.lock();
    if registered.iter().any(|name| **name == *record.name) {
        return Err(BridgeError::ClassAlreadyRegistered(record.name.clone()));
    }
    crate::method::class_tag(record.parent())?;

    let class_name = StringName::new(&record.name)?;
    let parent_name = StringName::new(record.parent())?;
    if !unsafe { (interface.classdb_get_class_tag)(class_name.ptr()?) }.is_null() {
        return Err(BridgeError::ClassAlreadyRegistered(record.name.clone()));
    }

    let record: &'static ClassRecord<T> = Box::leak(Box::new(record));
    let info = sys::ClassCreationInfo {
        is_virtual: sys::FALSE,
        is_abstract: if record.constructor.is_some() { sys::FALSE } else { sys::TRUE },
        is_exposed: sys::TRUE,
        set_func: Some(instance_set::<T>),
        get_func: Some(instance_get::<T>),
        get_property_list_func: Some(get_property_list::<T>),
        free_property_list_func: Some(free_property_list::<T>),
        notification_func: Some(notification::<T>),
        to_string_func: Some(to_string::<T>),
        reference_func: Some(reference::<T>),
        unreference_func: Some(unreference::<T>),
        create_instance_func: Some(create_instance::<T>),
        free_instance_func: Some(free_instance::<T>),
        get_virtual_call_data_func: Some(get_virtual_call_data::<T>),
        call_virtual_with_data_func: Some(call_virtual_with_data::<T>),
        class_userdata: (record as *const ClassRecord<T>).cast_mut().cast(),
    };
    unsafe {
        (interface.classdb_register_extension_class)(
            library,
            class_name.ptr()?,
            parent_name.ptr()?,
            &info,
        )
    };

    // The engine now knows the class; a failed member leaves it unregistered.
    if let Err(err) = register_members(record, &class_name) {
        tracing::warn!(class = %record.name, "rolling back class registration: {err}");
        unsafe { (interface.classdb_unregister_extension_class)(library, class_name.ptr()?) };
        return Err(err);
    }

    registered.push(record.name.as_str().into());
    tracing::debug!(
        class = %record.name,
        parent = record.parent(),
        virtuals = record.virtuals.len(),
        methods = record.methods.len(),
        properties = record.properties.len(),
        signals = record.signals.len(),
        "registered extension class"
    );
    Ok(record)
}

fn register_members<T: HostClass>(
    record: &'static ClassRecord<T>,
    class_name: &StringName,
) -> BridgeResult<()> {
    let interface = interface::get()?;
    let library = crate::init::library_token();
    for method in &record.methods {
        register_method(record, method)?;
    }
    for property in &record.properties {
        let list = build_property_list(&[(property.name.as_str(), property.ty)])?;
        let accessor = StringName::new("")?;
        unsafe {
            (interface.classdb_register_extension_class_property)(
                library,
                class_name.ptr()?,
                list.infos.as_ptr(),
                accessor.ptr()?,
                accessor.ptr()?,
            )
        };
    }
    for signal in &record.signals {
        let fields = signal
            .args
            .iter()
            .map(|(name, ty)| (name.as_str(), *ty))
            .collect::<Vec<_>>();
        let list = build_property_list(&fields)?;
        let signal_name = StringName::new(&signal.name)?;
        unsafe {
            (interface.classdb_register_extension_class_signal)(
                library,
                class_name.ptr()?,
                signal_name.ptr()?,
                list.infos.as_ptr(),
                list.infos.len() as sys::Int,
            )
        };
    }
    Ok(())
}

/// Exported methods may not reuse a name the class already answers to,
/// including inherited engine methods.
fn register_method<T: HostClass>(
    record: &'static ClassRecord<T>,
    method: &'static MethodRecord<T>,
) -> BridgeResult<()> {
    let interface = interface::get()?;
    let class_name = StringName::new(&record.name)?;
    let method_name = StringName::new(&method.name)?;
    let existing =
        unsafe { (interface.classdb_get_method_hash)(class_name.ptr()?, method_name.ptr()?) };
    if existing != 0 {
        return Err(BridgeError::MethodAlreadyExists {
            class: record.name.clone(),
            method: method.name.clone(),
        });
    }

    let fields = method
        .arg_types
        .iter()
        .enumerate()
        .map(|(index, ty)| (format!("arg{index}"), *ty))
        .collect::<Vec<_>>();
    let fields = fields
        .iter()
        .map(|(name, ty)| (name.as_str(), *ty))
        .collect::<Vec<_>>();
    let mut args = build_property_list(&fields)?;
    let mut ret = build_property_list(&[("", method.ret_type.unwrap_or(VariantType::Nil))])?;

    let info = sys::ClassMethodInfo {
        name: method_name.ptr()?,
        method_userdata: (method as *const MethodRecord<T>).cast_mut().cast(),
        call_func: Some(method_call::<T>),
        ptrcall_func: Some(method_ptrcall::<T>),
        method_flags: sys::MethodFlags::NORMAL.bits(),
        has_return_value: if method.ret_type.is_some() { sys::TRUE } else { sys::FALSE },
        return_value_info: ret.infos.as_mut_ptr(),
        argument_count: method.arg_types.len() as u32,
        arguments_info: args.infos.as_mut_ptr(),
    };
    unsafe {
        (interface.classdb_register_extension_class_method)(
            crate::init::library_token(),
            class_name.ptr()?,
            &info,
        )
    };
    tracing::debug!(method = %method.label, "registered method");
    Ok(())
}

/// Remove a class registered by this library.
pub fn unregister_class(name: &str) -> BridgeResult<()> {
    let mut registered = REGISTERED.lock();
    let Some(position) = registered.iter().position(|entry| &**entry == name) else {
        return Err(BridgeError::UnknownClass(name.to_owned()));
    };
    let interface = interface::get()?;
    let class_name = StringName::new(name)?;
    unsafe {
        (interface.classdb_unregister_extension_class)(
            crate::init::library_token(),
            class_name.ptr()?,
        )
    };
    registered.remove(position);
    tracing::debug!(class = name, "unregistered extension class");
    Ok(())
}

/// Unregister every class, most recently registered first.
pub fn unregister_all() -> BridgeResult<()> {
    let names = REGISTERED.lock().iter().rev().cloned().collect::<Vec<_>>();
    for name in names {
        unregister_class(&name)?;
    }
    Ok(())
}

pub fn registered_classes() -> Vec<String> {
    REGISTERED.lock().iter().map(|name| name.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::RefCounted;

    struct Probe {
        value: i64,
    }

    impl HostClass for Probe {
        type Base = RefCounted;
    }

    #[test]
    fn test_guarded_catches_panic() {
        assert!(!guarded("probe", || panic!("boom")));
        assert!(guarded("probe", || Ok(())));
        assert!(!guarded("probe", || Err(BridgeError::NullObject)));
    }

    #[test]
    fn test_panic_message() {
        let err = catch_callback("probe", || panic!("value {}", 3)).unwrap_err();
        assert_eq!(err, BridgeError::Panic("value 3".into()));
    }

    #[test]
    fn test_builder_collects_record() {
        let record = ClassBuilder::<Probe>::new("Probe")
            .constructor(|_base| Probe { value: 1 })
            .virtual_method("_tick", |this: &mut Probe, (delta,): (f64,)| {
                this.value += delta as i64;
                Ok(())
            })
            .method("double", |this: &mut Probe, ()| Ok(this.value * 2))
            .property("value", |this: &Probe| Ok(this.value), |this, value: i64| {
                this.value = value;
                Ok(())
            })
            .signal("changed", &[("value", VariantType::Int)])
            .build();

        assert_eq!(record.name(), "Probe");
        assert_eq!(record.parent(), "RefCounted");
        let tick = record.virtual_named("_tick").unwrap();
        assert_eq!(tick.arg_types, vec![VariantType::Float]);
        assert_eq!(tick.ret_type, None);
        assert_eq!(record.methods[0].ret_type, Some(VariantType::Int));
        assert_eq!(record.property_index.get("value"), Some(&0));
        assert_eq!(record.signals[0].args.len(), 1);
    }

    #[test]
    fn test_virtual_checks_arity() {
        let record = ClassBuilder::<Probe>::new("Probe")
            .virtual_method("_tick", |this: &mut Probe, (delta,): (i64,)| {
                this.value += delta;
                Ok(())
            })
            .build();
        let tick = record.virtual_named("_tick").unwrap();
        let mut probe = Probe { value: 0 };

        let delta = 5i64;
        let ptrs = [(&raw const delta).cast()];
        let args = unsafe { CallbackArgs::from_ptrcall(ptrs.as_ptr(), 1) };
        (tick.call)(&mut probe, &args, CallbackRet::Discard).unwrap();
        assert_eq!(probe.value, 5);

        let none = unsafe { CallbackArgs::from_ptrcall(std::ptr::null(), 0) };
        assert_eq!(
            (tick.call)(&mut probe, &none, CallbackRet::Discard),
            Err(BridgeError::ArityMismatch {
                expected: 1,
                found: 0
            })
        );
    }

    #[test]
    fn test_call_error_mapping() {
        let few = call_error_for(&BridgeError::ArityMismatch {
            expected: 2,
            found: 1,
        });
        assert_eq!(few.error, u32::from(CallErrorType::TooFewArguments));
        assert_eq!(few.expected, 2);
        let many = call_error_for(&BridgeError::ArityMismatch {
            expected: 0,
            found: 1,
        });
        assert_eq!(many.error, u32::from(CallErrorType::TooManyArguments));
        let other = call_error_for(&BridgeError::NullObject);
        assert_eq!(other.error, u32::from(CallErrorType::InvalidMethod));
    }
}
