//! Engine objects and their lifetime.
//!
//! Two ownership regimes meet here. Refcounted objects carry an intrusive
//! count: the host holds exactly one reference per owning handle and gives
//! it back when the handle is reclaimed. Other objects have explicit
//! ownership, decided per boundary crossing by an [`ObjectFlavor`].
//!
//! Every object pointer the host holds sits in the pointer registry. Drop
//! only queues the handle; the registry cycle performs the decrement (or
//! the destructor) at a safe point.

use crate::codec::EngineValue;
use crate::codec::cell::{BuiltinCell, CellKind};
use crate::error::{BridgeError, BridgeResult, fatal};
use crate::frame::CallFrame;
use crate::interface;
use crate::method::{self, MethodHandle};
use crate::pointers::{Handle, Ownership, ValueKind, registry};
use crate::string::StringName;
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

/// Signature hashes of the `RefCounted` methods used for lifetime management.
pub mod hashes {
    pub const INIT_REF: i64 = 2240911060;
    pub const REFERENCE: i64 = 2240911060;
    pub const UNREFERENCE: i64 = 2240911060;
    pub const GET_REFERENCE_COUNT: i64 = 3905245786;
}

const REFCOUNTED: &str = "RefCounted";

/// Ownership of an object pointer crossing the ABI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectFlavor {
    /// Valid for the duration of the current call.
    BorrowedForCall,
    /// Valid for as long as the engine keeps the object alive.
    BorrowedArbitrary,
    /// The host now owns the object (or one reference to it).
    TransferredToHost,
    /// The engine owns the object; the host must not free it.
    TransferredToEngine,
}

impl ObjectFlavor {
    /// Flavor of a ptrcall return: refcounted results carry a reference for
    /// the caller, other objects are borrowed.
    pub fn return_default(refcounted: bool) -> Self {
        if refcounted {
            ObjectFlavor::TransferredToHost
        } else {
            ObjectFlavor::BorrowedArbitrary
        }
    }

    /// Registry ownership for a decoded pointer, and whether the host must
    /// take a reference of its own first.
    pub fn ownership(self, refcounted: bool) -> (Ownership, bool) {
        match (self, refcounted) {
            (ObjectFlavor::BorrowedForCall | ObjectFlavor::BorrowedArbitrary, true) => {
                (Ownership::OwnedByHost, true)
            }
            (ObjectFlavor::BorrowedForCall | ObjectFlavor::BorrowedArbitrary, false) => {
                (Ownership::OwnedByEngine, false)
            }
            (ObjectFlavor::TransferredToHost, _) => (Ownership::OwnedByHost, false),
            (ObjectFlavor::TransferredToEngine, _) => (Ownership::OwnedByEngine, false),
        }
    }
}

fn refcount_method(name: &str, hash: i64) -> BridgeResult<MethodHandle> {
    method::bind(REFCOUNTED, name, hash)
}

/// Take the first reference of a freshly constructed refcounted object.
pub(crate) fn init_ref(ptr: sys::ObjectPtr) -> BridgeResult<bool> {
    let handle = refcount_method("init_ref", hashes::INIT_REF)?;
    method::call_raw(&handle, ptr, &[])
}

pub(crate) fn reference(ptr: sys::ObjectPtr) -> BridgeResult<bool> {
    let handle = refcount_method("reference", hashes::REFERENCE)?;
    method::call_raw(&handle, ptr, &[])
}

/// Drop one reference. `true` when the count reached zero.
pub(crate) fn unreference(ptr: sys::ObjectPtr) -> BridgeResult<bool> {
    let handle = refcount_method("unreference", hashes::UNREFERENCE)?;
    method::call_raw(&handle, ptr, &[])
}

pub fn reference_count(ptr: sys::ObjectPtr) -> BridgeResult<i64> {
    let handle = refcount_method("get_reference_count", hashes::GET_REFERENCE_COUNT)?;
    method::call_raw(&handle, ptr, &[])
}

/// Whether the object behind `ptr` derives from `RefCounted`.
pub fn is_refcounted_ptr(ptr: sys::ObjectPtr) -> BridgeResult<bool> {
    is_instance_of(ptr, REFCOUNTED)
}

pub(crate) fn is_instance_of(ptr: sys::ObjectPtr, class: &str) -> BridgeResult<bool> {
    let tag = method::class_tag(class)?;
    let cast = unsafe { (interface::get()?.object_cast_to)(ptr, tag) };
    Ok(!cast.is_null())
}

/// Give back the host's ownership of a reclaimed object.
pub(crate) fn release_object(ptr: sys::ObjectPtr, refcounted: bool) -> BridgeResult<()> {
    if refcounted && !unreference(ptr)? {
        return Ok(());
    }
    tracing::trace!(?ptr, refcounted, "destroying object");
    unsafe { (interface::get()?.object_destroy)(ptr) };
    Ok(())
}

/// Untyped owning handle to an engine object.
pub struct RawGd {
    handle: Handle,
    refcounted: bool,
}

impl RawGd {
    /// Register an object pointer received from the engine.
    ///
    /// `None` applies the return convention. Null pointers are rejected.
    pub fn from_engine(ptr: sys::ObjectPtr, flavor: Option<ObjectFlavor>) -> BridgeResult<Self> {
        if ptr.is_null() {
            return Err(BridgeError::NullObject);
        }
        let refcounted = is_refcounted_ptr(ptr)?;
        let flavor = flavor.unwrap_or(ObjectFlavor::return_default(refcounted));
        let (ownership, take_reference) = flavor.ownership(refcounted);
        if take_reference {
            reference(ptr)?;
        }
        Ok(Self::register(ptr, refcounted, ownership))
    }

    fn register(ptr: sys::ObjectPtr, refcounted: bool, ownership: Ownership) -> Self {
        let handle = registry().new_handle(ptr, ValueKind::Object { refcounted }, ownership);
        Self { handle, refcounted }
    }

    /// Construct an instance of `class` owned by the host.
    pub fn construct(class: &str) -> BridgeResult<Self> {
        let interface = interface::get()?;
        let name = StringName::new(class)?;
        let ptr = unsafe { (interface.classdb_construct_object)(name.ptr()?) };
        if ptr.is_null() {
            // Known classes fail here only when their instance could not be created.
            method::class_tag(class)?;
            return Err(BridgeError::ConstructionFailed(class.to_owned()));
        }
        let refcounted = is_refcounted_ptr(ptr)?;
        if refcounted {
            init_ref(ptr)?;
        }
        tracing::debug!(class, refcounted, "constructed object");
        Ok(Self::register(ptr, refcounted, Ownership::OwnedByHost))
    }

    /// # Errors
    /// `StaleHandle` after the object was freed or handed to the engine.
    #[inline]
    pub fn ptr(&self) -> BridgeResult<sys::ObjectPtr> {
        registry().get(self.handle)
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn is_refcounted(&self) -> bool {
        self.refcounted
    }

    pub fn instance_id(&self) -> BridgeResult<u64> {
        let ptr = self.ptr()?;
        Ok(unsafe { (interface::get()?.object_get_instance_id)(ptr) })
    }

    pub fn class_name(&self) -> BridgeResult<String> {
        let interface = interface::get()?;
        let ptr = self.ptr()?;
        let library = crate::init::library_token();
        let name = BuiltinCell::new_with(CellKind::Builtin(VariantType::StringName), |dst| {
            let found = unsafe { (interface.object_get_class_name)(ptr, library, dst) };
            if found == sys::FALSE {
                return Err(BridgeError::NullObject);
            }
            Ok(())
        })?;
        StringName(name).to_rust_string()
    }

    /// Current refcount, `None` for objects without one.
    pub fn reference_count(&self) -> BridgeResult<Option<i64>> {
        if !self.refcounted {
            return Ok(None);
        }
        reference_count(self.ptr()?).map(Some)
    }

    /// Another handle to the same object. Refcounted objects gain a
    /// reference; others get a non-owning handle.
    pub fn try_clone(&self) -> BridgeResult<Self> {
        let ptr = self.ptr()?;
        if self.refcounted {
            reference(ptr)?;
            return Ok(Self::register(ptr, true, Ownership::OwnedByHost));
        }
        Ok(Self::register(ptr, false, Ownership::OwnedByEngine))
    }

    /// End the handle and hand the pointer over with whatever the handle owned.
    pub fn into_engine(self) -> BridgeResult<sys::ObjectPtr> {
        let this = std::mem::ManuallyDrop::new(self);
        registry().end(this.handle)
    }

    /// Destroy a non-refcounted object now.
    ///
    /// # Errors
    /// `ManualFreeOfRefCounted` for refcounted objects, which are dropped instead.
    pub fn free(self) -> BridgeResult<()> {
        if self.refcounted {
            let class = self.class_name().unwrap_or_else(|_| REFCOUNTED.to_owned());
            return Err(BridgeError::ManualFreeOfRefCounted(class));
        }
        let ptr = self.into_engine()?;
        unsafe { (interface::get()?.object_destroy)(ptr) };
        Ok(())
    }

    /// Same object, a fresh non-owning handle.
    fn borrowed(&self) -> BridgeResult<Self> {
        Ok(Self::register(self.ptr()?, self.refcounted, Ownership::OwnedByEngine))
    }
}

impl Drop for RawGd {
    fn drop(&mut self) {
        registry().release(self.handle);
    }
}

impl fmt::Debug for RawGd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawGd")
            .field("handle", &self.handle)
            .field("refcounted", &self.refcounted)
            .finish()
    }
}

/// Marker for classes without a base.
pub enum NoBase {}

/// Metadata of an engine class.
///
/// # Safety
/// `CLASS_NAME` must name an engine class whose ancestor chain is mirrored
/// by `Base`, and `IS_REFCOUNTED` must match whether it derives `RefCounted`.
pub unsafe trait GodotClass: 'static {
    const CLASS_NAME: &'static str;
    const IS_REFCOUNTED: bool;
    type Base;
}

/// Typed handle to an engine object of class `T` (or a subclass).
#[repr(transparent)]
pub struct Gd<T: GodotClass> {
    raw: RawGd,
    _class: PhantomData<fn() -> T>,
}

impl<T: GodotClass> Gd<T> {
    pub(crate) fn from_raw(raw: RawGd) -> Self {
        Self {
            raw,
            _class: PhantomData,
        }
    }

    /// Construct a new `T` through the class database.
    pub fn construct() -> BridgeResult<Self> {
        RawGd::construct(T::CLASS_NAME).map(Self::from_raw)
    }

    /// Wrap an engine pointer, checking its class.
    pub fn from_engine(ptr: sys::ObjectPtr, flavor: Option<ObjectFlavor>) -> BridgeResult<Self> {
        if ptr.is_null() {
            return Err(BridgeError::NullObject);
        }
        check_class::<T>(ptr)?;
        RawGd::from_engine(ptr, flavor).map(Self::from_raw)
    }

    pub fn raw(&self) -> &RawGd {
        &self.raw
    }

    pub fn into_raw(self) -> RawGd {
        self.raw
    }

    pub fn ptr(&self) -> BridgeResult<sys::ObjectPtr> {
        self.raw.ptr()
    }

    pub fn instance_id(&self) -> BridgeResult<u64> {
        self.raw.instance_id()
    }

    pub fn class_name(&self) -> BridgeResult<String> {
        self.raw.class_name()
    }

    pub fn reference_count(&self) -> BridgeResult<Option<i64>> {
        self.raw.reference_count()
    }

    /// Call a bound method on this object.
    pub fn call<R: EngineValue>(
        &self,
        method: &MethodHandle,
        args: &[&dyn crate::codec::AsArg],
    ) -> BridgeResult<R> {
        method::call(method, Some(&self.raw), args)
    }

    /// Checked downcast through the engine's class tags.
    ///
    /// # Errors
    /// `InvalidCast` when the object is not a `U`.
    pub fn cast<U: GodotClass>(&self) -> BridgeResult<Gd<U>> {
        let ptr = self.ptr()?;
        if !is_instance_of(ptr, U::CLASS_NAME)? {
            return Err(BridgeError::InvalidCast {
                from: self.class_name().unwrap_or_else(|_| T::CLASS_NAME.to_owned()),
                to: U::CLASS_NAME.to_owned(),
            });
        }
        self.raw.try_clone().map(Gd::from_raw)
    }

    /// Free upcast to the direct base class.
    pub fn into_base(self) -> Gd<T::Base>
    where
        T::Base: GodotClass,
    {
        Gd::from_raw(self.raw)
    }

    /// Give ownership to the engine; the returned handle no longer owns.
    pub fn transfer_to_engine(self) -> BridgeResult<Gd<T>> {
        let borrowed = self.raw.borrowed()?;
        self.raw.into_engine()?;
        Ok(Gd::from_raw(borrowed))
    }

    /// Destroy a non-refcounted object now.
    pub fn free(self) -> BridgeResult<()> {
        self.raw.free()
    }
}

fn check_class<T: GodotClass>(ptr: sys::ObjectPtr) -> BridgeResult<()> {
    if T::CLASS_NAME == "Object" || is_instance_of(ptr, T::CLASS_NAME)? {
        return Ok(());
    }
    Err(BridgeError::InvalidCast {
        from: "Object".to_owned(),
        to: T::CLASS_NAME.to_owned(),
    })
}

impl<T> Deref for Gd<T>
where
    T: GodotClass,
    T::Base: GodotClass,
{
    type Target = Gd<T::Base>;

    fn deref(&self) -> &Gd<T::Base> {
        // Both are transparent over `RawGd`.
        unsafe { &*(self as *const Gd<T>).cast::<Gd<T::Base>>() }
    }
}

impl<T: GodotClass> Clone for Gd<T> {
    fn clone(&self) -> Self {
        Self::from_raw(self.raw.try_clone().unwrap_or_else(|err| fatal(err)))
    }
}

impl<T: GodotClass> PartialEq for Gd<T> {
    fn eq(&self, other: &Self) -> bool {
        matches!((self.ptr(), other.ptr()), (Ok(a), Ok(b)) if a == b)
    }
}

impl<T: GodotClass> fmt::Debug for Gd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gd<{}>({})", T::CLASS_NAME, self.raw.handle)
    }
}

impl<T: GodotClass> EngineValue for Gd<T> {
    const VARIANT_TYPE: VariantType = VariantType::Object;
    const SLOT_SIZE: usize = size_of::<sys::ObjectPtr>();
    const SLOT_ALIGN: usize = align_of::<sys::ObjectPtr>();
    const CELL: Option<CellKind> = None;

    /// Refcounted objects gain a reference the engine adopts.
    fn encode_arg(&self, frame: &mut CallFrame) -> BridgeResult<()> {
        let ptr = self.ptr()?;
        if self.raw.refcounted {
            reference(ptr)?;
        }
        frame.push_pod(&ptr);
        Ok(())
    }

    unsafe fn take_slot(slot: *mut c_void, flavor: Option<ObjectFlavor>) -> BridgeResult<Self> {
        let ptr = unsafe { slot.cast::<sys::ObjectPtr>().read_unaligned() };
        unsafe { slot.cast::<sys::ObjectPtr>().write_unaligned(std::ptr::null_mut()) };
        if ptr.is_null() {
            return Err(BridgeError::NullObject);
        }
        if let Err(err) = check_class::<T>(ptr) {
            // A reference handed to us still has to go back.
            if flavor.is_none() || flavor == Some(ObjectFlavor::TransferredToHost) {
                if let Ok(raw) = RawGd::from_engine(ptr, flavor) {
                    drop(raw);
                }
            }
            return Err(err);
        }
        RawGd::from_engine(ptr, flavor).map(Self::from_raw)
    }

    unsafe fn copy_slot(slot: *const c_void) -> BridgeResult<Self> {
        let ptr = unsafe { slot.cast::<sys::ObjectPtr>().read_unaligned() };
        Self::from_engine(ptr, Some(ObjectFlavor::BorrowedForCall))
    }

    /// The handle's ownership moves with the pointer.
    unsafe fn move_into_slot(self, slot: *mut c_void) -> BridgeResult<()> {
        let ptr = self.raw.into_engine()?;
        unsafe { slot.cast::<sys::ObjectPtr>().write_unaligned(ptr) };
        Ok(())
    }

    fn with_slot_ptr<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> BridgeResult<R> {
        let mut ptr = self.ptr()?;
        Ok(f((&raw mut ptr).cast()))
    }

    /// Refcounted callback arguments arrive as references.
    unsafe fn copy_callback_slot(slot: *const c_void) -> BridgeResult<Self> {
        if !T::IS_REFCOUNTED {
            return unsafe { Self::copy_slot(slot) };
        }
        let ptr = unsafe { (interface::get()?.ref_get_object)(slot) };
        Self::from_engine(ptr, Some(ObjectFlavor::BorrowedForCall))
    }

    unsafe fn write_callback_slot(self, slot: *mut c_void) -> BridgeResult<()> {
        if !T::IS_REFCOUNTED {
            return unsafe { self.move_into_slot(slot) };
        }
        // The engine-side reference takes its own count; ours drops normally.
        let ptr = self.ptr()?;
        unsafe { (interface::get()?.ref_set_object)(slot, ptr) };
        Ok(())
    }
}

/// Nullable object references. `None` travels as a null pointer.
impl<T: GodotClass> EngineValue for Option<Gd<T>> {
    const VARIANT_TYPE: VariantType = VariantType::Object;
    const SLOT_SIZE: usize = size_of::<sys::ObjectPtr>();
    const SLOT_ALIGN: usize = align_of::<sys::ObjectPtr>();
    const CELL: Option<CellKind> = None;

    fn encode_arg(&self, frame: &mut CallFrame) -> BridgeResult<()> {
        match self {
            Some(gd) => gd.encode_arg(frame),
            None => {
                frame.push_pod(&std::ptr::null_mut::<c_void>());
                Ok(())
            }
        }
    }

    unsafe fn take_slot(slot: *mut c_void, flavor: Option<ObjectFlavor>) -> BridgeResult<Self> {
        if unsafe { slot.cast::<sys::ObjectPtr>().read_unaligned() }.is_null() {
            return Ok(None);
        }
        unsafe { Gd::take_slot(slot, flavor) }.map(Some)
    }

    unsafe fn copy_slot(slot: *const c_void) -> BridgeResult<Self> {
        if unsafe { slot.cast::<sys::ObjectPtr>().read_unaligned() }.is_null() {
            return Ok(None);
        }
        unsafe { Gd::copy_slot(slot) }.map(Some)
    }

    unsafe fn move_into_slot(self, slot: *mut c_void) -> BridgeResult<()> {
        match self {
            Some(gd) => unsafe { gd.move_into_slot(slot) },
            None => {
                unsafe { slot.cast::<sys::ObjectPtr>().write_unaligned(std::ptr::null_mut()) };
                Ok(())
            }
        }
    }

    fn with_slot_ptr<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> BridgeResult<R> {
        let mut ptr = match self {
            Some(gd) => gd.ptr()?,
            None => std::ptr::null_mut(),
        };
        Ok(f((&raw mut ptr).cast()))
    }

    unsafe fn copy_callback_slot(slot: *const c_void) -> BridgeResult<Self> {
        let ptr = if T::IS_REFCOUNTED {
            unsafe { (interface::get()?.ref_get_object)(slot) }
        } else {
            unsafe { slot.cast::<sys::ObjectPtr>().read_unaligned() }
        };
        if ptr.is_null() {
            return Ok(None);
        }
        Gd::from_engine(ptr, Some(ObjectFlavor::BorrowedForCall)).map(Some)
    }

    unsafe fn write_callback_slot(self, slot: *mut c_void) -> BridgeResult<()> {
        match self {
            Some(gd) => unsafe { gd.write_callback_slot(slot) },
            None if T::IS_REFCOUNTED => {
                unsafe { (interface::get()?.ref_set_object)(slot, std::ptr::null_mut()) };
                Ok(())
            }
            None => unsafe { self.move_into_slot(slot) },
        }
    }
}

/// The engine object underneath a host-defined instance.
///
/// Non-owning: the engine object owns the host instance, not the other way
/// round, so holding a `Base` never keeps the object alive.
pub struct Base<T: GodotClass> {
    ptr: sys::ObjectPtr,
    _class: PhantomData<fn() -> T>,
}

// The pointer is only handed back to the engine, which does its own
// thread checks.
unsafe impl<T: GodotClass> Send for Base<T> {}
unsafe impl<T: GodotClass> Sync for Base<T> {}

impl<T: GodotClass> Base<T> {
    pub(crate) fn new(ptr: sys::ObjectPtr) -> Self {
        Self {
            ptr,
            _class: PhantomData,
        }
    }

    pub fn ptr(&self) -> sys::ObjectPtr {
        self.ptr
    }

    /// A non-owning typed handle, valid while the instance lives.
    pub fn to_gd(&self) -> BridgeResult<Gd<T>> {
        let refcounted = T::IS_REFCOUNTED;
        let handle = registry().new_handle(
            self.ptr,
            ValueKind::Object { refcounted },
            Ownership::OwnedByEngine,
        );
        Ok(Gd::from_raw(RawGd { handle, refcounted }))
    }
}

impl<T: GodotClass> fmt::Debug for Base<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Base<{}>({:p})", T::CLASS_NAME, self.ptr)
    }
}

/// Declare an engine class for use with [`Gd`].
///
/// ```ignore
/// engine_class!(pub struct Resource: RefCounted, refcounted);
/// engine_class!(pub struct Node: Object);
/// ```
#[macro_export]
macro_rules! engine_class {
    ($(#[$meta:meta])* $vis:vis struct $name:ident : $base:ty, refcounted) => {
        $crate::engine_class!(@define $(#[$meta])* $vis $name, $base, true);
    };
    ($(#[$meta:meta])* $vis:vis struct $name:ident : $base:ty) => {
        $crate::engine_class!(@define $(#[$meta])* $vis $name, $base, false);
    };
    (@define $(#[$meta:meta])* $vis:vis $name:ident, $base:ty, $refcounted:expr) => {
        $(#[$meta])*
        #[repr(transparent)]
        $vis struct $name($base);

        unsafe impl $crate::obj::GodotClass for $name {
            const CLASS_NAME: &'static str = stringify!($name);
            const IS_REFCOUNTED: bool = $refcounted;
            type Base = $base;
        }
    };
}

/// Root of the class hierarchy.
pub struct Object(NoBase);

unsafe impl GodotClass for Object {
    const CLASS_NAME: &'static str = "Object";
    const IS_REFCOUNTED: bool = false;
    type Base = NoBase;
}

engine_class!(pub struct RefCounted: Object, refcounted);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flavor_ownership() {
        assert_eq!(
            ObjectFlavor::BorrowedForCall.ownership(true),
            (Ownership::OwnedByHost, true)
        );
        assert_eq!(
            ObjectFlavor::BorrowedArbitrary.ownership(false),
            (Ownership::OwnedByEngine, false)
        );
        assert_eq!(
            ObjectFlavor::TransferredToHost.ownership(true),
            (Ownership::OwnedByHost, false)
        );
        assert_eq!(
            ObjectFlavor::TransferredToHost.ownership(false),
            (Ownership::OwnedByHost, false)
        );
        assert_eq!(
            ObjectFlavor::TransferredToEngine.ownership(true),
            (Ownership::OwnedByEngine, false)
        );
    }

    #[test]
    fn test_return_default() {
        assert_eq!(ObjectFlavor::return_default(true), ObjectFlavor::TransferredToHost);
        assert_eq!(ObjectFlavor::return_default(false), ObjectFlavor::BorrowedArbitrary);
    }

    #[test]
    fn test_class_metadata() {
        assert_eq!(RefCounted::CLASS_NAME, "RefCounted");
        assert!(RefCounted::IS_REFCOUNTED);
        assert!(!Object::IS_REFCOUNTED);
        fn base_name<T: GodotClass>() -> &'static str
        where
            T::Base: GodotClass,
        {
            <T::Base as GodotClass>::CLASS_NAME
        }
        assert_eq!(base_name::<RefCounted>(), "Object");
    }
}
