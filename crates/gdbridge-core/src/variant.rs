//! The engine's tagged union, held opaquely.
//!
//! The host never reads variant bytes: the tag comes from `variant_get_type`
//! and every conversion, comparison or call goes through the engine.

use crate::codec::EngineValue;
use crate::codec::cell::{BuiltinCell, CellKind};
use crate::error::{BridgeError, BridgeResult};
use crate::frame::CallFrame;
use crate::interface;
use crate::obj::ObjectFlavor;
use crate::string::StringName;
use gdbridge_sys as sys;
use gdbridge_sys::{VariantOperator, VariantType};
use std::ffi::c_void;
use std::fmt;

/// Engine `Variant`.
pub struct Variant(BuiltinCell);

impl Variant {
    pub fn nil() -> BridgeResult<Self> {
        BuiltinCell::new_default(CellKind::Variant).map(Self)
    }

    pub(crate) fn from_cell(cell: BuiltinCell) -> Self {
        Self(cell)
    }

    /// Box any transportable value.
    pub fn from_value<T: EngineValue>(value: &T) -> BridgeResult<Self> {
        value.to_variant()
    }

    /// Unbox into `T`.
    ///
    /// # Errors
    /// `TypeMismatch` when the variant holds another kind.
    pub fn to<T: EngineValue>(&self) -> BridgeResult<T> {
        T::from_variant(self)
    }

    pub(crate) fn ptr(&self) -> BridgeResult<sys::VariantPtr> {
        self.0.ptr()
    }

    /// Tag reported by the engine for an initialized variant.
    ///
    /// # Safety
    /// `ptr` must point at an initialized variant.
    pub unsafe fn type_of_ptr(ptr: sys::ConstVariantPtr) -> BridgeResult<u32> {
        Ok(unsafe { (interface::get()?.variant_get_type)(ptr) })
    }

    pub fn get_type(&self) -> BridgeResult<VariantType> {
        let raw = unsafe { Self::type_of_ptr(self.ptr()?)? };
        VariantType::try_from(raw).map_err(|_| BridgeError::UnknownVariantTag(raw))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.get_type(), Ok(VariantType::Nil))
    }

    /// Call a method on the held value by name.
    ///
    /// # Errors
    /// `EngineCall` with the engine's call error when the call fails.
    pub fn call(&self, method: &str, args: &[Variant]) -> BridgeResult<Variant> {
        let interface = interface::get()?;
        let method = StringName::new(method)?;
        let arg_ptrs = args
            .iter()
            .map(|arg| arg.ptr().map(|ptr| ptr.cast_const()))
            .collect::<BridgeResult<Vec<_>>>()?;
        let this = self.ptr()?;
        let mut error = sys::CallError::default();
        let result = BuiltinCell::new_with(CellKind::Variant, |dst| {
            unsafe {
                (interface.variant_call)(
                    this,
                    method.ptr()?,
                    arg_ptrs.as_ptr(),
                    arg_ptrs.len() as sys::Int,
                    dst,
                    &raw mut error,
                )
            };
            Ok(())
        })
        .map(Self)?;
        BridgeError::from_call_error(&error)?;
        Ok(result)
    }

    /// Apply a binary operator. `None` when the engine rejects the operands.
    pub fn evaluate(&self, op: VariantOperator, other: &Variant) -> BridgeResult<Option<Variant>> {
        let interface = interface::get()?;
        let (left, right) = (self.ptr()?, other.ptr()?);
        let mut valid: sys::Bool = sys::FALSE;
        let result = BuiltinCell::new_with(CellKind::Variant, |dst| {
            unsafe { (interface.variant_evaluate)(op.into(), left, right, dst, &raw mut valid) };
            Ok(())
        })
        .map(Self)?;
        Ok((valid != sys::FALSE).then_some(result))
    }

    pub fn try_clone(&self) -> BridgeResult<Self> {
        self.0.try_clone().map(Self)
    }
}

impl EngineValue for Variant {
    // Any tag; conversions below are identities.
    const VARIANT_TYPE: VariantType = VariantType::Nil;
    const SLOT_SIZE: usize = sys::VARIANT_SIZE;
    const SLOT_ALIGN: usize = 8;
    const CELL: Option<CellKind> = Some(CellKind::Variant);

    fn encode_arg(&self, frame: &mut CallFrame) -> BridgeResult<()> {
        self.0.encode_arg(frame)
    }

    unsafe fn take_slot(slot: *mut c_void, _flavor: Option<ObjectFlavor>) -> BridgeResult<Self> {
        unsafe { BuiltinCell::take_from(CellKind::Variant, slot) }.map(Self)
    }

    unsafe fn copy_slot(slot: *const c_void) -> BridgeResult<Self> {
        unsafe { BuiltinCell::copy_from(CellKind::Variant, slot) }.map(Self)
    }

    unsafe fn move_into_slot(self, slot: *mut c_void) -> BridgeResult<()> {
        unsafe { self.0.move_into(slot) }
    }

    fn with_slot_ptr<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> BridgeResult<R> {
        Ok(f(self.ptr()?))
    }

    fn to_variant(&self) -> BridgeResult<Variant> {
        self.try_clone()
    }

    unsafe fn from_variant_ptr(variant: sys::ConstVariantPtr) -> BridgeResult<Self> {
        unsafe { Self::copy_slot(variant) }
    }
}

impl Clone for Variant {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match self.evaluate(VariantOperator::Equal, other) {
            Ok(Some(result)) => result.to::<bool>().unwrap_or(false),
            _ => false,
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get_type() {
            Ok(ty) => write!(f, "Variant({})", ty.name()),
            Err(err) => write!(f, "Variant(<{err}>)"),
        }
    }
}

/// Box a list of values into variants.
///
/// ```ignore
/// let args = varargs![1i64, GString::new("x")?]?;
/// ```
#[macro_export]
macro_rules! varargs {
    ($($value:expr),* $(,)?) => {
        (|| -> $crate::error::BridgeResult<Vec<$crate::variant::Variant>> {
            Ok(vec![$($crate::variant::Variant::from_value(&$value)?),*])
        })()
    };
}
