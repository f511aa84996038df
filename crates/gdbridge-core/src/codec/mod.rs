//! Value codec: moving host values across the ABI.
//!
//! Every transportable kind implements [`EngineValue`], which knows how the
//! kind sits in an engine slot. The four boundary operations are built on
//! that:
//!
//! - [`EngineValue::encode_arg`]: host value into a call frame,
//! - [`EngineValue::decode_ret`]: return slot into a host value,
//! - [`EngineValue::encode_callback_ret`]: host value into an engine return buffer,
//! - [`EngineValue::decode_callback_arg`]: engine argument buffer into a host value.
//!
//! Variant conversion goes through the engine's per-type variant
//! constructors; the codec never interprets variant bytes itself.

pub mod cell;
pub(crate) mod primitives;

use crate::error::{BridgeError, BridgeResult};
use crate::frame::CallFrame;
use crate::interface;
use crate::obj::ObjectFlavor;
use crate::variant::Variant;
use cell::{BuiltinCell, CellKind, SlotBuf};
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use std::ffi::c_void;

/// Argument buffer handed to a callback by the engine.
#[derive(Clone, Copy, Debug)]
pub enum CallbackArgs<'a> {
    /// Typed pointers, one per argument (ptrcall and virtual calls).
    Ptr(&'a [sys::ConstTypePtr]),
    /// Variant pointers, one per argument (variant calls and property sets).
    Variant(&'a [sys::ConstVariantPtr]),
}

impl<'a> CallbackArgs<'a> {
    /// # Safety
    /// `args` must point at `argc` valid pointers, or `argc` must be zero.
    pub unsafe fn from_ptrcall(args: *const sys::ConstTypePtr, argc: usize) -> Self {
        if args.is_null() || argc == 0 {
            return CallbackArgs::Ptr(&[]);
        }
        CallbackArgs::Ptr(unsafe { std::slice::from_raw_parts(args, argc) })
    }

    /// # Safety
    /// `args` must point at `argc` valid variant pointers, or `argc` must be zero.
    pub unsafe fn from_varcall(args: *const sys::ConstVariantPtr, argc: usize) -> Self {
        if args.is_null() || argc == 0 {
            return CallbackArgs::Variant(&[]);
        }
        CallbackArgs::Variant(unsafe { std::slice::from_raw_parts(args, argc) })
    }

    pub fn len(&self) -> usize {
        match self {
            CallbackArgs::Ptr(args) => args.len(),
            CallbackArgs::Variant(args) => args.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn expect_arity(&self, expected: usize) -> BridgeResult<()> {
        if self.len() != expected {
            return Err(BridgeError::ArityMismatch {
                expected,
                found: self.len(),
            });
        }
        Ok(())
    }

    /// Decode argument `index` as `T`.
    pub fn get<T: EngineValue>(&self, index: usize) -> BridgeResult<T> {
        T::decode_callback_arg(self, index)
    }
}

/// Return buffer handed to a callback by the engine.
#[derive(Clone, Copy, Debug)]
pub enum CallbackRet {
    /// Initialized typed value the engine reads after the callback.
    Ptr(sys::TypePtr),
    /// Initialized variant.
    Variant(sys::VariantPtr),
    /// The engine expects nothing back.
    Discard,
}

/// A kind of value that can cross the ABI.
///
/// Implementors describe their engine slot; the boundary operations are
/// provided on top of that description.
pub trait EngineValue: Sized {
    /// Tag of the variant inhabitant this kind converts to.
    const VARIANT_TYPE: VariantType;
    const SLOT_SIZE: usize;
    const SLOT_ALIGN: usize;
    /// Destructor of a slot holding this kind, `None` for plain data.
    const CELL: Option<CellKind>;

    /// Write the value into `frame` as the next argument.
    fn encode_arg(&self, frame: &mut CallFrame) -> BridgeResult<()>;

    /// Prepare zeroed memory so the engine can assign into it.
    ///
    /// # Safety
    /// `slot` must be valid for writes of `SLOT_SIZE` bytes.
    unsafe fn init_slot(slot: *mut c_void) -> BridgeResult<()> {
        match Self::CELL {
            Some(kind) => unsafe { kind.construct_default(slot) },
            None => Ok(()),
        }
    }

    /// Move the value out of an initialized slot, which is left uninitialized.
    ///
    /// `flavor` decides who owns a decoded object; `None` applies the ptrcall
    /// return convention of the object's class.
    ///
    /// # Safety
    /// `slot` must hold an initialized value of this kind.
    unsafe fn take_slot(slot: *mut c_void, flavor: Option<ObjectFlavor>) -> BridgeResult<Self>;

    /// Copy the value out of a slot the host does not own.
    ///
    /// # Safety
    /// `slot` must hold an initialized value of this kind.
    unsafe fn copy_slot(slot: *const c_void) -> BridgeResult<Self>;

    /// Move the value into uninitialized memory.
    ///
    /// # Safety
    /// `slot` must be valid for writes of `SLOT_SIZE` bytes.
    unsafe fn move_into_slot(self, slot: *mut c_void) -> BridgeResult<()>;

    /// Run `f` with a pointer to the engine representation of the value.
    fn with_slot_ptr<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> BridgeResult<R>;

    /// Copy out of a callback argument slot.
    ///
    /// # Safety
    /// `slot` must hold an initialized value of this kind.
    unsafe fn copy_callback_slot(slot: *const c_void) -> BridgeResult<Self> {
        unsafe { Self::copy_slot(slot) }
    }

    /// Replace the contents of an initialized callback return slot.
    ///
    /// # Safety
    /// `slot` must hold an initialized value of this kind.
    unsafe fn write_callback_slot(self, slot: *mut c_void) -> BridgeResult<()> {
        if let Some(kind) = Self::CELL {
            unsafe { kind.destroy(slot) };
        }
        unsafe { self.move_into_slot(slot) }
    }

    /// Reserve and initialize the return slot of `frame` for this kind.
    fn prepare_return(frame: &mut CallFrame) -> BridgeResult<()> {
        frame.prepare_return(Self::CELL, |slot| unsafe { Self::init_slot(slot) })
    }

    /// Read the return slot of `frame` after the call.
    fn decode_ret(frame: &mut CallFrame, flavor: Option<ObjectFlavor>) -> BridgeResult<Self> {
        let value = unsafe { Self::take_slot(frame.ret_ptr(), flavor)? };
        frame.consume_return();
        Ok(value)
    }

    /// Read argument `index` of a callback.
    fn decode_callback_arg(args: &CallbackArgs<'_>, index: usize) -> BridgeResult<Self> {
        match *args {
            CallbackArgs::Ptr(ptrs) => {
                let slot = ptrs.get(index).copied().ok_or(BridgeError::ArityMismatch {
                    expected: index + 1,
                    found: ptrs.len(),
                })?;
                unsafe { Self::copy_callback_slot(slot) }
            }
            CallbackArgs::Variant(ptrs) => {
                let slot = ptrs.get(index).copied().ok_or(BridgeError::ArityMismatch {
                    expected: index + 1,
                    found: ptrs.len(),
                })?;
                unsafe { Self::from_variant_ptr(slot) }
            }
        }
    }

    /// Write the value into a callback's return buffer.
    fn encode_callback_ret(self, ret: CallbackRet) -> BridgeResult<()> {
        match ret {
            CallbackRet::Ptr(slot) if !slot.is_null() => unsafe { self.write_callback_slot(slot) },
            CallbackRet::Variant(slot) if !slot.is_null() => {
                let variant = self.to_variant()?;
                unsafe { variant.write_callback_slot(slot) }
            }
            _ => Ok(()),
        }
    }

    /// Box the value into a variant through the engine.
    fn to_variant(&self) -> BridgeResult<Variant> {
        let from_type = interface::get()?.builtins.from_type(Self::VARIANT_TYPE)?;
        let cell = self.with_slot_ptr(|src| {
            BuiltinCell::new_with(CellKind::Variant, |dst| {
                unsafe { from_type(dst, src) };
                Ok(())
            })
        })??;
        Ok(Variant::from_cell(cell))
    }

    fn from_variant(variant: &Variant) -> BridgeResult<Self> {
        unsafe { Self::from_variant_ptr(variant.ptr()?) }
    }

    /// Unbox a variant the host does not own.
    ///
    /// # Errors
    /// `TypeMismatch` when the variant holds another kind.
    ///
    /// # Safety
    /// `variant` must point at an initialized variant.
    unsafe fn from_variant_ptr(variant: sys::ConstVariantPtr) -> BridgeResult<Self> {
        let interface = interface::get()?;
        let found = unsafe { (interface.variant_get_type)(variant) };
        if found != Self::VARIANT_TYPE.raw() {
            return Err(BridgeError::type_mismatch(Self::VARIANT_TYPE, found));
        }
        let to_type = interface.builtins.to_type(Self::VARIANT_TYPE)?;
        let mut slot = SlotBuf::zeroed();
        unsafe {
            to_type(slot.as_mut_ptr(), variant.cast_mut());
            Self::take_slot(slot.as_mut_ptr(), Some(ObjectFlavor::BorrowedArbitrary))
        }
    }
}

/// Anything that can be pushed as a call argument.
///
/// Blanket-implemented for every [`EngineValue`]; string slices are
/// converted into frame temporaries.
pub trait AsArg {
    fn push_arg(&self, frame: &mut CallFrame) -> BridgeResult<()>;
}

impl<T: EngineValue> AsArg for T {
    #[inline]
    fn push_arg(&self, frame: &mut CallFrame) -> BridgeResult<()> {
        self.encode_arg(frame)
    }
}

impl AsArg for &str {
    fn push_arg(&self, frame: &mut CallFrame) -> BridgeResult<()> {
        crate::string::push_str_temp(frame, self)
    }
}

impl AsArg for String {
    fn push_arg(&self, frame: &mut CallFrame) -> BridgeResult<()> {
        crate::string::push_str_temp(frame, self)
    }
}

/// Implements [`EngineValue`] for a type stored as a [`BuiltinCell`] in field `.0`.
macro_rules! impl_cell_value {
    ($ty:ty, $kind:expr, $variant_type:expr) => {
        impl $crate::codec::EngineValue for $ty {
            const VARIANT_TYPE: ::gdbridge_sys::VariantType = $variant_type;
            const SLOT_SIZE: usize = $kind.size();
            const SLOT_ALIGN: usize = 8;
            const CELL: Option<$crate::codec::cell::CellKind> = Some($kind);

            fn encode_arg(
                &self,
                frame: &mut $crate::frame::CallFrame,
            ) -> $crate::error::BridgeResult<()> {
                self.0.encode_arg(frame)
            }

            unsafe fn take_slot(
                slot: *mut ::std::ffi::c_void,
                _flavor: Option<$crate::obj::ObjectFlavor>,
            ) -> $crate::error::BridgeResult<Self> {
                let cell = unsafe { $crate::codec::cell::BuiltinCell::take_from($kind, slot)? };
                Ok(Self(cell))
            }

            unsafe fn copy_slot(
                slot: *const ::std::ffi::c_void,
            ) -> $crate::error::BridgeResult<Self> {
                let cell = unsafe { $crate::codec::cell::BuiltinCell::copy_from($kind, slot)? };
                Ok(Self(cell))
            }

            unsafe fn move_into_slot(
                self,
                slot: *mut ::std::ffi::c_void,
            ) -> $crate::error::BridgeResult<()> {
                unsafe { self.0.move_into(slot) }
            }

            fn with_slot_ptr<R>(
                &self,
                f: impl FnOnce(*mut ::std::ffi::c_void) -> R,
            ) -> $crate::error::BridgeResult<R> {
                Ok(f(self.0.ptr()?))
            }
        }

        impl Clone for $ty {
            fn clone(&self) -> Self {
                Self(self.0.clone())
            }
        }
    };
}

pub(crate) use impl_cell_value;

