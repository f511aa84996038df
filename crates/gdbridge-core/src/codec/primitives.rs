//! Scalars and plain-data built-ins.
//!
//! Integers travel as 64-bit, floats as double precision and booleans as a
//! single byte, whatever their host width.

use super::EngineValue;
use crate::error::{BridgeError, BridgeResult};
use crate::frame::CallFrame;
use crate::obj::ObjectFlavor;
use crate::variant::Variant;
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use std::ffi::c_void;
use std::fmt;

/// Implements [`EngineValue`] for a `#[repr(C)]` type copied bitwise into its slot.
macro_rules! impl_pod_value {
    ($($ty:ty => $variant_type:ident),* $(,)?) => {$(
        impl $crate::codec::EngineValue for $ty {
            const VARIANT_TYPE: ::gdbridge_sys::VariantType =
                ::gdbridge_sys::VariantType::$variant_type;
            const SLOT_SIZE: usize = ::std::mem::size_of::<$ty>();
            const SLOT_ALIGN: usize = ::std::mem::align_of::<$ty>();
            const CELL: Option<$crate::codec::cell::CellKind> = None;

            fn encode_arg(
                &self,
                frame: &mut $crate::frame::CallFrame,
            ) -> $crate::error::BridgeResult<()> {
                frame.push_pod(self);
                Ok(())
            }

            unsafe fn take_slot(
                slot: *mut ::std::ffi::c_void,
                _flavor: Option<$crate::obj::ObjectFlavor>,
            ) -> $crate::error::BridgeResult<Self> {
                Ok(unsafe { slot.cast::<$ty>().read_unaligned() })
            }

            unsafe fn copy_slot(
                slot: *const ::std::ffi::c_void,
            ) -> $crate::error::BridgeResult<Self> {
                Ok(unsafe { slot.cast::<$ty>().read_unaligned() })
            }

            unsafe fn move_into_slot(
                self,
                slot: *mut ::std::ffi::c_void,
            ) -> $crate::error::BridgeResult<()> {
                unsafe { slot.cast::<$ty>().write_unaligned(self) };
                Ok(())
            }

            fn with_slot_ptr<R>(
                &self,
                f: impl FnOnce(*mut ::std::ffi::c_void) -> R,
            ) -> $crate::error::BridgeResult<R> {
                let mut copy = *self;
                Ok(f((&raw mut copy).cast()))
            }
        }
    )*};
}

pub(crate) use impl_pod_value;

/// Implements [`EngineValue`] for a host scalar carried as `$wire`. Values
/// that do not fit either width fail with `OutOfRange` instead of wrapping.
macro_rules! impl_widened_value {
    ($wire:ty, $variant_type:ident, $widen:ident, $narrow:ident; $($ty:ty),*) => {$(
        impl EngineValue for $ty {
            const VARIANT_TYPE: VariantType = VariantType::$variant_type;
            const SLOT_SIZE: usize = size_of::<$wire>();
            const SLOT_ALIGN: usize = align_of::<$wire>();
            const CELL: Option<super::cell::CellKind> = None;

            fn encode_arg(&self, frame: &mut CallFrame) -> BridgeResult<()> {
                frame.push_pod(&$widen(*self)?);
                Ok(())
            }

            unsafe fn take_slot(slot: *mut c_void, _flavor: Option<ObjectFlavor>) -> BridgeResult<Self> {
                $narrow(unsafe { slot.cast::<$wire>().read_unaligned() })
            }

            unsafe fn copy_slot(slot: *const c_void) -> BridgeResult<Self> {
                $narrow(unsafe { slot.cast::<$wire>().read_unaligned() })
            }

            unsafe fn move_into_slot(self, slot: *mut c_void) -> BridgeResult<()> {
                let wire = $widen(self)?;
                unsafe { slot.cast::<$wire>().write_unaligned(wire) };
                Ok(())
            }

            fn with_slot_ptr<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> BridgeResult<R> {
                let mut wire = $widen(*self)?;
                Ok(f((&raw mut wire).cast()))
            }
        }
    )*};
}

fn widen_int<T: TryInto<i64> + Copy + fmt::Display>(value: T) -> BridgeResult<i64> {
    value.try_into().map_err(|_| BridgeError::OutOfRange {
        target: "i64",
        value: value.to_string(),
    })
}

fn narrow_int<T: TryFrom<i64>>(wire: i64) -> BridgeResult<T> {
    T::try_from(wire).map_err(|_| BridgeError::OutOfRange {
        target: std::any::type_name::<T>(),
        value: wire.to_string(),
    })
}

fn widen_f32(value: f32) -> BridgeResult<f64> {
    Ok(f64::from(value))
}

/// Finite doubles beyond the `f32` range are refused; precision loss is not.
fn narrow_f32(wire: f64) -> BridgeResult<f32> {
    let narrowed = wire as f32;
    if wire.is_finite() && !narrowed.is_finite() {
        return Err(BridgeError::OutOfRange {
            target: "f32",
            value: wire.to_string(),
        });
    }
    Ok(narrowed)
}

impl_pod_value!(i64 => Int, f64 => Float);
impl_widened_value!(i64, Int, widen_int, narrow_int; i8, i16, i32, u8, u16, u32, u64, isize, usize);
impl_widened_value!(f64, Float, widen_f32, narrow_f32; f32);

impl EngineValue for bool {
    const VARIANT_TYPE: VariantType = VariantType::Bool;
    const SLOT_SIZE: usize = 1;
    const SLOT_ALIGN: usize = 1;
    const CELL: Option<super::cell::CellKind> = None;

    fn encode_arg(&self, frame: &mut CallFrame) -> BridgeResult<()> {
        frame.push_pod(&to_bool(*self));
        Ok(())
    }

    unsafe fn take_slot(slot: *mut c_void, _flavor: Option<ObjectFlavor>) -> BridgeResult<Self> {
        Ok(unsafe { slot.cast::<sys::Bool>().read() } != sys::FALSE)
    }

    unsafe fn copy_slot(slot: *const c_void) -> BridgeResult<Self> {
        Ok(unsafe { slot.cast::<sys::Bool>().read() } != sys::FALSE)
    }

    unsafe fn move_into_slot(self, slot: *mut c_void) -> BridgeResult<()> {
        unsafe { slot.cast::<sys::Bool>().write(to_bool(self)) };
        Ok(())
    }

    fn with_slot_ptr<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> BridgeResult<R> {
        let mut wire = to_bool(*self);
        Ok(f((&raw mut wire).cast()))
    }
}

#[inline]
fn to_bool(value: bool) -> sys::Bool {
    if value { sys::TRUE } else { sys::FALSE }
}

/// No value. Used as the return type of void methods.
impl EngineValue for () {
    const VARIANT_TYPE: VariantType = VariantType::Nil;
    const SLOT_SIZE: usize = 0;
    const SLOT_ALIGN: usize = 1;
    const CELL: Option<super::cell::CellKind> = None;

    fn encode_arg(&self, _frame: &mut CallFrame) -> BridgeResult<()> {
        Ok(())
    }

    unsafe fn take_slot(_slot: *mut c_void, _flavor: Option<ObjectFlavor>) -> BridgeResult<Self> {
        Ok(())
    }

    unsafe fn copy_slot(_slot: *const c_void) -> BridgeResult<Self> {
        Ok(())
    }

    unsafe fn move_into_slot(self, _slot: *mut c_void) -> BridgeResult<()> {
        Ok(())
    }

    fn with_slot_ptr<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> BridgeResult<R> {
        Ok(f(std::ptr::null_mut()))
    }

    fn to_variant(&self) -> BridgeResult<Variant> {
        Variant::nil()
    }

    unsafe fn from_variant_ptr(variant: sys::ConstVariantPtr) -> BridgeResult<Self> {
        let found = unsafe { Variant::type_of_ptr(variant)? };
        if found != VariantType::Nil.raw() {
            return Err(crate::error::BridgeError::type_mismatch(VariantType::Nil, found));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ints_travel_as_i64() {
        let mut frame = CallFrame::acquire();
        7i32.encode_arg(&mut frame).unwrap();
        250u8.encode_arg(&mut frame).unwrap();
        let first = unsafe { frame.arg_ptr(0).unwrap().cast::<i64>().read_unaligned() };
        let second = unsafe { frame.arg_ptr(1).unwrap().cast::<i64>().read_unaligned() };
        assert_eq!(first, 7);
        assert_eq!(second, 250);
    }

    #[test]
    fn test_floats_travel_as_f64() {
        let mut frame = CallFrame::acquire();
        0.5f32.encode_arg(&mut frame).unwrap();
        let wire = unsafe { frame.arg_ptr(0).unwrap().cast::<f64>().read_unaligned() };
        assert_eq!(wire, 0.5);
    }

    #[test]
    fn test_return_slot_decoding() {
        let mut frame = CallFrame::acquire();
        i16::prepare_return(&mut frame).unwrap();
        unsafe { frame.ret_ptr().cast::<i64>().write(-12) };
        let value = i16::decode_ret(&mut frame, None).unwrap();
        assert_eq!(value, -12);

        bool::prepare_return(&mut frame).unwrap();
        unsafe { frame.ret_ptr().cast::<u8>().write(1) };
        assert!(bool::decode_ret(&mut frame, None).unwrap());
    }

    #[test]
    fn test_callback_args_and_ret() {
        let a = 3i64;
        let b = 2.5f64;
        let ptrs = [(&raw const a).cast(), (&raw const b).cast()];
        let args = unsafe { super::super::CallbackArgs::from_ptrcall(ptrs.as_ptr(), 2) };
        assert_eq!(args.get::<i32>(0).unwrap(), 3);
        assert_eq!(args.get::<f32>(1).unwrap(), 2.5);
        assert!(args.get::<i64>(2).is_err());

        let mut out = 0i64;
        42u32
            .encode_callback_ret(super::super::CallbackRet::Ptr((&raw mut out).cast()))
            .unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn test_out_of_range_ints_refused() {
        let wide = 300i64;
        let negative = -1i64;
        let ptrs = [(&raw const wide).cast(), (&raw const negative).cast()];
        let args = unsafe { super::super::CallbackArgs::from_ptrcall(ptrs.as_ptr(), 2) };
        assert_eq!(
            args.get::<u8>(0),
            Err(BridgeError::OutOfRange {
                target: "u8",
                value: "300".into()
            })
        );
        assert_eq!(args.get::<u16>(0).unwrap(), 300);
        assert!(matches!(args.get::<u32>(1), Err(BridgeError::OutOfRange { target: "u32", .. })));
        assert_eq!(args.get::<i8>(1).unwrap(), -1);
    }

    #[test]
    fn test_u64_beyond_i64_refused() {
        let mut frame = CallFrame::acquire();
        assert_eq!(
            u64::MAX.encode_arg(&mut frame),
            Err(BridgeError::OutOfRange {
                target: "i64",
                value: u64::MAX.to_string()
            })
        );
        assert_eq!(frame.arg_count(), 0);
        (i64::MAX as u64).encode_arg(&mut frame).unwrap();

        let mut out = 0i64;
        let err = u64::MAX.encode_callback_ret(super::super::CallbackRet::Ptr((&raw mut out).cast()));
        assert!(err.is_err());
        assert_eq!(out, 0);
    }

    #[test]
    fn test_f32_range() {
        assert!(narrow_f32(1e300).is_err());
        assert_eq!(narrow_f32(0.25).unwrap(), 0.25);
        assert!(narrow_f32(f64::INFINITY).unwrap().is_infinite());
        assert!(narrow_f32(f64::NAN).unwrap().is_nan());
    }
}
