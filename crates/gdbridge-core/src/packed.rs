//! Packed arrays: engine-owned contiguous buffers with value semantics.
//!
//! Conversion from a host slice resizes the engine buffer once and copies
//! the elements in bulk through the pointer returned by the element
//! accessor. String elements are engine values themselves and are copied
//! one by one through the copy constructor.

use crate::builtin::hashes;
use crate::codec::EngineValue;
use crate::codec::cell::{BuiltinCell, CellKind};
use crate::error::{BridgeError, BridgeResult};
use crate::frame::CallFrame;
use crate::interface;
use crate::math::{Color, Vector2, Vector3};
use crate::method;
use crate::obj::ObjectFlavor;
use crate::string::GString;
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;

/// Element type of a packed array.
///
/// # Safety
/// `ARRAY_TYPE` must name the packed array whose elements have the layout
/// of `Self` (or of an engine `String` for [`GString`]).
pub unsafe trait PackedElement: Sized + 'static {
    const ARRAY_TYPE: VariantType;

    /// Write `items` over `len` initialized elements starting at `first`.
    ///
    /// # Safety
    /// `first` must point at `items.len()` initialized elements.
    #[doc(hidden)]
    unsafe fn store(first: *mut c_void, items: &[Self]) -> BridgeResult<()>;

    /// Copy `len` elements out starting at `first`.
    ///
    /// # Safety
    /// `first` must point at `len` initialized elements.
    #[doc(hidden)]
    unsafe fn load(first: *const c_void, len: usize) -> BridgeResult<Vec<Self>>;
}

macro_rules! impl_bulk_element {
    ($($ty:ty => $array:ident),* $(,)?) => {$(
        unsafe impl PackedElement for $ty {
            const ARRAY_TYPE: VariantType = VariantType::$array;

            unsafe fn store(first: *mut c_void, items: &[Self]) -> BridgeResult<()> {
                unsafe {
                    std::ptr::copy_nonoverlapping(items.as_ptr(), first.cast::<$ty>(), items.len())
                };
                Ok(())
            }

            unsafe fn load(first: *const c_void, len: usize) -> BridgeResult<Vec<Self>> {
                let mut items = Vec::<$ty>::with_capacity(len);
                unsafe {
                    std::ptr::copy_nonoverlapping(first.cast::<$ty>(), items.as_mut_ptr(), len);
                    items.set_len(len);
                }
                Ok(items)
            }
        }
    )*};
}

impl_bulk_element! {
    u8 => PackedByteArray,
    i32 => PackedInt32Array,
    i64 => PackedInt64Array,
    f32 => PackedFloat32Array,
    f64 => PackedFloat64Array,
    Vector2 => PackedVector2Array,
    Vector3 => PackedVector3Array,
    Color => PackedColorArray,
}

const STRING: CellKind = CellKind::Builtin(VariantType::String);
const STRING_SIZE: usize = VariantType::String.opaque_size();

unsafe impl PackedElement for GString {
    const ARRAY_TYPE: VariantType = VariantType::PackedStringArray;

    unsafe fn store(first: *mut c_void, items: &[Self]) -> BridgeResult<()> {
        for (index, item) in items.iter().enumerate() {
            let slot = unsafe { first.cast::<u8>().add(index * STRING_SIZE) }.cast::<c_void>();
            let src = item.ptr()?;
            unsafe {
                STRING.destroy(slot);
                STRING.construct_copy(slot, src)?;
            }
        }
        Ok(())
    }

    unsafe fn load(first: *const c_void, len: usize) -> BridgeResult<Vec<Self>> {
        (0..len)
            .map(|index| {
                let slot = unsafe { first.cast::<u8>().add(index * STRING_SIZE) }.cast::<c_void>();
                unsafe { GString::copy_slot(slot) }
            })
            .collect()
    }
}

/// Engine packed array of `T`.
pub struct PackedArray<T: PackedElement> {
    cell: BuiltinCell,
    _element: PhantomData<fn() -> T>,
}

pub type PackedByteArray = PackedArray<u8>;
pub type PackedInt32Array = PackedArray<i32>;
pub type PackedInt64Array = PackedArray<i64>;
pub type PackedFloat32Array = PackedArray<f32>;
pub type PackedFloat64Array = PackedArray<f64>;
pub type PackedStringArray = PackedArray<GString>;
pub type PackedVector2Array = PackedArray<Vector2>;
pub type PackedVector3Array = PackedArray<Vector3>;
pub type PackedColorArray = PackedArray<Color>;

impl<T: PackedElement> PackedArray<T> {
    const KIND: CellKind = CellKind::Builtin(T::ARRAY_TYPE);

    fn from_cell(cell: BuiltinCell) -> Self {
        Self {
            cell,
            _element: PhantomData,
        }
    }

    pub fn new() -> BridgeResult<Self> {
        BuiltinCell::new_default(Self::KIND).map(Self::from_cell)
    }

    /// Copy a host slice into a fresh engine array.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn from_slice(items: &[T]) -> BridgeResult<Self> {
        let array = Self::new()?;
        if items.is_empty() {
            return Ok(array);
        }
        array.resize(items.len())?;
        let first = array.element_ptr()?;
        unsafe { T::store(first, items)? };
        Ok(array)
    }

    /// Copy the elements out into a host vector.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn to_vec(&self) -> BridgeResult<Vec<T>> {
        let len = self.len()?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let (_, index_const) = Self::accessors()?;
        let first = unsafe { index_const(self.cell.ptr()?, 0) };
        if first.is_null() {
            return Err(BridgeError::NullObject);
        }
        unsafe { T::load(first, len) }
    }

    pub fn len(&self) -> BridgeResult<usize> {
        let size = method::builtin_method(T::ARRAY_TYPE, "size", hashes::PACKED_SIZE)?;
        let mut out: i64 = 0;
        unsafe { size(self.cell.ptr()?, std::ptr::null(), (&raw mut out).cast(), 0) };
        Ok(out.max(0) as usize)
    }

    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Resize through the engine; new elements are default-constructed.
    pub fn resize(&self, len: usize) -> BridgeResult<()> {
        let resize = method::builtin_method(T::ARRAY_TYPE, "resize", hashes::PACKED_RESIZE)?;
        let new_size = len as i64;
        let args: [sys::ConstTypePtr; 1] = [(&raw const new_size).cast()];
        let mut status: i64 = 0;
        unsafe { resize(self.cell.ptr()?, args.as_ptr(), (&raw mut status).cast(), 1) };
        BridgeError::from_status(status)
    }

    fn accessors() -> BridgeResult<(sys::PackedOperatorIndexFn, sys::PackedOperatorIndexConstFn)> {
        interface::get()?
            .packed_index(T::ARRAY_TYPE)
            .ok_or(BridgeError::UnknownBuiltinMethod {
                ty: T::ARRAY_TYPE,
                method: "operator[]".into(),
            })
    }

    fn element_ptr(&self) -> BridgeResult<*mut c_void> {
        let (index, _) = Self::accessors()?;
        let first = unsafe { index(self.cell.ptr()?, 0) };
        if first.is_null() {
            return Err(BridgeError::NullObject);
        }
        Ok(first)
    }
}

impl<T: PackedElement> EngineValue for PackedArray<T> {
    const VARIANT_TYPE: VariantType = T::ARRAY_TYPE;
    const SLOT_SIZE: usize = T::ARRAY_TYPE.opaque_size();
    const SLOT_ALIGN: usize = 8;
    const CELL: Option<CellKind> = Some(Self::KIND);

    fn encode_arg(&self, frame: &mut CallFrame) -> BridgeResult<()> {
        self.cell.encode_arg(frame)
    }

    unsafe fn take_slot(slot: *mut c_void, _flavor: Option<ObjectFlavor>) -> BridgeResult<Self> {
        unsafe { BuiltinCell::take_from(Self::KIND, slot) }.map(Self::from_cell)
    }

    unsafe fn copy_slot(slot: *const c_void) -> BridgeResult<Self> {
        unsafe { BuiltinCell::copy_from(Self::KIND, slot) }.map(Self::from_cell)
    }

    unsafe fn move_into_slot(self, slot: *mut c_void) -> BridgeResult<()> {
        unsafe { self.cell.move_into(slot) }
    }

    fn with_slot_ptr<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> BridgeResult<R> {
        Ok(f(self.cell.ptr()?))
    }
}

impl<T: PackedElement> Clone for PackedArray<T> {
    fn clone(&self) -> Self {
        Self::from_cell(self.cell.clone())
    }
}

impl<T: PackedElement> PartialEq for PackedArray<T> {
    fn eq(&self, other: &Self) -> bool {
        let (Ok(left), Ok(right)) = (self.cell.ptr(), other.cell.ptr()) else {
            return false;
        };
        interface::get()
            .and_then(|interface| unsafe { interface.builtins.equal(T::ARRAY_TYPE, left, right) })
            .unwrap_or(false)
    }
}

impl<T: PackedElement> fmt::Debug for PackedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(T::ARRAY_TYPE.name())
            .field("cell", &self.cell)
            .finish()
    }
}

impl<T: PackedElement> TryFrom<&[T]> for PackedArray<T> {
    type Error = BridgeError;

    fn try_from(items: &[T]) -> BridgeResult<Self> {
        Self::from_slice(items)
    }
}

impl<T: PackedElement, const N: usize> TryFrom<[T; N]> for PackedArray<T> {
    type Error = BridgeError;

    fn try_from(items: [T; N]) -> BridgeResult<Self> {
        Self::from_slice(&items)
    }
}
