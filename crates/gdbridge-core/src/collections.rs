//! Heterogeneous `Array` and `Dictionary`.
//!
//! Every element access goes through the engine's accessors; elements are
//! variants copied in and out with the variant copy constructor.

use crate::builtin::hashes;
use crate::codec::cell::{BuiltinCell, CellKind};
use crate::codec::{EngineValue, impl_cell_value};
use crate::error::{BridgeError, BridgeResult};
use crate::interface;
use crate::method;
use crate::variant::Variant;
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use std::fmt;

const ARRAY: CellKind = CellKind::Builtin(VariantType::Array);
const DICTIONARY: CellKind = CellKind::Builtin(VariantType::Dictionary);

/// Engine `Array` of variants.
pub struct VariantArray(pub(crate) BuiltinCell);

/// Engine `Dictionary`.
pub struct Dictionary(pub(crate) BuiltinCell);

impl_cell_value!(VariantArray, ARRAY, VariantType::Array);
impl_cell_value!(Dictionary, DICTIONARY, VariantType::Dictionary);

/// Overwrite an initialized variant slot with a copy of `value`.
///
/// # Safety
/// `slot` must point at an initialized variant.
unsafe fn assign(slot: sys::VariantPtr, value: &Variant) -> BridgeResult<()> {
    let src = value.ptr()?;
    unsafe {
        CellKind::Variant.destroy(slot);
        CellKind::Variant.construct_copy(slot, src)
    }
}

fn builtin_size(ty: VariantType, hash: i64, this: sys::TypePtr) -> BridgeResult<usize> {
    let size = method::builtin_method(ty, "size", hash)?;
    let mut out: i64 = 0;
    unsafe { size(this, std::ptr::null(), (&raw mut out).cast(), 0) };
    Ok(out.max(0) as usize)
}

impl VariantArray {
    pub fn new() -> BridgeResult<Self> {
        BuiltinCell::new_default(ARRAY).map(Self)
    }

    pub fn from_variants(items: &[Variant]) -> BridgeResult<Self> {
        let array = Self::new()?;
        array.resize(items.len())?;
        for (index, item) in items.iter().enumerate() {
            array.set(index, item)?;
        }
        Ok(array)
    }

    pub fn len(&self) -> BridgeResult<usize> {
        builtin_size(VariantType::Array, hashes::ARRAY_SIZE, self.0.ptr()?)
    }

    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn resize(&self, len: usize) -> BridgeResult<()> {
        let resize = method::builtin_method(VariantType::Array, "resize", hashes::ARRAY_RESIZE)?;
        let new_size = len as i64;
        let args: [sys::ConstTypePtr; 1] = [(&raw const new_size).cast()];
        let mut status: i64 = 0;
        unsafe { resize(self.0.ptr()?, args.as_ptr(), (&raw mut status).cast(), 1) };
        BridgeError::from_status(status)
    }

    /// Copy of element `index`, `None` when out of range.
    pub fn get(&self, index: usize) -> BridgeResult<Option<Variant>> {
        let interface = interface::get()?;
        let slot = unsafe { (interface.array_operator_index_const)(self.0.ptr()?, index as sys::Int) };
        if slot.is_null() {
            return Ok(None);
        }
        unsafe { Variant::copy_slot(slot) }.map(Some)
    }

    /// Overwrite element `index`.
    ///
    /// # Errors
    /// `NullObject` when the index is out of range.
    pub fn set(&self, index: usize, value: &Variant) -> BridgeResult<()> {
        let interface = interface::get()?;
        let slot = unsafe { (interface.array_operator_index)(self.0.ptr()?, index as sys::Int) };
        if slot.is_null() {
            return Err(BridgeError::NullObject);
        }
        unsafe { assign(slot, value) }
    }

    pub fn push(&self, value: &Variant) -> BridgeResult<()> {
        let len = self.len()?;
        self.resize(len + 1)?;
        self.set(len, value)
    }

    pub fn to_vec(&self) -> BridgeResult<Vec<Variant>> {
        (0..self.len()?)
            .map(|index| self.get(index)?.ok_or(BridgeError::NullObject))
            .collect()
    }
}

impl Dictionary {
    pub fn new() -> BridgeResult<Self> {
        BuiltinCell::new_default(DICTIONARY).map(Self)
    }

    pub fn len(&self) -> BridgeResult<usize> {
        builtin_size(VariantType::Dictionary, hashes::DICTIONARY_SIZE, self.0.ptr()?)
    }

    pub fn is_empty(&self) -> BridgeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy of the value under `key`, `None` when absent.
    pub fn get(&self, key: &Variant) -> BridgeResult<Option<Variant>> {
        let interface = interface::get()?;
        let slot = unsafe { (interface.dictionary_operator_index_const)(self.0.ptr()?, key.ptr()?) };
        if slot.is_null() {
            return Ok(None);
        }
        unsafe { Variant::copy_slot(slot) }.map(Some)
    }

    /// Insert or overwrite `key`.
    pub fn set(&self, key: &Variant, value: &Variant) -> BridgeResult<()> {
        let interface = interface::get()?;
        let slot = unsafe { (interface.dictionary_operator_index)(self.0.ptr()?, key.ptr()?) };
        if slot.is_null() {
            return Err(BridgeError::NullObject);
        }
        unsafe { assign(slot, value) }
    }

    pub fn keys(&self) -> BridgeResult<VariantArray> {
        let keys = method::builtin_method(VariantType::Dictionary, "keys", hashes::DICTIONARY_KEYS)?;
        let this = self.0.ptr()?;
        let out = VariantArray::new()?;
        unsafe { keys(this, std::ptr::null(), out.0.ptr()?, 0) };
        Ok(out)
    }

    /// Key/value pairs in engine iteration order.
    pub fn entries(&self) -> BridgeResult<Vec<(Variant, Variant)>> {
        self.keys()?
            .to_vec()?
            .into_iter()
            .map(|key| {
                let value = self.get(&key)?.ok_or(BridgeError::NullObject)?;
                Ok((key, value))
            })
            .collect()
    }

    /// Build from host pairs, boxing each side into a variant.
    pub fn from_pairs<K: EngineValue, V: EngineValue>(pairs: &[(K, V)]) -> BridgeResult<Self> {
        let dictionary = Self::new()?;
        for (key, value) in pairs {
            dictionary.set(&key.to_variant()?, &value.to_variant()?)?;
        }
        Ok(dictionary)
    }
}

macro_rules! impl_container_traits {
    ($($ty:ident => $variant_type:expr),*) => {$(
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                let (Ok(left), Ok(right)) = (self.0.ptr(), other.0.ptr()) else {
                    return false;
                };
                interface::get()
                    .and_then(|interface| unsafe {
                        interface.builtins.equal($variant_type, left, right)
                    })
                    .unwrap_or(false)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.len() {
                    Ok(len) => write!(f, "{}(len = {len})", stringify!($ty)),
                    Err(err) => write!(f, "{}(<{err}>)", stringify!($ty)),
                }
            }
        }
    )*};
}

impl_container_traits!(VariantArray => VariantType::Array, Dictionary => VariantType::Dictionary);
