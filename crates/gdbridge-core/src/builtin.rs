//! Per-type catalog of built-in constructors, destructors and evaluators.

use crate::error::{BridgeError, BridgeResult};
use crate::interface::Interface;
use gdbridge_sys as sys;
use gdbridge_sys::{VariantOperator, VariantType};

/// Constructor index of the default constructor.
pub const CTOR_DEFAULT: usize = 0;
/// Constructor index of the copy constructor.
pub const CTOR_COPY: usize = 1;
/// Highest constructor index queried per type.
pub const CTOR_COUNT: usize = 4;

/// `String(StringName)`, `StringName(String)` and `NodePath(String)`.
pub const CTOR_FROM_TEXT: usize = 2;
/// `String(NodePath)`.
pub const CTOR_STRING_FROM_NODE_PATH: usize = 3;

/// Signature hashes of the built-in methods the codec calls.
pub mod hashes {
    pub const PACKED_RESIZE: i64 = 848867239;
    pub const PACKED_SIZE: i64 = 3173160232;
    pub const ARRAY_RESIZE: i64 = 848867239;
    pub const ARRAY_SIZE: i64 = 3173160232;
    pub const DICTIONARY_SIZE: i64 = 3173160232;
    pub const DICTIONARY_KEYS: i64 = 4144163970;
}

/// Function pointers of one built-in type.
#[derive(Clone, Copy, Default)]
pub struct BuiltinEntry {
    pub constructors: [sys::PtrConstructor; CTOR_COUNT],
    pub destructor: sys::PtrDestructor,
    pub from_type: sys::VariantFromTypeConstructorFunc,
    pub to_type: sys::TypeFromVariantConstructorFunc,
    pub equal: sys::PtrOperatorEvaluator,
}

pub struct BuiltinCatalog {
    entries: [BuiltinEntry; VariantType::COUNT],
}

impl BuiltinCatalog {
    pub(crate) fn empty() -> Self {
        Self {
            entries: [BuiltinEntry::default(); VariantType::COUNT],
        }
    }

    /// Query every built-in type's accessors from a freshly fetched interface.
    ///
    /// # Safety
    /// Every entry of `interface` must be a valid engine function.
    pub(crate) unsafe fn load(interface: &Interface) -> Self {
        let equal: u32 = VariantOperator::Equal.into();
        let entries = std::array::from_fn(|index| {
            let ty = VariantType::ALL[index];
            let raw = ty.raw();
            if ty == VariantType::Nil {
                return BuiltinEntry::default();
            }
            unsafe {
                BuiltinEntry {
                    constructors: std::array::from_fn(|index| {
                        (interface.variant_get_ptr_constructor)(raw, index as i32)
                    }),
                    destructor: (interface.variant_get_ptr_destructor)(raw),
                    from_type: (interface.get_variant_from_type_constructor)(raw),
                    to_type: (interface.get_variant_to_type_constructor)(raw),
                    equal: (interface.variant_get_ptr_operator_evaluator)(equal, raw, raw),
                }
            }
        });

        let catalog = Self { entries };
        tracing::debug!(
            types = VariantType::COUNT,
            with_destructor = catalog.entries.iter().filter(|e| e.destructor.is_some()).count(),
            "built-in catalog loaded"
        );
        catalog
    }

    #[inline]
    pub fn entry(&self, ty: VariantType) -> &BuiltinEntry {
        &self.entries[ty.index()]
    }

    pub fn constructor(
        &self,
        ty: VariantType,
        index: usize,
    ) -> BridgeResult<unsafe extern "C" fn(sys::UninitTypePtr, *const sys::ConstTypePtr)> {
        self.entry(ty)
            .constructors
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| BridgeError::UnknownBuiltinMethod {
                ty,
                method: format!("constructor #{index}"),
            })
    }

    pub fn from_type(
        &self,
        ty: VariantType,
    ) -> BridgeResult<unsafe extern "C" fn(sys::UninitVariantPtr, sys::TypePtr)> {
        self.entry(ty)
            .from_type
            .ok_or_else(|| BridgeError::UnknownBuiltinMethod {
                ty,
                method: "to variant".into(),
            })
    }

    pub fn to_type(
        &self,
        ty: VariantType,
    ) -> BridgeResult<unsafe extern "C" fn(sys::UninitTypePtr, sys::VariantPtr)> {
        self.entry(ty)
            .to_type
            .ok_or_else(|| BridgeError::UnknownBuiltinMethod {
                ty,
                method: "from variant".into(),
            })
    }

    /// Run the destructor of `ty` on `ptr`. Types without one need no cleanup.
    ///
    /// # Safety
    /// `ptr` must point at an initialized value of `ty`.
    pub unsafe fn destroy(&self, ty: VariantType, ptr: sys::TypePtr) {
        if let Some(destructor) = self.entry(ty).destructor {
            unsafe { destructor(ptr) };
        }
    }

    /// Compare two values with the engine's `==` evaluator.
    ///
    /// # Safety
    /// Both pointers must point at initialized values of `ty`.
    pub unsafe fn equal(
        &self,
        ty: VariantType,
        left: sys::ConstTypePtr,
        right: sys::ConstTypePtr,
    ) -> BridgeResult<bool> {
        let evaluator = self
            .entry(ty)
            .equal
            .ok_or_else(|| BridgeError::UnknownBuiltinMethod {
                ty,
                method: "==".into(),
            })?;
        let mut result: sys::Bool = sys::FALSE;
        unsafe { evaluator(left, right, (&raw mut result).cast()) };
        Ok(result != sys::FALSE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_catalog_reports_missing() {
        let catalog = BuiltinCatalog::empty();
        assert!(catalog.entry(VariantType::String).destructor.is_none());
        assert!(matches!(
            catalog.constructor(VariantType::String, CTOR_DEFAULT),
            Err(BridgeError::UnknownBuiltinMethod {
                ty: VariantType::String,
                ..
            })
        ));
        assert!(catalog.constructor(VariantType::String, 7).is_err());
    }
}
