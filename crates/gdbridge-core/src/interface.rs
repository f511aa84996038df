//! The engine's function-pointer table.
//!
//! Every entry is fetched once through `get_proc_address`, the engine version
//! is checked, and the result (including the per-type catalog in
//! [`crate::builtin`]) is published into a process-wide `OnceLock`. After
//! that the table is never mutated and is read without synchronization.

use crate::builtin::BuiltinCatalog;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use gdbridge_sys as sys;
use gdbridge_sys::{EngineVersion, GetProcAddress, VariantType};
use std::ffi::CString;
use std::sync::OnceLock;

static INTERFACE: OnceLock<Interface> = OnceLock::new();

/// Fetch one entry by its engine name.
///
/// # Safety
/// `F` must be the function-pointer type the engine uses for `name`, and
/// `name` must be nul-terminated.
unsafe fn fetch<F: Copy>(get_proc_address: GetProcAddress, name: &'static str) -> BridgeResult<F> {
    debug_assert!(name.ends_with('\0'));
    debug_assert_eq!(size_of::<F>(), size_of::<unsafe extern "C" fn()>());

    let raw = unsafe { get_proc_address(name.as_ptr().cast()) }
        .ok_or(BridgeError::MissingInterfaceFunction(name.trim_end_matches('\0')))?;

    // Entries are returned type-erased; the caller names the real signature.
    Ok(unsafe { std::mem::transmute_copy::<unsafe extern "C" fn(), F>(&raw) })
}

macro_rules! interface_table {
    ($( $field:ident : $ty:ident ),* $(,)?) => {
        /// Loaded engine interface.
        ///
        /// Field names are the engine's entry names.
        pub struct Interface {
            pub version: EngineVersion,
            pub builtins: BuiltinCatalog,
            $( pub $field: sys::$ty, )*
        }

        impl Interface {
            unsafe fn fetch_entries(
                get_proc_address: GetProcAddress,
                version: EngineVersion,
            ) -> BridgeResult<Self> {
                let mut interface = Self {
                    version,
                    builtins: BuiltinCatalog::empty(),
                    $( $field: unsafe {
                        fetch::<sys::$ty>(get_proc_address, concat!(stringify!($field), "\0"))?
                    }, )*
                };
                interface.builtins = unsafe { BuiltinCatalog::load(&interface) };
                Ok(interface)
            }

            /// Names of every entry this build requires.
            pub const ENTRY_NAMES: &'static [&'static str] = &[$( stringify!($field), )*];
        }
    };
}

interface_table! {
    mem_alloc: MemAllocFn,
    mem_realloc: MemReallocFn,
    mem_free: MemFreeFn,

    print_error: PrintFn,
    print_warning: PrintFn,

    variant_new_copy: VariantNewCopyFn,
    variant_new_nil: VariantNewNilFn,
    variant_destroy: VariantDestroyFn,
    variant_get_type: VariantGetTypeFn,
    variant_call: VariantCallFn,
    variant_evaluate: VariantEvaluateFn,
    get_variant_from_type_constructor: GetVariantFromTypeConstructorFn,
    get_variant_to_type_constructor: GetVariantToTypeConstructorFn,
    variant_get_ptr_constructor: VariantGetPtrConstructorFn,
    variant_get_ptr_destructor: VariantGetPtrDestructorFn,
    variant_get_ptr_operator_evaluator: VariantGetPtrOperatorEvaluatorFn,
    variant_get_ptr_builtin_method: VariantGetPtrBuiltinMethodFn,

    string_new_with_utf8_chars_and_len: StringNewWithUtf8CharsAndLenFn,
    string_to_utf8_chars: StringToUtf8CharsFn,
    string_name_new_with_utf8_chars_and_len: StringNameNewWithUtf8CharsAndLenFn,

    packed_byte_array_operator_index: PackedOperatorIndexFn,
    packed_byte_array_operator_index_const: PackedOperatorIndexConstFn,
    packed_int32_array_operator_index: PackedOperatorIndexFn,
    packed_int32_array_operator_index_const: PackedOperatorIndexConstFn,
    packed_int64_array_operator_index: PackedOperatorIndexFn,
    packed_int64_array_operator_index_const: PackedOperatorIndexConstFn,
    packed_float32_array_operator_index: PackedOperatorIndexFn,
    packed_float32_array_operator_index_const: PackedOperatorIndexConstFn,
    packed_float64_array_operator_index: PackedOperatorIndexFn,
    packed_float64_array_operator_index_const: PackedOperatorIndexConstFn,
    packed_string_array_operator_index: PackedOperatorIndexFn,
    packed_string_array_operator_index_const: PackedOperatorIndexConstFn,
    packed_vector2_array_operator_index: PackedOperatorIndexFn,
    packed_vector2_array_operator_index_const: PackedOperatorIndexConstFn,
    packed_vector3_array_operator_index: PackedOperatorIndexFn,
    packed_vector3_array_operator_index_const: PackedOperatorIndexConstFn,
    packed_color_array_operator_index: PackedOperatorIndexFn,
    packed_color_array_operator_index_const: PackedOperatorIndexConstFn,

    array_operator_index: ArrayOperatorIndexFn,
    array_operator_index_const: ArrayOperatorIndexConstFn,
    dictionary_operator_index: DictionaryOperatorIndexFn,
    dictionary_operator_index_const: DictionaryOperatorIndexConstFn,

    object_method_bind_ptrcall: ObjectMethodBindPtrcallFn,
    object_method_bind_call: ObjectMethodBindCallFn,
    object_destroy: ObjectDestroyFn,
    object_get_instance_binding: ObjectGetInstanceBindingFn,
    object_set_instance_binding: ObjectSetInstanceBindingFn,
    object_free_instance_binding: ObjectFreeInstanceBindingFn,
    object_set_instance: ObjectSetInstanceFn,
    object_get_class_name: ObjectGetClassNameFn,
    object_cast_to: ObjectCastToFn,
    object_get_instance_id: ObjectGetInstanceIdFn,

    ref_get_object: RefGetObjectFn,
    ref_set_object: RefSetObjectFn,

    callable_custom_create: CallableCustomCreateFn,

    classdb_construct_object: ClassdbConstructObjectFn,
    classdb_get_method_bind: ClassdbGetMethodBindFn,
    classdb_get_method_hash: ClassdbGetMethodHashFn,
    classdb_get_class_tag: ClassdbGetClassTagFn,
    classdb_register_extension_class: ClassdbRegisterExtensionClassFn,
    classdb_register_extension_class_method: ClassdbRegisterExtensionClassMethodFn,
    classdb_register_extension_class_property: ClassdbRegisterExtensionClassPropertyFn,
    classdb_register_extension_class_signal: ClassdbRegisterExtensionClassSignalFn,
    classdb_unregister_extension_class: ClassdbUnregisterExtensionClassFn,
}

impl Interface {
    /// Fetch every entry and check the engine version without publishing.
    ///
    /// # Errors
    /// `MissingInterfaceFunction` when an entry is absent,
    /// `AbiVersionMismatch` when the engine is older than the configured minimum.
    ///
    /// # Safety
    /// `get_proc_address` must be the engine's bootstrap function.
    pub unsafe fn load(
        get_proc_address: GetProcAddress,
        config: &BridgeConfig,
    ) -> BridgeResult<Interface> {
        let get_version: sys::GetVersionFn =
            unsafe { fetch(get_proc_address, "get_version\0")? };

        let mut version = EngineVersion::default();
        unsafe { get_version(&mut version) };

        if !config.accepts(&version) {
            let (major, minor) = config.min_engine_version;
            return Err(BridgeError::AbiVersionMismatch {
                required: format!("{major}.{minor}"),
                found: format!("{}.{}.{}", version.major, version.minor, version.patch),
            });
        }

        tracing::debug!(
            major = version.major,
            minor = version.minor,
            patch = version.patch,
            "engine interface version accepted"
        );

        unsafe { Self::fetch_entries(get_proc_address, version) }
    }

    /// Element accessors for a packed array type.
    pub fn packed_index(
        &self,
        ty: VariantType,
    ) -> Option<(sys::PackedOperatorIndexFn, sys::PackedOperatorIndexConstFn)> {
        let pair = match ty {
            VariantType::PackedByteArray => (
                self.packed_byte_array_operator_index,
                self.packed_byte_array_operator_index_const,
            ),
            VariantType::PackedInt32Array => (
                self.packed_int32_array_operator_index,
                self.packed_int32_array_operator_index_const,
            ),
            VariantType::PackedInt64Array => (
                self.packed_int64_array_operator_index,
                self.packed_int64_array_operator_index_const,
            ),
            VariantType::PackedFloat32Array => (
                self.packed_float32_array_operator_index,
                self.packed_float32_array_operator_index_const,
            ),
            VariantType::PackedFloat64Array => (
                self.packed_float64_array_operator_index,
                self.packed_float64_array_operator_index_const,
            ),
            VariantType::PackedStringArray => (
                self.packed_string_array_operator_index,
                self.packed_string_array_operator_index_const,
            ),
            VariantType::PackedVector2Array => (
                self.packed_vector2_array_operator_index,
                self.packed_vector2_array_operator_index_const,
            ),
            VariantType::PackedVector3Array => (
                self.packed_vector3_array_operator_index,
                self.packed_vector3_array_operator_index_const,
            ),
            VariantType::PackedColorArray => (
                self.packed_color_array_operator_index,
                self.packed_color_array_operator_index_const,
            ),
            _ => return None,
        };
        Some(pair)
    }
}

/// Publish a loaded interface. The first published table wins.
pub fn publish(interface: Interface) -> &'static Interface {
    let mut fresh = false;
    let published = INTERFACE.get_or_init(|| {
        fresh = true;
        interface
    });
    if !fresh {
        tracing::debug!("engine interface already published, keeping the first table");
    }
    published
}

/// The published interface.
///
/// # Errors
/// `NotInitialized` before [`crate::init::initialize`] has run.
#[inline]
pub fn get() -> BridgeResult<&'static Interface> {
    INTERFACE.get().ok_or(BridgeError::NotInitialized)
}

pub fn is_loaded() -> bool {
    INTERFACE.get().is_some()
}

fn c_text(text: &str) -> CString {
    CString::new(text.replace('\0', " ")).unwrap_or_default()
}

/// Send a message to the engine's error console. No-op before load.
pub fn print_error_to_engine(message: &str, function: &str, file: &str, line: u32) {
    if let Ok(interface) = get() {
        let (message, function, file) = (c_text(message), c_text(function), c_text(file));
        unsafe {
            (interface.print_error)(
                message.as_ptr(),
                function.as_ptr(),
                file.as_ptr(),
                line as i32,
                sys::FALSE,
            )
        };
    }
}

/// Send a message to the engine's warning console. No-op before load.
pub fn print_warning_to_engine(message: &str, function: &str, file: &str, line: u32) {
    if let Ok(interface) = get() {
        let (message, function, file) = (c_text(message), c_text(function), c_text(file));
        unsafe {
            (interface.print_warning)(
                message.as_ptr(),
                function.as_ptr(),
                file.as_ptr(),
                line as i32,
                sys::FALSE,
            )
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_names_unique() {
        let mut names = Interface::ENTRY_NAMES.to_vec();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(names.len(), before);
        assert!(names.contains(&"classdb_get_method_hash"));
        assert!(names.contains(&"packed_color_array_operator_index_const"));
    }

    #[test]
    fn test_not_initialized() {
        // Unit tests never load an engine.
        assert_eq!(get().err(), Some(BridgeError::NotInitialized));
    }
}
