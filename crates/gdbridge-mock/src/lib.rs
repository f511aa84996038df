//! # gdbridge-mock
//!
//! An in-process engine that serves the extension interface through
//! [`get_proc_address`], so the bridge can be exercised without a real
//! engine binary.
//!
//! The mock keeps its own class database with a handful of native classes
//! (`Object`, `RefCounted`, `Resource`, `Gradient`, `HeightMapShape3D`,
//! `Translation`, `Node`, `Holder`, `Echo`), accepts extension class
//! registration, and counts objects, heap cells, allocations and calls so
//! tests can check for leaks and stray engine calls.
//!
//! ```ignore
//! let config = BridgeConfig::default();
//! unsafe { gdbridge::init::initialize(gdbridge_mock::get_proc_address, gdbridge_mock::library(), config)? };
//! let before = gdbridge_mock::snapshot();
//! ```

mod builtins;
mod classdb;
pub mod driver;
mod natives;
mod object;
mod stats;
mod value;

pub use builtins::callable_variant;
pub use classdb::{ClassInfo, Param, PropertyDef, SignalDef, class_info, signature_hash};
pub use object::{ObjData, ObjRef, is_alive, live_count};
pub use stats::{Stats, constructed, destroyed, snapshot, take_errors, take_warnings};
pub use value::{Cell, CellBox, Packed, PackedData, Var};

use gdbridge_sys as sys;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::alloc::Layout;
use std::ffi::{CStr, c_char, c_void};
use std::sync::LazyLock;
use std::sync::atomic::Ordering;

/// Room in front of every `mem_alloc` block for its size.
const HEADER: usize = 16;

static VERSION: Mutex<(u32, u32, u32)> = Mutex::new((4, 2, 0));
static HIDDEN: LazyLock<Mutex<FxHashSet<String>>> = LazyLock::new(|| Mutex::new(FxHashSet::default()));
static LIBRARY: u8 = 0;

/// Set the version `get_version` reports.
pub fn set_version(major: u32, minor: u32, patch: u32) {
    *VERSION.lock() = (major, minor, patch);
}

/// Make `get_proc_address` answer null for `name`.
pub fn hide_entry(name: &str) {
    HIDDEN.lock().insert(name.to_owned());
}

pub fn show_all_entries() {
    HIDDEN.lock().clear();
}

/// The library pointer the engine hands to the extension.
pub fn library() -> sys::ClassLibraryPtr {
    (&raw const LIBRARY).cast_mut().cast()
}

/// Log an engine-side error and record it like a console message.
pub(crate) fn report_error(message: String) {
    tracing::error!(target: "engine", "{message}");
    stats::record_error(message);
}

// ========== MEMORY ==========

fn block_layout(bytes: usize) -> Option<Layout> {
    Layout::from_size_align(bytes.checked_add(HEADER)?, HEADER).ok()
}

unsafe extern "C" fn mem_alloc(bytes: usize) -> *mut c_void {
    let Some(layout) = block_layout(bytes) else {
        return std::ptr::null_mut();
    };
    let base = unsafe { std::alloc::alloc(layout) };
    if base.is_null() {
        return std::ptr::null_mut();
    }
    stats::BLOCKS_ALIVE.fetch_add(1, Ordering::Relaxed);
    unsafe {
        base.cast::<usize>().write(bytes);
        base.add(HEADER).cast()
    }
}

unsafe extern "C" fn mem_realloc(ptr: *mut c_void, bytes: usize) -> *mut c_void {
    if ptr.is_null() {
        return unsafe { mem_alloc(bytes) };
    }
    let base = unsafe { ptr.cast::<u8>().sub(HEADER) };
    let old = unsafe { base.cast::<usize>().read() };
    let (Some(layout), Some(_)) = (block_layout(old), block_layout(bytes)) else {
        return std::ptr::null_mut();
    };
    let grown = unsafe { std::alloc::realloc(base, layout, bytes + HEADER) };
    if grown.is_null() {
        return std::ptr::null_mut();
    }
    unsafe {
        grown.cast::<usize>().write(bytes);
        grown.add(HEADER).cast()
    }
}

unsafe extern "C" fn mem_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let base = unsafe { ptr.cast::<u8>().sub(HEADER) };
    let bytes = unsafe { base.cast::<usize>().read() };
    if let Some(layout) = block_layout(bytes) {
        unsafe { std::alloc::dealloc(base, layout) };
        stats::BLOCKS_ALIVE.fetch_sub(1, Ordering::Relaxed);
    }
}

// ========== CONSOLE ==========

unsafe fn text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

unsafe extern "C" fn print_error(
    description: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
    _editor_notify: sys::Bool,
) {
    let (message, function, file) = unsafe { (text(description), text(function), text(file)) };
    tracing::error!(target: "engine", %function, %file, line, "{message}");
    stats::record_error(message);
}

unsafe extern "C" fn print_warning(
    description: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
    _editor_notify: sys::Bool,
) {
    let (message, function, file) = unsafe { (text(description), text(function), text(file)) };
    tracing::warn!(target: "engine", %function, %file, line, "{message}");
    stats::record_warning(message);
}

unsafe extern "C" fn get_version(r_version: *mut sys::EngineVersion) {
    let (major, minor, patch) = *VERSION.lock();
    if let Some(version) = unsafe { r_version.as_mut() } {
        *version = sys::EngineVersion {
            major,
            minor,
            patch,
            abi_hash: 0,
        };
    }
}

// ========== ENTRY TABLE ==========

macro_rules! entry_table {
    ($( $name:ident : $path:path as $ty:ident ),* $(,)?) => {
        static ENTRIES: LazyLock<FxHashMap<&'static str, unsafe extern "C" fn()>> = LazyLock::new(|| {
            let mut entries = FxHashMap::default();
            $(
                let entry: sys::$ty = $path;
                // Handed out type-erased; the caller casts back to `sys::$ty`.
                let erased = unsafe { std::mem::transmute::<sys::$ty, unsafe extern "C" fn()>(entry) };
                entries.insert(stringify!($name), erased);
            )*
            entries
        });
    };
}

entry_table! {
    get_version: get_version as GetVersionFn,

    mem_alloc: mem_alloc as MemAllocFn,
    mem_realloc: mem_realloc as MemReallocFn,
    mem_free: mem_free as MemFreeFn,
    print_error: print_error as PrintFn,
    print_warning: print_warning as PrintFn,

    variant_new_copy: builtins::variant_new_copy as VariantNewCopyFn,
    variant_new_nil: builtins::variant_new_nil as VariantNewNilFn,
    variant_destroy: builtins::variant_destroy as VariantDestroyFn,
    variant_get_type: builtins::variant_get_type as VariantGetTypeFn,
    variant_call: builtins::variant_call as VariantCallFn,
    variant_evaluate: builtins::variant_evaluate as VariantEvaluateFn,
    get_variant_from_type_constructor: builtins::get_variant_from_type_constructor as GetVariantFromTypeConstructorFn,
    get_variant_to_type_constructor: builtins::get_variant_to_type_constructor as GetVariantToTypeConstructorFn,
    variant_get_ptr_constructor: builtins::variant_get_ptr_constructor as VariantGetPtrConstructorFn,
    variant_get_ptr_destructor: builtins::variant_get_ptr_destructor as VariantGetPtrDestructorFn,
    variant_get_ptr_operator_evaluator: builtins::variant_get_ptr_operator_evaluator as VariantGetPtrOperatorEvaluatorFn,
    variant_get_ptr_builtin_method: builtins::variant_get_ptr_builtin_method as VariantGetPtrBuiltinMethodFn,

    string_new_with_utf8_chars_and_len: builtins::string_new_with_utf8_chars_and_len as StringNewWithUtf8CharsAndLenFn,
    string_to_utf8_chars: builtins::string_to_utf8_chars as StringToUtf8CharsFn,
    string_name_new_with_utf8_chars_and_len: builtins::string_name_new_with_utf8_chars_and_len as StringNameNewWithUtf8CharsAndLenFn,

    packed_byte_array_operator_index: builtins::packed_index as PackedOperatorIndexFn,
    packed_byte_array_operator_index_const: builtins::packed_index_const as PackedOperatorIndexConstFn,
    packed_int32_array_operator_index: builtins::packed_index as PackedOperatorIndexFn,
    packed_int32_array_operator_index_const: builtins::packed_index_const as PackedOperatorIndexConstFn,
    packed_int64_array_operator_index: builtins::packed_index as PackedOperatorIndexFn,
    packed_int64_array_operator_index_const: builtins::packed_index_const as PackedOperatorIndexConstFn,
    packed_float32_array_operator_index: builtins::packed_index as PackedOperatorIndexFn,
    packed_float32_array_operator_index_const: builtins::packed_index_const as PackedOperatorIndexConstFn,
    packed_float64_array_operator_index: builtins::packed_index as PackedOperatorIndexFn,
    packed_float64_array_operator_index_const: builtins::packed_index_const as PackedOperatorIndexConstFn,
    packed_string_array_operator_index: builtins::packed_index as PackedOperatorIndexFn,
    packed_string_array_operator_index_const: builtins::packed_index_const as PackedOperatorIndexConstFn,
    packed_vector2_array_operator_index: builtins::packed_index as PackedOperatorIndexFn,
    packed_vector2_array_operator_index_const: builtins::packed_index_const as PackedOperatorIndexConstFn,
    packed_vector3_array_operator_index: builtins::packed_index as PackedOperatorIndexFn,
    packed_vector3_array_operator_index_const: builtins::packed_index_const as PackedOperatorIndexConstFn,
    packed_color_array_operator_index: builtins::packed_index as PackedOperatorIndexFn,
    packed_color_array_operator_index_const: builtins::packed_index_const as PackedOperatorIndexConstFn,

    array_operator_index: builtins::array_operator_index as ArrayOperatorIndexFn,
    array_operator_index_const: builtins::array_operator_index_const as ArrayOperatorIndexConstFn,
    dictionary_operator_index: builtins::dictionary_operator_index as DictionaryOperatorIndexFn,
    dictionary_operator_index_const: builtins::dictionary_operator_index_const as DictionaryOperatorIndexConstFn,

    object_method_bind_ptrcall: classdb::object_method_bind_ptrcall as ObjectMethodBindPtrcallFn,
    object_method_bind_call: classdb::object_method_bind_call as ObjectMethodBindCallFn,
    object_destroy: object::object_destroy as ObjectDestroyFn,
    object_get_instance_binding: object::object_get_instance_binding as ObjectGetInstanceBindingFn,
    object_set_instance_binding: object::object_set_instance_binding as ObjectSetInstanceBindingFn,
    object_free_instance_binding: object::object_free_instance_binding as ObjectFreeInstanceBindingFn,
    object_set_instance: object::object_set_instance as ObjectSetInstanceFn,
    object_get_class_name: object::object_get_class_name as ObjectGetClassNameFn,
    object_cast_to: object::object_cast_to as ObjectCastToFn,
    object_get_instance_id: object::object_get_instance_id as ObjectGetInstanceIdFn,

    ref_get_object: object::ref_get_object as RefGetObjectFn,
    ref_set_object: object::ref_set_object as RefSetObjectFn,

    callable_custom_create: builtins::callable_custom_create as CallableCustomCreateFn,

    classdb_construct_object: classdb::classdb_construct_object as ClassdbConstructObjectFn,
    classdb_get_method_bind: classdb::classdb_get_method_bind as ClassdbGetMethodBindFn,
    classdb_get_method_hash: classdb::classdb_get_method_hash as ClassdbGetMethodHashFn,
    classdb_get_class_tag: classdb::classdb_get_class_tag as ClassdbGetClassTagFn,
    classdb_register_extension_class: classdb::classdb_register_extension_class as ClassdbRegisterExtensionClassFn,
    classdb_register_extension_class_method: classdb::classdb_register_extension_class_method as ClassdbRegisterExtensionClassMethodFn,
    classdb_register_extension_class_property: classdb::classdb_register_extension_class_property as ClassdbRegisterExtensionClassPropertyFn,
    classdb_register_extension_class_signal: classdb::classdb_register_extension_class_signal as ClassdbRegisterExtensionClassSignalFn,
    classdb_unregister_extension_class: classdb::classdb_unregister_extension_class as ClassdbUnregisterExtensionClassFn,
}

/// The engine's bootstrap function.
///
/// # Safety
/// `name` must be null or a nul-terminated string.
pub unsafe extern "C" fn get_proc_address(name: *const c_char) -> sys::InterfaceFunctionPtr {
    if name.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(name) }.to_str().ok()?;
    if HIDDEN.lock().contains(name) {
        tracing::debug!(name, "hidden interface entry requested");
        return None;
    }
    let entry = ENTRIES.get(name).copied();
    if entry.is_none() {
        tracing::warn!(name, "unknown interface entry requested");
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &CStr) -> sys::InterfaceFunctionPtr {
        unsafe { get_proc_address(name.as_ptr()) }
    }

    #[test]
    fn test_entries_resolve() {
        assert!(lookup(c"get_version").is_some());
        assert!(lookup(c"classdb_get_method_hash").is_some());
        assert!(lookup(c"no_such_entry").is_none());
    }

    #[test]
    fn test_memory_blocks_counted() {
        let before = stats::snapshot().blocks_alive;
        unsafe {
            let block = mem_alloc(24);
            block.cast::<u64>().write(7);
            let block = mem_realloc(block, 4096);
            assert_eq!(block.cast::<u64>().read(), 7);
            assert_eq!(stats::snapshot().blocks_alive, before + 1);
            mem_free(block);
        }
        assert_eq!(stats::snapshot().blocks_alive, before);
    }
}
