//! Raw C-ABI declarations of the engine extension interface.
//!
//! Nothing in this crate has behaviour. It names the shapes the engine and a
//! library agree on: opaque pointer aliases, the signature of every interface
//! entry fetched through `get_proc_address`, the `#[repr(C)]` records passed
//! during class registration, and the tag enums of the variant system.
//!
//! Every entry is fetched by name at load time; none are linked statically.

#![allow(non_camel_case_types)]

mod types;

pub use types::*;

use std::ffi::{c_char, c_void};

// ========== OPAQUE POINTERS ==========

pub type VariantPtr = *mut c_void;
pub type ConstVariantPtr = *const c_void;
pub type UninitVariantPtr = *mut c_void;
pub type StringNamePtr = *mut c_void;
pub type ConstStringNamePtr = *const c_void;
pub type UninitStringNamePtr = *mut c_void;
pub type StringPtr = *mut c_void;
pub type ConstStringPtr = *const c_void;
pub type UninitStringPtr = *mut c_void;
pub type ObjectPtr = *mut c_void;
pub type ConstObjectPtr = *const c_void;
pub type TypePtr = *mut c_void;
pub type ConstTypePtr = *const c_void;
pub type UninitTypePtr = *mut c_void;
pub type MethodBindPtr = *const c_void;
pub type ClassInstancePtr = *mut c_void;
pub type ClassLibraryPtr = *mut c_void;
pub type RefPtr = *mut c_void;
pub type ConstRefPtr = *const c_void;

/// Engine boolean: a single byte, zero is false.
pub type Bool = u8;
/// Engine integer as used by the interface.
pub type Int = i64;

pub const TRUE: Bool = 1;
pub const FALSE: Bool = 0;

/// Size of the engine's `Variant` on 64-bit builds with single-precision reals.
pub const VARIANT_SIZE: usize = 24;

// ========== PLAIN RECORDS ==========

/// Version the engine reports through `get_version`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Structural hash of the interface header the engine was built with.
    pub abi_hash: u64,
}

/// Error record filled by variant calls.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallError {
    pub error: u32,
    pub argument: i32,
    pub expected: i32,
}

/// Describes a property, a method argument or a signal argument.
///
/// The name fields point at engine `StringName`/`String` values owned by the
/// caller; the engine copies what it keeps.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PropertyInfo {
    pub type_: VariantTypeRaw,
    pub name: StringNamePtr,
    pub class_name: StringNamePtr,
    pub hint: u32,
    pub hint_string: StringPtr,
    pub usage: u32,
}

pub const PROPERTY_HINT_NONE: u32 = 0;

// ========== CALLBACK SIGNATURES ==========

pub type CreateInstanceFn = unsafe extern "C" fn(class_userdata: *mut c_void) -> ObjectPtr;
pub type FreeInstanceFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, instance: ClassInstancePtr);
pub type GetVirtualCallDataFn =
    unsafe extern "C" fn(class_userdata: *mut c_void, name: ConstStringNamePtr) -> *mut c_void;
pub type CallVirtualWithDataFn = unsafe extern "C" fn(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    virtual_userdata: *mut c_void,
    args: *const ConstTypePtr,
    argc: Int,
    r_ret: TypePtr,
);
pub type InstanceSetFn = unsafe extern "C" fn(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    value: ConstVariantPtr,
) -> Bool;
pub type InstanceGetFn = unsafe extern "C" fn(
    instance: ClassInstancePtr,
    name: ConstStringNamePtr,
    r_ret: VariantPtr,
) -> Bool;
pub type InstanceGetPropertyListFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, r_count: *mut u32) -> *const PropertyInfo;
pub type InstanceFreePropertyListFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, list: *const PropertyInfo, count: u32);
pub type InstanceNotificationFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, what: i32, reversed: Bool);
pub type InstanceToStringFn =
    unsafe extern "C" fn(instance: ClassInstancePtr, r_is_valid: *mut Bool, r_out: StringPtr);
pub type InstanceRefFn = unsafe extern "C" fn(instance: ClassInstancePtr);

pub type ClassMethodCallFn = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstVariantPtr,
    argc: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
);
pub type ClassMethodPtrCallFn = unsafe extern "C" fn(
    method_userdata: *mut c_void,
    instance: ClassInstancePtr,
    args: *const ConstTypePtr,
    r_ret: TypePtr,
);

pub type InstanceBindingCreateFn =
    unsafe extern "C" fn(token: *mut c_void, instance: *mut c_void) -> *mut c_void;
pub type InstanceBindingFreeFn =
    unsafe extern "C" fn(token: *mut c_void, instance: *mut c_void, binding: *mut c_void);
pub type InstanceBindingReferenceFn =
    unsafe extern "C" fn(token: *mut c_void, binding: *mut c_void, reference: Bool) -> Bool;

pub type CallableCallFn = unsafe extern "C" fn(
    callable_userdata: *mut c_void,
    args: *const ConstVariantPtr,
    argc: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
);
pub type CallableIsValidFn = unsafe extern "C" fn(callable_userdata: *mut c_void) -> Bool;
pub type CallableFreeFn = unsafe extern "C" fn(callable_userdata: *mut c_void);
pub type CallableHashFn = unsafe extern "C" fn(callable_userdata: *mut c_void) -> u32;
pub type CallableToStringFn = unsafe extern "C" fn(
    callable_userdata: *mut c_void,
    r_is_valid: *mut Bool,
    r_out: StringPtr,
);

// ========== REGISTRATION RECORDS ==========

/// Callback table handed to `classdb_register_extension_class`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ClassCreationInfo {
    pub is_virtual: Bool,
    pub is_abstract: Bool,
    pub is_exposed: Bool,
    pub set_func: Option<InstanceSetFn>,
    pub get_func: Option<InstanceGetFn>,
    pub get_property_list_func: Option<InstanceGetPropertyListFn>,
    pub free_property_list_func: Option<InstanceFreePropertyListFn>,
    pub notification_func: Option<InstanceNotificationFn>,
    pub to_string_func: Option<InstanceToStringFn>,
    pub reference_func: Option<InstanceRefFn>,
    pub unreference_func: Option<InstanceRefFn>,
    pub create_instance_func: Option<CreateInstanceFn>,
    pub free_instance_func: Option<FreeInstanceFn>,
    pub get_virtual_call_data_func: Option<GetVirtualCallDataFn>,
    pub call_virtual_with_data_func: Option<CallVirtualWithDataFn>,
    pub class_userdata: *mut c_void,
}

/// Describes one method exported by an extension class.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ClassMethodInfo {
    pub name: StringNamePtr,
    pub method_userdata: *mut c_void,
    pub call_func: Option<ClassMethodCallFn>,
    pub ptrcall_func: Option<ClassMethodPtrCallFn>,
    pub method_flags: u32,
    pub has_return_value: Bool,
    pub return_value_info: *mut PropertyInfo,
    pub argument_count: u32,
    pub arguments_info: *mut PropertyInfo,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct InstanceBindingCallbacks {
    pub create_callback: Option<InstanceBindingCreateFn>,
    pub free_callback: Option<InstanceBindingFreeFn>,
    pub reference_callback: Option<InstanceBindingReferenceFn>,
}

/// Describes a host function wrapped into an engine `Callable`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CallableCustomInfo {
    pub callable_userdata: *mut c_void,
    pub token: *mut c_void,
    pub object_id: u64,
    pub call_func: Option<CallableCallFn>,
    pub is_valid_func: Option<CallableIsValidFn>,
    pub free_func: Option<CallableFreeFn>,
    pub hash_func: Option<CallableHashFn>,
    pub to_string_func: Option<CallableToStringFn>,
}

// ========== BUILT-IN TYPE ACCESSORS ==========

pub type VariantFromTypeConstructorFunc =
    Option<unsafe extern "C" fn(r_dest: UninitVariantPtr, src: TypePtr)>;
pub type TypeFromVariantConstructorFunc =
    Option<unsafe extern "C" fn(r_dest: UninitTypePtr, src: VariantPtr)>;
pub type PtrConstructor =
    Option<unsafe extern "C" fn(r_dest: UninitTypePtr, args: *const ConstTypePtr)>;
pub type PtrDestructor = Option<unsafe extern "C" fn(this: TypePtr)>;
pub type PtrOperatorEvaluator =
    Option<unsafe extern "C" fn(left: ConstTypePtr, right: ConstTypePtr, r_result: TypePtr)>;
pub type PtrBuiltInMethod = Option<
    unsafe extern "C" fn(base: TypePtr, args: *const ConstTypePtr, r_return: TypePtr, argc: i32),
>;

// ========== INTERFACE ENTRIES ==========

/// The single bootstrap pointer handed to the library.
pub type InterfaceFunctionPtr = Option<unsafe extern "C" fn()>;
pub type GetProcAddress = unsafe extern "C" fn(name: *const c_char) -> InterfaceFunctionPtr;

pub type GetVersionFn = unsafe extern "C" fn(r_version: *mut EngineVersion);

pub type MemAllocFn = unsafe extern "C" fn(bytes: usize) -> *mut c_void;
pub type MemReallocFn = unsafe extern "C" fn(ptr: *mut c_void, bytes: usize) -> *mut c_void;
pub type MemFreeFn = unsafe extern "C" fn(ptr: *mut c_void);

pub type PrintFn = unsafe extern "C" fn(
    description: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: i32,
    editor_notify: Bool,
);

pub type VariantNewCopyFn = unsafe extern "C" fn(r_dest: UninitVariantPtr, src: ConstVariantPtr);
pub type VariantNewNilFn = unsafe extern "C" fn(r_dest: UninitVariantPtr);
pub type VariantDestroyFn = unsafe extern "C" fn(this: VariantPtr);
pub type VariantGetTypeFn = unsafe extern "C" fn(this: ConstVariantPtr) -> VariantTypeRaw;
pub type VariantCallFn = unsafe extern "C" fn(
    this: VariantPtr,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    argc: Int,
    r_return: UninitVariantPtr,
    r_error: *mut CallError,
);
pub type VariantEvaluateFn = unsafe extern "C" fn(
    op: VariantOperatorRaw,
    a: ConstVariantPtr,
    b: ConstVariantPtr,
    r_return: UninitVariantPtr,
    r_valid: *mut Bool,
);
pub type GetVariantFromTypeConstructorFn =
    unsafe extern "C" fn(type_: VariantTypeRaw) -> VariantFromTypeConstructorFunc;
pub type GetVariantToTypeConstructorFn =
    unsafe extern "C" fn(type_: VariantTypeRaw) -> TypeFromVariantConstructorFunc;
pub type VariantGetPtrConstructorFn =
    unsafe extern "C" fn(type_: VariantTypeRaw, constructor: i32) -> PtrConstructor;
pub type VariantGetPtrDestructorFn = unsafe extern "C" fn(type_: VariantTypeRaw) -> PtrDestructor;
pub type VariantGetPtrOperatorEvaluatorFn = unsafe extern "C" fn(
    op: VariantOperatorRaw,
    type_a: VariantTypeRaw,
    type_b: VariantTypeRaw,
) -> PtrOperatorEvaluator;
pub type VariantGetPtrBuiltinMethodFn = unsafe extern "C" fn(
    type_: VariantTypeRaw,
    method: ConstStringNamePtr,
    hash: Int,
) -> PtrBuiltInMethod;

pub type StringNewWithUtf8CharsAndLenFn =
    unsafe extern "C" fn(r_dest: UninitStringPtr, contents: *const c_char, size: Int);
pub type StringToUtf8CharsFn =
    unsafe extern "C" fn(this: ConstStringPtr, r_text: *mut c_char, max_write_length: Int) -> Int;
pub type StringNameNewWithUtf8CharsAndLenFn =
    unsafe extern "C" fn(r_dest: UninitStringNamePtr, contents: *const c_char, size: Int);

/// Element accessor shared by every packed array kind.
pub type PackedOperatorIndexFn = unsafe extern "C" fn(this: TypePtr, index: Int) -> *mut c_void;
pub type PackedOperatorIndexConstFn =
    unsafe extern "C" fn(this: ConstTypePtr, index: Int) -> *const c_void;

pub type ArrayOperatorIndexFn = unsafe extern "C" fn(this: TypePtr, index: Int) -> VariantPtr;
pub type ArrayOperatorIndexConstFn =
    unsafe extern "C" fn(this: ConstTypePtr, index: Int) -> ConstVariantPtr;
pub type DictionaryOperatorIndexFn =
    unsafe extern "C" fn(this: TypePtr, key: ConstVariantPtr) -> VariantPtr;
pub type DictionaryOperatorIndexConstFn =
    unsafe extern "C" fn(this: ConstTypePtr, key: ConstVariantPtr) -> ConstVariantPtr;

pub type ObjectMethodBindPtrcallFn = unsafe extern "C" fn(
    method_bind: MethodBindPtr,
    instance: ObjectPtr,
    args: *const ConstTypePtr,
    r_ret: TypePtr,
);
pub type ObjectMethodBindCallFn = unsafe extern "C" fn(
    method_bind: MethodBindPtr,
    instance: ObjectPtr,
    args: *const ConstVariantPtr,
    argc: Int,
    r_ret: UninitVariantPtr,
    r_error: *mut CallError,
);
pub type ObjectDestroyFn = unsafe extern "C" fn(object: ObjectPtr);
pub type ObjectGetInstanceBindingFn = unsafe extern "C" fn(
    object: ObjectPtr,
    token: *mut c_void,
    callbacks: *const InstanceBindingCallbacks,
) -> *mut c_void;
pub type ObjectSetInstanceBindingFn = unsafe extern "C" fn(
    object: ObjectPtr,
    token: *mut c_void,
    binding: *mut c_void,
    callbacks: *const InstanceBindingCallbacks,
);
pub type ObjectFreeInstanceBindingFn = unsafe extern "C" fn(object: ObjectPtr, token: *mut c_void);
pub type ObjectSetInstanceFn = unsafe extern "C" fn(
    object: ObjectPtr,
    class_name: ConstStringNamePtr,
    instance: ClassInstancePtr,
);
pub type ObjectGetClassNameFn = unsafe extern "C" fn(
    object: ConstObjectPtr,
    library: ClassLibraryPtr,
    r_class_name: UninitStringNamePtr,
) -> Bool;
pub type ObjectCastToFn =
    unsafe extern "C" fn(object: ConstObjectPtr, class_tag: *mut c_void) -> ObjectPtr;
pub type ObjectGetInstanceIdFn = unsafe extern "C" fn(object: ConstObjectPtr) -> u64;

pub type RefGetObjectFn = unsafe extern "C" fn(reference: ConstRefPtr) -> ObjectPtr;
pub type RefSetObjectFn = unsafe extern "C" fn(reference: RefPtr, object: ObjectPtr);

pub type CallableCustomCreateFn =
    unsafe extern "C" fn(r_callable: UninitTypePtr, info: *mut CallableCustomInfo);

pub type ClassdbConstructObjectFn =
    unsafe extern "C" fn(class_name: ConstStringNamePtr) -> ObjectPtr;
pub type ClassdbGetMethodBindFn = unsafe extern "C" fn(
    class_name: ConstStringNamePtr,
    method_name: ConstStringNamePtr,
    hash: Int,
) -> MethodBindPtr;
/// Reports the signature hash the engine holds for a method, `0` when unknown.
pub type ClassdbGetMethodHashFn =
    unsafe extern "C" fn(class_name: ConstStringNamePtr, method_name: ConstStringNamePtr) -> Int;
pub type ClassdbGetClassTagFn = unsafe extern "C" fn(class_name: ConstStringNamePtr) -> *mut c_void;

pub type ClassdbRegisterExtensionClassFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    parent_class_name: ConstStringNamePtr,
    info: *const ClassCreationInfo,
);
pub type ClassdbRegisterExtensionClassMethodFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const ClassMethodInfo,
);
pub type ClassdbRegisterExtensionClassPropertyFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const PropertyInfo,
    setter: ConstStringNamePtr,
    getter: ConstStringNamePtr,
);
pub type ClassdbRegisterExtensionClassSignalFn = unsafe extern "C" fn(
    library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    signal_name: ConstStringNamePtr,
    argument_info: *const PropertyInfo,
    argument_count: Int,
);
pub type ClassdbUnregisterExtensionClassFn =
    unsafe extern "C" fn(library: ClassLibraryPtr, class_name: ConstStringNamePtr);

// ========== LIBRARY ENTRY ==========

/// Filled by the library's entry function; the engine drives the levels.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Initialization {
    pub minimum_initialization_level: u32,
    pub userdata: *mut c_void,
    pub initialize: Option<unsafe extern "C" fn(userdata: *mut c_void, level: u32)>,
    pub deinitialize: Option<unsafe extern "C" fn(userdata: *mut c_void, level: u32)>,
}

pub type InitializationFunction = unsafe extern "C" fn(
    get_proc_address: Option<GetProcAddress>,
    library: ClassLibraryPtr,
    r_initialization: *mut Initialization,
) -> Bool;
