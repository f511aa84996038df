//! Built-in type entries: constructors, variant conversions, operators,
//! built-in methods and element accessors.

use crate::value::{
    Cell, CellBox, CustomCallable, Var, cell_mut, cell_ref, copy_typed, default_typed, destroy_typed,
    is_boxed, typed_equal, var_from_typed, var_to_typed, write_cell,
};
use gdbridge_sys as sys;
use gdbridge_sys::{CallErrorType, VariantOperator, VariantType};
use std::ffi::{CStr, c_char, c_void};
use std::sync::Arc;

const SIZE_HASH: i64 = 3173160232;
const RESIZE_HASH: i64 = 848867239;
const KEYS_HASH: i64 = 4144163970;

/// Status written by `resize` for a negative size.
const ERR_INVALID_PARAMETER: i64 = 31;

type CtorFn = unsafe extern "C" fn(sys::UninitTypePtr, *const sys::ConstTypePtr);
type DtorFn = unsafe extern "C" fn(sys::TypePtr);
type FromTypeFn = unsafe extern "C" fn(sys::UninitVariantPtr, sys::TypePtr);
type ToTypeFn = unsafe extern "C" fn(sys::UninitTypePtr, sys::VariantPtr);
type EvaluatorFn = unsafe extern "C" fn(sys::ConstTypePtr, sys::ConstTypePtr, sys::TypePtr);
type BuiltinFn = unsafe extern "C" fn(sys::TypePtr, *const sys::ConstTypePtr, sys::TypePtr, i32);

/// Instantiate `$f::<TAG>` for the literal tag matching `$raw`.
macro_rules! by_tag {
    ($raw:expr, $f:ident as $fn_ty:ty) => {
        by_tag!(@arms $raw, $f, $fn_ty,
            0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19
            20 21 22 23 24 25 26 27 28 29 30 31 32 33 34 35 36 37)
    };
    (@arms $raw:expr, $f:ident, $fn_ty:ty, $($tag:literal)*) => {
        match $raw {
            $( $tag => Some($f::<$tag> as $fn_ty), )*
            _ => None,
        }
    };
}

const fn tag(raw: u32) -> VariantType {
    VariantType::ALL[raw as usize]
}

fn known(raw: sys::VariantTypeRaw) -> Option<VariantType> {
    VariantType::try_from(raw).ok()
}

// ========== CONSTRUCTORS ==========

unsafe extern "C" fn ctor_default<const TAG: u32>(dst: sys::UninitTypePtr, _args: *const sys::ConstTypePtr) {
    unsafe { default_typed(tag(TAG), dst) };
}

unsafe extern "C" fn ctor_copy<const TAG: u32>(dst: sys::UninitTypePtr, args: *const sys::ConstTypePtr) {
    unsafe { copy_typed(tag(TAG), dst, *args) };
}

/// Text conversions between `String`, `StringName` and `NodePath`.
unsafe extern "C" fn ctor_text<const TAG: u32>(dst: sys::UninitTypePtr, args: *const sys::ConstTypePtr) {
    let text = unsafe { cell_ref(*args) }
        .and_then(Cell::text)
        .unwrap_or_default()
        .to_owned();
    let cell = match tag(TAG) {
        VariantType::StringName => Cell::StringName(text),
        VariantType::NodePath => Cell::NodePath(text),
        _ => Cell::String(text),
    };
    unsafe { write_cell(dst, tag(TAG), cell) };
}

pub(crate) unsafe extern "C" fn variant_get_ptr_constructor(
    raw: sys::VariantTypeRaw,
    index: i32,
) -> sys::PtrConstructor {
    let ty = known(raw)?;
    if matches!(ty, VariantType::Nil | VariantType::Object) {
        return None;
    }
    match (index, ty) {
        (0, _) => by_tag!(raw, ctor_default as CtorFn),
        (1, _) => by_tag!(raw, ctor_copy as CtorFn),
        (2, VariantType::String | VariantType::StringName | VariantType::NodePath)
        | (3, VariantType::String) => by_tag!(raw, ctor_text as CtorFn),
        _ => None,
    }
}

unsafe extern "C" fn dtor<const TAG: u32>(this: sys::TypePtr) {
    unsafe { destroy_typed(tag(TAG), this) };
}

pub(crate) unsafe extern "C" fn variant_get_ptr_destructor(raw: sys::VariantTypeRaw) -> sys::PtrDestructor {
    let ty = known(raw)?;
    if !is_boxed(ty) {
        return None;
    }
    by_tag!(raw, dtor as DtorFn)
}

// ========== VARIANT CONVERSIONS ==========

unsafe extern "C" fn from_type<const TAG: u32>(dst: sys::UninitVariantPtr, src: sys::TypePtr) {
    let var = unsafe { var_from_typed(tag(TAG), src) };
    unsafe { dst.cast::<Var>().write(var) };
}

unsafe extern "C" fn to_type<const TAG: u32>(dst: sys::UninitTypePtr, src: sys::VariantPtr) {
    let var = unsafe { &*src.cast::<Var>() };
    unsafe { var_to_typed(tag(TAG), var, dst) };
}

pub(crate) unsafe extern "C" fn get_variant_from_type_constructor(
    raw: sys::VariantTypeRaw,
) -> sys::VariantFromTypeConstructorFunc {
    by_tag!(raw, from_type as FromTypeFn)
}

pub(crate) unsafe extern "C" fn get_variant_to_type_constructor(
    raw: sys::VariantTypeRaw,
) -> sys::TypeFromVariantConstructorFunc {
    by_tag!(raw, to_type as ToTypeFn)
}

// ========== OPERATORS ==========

unsafe extern "C" fn equal<const TAG: u32>(
    left: sys::ConstTypePtr,
    right: sys::ConstTypePtr,
    result: sys::TypePtr,
) {
    let same = unsafe { typed_equal(tag(TAG), left, right) };
    unsafe { result.cast::<sys::Bool>().write(u8::from(same)) };
}

pub(crate) unsafe extern "C" fn variant_get_ptr_operator_evaluator(
    op: sys::VariantOperatorRaw,
    type_a: sys::VariantTypeRaw,
    type_b: sys::VariantTypeRaw,
) -> sys::PtrOperatorEvaluator {
    match VariantOperator::try_from(op) {
        Ok(VariantOperator::Equal) if type_a == type_b => by_tag!(type_a, equal as EvaluatorFn),
        _ => None,
    }
}

fn evaluate(op: VariantOperator, a: &Var, b: &Var) -> Option<Var> {
    let value = match (op, a, b) {
        (VariantOperator::Equal, a, b) => Var::Bool(a == b),
        (VariantOperator::NotEqual, a, b) => Var::Bool(a != b),
        (VariantOperator::Less, Var::Int(a), Var::Int(b)) => Var::Bool(a < b),
        (VariantOperator::Greater, Var::Int(a), Var::Int(b)) => Var::Bool(a > b),
        (VariantOperator::Add, Var::Int(a), Var::Int(b)) => Var::Int(a.wrapping_add(*b)),
        (VariantOperator::Subtract, Var::Int(a), Var::Int(b)) => Var::Int(a.wrapping_sub(*b)),
        (VariantOperator::Multiply, Var::Int(a), Var::Int(b)) => Var::Int(a.wrapping_mul(*b)),
        (VariantOperator::Less, Var::Float(a), Var::Float(b)) => Var::Bool(a < b),
        (VariantOperator::Greater, Var::Float(a), Var::Float(b)) => Var::Bool(a > b),
        (VariantOperator::Add, Var::Float(a), Var::Float(b)) => Var::Float(a + b),
        (VariantOperator::Subtract, Var::Float(a), Var::Float(b)) => Var::Float(a - b),
        (VariantOperator::Multiply, Var::Float(a), Var::Float(b)) => Var::Float(a * b),
        _ => return None,
    };
    Some(value)
}

pub(crate) unsafe extern "C" fn variant_evaluate(
    op: sys::VariantOperatorRaw,
    a: sys::ConstVariantPtr,
    b: sys::ConstVariantPtr,
    r_return: sys::UninitVariantPtr,
    r_valid: *mut sys::Bool,
) {
    let (a, b) = unsafe { (&*a.cast::<Var>(), &*b.cast::<Var>()) };
    let result = VariantOperator::try_from(op)
        .ok()
        .and_then(|op| evaluate(op, a, b));
    let valid = result.is_some();
    unsafe {
        r_return.cast::<Var>().write(result.unwrap_or_default());
        if !r_valid.is_null() {
            *r_valid = u8::from(valid);
        }
    }
}

// ========== VARIANTS ==========

pub(crate) unsafe extern "C" fn variant_new_copy(dst: sys::UninitVariantPtr, src: sys::ConstVariantPtr) {
    let copy = unsafe { (*src.cast::<Var>()).clone() };
    unsafe { dst.cast::<Var>().write(copy) };
}

pub(crate) unsafe extern "C" fn variant_new_nil(dst: sys::UninitVariantPtr) {
    unsafe { dst.cast::<Var>().write(Var::Nil) };
}

pub(crate) unsafe extern "C" fn variant_destroy(this: sys::VariantPtr) {
    unsafe { this.cast::<Var>().drop_in_place() };
}

pub(crate) unsafe extern "C" fn variant_get_type(this: sys::ConstVariantPtr) -> sys::VariantTypeRaw {
    unsafe { (*this.cast::<Var>()).variant_type().raw() }
}

pub(crate) unsafe extern "C" fn variant_call(
    this: sys::VariantPtr,
    method: sys::ConstStringNamePtr,
    args: *const sys::ConstVariantPtr,
    argc: sys::Int,
    r_return: sys::UninitVariantPtr,
    r_error: *mut sys::CallError,
) {
    unsafe { r_return.cast::<Var>().write(Var::Nil) };
    let set_error = |error: CallErrorType| {
        if !r_error.is_null() {
            unsafe {
                *r_error = sys::CallError {
                    error: error.into(),
                    argument: 0,
                    expected: 0,
                }
            };
        }
    };
    set_error(CallErrorType::Ok);

    let name = unsafe { cell_ref(method) }.and_then(Cell::text).unwrap_or_default();
    let callable = match unsafe { &*this.cast::<Var>() } {
        Var::Boxed(cell) if name == "call" => match &**cell {
            Cell::Callable(Some(custom)) => Some(custom.clone()),
            _ => None,
        },
        _ => None,
    };
    match callable {
        Some(custom) => unsafe { custom.call(args, argc, r_return, r_error) },
        None => {
            tracing::debug!(method = name, "variant call of an unknown method");
            set_error(CallErrorType::InvalidMethod);
        }
    }
}

// ========== BUILT-IN METHODS ==========

unsafe extern "C" fn builtin_size(base: sys::TypePtr, _args: *const sys::ConstTypePtr, ret: sys::TypePtr, _argc: i32) {
    let len = unsafe { cell_ref(base) }.map_or(0, Cell::len);
    unsafe { ret.cast::<i64>().write_unaligned(len as i64) };
}

unsafe extern "C" fn builtin_resize(base: sys::TypePtr, args: *const sys::ConstTypePtr, ret: sys::TypePtr, _argc: i32) {
    let new_len = unsafe { (*args).cast::<i64>().read_unaligned() };
    let status = match (new_len, unsafe { cell_mut(base) }) {
        (len, _) if len < 0 => ERR_INVALID_PARAMETER,
        (len, Some(Cell::Array(items))) => {
            items.resize(len as usize, Var::Nil);
            0
        }
        (len, Some(Cell::Packed(packed))) => {
            packed.resize(len as usize);
            0
        }
        _ => ERR_INVALID_PARAMETER,
    };
    if !ret.is_null() {
        unsafe { ret.cast::<i64>().write_unaligned(status) };
    }
}

/// Writes into an initialized `Array`.
unsafe extern "C" fn dictionary_keys(base: sys::TypePtr, _args: *const sys::ConstTypePtr, ret: sys::TypePtr, _argc: i32) {
    let keys = match unsafe { cell_ref(base) } {
        Some(Cell::Dictionary(entries)) => entries.iter().map(|(key, _)| key.clone()).collect(),
        _ => Vec::new(),
    };
    if let Some(out) = unsafe { cell_mut(ret) } {
        *out = Cell::Array(keys);
    }
}

pub(crate) unsafe extern "C" fn variant_get_ptr_builtin_method(
    raw: sys::VariantTypeRaw,
    method: sys::ConstStringNamePtr,
    hash: sys::Int,
) -> sys::PtrBuiltInMethod {
    let ty = known(raw)?;
    let name = unsafe { cell_ref(method) }.and_then(Cell::text)?;
    let container = ty.is_packed_array() || ty == VariantType::Array;
    let found: BuiltinFn = match (name, hash) {
        ("size", SIZE_HASH) if container || ty == VariantType::Dictionary => builtin_size,
        ("resize", RESIZE_HASH) if container => builtin_resize,
        ("keys", KEYS_HASH) if ty == VariantType::Dictionary => dictionary_keys,
        _ => {
            tracing::debug!(ty = ty.name(), method = name, hash, "unknown built-in method");
            return None;
        }
    };
    Some(found)
}

// ========== ELEMENT ACCESS ==========

pub(crate) unsafe extern "C" fn packed_index(this: sys::TypePtr, index: sys::Int) -> *mut c_void {
    match unsafe { cell_mut(this) } {
        Some(Cell::Packed(packed)) if index >= 0 => packed.element(index as usize),
        _ => std::ptr::null_mut(),
    }
}

pub(crate) unsafe extern "C" fn packed_index_const(this: sys::ConstTypePtr, index: sys::Int) -> *const c_void {
    unsafe { packed_index(this.cast_mut(), index) }.cast_const()
}

pub(crate) unsafe extern "C" fn array_operator_index(this: sys::TypePtr, index: sys::Int) -> sys::VariantPtr {
    match unsafe { cell_mut(this) } {
        Some(Cell::Array(items)) if index >= 0 => items
            .get_mut(index as usize)
            .map_or(std::ptr::null_mut(), |item| (item as *mut Var).cast()),
        _ => std::ptr::null_mut(),
    }
}

pub(crate) unsafe extern "C" fn array_operator_index_const(
    this: sys::ConstTypePtr,
    index: sys::Int,
) -> sys::ConstVariantPtr {
    unsafe { array_operator_index(this.cast_mut(), index) }.cast_const()
}

/// Pointer to the value under `key`, inserting `Nil` when absent.
pub(crate) unsafe extern "C" fn dictionary_operator_index(
    this: sys::TypePtr,
    key: sys::ConstVariantPtr,
) -> sys::VariantPtr {
    let key = unsafe { &*key.cast::<Var>() };
    let Some(Cell::Dictionary(entries)) = (unsafe { cell_mut(this) }) else {
        return std::ptr::null_mut();
    };
    let position = match entries.iter().position(|(existing, _)| existing == key) {
        Some(position) => position,
        None => {
            entries.push((key.clone(), Box::new(Var::Nil)));
            entries.len() - 1
        }
    };
    (&raw mut *entries[position].1).cast()
}

pub(crate) unsafe extern "C" fn dictionary_operator_index_const(
    this: sys::ConstTypePtr,
    key: sys::ConstVariantPtr,
) -> sys::ConstVariantPtr {
    let key = unsafe { &*key.cast::<Var>() };
    match unsafe { cell_ref(this) } {
        Some(Cell::Dictionary(entries)) => entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map_or(std::ptr::null(), |(_, value)| (&raw const **value).cast()),
        _ => std::ptr::null(),
    }
}

// ========== STRINGS ==========

/// # Safety
/// `contents` must hold `size` bytes, or be nul-terminated when `size` is negative.
unsafe fn utf8_text(contents: *const c_char, size: sys::Int) -> String {
    if contents.is_null() {
        return String::new();
    }
    let bytes = if size < 0 {
        unsafe { CStr::from_ptr(contents) }.to_bytes()
    } else {
        unsafe { std::slice::from_raw_parts(contents.cast::<u8>(), size as usize) }
    };
    String::from_utf8_lossy(bytes).into_owned()
}

pub(crate) unsafe extern "C" fn string_new_with_utf8_chars_and_len(
    dst: sys::UninitStringPtr,
    contents: *const c_char,
    size: sys::Int,
) {
    let text = unsafe { utf8_text(contents, size) };
    unsafe { write_cell(dst, VariantType::String, Cell::String(text)) };
}

pub(crate) unsafe extern "C" fn string_name_new_with_utf8_chars_and_len(
    dst: sys::UninitStringNamePtr,
    contents: *const c_char,
    size: sys::Int,
) {
    let text = unsafe { utf8_text(contents, size) };
    unsafe { write_cell(dst, VariantType::StringName, Cell::StringName(text)) };
}

/// Byte length of the text; copies at most `max_write_length` bytes.
pub(crate) unsafe extern "C" fn string_to_utf8_chars(
    this: sys::ConstStringPtr,
    r_text: *mut c_char,
    max_write_length: sys::Int,
) -> sys::Int {
    let text = unsafe { cell_ref(this) }.and_then(Cell::text).unwrap_or_default();
    if !r_text.is_null() && max_write_length > 0 {
        let count = text.len().min(max_write_length as usize);
        unsafe { std::ptr::copy_nonoverlapping(text.as_ptr(), r_text.cast::<u8>(), count) };
    }
    text.len() as sys::Int
}

// ========== CALLABLES ==========

pub(crate) unsafe extern "C" fn callable_custom_create(
    dst: sys::UninitTypePtr,
    info: *mut sys::CallableCustomInfo,
) {
    let cell = match unsafe { info.as_ref() } {
        Some(info) => Cell::Callable(Some(Arc::new(CustomCallable { info: *info }))),
        None => Cell::Callable(None),
    };
    unsafe { write_cell(dst, VariantType::Callable, cell) };
}

/// Build a `Callable` variant around `info`, as the engine would for a
/// script function.
pub fn callable_variant(info: sys::CallableCustomInfo) -> Var {
    Var::Boxed(CellBox::new(Cell::Callable(Some(Arc::new(CustomCallable { info })))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Scratch;

    #[test]
    fn test_constructor_table() {
        unsafe {
            assert!(variant_get_ptr_constructor(VariantType::Nil.raw(), 0).is_none());
            assert!(variant_get_ptr_constructor(VariantType::Object.raw(), 0).is_none());
            assert!(variant_get_ptr_constructor(VariantType::Vector3.raw(), 1).is_some());
            assert!(variant_get_ptr_constructor(VariantType::StringName.raw(), 2).is_some());
            assert!(variant_get_ptr_constructor(VariantType::StringName.raw(), 3).is_none());
            assert!(variant_get_ptr_constructor(VariantType::String.raw(), 3).is_some());
            assert!(variant_get_ptr_destructor(VariantType::Int.raw()).is_none());
            assert!(variant_get_ptr_destructor(VariantType::Array.raw()).is_some());
            assert!(variant_get_ptr_constructor(99, 0).is_none());
        }
    }

    #[test]
    fn test_string_conversion_constructor() {
        let mut name = Scratch::new();
        let mut string = Scratch::new();
        unsafe {
            string_name_new_with_utf8_chars_and_len(name.ptr(), c"hello".as_ptr(), -1);
            let ctor = variant_get_ptr_constructor(VariantType::String.raw(), 2).unwrap();
            let args = [name.ptr().cast_const()];
            ctor(string.ptr(), args.as_ptr());
            let mut buffer = [0 as c_char; 8];
            let len = string_to_utf8_chars(string.ptr(), buffer.as_mut_ptr(), 8);
            assert_eq!(len, 5);
            assert_eq!(CStr::from_ptr(buffer.as_ptr()).to_str(), Ok("hello"));
            destroy_typed(VariantType::String, string.ptr());
            destroy_typed(VariantType::StringName, name.ptr());
        }
    }

    #[test]
    fn test_dictionary_index_inserts() {
        let mut dict = Scratch::new();
        unsafe {
            default_typed(VariantType::Dictionary, dict.ptr());
            let key = Var::Int(3);
            let key_ptr = (&raw const key).cast::<c_void>();
            assert!(dictionary_operator_index_const(dict.ptr(), key_ptr).is_null());
            let slot = dictionary_operator_index(dict.ptr(), key_ptr);
            *slot.cast::<Var>() = Var::Bool(true);
            let found = dictionary_operator_index_const(dict.ptr(), key_ptr);
            assert_eq!(*found.cast::<Var>(), Var::Bool(true));
            destroy_typed(VariantType::Dictionary, dict.ptr());
        }
    }

    #[test]
    fn test_evaluate_rejects_mixed_operands() {
        assert_eq!(evaluate(VariantOperator::Add, &Var::Int(2), &Var::Int(3)), Some(Var::Int(5)));
        assert_eq!(evaluate(VariantOperator::Add, &Var::Int(2), &Var::Float(3.0)), None);
        assert_eq!(
            evaluate(VariantOperator::NotEqual, &Var::Nil, &Var::Int(0)),
            Some(Var::Bool(true))
        );
    }
}
