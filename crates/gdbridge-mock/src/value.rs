//! Built-in values as the mock engine stores them.
//!
//! Opaque built-ins (strings, containers, packed arrays, callables) are a
//! single heap [`Cell`] behind the first word of their slot. Plain-data
//! built-ins are their bytes. A [`Var`] fits in the first 16 bytes of the
//! 24 the ABI reserves for a variant.

use crate::object::ObjRef;
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

pub(crate) static CELLS_ALIVE: AtomicI64 = AtomicI64::new(0);

/// Engine variant.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Var {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Object(ObjRef),
    Boxed(CellBox),
}

const _: () = assert!(size_of::<Var>() <= sys::VARIANT_SIZE);
const _: () = assert!(size_of::<Option<CellBox>>() == size_of::<usize>());

impl Var {
    pub fn string(text: &str) -> Self {
        Var::Boxed(CellBox::new(Cell::String(text.to_owned())))
    }

    pub fn string_name(text: &str) -> Self {
        Var::Boxed(CellBox::new(Cell::StringName(text.to_owned())))
    }

    pub fn node_path(text: &str) -> Self {
        Var::Boxed(CellBox::new(Cell::NodePath(text.to_owned())))
    }

    /// A plain-data built-in from its `#[repr(C)]` bytes.
    pub fn pod<T: Copy>(ty: VariantType, value: &T) -> Self {
        debug_assert_eq!(size_of::<T>(), ty.opaque_size());
        let bytes = unsafe {
            std::slice::from_raw_parts((value as *const T).cast::<u8>(), size_of::<T>())
        };
        Var::Boxed(CellBox::new(Cell::Pod(ty, bytes.to_vec())))
    }

    /// A packed array of plain elements.
    pub fn packed<T: Copy>(ty: VariantType, items: &[T]) -> Self {
        let mut packed = Packed::new(ty);
        packed.resize(items.len());
        if let PackedData::Bytes { words, .. } = &mut packed.data {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    items.as_ptr().cast::<u8>(),
                    words.as_mut_ptr().cast::<u8>(),
                    std::mem::size_of_val(items),
                )
            };
        }
        Var::Boxed(CellBox::new(Cell::Packed(packed)))
    }

    pub fn packed_strings(items: &[&str]) -> Self {
        let slots = items
            .iter()
            .map(|item| Some(CellBox::new(Cell::String((*item).to_owned()))))
            .collect();
        Var::Boxed(CellBox::new(Cell::Packed(Packed {
            ty: VariantType::PackedStringArray,
            data: PackedData::Strings(slots),
        })))
    }

    pub fn array(items: Vec<Var>) -> Self {
        Var::Boxed(CellBox::new(Cell::Array(items)))
    }

    pub fn dictionary(pairs: Vec<(Var, Var)>) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(key, value)| (key, Box::new(value)))
            .collect();
        Var::Boxed(CellBox::new(Cell::Dictionary(entries)))
    }

    pub fn variant_type(&self) -> VariantType {
        match self {
            Var::Nil => VariantType::Nil,
            Var::Bool(_) => VariantType::Bool,
            Var::Int(_) => VariantType::Int,
            Var::Float(_) => VariantType::Float,
            Var::Object(_) => VariantType::Object,
            Var::Boxed(cell) => cell.variant_type(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Var::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Var::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Text of a `String`, `StringName` or `NodePath`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Var::Boxed(cell) => cell.text(),
            _ => None,
        }
    }
}

/// Owning pointer to a heap cell; counted so tests can see leaks.
#[repr(transparent)]
#[derive(Debug, PartialEq)]
pub struct CellBox(Box<Cell>);

impl CellBox {
    pub fn new(cell: Cell) -> Self {
        CELLS_ALIVE.fetch_add(1, Ordering::Relaxed);
        Self(Box::new(cell))
    }
}

impl Clone for CellBox {
    fn clone(&self) -> Self {
        Self::new((*self.0).clone())
    }
}

impl Drop for CellBox {
    fn drop(&mut self) {
        CELLS_ALIVE.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::ops::Deref for CellBox {
    type Target = Cell;

    fn deref(&self) -> &Cell {
        &self.0
    }
}

impl std::ops::DerefMut for CellBox {
    fn deref_mut(&mut self) -> &mut Cell {
        &mut self.0
    }
}

/// Heap part of an opaque built-in.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    /// Only inside variants; typed slots hold the bytes directly.
    Pod(VariantType, Vec<u8>),
    String(String),
    StringName(String),
    NodePath(String),
    Array(Vec<Var>),
    /// Values are boxed so element pointers survive insertions.
    Dictionary(Vec<(Var, Box<Var>)>),
    Packed(Packed),
    Callable(Option<Arc<CustomCallable>>),
    Signal,
}

impl Cell {
    pub fn default_for(ty: VariantType) -> Cell {
        match ty {
            VariantType::String => Cell::String(String::new()),
            VariantType::StringName => Cell::StringName(String::new()),
            VariantType::NodePath => Cell::NodePath(String::new()),
            VariantType::Array => Cell::Array(Vec::new()),
            VariantType::Dictionary => Cell::Dictionary(Vec::new()),
            VariantType::Callable => Cell::Callable(None),
            VariantType::Signal => Cell::Signal,
            ty if ty.is_packed_array() => Cell::Packed(Packed::new(ty)),
            ty => Cell::Pod(ty, vec![0; ty.opaque_size()]),
        }
    }

    pub fn variant_type(&self) -> VariantType {
        match self {
            Cell::Pod(ty, _) => *ty,
            Cell::String(_) => VariantType::String,
            Cell::StringName(_) => VariantType::StringName,
            Cell::NodePath(_) => VariantType::NodePath,
            Cell::Array(_) => VariantType::Array,
            Cell::Dictionary(_) => VariantType::Dictionary,
            Cell::Packed(packed) => packed.ty,
            Cell::Callable(_) => VariantType::Callable,
            Cell::Signal => VariantType::Signal,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Cell::String(text) | Cell::StringName(text) | Cell::NodePath(text) => Some(text),
            _ => None,
        }
    }

    /// Element count of a container.
    pub fn len(&self) -> usize {
        match self {
            Cell::Array(items) => items.len(),
            Cell::Dictionary(entries) => entries.len(),
            Cell::Packed(packed) => packed.len(),
            Cell::String(text) => text.chars().count(),
            _ => 0,
        }
    }
}

/// Packed array storage.
#[derive(Clone, Debug, PartialEq)]
pub struct Packed {
    pub ty: VariantType,
    pub data: PackedData,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PackedData {
    /// Plain elements in 8-aligned storage; bytes past `len` stay zero.
    Bytes {
        elem: usize,
        len: usize,
        words: Vec<u64>,
    },
    /// `String` slots, each an opaque word.
    Strings(Vec<Option<CellBox>>),
}

impl Packed {
    pub fn new(ty: VariantType) -> Self {
        let data = match ty {
            VariantType::PackedStringArray => PackedData::Strings(Vec::new()),
            ty => PackedData::Bytes {
                elem: element_size(ty),
                len: 0,
                words: Vec::new(),
            },
        };
        Self { ty, data }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            PackedData::Bytes { len, .. } => *len,
            PackedData::Strings(slots) => slots.len(),
        }
    }

    pub fn resize(&mut self, new_len: usize) {
        match &mut self.data {
            PackedData::Bytes { elem, len, words } => {
                let bytes = new_len * *elem;
                words.resize(bytes.div_ceil(8), 0);
                if new_len < *len {
                    let tail = unsafe {
                        std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), words.len() * 8)
                    };
                    tail[bytes..].fill(0);
                }
                *len = new_len;
            }
            PackedData::Strings(slots) => {
                slots.resize_with(new_len, || Some(CellBox::new(Cell::String(String::new()))));
            }
        }
    }

    /// Pointer to element `index`, null when out of range.
    pub fn element(&mut self, index: usize) -> *mut c_void {
        if index >= self.len() {
            return std::ptr::null_mut();
        }
        match &mut self.data {
            PackedData::Bytes { elem, words, .. } => unsafe {
                words.as_mut_ptr().cast::<u8>().add(index * *elem).cast()
            },
            PackedData::Strings(slots) => (&raw mut slots[index]).cast(),
        }
    }

    /// The elements as `f32`, for float arrays.
    pub fn to_f32s(&self) -> Vec<f32> {
        match &self.data {
            PackedData::Bytes { len, words, .. } if self.ty == VariantType::PackedFloat32Array => {
                let mut out = vec![0f32; *len];
                unsafe {
                    std::ptr::copy_nonoverlapping(words.as_ptr().cast::<f32>(), out.as_mut_ptr(), *len)
                };
                out
            }
            _ => Vec::new(),
        }
    }
}

fn element_size(ty: VariantType) -> usize {
    match ty {
        VariantType::PackedByteArray => 1,
        VariantType::PackedInt32Array | VariantType::PackedFloat32Array => 4,
        VariantType::PackedInt64Array | VariantType::PackedFloat64Array => 8,
        VariantType::PackedVector2Array => 8,
        VariantType::PackedVector3Array => 12,
        VariantType::PackedColorArray => 16,
        _ => 8,
    }
}

/// A host function wrapped into a `Callable`.
pub struct CustomCallable {
    pub info: sys::CallableCustomInfo,
}

// The userdata is only handed back to the library that created it.
unsafe impl Send for CustomCallable {}
unsafe impl Sync for CustomCallable {}

impl std::fmt::Debug for CustomCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomCallable")
            .field("userdata", &self.info.callable_userdata)
            .field("object_id", &self.info.object_id)
            .finish()
    }
}

impl PartialEq for CustomCallable {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl CustomCallable {
    /// # Safety
    /// `args` must hold `argc` variant pointers and `r_return` an initialized variant.
    pub unsafe fn call(
        &self,
        args: *const sys::ConstVariantPtr,
        argc: sys::Int,
        r_return: sys::VariantPtr,
        r_error: *mut sys::CallError,
    ) {
        match self.info.call_func {
            Some(call) => unsafe { call(self.info.callable_userdata, args, argc, r_return, r_error) },
            None => unsafe {
                *r_error = sys::CallError {
                    error: sys::CallErrorType::InvalidMethod.into(),
                    argument: 0,
                    expected: 0,
                }
            },
        }
    }

    /// Render through the library's `to_string` callback into a string that
    /// already holds `seed`. `None` when the callback reports failure.
    pub fn text(&self, seed: &str) -> Option<String> {
        let render = self.info.to_string_func?;
        let mut slot: Option<CellBox> = Some(CellBox::new(Cell::String(seed.to_owned())));
        let mut valid = sys::FALSE;
        unsafe { render(self.info.callable_userdata, &raw mut valid, (&raw mut slot).cast()) };
        if valid == sys::FALSE {
            return None;
        }
        slot.as_deref().and_then(Cell::text).map(str::to_owned)
    }
}

impl Drop for CustomCallable {
    fn drop(&mut self) {
        if let Some(free) = self.info.free_func {
            unsafe { free(self.info.callable_userdata) };
        }
    }
}

// ========== TYPED SLOTS ==========

/// Whether a typed slot of `ty` holds a cell pointer in its first word.
pub fn is_boxed(ty: VariantType) -> bool {
    !ty.is_pod() && ty != VariantType::Object
}

/// # Safety
/// `slot` must be a boxed slot, initialized or zeroed.
pub unsafe fn cell_ref<'a>(slot: *const c_void) -> Option<&'a Cell> {
    unsafe { (*slot.cast::<Option<CellBox>>()).as_deref() }
}

/// # Safety
/// As [`cell_ref`].
pub unsafe fn cell_mut<'a>(slot: *mut c_void) -> Option<&'a mut Cell> {
    unsafe { (*slot.cast::<Option<CellBox>>()).as_deref_mut() }
}

/// Initialize a boxed slot with `cell`.
///
/// # Safety
/// `slot` must be valid for writes of `ty`'s size and hold nothing that needs dropping.
pub unsafe fn write_cell(slot: *mut c_void, ty: VariantType, cell: Cell) {
    unsafe {
        slot.cast::<Option<CellBox>>().write(Some(CellBox::new(cell)));
        if ty.opaque_size() == 16 {
            slot.cast::<u64>().add(1).write(0);
        }
    }
}

/// Default-construct a value of `ty` into uninitialized memory.
///
/// # Safety
/// `dst` must be valid for writes of `ty`'s size.
pub unsafe fn default_typed(ty: VariantType, dst: *mut c_void) {
    if is_boxed(ty) {
        unsafe { write_cell(dst, ty, Cell::default_for(ty)) };
    } else {
        unsafe { std::ptr::write_bytes(dst.cast::<u8>(), 0, ty.opaque_size()) };
    }
}

/// Copy-construct `src` into uninitialized memory. Objects are copied as
/// raw pointers.
///
/// # Safety
/// `src` must be an initialized value of `ty`, `dst` valid for writes.
pub unsafe fn copy_typed(ty: VariantType, dst: *mut c_void, src: *const c_void) {
    if is_boxed(ty) {
        let cell = unsafe { cell_ref(src) }
            .cloned()
            .unwrap_or_else(|| Cell::default_for(ty));
        unsafe { write_cell(dst, ty, cell) };
    } else {
        unsafe { std::ptr::copy_nonoverlapping(src.cast::<u8>(), dst.cast::<u8>(), ty.opaque_size()) };
    }
}

/// Drop a typed value; the slot is uninitialized afterwards.
///
/// # Safety
/// `slot` must hold an initialized value of `ty`.
pub unsafe fn destroy_typed(ty: VariantType, slot: *mut c_void) {
    if is_boxed(ty) {
        drop(unsafe { slot.cast::<Option<CellBox>>().replace(None) });
    }
}

/// Box the typed value at `src` into a variant. Objects gain a reference.
///
/// # Safety
/// `src` must hold an initialized value of `ty`.
pub unsafe fn var_from_typed(ty: VariantType, src: *const c_void) -> Var {
    unsafe {
        match ty {
            VariantType::Nil => Var::Nil,
            VariantType::Bool => Var::Bool(src.cast::<u8>().read() != 0),
            VariantType::Int => Var::Int(src.cast::<i64>().read_unaligned()),
            VariantType::Float => Var::Float(src.cast::<f64>().read_unaligned()),
            VariantType::Object => {
                Var::Object(ObjRef::acquire(src.cast::<sys::ObjectPtr>().read_unaligned()))
            }
            ty if ty.is_pod() => {
                let bytes = std::slice::from_raw_parts(src.cast::<u8>(), ty.opaque_size());
                Var::Boxed(CellBox::new(Cell::Pod(ty, bytes.to_vec())))
            }
            ty => Var::Boxed(CellBox::new(
                cell_ref(src).cloned().unwrap_or_else(|| Cell::default_for(ty)),
            )),
        }
    }
}

/// Write the inhabitant of `var` as a `ty` into uninitialized memory. A
/// variant of another kind yields the default value. Objects are written
/// as raw pointers without a reference.
///
/// # Safety
/// `dst` must be valid for writes of `ty`'s size.
pub unsafe fn var_to_typed(ty: VariantType, var: &Var, dst: *mut c_void) {
    unsafe {
        match (ty, var) {
            (VariantType::Bool, Var::Bool(value)) => dst.cast::<u8>().write(u8::from(*value)),
            (VariantType::Int, Var::Int(value)) => dst.cast::<i64>().write_unaligned(*value),
            (VariantType::Float, Var::Float(value)) => dst.cast::<f64>().write_unaligned(*value),
            (VariantType::Object, Var::Object(object)) => {
                dst.cast::<sys::ObjectPtr>().write_unaligned(object.ptr())
            }
            (ty, Var::Boxed(cell)) if cell.variant_type() == ty => match &**cell {
                Cell::Pod(_, bytes) => {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), bytes.len())
                }
                cell => write_cell(dst, ty, cell.clone()),
            },
            (ty, _) => default_typed(ty, dst),
        }
    }
}

/// Equality of two typed values.
///
/// # Safety
/// Both pointers must hold initialized values of `ty`.
pub unsafe fn typed_equal(ty: VariantType, left: *const c_void, right: *const c_void) -> bool {
    unsafe {
        if is_boxed(ty) {
            return cell_ref(left) == cell_ref(right);
        }
        match ty {
            VariantType::Float => {
                left.cast::<f64>().read_unaligned() == right.cast::<f64>().read_unaligned()
            }
            ty => {
                let size = ty.opaque_size();
                std::slice::from_raw_parts(left.cast::<u8>(), size)
                    == std::slice::from_raw_parts(right.cast::<u8>(), size)
            }
        }
    }
}

/// 16-aligned scratch big enough for any typed value or a variant.
#[repr(C, align(16))]
pub(crate) struct Scratch([u8; 64]);

impl Scratch {
    pub(crate) fn new() -> Self {
        Self([0; 64])
    }

    pub(crate) fn ptr(&mut self) -> *mut c_void {
        self.0.as_mut_ptr().cast()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_resize_zero_fills() {
        let mut packed = Packed::new(VariantType::PackedInt32Array);
        packed.resize(3);
        unsafe { packed.element(2).cast::<i32>().write(9) };
        packed.resize(1);
        packed.resize(3);
        assert_eq!(unsafe { packed.element(2).cast::<i32>().read() }, 0);
        assert!(packed.element(3).is_null());
    }

    #[test]
    fn test_typed_round_trip() {
        let mut slot = Scratch::new();
        let var = Var::string("abc");
        unsafe {
            var_to_typed(VariantType::String, &var, slot.ptr());
            assert_eq!(cell_ref(slot.ptr()).and_then(Cell::text), Some("abc"));
            let back = var_from_typed(VariantType::String, slot.ptr());
            assert_eq!(back, var);
            destroy_typed(VariantType::String, slot.ptr());
        }
    }

    #[test]
    fn test_mismatched_variant_gives_default() {
        let mut slot = Scratch::new();
        unsafe {
            var_to_typed(VariantType::Int, &Var::string("x"), slot.ptr());
            assert_eq!(slot.ptr().cast::<i64>().read(), 0);
        }
    }
}
