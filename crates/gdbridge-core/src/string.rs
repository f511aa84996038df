//! Engine strings, interned names and node paths.
//!
//! All three live in engine memory; the host holds a registry-backed cell
//! and converts through the engine's UTF-8 entry points.

use crate::builtin::{CTOR_FROM_TEXT, CTOR_STRING_FROM_NODE_PATH};
use crate::codec::cell::{BuiltinCell, CellKind};
use crate::codec::impl_cell_value;
use crate::error::{BridgeError, BridgeResult};
use crate::frame::CallFrame;
use crate::interface;
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use std::ffi::c_void;
use std::fmt;

const STRING: CellKind = CellKind::Builtin(VariantType::String);
const STRING_NAME: CellKind = CellKind::Builtin(VariantType::StringName);
const NODE_PATH: CellKind = CellKind::Builtin(VariantType::NodePath);

/// Engine `String`.
pub struct GString(pub(crate) BuiltinCell);

/// Engine `StringName`, an interned string compared by identity.
pub struct StringName(pub(crate) BuiltinCell);

/// Engine `NodePath`.
pub struct NodePath(pub(crate) BuiltinCell);

impl_cell_value!(GString, STRING, VariantType::String);
impl_cell_value!(StringName, STRING_NAME, VariantType::StringName);
impl_cell_value!(NodePath, NODE_PATH, VariantType::NodePath);

/// Construct an engine string from UTF-8 into uninitialized memory.
///
/// # Safety
/// `dst` must be valid for writes of a `String`.
pub(crate) unsafe fn write_utf8(dst: *mut c_void, text: &str) -> BridgeResult<()> {
    let interface = interface::get()?;
    unsafe {
        (interface.string_new_with_utf8_chars_and_len)(dst, text.as_ptr().cast(), text.len() as sys::Int)
    };
    Ok(())
}

/// Read an engine string as UTF-8.
///
/// # Safety
/// `src` must point at an initialized `String`.
pub(crate) unsafe fn read_utf8(src: sys::ConstStringPtr) -> BridgeResult<String> {
    let interface = interface::get()?;
    let len = unsafe { (interface.string_to_utf8_chars)(src, std::ptr::null_mut(), 0) };
    let mut bytes = vec![0u8; len.max(0) as usize];
    if !bytes.is_empty() {
        unsafe { (interface.string_to_utf8_chars)(src, bytes.as_mut_ptr().cast(), len) };
    }
    String::from_utf8(bytes).map_err(|err| BridgeError::Utf8(err.utf8_error()))
}

/// Build a `String` temporary directly in `frame`.
pub(crate) fn push_str_temp(frame: &mut CallFrame, text: &str) -> BridgeResult<()> {
    frame.push_with(STRING.size(), STRING.align(), Some(STRING), |dst| unsafe {
        write_utf8(dst, text)
    })
}

/// Run a one-argument constructor `index` of `kind` on `src`.
fn convert(kind: CellKind, index: usize, src: *const c_void) -> BridgeResult<BuiltinCell> {
    let CellKind::Builtin(ty) = kind else {
        return Err(BridgeError::UnknownBuiltinMethod {
            ty: VariantType::Nil,
            method: "conversion".into(),
        });
    };
    let ctor = interface::get()?.builtins.constructor(ty, index)?;
    BuiltinCell::new_with(kind, |dst| {
        let args = [src];
        unsafe { ctor(dst, args.as_ptr()) };
        Ok(())
    })
}

fn equal(kind: CellKind, left: &BuiltinCell, right: &BuiltinCell) -> BridgeResult<bool> {
    let CellKind::Builtin(ty) = kind else {
        return Ok(false);
    };
    let (left, right) = (left.ptr()?, right.ptr()?);
    unsafe { interface::get()?.builtins.equal(ty, left, right) }
}

impl GString {
    pub fn new(text: &str) -> BridgeResult<Self> {
        BuiltinCell::new_with(STRING, |dst| unsafe { write_utf8(dst, text) }).map(Self)
    }

    /// Copy the contents out as a host string.
    pub fn to_rust_string(&self) -> BridgeResult<String> {
        unsafe { read_utf8(self.0.ptr()?) }
    }

    pub fn to_string_name(&self) -> BridgeResult<StringName> {
        convert(STRING_NAME, CTOR_FROM_TEXT, self.0.ptr()?).map(StringName)
    }

    pub fn to_node_path(&self) -> BridgeResult<NodePath> {
        convert(NODE_PATH, CTOR_FROM_TEXT, self.0.ptr()?).map(NodePath)
    }

    pub(crate) fn ptr(&self) -> BridgeResult<sys::StringPtr> {
        self.0.ptr()
    }
}

impl StringName {
    pub fn new(text: &str) -> BridgeResult<Self> {
        let interface = interface::get()?;
        BuiltinCell::new_with(STRING_NAME, |dst| {
            unsafe {
                (interface.string_name_new_with_utf8_chars_and_len)(
                    dst,
                    text.as_ptr().cast(),
                    text.len() as sys::Int,
                )
            };
            Ok(())
        })
        .map(Self)
    }

    pub fn to_gstring(&self) -> BridgeResult<GString> {
        convert(STRING, CTOR_FROM_TEXT, self.0.ptr()?).map(GString)
    }

    pub fn to_rust_string(&self) -> BridgeResult<String> {
        self.to_gstring()?.to_rust_string()
    }

    /// Pointer handed to engine entries that take a name.
    pub(crate) fn ptr(&self) -> BridgeResult<sys::StringNamePtr> {
        self.0.ptr()
    }
}

impl NodePath {
    pub fn new(text: &str) -> BridgeResult<Self> {
        GString::new(text)?.to_node_path()
    }

    pub fn to_gstring(&self) -> BridgeResult<GString> {
        convert(STRING, CTOR_STRING_FROM_NODE_PATH, self.0.ptr()?).map(GString)
    }

    pub fn to_rust_string(&self) -> BridgeResult<String> {
        self.to_gstring()?.to_rust_string()
    }
}

macro_rules! impl_text_traits {
    ($($ty:ident => $kind:expr),*) => {$(
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                equal($kind, &self.0, &other.0).unwrap_or(false)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = self.to_rust_string().map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.to_rust_string() {
                    Ok(text) => write!(f, "{}({text:?})", stringify!($ty)),
                    Err(err) => write!(f, "{}(<{err}>)", stringify!($ty)),
                }
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = BridgeError;

            fn try_from(text: &str) -> BridgeResult<Self> {
                Self::new(text)
            }
        }
    )*};
}

impl_text_traits!(GString => STRING, StringName => STRING_NAME, NodePath => NODE_PATH);
