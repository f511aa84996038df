//! Host-held storage for engine built-in values.
//!
//! A cell is a block from the engine allocator holding one initialized
//! built-in value (or variant), registered in the pointer registry. Dropping
//! the cell queues it; the registry cycle runs the engine destructor and
//! frees the block.

use crate::builtin::{CTOR_COPY, CTOR_DEFAULT};
use crate::error::{BridgeError, BridgeResult, fatal};
use crate::frame::CallFrame;
use crate::interface;
use crate::pointers::{Handle, Ownership, ValueKind, registry};
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use std::ffi::c_void;
use std::mem::ManuallyDrop;

/// What a cell (or a frame temporary) holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellKind {
    Builtin(VariantType),
    Variant,
}

impl CellKind {
    pub const fn size(self) -> usize {
        match self {
            CellKind::Builtin(ty) => ty.opaque_size(),
            CellKind::Variant => sys::VARIANT_SIZE,
        }
    }

    pub const fn align(self) -> usize {
        match self {
            CellKind::Builtin(ty) => ty.opaque_align(),
            CellKind::Variant => 8,
        }
    }

    pub fn value_kind(self) -> ValueKind {
        match self {
            CellKind::Builtin(ty) => ValueKind::Builtin(ty),
            CellKind::Variant => ValueKind::Variant,
        }
    }

    /// Run the engine destructor on an initialized value.
    ///
    /// # Safety
    /// `ptr` must point at an initialized value of this kind.
    pub unsafe fn destroy(self, ptr: *mut c_void) {
        let Ok(interface) = interface::get() else {
            return;
        };
        match self {
            CellKind::Builtin(ty) => unsafe { interface.builtins.destroy(ty, ptr) },
            CellKind::Variant => unsafe { (interface.variant_destroy)(ptr) },
        }
    }

    /// Default-construct into uninitialized memory.
    ///
    /// # Safety
    /// `dst` must be valid for writes of `self.size()` bytes.
    pub unsafe fn construct_default(self, dst: *mut c_void) -> BridgeResult<()> {
        let interface = interface::get()?;
        match self {
            CellKind::Builtin(ty) => {
                let ctor = interface.builtins.constructor(ty, CTOR_DEFAULT)?;
                unsafe { ctor(dst, std::ptr::null()) };
            }
            CellKind::Variant => unsafe { (interface.variant_new_nil)(dst) },
        }
        Ok(())
    }

    /// Copy-construct `src` into uninitialized memory.
    ///
    /// # Safety
    /// `dst` must be valid for writes, `src` must be an initialized value of this kind.
    pub unsafe fn construct_copy(self, dst: *mut c_void, src: *const c_void) -> BridgeResult<()> {
        let interface = interface::get()?;
        match self {
            CellKind::Builtin(ty) => {
                let ctor = interface.builtins.constructor(ty, CTOR_COPY)?;
                let args = [src];
                unsafe { ctor(dst, args.as_ptr()) };
            }
            CellKind::Variant => unsafe { (interface.variant_new_copy)(dst, src) },
        }
        Ok(())
    }
}

/// Owning host handle to an engine value in engine-allocated memory.
pub struct BuiltinCell {
    handle: Handle,
    kind: CellKind,
}

impl BuiltinCell {
    /// Allocate a block and let `init` construct the value in it.
    pub fn new_with(
        kind: CellKind,
        init: impl FnOnce(*mut c_void) -> BridgeResult<()>,
    ) -> BridgeResult<Self> {
        let interface = interface::get()?;
        let block = unsafe { (interface.mem_alloc)(kind.size().max(1)) };
        if block.is_null() {
            return Err(BridgeError::NullObject);
        }
        if let Err(err) = init(block) {
            unsafe { (interface.mem_free)(block) };
            return Err(err);
        }
        let handle = registry().new_handle(block, kind.value_kind(), Ownership::OwnedByHost);
        Ok(Self { handle, kind })
    }

    pub fn new_default(kind: CellKind) -> BridgeResult<Self> {
        Self::new_with(kind, |dst| unsafe { kind.construct_default(dst) })
    }

    /// Copy an engine value the host does not own.
    ///
    /// # Safety
    /// `src` must be an initialized value of `kind`.
    pub unsafe fn copy_from(kind: CellKind, src: *const c_void) -> BridgeResult<Self> {
        Self::new_with(kind, |dst| unsafe { kind.construct_copy(dst, src) })
    }

    /// Move an engine value into a new cell; `src` is uninitialized afterwards.
    ///
    /// # Safety
    /// `src` must be an initialized value of `kind` that nobody else destroys.
    pub unsafe fn take_from(kind: CellKind, src: *mut c_void) -> BridgeResult<Self> {
        Self::new_with(kind, |dst| {
            unsafe { std::ptr::copy_nonoverlapping(src.cast::<u8>(), dst.cast::<u8>(), kind.size()) };
            Ok(())
        })
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Pointer to the engine value.
    ///
    /// # Errors
    /// `StaleHandle` if the cell was moved out.
    #[inline]
    pub fn ptr(&self) -> BridgeResult<*mut c_void> {
        registry().get(self.handle)
    }

    /// Independent copy through the engine copy constructor.
    pub fn try_clone(&self) -> BridgeResult<Self> {
        let src = self.ptr()?;
        unsafe { Self::copy_from(self.kind, src) }
    }

    /// Pass by reference when possible, by frame-local copy otherwise.
    pub fn encode_arg(&self, frame: &mut CallFrame) -> BridgeResult<()> {
        if frame.push_checkout(self.handle)? {
            return Ok(());
        }
        let src = self.ptr()?;
        let kind = self.kind;
        frame.push_with(kind.size(), kind.align(), Some(kind), |dst| unsafe {
            kind.construct_copy(dst, src)
        })
    }

    /// Move the value into uninitialized engine memory and give up the cell.
    ///
    /// # Safety
    /// `dst` must be valid for writes of the value's size.
    pub unsafe fn move_into(self, dst: *mut c_void) -> BridgeResult<()> {
        let this = ManuallyDrop::new(self);
        let block = registry().end(this.handle)?;
        unsafe {
            std::ptr::copy_nonoverlapping(block.cast::<u8>(), dst.cast::<u8>(), this.kind.size());
            (interface::get()?.mem_free)(block);
        }
        Ok(())
    }
}

impl Clone for BuiltinCell {
    fn clone(&self) -> Self {
        self.try_clone().unwrap_or_else(|err| fatal(err))
    }
}

impl Drop for BuiltinCell {
    fn drop(&mut self) {
        registry().release(self.handle);
    }
}

impl std::fmt::Debug for BuiltinCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinCell")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Destroy and free a reclaimed cell block.
///
/// # Safety
/// `block` must come from [`BuiltinCell`] and hold an initialized value.
pub unsafe fn free_cell(kind: CellKind, block: *mut c_void) -> BridgeResult<()> {
    let interface = interface::get()?;
    unsafe {
        kind.destroy(block);
        (interface.mem_free)(block);
    }
    Ok(())
}

/// 16-aligned scratch big enough for any engine value.
#[repr(C, align(16))]
pub(crate) struct SlotBuf([u8; crate::frame::RETURN_CAPACITY]);

impl SlotBuf {
    pub(crate) fn zeroed() -> Self {
        Self([0; crate::frame::RETURN_CAPACITY])
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut c_void {
        self.0.as_mut_ptr().cast()
    }
}
