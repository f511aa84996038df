//! Call frames: scratch storage for one engine call.
//!
//! A frame lays out the argument values the engine reads through its
//! pointer array, plus one return slot the engine assigns into. Storage is
//! recycled through a thread-local pool; a frame that outgrows its inline
//! buffer moves to a heap buffer that is freed on release.
//!
//! Frames are released by `Drop`, so every exit path out of a call site
//! (including `?` and panics) runs the pending destructors and returns the
//! storage to the pool.

use crate::codec::cell::CellKind;
use crate::error::{BridgeError, BridgeResult};
use crate::pointers::{self, Handle, registry};
use gdbridge_sys as sys;
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::marker::PhantomData;

/// Bytes of argument storage available before a frame moves to the heap.
pub const INLINE_CAPACITY: usize = 256;
/// Argument slots reserved up front.
pub const INLINE_SLOTS: usize = 16;
/// Largest engine value a return slot can hold.
pub const RETURN_CAPACITY: usize = 64;

const CHUNK: usize = 16;
const INLINE_CHUNKS: usize = INLINE_CAPACITY / CHUNK;
const RETURN_CHUNKS: usize = RETURN_CAPACITY / CHUNK;
const POOL_LIMIT: usize = 32;

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Chunk([u8; CHUNK]);

const ZERO_CHUNK: Chunk = Chunk([0; CHUNK]);

thread_local! {
    static POOL: RefCell<Vec<Box<FrameStorage>>> = const { RefCell::new(Vec::new()) };
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

#[derive(Clone, Copy)]
enum ArgSlot {
    Offset(usize),
    External(*const c_void),
}

struct FrameStorage {
    inline: [Chunk; INLINE_CHUNKS],
    heap: Vec<Chunk>,
    on_heap: bool,
    len: usize,
    args: Vec<ArgSlot>,
    temps: Vec<(usize, CellKind)>,
    checkouts: Vec<Handle>,
    ptrs: Vec<sys::ConstTypePtr>,
    ret: [Chunk; RETURN_CHUNKS],
    ret_temp: Option<CellKind>,
}

impl FrameStorage {
    fn new() -> Box<Self> {
        Box::new(Self {
            inline: [ZERO_CHUNK; INLINE_CHUNKS],
            heap: Vec::new(),
            on_heap: false,
            len: 0,
            args: Vec::with_capacity(INLINE_SLOTS),
            temps: Vec::new(),
            checkouts: Vec::new(),
            ptrs: Vec::with_capacity(INLINE_SLOTS),
            ret: [ZERO_CHUNK; RETURN_CHUNKS],
            ret_temp: None,
        })
    }

    fn capacity(&self) -> usize {
        if self.on_heap {
            self.heap.len() * CHUNK
        } else {
            INLINE_CAPACITY
        }
    }

    fn base(&mut self) -> *mut u8 {
        if self.on_heap {
            self.heap.as_mut_ptr().cast()
        } else {
            self.inline.as_mut_ptr().cast()
        }
    }

    /// Reserve `size` bytes aligned to `align`, returning the offset.
    fn reserve(&mut self, size: usize, align: usize) -> usize {
        let align = align.clamp(1, CHUNK);
        let offset = self.len.next_multiple_of(align);
        let end = offset + size;
        if end > self.capacity() {
            self.grow(end);
        }
        self.len = end;
        offset
    }

    /// Move to (or enlarge) the heap buffer. Engine values are relocatable,
    /// so constructed temporaries survive the byte copy.
    fn grow(&mut self, needed: usize) {
        let chunks = needed.div_ceil(CHUNK).max(INLINE_CHUNKS * 2);
        if self.on_heap {
            let target = chunks.max(self.heap.len() * 2);
            self.heap.resize(target, ZERO_CHUNK);
        } else {
            let mut heap = Vec::with_capacity(chunks);
            heap.extend_from_slice(&self.inline);
            heap.resize(chunks, ZERO_CHUNK);
            self.heap = heap;
            self.on_heap = true;
            tracing::trace!(bytes = needed, "call frame moved to heap");
        }
    }

    fn reset(&mut self) {
        self.heap = Vec::new();
        self.on_heap = false;
        self.len = 0;
        self.args.clear();
        self.temps.clear();
        self.checkouts.clear();
        self.ptrs.clear();
        self.ret_temp = None;
    }
}

/// Scratch storage for exactly one engine call.
///
/// Not `Send`: a frame is acquired, populated, consumed and released on one
/// thread.
pub struct CallFrame {
    storage: Option<Box<FrameStorage>>,
    _not_send: PhantomData<*const ()>,
}

impl CallFrame {
    /// Take a frame from this thread's pool.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn acquire() -> CallFrame {
        let storage = POOL
            .with(|pool| pool.borrow_mut().pop())
            .unwrap_or_else(FrameStorage::new);
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        CallFrame {
            storage: Some(storage),
            _not_send: PhantomData,
        }
    }

    fn storage(&mut self) -> &mut FrameStorage {
        match self.storage.as_deref_mut() {
            Some(storage) => storage,
            None => unreachable!("frame storage is present until drop"),
        }
    }

    /// Append a plain value copied bitwise.
    pub fn push_pod<T: Copy>(&mut self, value: &T) {
        let storage = self.storage();
        let offset = storage.reserve(size_of::<T>(), align_of::<T>());
        unsafe {
            storage
                .base()
                .add(offset)
                .cast::<T>()
                .write_unaligned(*value)
        };
        storage.args.push(ArgSlot::Offset(offset));
    }

    /// Append a value constructed in place by `init`.
    ///
    /// When `temp` is given the value is destroyed on release. If `init`
    /// fails nothing is recorded and no destructor runs.
    pub fn push_with(
        &mut self,
        size: usize,
        align: usize,
        temp: Option<CellKind>,
        init: impl FnOnce(*mut c_void) -> BridgeResult<()>,
    ) -> BridgeResult<()> {
        let storage = self.storage();
        let offset = storage.reserve(size, align);
        let ptr = unsafe { storage.base().add(offset) }.cast::<c_void>();
        init(ptr)?;
        let storage = self.storage();
        storage.args.push(ArgSlot::Offset(offset));
        if let Some(kind) = temp {
            storage.temps.push((offset, kind));
        }
        Ok(())
    }

    /// Append a pointer to a value that lives outside the frame.
    pub fn push_external(&mut self, ptr: *const c_void) {
        self.storage().args.push(ArgSlot::External(ptr));
    }

    /// Borrow a host-held cell for this call and pass it by reference.
    ///
    /// Returns `Ok(false)` when the handle is already borrowed by this or an
    /// enclosing call; the caller then passes a copy instead.
    pub fn push_checkout(&mut self, handle: Handle) -> BridgeResult<bool> {
        match registry().checkout(handle) {
            Ok(ptr) => {
                let storage = self.storage();
                storage.args.push(ArgSlot::External(ptr));
                storage.checkouts.push(handle);
                Ok(true)
            }
            Err(BridgeError::AlreadyCheckedOut(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Borrow the receiver of the call. A receiver already borrowed by an
    /// enclosing call is read without a second checkout.
    pub fn checkout_receiver(&mut self, handle: Handle) -> BridgeResult<*mut c_void> {
        match registry().checkout(handle) {
            Ok(ptr) => {
                self.storage().checkouts.push(handle);
                Ok(ptr)
            }
            Err(BridgeError::AlreadyCheckedOut(_)) => registry().get(handle),
            Err(err) => Err(err),
        }
    }

    pub fn arg_count(&self) -> usize {
        self.storage.as_ref().map_or(0, |storage| storage.args.len())
    }

    pub fn byte_len(&self) -> usize {
        self.storage.as_ref().map_or(0, |storage| storage.len)
    }

    pub fn is_on_heap(&self) -> bool {
        self.storage.as_ref().is_some_and(|storage| storage.on_heap)
    }

    /// Pointer array handed to the engine. Valid until the next push.
    pub fn arg_ptrs(&mut self) -> *const sys::ConstTypePtr {
        let storage = self.storage();
        let base = storage.base();
        let FrameStorage { args, ptrs, .. } = storage;
        ptrs.clear();
        ptrs.extend(args.iter().map(|slot| match *slot {
            ArgSlot::Offset(offset) => unsafe { base.add(offset) }.cast_const().cast(),
            ArgSlot::External(ptr) => ptr,
        }));
        ptrs.as_ptr()
    }

    /// Pointer to argument `index`, for inspection after a call.
    pub fn arg_ptr(&mut self, index: usize) -> Option<*const c_void> {
        let storage = self.storage();
        let base = storage.base();
        storage.args.get(index).map(|slot| match *slot {
            ArgSlot::Offset(offset) => unsafe { base.add(offset) }.cast_const().cast(),
            ArgSlot::External(ptr) => ptr,
        })
    }

    /// The return slot, zeroed or holding whatever was prepared.
    pub fn ret_ptr(&mut self) -> *mut c_void {
        self.storage().ret.as_mut_ptr().cast()
    }

    /// Zero the return slot and run `init` on it. The value is destroyed on
    /// release unless [`CallFrame::consume_return`] is called first.
    pub fn prepare_return(
        &mut self,
        temp: Option<CellKind>,
        init: impl FnOnce(*mut c_void) -> BridgeResult<()>,
    ) -> BridgeResult<()> {
        let storage = self.storage();
        if let Some(previous) = storage.ret_temp.take() {
            unsafe { previous.destroy(storage.ret.as_mut_ptr().cast()) };
        }
        storage.ret = [ZERO_CHUNK; RETURN_CHUNKS];
        init(storage.ret.as_mut_ptr().cast())?;
        storage.ret_temp = temp;
        Ok(())
    }

    /// Mark the return value as moved out of the frame.
    pub fn consume_return(&mut self) {
        self.storage().ret_temp = None;
    }

    fn release(&mut self) {
        let Some(mut storage) = self.storage.take() else {
            return;
        };

        let base = storage.base();
        for (offset, kind) in storage.temps.drain(..).rev() {
            unsafe { kind.destroy(base.add(offset).cast()) };
        }
        if let Some(kind) = storage.ret_temp.take() {
            unsafe { kind.destroy(storage.ret.as_mut_ptr().cast()) };
        }
        for handle in storage.checkouts.drain(..) {
            if let Err(err) = registry().checkin(handle) {
                tracing::warn!(%handle, "checkin on frame release failed: {err}");
            }
        }

        storage.reset();
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.len() < POOL_LIMIT {
                pool.push(storage);
            }
        });

        let outermost = DEPTH.with(|depth| {
            let next = depth.get().saturating_sub(1);
            depth.set(next);
            next == 0
        });
        // Safe point: no frame of this thread is borrowing a handle.
        if outermost && registry().pending() > 0 {
            pointers::cycle();
        }
    }
}

impl Drop for CallFrame {
    fn drop(&mut self) {
        self.release();
    }
}

/// Frames currently acquired on this thread.
pub fn depth() -> usize {
    DEPTH.with(Cell::get)
}

/// Frames waiting in this thread's pool.
pub fn pooled() -> usize {
    POOL.with(|pool| pool.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read<T: Copy>(frame: &mut CallFrame, index: usize) -> T {
        let ptr = frame.arg_ptr(index).unwrap();
        unsafe { ptr.cast::<T>().read_unaligned() }
    }

    #[test]
    fn test_push_and_read_back() {
        let mut frame = CallFrame::acquire();
        frame.push_pod(&true);
        frame.push_pod(&42i64);
        frame.push_pod(&1.5f64);
        frame.push_pod(&[1.0f32, 2.0, 3.0]);

        assert_eq!(frame.arg_count(), 4);
        assert_eq!(read::<bool>(&mut frame, 0), true);
        assert_eq!(read::<i64>(&mut frame, 1), 42);
        assert_eq!(read::<f64>(&mut frame, 2), 1.5);
        assert_eq!(read::<[f32; 3]>(&mut frame, 3), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_slots_are_aligned() {
        let mut frame = CallFrame::acquire();
        frame.push_pod(&1u8);
        frame.push_pod(&2i64);
        let ptr = frame.arg_ptr(1).unwrap();
        assert_eq!(ptr as usize % align_of::<i64>(), 0);
    }

    #[test]
    fn test_heap_upgrade_keeps_values() {
        let mut frame = CallFrame::acquire();
        for n in 0..40i64 {
            frame.push_pod(&[n; 2]);
        }
        assert!(frame.is_on_heap());
        assert_eq!(frame.arg_count(), 40);

        let ptrs = frame.arg_ptrs();
        for n in 0..40usize {
            let value = unsafe { (*ptrs.add(n)).cast::<[i64; 2]>().read() };
            assert_eq!(value, [n as i64; 2]);
        }
    }

    #[test]
    fn test_release_returns_to_pool() {
        let before = pooled();
        {
            let mut frame = CallFrame::acquire();
            frame.push_pod(&7i64);
            assert_eq!(depth(), 1);
        }
        assert_eq!(depth(), 0);
        assert!(pooled() >= before.max(1));

        // Recycled storage starts empty.
        let frame = CallFrame::acquire();
        assert_eq!(frame.arg_count(), 0);
        assert_eq!(frame.byte_len(), 0);
        assert!(!frame.is_on_heap());
    }

    #[test]
    fn test_nested_frames() {
        let mut outer = CallFrame::acquire();
        outer.push_pod(&1i64);
        {
            let mut inner = CallFrame::acquire();
            inner.push_pod(&2i64);
            assert_eq!(depth(), 2);
            assert_eq!(read::<i64>(&mut inner, 0), 2);
        }
        assert_eq!(depth(), 1);
        assert_eq!(read::<i64>(&mut outer, 0), 1);
    }

    #[test]
    fn test_failed_init_records_nothing() {
        let mut frame = CallFrame::acquire();
        let result = frame.push_with(8, 8, Some(CellKind::Variant), |_| {
            Err(BridgeError::NullObject)
        });
        assert_eq!(result, Err(BridgeError::NullObject));
        assert_eq!(frame.arg_count(), 0);
    }

    #[test]
    fn test_return_slot() {
        let mut frame = CallFrame::acquire();
        frame
            .prepare_return(None, |ptr| {
                unsafe { ptr.cast::<f64>().write(0.25) };
                Ok(())
            })
            .unwrap();
        let value = unsafe { frame.ret_ptr().cast::<f64>().read() };
        assert_eq!(value, 0.25);
        assert_eq!(frame.ret_ptr() as usize % 16, 0);
    }

    #[test]
    fn test_external_arguments() {
        let outside = 99i64;
        let mut frame = CallFrame::acquire();
        frame.push_external((&raw const outside).cast());
        assert_eq!(read::<i64>(&mut frame, 0), 99);
    }
}
