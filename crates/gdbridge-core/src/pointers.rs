//! Generation-indexed registry of engine pointers held by the host.
//!
//! Every engine pointer the host keeps beyond a single call is wrapped in a
//! [`Handle`]. The registry records what the pointer denotes and who owns it,
//! and invalidates handles by bumping the slot generation when the pointer
//! leaves host ownership.
//!
//! State transitions per slot:
//!
//! ```text
//! fresh -> owned-by-host <-> checked-out -> freed
//! fresh -> owned-by-engine -> freed
//! ```
//!
//! Storage is split into [`SHARD_COUNT`] shards selected by `index % SHARD_COUNT`,
//! each behind its own mutex. Wrappers that are dropped push their handle on a
//! lock-free queue; [`PointerRegistry::cycle_with`] drains it at safe points.

use crate::codec::cell::{CellKind, free_cell};
use crate::error::{BridgeError, BridgeResult};
use crossbeam_deque::{Injector, Steal};
use gdbridge_sys::VariantType;
use parking_lot::Mutex;
use std::cell::Cell;
use std::ffi::c_void;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of shards. A small prime spreads sequential indices evenly.
pub const SHARD_COUNT: usize = 7;

static REGISTRY: OnceLock<PointerRegistry> = OnceLock::new();

thread_local! {
    static CYCLING: Cell<bool> = const { Cell::new(false) };
}

/// Generation-checked reference to a registry slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u64,
}

impl Handle {
    pub const fn new(index: u32, generation: u64) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    fn shard(&self) -> usize {
        self.index as usize % SHARD_COUNT
    }

    #[inline]
    fn local(&self) -> usize {
        self.index as usize / SHARD_COUNT
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

/// What an engine pointer denotes; decides how it is reclaimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Host-allocated cell holding a built-in value.
    Builtin(VariantType),
    /// Host-allocated cell holding a variant.
    Variant,
    /// Engine object.
    Object { refcounted: bool },
}

/// Who is responsible for destroying the pointee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ownership {
    OwnedByHost,
    OwnedByEngine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Fresh,
    Owned(Ownership),
    /// Borrowed by an in-flight call; remembers the state to restore.
    CheckedOut(Ownership),
    Freed,
}

/// A slot removed from the registry, handed to the reclaim callback.
#[derive(Clone, Copy, Debug)]
pub struct Reclaimed {
    pub handle: Handle,
    pub ptr: *mut c_void,
    pub kind: ValueKind,
    pub ownership: Ownership,
}

struct Slot {
    generation: u64,
    ptr: usize,
    kind: ValueKind,
    state: SlotState,
}

#[derive(Default)]
struct Shard {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

impl Shard {
    fn slot(&self, handle: Handle) -> Option<&Slot> {
        self.slots
            .get(handle.local())
            .filter(|slot| slot.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: Handle) -> Option<&mut Slot> {
        self.slots
            .get_mut(handle.local())
            .filter(|slot| slot.generation == handle.generation)
    }

    /// Transition a live slot to `Freed` and recycle it.
    fn free(&mut self, handle: Handle) -> Option<Reclaimed> {
        let slot = self.slot_mut(handle)?;
        let ownership = match slot.state {
            SlotState::Owned(ownership) => ownership,
            _ => return None,
        };
        let reclaimed = Reclaimed {
            handle,
            ptr: slot.ptr as *mut c_void,
            kind: slot.kind,
            ownership,
        };
        slot.state = SlotState::Freed;
        slot.generation = slot.generation.wrapping_add(1);
        slot.ptr = 0;
        self.free_list.push(handle.local() as u32);
        Some(reclaimed)
    }
}

/// Clears the reentrancy flag when a cycle ends, including by panic.
struct CycleGuard;

impl Drop for CycleGuard {
    fn drop(&mut self) {
        CYCLING.with(|flag| flag.set(false));
    }
}

pub struct PointerRegistry {
    shards: [Mutex<Shard>; SHARD_COUNT],
    queue: Injector<Handle>,
    next_shard: AtomicUsize,
    live: AtomicUsize,
    pending: AtomicUsize,
}

impl Default for PointerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerRegistry {
    pub fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(Shard::default())),
            queue: Injector::new(),
            next_shard: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
        }
    }

    /// Register `ptr` and return its handle.
    pub fn new_handle(&self, ptr: *mut c_void, kind: ValueKind, ownership: Ownership) -> Handle {
        let shard_index = self.next_shard.fetch_add(1, Ordering::Relaxed) % SHARD_COUNT;
        let mut shard = self.shards[shard_index].lock();

        let local = match shard.free_list.pop() {
            Some(local) => local as usize,
            None => {
                shard.slots.push(Slot {
                    generation: 0,
                    ptr: 0,
                    kind,
                    state: SlotState::Fresh,
                });
                shard.slots.len() - 1
            }
        };

        let slot = &mut shard.slots[local];
        slot.generation = slot.generation.wrapping_add(1);
        slot.ptr = ptr as usize;
        slot.kind = kind;
        slot.state = SlotState::Owned(ownership);

        self.live.fetch_add(1, Ordering::Relaxed);
        let index = (local * SHARD_COUNT + shard_index) as u32;
        Handle::new(index, slot.generation)
    }

    /// The pointer behind `handle`.
    ///
    /// # Errors
    /// `StaleHandle` when the slot has been freed or reused.
    #[inline]
    pub fn get(&self, handle: Handle) -> BridgeResult<*mut c_void> {
        let shard = self.shards[handle.shard()].lock();
        match shard.slot(handle) {
            Some(slot) if !matches!(slot.state, SlotState::Freed | SlotState::Fresh) => {
                Ok(slot.ptr as *mut c_void)
            }
            _ => Err(BridgeError::StaleHandle(handle)),
        }
    }

    /// Current state of the slot behind `handle`.
    pub fn state(&self, handle: Handle) -> BridgeResult<SlotState> {
        let shard = self.shards[handle.shard()].lock();
        shard
            .slot(handle)
            .map(|slot| slot.state)
            .ok_or(BridgeError::StaleHandle(handle))
    }

    /// Take the pointer out of the registry, invalidating `handle`.
    ///
    /// Used where ownership crosses the ABI outbound.
    ///
    /// # Errors
    /// `DoubleFree` on a freed or reused slot, `CheckedOut` while a call borrows it.
    pub fn end(&self, handle: Handle) -> BridgeResult<*mut c_void> {
        self.end_entry(handle).map(|entry| entry.ptr)
    }

    pub fn end_entry(&self, handle: Handle) -> BridgeResult<Reclaimed> {
        let mut shard = self.shards[handle.shard()].lock();
        match shard.slot(handle).map(|slot| slot.state) {
            None | Some(SlotState::Freed) | Some(SlotState::Fresh) => {
                Err(BridgeError::DoubleFree(handle))
            }
            Some(SlotState::CheckedOut(_)) => Err(BridgeError::CheckedOut(handle)),
            Some(SlotState::Owned(_)) => {
                let entry = shard.free(handle).ok_or(BridgeError::DoubleFree(handle))?;
                self.live.fetch_sub(1, Ordering::Relaxed);
                Ok(entry)
            }
        }
    }

    /// Borrow the pointer for the duration of a call.
    ///
    /// # Errors
    /// `AlreadyCheckedOut` on a second checkout before checkin,
    /// `StaleHandle` on a freed slot.
    pub fn checkout(&self, handle: Handle) -> BridgeResult<*mut c_void> {
        let mut shard = self.shards[handle.shard()].lock();
        let slot = shard
            .slot_mut(handle)
            .ok_or(BridgeError::StaleHandle(handle))?;
        match slot.state {
            SlotState::Owned(ownership) => {
                slot.state = SlotState::CheckedOut(ownership);
                Ok(slot.ptr as *mut c_void)
            }
            SlotState::CheckedOut(_) => Err(BridgeError::AlreadyCheckedOut(handle)),
            SlotState::Freed | SlotState::Fresh => Err(BridgeError::StaleHandle(handle)),
        }
    }

    /// Return a borrowed handle to its previous ownership.
    pub fn checkin(&self, handle: Handle) -> BridgeResult<()> {
        let mut shard = self.shards[handle.shard()].lock();
        let slot = shard
            .slot_mut(handle)
            .ok_or(BridgeError::StaleHandle(handle))?;
        match slot.state {
            SlotState::CheckedOut(ownership) => {
                slot.state = SlotState::Owned(ownership);
                Ok(())
            }
            _ => Err(BridgeError::NotCheckedOut(handle)),
        }
    }

    /// Queue `handle` for reclamation; called when its host wrapper is dropped.
    ///
    /// Never blocks and never calls into the engine.
    pub fn release(&self, handle: Handle) {
        self.queue.push(handle);
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain the reclamation queue, passing every reclaimable slot to `reclaim`.
    ///
    /// Handles that are checked out, or whose shard is locked by another
    /// thread, stay queued for the next cycle. Stale handles are dropped
    /// silently. Returns the number of slots reclaimed. A nested call on the
    /// same thread, for instance from inside `reclaim`, returns 0.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn cycle_with(&self, mut reclaim: impl FnMut(Reclaimed)) -> usize {
        if CYCLING.with(|flag| flag.replace(true)) {
            return 0;
        }
        let _guard = CycleGuard;

        let mut deferred = Vec::new();
        let mut reclaimed = Vec::new();

        loop {
            let handle = match self.queue.steal() {
                Steal::Success(handle) => handle,
                Steal::Retry => continue,
                Steal::Empty => break,
            };

            let Some(mut shard) = self.shards[handle.shard()].try_lock() else {
                deferred.push(handle);
                continue;
            };

            match shard.slot(handle).map(|slot| slot.state) {
                Some(SlotState::CheckedOut(_)) => deferred.push(handle),
                Some(SlotState::Owned(_)) => {
                    if let Some(entry) = shard.free(handle) {
                        self.live.fetch_sub(1, Ordering::Relaxed);
                        reclaimed.push(entry);
                    }
                    self.pending.fetch_sub(1, Ordering::Relaxed);
                }
                // Already ended or reused: nothing left to do.
                _ => {
                    self.pending.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }

        for handle in deferred {
            self.queue.push(handle);
        }

        let count = reclaimed.len();
        // No shard lock is held while reclaiming.
        for entry in reclaimed {
            reclaim(entry);
        }
        if count > 0 {
            tracing::trace!(reclaimed = count, "pointer registry cycle");
        }
        count
    }

    /// Handles currently registered and not freed.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Handles queued for reclamation.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

/// The process-wide registry.
pub fn registry() -> &'static PointerRegistry {
    REGISTRY.get_or_init(PointerRegistry::new)
}

/// Drain the process-wide queue, running engine destructors for everything
/// the host owned.
///
/// Returns the number of handles reclaimed.
pub fn cycle() -> usize {
    registry().cycle_with(reclaim_engine_value)
}

fn reclaim_engine_value(entry: Reclaimed) {
    if entry.ownership == Ownership::OwnedByEngine {
        return;
    }
    let result = match entry.kind {
        ValueKind::Builtin(ty) => unsafe { free_cell(CellKind::Builtin(ty), entry.ptr) },
        ValueKind::Variant => unsafe { free_cell(CellKind::Variant, entry.ptr) },
        ValueKind::Object { refcounted } => crate::obj::release_object(entry.ptr, refcounted),
    };
    if let Err(err) = result {
        if err.is_fatal() {
            crate::error::fatal(err);
        }
        tracing::warn!(handle = %entry.handle, "reclaim failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_ptr(n: usize) -> *mut c_void {
        (n * 16) as *mut c_void
    }

    const STRING: ValueKind = ValueKind::Builtin(VariantType::String);

    #[test]
    fn test_new_get_end() {
        let registry = PointerRegistry::new();
        let h = registry.new_handle(fake_ptr(1), STRING, Ownership::OwnedByHost);

        assert_eq!(registry.get(h), Ok(fake_ptr(1)));
        assert_eq!(registry.live(), 1);
        assert_eq!(registry.end(h), Ok(fake_ptr(1)));
        assert_eq!(registry.live(), 0);

        assert_eq!(registry.get(h), Err(BridgeError::StaleHandle(h)));
        assert_eq!(registry.end(h), Err(BridgeError::DoubleFree(h)));
    }

    #[test]
    fn test_reused_slot_rejects_old_handle() {
        let registry = PointerRegistry::new();
        let handles: Vec<_> = (0..SHARD_COUNT)
            .map(|n| registry.new_handle(fake_ptr(n + 1), STRING, Ownership::OwnedByHost))
            .collect();
        let first = handles[0];
        registry.end(first).unwrap();

        // Round-robin brings the next allocation back to the first shard.
        let reused = (0..SHARD_COUNT)
            .map(|n| registry.new_handle(fake_ptr(100 + n), STRING, Ownership::OwnedByHost))
            .find(|h| h.index() == first.index())
            .expect("slot reused");

        assert_ne!(reused.generation(), first.generation());
        assert_eq!(registry.get(first), Err(BridgeError::StaleHandle(first)));
        assert!(registry.get(reused).is_ok());
    }

    #[test]
    fn test_handles_spread_over_shards() {
        let registry = PointerRegistry::new();
        let shards: std::collections::HashSet<_> = (0..SHARD_COUNT * 3)
            .map(|n| registry.new_handle(fake_ptr(n + 1), STRING, Ownership::OwnedByHost))
            .map(|h| h.index() as usize % SHARD_COUNT)
            .collect();
        assert_eq!(shards.len(), SHARD_COUNT);
    }

    #[test]
    fn test_checkout_checkin() {
        let registry = PointerRegistry::new();
        let h = registry.new_handle(fake_ptr(2), STRING, Ownership::OwnedByHost);

        assert_eq!(registry.checkout(h), Ok(fake_ptr(2)));
        assert_eq!(registry.checkout(h), Err(BridgeError::AlreadyCheckedOut(h)));
        assert_eq!(registry.end(h), Err(BridgeError::CheckedOut(h)));
        assert_eq!(
            registry.state(h),
            Ok(SlotState::CheckedOut(Ownership::OwnedByHost))
        );

        registry.checkin(h).unwrap();
        assert_eq!(registry.checkin(h), Err(BridgeError::NotCheckedOut(h)));
        assert_eq!(registry.state(h), Ok(SlotState::Owned(Ownership::OwnedByHost)));
        assert!(registry.end(h).is_ok());
    }

    #[test]
    fn test_cycle_reclaims_released() {
        let registry = PointerRegistry::new();
        let host = registry.new_handle(fake_ptr(3), STRING, Ownership::OwnedByHost);
        let engine = registry.new_handle(
            fake_ptr(4),
            ValueKind::Object { refcounted: false },
            Ownership::OwnedByEngine,
        );
        registry.release(host);
        registry.release(engine);
        assert_eq!(registry.pending(), 2);

        let mut seen = Vec::new();
        let count = registry.cycle_with(|entry| seen.push((entry.ptr, entry.ownership)));

        assert_eq!(count, 2);
        assert_eq!(registry.pending(), 0);
        assert_eq!(registry.live(), 0);
        assert!(seen.contains(&(fake_ptr(3), Ownership::OwnedByHost)));
        assert!(seen.contains(&(fake_ptr(4), Ownership::OwnedByEngine)));
    }

    #[test]
    fn test_cycle_defers_checked_out() {
        let registry = PointerRegistry::new();
        let h = registry.new_handle(fake_ptr(5), STRING, Ownership::OwnedByHost);
        registry.checkout(h).unwrap();
        registry.release(h);

        assert_eq!(registry.cycle_with(|_| panic!("must not reclaim")), 0);
        assert_eq!(registry.pending(), 1);

        registry.checkin(h).unwrap();
        assert_eq!(registry.cycle_with(|_| {}), 1);
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_cycle_skips_ended_handle() {
        let registry = PointerRegistry::new();
        let h = registry.new_handle(fake_ptr(6), STRING, Ownership::OwnedByHost);
        registry.end(h).unwrap();
        registry.release(h);

        let mut calls = 0;
        assert_eq!(registry.cycle_with(|_| calls += 1), 0);
        assert_eq!(registry.cycle_with(|_| calls += 1), 0);
        assert_eq!(calls, 0);
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_cycle_twice_equals_once() {
        let registry = PointerRegistry::new();
        for n in 0..10 {
            let h = registry.new_handle(fake_ptr(n + 1), STRING, Ownership::OwnedByHost);
            registry.release(h);
        }
        let mut calls = 0;
        assert_eq!(registry.cycle_with(|_| calls += 1), 10);
        assert_eq!(registry.cycle_with(|_| calls += 1), 0);
        assert_eq!(calls, 10);
    }

    #[test]
    fn test_cycle_is_not_reentrant() {
        let registry = PointerRegistry::new();
        let h = registry.new_handle(fake_ptr(7), STRING, Ownership::OwnedByHost);
        registry.release(h);

        let mut nested = usize::MAX;
        registry.cycle_with(|_| nested = registry.cycle_with(|_| {}));
        assert_eq!(nested, 0);
    }

    #[test]
    fn test_generation_wraps() {
        let registry = PointerRegistry::new();
        {
            let mut shard = registry.shards[0].lock();
            shard.slots.push(Slot {
                generation: u64::MAX,
                ptr: 0,
                kind: STRING,
                state: SlotState::Freed,
            });
            shard.free_list.push(0);
        }
        let h = registry.new_handle(fake_ptr(8), STRING, Ownership::OwnedByHost);
        assert_eq!(h.index(), 0);
        assert_eq!(h.generation(), 0);
        assert!(registry.get(h).is_ok());
    }

    #[test]
    fn test_concurrent_new_and_end() {
        let registry = std::sync::Arc::new(PointerRegistry::new());
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for n in 0..500 {
                        let h = registry.new_handle(
                            fake_ptr(t * 1000 + n + 1),
                            STRING,
                            Ownership::OwnedByHost,
                        );
                        assert_eq!(registry.get(h), Ok(fake_ptr(t * 1000 + n + 1)));
                        if n % 2 == 0 {
                            registry.end(h).unwrap();
                        } else {
                            registry.release(h);
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        while registry.pending() > 0 {
            registry.cycle_with(|_| {});
        }
        assert_eq!(registry.live(), 0);
    }
}
