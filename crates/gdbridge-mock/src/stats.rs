//! Counters the tests read to check for leaks and stray calls.

use crate::{object, value};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static PTRCALLS: AtomicU64 = AtomicU64::new(0);
static VARCALLS: AtomicU64 = AtomicU64::new(0);
static INVALID_ACCESSES: AtomicU64 = AtomicU64::new(0);
pub(crate) static BLOCKS_ALIVE: AtomicI64 = AtomicI64::new(0);

static CONSTRUCTED: LazyLock<Mutex<FxHashMap<String, u64>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));
static DESTROYED: LazyLock<Mutex<FxHashMap<String, u64>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

static ERRORS: LazyLock<Mutex<Vec<String>>> = LazyLock::new(|| Mutex::new(Vec::new()));
static WARNINGS: LazyLock<Mutex<Vec<String>>> = LazyLock::new(|| Mutex::new(Vec::new()));

/// Snapshot of the engine's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub objects_alive: usize,
    /// Heap cells behind strings, containers, packed arrays and callables.
    pub cells_alive: i64,
    /// Blocks handed out by `mem_alloc` and not yet freed.
    pub blocks_alive: i64,
    pub ptrcalls: u64,
    pub varcalls: u64,
    pub invalid_accesses: u64,
}

pub fn snapshot() -> Stats {
    Stats {
        objects_alive: object::live_count(),
        cells_alive: value::CELLS_ALIVE.load(Ordering::Relaxed),
        blocks_alive: BLOCKS_ALIVE.load(Ordering::Relaxed),
        ptrcalls: PTRCALLS.load(Ordering::Relaxed),
        varcalls: VARCALLS.load(Ordering::Relaxed),
        invalid_accesses: INVALID_ACCESSES.load(Ordering::Relaxed),
    }
}

pub(crate) fn record_ptrcall() {
    PTRCALLS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_varcall() {
    VARCALLS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_invalid_access() {
    INVALID_ACCESSES.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_constructed(class: &str) {
    *CONSTRUCTED.lock().entry(class.to_owned()).or_default() += 1;
}

pub(crate) fn record_destroyed(class: &str) {
    *DESTROYED.lock().entry(class.to_owned()).or_default() += 1;
}

/// Objects constructed through the class database under `class`.
pub fn constructed(class: &str) -> u64 {
    CONSTRUCTED.lock().get(class).copied().unwrap_or(0)
}

/// Objects destroyed while labelled `class`.
pub fn destroyed(class: &str) -> u64 {
    DESTROYED.lock().get(class).copied().unwrap_or(0)
}

pub(crate) fn record_error(message: String) {
    ERRORS.lock().push(message);
}

pub(crate) fn record_warning(message: String) {
    WARNINGS.lock().push(message);
}

/// Messages sent to the error console since the last call.
pub fn take_errors() -> Vec<String> {
    std::mem::take(&mut *ERRORS.lock())
}

/// Messages sent to the warning console since the last call.
pub fn take_warnings() -> Vec<String> {
    std::mem::take(&mut *WARNINGS.lock())
}
