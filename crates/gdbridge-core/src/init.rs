//! Library entry and teardown.
//!
//! The engine calls the library's entry function with `get_proc_address`.
//! [`initialize`] loads and publishes the interface, records the library
//! token and installs logging. [`deinitialize`] unregisters classes, drains
//! the pointer registry and drops the method caches.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::interface::{self, Interface};
use crate::pointers::{self, registry};
use crate::{logging, method};
use gdbridge_sys as sys;
use gdbridge_sys::InitializationLevel;
use parking_lot::RwLock;
use std::ffi::c_void;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicPtr, Ordering};

static LIBRARY: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

static CONFIG: LazyLock<RwLock<BridgeConfig>> =
    LazyLock::new(|| RwLock::new(BridgeConfig::default()));

/// The library pointer handed over at load. Also used as the token keying
/// instance bindings and custom callables.
pub fn library_token() -> *mut c_void {
    LIBRARY.load(Ordering::Acquire)
}

/// The configuration in effect.
pub fn config() -> BridgeConfig {
    CONFIG.read().clone()
}

/// Load the interface and prepare the runtime.
///
/// Loading twice keeps the first interface; the library token and the
/// configuration are updated.
///
/// # Errors
/// `AbiVersionMismatch` or `MissingInterfaceFunction`; the library must
/// then refuse to initialize.
///
/// # Safety
/// `get_proc_address` must be the engine's bootstrap function and `library`
/// the pointer the engine passed to the entry function.
pub unsafe fn initialize(
    get_proc_address: sys::GetProcAddress,
    library: sys::ClassLibraryPtr,
    config: BridgeConfig,
) -> BridgeResult<()> {
    if config.install_logging {
        logging::install(config.log_filter.as_deref());
    }

    if !interface::is_loaded() {
        let loaded = unsafe { Interface::load(get_proc_address, &config) }.inspect_err(|err| {
            tracing::error!("engine interface rejected: {err}");
        })?;
        interface::publish(loaded);
    }

    LIBRARY.store(library, Ordering::Release);
    *CONFIG.write() = config;
    tracing::debug!(?library, "library initialized");
    Ok(())
}

/// Release everything the runtime cached.
///
/// Returns the number of handles still live afterwards.
pub fn deinitialize() -> BridgeResult<usize> {
    crate::registry::unregister_all()?;

    let mut reclaimed = 0;
    loop {
        let count = pointers::cycle();
        reclaimed += count;
        if count == 0 {
            break;
        }
    }
    method::clear_cache();

    let live = registry().live();
    if CONFIG.read().report_leaks && live > 0 {
        tracing::warn!(live, "handles still live at deinitialization");
    }
    tracing::debug!(reclaimed, live, "library deinitialized");
    Ok(live)
}

/// Hooks of an extension library.
pub trait ExtensionLibrary: 'static {
    /// Lowest level the library wants to be initialized at.
    fn min_level() -> InitializationLevel {
        InitializationLevel::Scene
    }

    fn config() -> BridgeConfig {
        BridgeConfig::default()
    }

    /// Called once per level, after the runtime is ready. Classes are
    /// usually registered at `Scene`.
    fn on_level_init(_level: InitializationLevel) -> BridgeResult<()> {
        Ok(())
    }

    fn on_level_deinit(_level: InitializationLevel) {}
}

unsafe extern "C" fn initialize_level<L: ExtensionLibrary>(_userdata: *mut c_void, level: u32) {
    let Ok(level) = InitializationLevel::try_from(level) else {
        return;
    };
    if level < L::min_level() {
        return;
    }
    crate::registry::guarded("initialize", || L::on_level_init(level));
}

unsafe extern "C" fn deinitialize_level<L: ExtensionLibrary>(_userdata: *mut c_void, level: u32) {
    let Ok(level) = InitializationLevel::try_from(level) else {
        return;
    };
    if level < L::min_level() {
        return;
    }
    L::on_level_deinit(level);
    if level == L::min_level() {
        crate::registry::guarded("deinitialize", || deinitialize().map(drop));
    }
}

/// Body of the library's exported entry function.
///
/// # Safety
/// Arguments must be the ones the engine passed to the entry function.
pub unsafe fn run_entry_point<L: ExtensionLibrary>(
    get_proc_address: Option<sys::GetProcAddress>,
    library: sys::ClassLibraryPtr,
    r_initialization: *mut sys::Initialization,
) -> sys::Bool {
    let ok = crate::registry::guarded("entry", || {
        let get_proc_address = get_proc_address.ok_or(BridgeError::NotInitialized)?;
        if r_initialization.is_null() {
            return Err(BridgeError::NullObject);
        }
        unsafe { initialize(get_proc_address, library, L::config())? };
        unsafe {
            *r_initialization = sys::Initialization {
                minimum_initialization_level: L::min_level().into(),
                userdata: std::ptr::null_mut(),
                initialize: Some(initialize_level::<L>),
                deinitialize: Some(deinitialize_level::<L>),
            }
        };
        Ok(())
    });
    if ok { sys::TRUE } else { sys::FALSE }
}
