//! Hand-written method shims.
//!
//! An [`EngineMethod`] names one engine method by class, name and signature
//! hash and binds it the first time it is called. The outcome of that bind is
//! kept: a shim whose hash the engine rejects stays broken, and every later
//! call reports the original failure to the log and the engine console
//! instead of reaching the engine.
//!
//! ```ignore
//! static SAMPLE: EngineMethod = EngineMethod::new("Gradient", "sample", 1964823118);
//!
//! let color: Color = SAMPLE.call(gradient.raw(), &[&0.5f32])?;
//! ```

use gdbridge_core::codec::{AsArg, EngineValue};
use gdbridge_core::error::{BridgeError, BridgeResult};
use gdbridge_core::interface;
use gdbridge_core::method::{self, MethodHandle};
use gdbridge_core::obj::RawGd;
use gdbridge_core::variant::Variant;
use std::fmt;
use std::sync::OnceLock;

/// A lazily bound engine method.
pub struct EngineMethod {
    class: &'static str,
    method: &'static str,
    hash: i64,
    is_static: bool,
    bound: OnceLock<BridgeResult<MethodHandle>>,
}

impl EngineMethod {
    pub const fn new(class: &'static str, method: &'static str, hash: i64) -> Self {
        Self {
            class,
            method,
            hash,
            is_static: false,
            bound: OnceLock::new(),
        }
    }

    pub const fn new_static(class: &'static str, method: &'static str, hash: i64) -> Self {
        Self {
            class,
            method,
            hash,
            is_static: true,
            bound: OnceLock::new(),
        }
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn hash(&self) -> i64 {
        self.hash
    }

    /// Whether a bind was attempted and failed.
    pub fn is_broken(&self) -> bool {
        matches!(self.bound.get(), Some(Err(_)))
    }

    /// The bound handle, binding on first use.
    ///
    /// Before the interface is loaded nothing is recorded, so a shim touched
    /// too early still binds later.
    ///
    /// # Errors
    /// The bind error, on this call and every call after it.
    pub fn handle(&self) -> BridgeResult<&MethodHandle> {
        if self.bound.get().is_none() && !interface::is_loaded() {
            return Err(BridgeError::NotInitialized);
        }
        let bound = self.bound.get_or_init(|| {
            if self.is_static {
                method::bind_static(self.class, self.method, self.hash)
            } else {
                method::bind(self.class, self.method, self.hash)
            }
        });
        bound.as_ref().map_err(|err| self.report(err))
    }

    fn report(&self, err: &BridgeError) -> BridgeError {
        let label = format!("{}::{}", self.class, self.method);
        tracing::error!(method = %label, hash = self.hash, "call through unbound shim: {err}");
        interface::print_error_to_engine(
            &format!("{label}: {err}"),
            &label,
            file!(),
            line!(),
        );
        err.clone()
    }

    /// Ptrcall on `this`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call<R: EngineValue>(&self, this: &RawGd, args: &[&dyn AsArg]) -> BridgeResult<R> {
        method::call(self.handle()?, Some(this), args)
    }

    /// Ptrcall without a receiver.
    pub fn call_static<R: EngineValue>(&self, args: &[&dyn AsArg]) -> BridgeResult<R> {
        method::call(self.handle()?, None, args)
    }

    /// Call through the variant path.
    pub fn call_variant(&self, this: Option<&RawGd>, args: &[Variant]) -> BridgeResult<Variant> {
        method::call_variant(self.handle()?, this, args)
    }
}

impl fmt::Debug for EngineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.bound.get() {
            None => "unbound",
            Some(Ok(_)) => "bound",
            Some(Err(_)) => "broken",
        };
        f.debug_struct("EngineMethod")
            .field("class", &self.class)
            .field("method", &self.method)
            .field("hash", &self.hash)
            .field("state", &state)
            .finish()
    }
}

/// Declare [`EngineMethod`] statics whose hashes are computed from their
/// signatures. Static methods are declared with [`EngineMethod::new_static`].
///
/// ```ignore
/// engine_methods! {
///     static ADD_POINT = Gradient::add_point(float, Color);
///     static SAMPLE = Gradient::sample(float) -> Color;
/// }
/// ```
#[macro_export]
macro_rules! engine_methods {
    (@ret) => { None };
    (@ret $ret:ident) => { Some(stringify!($ret)) };
    ($($vis:vis static $name:ident = $class:ident :: $method:ident ( $($arg:ident),* ) $(-> $ret:ident)?;)*) => {$(
        $vis static $name: ::std::sync::LazyLock<$crate::shim::EngineMethod> =
            ::std::sync::LazyLock::new(|| {
                let hash = $crate::method::signature_hash(
                    stringify!($method),
                    &[$(stringify!($arg)),*],
                    $crate::engine_methods!(@ret $($ret)?),
                );
                $crate::shim::EngineMethod::new(stringify!($class), stringify!($method), hash)
            });
    )*};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unloaded_interface_is_not_recorded() {
        let shim = EngineMethod::new("Gradient", "sample", 1);
        assert_eq!(shim.handle().err(), Some(BridgeError::NotInitialized));
        assert!(!shim.is_broken());
        assert!(format!("{shim:?}").contains("unbound"));
    }

    #[test]
    fn test_accessors() {
        let shim = EngineMethod::new_static("Echo", "static_sum", 7);
        assert_eq!((shim.class(), shim.method(), shim.hash()), ("Echo", "static_sum", 7));
    }
}
