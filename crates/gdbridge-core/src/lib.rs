//! Core runtime of the engine bridge.
//!
//! The crate moves values and calls across the engine's C ABI and keeps
//! engine-side values alive for exactly as long as the host needs them.
//!
//! - [`frame`]: per-call argument storage, pooled per thread.
//! - [`pointers`]: generation-checked registry of every engine pointer the host holds.
//! - [`codec`]: conversion of host values to and from engine slots and variants.
//! - [`obj`]: engine objects, refcounting and ownership flavors.
//! - [`method`]: method-bind lookup and ptrcall dispatch.
//! - [`registry`]: host-defined extension classes.
//! - [`interface`] and [`init`]: loading the engine's function table.

pub mod builtin;
pub mod callable;
pub mod codec;
pub mod collections;
pub mod config;
pub mod error;
pub mod frame;
pub mod init;
pub mod interface;
pub mod logging;
pub mod math;
pub mod method;
pub mod obj;
pub mod packed;
pub mod pointers;
pub mod registry;
pub mod string;
pub mod variant;

pub use callable::Callable;
pub use codec::{AsArg, CallbackArgs, CallbackRet, EngineValue};
pub use collections::{Dictionary, VariantArray};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use frame::CallFrame;
pub use method::MethodHandle;
pub use obj::{Base, Gd, GodotClass, Object, ObjectFlavor, RawGd, RefCounted};
pub use packed::{
    PackedArray, PackedByteArray, PackedColorArray, PackedFloat32Array, PackedFloat64Array,
    PackedInt32Array, PackedInt64Array, PackedStringArray, PackedVector2Array,
    PackedVector3Array,
};
pub use pointers::{Handle, Ownership, PointerRegistry, ValueKind};
pub use registry::{ClassBuilder, HostClass};
pub use string::{GString, NodePath, StringName};
pub use variant::Variant;

pub use gdbridge_sys as sys;
