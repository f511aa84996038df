//! Call marshalling and object lifetime runtime for engine extension
//! libraries.
//!
//! An extension library is loaded by the engine through a C entry point and
//! talks to it only through the function table the engine hands over. This
//! crate is the layer between that table and safe host code:
//!
//! - values are encoded into per-call frames and decoded from return slots,
//! - every engine pointer the host holds is a generation-checked [`Handle`],
//! - refcounted objects keep exactly one reference per owning [`Gd`],
//! - host types become engine classes through [`ClassBuilder`].
//!
//! ```ignore
//! use gdbridge::prelude::*;
//!
//! engine_class!(pub struct Resource: RefCounted, refcounted);
//! engine_class!(pub struct Gradient: Resource, refcounted);
//!
//! engine_methods! {
//!     static ADD_POINT = Gradient::add_point(float, Color);
//!     static SAMPLE = Gradient::sample(float) -> Color;
//! }
//!
//! let gradient = Gd::<Gradient>::construct()?;
//! ADD_POINT.call::<()>(gradient.raw(), &[&0.0f32, &Color::RED])?;
//! ADD_POINT.call::<()>(gradient.raw(), &[&1.0f32, &Color::BLUE])?;
//! let mid: Color = SAMPLE.call(gradient.raw(), &[&0.5f32])?;
//! ```

pub mod shim;

pub use gdbridge_core::{
    builtin, callable, codec, collections, config, error, frame, init, interface, logging, math,
    method, obj, packed, pointers, registry, string, variant,
};
pub use gdbridge_core::{
    AsArg, Base, BridgeConfig, BridgeError, BridgeResult, CallFrame, Callable, CallbackArgs,
    CallbackRet, ClassBuilder, Dictionary, EngineValue, GString, Gd, GodotClass, Handle,
    HostClass, MethodHandle, NodePath, Object, ObjectFlavor, Ownership, PackedArray,
    PackedByteArray, PackedColorArray, PackedFloat32Array, PackedFloat64Array, PackedInt32Array,
    PackedInt64Array, PackedStringArray, PackedVector2Array, PackedVector3Array, PointerRegistry,
    RawGd, RefCounted, StringName, ValueKind, Variant, VariantArray,
};
pub use gdbridge_core::{engine_class, varargs};
pub use gdbridge_sys as sys;
pub use shim::EngineMethod;

/// Everything a typical extension library needs.
pub mod prelude {
    pub use crate::shim::EngineMethod;
    pub use crate::{engine_class, engine_methods, varargs};
    pub use gdbridge_core::init::ExtensionLibrary;
    pub use gdbridge_core::math::*;
    pub use gdbridge_core::{
        Base, BridgeConfig, BridgeError, BridgeResult, Callable, ClassBuilder, Dictionary,
        EngineValue, GString, Gd, GodotClass, HostClass, NodePath, Object, ObjectFlavor,
        PackedByteArray, PackedColorArray, PackedFloat32Array, PackedFloat64Array,
        PackedInt32Array, PackedInt64Array, PackedStringArray, PackedVector2Array,
        PackedVector3Array, RefCounted, StringName, Variant, VariantArray,
    };
    pub use gdbridge_sys::VariantType;
}
