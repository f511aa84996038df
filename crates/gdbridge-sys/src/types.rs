use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Raw tag of a variant type as it crosses the ABI.
pub type VariantTypeRaw = u32;

/// Raw tag of a variant operator as it crosses the ABI.
pub type VariantOperatorRaw = u32;

/// Every value kind the engine's variant can hold.
///
/// The discriminants are the engine's wire tags and are versioned with the
/// interface. Tags arriving from the engine are converted with
/// `VariantType::try_from(raw)`, which fails for tags this build does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum VariantType {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
}

impl VariantType {
    /// Number of variant types known to this build.
    pub const COUNT: usize = 38;

    /// All variant types in tag order.
    pub const ALL: [VariantType; Self::COUNT] = [
        VariantType::Nil,
        VariantType::Bool,
        VariantType::Int,
        VariantType::Float,
        VariantType::String,
        VariantType::Vector2,
        VariantType::Vector2i,
        VariantType::Rect2,
        VariantType::Rect2i,
        VariantType::Vector3,
        VariantType::Vector3i,
        VariantType::Transform2D,
        VariantType::Vector4,
        VariantType::Vector4i,
        VariantType::Plane,
        VariantType::Quaternion,
        VariantType::Aabb,
        VariantType::Basis,
        VariantType::Transform3D,
        VariantType::Projection,
        VariantType::Color,
        VariantType::StringName,
        VariantType::NodePath,
        VariantType::Rid,
        VariantType::Object,
        VariantType::Callable,
        VariantType::Signal,
        VariantType::Dictionary,
        VariantType::Array,
        VariantType::PackedByteArray,
        VariantType::PackedInt32Array,
        VariantType::PackedInt64Array,
        VariantType::PackedFloat32Array,
        VariantType::PackedFloat64Array,
        VariantType::PackedStringArray,
        VariantType::PackedVector2Array,
        VariantType::PackedVector3Array,
        VariantType::PackedColorArray,
    ];

    pub const fn raw(self) -> VariantTypeRaw {
        self as VariantTypeRaw
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Size in bytes of the engine representation of this type.
    ///
    /// Matches a 64-bit build with single-precision reals.
    pub const fn opaque_size(self) -> usize {
        match self {
            VariantType::Nil => 0,
            VariantType::Bool => 1,
            VariantType::Int | VariantType::Float => 8,
            VariantType::String
            | VariantType::StringName
            | VariantType::NodePath
            | VariantType::Rid
            | VariantType::Object
            | VariantType::Dictionary
            | VariantType::Array => 8,
            VariantType::Vector2 | VariantType::Vector2i => 8,
            VariantType::Vector3 | VariantType::Vector3i => 12,
            VariantType::Rect2
            | VariantType::Rect2i
            | VariantType::Vector4
            | VariantType::Vector4i
            | VariantType::Plane
            | VariantType::Quaternion
            | VariantType::Color => 16,
            VariantType::Transform2D | VariantType::Aabb => 24,
            VariantType::Basis => 36,
            VariantType::Transform3D => 48,
            VariantType::Projection => 64,
            VariantType::Callable | VariantType::Signal => 16,
            VariantType::PackedByteArray
            | VariantType::PackedInt32Array
            | VariantType::PackedInt64Array
            | VariantType::PackedFloat32Array
            | VariantType::PackedFloat64Array
            | VariantType::PackedStringArray
            | VariantType::PackedVector2Array
            | VariantType::PackedVector3Array
            | VariantType::PackedColorArray => 16,
        }
    }

    /// Alignment of the engine representation of this type.
    pub const fn opaque_align(self) -> usize {
        match self {
            VariantType::Nil | VariantType::Bool => 1,
            VariantType::Vector2
            | VariantType::Vector2i
            | VariantType::Vector3
            | VariantType::Vector3i
            | VariantType::Rect2
            | VariantType::Rect2i
            | VariantType::Vector4
            | VariantType::Vector4i
            | VariantType::Plane
            | VariantType::Quaternion
            | VariantType::Color
            | VariantType::Transform2D
            | VariantType::Aabb
            | VariantType::Basis
            | VariantType::Transform3D
            | VariantType::Projection => 4,
            _ => 8,
        }
    }

    /// Plain-old-data types are copied bitwise and have no engine destructor.
    pub const fn is_pod(self) -> bool {
        matches!(
            self,
            VariantType::Nil
                | VariantType::Bool
                | VariantType::Int
                | VariantType::Float
                | VariantType::Vector2
                | VariantType::Vector2i
                | VariantType::Rect2
                | VariantType::Rect2i
                | VariantType::Vector3
                | VariantType::Vector3i
                | VariantType::Transform2D
                | VariantType::Vector4
                | VariantType::Vector4i
                | VariantType::Plane
                | VariantType::Quaternion
                | VariantType::Aabb
                | VariantType::Basis
                | VariantType::Transform3D
                | VariantType::Projection
                | VariantType::Color
                | VariantType::Rid
        )
    }

    pub const fn is_packed_array(self) -> bool {
        matches!(
            self,
            VariantType::PackedByteArray
                | VariantType::PackedInt32Array
                | VariantType::PackedInt64Array
                | VariantType::PackedFloat32Array
                | VariantType::PackedFloat64Array
                | VariantType::PackedStringArray
                | VariantType::PackedVector2Array
                | VariantType::PackedVector3Array
                | VariantType::PackedColorArray
        )
    }

    /// Name used by the engine's API description.
    pub const fn name(self) -> &'static str {
        match self {
            VariantType::Nil => "Nil",
            VariantType::Bool => "bool",
            VariantType::Int => "int",
            VariantType::Float => "float",
            VariantType::String => "String",
            VariantType::Vector2 => "Vector2",
            VariantType::Vector2i => "Vector2i",
            VariantType::Rect2 => "Rect2",
            VariantType::Rect2i => "Rect2i",
            VariantType::Vector3 => "Vector3",
            VariantType::Vector3i => "Vector3i",
            VariantType::Transform2D => "Transform2D",
            VariantType::Vector4 => "Vector4",
            VariantType::Vector4i => "Vector4i",
            VariantType::Plane => "Plane",
            VariantType::Quaternion => "Quaternion",
            VariantType::Aabb => "AABB",
            VariantType::Basis => "Basis",
            VariantType::Transform3D => "Transform3D",
            VariantType::Projection => "Projection",
            VariantType::Color => "Color",
            VariantType::StringName => "StringName",
            VariantType::NodePath => "NodePath",
            VariantType::Rid => "RID",
            VariantType::Object => "Object",
            VariantType::Callable => "Callable",
            VariantType::Signal => "Signal",
            VariantType::Dictionary => "Dictionary",
            VariantType::Array => "Array",
            VariantType::PackedByteArray => "PackedByteArray",
            VariantType::PackedInt32Array => "PackedInt32Array",
            VariantType::PackedInt64Array => "PackedInt64Array",
            VariantType::PackedFloat32Array => "PackedFloat32Array",
            VariantType::PackedFloat64Array => "PackedFloat64Array",
            VariantType::PackedStringArray => "PackedStringArray",
            VariantType::PackedVector2Array => "PackedVector2Array",
            VariantType::PackedVector3Array => "PackedVector3Array",
            VariantType::PackedColorArray => "PackedColorArray",
        }
    }
}

/// Operators understood by the engine's operator evaluators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum VariantOperator {
    Equal = 0,
    NotEqual = 1,
    Less = 2,
    LessEqual = 3,
    Greater = 4,
    GreaterEqual = 5,
    Add = 6,
    Subtract = 7,
    Multiply = 8,
    Divide = 9,
    Negate = 10,
    Positive = 11,
    Module = 12,
    Power = 13,
    ShiftLeft = 14,
    ShiftRight = 15,
    BitAnd = 16,
    BitOr = 17,
    BitXor = 18,
    BitNegate = 19,
    And = 20,
    Or = 21,
    Xor = 22,
    Not = 23,
    In = 24,
}

/// Outcome reported by the engine for variant calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum CallErrorType {
    Ok = 0,
    InvalidMethod = 1,
    InvalidArgument = 2,
    TooManyArguments = 3,
    TooFewArguments = 4,
    InstanceIsNull = 5,
    MethodNotConst = 6,
}

/// Initialization stages the engine walks through when loading a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum InitializationLevel {
    Core = 0,
    Servers = 1,
    Scene = 2,
    Editor = 3,
}

bitflags! {
    /// Flags of a method exported to the engine (`ClassMethodInfo::method_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u32 {
        const NORMAL = 1;
        const EDITOR = 1 << 1;
        const CONST = 1 << 2;
        const VIRTUAL = 1 << 3;
        const VARARG = 1 << 4;
        const STATIC = 1 << 5;
    }
}

bitflags! {
    /// Where a property shows up (`PropertyInfo::usage`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyUsage: u32 {
        const STORAGE = 1 << 1;
        const EDITOR = 1 << 2;
        const INTERNAL = 1 << 3;
        const DEFAULT = Self::STORAGE.bits() | Self::EDITOR.bits();
    }
}
