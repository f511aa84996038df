//! Native classes of the mock engine and their methods.

use crate::classdb::{ClassDef, MethodDef, Param};
use crate::object::{self, ObjData, ObjRef};
use crate::value::{Cell, CellBox, Var, destroy_typed, var_from_typed, var_to_typed};
use gdbridge_sys as sys;
use gdbridge_sys::VariantType;
use std::ffi::c_void;

/// Signature hashes the engine reports for the `RefCounted` lifetime methods.
const REFCOUNT_HASH: i64 = 2240911060;
const REFERENCE_COUNT_HASH: i64 = 3905245786;

/// Per-object data of a native class.
#[derive(Debug, Default)]
pub(crate) enum State {
    #[default]
    Empty,
    Gradient(Vec<(f32, [f32; 4])>),
    HeightMap {
        width: i64,
        depth: i64,
        data: Vec<f32>,
    },
    Node {
        name: String,
    },
    Holder(Vec<ObjRef>),
}

pub(crate) fn initial_state(class: &str) -> State {
    match class {
        "Gradient" => State::Gradient(Vec::new()),
        "HeightMapShape3D" => State::HeightMap {
            width: 2,
            depth: 2,
            data: vec![0.0; 4],
        },
        "Node" => State::Node { name: String::new() },
        "Holder" => State::Holder(Vec::new()),
        _ => State::Empty,
    }
}

pub(crate) type NativeFn = fn(&NativeCall<'_>);

/// One call of a native method over typed argument slots.
pub(crate) struct NativeCall<'a> {
    def: &'a MethodDef,
    this: Option<&'a ObjData>,
    args: &'a [sys::ConstTypePtr],
    ret: sys::TypePtr,
}

impl<'a> NativeCall<'a> {
    /// # Safety
    /// `args` must hold one initialized slot per parameter of `def`, and
    /// `ret` must be null or an initialized slot of its return kind.
    pub(crate) unsafe fn new(
        def: &'a MethodDef,
        this: Option<&'a ObjData>,
        args: &'a [sys::ConstTypePtr],
        ret: sys::TypePtr,
    ) -> Self {
        Self { def, this, args, ret }
    }

    /// Copy of argument `index`. Objects gain an engine reference.
    fn arg(&self, index: usize) -> Var {
        let (Some(param), Some(&slot)) = (self.def.params.get(index), self.args.get(index)) else {
            return Var::Nil;
        };
        match param {
            Param::Value(ty) => unsafe { var_from_typed(*ty, slot) },
            Param::Object(_) => {
                let ptr = unsafe { slot.cast::<sys::ObjectPtr>().read_unaligned() };
                if ptr.is_null() { Var::Nil } else { Var::Object(ObjRef::acquire(ptr)) }
            }
            Param::Variant => unsafe { (*slot.cast::<Var>()).clone() },
        }
    }

    /// Raw pointer of object argument `index`.
    fn arg_object(&self, index: usize) -> sys::ObjectPtr {
        match self.args.get(index) {
            Some(slot) => unsafe { slot.cast::<sys::ObjectPtr>().read_unaligned() },
            None => std::ptr::null_mut(),
        }
    }

    fn arg_int(&self, index: usize) -> i64 {
        self.arg(index).as_int().unwrap_or_default()
    }

    fn arg_float(&self, index: usize) -> f64 {
        self.arg(index).as_float().unwrap_or_default()
    }

    /// Replace the caller's return value. Returned objects carry a
    /// reference for the caller.
    fn set_ret(&self, value: Var) {
        if self.ret.is_null() {
            return;
        }
        match &self.def.ret {
            Some(Param::Value(ty)) => unsafe {
                destroy_typed(*ty, self.ret);
                var_to_typed(*ty, &value, self.ret);
            },
            Some(Param::Object(_)) => {
                let ptr = match value {
                    Var::Object(object) => object.into_ptr(),
                    _ => std::ptr::null_mut(),
                };
                let old = unsafe { self.ret.cast::<sys::ObjectPtr>().replace(ptr) };
                if !old.is_null() {
                    object::release(old);
                }
            }
            Some(Param::Variant) => unsafe { *self.ret.cast::<Var>() = value },
            None => {}
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> Option<R> {
        self.this.map(|this| f(&mut this.state.lock()))
    }
}

fn pod<T: Copy>(value: &Var) -> Option<T> {
    match value {
        Var::Boxed(cell) => match &**cell {
            Cell::Pod(_, bytes) if bytes.len() == size_of::<T>() => {
                Some(unsafe { bytes.as_ptr().cast::<T>().read_unaligned() })
            }
            _ => None,
        },
        _ => None,
    }
}

// ========== Object / RefCounted ==========

fn get_class(call: &NativeCall<'_>) {
    if let Some(this) = call.this {
        call.set_ret(Var::string(&this.class()));
    }
}

fn init_ref(call: &NativeCall<'_>) {
    let done = call.this.is_some_and(object::init_ref);
    call.set_ret(Var::Bool(done));
}

fn reference(call: &NativeCall<'_>) {
    let done = call.this.is_some_and(object::reference);
    call.set_ret(Var::Bool(done));
}

fn unreference(call: &NativeCall<'_>) {
    let last = call.this.is_some_and(object::unreference);
    call.set_ret(Var::Bool(last));
}

fn get_reference_count(call: &NativeCall<'_>) {
    let count = call.this.map_or(0, ObjData::refcount);
    call.set_ret(Var::Int(count));
}

// ========== Gradient ==========

fn gradient_add_point(call: &NativeCall<'_>) {
    let offset = call.arg_float(0) as f32;
    let color = pod::<[f32; 4]>(&call.arg(1)).unwrap_or([0.0, 0.0, 0.0, 1.0]);
    call.with_state(|state| {
        if let State::Gradient(points) = state {
            points.push((offset, color));
            points.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
    });
}

fn gradient_get_point_count(call: &NativeCall<'_>) {
    let count = call
        .with_state(|state| match state {
            State::Gradient(points) => points.len() as i64,
            _ => 0,
        })
        .unwrap_or(0);
    call.set_ret(Var::Int(count));
}

pub(crate) fn sample(points: &[(f32, [f32; 4])], offset: f32) -> [f32; 4] {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return [0.0, 0.0, 0.0, 1.0];
    };
    if offset <= first.0 {
        return first.1;
    }
    if offset >= last.0 {
        return last.1;
    }
    for pair in points.windows(2) {
        let ((from, a), (to, b)) = (pair[0], pair[1]);
        if offset <= to {
            let span = to - from;
            let t = if span > 0.0 { (offset - from) / span } else { 1.0 };
            return std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t);
        }
    }
    last.1
}

fn gradient_sample(call: &NativeCall<'_>) {
    let offset = call.arg_float(0) as f32;
    let color = call
        .with_state(|state| match state {
            State::Gradient(points) => sample(points, offset),
            _ => [0.0, 0.0, 0.0, 1.0],
        })
        .unwrap_or([0.0, 0.0, 0.0, 1.0]);
    call.set_ret(Var::pod(VariantType::Color, &color));
}

// ========== HeightMapShape3D ==========

fn heightmap_resize(call: &NativeCall<'_>, width_axis: bool) {
    let value = call.arg_int(0);
    if value < 1 {
        crate::report_error(format!("heightmap size must be positive, got {value}"));
        return;
    }
    call.with_state(|state| {
        if let State::HeightMap { width, depth, data } = state {
            if width_axis {
                *width = value;
            } else {
                *depth = value;
            }
            data.clear();
            data.resize((*width * *depth) as usize, 0.0);
        }
    });
}

fn heightmap_set_map_width(call: &NativeCall<'_>) {
    heightmap_resize(call, true);
}

fn heightmap_set_map_depth(call: &NativeCall<'_>) {
    heightmap_resize(call, false);
}

fn heightmap_get_map_width(call: &NativeCall<'_>) {
    let width = call
        .with_state(|state| match state {
            State::HeightMap { width, .. } => *width,
            _ => 0,
        })
        .unwrap_or(0);
    call.set_ret(Var::Int(width));
}

fn heightmap_get_map_depth(call: &NativeCall<'_>) {
    let depth = call
        .with_state(|state| match state {
            State::HeightMap { depth, .. } => *depth,
            _ => 0,
        })
        .unwrap_or(0);
    call.set_ret(Var::Int(depth));
}

fn heightmap_set_map_data(call: &NativeCall<'_>) {
    let values = match call.arg(0) {
        Var::Boxed(cell) => match &*cell {
            Cell::Packed(packed) => packed.to_f32s(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    let accepted = call.with_state(|state| match state {
        State::HeightMap { width, depth, data } if values.len() as i64 == *width * *depth => {
            *data = values.clone();
            true
        }
        _ => false,
    });
    if accepted != Some(true) {
        crate::report_error(format!("heightmap data of {} values does not match the map size", values.len()));
    }
}

fn heightmap_get_map_data(call: &NativeCall<'_>) {
    let data = call
        .with_state(|state| match state {
            State::HeightMap { data, .. } => data.clone(),
            _ => Vec::new(),
        })
        .unwrap_or_default();
    call.set_ret(Var::packed(VariantType::PackedFloat32Array, &data));
}

fn heightmap_extreme(call: &NativeCall<'_>, max: bool) {
    let value = call
        .with_state(|state| match state {
            State::HeightMap { data, .. } => data
                .iter()
                .copied()
                .reduce(if max { f32::max } else { f32::min })
                .unwrap_or(0.0),
            _ => 0.0,
        })
        .unwrap_or(0.0);
    call.set_ret(Var::Float(f64::from(value)));
}

fn heightmap_get_min_height(call: &NativeCall<'_>) {
    heightmap_extreme(call, false);
}

fn heightmap_get_max_height(call: &NativeCall<'_>) {
    heightmap_extreme(call, true);
}

// ========== Translation ==========

/// Defers to an extension's `_get_message` when it provides one.
fn translation_get_message(call: &NativeCall<'_>) {
    if let Some(extension) = call.this.and_then(ObjData::extension) {
        let info = extension.class.0;
        if let (Some(resolve), Some(call_virtual)) =
            (info.get_virtual_call_data_func, info.call_virtual_with_data_func)
        {
            let name = Some(CellBox::new(Cell::StringName("_get_message".to_owned())));
            let name_ptr: sys::ConstStringNamePtr = (&raw const name).cast();
            let data = unsafe { resolve(info.class_userdata, name_ptr) };
            if !data.is_null() {
                unsafe {
                    call_virtual(
                        extension.instance as sys::ClassInstancePtr,
                        name_ptr,
                        data,
                        call.args.as_ptr(),
                        call.args.len() as sys::Int,
                        call.ret,
                    )
                };
                return;
            }
        }
    }
    call.set_ret(call.arg(0));
}

// ========== Node ==========

fn node_set_name(call: &NativeCall<'_>) {
    let name = call.arg(0).as_text().unwrap_or_default().to_owned();
    call.with_state(|state| *state = State::Node { name });
}

fn node_get_name(call: &NativeCall<'_>) {
    let name = call
        .with_state(|state| match state {
            State::Node { name } => name.clone(),
            _ => String::new(),
        })
        .unwrap_or_default();
    call.set_ret(Var::string(&name));
}

// ========== Holder ==========

fn holder_hold(call: &NativeCall<'_>) {
    let ptr = call.arg_object(0);
    if ptr.is_null() {
        return;
    }
    // The caller's reference is kept.
    let held = ObjRef::adopt(ptr);
    call.with_state(|state| {
        if let State::Holder(items) = state {
            items.push(held);
        }
    });
}

fn holder_release_all(call: &NativeCall<'_>) {
    let released = call.with_state(|state| match state {
        State::Holder(items) => std::mem::take(items),
        _ => Vec::new(),
    });
    drop(released);
}

fn holder_held_count(call: &NativeCall<'_>) {
    let count = call
        .with_state(|state| match state {
            State::Holder(items) => items.len() as i64,
            _ => 0,
        })
        .unwrap_or(0);
    call.set_ret(Var::Int(count));
}

// ========== Echo ==========

fn echo_identity(call: &NativeCall<'_>) {
    call.set_ret(call.arg(0));
}

fn echo_identity_object(call: &NativeCall<'_>) {
    let ptr = call.arg_object(0);
    let value = if ptr.is_null() { Var::Nil } else { Var::Object(ObjRef::adopt(ptr)) };
    call.set_ret(value);
}

fn echo_static_sum(call: &NativeCall<'_>) {
    call.set_ret(Var::Int(call.arg_int(0).wrapping_add(call.arg_int(1))));
}

fn echo_callable_text(call: &NativeCall<'_>) {
    let callable = call.arg(0);
    let text = match &callable {
        Var::Boxed(cell) => match &**cell {
            Cell::Callable(Some(custom)) => custom.text("unrendered"),
            _ => None,
        },
        _ => None,
    };
    call.set_ret(Var::string(text.as_deref().unwrap_or("")));
}

fn echo_invoke_callable(call: &NativeCall<'_>) {
    let callable = call.arg(0);
    let argument = call.arg(1);
    let mut result = Var::Nil;
    if let Var::Boxed(cell) = &callable {
        if let Cell::Callable(Some(custom)) = &**cell {
            let args = [(&raw const argument).cast::<c_void>()];
            let mut error = sys::CallError::default();
            unsafe { custom.call(args.as_ptr(), 1, (&raw mut result).cast(), &raw mut error) };
            if error.error != 0 {
                crate::report_error(format!("callable failed with error {}", error.error));
                result = Var::Nil;
            }
        }
    }
    call.set_ret(result);
}

fn echo_packed_len(call: &NativeCall<'_>) {
    let len = match call.arg(0) {
        Var::Boxed(cell) => match &*cell {
            Cell::Packed(packed) => packed.len() as i64,
            _ => 0,
        },
        _ => 0,
    };
    call.set_ret(Var::Int(len));
}

fn value(ty: VariantType) -> Param {
    Param::Value(ty)
}

fn object_param() -> Param {
    Param::Object("Object".to_owned())
}

fn echo_class() -> ClassDef {
    let mut class = ClassDef::native("Echo", Some("RefCounted"), true);
    for ty in VariantType::ALL {
        if matches!(ty, VariantType::Nil | VariantType::Object) {
            continue;
        }
        let name = format!("identity_{}", ty.name());
        class = class.method(MethodDef::native("Echo", &name, vec![value(ty)], Some(value(ty)), echo_identity));
    }
    class
        .method(
            MethodDef::native("Echo", "identity_Object", vec![object_param()], Some(object_param()), echo_identity_object)
                .adopting(),
        )
        .method(MethodDef::native(
            "Echo",
            "identity_Variant",
            vec![Param::Variant],
            Some(Param::Variant),
            echo_identity,
        ))
        .method(
            MethodDef::native(
                "Echo",
                "static_sum",
                vec![value(VariantType::Int), value(VariantType::Int)],
                Some(value(VariantType::Int)),
                echo_static_sum,
            )
            .into_static(),
        )
        .method(MethodDef::native(
            "Echo",
            "callable_text",
            vec![value(VariantType::Callable)],
            Some(value(VariantType::String)),
            echo_callable_text,
        ))
        .method(MethodDef::native(
            "Echo",
            "invoke_callable",
            vec![value(VariantType::Callable), Param::Variant],
            Some(Param::Variant),
            echo_invoke_callable,
        ))
        .method(MethodDef::native(
            "Echo",
            "packed_len",
            vec![value(VariantType::PackedFloat32Array)],
            Some(value(VariantType::Int)),
            echo_packed_len,
        ))
}

/// Every native class, root first.
pub(crate) fn native_classes() -> Vec<ClassDef> {
    let int = || Some(value(VariantType::Int));
    let float = || Some(value(VariantType::Float));
    let boolean = || Some(value(VariantType::Bool));

    vec![
        ClassDef::native("Object", None, false).method(MethodDef::native(
            "Object",
            "get_class",
            vec![],
            Some(value(VariantType::String)),
            get_class,
        )),
        ClassDef::native("RefCounted", Some("Object"), true)
            .method(MethodDef::native("RefCounted", "init_ref", vec![], boolean(), init_ref).with_hash(REFCOUNT_HASH))
            .method(MethodDef::native("RefCounted", "reference", vec![], boolean(), reference).with_hash(REFCOUNT_HASH))
            .method(
                MethodDef::native("RefCounted", "unreference", vec![], boolean(), unreference)
                    .with_hash(REFCOUNT_HASH),
            )
            .method(
                MethodDef::native("RefCounted", "get_reference_count", vec![], int(), get_reference_count)
                    .with_hash(REFERENCE_COUNT_HASH),
            ),
        ClassDef::native("Resource", Some("RefCounted"), true),
        ClassDef::native("Gradient", Some("Resource"), true)
            .method(MethodDef::native(
                "Gradient",
                "add_point",
                vec![value(VariantType::Float), value(VariantType::Color)],
                None,
                gradient_add_point,
            ))
            .method(MethodDef::native("Gradient", "get_point_count", vec![], int(), gradient_get_point_count))
            .method(MethodDef::native(
                "Gradient",
                "sample",
                vec![value(VariantType::Float)],
                Some(value(VariantType::Color)),
                gradient_sample,
            )),
        ClassDef::native("HeightMapShape3D", Some("Resource"), true)
            .method(MethodDef::native(
                "HeightMapShape3D",
                "set_map_width",
                vec![value(VariantType::Int)],
                None,
                heightmap_set_map_width,
            ))
            .method(MethodDef::native("HeightMapShape3D", "get_map_width", vec![], int(), heightmap_get_map_width))
            .method(MethodDef::native(
                "HeightMapShape3D",
                "set_map_depth",
                vec![value(VariantType::Int)],
                None,
                heightmap_set_map_depth,
            ))
            .method(MethodDef::native("HeightMapShape3D", "get_map_depth", vec![], int(), heightmap_get_map_depth))
            .method(MethodDef::native(
                "HeightMapShape3D",
                "set_map_data",
                vec![value(VariantType::PackedFloat32Array)],
                None,
                heightmap_set_map_data,
            ))
            .method(MethodDef::native(
                "HeightMapShape3D",
                "get_map_data",
                vec![],
                Some(value(VariantType::PackedFloat32Array)),
                heightmap_get_map_data,
            ))
            .method(MethodDef::native("HeightMapShape3D", "get_min_height", vec![], float(), heightmap_get_min_height))
            .method(MethodDef::native("HeightMapShape3D", "get_max_height", vec![], float(), heightmap_get_max_height)),
        ClassDef::native("Translation", Some("Resource"), true).method(MethodDef::native(
            "Translation",
            "get_message",
            vec![value(VariantType::StringName), value(VariantType::StringName)],
            Some(value(VariantType::StringName)),
            translation_get_message,
        )),
        ClassDef::native("Node", Some("Object"), false)
            .method(MethodDef::native(
                "Node",
                "set_name",
                vec![value(VariantType::String)],
                None,
                node_set_name,
            ))
            .method(MethodDef::native(
                "Node",
                "get_name",
                vec![],
                Some(value(VariantType::String)),
                node_get_name,
            )),
        ClassDef::native("Holder", Some("RefCounted"), true)
            .method(MethodDef::native("Holder", "hold", vec![object_param()], None, holder_hold).adopting())
            .method(MethodDef::native("Holder", "release_all", vec![], None, holder_release_all))
            .method(MethodDef::native("Holder", "held_count", vec![], int(), holder_held_count)),
        echo_class(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_interpolates_and_clamps() {
        let points = [(0.0, [0.0, 0.0, 0.0, 1.0]), (1.0, [1.0, 0.5, 0.0, 1.0])];
        assert_eq!(sample(&points, 0.5), [0.5, 0.25, 0.0, 1.0]);
        assert_eq!(sample(&points, -1.0), points[0].1);
        assert_eq!(sample(&points, 2.0), points[1].1);
        assert_eq!(sample(&[], 0.3), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_initial_heightmap() {
        match initial_state("HeightMapShape3D") {
            State::HeightMap { width, depth, data } => {
                assert_eq!((width, depth), (2, 2));
                assert_eq!(data.len(), 4);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }
}
