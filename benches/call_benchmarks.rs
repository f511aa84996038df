//! Call path benchmarks against the mock engine.
//!
//! ```bash
//! cargo bench --bench call_benchmarks
//! cargo bench --features profiling -- ptrcall
//! ```

use criterion::{Criterion, criterion_group, criterion_main};
use gdbridge::prelude::*;
use gdbridge::{CallFrame, method};
use std::hint::black_box;
use std::sync::Once;

engine_class!(pub struct Echo: RefCounted, refcounted);

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        let config = BridgeConfig::default().with_logging(false);
        unsafe {
            gdbridge::init::initialize(
                gdbridge_mock::get_proc_address,
                gdbridge_mock::library(),
                config,
            )
        }
        .expect("mock engine rejected the bridge");
    });
}

fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    group.bench_function("acquire_release", |b| {
        b.iter(|| black_box(CallFrame::acquire()));
    });

    group.bench_function("push_four_pods", |b| {
        b.iter(|| {
            let mut frame = CallFrame::acquire();
            frame.push_pod(black_box(&true));
            frame.push_pod(black_box(&42i64));
            frame.push_pod(black_box(&1.5f64));
            frame.push_pod(black_box(&Vector3::new(1.0, 2.0, 3.0)));
            black_box(frame.arg_count())
        });
    });

    group.finish();
}

fn bench_calls(c: &mut Criterion) {
    init();
    let echo = Gd::<Echo>::construct().expect("construct Echo");
    let identity = method::bind(
        "Echo",
        "identity_int",
        method::signature_hash("identity_int", &["int"], Some("int")),
    )
    .expect("bind identity_int");
    let sum = method::bind_static(
        "Echo",
        "static_sum",
        method::signature_hash("static_sum", &["int", "int"], Some("int")),
    )
    .expect("bind static_sum");

    let mut group = c.benchmark_group("call");

    group.bench_function("ptrcall_identity_int", |b| {
        b.iter(|| {
            let value: i64 = echo.call(&identity, &[black_box(&7i64)]).unwrap();
            black_box(value)
        });
    });

    group.bench_function("ptrcall_static_sum", |b| {
        b.iter(|| {
            let value: i64 = method::call(&sum, None, &[&2i64, black_box(&5i64)]).unwrap();
            black_box(value)
        });
    });

    group.bench_function("varcall_static_sum", |b| {
        let args = [
            Variant::from_value(&2i64).unwrap(),
            Variant::from_value(&5i64).unwrap(),
        ];
        b.iter(|| black_box(method::call_variant(&sum, None, black_box(&args)).unwrap()));
    });

    group.bench_function("registry_cycle_idle", |b| {
        b.iter(|| black_box(gdbridge::pointers::cycle()));
    });

    group.finish();
}

criterion_group!(benches, bench_frames, bench_calls);
criterion_main!(benches);
