//! Benchmarks for forward calls and callback round trips

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use freecall::ffi::{
    bind, register_callback, unregister_callback, Arg, CallSignature, CallStub, Function,
    LibraryHandle, Loader, ParamKind, ReturnKind, SymbolAddress, Text,
};

extern "C" fn add3(a: i64, b: i64, c: i64) -> i64 {
    a.wrapping_add(b).wrapping_add(c)
}

/// Direct call against the same function through a stub and a typed binding
fn bench_forward_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_call");

    let direct: extern "C" fn(i64, i64, i64) -> i64 = black_box(add3);
    group.bench_function("direct", |b| {
        b.iter(|| direct(black_box(1), black_box(2), black_box(3)))
    });

    let stub = unsafe {
        CallStub::compile(
            CallSignature::new(
                vec![ParamKind::I64, ParamKind::I64, ParamKind::I64],
                ReturnKind::I64,
            ),
            SymbolAddress::of(add3 as *const ()),
        )
    }
    .unwrap();
    group.bench_function("dynamic_stub", |b| {
        b.iter(|| {
            stub.call(&[
                Arg::I64(black_box(1)),
                Arg::I64(black_box(2)),
                Arg::I64(black_box(3)),
            ])
        })
    });

    let typed = unsafe {
        Function::<fn(i64, i64, i64) -> i64>::from_address(SymbolAddress::of(add3 as *const ()))
    }
    .unwrap();
    group.bench_function("typed", |b| {
        b.iter(|| typed.call(black_box(1), black_box(2), black_box(3)))
    });

    group.finish();
}

/// Text arguments pay for a terminated copy per call
fn bench_text_argument(c: &mut Criterion) {
    let strlen = unsafe {
        bind::<fn(Text) -> usize>(Loader::global(), LibraryHandle::PROCESS, "strlen")
    }
    .unwrap();

    c.bench_function("strlen_text", |b| {
        b.iter(|| strlen.call(black_box("the quick brown fox")))
    });
}

/// Rust -> trampoline -> closure -> Rust
fn bench_callback_round_trip(c: &mut Criterion) {
    let address = register_callback(|a: i64, b: i64| -> i64 { a ^ b }).unwrap();
    let callback = unsafe {
        Function::<fn(i64, i64) -> i64>::from_address(SymbolAddress::new(address.as_usize()))
    }
    .unwrap();

    c.bench_function("callback_round_trip", |b| {
        b.iter(|| callback.call(black_box(0x55), black_box(0xff)))
    });

    unregister_callback(address).unwrap();
}

criterion_group!(
    benches,
    bench_forward_call,
    bench_text_argument,
    bench_callback_round_trip
);
criterion_main!(benches);
