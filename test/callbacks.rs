//! Integration Tests for Callbacks
//!
//! Native code calling back into Rust closures:
//! - qsort with dynamic and typed comparators
//! - A callback entered from a thread the native library created
//! - Stack-passed callback arguments
//! - Concurrent dispatch of one callback

use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use freecall::ffi::{
    bind, register_callback, unregister_callback, Arg, BufferMut, CallSignature, CallStub,
    CallbackTable, Function, LibraryHandle, Loader, ParamKind, ReturnKind, SymbolAddress, Value,
};

fn qsort_stub() -> CallStub {
    let signature = CallSignature::new(
        vec![
            ParamKind::Buffer,
            ParamKind::U64,
            ParamKind::U64,
            ParamKind::Pointer,
        ],
        ReturnKind::Void,
    );
    let address = Loader::global()
        .resolve(LibraryHandle::PROCESS, "qsort")
        .unwrap();
    unsafe { CallStub::compile(signature, address) }.unwrap()
}

// =============================================================================
// qsort
// =============================================================================

#[test]
fn test_qsort_with_dynamic_comparator() {
    let original = [88i64, 56, 100, 2, 25];
    let mut data = original;
    let base = data.as_ptr() as usize;

    let compare = CallSignature::new(vec![ParamKind::Pointer, ParamKind::Pointer], ReturnKind::I32);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cmp = CallbackTable::global()
        .register(compare, move |args| {
            let pa = args[0].as_pointer().unwrap();
            let pb = args[1].as_pointer().unwrap();
            let a = unsafe { *(pa as *const i64) };
            let b = unsafe { *(pb as *const i64) };
            sink.lock().push((pa, pb, a, b));
            Value::I32(a.cmp(&b) as i32)
        })
        .unwrap();

    qsort_stub()
        .call(&[
            Arg::buffer_mut(&mut data),
            Arg::U64(5),
            Arg::U64(8),
            Arg::Pointer(cmp.as_ptr()),
        ])
        .unwrap();
    unregister_callback(cmp).unwrap();

    assert_eq!(data, [2, 25, 56, 88, 100]);

    // every comparison received two elements of the array, unmodified
    let seen = seen.lock();
    assert!(!seen.is_empty());
    let end = base + original.len() * 8;
    for &(pa, pb, a, b) in seen.iter() {
        for p in [pa, pb] {
            assert!((base..end).contains(&p), "{p:#x} outside the array");
            assert_eq!((p - base) % 8, 0, "{p:#x} not on an element boundary");
        }
        assert!(original.contains(&a));
        assert!(original.contains(&b));
    }
}

#[test]
fn test_qsort_with_typed_comparator() {
    let qsort = unsafe {
        bind::<fn(BufferMut<i64>, usize, usize, *const c_void)>(
            Loader::global(),
            LibraryHandle::PROCESS,
            "qsort",
        )
    }
    .unwrap();

    // descending
    let cmp = register_callback(|a: *const i64, b: *const i64| -> i32 {
        unsafe { (*b).cmp(&*a) as i32 }
    })
    .unwrap();

    let mut data = [88i64, 56, 100, 2, 25];
    qsort.call(&mut data, 5, 8, cmp.as_ptr());
    assert_eq!(data, [100, 88, 56, 25, 2]);

    assert_eq!(
        CallbackTable::global().signature(cmp),
        Some(CallSignature::new(
            vec![ParamKind::Pointer, ParamKind::Pointer],
            ReturnKind::I32
        ))
    );
    unregister_callback(cmp).unwrap();
    assert!(CallbackTable::global().signature(cmp).is_none());
}

// =============================================================================
// Foreign threads
// =============================================================================

#[test]
fn test_callback_from_native_thread() {
    let seen = Arc::new(AtomicU64::new(0));
    let sink = Arc::clone(&seen);
    let start = register_callback(move |arg: *mut c_void| -> *mut c_void {
        sink.store(arg as usize as u64, Ordering::SeqCst);
        arg
    })
    .unwrap();

    let pthread_create = unsafe {
        bind::<fn(*mut libc::pthread_t, *const c_void, *const c_void, *mut c_void) -> i32>(
            Loader::global(),
            LibraryHandle::PROCESS,
            "pthread_create",
        )
    }
    .unwrap();
    let pthread_join = unsafe {
        bind::<fn(u64, *mut *mut c_void) -> i32>(
            Loader::global(),
            LibraryHandle::PROCESS,
            "pthread_join",
        )
    }
    .unwrap();

    let mut thread: libc::pthread_t = unsafe { std::mem::zeroed() };
    let token = 0x5eed_usize as *mut c_void;
    assert_eq!(
        pthread_create.call(
            &mut thread as *mut libc::pthread_t,
            std::ptr::null(),
            start.as_ptr(),
            token,
        ),
        0
    );

    let mut result: *mut c_void = std::ptr::null_mut();
    assert_eq!(pthread_join.call(thread as usize as u64, &mut result as *mut *mut c_void), 0);

    assert_eq!(seen.load(Ordering::SeqCst), 0x5eed);
    assert_eq!(result, token);
    unregister_callback(start).unwrap();
}

// =============================================================================
// Argument passing
// =============================================================================

#[test]
fn test_nine_integer_callback() {
    type Nine = fn(i64, i64, i64, i64, i64, i64, i64, i64, i64) -> i64;
    let sum = register_callback(
        |a: i64, b: i64, c: i64, d: i64, e: i64, f: i64, g: i64, h: i64, i: i64| -> i64 {
            // weights expose any swapped or dropped argument
            a + 2 * b + 3 * c + 4 * d + 5 * e + 6 * f + 7 * g + 8 * h + 9 * i
        },
    )
    .unwrap();

    let f = unsafe { Function::<Nine>::from_address(SymbolAddress::new(sum.as_usize())) }.unwrap();
    assert_eq!(f.call(1, 1, 1, 1, 1, 1, 1, 1, 1), 45);
    assert_eq!(f.call(0, 0, 0, 0, 0, 0, 0, 0, 1), 9);
    unregister_callback(sum).unwrap();
}

#[test]
fn test_mixed_callback_through_dynamic_stub() {
    let signature = CallSignature::new(
        vec![ParamKind::U8, ParamKind::F32, ParamKind::I16, ParamKind::F64],
        ReturnKind::F64,
    );
    let addr = CallbackTable::global()
        .register(signature.clone(), |args| {
            let total: f64 = args
                .iter()
                .map(|v| v.as_f64().unwrap_or_else(|| v.as_i64().unwrap() as f64))
                .sum();
            Value::F64(total)
        })
        .unwrap();

    let stub = unsafe { CallStub::compile(signature, SymbolAddress::new(addr.as_usize())) }.unwrap();
    assert_eq!(
        stub.call(&[Arg::U8(200), Arg::F32(0.5), Arg::I16(-300), Arg::F64(0.25)])
            .unwrap(),
        Value::F64(-99.25)
    );
    unregister_callback(addr).unwrap();
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_dispatch() {
    let hits = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&hits);
    let addr = register_callback(move |x: i32| -> i32 {
        counter.fetch_add(1, Ordering::Relaxed);
        x * 2
    })
    .unwrap();
    let double =
        unsafe { Function::<fn(i32) -> i32>::from_address(SymbolAddress::new(addr.as_usize())) }
            .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let double = double.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let x = t * 500 + i;
                    assert_eq!(double.call(x), x * 2);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(hits.load(Ordering::Relaxed), 4000);
    unregister_callback(addr).unwrap();
}
