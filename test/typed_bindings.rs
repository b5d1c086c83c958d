//! Integration Tests for Typed Bindings
//!
//! Binding C library functions to Rust fn-pointer shapes.

use std::ffi::{c_void, CString};
use std::thread;

use freecall::ffi::{
    bind, Buffer, BufferMut, ByValue, CText, FfiError, Function, LibraryHandle, Loader, Text,
};

#[repr(C)]
#[allow(dead_code)]
#[derive(Clone, Copy)]
struct DivResult {
    quot: i32,
    rem: i32,
}

fn bind_process<F: freecall::ffi::Shape>(name: &str) -> Function<F> {
    unsafe { bind::<F>(Loader::global(), LibraryHandle::PROCESS, name) }.unwrap()
}

#[test]
fn test_strlen_with_text_and_ctext() {
    let strlen: Function<fn(Text) -> usize> = bind_process("strlen");
    assert_eq!(strlen.call("hello"), 5);
    assert_eq!(strlen.call(""), 0);

    let strlen_c: Function<fn(CText) -> usize> = bind_process("strlen");
    assert_eq!(strlen_c.call(c"terminated"), 10);
    assert_eq!(strlen.address(), strlen_c.address());
}

#[test]
fn test_text_is_truncated_at_interior_nul() {
    // the copy handed to C ends at the first NUL, like any C string
    let strlen: Function<fn(Text) -> usize> = bind_process("strlen");
    assert_eq!(strlen.call("ab\0cd"), 2);
}

#[test]
fn test_buffers() {
    let memset: Function<fn(BufferMut<u8>, i32, usize) -> *mut c_void> = bind_process("memset");
    let mut bytes = [0u8; 16];
    let returned = memset.call(&mut bytes, 0x5a, 8);
    assert_eq!(returned, bytes.as_mut_ptr().cast::<c_void>());
    assert_eq!(&bytes[..8], &[0x5a; 8]);
    assert_eq!(&bytes[8..], &[0; 8]);

    let memcmp: Function<fn(Buffer<u8>, Buffer<u8>, usize) -> i32> = bind_process("memcmp");
    assert_eq!(memcmp.call(b"abcd", b"abcd", 4), 0);
    assert!(memcmp.call(b"abcd", b"abce", 4) < 0);
}

#[test]
fn test_text_return() {
    let getenv: Function<fn(Text) -> Text> = bind_process("getenv");
    std::env::set_var("FREECALL_TYPED_TEST", "value");
    assert_eq!(
        getenv.call("FREECALL_TYPED_TEST"),
        Some(CString::new("value").unwrap())
    );
    assert_eq!(getenv.call("FREECALL_TYPED_TEST_UNSET"), None);
}

#[test]
fn test_text_return_pointing_into_argument() {
    let strchr: Function<fn(Text, i32) -> Text> = bind_process("strchr");
    assert_eq!(
        strchr.call("hello world, again", b'w' as i32),
        Some(CString::new("world, again").unwrap())
    );
    assert_eq!(strchr.call("hello", b'z' as i32), None);

    let strstr: Function<fn(Text, Text) -> Text> = bind_process("strstr");
    assert_eq!(
        strstr.call("needle in a haystack", "hay"),
        Some(CString::new("haystack").unwrap())
    );
}

#[test]
fn test_by_value_struct_is_rejected() {
    let result = unsafe {
        bind::<fn(i32, i32) -> ByValue<DivResult>>(Loader::global(), LibraryHandle::PROCESS, "div")
    };
    match result {
        Err(FfiError::UnsupportedSignature { kind, .. }) => assert!(kind.starts_with("struct")),
        other => panic!("expected UnsupportedSignature, got {other:?}"),
    }
}

#[test]
fn test_missing_symbol() {
    let result = unsafe {
        bind::<fn(i32) -> i32>(Loader::global(), LibraryHandle::PROCESS, "freecall_missing_fn")
    };
    assert!(matches!(result, Err(FfiError::SymbolNotFound(_))));
}

#[test]
fn test_function_is_shared_across_threads() {
    let labs: Function<fn(i64) -> i64> = bind_process("labs");
    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let labs = labs.clone();
            thread::spawn(move || {
                (0..250i64)
                    .map(|i| labs.call(-(t * 250 + i)))
                    .sum::<i64>()
            })
        })
        .collect();

    let total: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, (0..1000i64).sum());
}

#[test]
fn test_stub_exposes_signature() {
    let strlen: Function<fn(Text) -> usize> = bind_process("strlen");
    assert_eq!(strlen.stub().signature().to_string(), "fn(text) -> u64");
    assert!(!strlen.address().is_null());
    assert!(format!("{strlen:?}").starts_with("Function"));
}
