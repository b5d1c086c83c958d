//! Integration Tests for the Loader
//!
//! Handle lifecycle and error reporting:
//! - open / resolve / close of the system C library
//! - Stale and sentinel handles
//! - Search path lookup and load failures

use std::path::PathBuf;

use freecall::ffi::{
    library_filename, system_library, Arg, CallSignature, CallStub, FfiError, LibraryHandle,
    Loader, OpenFlags, ParamKind, ReturnKind, Value,
};

// =============================================================================
// Handle lifecycle
// =============================================================================

#[test]
fn test_open_resolve_close() {
    let loader = Loader::new();
    let libc = unsafe { loader.open(system_library(), OpenFlags::default()) }.unwrap();
    assert!(!libc.is_process());
    assert_eq!(loader.path(libc).unwrap(), system_library());
    assert_eq!(loader.open_handles(), vec![libc]);

    let strlen = loader.resolve(libc, "strlen").unwrap();
    assert!(!strlen.is_null());
    // the same function is visible process-wide
    assert_eq!(
        loader.resolve(LibraryHandle::PROCESS, "strlen").unwrap(),
        strlen
    );

    loader.close(libc).unwrap();
    assert!(loader.open_handles().is_empty());
}

#[test]
fn test_stale_handle_is_rejected() {
    let loader = Loader::new();
    let handle = unsafe { loader.open(system_library(), OpenFlags::default()) }.unwrap();
    loader.close(handle).unwrap();

    assert!(matches!(
        loader.close(handle),
        Err(FfiError::InvalidHandle(h)) if h == handle
    ));
    assert!(matches!(
        loader.resolve(handle, "strlen"),
        Err(FfiError::InvalidHandle(_))
    ));
    assert!(matches!(loader.path(handle), Err(FfiError::InvalidHandle(_))));
}

#[test]
fn test_handles_are_never_reused() {
    let loader = Loader::new();
    let first = unsafe { loader.open(system_library(), OpenFlags::default()) }.unwrap();
    let second = unsafe { loader.open(system_library(), OpenFlags::default()) }.unwrap();
    assert_ne!(first, second);

    loader.close(first).unwrap();
    // the second handle keeps the module loaded
    assert!(loader.resolve(second, "strlen").is_ok());

    let third = unsafe { loader.open(system_library(), OpenFlags::default()) }.unwrap();
    assert_ne!(third, first);
    assert_ne!(third, second);

    loader.close(second).unwrap();
    loader.close(third).unwrap();
}

#[test]
fn test_reopen_after_full_close() {
    let loader = Loader::new();
    let first = unsafe { loader.open(system_library(), OpenFlags::default()) }.unwrap();
    let second = unsafe { loader.open(system_library(), OpenFlags::default()) }.unwrap();
    loader.close(first).unwrap();
    loader.close(second).unwrap();
    assert!(loader.open_handles().is_empty());

    let reopened = unsafe { loader.open(system_library(), OpenFlags::default()) }.unwrap();
    assert_ne!(reopened, first);
    assert_ne!(reopened, second);

    let address = loader.resolve(reopened, "strlen").unwrap();
    let strlen = unsafe {
        CallStub::compile(
            CallSignature::new(vec![ParamKind::Text], ReturnKind::U64),
            address,
        )
    }
    .unwrap();
    assert_eq!(strlen.call(&[Arg::text("reopened")]).unwrap(), Value::U64(8));

    loader.close(reopened).unwrap();
}

#[test]
fn test_process_handle_cannot_be_closed() {
    let loader = Loader::new();
    assert!(matches!(
        loader.close(LibraryHandle::PROCESS),
        Err(FfiError::InvalidHandle(LibraryHandle::PROCESS))
    ));
    assert!(loader.resolve(LibraryHandle::PROCESS, "malloc").is_ok());
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_missing_symbol() {
    let loader = Loader::new();
    assert!(matches!(
        loader.resolve(LibraryHandle::PROCESS, "freecall_no_such_symbol"),
        Err(FfiError::SymbolNotFound(name)) if name == "freecall_no_such_symbol"
    ));
    assert!(matches!(
        loader.resolve(LibraryHandle::PROCESS, "nul\0inside"),
        Err(FfiError::SymbolNotFound(_))
    ));
}

#[test]
fn test_missing_library() {
    let loader = Loader::new();
    let err = unsafe { loader.open("/nonexistent/libfreecall_missing.so", OpenFlags::NOW) }
        .unwrap_err();
    match err {
        FfiError::Load { path, message } => {
            assert_eq!(path, "/nonexistent/libfreecall_missing.so");
            assert!(!message.is_empty());
        }
        other => panic!("expected a load error, got {other:?}"),
    }
}

#[test]
fn test_invalid_module_file() {
    let dir = tempfile::tempdir().unwrap();
    let fake = dir.path().join(library_filename("fake"));
    std::fs::write(&fake, b"not a shared object").unwrap();

    let loader = Loader::with_search_paths(vec![dir.path().to_path_buf()]);
    assert_eq!(loader.find_library("fake"), Some(fake.clone()));
    assert!(matches!(
        unsafe { loader.open_library("fake", OpenFlags::LAZY | OpenFlags::LOCAL) },
        Err(FfiError::Load { .. })
    ));
    assert!(loader.open_handles().is_empty());
}

// =============================================================================
// Search paths
// =============================================================================

#[test]
fn test_search_paths_are_consulted_in_order() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let name = library_filename("ordered");
    std::fs::write(second.path().join(&name), b"").unwrap();

    let loader = Loader::with_search_paths(Vec::new());
    loader.add_search_path(first.path());
    loader.add_search_path(second.path());
    assert_eq!(
        loader.search_paths(),
        vec![first.path().to_path_buf(), second.path().to_path_buf()]
    );
    assert_eq!(
        loader.find_library("ordered"),
        Some(second.path().join(&name))
    );

    std::fs::write(first.path().join(&name), b"").unwrap();
    assert_eq!(loader.find_library("ordered"), Some(first.path().join(&name)));
    assert_eq!(loader.find_library("absent"), None);
}

#[test]
fn test_open_library_by_short_name() {
    let loader = Loader::new();
    let name = if cfg!(target_vendor = "apple") {
        "/usr/lib/libSystem.B.dylib"
    } else {
        "libc.so.6"
    };
    let handle = unsafe { loader.open_library(name, OpenFlags::default()) }.unwrap();
    assert!(loader.resolve(handle, "qsort").is_ok());
    let opened = PathBuf::from(loader.path(handle).unwrap());
    assert!(opened.ends_with(name) || opened.is_absolute());
    loader.close(handle).unwrap();
}
