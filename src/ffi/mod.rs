//! FFI Module
//!
//! Calls into native shared libraries and native calls back into Rust
//! closures, with no compiled bridge layer in between.
//!
//! # Architecture
//!
//! ```text
//! Rust caller
//!       │
//!       ▼
//! Typed binding (fn(Text, usize) -> i32)      register_callback(|a, b| ..)
//!       │                                              │
//!       ▼                                              ▼
//! Loader::resolve ──► CallStub (layout)        CallbackTable (slot, layout)
//!       │                                              │
//!       ▼                                              ▼
//! arch invoke routine ──► native function ──► trampoline[i] ──► dispatch
//! ```
//!
//! # Example
//!
//! ```ignore
//! use freecall::ffi::{bind, register_callback, BufferMut, LibraryHandle, Loader};
//! use std::ffi::c_void;
//!
//! let loader = Loader::global();
//! let qsort = unsafe {
//!     bind::<fn(BufferMut<i64>, usize, usize, *const c_void)>(loader, LibraryHandle::PROCESS, "qsort")?
//! };
//! let cmp = register_callback(|a: *const i64, b: *const i64| -> i32 {
//!     unsafe { (*a).cmp(&*b) as i32 }
//! })?;
//!
//! let mut data = [88i64, 56, 100, 2, 25];
//! qsort.call(&mut data, 5, 8, cmp.as_ptr());
//! assert_eq!(data, [2, 25, 56, 88, 100]);
//! ```

pub mod binding;
pub mod call;
pub mod callback;
pub mod error;
pub mod layout;
pub mod loader;
mod types;

pub use binding::{
    bind, register_callback, unregister_callback, Buffer, BufferMut, ByValue, CText,
    CallbackParam, CallbackReturn, FfiParam, FfiReturn, Function, IntoCallback, Shape, Text,
};
pub use call::CallStub;
pub use callback::{CallbackAddress, CallbackTable, CALLBACK_CAPACITY, MAX_CALLBACK_PARAMS};
pub use error::{FfiError, Result};
pub use layout::{ArgLayout, Location, Placement};
pub use loader::{
    default_search_paths, library_filename, system_library, LibraryHandle, Loader, OpenFlags,
    SymbolAddress, LIBRARY_PATH_ENV,
};
pub use types::{
    Arg, CallSignature, OwnedArg, ParamKind, RawReturn, RawView, RegisterClass, ReturnKind, Value,
};
