//! Freecall - Foreign Calls Without a Bridge Layer
//!
//! Calls functions exported by native shared libraries and lets native code
//! call back into Rust closures, with no ahead-of-time compiled glue. Argument
//! marshaling follows the calling convention of the build target and is done
//! by a small per-architecture assembly routine; callbacks enter through a
//! table of trampolines assembled into the binary.
//!
//! # Features
//!
//! - **Dynamic loading**: `dlopen`/`dlsym`/`dlclose` behind [`ffi::Loader`],
//!   including process-wide lookups through [`ffi::LibraryHandle::PROCESS`]
//! - **Forward calls**: [`ffi::CallStub`] precomputes the register and stack
//!   layout of a signature once, then calls with no per-call planning
//! - **Callbacks**: up to [`ffi::CALLBACK_CAPACITY`] live closures, each with
//!   its own native entry address, callable from any thread
//! - **Typed facade**: [`ffi::bind`] and [`ffi::register_callback`] derive
//!   signatures from Rust types
//!
//! # Supported Targets
//!
//! | Architecture | Calling convention |
//! |--------------|--------------------|
//! | x86-64 (Linux, macOS, BSD) | System V AMD64 |
//! | AArch64 (Linux, BSD) | AAPCS64 |
//! | AArch64 (macOS, iOS) | Apple ARM64 |
//!
//! # Example
//!
//! ```rust,no_run
//! use freecall::ffi::{bind, LibraryHandle, Loader, Text};
//!
//! let strlen = unsafe {
//!     bind::<fn(Text) -> usize>(Loader::global(), LibraryHandle::PROCESS, "strlen")
//! }
//! .unwrap();
//! assert_eq!(strlen.call("hello"), 5);
//! ```
//!
//! # Faults
//!
//! Nothing here is a sandbox. A segmentation fault or other hardware fault
//! raised by native code, or by a callback invoked from native code,
//! terminates the process; there is no error value for it. A panic inside a
//! callback cannot unwind through native frames either, so it is logged and
//! the process aborts.

#![allow(missing_docs)]
#![warn(clippy::all)]

mod logging;

pub mod arch;
pub mod config;
pub mod ffi;

pub use arch::{detect_arch, host_profile, AbiProfile, CallingConvention};
pub use config::{ConfigError, FreecallConfig, LoaderConfig, LoggingConfig};
pub use ffi::{
    bind, register_callback, unregister_callback, Arg, CallSignature, CallStub, CallbackAddress,
    CallbackTable, FfiError, Function, LibraryHandle, Loader, OpenFlags, ParamKind, ReturnKind,
    SymbolAddress, Value,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
