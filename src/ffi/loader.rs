//! Dynamic Library Loader
//!
//! Opens shared modules through the native dynamic linker (via libloading's
//! unix layer, so open flags reach `dlopen` unchanged), resolves exported
//! symbols, and closes modules again.
//!
//! Every successful [`Loader::open`] yields a fresh [`LibraryHandle`], even
//! for a path that is already open; the native linker keeps its own
//! reference count per module.

use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::fmt;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use libloading::os::unix::Library;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use super::error::{FfiError, Result};
use crate::logging::{debug, info};

/// Environment variable with extra library directories, colon separated
pub const LIBRARY_PATH_ENV: &str = "FREECALL_LIBRARY_PATH";

/// Opaque identifier of one loaded module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryHandle(u64);

impl LibraryHandle {
    /// Every module already loaded into the process (`RTLD_DEFAULT`).
    /// Accepted by [`Loader::resolve`] only.
    pub const PROCESS: LibraryHandle = LibraryHandle(0);

    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn is_process(&self) -> bool {
        *self == Self::PROCESS
    }
}

impl fmt::Display for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_process() {
            write!(f, "process")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Resolved address of an exported symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolAddress(usize);

impl SymbolAddress {
    pub const fn new(address: usize) -> Self {
        Self(address)
    }

    /// Address of a function or object in this process
    pub fn of<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.0 as *const c_void
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SymbolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// `dlopen` mode bits, combinable with `|`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(i32);

impl OpenFlags {
    /// Resolve all undefined symbols before `open` returns
    pub const NOW: OpenFlags = OpenFlags(libc::RTLD_NOW);
    /// Resolve function symbols on first use
    pub const LAZY: OpenFlags = OpenFlags(libc::RTLD_LAZY);
    /// Make the module's symbols available to later loads and to
    /// [`LibraryHandle::PROCESS`] lookups
    pub const GLOBAL: OpenFlags = OpenFlags(libc::RTLD_GLOBAL);
    /// Keep the module's symbols private. This is the native default and is
    /// zero on Linux, so every flag set `contains(LOCAL)` there.
    pub const LOCAL: OpenFlags = OpenFlags(libc::RTLD_LOCAL);

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn contains(&self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether exactly one of [`OpenFlags::NOW`] and [`OpenFlags::LAZY`] is
    /// set; `dlopen` rejects any other combination.
    pub fn has_binding_mode(&self) -> bool {
        self.contains(Self::NOW) != self.contains(Self::LAZY)
    }

    /// Parse one flag name (`now`, `lazy`, `global`, `local`)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "now" => Some(Self::NOW),
            "lazy" => Some(Self::LAZY),
            "global" => Some(Self::GLOBAL),
            "local" => Some(Self::LOCAL),
            _ => None,
        }
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::NOW | OpenFlags::GLOBAL
    }
}

struct Module {
    path: String,
    library: Library,
}

/// Process-scoped table of open modules.
///
/// `open` and `close` are serialized by `lifecycle`, which is held across
/// the native `dlopen`/`dlclose`. The module table itself is only write
/// locked for the insert or remove, so a module constructor that resolves
/// symbols through this loader cannot deadlock.
pub struct Loader {
    modules: RwLock<HashMap<u64, Module>>,
    lifecycle: Mutex<()>,
    next_id: AtomicU64,
    search_paths: RwLock<Vec<PathBuf>>,
}

static GLOBAL_LOADER: Lazy<Loader> = Lazy::new(Loader::new);

impl Loader {
    /// A loader searching the platform's default library directories
    pub fn new() -> Self {
        Self::with_search_paths(default_search_paths())
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            next_id: AtomicU64::new(1),
            search_paths: RwLock::new(search_paths),
        }
    }

    /// The process-wide loader, created on first use and never torn down
    pub fn global() -> &'static Loader {
        &GLOBAL_LOADER
    }

    pub fn add_search_path(&self, path: impl AsRef<Path>) {
        self.search_paths.write().push(path.as_ref().to_path_buf());
    }

    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.search_paths.read().clone()
    }

    /// Load the module at `path`.
    ///
    /// # Safety
    ///
    /// Loading runs the module's initializers, which may do anything.
    pub unsafe fn open(&self, path: impl AsRef<Path>, flags: OpenFlags) -> Result<LibraryHandle> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        if shown.contains('\0') {
            return Err(FfiError::Load {
                path: shown,
                message: "path contains an interior NUL byte".to_string(),
            });
        }

        let _lifecycle = self.lifecycle.lock();
        let library = Library::open(Some(path.as_os_str()), flags.bits()).map_err(|e| {
            FfiError::Load {
                path: shown.clone(),
                message: e.to_string(),
            }
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.modules.write().insert(
            id,
            Module {
                path: shown.clone(),
                library,
            },
        );
        info!(path = %shown, handle = id, "opened library");
        Ok(LibraryHandle(id))
    }

    /// Load a library by short name (`"m"`, `"libm.so.6"`) or path.
    ///
    /// The search paths are tried first with the platform file name; if
    /// none matches, the name is handed to the native linker's own search.
    ///
    /// # Safety
    ///
    /// Same as [`Loader::open`].
    pub unsafe fn open_library(&self, name: &str, flags: OpenFlags) -> Result<LibraryHandle> {
        match self.find_library(name) {
            Some(path) => self.open(path, flags),
            None => self.open(library_filename(name), flags),
        }
    }

    /// Locate a library file in the search paths
    pub fn find_library(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.components().count() > 1 && path.exists() {
            return Some(path.to_path_buf());
        }

        let file_name = library_filename(name);
        self.search_paths
            .read()
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.exists())
    }

    /// Resolve `name` in `handle`, or in the whole process for
    /// [`LibraryHandle::PROCESS`]
    pub fn resolve(&self, handle: LibraryHandle, name: &str) -> Result<SymbolAddress> {
        let c_name =
            CString::new(name).map_err(|_| FfiError::SymbolNotFound(name.to_string()))?;

        let address = if handle.is_process() {
            // SAFETY: RTLD_DEFAULT is always a valid pseudo-handle.
            unsafe { libc::dlsym(libc::RTLD_DEFAULT, c_name.as_ptr()) as usize }
        } else {
            let modules = self.modules.read();
            let module = modules.get(&handle.0).ok_or(FfiError::InvalidHandle(handle))?;
            // SAFETY: the symbol is only read as an address; the module
            // stays loaded while the shared lock is held.
            unsafe {
                module
                    .library
                    .get::<*const c_void>(c_name.as_bytes_with_nul())
                    .map(|symbol| symbol.into_raw() as usize)
                    .map_err(|_| FfiError::SymbolNotFound(name.to_string()))?
            }
        };

        if address == 0 {
            return Err(FfiError::SymbolNotFound(name.to_string()));
        }
        debug!(symbol = name, %handle, address, "resolved symbol");
        Ok(SymbolAddress(address))
    }

    /// Close a handle. Symbols resolved through it may dangle afterwards.
    pub fn close(&self, handle: LibraryHandle) -> Result<()> {
        if handle.is_process() {
            return Err(FfiError::InvalidHandle(handle));
        }

        let _lifecycle = self.lifecycle.lock();
        let module = self
            .modules
            .write()
            .remove(&handle.0)
            .ok_or(FfiError::InvalidHandle(handle))?;

        let Module { path, library } = module;
        library.close().map_err(|e| FfiError::Unload {
            path: path.clone(),
            message: e.to_string(),
        })?;
        info!(path = %path, %handle, "closed library");
        Ok(())
    }

    /// Path a handle was opened with
    pub fn path(&self, handle: LibraryHandle) -> Result<String> {
        self.modules
            .read()
            .get(&handle.0)
            .map(|module| module.path.clone())
            .ok_or(FfiError::InvalidHandle(handle))
    }

    /// Handles currently open, in no particular order
    pub fn open_handles(&self) -> Vec<LibraryHandle> {
        self.modules.read().keys().map(|&id| LibraryHandle(id)).collect()
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Path of the platform C library
pub fn system_library() -> &'static str {
    #[cfg(target_vendor = "apple")]
    {
        "/usr/lib/libSystem.B.dylib"
    }
    #[cfg(not(target_vendor = "apple"))]
    {
        "libc.so.6"
    }
}

/// Default library search paths for this platform
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(extra) = std::env::var(LIBRARY_PATH_ENV) {
        paths.extend(
            extra
                .split(':')
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        );
    }

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/lib"));
        paths.push(PathBuf::from("/usr/lib64"));
        paths.push(PathBuf::from("/lib64"));
        #[cfg(target_arch = "x86_64")]
        {
            paths.push(PathBuf::from("/usr/lib/x86_64-linux-gnu"));
            paths.push(PathBuf::from("/lib/x86_64-linux-gnu"));
        }
        #[cfg(target_arch = "aarch64")]
        {
            paths.push(PathBuf::from("/usr/lib/aarch64-linux-gnu"));
            paths.push(PathBuf::from("/lib/aarch64-linux-gnu"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));
        paths.push(PathBuf::from("/usr/lib"));
    }

    paths
}

/// Platform file name for a short library name (`m` becomes `libm.so`)
pub fn library_filename(name: &str) -> String {
    let has_suffix = if cfg!(target_vendor = "apple") {
        name.ends_with(".dylib")
    } else {
        name.ends_with(".so") || name.contains(".so.")
    };
    if has_suffix || name.contains('/') {
        name.to_string()
    } else if cfg!(target_vendor = "apple") {
        format!("lib{name}.dylib")
    } else {
        format!("lib{name}.so")
    }
}
