//! FFI error taxonomy

use thiserror::Error;

use super::loader::LibraryHandle;

/// Errors raised by the loader, the call engine and the callback table.
///
/// A hardware fault inside native code is not represented here: it ends the
/// process before any value could be returned.
#[derive(Debug, Error)]
pub enum FfiError {
    #[error("failed to load '{path}': {message}")]
    Load { path: String, message: String },

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("invalid library handle: {0}")]
    InvalidHandle(LibraryHandle),

    #[error("unsupported signature ({kind}): {reason}")]
    UnsupportedSignature { kind: String, reason: String },

    #[error("callback table exhausted (capacity {capacity})")]
    ResourceExhausted { capacity: usize },

    #[error("failed to unload '{path}': {message}")]
    Unload { path: String, message: String },

    #[error("not a live callback address: {0:#x}")]
    UnknownCallback(usize),

    #[error("argument mismatch: expected {expected}, found {found}")]
    ArgumentMismatch { expected: String, found: String },
}

impl FfiError {
    pub(crate) fn unsupported(kind: impl ToString, reason: impl Into<String>) -> Self {
        FfiError::UnsupportedSignature {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for FFI operations
pub type Result<T> = std::result::Result<T, FfiError>;
