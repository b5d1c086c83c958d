//! Forward Call Engine
//!
//! A [`CallStub`] binds one [`CallSignature`] to one native address under
//! the host ABI profile. The argument layout is computed once at compile
//! time; each call only fills a [`CallFrame`] and hands it to the
//! architecture's call routine.

use std::fmt;

use super::error::{FfiError, Result};
use super::layout::ArgLayout;
use super::loader::SymbolAddress;
use super::types::{Arg, CallSignature, RawReturn, Value};
use crate::arch::{self, Architecture, CallFrame, NativeArch};
use crate::logging::{debug, trace};

/// Immutable compiled binding of a signature to an address
#[derive(Debug, Clone)]
pub struct CallStub {
    address: SymbolAddress,
    signature: CallSignature,
    layout: ArgLayout,
}

impl CallStub {
    /// Compile a stub calling `address` with `signature`.
    ///
    /// # Safety
    ///
    /// `address` must be a function whose native signature matches
    /// `signature`. Every later call through the stub relies on this, and on
    /// pointer arguments being valid for whatever the function does with
    /// them.
    pub unsafe fn compile(signature: CallSignature, address: SymbolAddress) -> Result<Self> {
        let layout = Self::plan(&signature)?;
        Ok(Self::from_parts(signature, layout, address))
    }

    /// Validate `signature` and compute its layout without an address
    pub(crate) fn plan(signature: &CallSignature) -> Result<ArgLayout> {
        ArgLayout::compute(arch::host_profile(), signature)
    }

    pub(crate) fn from_parts(
        signature: CallSignature,
        layout: ArgLayout,
        address: SymbolAddress,
    ) -> Self {
        debug!(
            %address,
            %signature,
            stack_words = layout.stack_words(),
            "compiled call stub"
        );
        Self {
            address,
            signature,
            layout,
        }
    }

    pub fn address(&self) -> SymbolAddress {
        self.address
    }

    pub fn signature(&self) -> &CallSignature {
        &self.signature
    }

    pub fn layout(&self) -> &ArgLayout {
        &self.layout
    }

    /// Call with dynamically typed arguments.
    ///
    /// Argument count and kinds are checked against the signature first;
    /// a mismatch is reported without touching native code.
    pub fn call(&self, args: &[Arg<'_>]) -> Result<Value> {
        let params = self.signature.params();
        if args.len() != params.len() {
            return Err(FfiError::ArgumentMismatch {
                expected: format!("{} arguments", params.len()),
                found: args.len().to_string(),
            });
        }
        for (index, (arg, param)) in args.iter().zip(params).enumerate() {
            if arg.kind() != *param {
                return Err(FfiError::ArgumentMismatch {
                    expected: format!("{param} for argument {index}"),
                    found: arg.kind().to_string(),
                });
            }
        }

        let returns = self.signature.returns();
        // SAFETY: compile() made the caller vouch for the return kind.
        Ok(self.invoke_with(args, |raw| unsafe { Value::from_return(returns, raw) }))
    }

    /// Marshal `args`, call the target and hand the result registers to
    /// `decode`. Arguments must already match the signature.
    ///
    /// `decode` runs while scoped text copies are still alive, so a returned
    /// `char*` pointing into one of them can be copied out safely.
    pub(crate) fn invoke_with<T>(
        &self,
        args: &[Arg<'_>],
        decode: impl FnOnce(RawReturn) -> T,
    ) -> T {
        debug_assert_eq!(args.len(), self.signature.params().len());

        let mut scoped = ScopedText::default();
        let mut inline = [0u64; ARG_WORDS_INLINE];
        let mut heap;
        let words: &mut [u64] = if args.len() <= ARG_WORDS_INLINE {
            &mut inline[..args.len()]
        } else {
            heap = vec![0u64; args.len()];
            heap.as_mut_slice()
        };

        for (word, arg) in words.iter_mut().zip(args) {
            *word = match arg {
                Arg::Text(bytes) => scoped.terminated(bytes),
                _ => arg.word(),
            };
        }

        let mut frame = CallFrame::new(self.address.as_usize());
        self.layout.write(&mut frame, words);

        trace!(address = %self.address, "native call");
        // SAFETY: compile() made the caller vouch that the target matches the
        // signature; `scoped` keeps text copies alive until after decoding.
        unsafe { NativeArch::invoke(&mut frame) };

        let value = decode(RawReturn {
            int: frame.ret_int[0],
            float: frame.ret_float[0],
        });
        drop(scoped);
        value
    }
}

impl fmt::Display for CallStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.signature, self.address)
    }
}

/// Argument words held on the stack before falling back to the heap
const ARG_WORDS_INLINE: usize = 16;

/// NUL-terminated copies of text arguments, owned by one in-flight call
#[derive(Default)]
struct ScopedText {
    copies: Vec<Vec<u8>>,
}

impl ScopedText {
    /// Address of a terminated form of `bytes`: the view itself if it already
    /// ends in NUL, otherwise a copy owned by this guard.
    fn terminated(&mut self, bytes: &[u8]) -> u64 {
        if bytes.last() == Some(&0) {
            return bytes.as_ptr() as usize as u64;
        }
        let mut copy = Vec::with_capacity(bytes.len() + 1);
        copy.extend_from_slice(bytes);
        copy.push(0);
        let address = copy.as_ptr() as usize as u64;
        // moving the Vec does not move its heap buffer
        self.copies.push(copy);
        address
    }
}
