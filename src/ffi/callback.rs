//! Reverse Callback Engine
//!
//! Native code can only call plain function addresses, so every callback
//! gets one entry of a trampoline table that is assembled into the binary.
//! Entry `i` loads `i` into a scratch register and jumps to a common entry
//! routine, which spills the argument registers into a [`CallbackFrame`] and
//! calls [`dispatch`]. The dispatcher finds slot `i`, decodes the arguments
//! with the slot's precomputed layout, runs the closure and writes the
//! result registers back.
//!
//! ```text
//! native caller ──► trampoline[i] ──► callback_entry ──► dispatch(i, frame)
//!                                                            │
//!                                    slots[i] (epoch pinned) ┘──► closure
//! ```
//!
//! Slots are published through `crossbeam::epoch` pointers, so dispatch
//! never takes a lock and a slot released while another thread is inside
//! its closure is freed only after that thread leaves.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;

use crossbeam::epoch::{self, Atomic, Owned};
use crossbeam::queue::ArrayQueue;
use once_cell::sync::Lazy;

use super::error::{FfiError, Result};
use super::layout::ArgLayout;
use super::types::{CallSignature, ParamKind, ReturnKind, Value};
use crate::arch::{self, Architecture, CallbackFrame, NativeArch, TRAMPOLINE_STRIDE};
use crate::logging::{debug, error, warn};

/// Number of trampolines assembled into the binary
pub const CALLBACK_CAPACITY: usize = 2000;

/// Most parameters a callback can declare
pub const MAX_CALLBACK_PARAMS: usize =
    arch::MAX_INT_REGISTERS + arch::MAX_FLOAT_REGISTERS + arch::MAX_STACK_WORDS;

/// Closure form every slot stores: raw argument words in, raw result word out.
///
/// Integers arrive sign or zero extended per their kind; `f32` as its bits
/// in the low half. The result word is encoded the same way.
pub(crate) type RawHandler = Box<dyn Fn(&[u64]) -> u64 + Send + Sync + 'static>;

/// Native entry address of a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackAddress(usize);

impl CallbackAddress {
    pub fn as_usize(&self) -> usize {
        self.0
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_void {
        self.0 as *const std::ffi::c_void
    }
}

struct CallbackSlot {
    handler: RawHandler,
    signature: CallSignature,
    layout: ArgLayout,
}

/// Fixed-capacity table binding trampoline entries to closures.
///
/// There is one table per process because the trampolines are global.
pub struct CallbackTable {
    slots: Box<[Atomic<CallbackSlot>]>,
    free: ArrayQueue<usize>,
}

static TABLE: Lazy<CallbackTable> = Lazy::new(CallbackTable::new);

impl CallbackTable {
    fn new() -> Self {
        let free = ArrayQueue::new(CALLBACK_CAPACITY);
        for index in 0..CALLBACK_CAPACITY {
            // capacity equals the number of pushes
            let _ = free.push(index);
        }
        Self {
            slots: (0..CALLBACK_CAPACITY).map(|_| Atomic::null()).collect(),
            free,
        }
    }

    /// The process-wide table
    pub fn global() -> &'static CallbackTable {
        &TABLE
    }

    pub fn capacity(&self) -> usize {
        CALLBACK_CAPACITY
    }

    /// Number of registered callbacks
    pub fn live(&self) -> usize {
        CALLBACK_CAPACITY - self.free.len()
    }

    /// Bind a closure over dynamic [`Value`]s to a trampoline.
    ///
    /// The closure receives one value per parameter and must return a value
    /// of the declared return kind; returning anything else aborts the
    /// process like a panic would.
    pub fn register<F>(&self, signature: CallSignature, closure: F) -> Result<CallbackAddress>
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        let params = signature.params().to_vec();
        let returns = signature.returns();
        let handler = move |words: &[u64]| -> u64 {
            let values: Vec<Value> = params
                .iter()
                .zip(words)
                // SAFETY: text parameters come from native callers that pass
                // NULL or a terminated string.
                .map(|(&kind, &word)| unsafe { Value::from_word(kind, word) })
                .collect();
            let result = closure(&values);
            match result.to_word(returns) {
                Some(word) => word,
                None => panic!("callback returned {} for declared {}", result.kind(), returns),
            }
        };
        self.register_raw(signature, Box::new(handler))
    }

    pub(crate) fn register_raw(
        &self,
        signature: CallSignature,
        handler: RawHandler,
    ) -> Result<CallbackAddress> {
        check_signature(&signature)?;
        let layout = ArgLayout::compute(arch::host_profile(), &signature)?;

        let index = self.free.pop().ok_or_else(|| {
            warn!(capacity = CALLBACK_CAPACITY, "callback table exhausted");
            FfiError::ResourceExhausted {
                capacity: CALLBACK_CAPACITY,
            }
        })?;

        debug!(slot = index, %signature, "registered callback");
        self.slots[index].store(
            Owned::new(CallbackSlot {
                handler,
                signature,
                layout,
            }),
            Ordering::Release,
        );
        Ok(CallbackAddress(trampoline_address(index)))
    }

    /// Release the slot behind `address`.
    ///
    /// Native code must not call the address afterwards; a call into an
    /// empty slot terminates the process.
    pub fn unregister(&self, address: CallbackAddress) -> Result<()> {
        let index = slot_index(address.0).ok_or(FfiError::UnknownCallback(address.0))?;

        let guard = epoch::pin();
        let old = self.slots[index].swap(epoch::Shared::null(), Ordering::AcqRel, &guard);
        if old.is_null() {
            return Err(FfiError::UnknownCallback(address.0));
        }
        // SAFETY: the slot no longer refers to `old`; threads still inside
        // the closure hold their own pins.
        unsafe { guard.defer_destroy(old) };
        drop(guard);

        // cannot fail: the index was taken out of this queue
        let _ = self.free.push(index);
        debug!(slot = index, "unregistered callback");
        Ok(())
    }

    /// Signature of the callback registered at `address`
    pub fn signature(&self, address: CallbackAddress) -> Option<CallSignature> {
        let index = slot_index(address.0)?;
        let guard = epoch::pin();
        let slot = self.slots[index].load(Ordering::Acquire, &guard);
        // SAFETY: pinned; the slot cannot be freed while `guard` lives.
        unsafe { slot.as_ref() }.map(|slot| slot.signature.clone())
    }
}

/// Callbacks take no variadics, aggregates, buffers or text results
fn check_signature(signature: &CallSignature) -> Result<()> {
    if signature.is_variadic() {
        return Err(FfiError::unsupported(
            "variadic",
            "callbacks cannot be variadic",
        ));
    }
    if signature.params().len() > MAX_CALLBACK_PARAMS {
        return Err(FfiError::unsupported(
            "arity",
            format!(
                "{} parameters, callbacks take at most {MAX_CALLBACK_PARAMS}",
                signature.params().len()
            ),
        ));
    }
    if let Some(kind) = signature
        .params()
        .iter()
        .find(|k| matches!(k, ParamKind::Buffer | ParamKind::Struct { .. }))
    {
        return Err(FfiError::unsupported(
            kind,
            "callback parameters must be scalars, pointers or text",
        ));
    }
    match signature.returns() {
        ReturnKind::Text | ReturnKind::Struct { .. } => Err(FfiError::unsupported(
            signature.returns(),
            "callbacks return scalars, pointers or nothing",
        )),
        _ => Ok(()),
    }
}

fn trampoline_address(index: usize) -> usize {
    NativeArch::trampoline_base() + index * TRAMPOLINE_STRIDE
}

fn slot_index(address: usize) -> Option<usize> {
    let offset = address.checked_sub(NativeArch::trampoline_base())?;
    let index = offset / TRAMPOLINE_STRIDE;
    (offset % TRAMPOLINE_STRIDE == 0 && index < CALLBACK_CAPACITY).then_some(index)
}

/// Called by the trampoline entry routine with the slot index and the
/// register image it spilled.
///
/// Unwinding out of here would cross native frames, so every failure is
/// logged and ends the process.
pub(crate) unsafe extern "C" fn dispatch(index: usize, frame: *mut CallbackFrame) {
    if index >= CALLBACK_CAPACITY || frame.is_null() {
        error!(slot = index, "trampoline entered with an invalid slot");
        std::process::abort();
    }

    let guard = epoch::pin();
    let shared = TABLE.slots[index].load(Ordering::Acquire, &guard);
    let Some(slot) = shared.as_ref() else {
        error!(slot = index, "native code called an unregistered callback");
        std::process::abort();
    };
    let frame = &mut *frame;

    let count = slot.signature.params().len();
    let mut words = [0u64; MAX_CALLBACK_PARAMS];
    slot.layout.read(frame, &mut words[..count]);

    let result = catch_unwind(AssertUnwindSafe(|| (slot.handler)(&words[..count])));
    let word = match result {
        Ok(word) => word,
        Err(payload) => {
            error!(slot = index, panic = panic_message(payload.as_ref()), "callback panicked");
            drop(payload);
            std::process::abort();
        }
    };

    let returns = slot.signature.returns();
    if returns.is_float() {
        frame.ret_float[0] = word;
    } else {
        frame.ret_int[0] = extend_result(returns, word);
    }
}

#[cfg_attr(not(feature = "logging"), allow(dead_code))]
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Integer result registers carry the value extended to a full word
fn extend_result(kind: ReturnKind, word: u64) -> u64 {
    match kind {
        ReturnKind::I8 => word as i8 as i64 as u64,
        ReturnKind::I16 => word as i16 as i64 as u64,
        ReturnKind::I32 => word as i32 as i64 as u64,
        ReturnKind::U8 | ReturnKind::Bool => word as u8 as u64,
        ReturnKind::U16 => word as u16 as u64,
        ReturnKind::U32 => word as u32 as u64,
        ReturnKind::Void => 0,
        _ => word,
    }
}
