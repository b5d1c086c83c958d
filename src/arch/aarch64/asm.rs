//! AArch64 call routine, callback entry and trampoline table.
//!
//! Offsets are passed as `const` operands; pair loads and stores need them
//! 8-byte aligned and below 504, which the frame layout tests check.

use std::arch::naked_asm;

use crate::arch::{call_frame as cf, callback_frame as cb, CallFrame, TRAMPOLINE_STRIDE};
use crate::ffi::callback::{dispatch, CALLBACK_CAPACITY};

/// Load x0-x7/d0-d7 and the stack words from `frame`, call `frame.target`,
/// store x0/x1 and d0/d1 back. x19 keeps the frame across the call.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn invoke(frame: *mut CallFrame) {
    naked_asm!(
        "stp x29, x30, [sp, #-32]!",
        "mov x29, sp",
        "str x19, [sp, #16]",
        "mov x19, x0",
        "ldr x9, [x19, #{stack_words}]",
        "lsl x10, x9, #3",
        "add x10, x10, #15",
        "and x10, x10, #-16",
        "sub sp, sp, x10",
        "mov x11, #0",
        "add x12, x19, #{stack}",
        "2:",
        "cmp x11, x9",
        "b.hs 3f",
        "ldr x13, [x12, x11, lsl #3]",
        "str x13, [sp, x11, lsl #3]",
        "add x11, x11, #1",
        "b 2b",
        "3:",
        "ldp d0, d1, [x19, #{f0}]",
        "ldp d2, d3, [x19, #{f2}]",
        "ldp d4, d5, [x19, #{f4}]",
        "ldp d6, d7, [x19, #{f6}]",
        "ldp x0, x1, [x19, #{i0}]",
        "ldp x2, x3, [x19, #{i2}]",
        "ldp x4, x5, [x19, #{i4}]",
        "ldp x6, x7, [x19, #{i6}]",
        "ldr x16, [x19, #{target}]",
        "blr x16",
        "stp x0, x1, [x19, #{ret_int}]",
        "stp d0, d1, [x19, #{ret_float}]",
        "mov sp, x29",
        "ldr x19, [sp, #16]",
        "ldp x29, x30, [sp], #32",
        "ret",
        target = const cf::TARGET,
        i0 = const cf::INTS,
        i2 = const cf::INTS + 16,
        i4 = const cf::INTS + 32,
        i6 = const cf::INTS + 48,
        f0 = const cf::FLOATS,
        f2 = const cf::FLOATS + 16,
        f4 = const cf::FLOATS + 32,
        f6 = const cf::FLOATS + 48,
        stack_words = const cf::STACK_WORDS,
        ret_int = const cf::RET_INT,
        ret_float = const cf::RET_FLOAT,
        stack = const cf::STACK,
    )
}

/// Common tail of every trampoline. Expects the slot index in x9.
#[unsafe(naked)]
unsafe extern "C" fn callback_entry() {
    naked_asm!(
        "stp x29, x30, [sp, #-16]!",
        "mov x29, sp",
        "sub sp, sp, #{size}",
        "stp x0, x1, [sp, #{i0}]",
        "stp x2, x3, [sp, #{i2}]",
        "stp x4, x5, [sp, #{i4}]",
        "stp x6, x7, [sp, #{i6}]",
        "stp d0, d1, [sp, #{f0}]",
        "stp d2, d3, [sp, #{f2}]",
        "stp d4, d5, [sp, #{f4}]",
        "stp d6, d7, [sp, #{f6}]",
        // first stack argument sits right above the saved frame record
        "add x10, x29, #16",
        "str x10, [sp, #{stack}]",
        "mov x0, x9",
        "mov x1, sp",
        "bl {dispatch}",
        "ldp x0, x1, [sp, #{ret_int}]",
        "ldp d0, d1, [sp, #{ret_float}]",
        "mov sp, x29",
        "ldp x29, x30, [sp], #16",
        "ret",
        size = const cb::SIZE,
        i0 = const cb::INTS,
        i2 = const cb::INTS + 16,
        i4 = const cb::INTS + 32,
        i6 = const cb::INTS + 48,
        f0 = const cb::FLOATS,
        f2 = const cb::FLOATS + 16,
        f4 = const cb::FLOATS + 32,
        f6 = const cb::FLOATS + 48,
        stack = const cb::STACK,
        ret_int = const cb::RET_INT,
        ret_float = const cb::RET_FLOAT,
        dispatch = sym dispatch,
    )
}

/// `CALLBACK_CAPACITY` entries, one every `TRAMPOLINE_STRIDE` bytes:
///
/// ```text
/// bti  c               ; d503245f, a nop without BTI
/// movz x9, #index      ; d2800009 | index << 5
/// b    callback_entry
/// ```
#[unsafe(naked)]
unsafe extern "C" fn trampoline_table() {
    naked_asm!(
        ".balign {stride}",
        ".set freecall_trampoline_slot, 0",
        ".rept {count}",
        ".balign {stride}",
        ".inst 0xd503245f",
        ".inst 0xd2800009 + (freecall_trampoline_slot << 5)",
        "b {entry}",
        ".set freecall_trampoline_slot, freecall_trampoline_slot + 1",
        ".endr",
        stride = const TRAMPOLINE_STRIDE,
        count = const CALLBACK_CAPACITY,
        entry = sym callback_entry,
    )
}

/// Address of trampoline entry 0 (the table's first `.balign` boundary)
pub(super) fn trampoline_base() -> usize {
    let start = trampoline_table as *const () as usize;
    (start + TRAMPOLINE_STRIDE - 1) & !(TRAMPOLINE_STRIDE - 1)
}
