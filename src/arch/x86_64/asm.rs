//! SysV AMD64 call routine, callback entry and trampoline table.
//!
//! All three are naked functions: the frame offsets they use come from
//! `offset_of!` on the `#[repr(C)]` frame structs, so the Rust and assembly
//! views of a frame cannot drift apart.

use std::arch::naked_asm;

use crate::arch::{call_frame as cf, callback_frame as cb, CallFrame, TRAMPOLINE_STRIDE};
use crate::ffi::callback::{dispatch, CALLBACK_CAPACITY};

/// Load registers and stack words from `frame`, call `frame.target`, store
/// rax/rdx and xmm0/xmm1 back into the frame.
///
/// rbx holds the frame across the call; r12 is pushed only to keep rsp
/// 16-byte aligned before the stack arguments are reserved.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn invoke(frame: *mut CallFrame) {
    naked_asm!(
        "push %rbp",
        "mov %rsp, %rbp",
        "push %rbx",
        "push %r12",
        "mov %rdi, %rbx",
        // reserve the stack argument area, rounded up to 16 bytes
        "mov {stack_words}(%rbx), %rcx",
        "lea 15(,%rcx,8), %rax",
        "and $-16, %rax",
        "sub %rax, %rsp",
        "xor %edx, %edx",
        "2:",
        "cmp %rcx, %rdx",
        "jae 3f",
        "mov {stack}(%rbx,%rdx,8), %rax",
        "mov %rax, (%rsp,%rdx,8)",
        "inc %rdx",
        "jmp 2b",
        "3:",
        "movq {floats}(%rbx), %xmm0",
        "movq {floats}+8(%rbx), %xmm1",
        "movq {floats}+16(%rbx), %xmm2",
        "movq {floats}+24(%rbx), %xmm3",
        "movq {floats}+32(%rbx), %xmm4",
        "movq {floats}+40(%rbx), %xmm5",
        "movq {floats}+48(%rbx), %xmm6",
        "movq {floats}+56(%rbx), %xmm7",
        "mov {ints}(%rbx), %rdi",
        "mov {ints}+8(%rbx), %rsi",
        "mov {ints}+16(%rbx), %rdx",
        "mov {ints}+24(%rbx), %rcx",
        "mov {ints}+32(%rbx), %r8",
        "mov {ints}+40(%rbx), %r9",
        "mov {float_count}(%rbx), %rax",
        "call *{target}(%rbx)",
        "mov %rax, {ret_int}(%rbx)",
        "mov %rdx, {ret_int}+8(%rbx)",
        "movq %xmm0, {ret_float}(%rbx)",
        "movq %xmm1, {ret_float}+8(%rbx)",
        "lea -16(%rbp), %rsp",
        "pop %r12",
        "pop %rbx",
        "pop %rbp",
        "ret",
        target = const cf::TARGET,
        ints = const cf::INTS,
        floats = const cf::FLOATS,
        stack_words = const cf::STACK_WORDS,
        float_count = const cf::FLOAT_COUNT,
        ret_int = const cf::RET_INT,
        ret_float = const cf::RET_FLOAT,
        stack = const cf::STACK,
        options(att_syntax)
    )
}

/// Common tail of every trampoline. Expects the slot index in r10.
///
/// Spills the argument registers into a `CallbackFrame` on its own stack,
/// calls the dispatcher, then reloads the result registers from the frame.
#[unsafe(naked)]
unsafe extern "C" fn callback_entry() {
    naked_asm!(
        "push %rbp",
        "mov %rsp, %rbp",
        "sub ${size}, %rsp",
        "mov %rdi, {ints}(%rsp)",
        "mov %rsi, {ints}+8(%rsp)",
        "mov %rdx, {ints}+16(%rsp)",
        "mov %rcx, {ints}+24(%rsp)",
        "mov %r8, {ints}+32(%rsp)",
        "mov %r9, {ints}+40(%rsp)",
        "movq %xmm0, {floats}(%rsp)",
        "movq %xmm1, {floats}+8(%rsp)",
        "movq %xmm2, {floats}+16(%rsp)",
        "movq %xmm3, {floats}+24(%rsp)",
        "movq %xmm4, {floats}+32(%rsp)",
        "movq %xmm5, {floats}+40(%rsp)",
        "movq %xmm6, {floats}+48(%rsp)",
        "movq %xmm7, {floats}+56(%rsp)",
        // first stack argument sits above the saved rbp and return address
        "lea 16(%rbp), %rax",
        "mov %rax, {stack}(%rsp)",
        "mov %r10, %rdi",
        "mov %rsp, %rsi",
        "call {dispatch}",
        "mov {ret_int}(%rsp), %rax",
        "mov {ret_int}+8(%rsp), %rdx",
        "movq {ret_float}(%rsp), %xmm0",
        "movq {ret_float}+8(%rsp), %xmm1",
        "mov %rbp, %rsp",
        "pop %rbp",
        "ret",
        size = const cb::SIZE,
        ints = const cb::INTS,
        floats = const cb::FLOATS,
        stack = const cb::STACK,
        ret_int = const cb::RET_INT,
        ret_float = const cb::RET_FLOAT,
        dispatch = sym dispatch,
        options(att_syntax)
    )
}

/// `CALLBACK_CAPACITY` entries, one every `TRAMPOLINE_STRIDE` bytes:
///
/// ```text
/// endbr64
/// movl $index, %r10d      ; 41 ba imm32
/// jmp  callback_entry
/// ```
///
/// Never called directly; only its address is taken.
#[unsafe(naked)]
unsafe extern "C" fn trampoline_table() {
    naked_asm!(
        ".balign {stride}",
        ".set freecall_trampoline_slot, 0",
        ".rept {count}",
        ".balign {stride}",
        ".byte 0xf3, 0x0f, 0x1e, 0xfa",
        ".byte 0x41, 0xba",
        ".long freecall_trampoline_slot",
        "jmp {entry}",
        ".set freecall_trampoline_slot, freecall_trampoline_slot + 1",
        ".endr",
        stride = const TRAMPOLINE_STRIDE,
        count = const CALLBACK_CAPACITY,
        entry = sym callback_entry,
        options(att_syntax)
    )
}

/// Address of trampoline entry 0 (the table's first `.balign` boundary)
pub(super) fn trampoline_base() -> usize {
    let start = trampoline_table as *const () as usize;
    (start + TRAMPOLINE_STRIDE - 1) & !(TRAMPOLINE_STRIDE - 1)
}
