//! x86-64 Architecture Implementation
//!
//! System V AMD64 calling convention (Linux, macOS, BSD).
//!
//! # Register Usage
//!
//! | Role | Registers | Notes |
//! |------|-----------|-------|
//! | Integer arguments | rdi, rsi, rdx, rcx, r8, r9 | Independent counter |
//! | Float arguments | xmm0 - xmm7 | Independent counter |
//! | Integer result | rax, rdx | |
//! | Float result | xmm0, xmm1 | |
//! | Vector count (variadic) | al | Upper bound on xmm registers used |
//! | Trampoline index | r10 | Scratch, not an argument register |
//!
//! Stack arguments occupy 8-byte slots, pushed in declaration order, with
//! `rsp` 16-byte aligned at the `call`.

#[cfg(target_arch = "x86_64")]
mod asm;

use super::{AbiProfile, CallingConvention, StackPacking, VariadicRule, MAX_STACK_WORDS};

/// System V AMD64 profile
pub const SYSV_AMD64: AbiProfile = AbiProfile {
    convention: CallingConvention::SysVAmd64,
    int_arg_registers: &["rdi", "rsi", "rdx", "rcx", "r8", "r9"],
    float_arg_registers: &[
        "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
    ],
    int_return_registers: &["rax", "rdx"],
    float_return_registers: &["xmm0", "xmm1"],
    stack_slot_size: 8,
    stack_alignment: 16,
    stack_packing: StackPacking::Slots,
    variadic: VariadicRule::FloatRegistersWithCount,
    max_stack_words: MAX_STACK_WORDS,
    struct_by_value: false,
};

/// x86-64 architecture implementation
pub struct X86_64;

#[cfg(target_arch = "x86_64")]
impl super::Architecture for X86_64 {
    const NAME: &'static str = "x86_64";
    const POINTER_SIZE: usize = 8;
    const LITTLE_ENDIAN: bool = true;

    fn profile() -> &'static AbiProfile {
        &SYSV_AMD64
    }

    unsafe fn invoke(frame: *mut super::CallFrame) {
        asm::invoke(frame)
    }

    fn trampoline_base() -> usize {
        asm::trampoline_base()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysv_register_files() {
        assert_eq!(SYSV_AMD64.int_register_count(), 6);
        assert_eq!(SYSV_AMD64.float_register_count(), 8);
        assert_eq!(SYSV_AMD64.int_arg_registers[0], "rdi");
        assert_eq!(SYSV_AMD64.int_return_registers[0], "rax");
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_trampoline_base_aligned() {
        use crate::arch::{Architecture, TRAMPOLINE_STRIDE};
        assert_eq!(X86_64::trampoline_base() % TRAMPOLINE_STRIDE, 0);
    }
}
