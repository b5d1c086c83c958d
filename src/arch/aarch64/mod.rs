//! AArch64 (ARM64) Architecture Implementation
//!
//! Two profiles share the same register files and differ only in how the
//! stack is used:
//!
//! - **AAPCS64** (Linux, BSD): stack arguments in 8-byte slots; variadic
//!   arguments are classified exactly like fixed ones.
//! - **Apple ARM64** (macOS, iOS): stack arguments packed at their natural
//!   size and alignment; every variadic argument goes to the stack in an
//!   8-byte slot, floats included.
//!
//! # Register Usage
//!
//! | Role | Registers |
//! |------|-----------|
//! | Integer arguments | x0 - x7 |
//! | Float arguments | v0 - v7 (d/s views) |
//! | Integer result | x0, x1 |
//! | Float result | v0, v1 |
//! | Trampoline index | x9 (temporary; x16/x17 may be clobbered by linker veneers) |

#[cfg(target_arch = "aarch64")]
mod asm;

use super::{AbiProfile, CallingConvention, StackPacking, VariadicRule, MAX_STACK_WORDS};

const INT_ARGS: &[&str] = &["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"];
const FLOAT_ARGS: &[&str] = &["v0", "v1", "v2", "v3", "v4", "v5", "v6", "v7"];

/// Standard AAPCS64 profile
pub const AAPCS64: AbiProfile = AbiProfile {
    convention: CallingConvention::Aapcs64,
    int_arg_registers: INT_ARGS,
    float_arg_registers: FLOAT_ARGS,
    int_return_registers: &["x0", "x1"],
    float_return_registers: &["v0", "v1"],
    stack_slot_size: 8,
    stack_alignment: 16,
    stack_packing: StackPacking::Slots,
    variadic: VariadicRule::SameAsFixed,
    max_stack_words: MAX_STACK_WORDS,
    struct_by_value: false,
};

/// Apple's ARM64 profile
pub const APPLE_ARM64: AbiProfile = AbiProfile {
    convention: CallingConvention::AppleArm64,
    int_arg_registers: INT_ARGS,
    float_arg_registers: FLOAT_ARGS,
    int_return_registers: &["x0", "x1"],
    float_return_registers: &["v0", "v1"],
    stack_slot_size: 8,
    stack_alignment: 16,
    stack_packing: StackPacking::Natural,
    variadic: VariadicRule::StackOnly,
    max_stack_words: MAX_STACK_WORDS,
    struct_by_value: false,
};

/// AArch64 architecture implementation
pub struct AArch64;

#[cfg(target_arch = "aarch64")]
impl super::Architecture for AArch64 {
    const NAME: &'static str = "aarch64";
    const POINTER_SIZE: usize = 8;
    const LITTLE_ENDIAN: bool = true;

    fn profile() -> &'static AbiProfile {
        #[cfg(target_vendor = "apple")]
        {
            &APPLE_ARM64
        }
        #[cfg(not(target_vendor = "apple"))]
        {
            &AAPCS64
        }
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
    fn test_profiles_share_register_files() {
        assert_eq!(AAPCS64.int_register_count(), 8);
        assert_eq!(APPLE_ARM64.float_register_count(), 8);
        assert_eq!(AAPCS64.stack_packing, StackPacking::Slots);
        assert_eq!(APPLE_ARM64.stack_packing, StackPacking::Natural);
        assert_eq!(APPLE_ARM64.variadic, VariadicRule::StackOnly);
    }
}
