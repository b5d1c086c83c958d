//! Architecture Abstraction Module
//!
//! Static calling-convention tables and the per-architecture machine code that
//! moves values between a [`CallFrame`]/[`CallbackFrame`] and real registers.
//!
//! # Supported Targets
//!
//! | Architecture | OS | Profile |
//! |--------------|----|---------|
//! | x86-64 | Linux, macOS, BSD | System V AMD64 |
//! | ARM64 (AArch64) | Linux, BSD | AAPCS64 |
//! | ARM64 (AArch64) | macOS, iOS | Apple ARM64 (AAPCS64 variant) |
//!
//! The profile is picked by `cfg` when the crate is built. There is no
//! runtime switch; building for any other target is a compile error.
//!
//! # Architecture Abstraction
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Architecture Trait                       │
//! │  const NAME / POINTER_SIZE / LITTLE_ENDIAN                  │
//! │  fn profile() -> &AbiProfile                                │
//! │  unsafe fn invoke(frame: *mut CallFrame)                    │
//! │  fn trampoline_base() -> usize                              │
//! └────────────┬───────────────────────┬────────────────────────┘
//!              │                       │
//!       ┌──────┴───────┐        ┌──────┴───────┐
//!       │   X86_64     │        │   AArch64    │
//!       └──────────────┘        └──────────────┘
//! ```

pub mod aarch64;
pub mod x86_64;

use std::fmt;
use std::mem::{offset_of, size_of};

pub use aarch64::AArch64;
pub use x86_64::X86_64;

/// Upper bound on integer argument registers across all profiles
pub const MAX_INT_REGISTERS: usize = 8;

/// Upper bound on float argument registers across all profiles
pub const MAX_FLOAT_REGISTERS: usize = 8;

/// Stack words a single call may pass (256 bytes of stack arguments)
pub const MAX_STACK_WORDS: usize = 32;

/// Byte distance between consecutive trampoline entry points
pub const TRAMPOLINE_STRIDE: usize = 16;

/// Calling convention for function calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// System V AMD64 ABI (Linux, macOS, BSD)
    SysVAmd64,
    /// ARM64 AAPCS (Procedure Call Standard)
    Aapcs64,
    /// Apple's AAPCS64 variant (packed stack arguments, variadics on the stack)
    AppleArm64,
}

impl CallingConvention {
    /// The static table describing this convention
    pub fn profile(&self) -> &'static AbiProfile {
        match self {
            CallingConvention::SysVAmd64 => &x86_64::SYSV_AMD64,
            CallingConvention::Aapcs64 => &aarch64::AAPCS64,
            CallingConvention::AppleArm64 => &aarch64::APPLE_ARM64,
        }
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallingConvention::SysVAmd64 => write!(f, "sysv-amd64"),
            CallingConvention::Aapcs64 => write!(f, "aapcs64"),
            CallingConvention::AppleArm64 => write!(f, "apple-arm64"),
        }
    }
}

/// How arguments that spill past the registers are laid out on the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPacking {
    /// Every argument occupies one full slot of `stack_slot_size` bytes
    Slots,
    /// Arguments take their natural size and alignment (Apple ARM64)
    Natural,
}

/// How variadic arguments are classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariadicRule {
    /// Same registers as fixed arguments; the caller also reports how many
    /// vector registers it used (`al` on SysV AMD64)
    FloatRegistersWithCount,
    /// Variadic arguments are indistinguishable from fixed ones
    SameAsFixed,
    /// Every variadic argument goes to the stack in full slots
    StackOnly,
}

/// Static description of one calling convention
#[derive(Debug, Clone, Copy)]
pub struct AbiProfile {
    pub convention: CallingConvention,
    /// Integer argument registers, in assignment order
    pub int_arg_registers: &'static [&'static str],
    /// Floating-point argument registers, in assignment order
    pub float_arg_registers: &'static [&'static str],
    /// Integer result registers (low word first)
    pub int_return_registers: &'static [&'static str],
    /// Floating-point result registers
    pub float_return_registers: &'static [&'static str],
    /// Size of one stack argument slot in bytes
    pub stack_slot_size: usize,
    /// Stack pointer alignment required at the call instruction
    pub stack_alignment: usize,
    pub stack_packing: StackPacking,
    pub variadic: VariadicRule,
    /// Largest stack argument area the call routine will copy, in words
    pub max_stack_words: usize,
    /// Whether aggregates may be passed or returned by value
    pub struct_by_value: bool,
}

impl AbiProfile {
    pub fn int_register_count(&self) -> usize {
        self.int_arg_registers.len()
    }

    pub fn float_register_count(&self) -> usize {
        self.float_arg_registers.len()
    }
}

/// Register image for one outgoing call.
///
/// Filled by the forward call engine, consumed by [`Architecture::invoke`],
/// which also writes the result registers back.
#[repr(C)]
#[derive(Debug)]
pub struct CallFrame {
    /// Address of the native function
    pub target: usize,
    pub ints: [u64; MAX_INT_REGISTERS],
    pub floats: [u64; MAX_FLOAT_REGISTERS],
    /// Number of valid words in `stack`
    pub stack_words: usize,
    /// Vector registers in use, loaded into `al` on SysV AMD64
    pub float_count: u64,
    pub ret_int: [u64; 2],
    pub ret_float: [u64; 2],
    pub stack: [u64; MAX_STACK_WORDS],
}

impl CallFrame {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            ints: [0; MAX_INT_REGISTERS],
            floats: [0; MAX_FLOAT_REGISTERS],
            stack_words: 0,
            float_count: 0,
            ret_int: [0; 2],
            ret_float: [0; 2],
            stack: [0; MAX_STACK_WORDS],
        }
    }
}

/// Field offsets of [`CallFrame`] used as assembler constants
pub(crate) mod call_frame {
    use super::*;

    pub const TARGET: usize = offset_of!(CallFrame, target);
    pub const INTS: usize = offset_of!(CallFrame, ints);
    pub const FLOATS: usize = offset_of!(CallFrame, floats);
    pub const STACK_WORDS: usize = offset_of!(CallFrame, stack_words);
    pub const FLOAT_COUNT: usize = offset_of!(CallFrame, float_count);
    pub const RET_INT: usize = offset_of!(CallFrame, ret_int);
    pub const RET_FLOAT: usize = offset_of!(CallFrame, ret_float);
    pub const STACK: usize = offset_of!(CallFrame, stack);
}

/// Register image captured by a trampoline on entry.
///
/// Lives on the trampoline's own stack frame; the dispatcher reads the
/// argument registers and fills in the result registers.
#[repr(C)]
#[derive(Debug)]
pub struct CallbackFrame {
    pub ints: [u64; MAX_INT_REGISTERS],
    pub floats: [u64; MAX_FLOAT_REGISTERS],
    /// Address of the first stack-passed argument in the caller's frame
    pub stack: *const u8,
    pub ret_int: [u64; 2],
    pub ret_float: [u64; 2],
}

/// Field offsets and the 16-byte aligned size of [`CallbackFrame`]
pub(crate) mod callback_frame {
    use super::*;

    pub const INTS: usize = offset_of!(CallbackFrame, ints);
    pub const FLOATS: usize = offset_of!(CallbackFrame, floats);
    pub const STACK: usize = offset_of!(CallbackFrame, stack);
    pub const RET_INT: usize = offset_of!(CallbackFrame, ret_int);
    pub const RET_FLOAT: usize = offset_of!(CallbackFrame, ret_float);
    pub const SIZE: usize = (size_of::<CallbackFrame>() + 15) & !15;
}

/// Trait for CPU architecture implementations
pub trait Architecture: Sized {
    /// Architecture name (e.g., "x86_64", "aarch64")
    const NAME: &'static str;

    /// Pointer size in bytes
    const POINTER_SIZE: usize;

    /// Whether the architecture is little-endian
    const LITTLE_ENDIAN: bool;

    /// Calling convention of the build target
    fn profile() -> &'static AbiProfile;

    /// Load the frame's registers and stack words, call `frame.target` and
    /// store the result registers back into the frame.
    ///
    /// # Safety
    ///
    /// `frame.target` must be a function whose real signature matches the
    /// values placed in the frame. Nothing protects the process from the
    /// callee's behavior.
    unsafe fn invoke(frame: *mut CallFrame);

    /// Address of trampoline entry 0; entry `i` is at
    /// `trampoline_base() + i * TRAMPOLINE_STRIDE`
    fn trampoline_base() -> usize;
}

#[cfg(all(target_arch = "x86_64", unix))]
pub type NativeArch = X86_64;

#[cfg(all(target_arch = "aarch64", unix))]
pub type NativeArch = AArch64;

#[cfg(not(any(
    all(target_arch = "x86_64", unix),
    all(target_arch = "aarch64", unix)
)))]
compile_error!("freecall supports x86_64 and aarch64 on unix-like targets only");

/// The calling convention every stub and trampoline in this build uses
pub fn host_profile() -> &'static AbiProfile {
    NativeArch::profile()
}

/// Name of the build target architecture
pub fn detect_arch() -> &'static str {
    NativeArch::NAME
}
