//! Argument Layout
//!
//! Assigns every parameter of a signature to a register or a stack offset
//! under one [`AbiProfile`]. The same layout drives both directions: the
//! forward engine writes arguments into a [`CallFrame`], the callback
//! dispatcher reads them out of a [`CallbackFrame`].
//!
//! # Rules
//!
//! 1. Parameters are classified left to right as integer or float class.
//! 2. Each class draws from its own register counter.
//! 3. Once a class runs out of registers its parameters spill to the stack
//!    in declaration order; with [`StackPacking::Slots`] each takes a full
//!    slot, with [`StackPacking::Natural`] it takes its natural size and
//!    alignment.
//! 4. Variadic arguments are promoted (`f32` to `f64`, small integers are
//!    always extended) and, under [`VariadicRule::StackOnly`], go straight
//!    to the stack in full slots.
//!
//! [`CallFrame`]: crate::arch::CallFrame
//! [`CallbackFrame`]: crate::arch::CallbackFrame

use crate::arch::{AbiProfile, CallFrame, CallbackFrame, StackPacking, VariadicRule};

use super::error::{FfiError, Result};
use super::types::{CallSignature, ParamKind, RegisterClass, ReturnKind};

/// Where one argument travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Integer argument register by index
    Int(u8),
    /// Float argument register by index
    Float(u8),
    /// Byte offset into the outgoing stack area and the bytes stored there
    Stack { offset: u32, size: u8 },
}

/// Placement of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub location: Location,
    /// `f32` passed as `f64` (variadic default promotion)
    pub promoted: bool,
}

/// Precomputed layout of one signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgLayout {
    placements: Vec<Placement>,
    stack_words: usize,
    float_count: usize,
}

impl ArgLayout {
    /// Compute the layout of `signature` under `profile`.
    ///
    /// Fails for aggregates, a variadic split past the end of the parameter
    /// list, or more stack words than the profile allows.
    pub fn compute(profile: &AbiProfile, signature: &CallSignature) -> Result<Self> {
        check_returns(profile, signature.returns())?;
        if signature.fixed_count() > signature.params().len() {
            return Err(FfiError::unsupported(
                "variadic",
                format!(
                    "{} fixed parameters declared but only {} listed",
                    signature.fixed_count(),
                    signature.params().len()
                ),
            ));
        }

        let slot = profile.stack_slot_size;
        let mut next_int = 0usize;
        let mut next_float = 0usize;
        let mut offset = 0usize;
        let mut placements = Vec::with_capacity(signature.params().len());

        for (index, kind) in signature.params().iter().enumerate() {
            let class = match kind.class() {
                Some(class) => class,
                None => {
                    return Err(FfiError::unsupported(
                        kind,
                        format!(
                            "parameter {index}: aggregates by value are not supported on {}",
                            profile.convention
                        ),
                    ))
                }
            };
            let variadic = signature.is_variadic_arg(index);
            let promoted = variadic && *kind == ParamKind::F32;

            let register = if variadic && profile.variadic == VariadicRule::StackOnly {
                None
            } else {
                match class {
                    RegisterClass::Integer if next_int < profile.int_register_count() => {
                        next_int += 1;
                        Some(Location::Int((next_int - 1) as u8))
                    }
                    RegisterClass::Float if next_float < profile.float_register_count() => {
                        next_float += 1;
                        Some(Location::Float((next_float - 1) as u8))
                    }
                    _ => None,
                }
            };

            let location = match register {
                Some(location) => location,
                None => {
                    let size = if variadic || profile.stack_packing == StackPacking::Slots {
                        slot
                    } else {
                        kind.size()
                    };
                    offset = align_up(offset, size.min(slot));
                    let location = Location::Stack {
                        offset: offset as u32,
                        size: size as u8,
                    };
                    offset += size;
                    location
                }
            };
            placements.push(Placement { location, promoted });
        }

        let stack_words = align_up(offset, 8) / 8;
        if stack_words > profile.max_stack_words {
            return Err(FfiError::unsupported(
                "stack",
                format!(
                    "{stack_words} stack words needed, {} allowed",
                    profile.max_stack_words
                ),
            ));
        }

        Ok(Self {
            placements,
            stack_words,
            float_count: next_float,
        })
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn stack_words(&self) -> usize {
        self.stack_words
    }

    /// Float registers in use, reported to variadic callees on SysV AMD64
    pub fn float_count(&self) -> usize {
        self.float_count
    }

    /// Store argument words into `frame` according to this layout
    pub(crate) fn write(&self, frame: &mut CallFrame, words: &[u64]) {
        debug_assert_eq!(words.len(), self.placements.len());
        for (placement, &word) in self.placements.iter().zip(words) {
            let word = if placement.promoted {
                (f32::from_bits(word as u32) as f64).to_bits()
            } else {
                word
            };
            match placement.location {
                Location::Int(i) => frame.ints[i as usize] = word,
                Location::Float(i) => frame.floats[i as usize] = word,
                Location::Stack { offset, size } => {
                    let bytes = word.to_le_bytes();
                    let offset = offset as usize;
                    let size = size as usize;
                    // SAFETY: compute() kept offset + size within stack_words
                    // words, which is at most MAX_STACK_WORDS.
                    unsafe {
                        let dst = frame.stack.as_mut_ptr().cast::<u8>().add(offset);
                        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, size);
                    }
                }
            }
        }
        frame.stack_words = self.stack_words;
        frame.float_count = self.float_count as u64;
    }

    /// Read the raw argument words a trampoline captured.
    ///
    /// # Safety
    ///
    /// `frame.stack` must point at the caller's stack arguments, laid out
    /// as this layout describes.
    pub(crate) unsafe fn read(&self, frame: &CallbackFrame, words: &mut [u64]) {
        for (placement, word) in self.placements.iter().zip(words.iter_mut()) {
            *word = match placement.location {
                Location::Int(i) => frame.ints[i as usize],
                Location::Float(i) => frame.floats[i as usize],
                Location::Stack { offset, size } => {
                    let mut bytes = [0u8; 8];
                    std::ptr::copy_nonoverlapping(
                        frame.stack.add(offset as usize),
                        bytes.as_mut_ptr(),
                        size as usize,
                    );
                    u64::from_le_bytes(bytes)
                }
            };
        }
    }
}

fn check_returns(profile: &AbiProfile, returns: ReturnKind) -> Result<()> {
    match returns {
        ReturnKind::Struct { .. } if !profile.struct_by_value => Err(FfiError::unsupported(
            returns,
            format!(
                "aggregates by value are not supported on {}",
                profile.convention
            ),
        )),
        _ => Ok(()),
    }
}

fn align_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        (value + align - 1) & !(align - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::aarch64::{AAPCS64, APPLE_ARM64};
    use crate::arch::x86_64::SYSV_AMD64;
    use ParamKind::*;

    fn locations(profile: &AbiProfile, sig: &CallSignature) -> Vec<Location> {
        ArgLayout::compute(profile, sig)
            .unwrap()
            .placements()
            .iter()
            .map(|p| p.location)
            .collect()
    }

    #[test]
    fn test_independent_register_counters() {
        let sig = CallSignature::new(vec![I32, F64, Pointer, F32], ReturnKind::Void);
        assert_eq!(
            locations(&SYSV_AMD64, &sig),
            vec![
                Location::Int(0),
                Location::Float(0),
                Location::Int(1),
                Location::Float(1)
            ]
        );
    }

    #[test]
    fn test_sysv_spills_seventh_integer() {
        let sig = CallSignature::new(vec![I64; 8], ReturnKind::I64);
        let layout = ArgLayout::compute(&SYSV_AMD64, &sig).unwrap();
        assert_eq!(
            layout.placements()[6].location,
            Location::Stack { offset: 0, size: 8 }
        );
        assert_eq!(
            layout.placements()[7].location,
            Location::Stack { offset: 8, size: 8 }
        );
        assert_eq!(layout.stack_words(), 2);

        // aarch64 has two more integer registers
        let layout = ArgLayout::compute(&AAPCS64, &sig).unwrap();
        assert_eq!(layout.stack_words(), 0);
    }

    #[test]
    fn test_apple_packs_stack_naturally() {
        let mut params = vec![I64; 8];
        params.extend([U8, I32, U16, I64]);
        let sig = CallSignature::new(params, ReturnKind::Void);

        let apple = locations(&APPLE_ARM64, &sig);
        assert_eq!(apple[8], Location::Stack { offset: 0, size: 1 });
        assert_eq!(apple[9], Location::Stack { offset: 4, size: 4 });
        assert_eq!(apple[10], Location::Stack { offset: 8, size: 2 });
        assert_eq!(apple[11], Location::Stack { offset: 16, size: 8 });

        let linux = locations(&AAPCS64, &sig);
        assert_eq!(linux[9], Location::Stack { offset: 8, size: 8 });
        assert_eq!(linux[11], Location::Stack { offset: 24, size: 8 });
    }

    #[test]
    fn test_variadic_rules() {
        let sig = CallSignature::variadic(vec![Text, F32, I32], ReturnKind::I32, 1);

        let sysv = ArgLayout::compute(&SYSV_AMD64, &sig).unwrap();
        assert_eq!(sysv.placements()[1].location, Location::Float(0));
        assert!(sysv.placements()[1].promoted);
        assert_eq!(sysv.float_count(), 1);

        let apple = ArgLayout::compute(&APPLE_ARM64, &sig).unwrap();
        assert_eq!(apple.placements()[0].location, Location::Int(0));
        assert_eq!(
            apple.placements()[1].location,
            Location::Stack { offset: 0, size: 8 }
        );
        assert_eq!(
            apple.placements()[2].location,
            Location::Stack { offset: 8, size: 8 }
        );
    }

    #[test]
    fn test_rejects_struct_and_bad_variadic_split() {
        let sig = CallSignature::new(vec![Struct { size: 16, align: 8 }], ReturnKind::Void);
        assert!(matches!(
            ArgLayout::compute(&SYSV_AMD64, &sig),
            Err(FfiError::UnsupportedSignature { .. })
        ));

        let sig = CallSignature::new(vec![], ReturnKind::Struct { size: 8, align: 8 });
        assert!(ArgLayout::compute(&AAPCS64, &sig).is_err());

        let sig = CallSignature::variadic(vec![I32], ReturnKind::Void, 3);
        assert!(ArgLayout::compute(&SYSV_AMD64, &sig).is_err());
    }

    #[test]
    fn test_stack_limit() {
        let sig = CallSignature::new(vec![I64; 6 + 32], ReturnKind::Void);
        assert_eq!(ArgLayout::compute(&SYSV_AMD64, &sig).unwrap().stack_words(), 32);

        let sig = CallSignature::new(vec![I64; 6 + 33], ReturnKind::Void);
        assert!(ArgLayout::compute(&SYSV_AMD64, &sig).is_err());
    }

    #[test]
    fn test_write_promotes_and_packs() {
        let mut params = vec![I64; 8];
        params.extend([U8, U16]);
        let sig = CallSignature::new(params, ReturnKind::Void);
        let layout = ArgLayout::compute(&APPLE_ARM64, &sig).unwrap();

        let mut words = vec![0u64; 8];
        words.extend([0xAB, 0xBEEF]);
        let mut frame = CallFrame::new(0);
        layout.write(&mut frame, &words);
        assert_eq!(frame.stack_words, 1);
        assert_eq!(frame.stack[0], 0xBEEF_00AB);

        let sig = CallSignature::variadic(vec![F32], ReturnKind::Void, 0);
        let layout = ArgLayout::compute(&SYSV_AMD64, &sig).unwrap();
        let mut frame = CallFrame::new(0);
        layout.write(&mut frame, &[1.5f32.to_bits() as u64]);
        assert_eq!(f64::from_bits(frame.floats[0]), 1.5);
        assert_eq!(frame.float_count, 1);
    }
}
