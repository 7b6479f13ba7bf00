// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! The register snapshot is the same shape everywhere: the trap entry
//! assembly (an external collaborator) deposits the complete user register
//! file into a `SavedState` before calling into the manager, and loads it back
//! on the way out. Only the primitives that poke hardware differ, and those
//! live in a nested module picked below and `pub use`-d into this one.
//!
//! For this to work, each architecture support module must define the same set
//! of names.

use crate::thread::ArchState;

/// EXC_RETURN bit 6: set when the interrupted context used the secure stack.
pub const EXC_RETURN_S: usize = 1 << 6;
/// EXC_RETURN bit 4: clear when the hardware stacked an extended
/// floating-point frame.
pub const EXC_RETURN_FTYPE: usize = 1 << 4;

/// Return to secure thread mode on the process stack, basic frame.
pub const EXC_RETURN_THREAD_S_PSP: usize = 0xFFFF_FFFD;
/// Return to non-secure thread mode on the process stack, basic frame.
pub const EXC_RETURN_THREAD_NS_PSP: usize = 0xFFFF_FFBD;

/// Initial xPSR for a fresh thread: just the Thumb bit.
const INITIAL_PSR: usize = 1 << 24;

/// Words the hardware stacks on exception entry without floating point.
pub const BASIC_FRAME_WORDS: usize = 8;
/// Words the hardware stacks with an extended floating-point frame.
pub const EXTENDED_FRAME_WORDS: usize = 26;

/// Register state of a thread that isn't on the CPU, and the live register
/// state of the one that is while we're handling its trap.
///
/// `sp` holds the process stack pointer *after* the hardware pushed its
/// exception frame, so arguments the caller pushed before trapping start at
/// `sp + BASIC_FRAME_WORDS` (or `EXTENDED_FRAME_WORDS`) words.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct SavedState {
    // NOTE: the following fields must be kept contiguous and in this order;
    // the trap entry assembly stores them with a single stm.
    pub r0: usize,
    pub r1: usize,
    pub r2: usize,
    pub r3: usize,
    pub r12: usize,
    pub lr: usize,
    pub pc: usize,
    pub xpsr: usize,
    pub r4: usize,
    pub r5: usize,
    pub r6: usize,
    pub r7: usize,
    pub r8: usize,
    pub r9: usize,
    pub r10: usize,
    pub r11: usize,
    pub sp: usize,
    pub sp_limit: usize,
    pub exc_return: usize,
}

impl ArchState for SavedState {
    fn arg0(&self) -> usize {
        self.r0
    }
    fn arg1(&self) -> usize {
        self.r1
    }
    fn arg2(&self) -> usize {
        self.r2
    }
    fn arg3(&self) -> usize {
        self.r3
    }

    fn ret0(&mut self, x: usize) {
        self.r0 = x;
    }

    fn stack_pointer(&self) -> usize {
        self.sp
    }

    fn exc_return(&self) -> usize {
        self.exc_return
    }

    fn init_context(
        &mut self,
        entry: usize,
        arg: usize,
        stack_top: usize,
        stack_limit: usize,
        non_secure: bool,
    ) {
        // Everything not named here starts out zero, so nothing leaks from
        // whoever used this slot before.
        *self = Self {
            r0: arg,
            pc: entry,
            xpsr: INITIAL_PSR,
            sp: stack_top,
            sp_limit: stack_limit,
            exc_return: if non_secure {
                EXC_RETURN_THREAD_NS_PSP
            } else {
                EXC_RETURN_THREAD_S_PSP
            },
            ..Self::default()
        };
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        pub mod arm_m;
        pub use arm_m::*;
    } else {
        pub mod fake;
        pub use fake::*;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_context_zeroes_everything_else() {
        let mut s = SavedState {
            r4: 0xdead,
            r12: 0xbeef,
            ..SavedState::default()
        };
        s.init_context(0x1000, 7, 0x2000, 0x1800, false);
        assert_eq!(s.r0, 7);
        assert_eq!(s.pc, 0x1000);
        assert_eq!(s.sp, 0x2000);
        assert_eq!(s.sp_limit, 0x1800);
        assert_eq!(s.r4, 0);
        assert_eq!(s.r12, 0);
        assert!(!s.caller_is_non_secure());
        assert!(!s.has_extended_frame());
    }

    #[test]
    fn non_secure_context_clears_s_bit() {
        let mut s = SavedState::default();
        s.init_context(0x1000, 0, 0x2000, 0x1800, true);
        assert!(s.caller_is_non_secure());
        s.exc_return &= !EXC_RETURN_FTYPE;
        assert!(s.has_extended_frame());
    }
}
