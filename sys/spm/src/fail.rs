// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording SPM failures such that they can be found by tooling.
//!
//! This module defines the following binary interface to debuggers:
//!
//! - `spm::fail::SPM_HAS_FAILED` is a `bool`. It is cleared to zero (false)
//!   at boot, and set to one (true) if the manager reaches the `die`
//!   function (either explicitly or as a result of a `panic!`).
//!
//! - `spm::fail::SPM_EPITAPH` is an array of `u8`. The `die` routine writes as
//!   much of the failure reason into this buffer (as UTF-8) as possible,
//!   truncating if the buffer fills. For printing, trim off any trailing NUL
//!   bytes.
//!
//! A fatal condition halts the whole secure image: interrupts stay as they
//! are and the core spins. On hosted builds there is no image to halt, so
//! `die` panics with the reason instead, and tests observe it that way.

use crate::err::Fatal;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Died(Fatal),
}

ringbuf::ringbuf!(Trace, 4, Trace::None);

/// Halts the image with `why` as the reason.
#[inline(always)]
pub fn die(why: Fatal) -> ! {
    ringbuf::ringbuf_entry!(Trace::Died(why));
    die_impl(&why)
}

#[cfg(not(target_os = "none"))]
#[inline(never)]
fn die_impl(msg: &dyn core::fmt::Display) -> ! {
    panic!("spm fatal: {msg}")
}

#[cfg(target_os = "none")]
use self::epitaph::die_impl;

#[cfg(target_os = "none")]
mod epitaph {
    use core::fmt::{Display, Write};
    use core::sync::atomic::Ordering;

    /// Flag that gets set to `true` by all failure reporting functions,
    /// giving tools a one-stop-shop for triage.
    #[used]
    static mut SPM_HAS_FAILED: bool = false;

    const EPITAPH_LEN: usize = 128;

    /// Records up to `EPITAPH_LEN` bytes of description of the event that
    /// caused the manager to fail, padded with NULs.
    #[used]
    static mut SPM_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

    fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
        // Safety: the manager runs on one core with no reentrancy into this
        // path except through a recursive failure, which is caught below.
        let previous_fail = unsafe {
            core::ptr::replace(core::ptr::addr_of_mut!(SPM_HAS_FAILED), true)
        };
        if previous_fail {
            // Recursive failure. Panicking again would only make it worse.
            loop {
                core::sync::atomic::fence(Ordering::SeqCst);
            }
        }

        // Safety: only one execution of this function gets past the flag.
        unsafe { &mut *core::ptr::addr_of_mut!(SPM_EPITAPH) }
    }

    #[inline(never)]
    pub fn die_impl(msg: &dyn Display) -> ! {
        let buf = begin_epitaph();
        let mut writer = Eulogist { dest: buf };
        write!(writer, "{msg}").ok();

        loop {
            // Platform-independent NOP
            core::sync::atomic::fence(Ordering::SeqCst);
        }
    }

    struct Eulogist {
        dest: &'static mut [u8],
    }

    impl Write for Eulogist {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let s = s.as_bytes();
            let n = s.len().min(self.dest.len());
            let (dest, leftovers) = {
                let taken = core::mem::take(&mut self.dest);
                taken.split_at_mut(n)
            };
            dest.copy_from_slice(&s[..n]);
            self.dest = leftovers;
            Ok(())
        }
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
        die_impl(info)
    }
}
