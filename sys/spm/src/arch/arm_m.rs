// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Armv8-M mainline support.
//!
//! The SVC, PendSV, and interrupt vectors themselves are assembly owned by
//! the platform: each saves the interrupted register file into a
//! `SavedState`, calls one of the `extern "C"` entry points below with a
//! pointer to it, and restores from the same `SavedState` on the way out.
//! Whatever is in the snapshot when the entry point returns is what runs
//! next.

use crate::arch::SavedState;
use crate::umem::{MemoryMap, Region, RegionName};

/// Arms PendSV. It fires once the current trap (and any chained ISRs)
/// returns, and runs `spm_pendsv_entry`.
pub fn pend_reschedule() {
    cortex_m::peripheral::SCB::set_pendsv();
}

pub fn enable_irq(line: u32) {
    // Enable the interrupt by poking the Interrupt Set Enable Register.
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    let reg_num = (line / 32) as usize;
    let bit_mask = 1 << (line % 32);
    if let Some(reg) = nvic.iser.get(reg_num) {
        unsafe { reg.write(bit_mask) }
    }
}

pub fn disable_irq(line: u32) {
    // Disable the interrupt by poking the Interrupt Clear Enable Register.
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    let reg_num = (line / 32) as usize;
    let bit_mask = 1 << (line % 32);
    if let Some(reg) = nvic.icer.get(reg_num) {
        unsafe { reg.write(bit_mask) }
    }
}

pub fn clear_pending_irq(line: u32) {
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    let reg_num = (line / 32) as usize;
    let bit_mask = 1 << (line % 32);
    if let Some(reg) = nvic.icpr.get(reg_num) {
        unsafe { reg.write(bit_mask) }
    }
}

/// Sets CONTROL.nPRIV for thread mode. Takes effect on exception return.
pub fn set_thread_privilege(privileged: bool) {
    let mut control = cortex_m::register::control::read();
    control.set_npriv(if privileged {
        cortex_m::register::control::Npriv::Privileged
    } else {
        cortex_m::register::control::Npriv::Unprivileged
    });
    // Safety: we're in handler mode, so this only affects thread mode after
    // we return, which is the point.
    unsafe { cortex_m::register::control::write(control) }
}

extern "C" {
    // Region bounds from the linker script. Each `_limit` is one past the
    // last byte.
    static __spm_ns_data_base: u8;
    static __spm_ns_data_limit: u8;
    static __spm_ns_code_base: u8;
    static __spm_ns_code_limit: u8;
    static __spm_heap_base: u8;
    static __spm_heap_limit: u8;
    static __spm_data_rw_base: u8;
    static __spm_data_rw_limit: u8;
    static __spm_data_zi_base: u8;
    static __spm_data_zi_limit: u8;
    static __spm_stack_base: u8;
    static __spm_stack_limit: u8;
    static __spm_scratch_base: u8;
    static __spm_scratch_limit: u8;
    static __spm_code_base: u8;
    static __spm_code_limit: u8;
}

macro_rules! linker_region {
    ($name:expr, $base:ident, $limit:ident) => {{
        // Safety: we only take the addresses of these symbols.
        let (b, l) = unsafe {
            (
                core::ptr::addr_of!($base) as usize,
                core::ptr::addr_of!($limit) as usize,
            )
        };
        Region::from_bounds($name, b, l)
    }};
}

/// Region boundaries as laid out by the linker.
pub fn memory_map() -> MemoryMap {
    MemoryMap {
        non_secure: [
            linker_region!(
                RegionName::NsData,
                __spm_ns_data_base,
                __spm_ns_data_limit
            ),
            linker_region!(
                RegionName::NsCode,
                __spm_ns_code_base,
                __spm_ns_code_limit
            ),
        ],
        secure: [
            linker_region!(RegionName::Heap, __spm_heap_base, __spm_heap_limit),
            linker_region!(
                RegionName::DataRw,
                __spm_data_rw_base,
                __spm_data_rw_limit
            ),
            linker_region!(
                RegionName::DataZi,
                __spm_data_zi_base,
                __spm_data_zi_limit
            ),
            linker_region!(
                RegionName::Stack,
                __spm_stack_base,
                __spm_stack_limit
            ),
            linker_region!(
                RegionName::Scratch,
                __spm_scratch_base,
                __spm_scratch_limit
            ),
            linker_region!(RegionName::Code, __spm_code_base, __spm_code_limit),
        ],
    }
}

/// Called by the SVC vector with the trap number decoded from the SVC
/// instruction.
#[no_mangle]
pub unsafe extern "C" fn spm_svc_entry(nr: u32, frame: *mut SavedState) {
    // Safety: the vector hands us its own snapshot, which nothing else
    // touches until we return.
    let frame = unsafe { &mut *frame };
    crate::startup::with_spm(|spm| crate::svc::syscall_entry(spm, nr, frame));
}

/// Called by the PendSV vector.
#[no_mangle]
pub unsafe extern "C" fn spm_pendsv_entry(frame: *mut SavedState) {
    // Safety: as above.
    let frame = unsafe { &mut *frame };
    crate::startup::with_spm(|spm| spm.schedule(frame));
}

/// Called by the vector of any interrupt bound to a partition signal.
#[no_mangle]
pub unsafe extern "C" fn spm_irq_entry(line: u32) {
    crate::startup::with_spm(|spm| crate::irq::handle_irq(spm, line));
}
