// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hosted stand-in for the Armv8-M primitives.
//!
//! Instead of poking the NVIC and CONTROL, this records what would have
//! happened in per-thread state so tests running in parallel don't see each
//! other, and offers a few hooks for tests to look at it.

use std::cell::RefCell;
use std::collections::BTreeSet;

use crate::umem::MemoryMap;

#[derive(Default)]
struct FakeCpu {
    enabled: BTreeSet<u32>,
    pending: BTreeSet<u32>,
    unprivileged: bool,
    pendsv_count: usize,
    memory: Option<MemoryMap>,
}

std::thread_local! {
    static CPU: RefCell<FakeCpu> = RefCell::new(FakeCpu::default());
}

fn with_cpu<R>(body: impl FnOnce(&mut FakeCpu) -> R) -> R {
    CPU.with(|c| body(&mut c.borrow_mut()))
}

/// Arms the reschedule exception.
pub fn pend_reschedule() {
    with_cpu(|c| c.pendsv_count += 1);
}

pub fn enable_irq(line: u32) {
    with_cpu(|c| {
        c.enabled.insert(line);
    });
}

pub fn disable_irq(line: u32) {
    with_cpu(|c| {
        c.enabled.remove(&line);
    });
}

pub fn clear_pending_irq(line: u32) {
    with_cpu(|c| {
        c.pending.remove(&line);
    });
}

/// Sets whether thread mode runs privileged after the next exception return.
pub fn set_thread_privilege(privileged: bool) {
    with_cpu(|c| c.unprivileged = !privileged);
}

/// Region boundaries the platform would take from the linker.
///
/// Hosted builds have no linker script; tests install a map with
/// `install_memory_map` first.
pub fn memory_map() -> MemoryMap {
    with_cpu(|c| c.memory.clone().unwrap_or(MemoryMap::EMPTY))
}

/// Test hook: installs the map `memory_map` returns on this thread.
pub fn install_memory_map(map: MemoryMap) {
    with_cpu(|c| c.memory = Some(map));
}

/// Test hook: marks `line` pending, as if the device raised it.
pub fn raise_irq(line: u32) {
    with_cpu(|c| {
        c.pending.insert(line);
    });
}

/// Test hook: checks whether `line` is enabled.
pub fn irq_enabled(line: u32) -> bool {
    with_cpu(|c| c.enabled.contains(&line))
}

/// Test hook: checks whether `line` is pending.
pub fn irq_pending(line: u32) -> bool {
    with_cpu(|c| c.pending.contains(&line))
}

/// Test hook: reports the privilege the next thread would run with.
pub fn thread_privileged() -> bool {
    with_cpu(|c| !c.unprivileged)
}

/// Test hook: number of times a reschedule has been armed on this thread.
pub fn reschedules_pended() -> usize {
    with_cpu(|c| c.pendsv_count)
}
