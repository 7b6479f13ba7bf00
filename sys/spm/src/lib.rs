// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Secure Partition Manager IPC core.
//!
//! This crate is the part of the secure image that isolates partitions from
//! each other and from the non-secure world, and carries PSA client/service
//! messages between them. It runs only in trap context: the platform's
//! vectors call in through `svc::syscall_entry` (for the SVC trap),
//! `Spm::schedule` (for the reschedule exception) and `irq::handle_irq`, and
//! the platform's boot code calls `startup::spm_init` once.
//!
//! Nothing here is preemptive. A thread gives up the CPU only by blocking in
//! a trap, by exiting, or when a trap wakes something more important, so
//! every structure in the manager is mutated by one logical owner at a time
//! and none of them need locks. That holds on one core only; a multi-core
//! port would need a lock around every entry point.
//!
//! Hosted builds swap the hardware primitives in `arch` for a fake, so the
//! whole manager can be driven from tests.

#![cfg_attr(target_os = "none", no_std)]

pub mod arch;
pub mod config;
pub mod err;
pub mod event;
pub mod fail;
pub mod irq;
pub mod list;
pub mod msgq;
pub mod nspm;
pub mod pool;
pub mod spm;
pub mod startup;
pub mod svc;
pub mod thread;
pub mod umem;
