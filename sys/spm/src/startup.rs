// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manager startup, and the one place the manager's state lives.

use static_cell::StaticCell;

use crate::config::SpmConfig;
use crate::err::Fatal;
use crate::fail::die;
use crate::spm::Spm;

// Generated by build.rs from the partition, service and interrupt tables.
include!(concat!(env!("OUT_DIR"), "/spm_config.rs"));

/// The manager. Empty until `spm_init`.
///
/// Only ever borrowed from trap context. The platform must configure the SVC,
/// PendSV and partition interrupt vectors at one priority so that they never
/// nest; a nested entry is fatal.
static SPM: StaticCell<Option<Spm>> = StaticCell::new(None);

/// Builds the manager from the generated tables and the platform's memory
/// map.
///
/// Call once, after isolation hardware is set up and before
/// `start_scheduler`.
pub fn spm_init() {
    let config = SpmConfig::new(
        &SPM_PARTITIONS,
        &SPM_SERVICES,
        &SPM_IRQS,
        crate::arch::memory_map(),
    );
    install(Spm::init(&config));
}

/// Installs an already-built manager. For platforms that assemble their
/// configuration at runtime.
pub fn install(spm: Spm) {
    let Some(mut slot) = SPM.try_borrow_mut() else {
        die(Fatal::Reentered);
    };
    if slot.is_some() {
        die(Fatal::AlreadyInitialized);
    }
    *slot = Some(spm);
}

/// Hands the CPU to the non-secure thread once the first reschedule runs.
pub fn start_scheduler() {
    with_spm(Spm::start_scheduler);
}

/// Runs `body` with exclusive access to the manager.
pub fn with_spm<R>(body: impl FnOnce(&mut Spm) -> R) -> R {
    let Some(mut slot) = SPM.try_borrow_mut() else {
        die(Fatal::Reentered);
    };
    match slot.as_mut() {
        Some(spm) => body(spm),
        None => die(Fatal::NotInitialized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These share the one static, so they only look at it without
    // initializing it.

    #[test]
    #[should_panic(expected = "spm not initialized")]
    fn entry_before_init_is_fatal() {
        with_spm(|_| ());
    }

    #[test]
    fn generated_tables_are_consistent() {
        for s in SPM_SERVICES.iter() {
            assert!(SPM_PARTITIONS.iter().any(|p| p.id == s.partition_id));
            assert!(kerncore::is_single_signal(s.signal));
        }
        for i in SPM_IRQS.iter() {
            assert!(SPM_PARTITIONS.iter().any(|p| p.id == i.partition_id));
        }
    }
}
