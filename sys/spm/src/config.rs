// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static sizing and the configuration `Spm::init` consumes.

use abi::{IrqDesc, PartitionDesc, ServiceDesc};

use crate::umem::MemoryMap;

/// Partitions in the image, counting the non-secure one.
pub const MAX_PARTITIONS: usize = 16;
/// One thread per partition.
pub const MAX_THREADS: usize = MAX_PARTITIONS;
pub const MAX_SERVICES: usize = 28;
pub const MAX_CONN_HANDLES: usize = 8;
pub const MAX_MESSAGES: usize = 32;
pub const MAX_IRQS: usize = 16;
/// Non-secure client contexts.
pub const MAX_NS_CLIENTS: usize = 8;

/// Everything the manager is built from.
#[derive(Clone, Debug)]
pub struct SpmConfig {
    pub partitions: &'static [PartitionDesc],
    pub services: &'static [ServiceDesc],
    pub irqs: &'static [IrqDesc],
    pub memory: MemoryMap,
    /// Connection records put into service; at most `MAX_CONN_HANDLES`.
    pub conn_handles: usize,
    /// Message records put into service; at most `MAX_MESSAGES`.
    pub messages: usize,
}

impl SpmConfig {
    /// A configuration with every pool at full size.
    pub fn new(
        partitions: &'static [PartitionDesc],
        services: &'static [ServiceDesc],
        irqs: &'static [IrqDesc],
        memory: MemoryMap,
    ) -> Self {
        Self {
            partitions,
            services,
            irqs,
            memory,
            conn_handles: MAX_CONN_HANDLES,
            messages: MAX_MESSAGES,
        }
    }
}
