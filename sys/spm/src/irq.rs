// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupts delivered to partitions as signals.
//!
//! When a bound interrupt fires, the line is masked and its signal raised on
//! the owning partition. The line stays masked until the partition
//! acknowledges with `eoi`.

use abi::IrqDesc;

use crate::arch;
use crate::err::Fatal;
use crate::fail::die;
use crate::spm::Spm;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Irq(u32),
}

ringbuf::ringbuf!(Trace, 16, Trace::None);

/// Entry point for the vector of any partition-bound interrupt.
pub fn handle_irq(spm: &mut Spm, line: u32) {
    ringbuf::ringbuf_entry!(Trace::Irq(line));
    let Some(desc) = spm.irqs.iter().find(|d| d.irq == line) else {
        die(Fatal::UnknownIrq(line));
    };
    let Some(index) = spm.partition_index(desc.partition_id) else {
        die(Fatal::NoSuchPartition(desc.partition_id));
    };
    arch::disable_irq(line);
    spm.assert_signal(index, desc.signal);
}

/// Finds the interrupt behind `signal` of partition `partition_id`.
pub fn irq_for_signal(
    irqs: &'static [IrqDesc],
    partition_id: i32,
    signal: u32,
) -> Option<&'static IrqDesc> {
    irqs.iter()
        .find(|d| d.partition_id == partition_id && d.signal == signal)
}
