// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace buffers for the partition manager.
//!
//! The manager has no console, so each module keeps a small static ring of
//! recent events instead, read back from a halted target with a debugger
//! (`print spm::svc::__RINGBUF`). A module declares an enum of what it
//! records and one buffer for it:
//!
//! ```
//! # use ringbuf::{ringbuf, ringbuf_entry};
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     None,
//!     Connect { sid: u32 },
//!     Reply(i32),
//! }
//!
//! ringbuf!(Trace, 32, Trace::None);
//! ringbuf_entry!(Trace::Connect { sid: 7 });
//! ```
//!
//! Payloads must be `Copy + PartialEq`. An entry equal to the newest one,
//! from the same source line, bumps that entry's count instead of taking a
//! new slot. Building with the `disabled` feature compiles both macros down
//! to nothing but a type check of their arguments.

#![cfg_attr(not(test), no_std)]

pub use static_cell::StaticCell;

/// `ringbuf!(NAME, Type, N, init)` declares a static buffer of `N` entries
/// of `Type`. Without `NAME` the buffer is called `__RINGBUF`, one per
/// module.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::StaticCell<$crate::Ringbuf<$t, $n>> =
            $crate::StaticCell::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: $init,
                }; $n],
            });
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// `ringbuf_entry!(NAME, payload)` records `payload`, tagged with the
/// calling line. An entry arriving while the buffer is claimed (from the
/// fatal-error path, say) is dropped.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let (p, buf) = ($payload, &$buf);
        if let Some(mut rb) = $crate::StaticCell::try_borrow_mut(buf) {
            $crate::Ringbuf::entry(&mut *rb, line!() as u16, p);
        }
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

/// One recorded event. `count` is how many times in a row it happened;
/// `generation` is zero for a slot never written.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// The buffer behind `ringbuf!`. `last` indexes the newest entry.
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    pub fn entry(&mut self, line: u16, payload: T) {
        if let Some(newest) = self.last.and_then(|l| self.buffer.get_mut(l)) {
            if newest.line == line && newest.payload == payload {
                if let Some(count) = newest.count.checked_add(1) {
                    newest.count = count;
                    return;
                }
            }
        }

        // Compare rather than take a remainder; not every target divides.
        let slot = match self.last.map(|l| l.wrapping_add(1)) {
            Some(next) if next < N => next,
            _ => 0,
        };
        let ent = &mut self.buffer[slot];
        *ent = RingbufEntry {
            line,
            generation: ent.generation.wrapping_add(1),
            count: 1,
            payload,
        };
        self.last = Some(slot);
    }

    /// Iterates over recorded entries, oldest first.
    ///
    /// Slots that have never been written are skipped.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(l) if l < N => l + 1,
            _ => 0,
        };
        let (newer, older) = self.buffer.split_at(start.min(N));
        older
            .iter()
            .chain(newer.iter())
            .filter(|e| e.generation != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh<const N: usize>() -> Ringbuf<u32, N> {
        Ringbuf {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: 0,
            }; N],
        }
    }

    #[test]
    fn repeated_entries_are_counted() {
        let mut rb = fresh::<4>();
        rb.entry(10, 7);
        rb.entry(10, 7);
        rb.entry(10, 7);
        rb.entry(11, 7);

        let entries: Vec<_> = rb.iter().map(|e| (e.line, e.count)).collect();
        assert_eq!(entries, vec![(10, 3), (11, 1)]);
    }

    #[test]
    fn wraps_and_keeps_newest() {
        let mut rb = fresh::<3>();
        for p in 0..5 {
            rb.entry(1, p);
        }
        let payloads: Vec<_> = rb.iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec![2, 3, 4]);
        assert_eq!(rb.buffer[0].generation, 2);
    }

    #[test]
    fn empty_buffer_iterates_nothing() {
        let rb = fresh::<2>();
        assert_eq!(rb.iter().count(), 0);
    }
}
