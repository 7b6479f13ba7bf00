// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Portable algorithms used by the partition manager.
//!
//! Nothing in here touches hardware or manager state, so it can be tested on
//! the host in isolation.

// Allow std-y things to be used in test. Note that this attribute is a bit of a
// trap for the programmer, because rust-analyzer by default seems to build
// things with test set. This means it's easy to introduce code incompatible
// with no_std without your editor hassling you about it. Beware.
#![cfg_attr(not(test), no_std)]
#![forbid(clippy::wildcard_imports)]

/// Describes types that act as "slices" (in the very abstract sense) handed
/// to the manager by callers.
///
/// This is not the same thing as a Rust slice, because this is just a
/// base-length pair --- taken by itself, it doesn't let you actually _access_
/// the memory.
///
/// # Invariants
///
/// `s.is_empty()` implies `s.base_addr() == s.end_addr()`, and vice versa.
///
/// `s.base_addr() <= s.end_addr()` must hold.
pub trait UserSlice {
    /// Checks whether the slice spans zero bytes.
    fn is_empty(&self) -> bool;

    /// The address of the first byte included in this slice.
    fn base_addr(&self) -> usize;

    /// The address of the first byte _not_ included in this slice, past the
    /// end.
    fn end_addr(&self) -> usize;
}

impl<T: UserSlice> UserSlice for &T {
    #[inline(always)]
    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    #[inline(always)]
    fn base_addr(&self) -> usize {
        (**self).base_addr()
    }

    #[inline(always)]
    fn end_addr(&self) -> usize {
        (**self).end_addr()
    }
}

/// Describes a named span of the address space.
///
/// Regions are described by their first and *last* addresses, both
/// inclusive, which is how the linker hands them to us. A region whose
/// `base_addr` exceeds its `last_addr` is empty and contains nothing.
pub trait MemoryRegion {
    fn base_addr(&self) -> usize;
    fn last_addr(&self) -> usize;

    #[inline(always)]
    fn contains(&self, addr: usize) -> bool {
        self.base_addr() <= addr && addr <= self.last_addr()
    }
}

impl<T: MemoryRegion> MemoryRegion for &T {
    #[inline(always)]
    fn base_addr(&self) -> usize {
        (**self).base_addr()
    }

    #[inline(always)]
    fn last_addr(&self) -> usize {
        (**self).last_addr()
    }
}

/// Finds the region that wholly contains `slice`.
///
/// Regions are tried in table order and the first one containing both the
/// first and last byte of the slice wins. The table need not be sorted and
/// may overlap. A slice that straddles two regions, even adjacent ones, is
/// not contained by either.
///
/// Empty slices are never contained; callers decide what an empty slice
/// means to them before asking.
///
/// # Returns
///
/// The index of the matching region in `table`, or `None`.
#[must_use]
pub fn containing_region<S, R>(slice: S, table: &[R]) -> Option<usize>
where
    S: UserSlice,
    R: MemoryRegion,
{
    if slice.is_empty() {
        return None;
    }

    let first = slice.base_addr();
    // Non-empty, so end_addr > base_addr and this can't underflow.
    let last = slice.end_addr() - 1;

    table
        .iter()
        .position(|r| r.contains(first) && r.contains(last))
}

/// Checks that `signals` names exactly one signal bit.
#[inline(always)]
pub fn is_single_signal(signals: u32) -> bool {
    signals.is_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct TestSlice {
        base: usize,
        size: usize,
    }

    impl UserSlice for TestSlice {
        fn is_empty(&self) -> bool {
            self.size == 0
        }

        fn base_addr(&self) -> usize {
            self.base
        }

        fn end_addr(&self) -> usize {
            self.base + self.size
        }
    }

    #[derive(Debug)]
    struct TestRegion {
        base: usize,
        limit: usize,
    }

    impl MemoryRegion for TestRegion {
        fn base_addr(&self) -> usize {
            self.base
        }

        fn last_addr(&self) -> usize {
            self.limit
        }
    }

    fn make_fake_region_table() -> Vec<TestRegion> {
        vec![
            // Two adjacent regions. A slice crossing the boundary must not
            // match either.
            TestRegion {
                base: 0x0099_0000,
                limit: 0x0099_FFFF,
            },
            TestRegion {
                base: 0x009A_0000,
                limit: 0x009A_FFFF,
            },
            // Overlaps the first region; only reachable for slices the first
            // one doesn't cover.
            TestRegion {
                base: 0x0098_0000,
                limit: 0x009A_FFFF,
            },
            // Empty.
            TestRegion {
                base: 0x2000_0000,
                limit: 0x1FFF_FFFF,
            },
        ]
    }

    #[test]
    fn slice_inside_single_region_matches_it() {
        let table = make_fake_region_table();
        let slice = TestSlice {
            base: 0x009A_0010,
            size: 0x100,
        };
        assert_eq!(containing_region(slice, &table), Some(1));
    }

    #[test]
    fn first_matching_region_wins() {
        let table = make_fake_region_table();
        let slice = TestSlice {
            base: 0x0099_0000,
            size: 0x10,
        };
        assert_eq!(containing_region(slice, &table), Some(0));
    }

    #[test]
    fn straddling_slice_falls_through_to_covering_region() {
        let table = make_fake_region_table();
        let slice = TestSlice {
            base: 0x0099_FFF0,
            size: 0x20,
        };
        assert_eq!(containing_region(slice, &table), Some(2));

        // Without the overlapping region there's nothing that holds it.
        let slice = TestSlice {
            base: 0x0099_FFF0,
            size: 0x20,
        };
        assert_eq!(containing_region(slice, &table[..2]), None);
    }

    #[test]
    fn region_limit_is_inclusive() {
        let table = make_fake_region_table();
        let slice = TestSlice {
            base: 0x009A_FFFF,
            size: 1,
        };
        assert_eq!(containing_region(slice, &table[..2]), Some(1));
        let slice = TestSlice {
            base: 0x009A_FFFF,
            size: 2,
        };
        assert_eq!(containing_region(slice, &table[..2]), None);
    }

    #[test]
    fn empty_region_contains_nothing() {
        let table = make_fake_region_table();
        let slice = TestSlice {
            base: 0x2000_0000,
            size: 1,
        };
        assert_eq!(containing_region(slice, &table), None);
    }

    #[test]
    fn empty_slice_is_never_contained() {
        let table = make_fake_region_table();
        let slice = TestSlice {
            base: 0x0099_0000,
            size: 0,
        };
        assert_eq!(containing_region(slice, &table), None);
    }

    #[test]
    fn single_signal_check() {
        assert!(is_single_signal(1 << 4));
        assert!(is_single_signal(1 << 31));
        assert!(!is_single_signal(0));
        assert!(!is_single_signal(0b11 << 4));
    }

    proptest! {
        #[test]
        fn match_is_first_covering_region(
            regions in prop::collection::vec((0usize..0x1_0000, 0usize..0x1000), 0..6),
            base in 0usize..0x1_1000,
            size in 1usize..0x800,
        ) {
            let table: Vec<TestRegion> = regions
                .iter()
                .map(|&(b, s)| TestRegion { base: b, limit: b + s })
                .collect();
            let got = containing_region(TestSlice { base, size }, &table);
            let last = base + size - 1;
            let expected = table
                .iter()
                .position(|r| r.base <= base && last <= r.limit);
            prop_assert_eq!(got, expected);
        }
    }
}
