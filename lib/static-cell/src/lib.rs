// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Statics with one owner at a time.
//!
//! The partition manager's state and its trace buffers live in statics that
//! trap handlers reach into. A handler claims the contents for as long as it
//! holds a `StaticRef`; a second claim in the meantime (a fatal error raised
//! mid-trap, or a nested exception) is refused with `None`.

#![cfg_attr(not(test), no_std)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct StaticCell<T> {
    claimed: AtomicBool,
    cell: UnsafeCell<T>,
}

impl<T> StaticCell<T> {
    pub const fn new(contents: T) -> Self {
        Self {
            claimed: AtomicBool::new(false),
            cell: UnsafeCell::new(contents),
        }
    }

    /// Claims the contents, or returns `None` if someone else holds them.
    pub fn try_borrow_mut(&self) -> Option<StaticRef<'_, T>> {
        if self.claimed.swap(true, Ordering::Acquire) {
            return None;
        }
        // Safety: `claimed` was clear, so no other `StaticRef` exists.
        let contents = unsafe { &mut *self.cell.get() };
        Some(StaticRef {
            contents,
            claimed: &self.claimed,
        })
    }
}

unsafe impl<T> Sync for StaticCell<T> where for<'a> &'a mut T: Send {}

/// Exclusive access to a `StaticCell`'s contents. Dropping it releases the
/// claim.
pub struct StaticRef<'a, T> {
    contents: &'a mut T,
    claimed: &'a AtomicBool,
}

impl<T> Drop for StaticRef<'_, T> {
    fn drop(&mut self) {
        self.claimed.store(false, Ordering::Release);
    }
}

impl<T> core::ops::Deref for StaticRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.contents
    }
}

impl<T> core::ops::DerefMut for StaticRef<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.contents
    }
}
