// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-waiter events.
//!
//! An `Event` parks at most one thread. `wake` hands the parked thread a
//! return value for the trap it blocked in and makes it runnable again.

use crate::err::Fatal;
use crate::fail::die;
use crate::thread::{Scheduler, ThreadId, ThreadState};

const EVENT_MAGIC: u32 = 0x6576_6e74;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Wait(ThreadId),
    Wake(ThreadId, usize),
}

ringbuf::ringbuf!(Trace, 16, Trace::None);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Event {
    magic: u32,
    owner: Option<ThreadId>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    pub const fn new() -> Self {
        Self {
            magic: EVENT_MAGIC,
            owner: None,
        }
    }

    fn check(&self) {
        if self.magic != EVENT_MAGIC {
            die(Fatal::EventCorrupted);
        }
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Blocks the current thread on this event and arms a reschedule.
    pub fn wait(&mut self, sched: &mut Scheduler) {
        self.check();
        if self.owner.is_some() {
            die(Fatal::EventBusy);
        }
        let t = sched.require_current();
        ringbuf::ringbuf_entry!(Trace::Wait(t));
        self.owner = Some(t);
        sched.set_state(t, ThreadState::Blocked);
        sched.activate();
    }

    /// Wakes the parked thread, if it's still blocked, with `retval`.
    pub fn wake(&mut self, sched: &mut Scheduler, retval: usize) {
        self.check();
        let Some(t) = self.owner else {
            return;
        };
        if sched.state(t) != ThreadState::Blocked {
            return;
        }
        ringbuf::ringbuf_entry!(Trace::Wake(t, retval));
        self.owner = None;
        sched.set_retval(t, retval);
        sched.set_state(t, ThreadState::Running);
        sched.activate();
    }
}
