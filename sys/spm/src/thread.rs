// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Threads and the cooperative scheduler.
//!
//! Every started thread sits on a singly-linked list sorted by priority,
//! most important first; threads of equal priority keep the order they were
//! started in. The scheduler caches the first `Running` thread on that list
//! as the _runnable head_, and `set_state` is the only code that changes a
//! thread's state, so it is also the only code that has to keep the cache
//! honest.
//!
//! Nothing here switches stacks. The trap entry assembly snapshots the
//! interrupted register file into a `SavedState`; `schedule` trades that
//! snapshot for the next thread's, and the assembly restores whatever it
//! finds when it returns.

use abi::Priority;

use crate::arch::{self, SavedState, EXC_RETURN_FTYPE, EXC_RETURN_S};
use crate::config::MAX_THREADS;
use crate::err::{Fatal, ThreadError};
use crate::fail::die;

/// Names a thread by its slot in the scheduler's table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct ThreadId(usize);

impl ThreadId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThreadState {
    /// Initialized but not yet on the schedulable list.
    Creating,
    Running,
    /// Parked on an event.
    Blocked,
    /// Exited. Never scheduled again.
    Detached,
}

/// Internal representation of a thread.
#[derive(Debug)]
pub struct Thread {
    /// Saved machine state while the thread is off the CPU.
    save: SavedState,
    entry: usize,
    arg: usize,
    stack_base: usize,
    stack_top: usize,
    priority: Priority,
    state: ThreadState,
    /// Next thread in priority order.
    next: Option<ThreadId>,
    /// Index of the partition this thread runs.
    owner: usize,
}

impl Thread {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn owner(&self) -> usize {
        self.owner
    }

    pub fn save(&self) -> &SavedState {
        &self.save
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Start(ThreadId),
    State(ThreadId, ThreadState),
    Switch { from: ThreadId, to: ThreadId },
}

ringbuf::ringbuf!(Trace, 32, Trace::None);

pub struct Scheduler {
    threads: heapless::Vec<Thread, MAX_THREADS>,
    /// Most important started thread.
    list_head: Option<ThreadId>,
    /// First `Running` thread on the list, if any.
    runnable_head: Option<ThreadId>,
    /// Thread whose registers are in the live trap frame.
    current: Option<ThreadId>,
    reschedule_pending: bool,
    /// Return value for `current`, applied to the live frame at the next
    /// `schedule`.
    current_retval: Option<usize>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            threads: heapless::Vec::new(),
            list_head: None,
            runnable_head: None,
            current: None,
            reschedule_pending: false,
            current_retval: None,
        }
    }

    /// Records a new thread in state `Creating`. It isn't schedulable until
    /// `start`.
    pub fn init_thread(
        &mut self,
        entry: usize,
        arg: usize,
        stack_base: usize,
        stack_top: usize,
        priority: Priority,
        owner: usize,
    ) -> ThreadId {
        let id = ThreadId(self.threads.len());
        let thread = Thread {
            save: SavedState::default(),
            entry,
            arg,
            stack_base,
            stack_top,
            priority,
            state: ThreadState::Creating,
            next: None,
            owner,
        };
        if self.threads.push(thread).is_err() {
            die(Fatal::TooManyThreads);
        }
        id
    }

    /// Builds the thread's initial register context, links it into the
    /// priority list and makes it runnable.
    pub fn start(&mut self, id: ThreadId) -> Result<(), ThreadError> {
        let t = self.threads.get_mut(id.0).ok_or(ThreadError::InvalidParam)?;
        if t.entry == 0
            || t.stack_base == 0
            || t.stack_top == 0
            || t.state != ThreadState::Creating
        {
            return Err(ThreadError::InvalidParam);
        }
        t.save.init_context(
            t.entry,
            t.arg,
            t.stack_top,
            t.stack_base,
            t.priority.is_non_secure(),
        );
        let priority = t.priority;

        // Insert before the first thread we're strictly more important than.
        let mut prev: Option<ThreadId> = None;
        let mut cursor = self.list_head;
        while let Some(c) = cursor {
            if priority.is_more_important_than(self.threads[c.0].priority) {
                break;
            }
            prev = Some(c);
            cursor = self.threads[c.0].next;
        }
        self.threads[id.0].next = cursor;
        match prev {
            Some(p) => self.threads[p.0].next = Some(id),
            None => self.list_head = Some(id),
        }

        ringbuf::ringbuf_entry!(Trace::Start(id));
        self.set_state(id, ThreadState::Running);
        Ok(())
    }

    pub fn thread(&self, id: ThreadId) -> &Thread {
        &self.threads[id.0]
    }

    pub fn state(&self, id: ThreadId) -> ThreadState {
        self.threads[id.0].state
    }

    pub fn owner(&self, id: ThreadId) -> usize {
        self.threads[id.0].owner
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    /// Like `current`, for paths that can only be reached from a thread.
    pub fn require_current(&self) -> ThreadId {
        match self.current {
            Some(t) => t,
            None => die(Fatal::NoCurrentThread),
        }
    }

    /// Changes a thread's state, keeping the runnable head up to date.
    pub fn set_state(&mut self, id: ThreadId, state: ThreadState) {
        self.threads[id.0].state = state;
        ringbuf::ringbuf_entry!(Trace::State(id, state));

        let adopt = state == ThreadState::Running
            && match self.runnable_head {
                None => true,
                Some(h) => self.threads[id.0]
                    .priority
                    .is_more_important_than(self.threads[h.0].priority),
            };
        let head = if adopt {
            Some(id)
        } else {
            self.iter()
                .find(|&t| self.threads[t.0].state == ThreadState::Running)
        };
        self.runnable_head = head;
    }

    /// The most important runnable thread.
    pub fn next_runnable(&self) -> Option<ThreadId> {
        self.runnable_head
    }

    /// Walks started threads in priority order.
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        let mut cursor = self.list_head;
        core::iter::from_fn(move || {
            let here = cursor?;
            cursor = self.threads[here.0].next;
            Some(here)
        })
    }

    /// Arms a reschedule. Idempotent.
    pub fn activate(&mut self) {
        self.reschedule_pending = true;
        arch::pend_reschedule();
    }

    pub fn reschedule_pending(&self) -> bool {
        self.reschedule_pending
    }

    /// Adopts `first` as the running thread and arms the first reschedule.
    /// Callable once.
    pub fn start_scheduler(&mut self, first: ThreadId) {
        if self.current.is_some() {
            die(Fatal::SchedulerStarted);
        }
        if first.0 >= self.threads.len() {
            die(Fatal::NoCurrentThread);
        }
        self.current = Some(first);
        self.activate();
    }

    /// Delivers `value` as the return value of a (blocked) thread's trap.
    pub fn set_retval(&mut self, id: ThreadId, value: usize) {
        if self.current == Some(id) {
            // Its registers are in the live frame, not in `save`.
            self.current_retval = Some(value);
        } else {
            self.threads[id.0].save.ret0(value);
        }
    }

    /// Saves the live frame into `prev` and loads `next` into it.
    pub fn context_switch(
        &mut self,
        frame: &mut SavedState,
        prev: ThreadId,
        next: ThreadId,
    ) {
        ringbuf::ringbuf_entry!(Trace::Switch {
            from: prev,
            to: next
        });
        self.threads[prev.0].save = *frame;
        *frame = self.threads[next.0].save;
        self.current = Some(next);
    }

    /// The reschedule handler. Returns the thread now in `frame` if it
    /// changed.
    ///
    /// Some thread must always be runnable; images keep an idle partition
    /// at the lowest priority for this. If none is, the manager halts.
    pub fn schedule(&mut self, frame: &mut SavedState) -> Option<ThreadId> {
        self.reschedule_pending = false;
        let current = self.require_current();
        if let Some(v) = self.current_retval.take() {
            frame.ret0(v);
        }
        match self.next_runnable() {
            Some(next) if next != current => {
                self.context_switch(frame, current, next);
                Some(next)
            }
            Some(_) => None,
            None => die(Fatal::NothingRunnable),
        }
    }

    /// Detaches the current thread for good.
    pub fn exit_current(&mut self) {
        let id = self.require_current();
        self.set_state(id, ThreadState::Detached);
        self.activate();
    }
}

/// Architecture-specific access to a thread's register snapshot.
///
/// Trap arguments arrive in `r0`-`r3`; results go back in `r0`.
pub trait ArchState: Default {
    fn arg0(&self) -> usize;
    fn arg1(&self) -> usize;
    fn arg2(&self) -> usize;
    fn arg3(&self) -> usize;

    /// Writes the trap's return value.
    fn ret0(&mut self, _: usize);

    /// Process stack pointer after the hardware frame was pushed.
    fn stack_pointer(&self) -> usize;

    /// The EXC_RETURN value the trap was entered with.
    fn exc_return(&self) -> usize;

    /// Resets the snapshot to a fresh thread's.
    fn init_context(
        &mut self,
        entry: usize,
        arg: usize,
        stack_top: usize,
        stack_limit: usize,
        non_secure: bool,
    );

    fn caller_is_non_secure(&self) -> bool {
        self.exc_return() & EXC_RETURN_S == 0
    }

    fn has_extended_frame(&self) -> bool {
        self.exc_return() & EXC_RETURN_FTYPE == 0
    }

    /// Interprets arguments as for `Sysnum::Connect`.
    fn as_connect_args(&self) -> ConnectArgs {
        ConnectArgs {
            sid: self.arg0() as u32,
            minor_version: self.arg1() as u32,
        }
    }

    /// Interprets arguments as for `Sysnum::Read`, `Skip` or `Write`.
    fn as_transfer_args(&self) -> TransferArgs {
        TransferArgs {
            msg_handle: self.arg0() as i32,
            index: self.arg1() as u32,
            buffer: self.arg2(),
            len: self.arg3(),
        }
    }

    /// Interprets arguments as for `Sysnum::Reply`.
    fn as_reply_args(&self) -> ReplyArgs {
        ReplyArgs {
            msg_handle: self.arg0() as i32,
            status: self.arg1() as i32,
        }
    }

    /// Interprets arguments as for `Sysnum::Wait`.
    fn as_wait_args(&self) -> WaitArgs {
        WaitArgs {
            signal_mask: self.arg0() as u32,
            timeout: self.arg1() as u32,
        }
    }
}

/// Decoded arguments for `connect`.
#[derive(Clone, Debug)]
pub struct ConnectArgs {
    pub sid: u32,
    pub minor_version: u32,
}

/// Decoded arguments for the vector transfer operations. `buffer` is unused
/// by `skip`.
#[derive(Clone, Debug)]
pub struct TransferArgs {
    pub msg_handle: i32,
    pub index: u32,
    pub buffer: usize,
    pub len: usize,
}

#[derive(Clone, Debug)]
pub struct ReplyArgs {
    pub msg_handle: i32,
    pub status: i32,
}

#[derive(Clone, Debug)]
pub struct WaitArgs {
    pub signal_mask: u32,
    pub timeout: u32,
}
