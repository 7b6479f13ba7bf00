// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! The manager has two kinds of failure and keeps them apart by type.
//!
//! - Recoverable failures are ordinary `Result`s carrying `abi::IpcError` or
//!   `ThreadError`, or PSA status words handed back to a caller in `r0`.
//! - Protocol violations are named by `Fatal` and go straight to
//!   `crate::fail::die`, which never returns. Nothing converts a `Fatal`
//!   into a `Result` or back.

use core::fmt;

/// Error returned by `Scheduler::start`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThreadError {
    /// Entry point or stack bounds are null, or the thread isn't freshly
    /// created.
    InvalidParam,
}

/// A condition that halts the whole secure image.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fatal {
    /// A node was linked twice, or unlinked while not on a list.
    ListCorrupted,
    /// A chunk was freed into a pool that doesn't own it, or freed twice.
    ForeignChunk,
    /// A pool was configured with zero or too many chunks.
    PoolInit,
    /// An event object failed its integrity check.
    EventCorrupted,
    /// A second thread tried to wait on an occupied event.
    EventBusy,
    /// The thread table is full.
    TooManyThreads,
    /// A configured thread could not be started.
    ThreadStart(usize),
    /// `start_scheduler` was called a second time.
    SchedulerStarted,
    /// Something needed the current thread before the scheduler started.
    NoCurrentThread,
    /// The running thread doesn't belong to any partition.
    NoRunningPartition,
    /// The current thread gave up the CPU and no other thread can run.
    NothingRunnable,
    /// The static configuration is inconsistent.
    BadConfig(&'static str),
    /// `spm_init` ran twice.
    AlreadyInitialized,
    /// The manager was entered before `spm_init`.
    NotInitialized,

    /// Trap number outside the dispatch table.
    BadSyscallNumber(u32),
    /// No service with this SID exists.
    NoSuchService(u32),
    /// A service record the manager holds an id for has gone.
    ServiceCorrupted,
    /// A non-secure caller asked for a secure-only service.
    NotAuthorized(u32),
    /// The requested minor version is refused by the service's policy.
    VersionRejected(u32),
    /// A connection handle doesn't name a live connection.
    InvalidHandle(i32),
    /// The null handle was used where a connection is required.
    NullHandle,
    /// A connection record couldn't be allocated for a successful CONNECT.
    ConnectionsExhausted,
    /// More vectors than `PSA_MAX_IOVEC` in one call.
    TooManyVectors,
    /// A caller-supplied buffer failed the memory check.
    MemoryCheck(usize),
    /// A caller's message could not be queued.
    QueueRejected,
    /// `wait` with a mask naming none of the partition's signals.
    UnassignedSignals(u32),
    /// A signal argument names zero or several bits.
    NotSingleSignal(u32),
    /// A signal argument isn't currently asserted.
    SignalNotAsserted(u32),
    /// A signal doesn't belong to any service of the running partition.
    NoServiceForSignal(u32),
    /// A partition with no services asked for one by signal.
    PartitionHasNoServices,
    /// A message handle doesn't name a live message of the running partition.
    InvalidMessage(i32),
    /// The operation isn't valid for this message type.
    WrongMessageType(i32),
    /// Vector index past `PSA_MAX_IOVEC`.
    VectorIndex(u32),
    /// `write` would pass the end of the output vector.
    WriteOverflow,
    /// The caller's output vector moved under the message.
    OutvecMismatch,
    /// A CONNECT was answered with a status other than success, refused or
    /// busy.
    BadConnectStatus(i32),
    /// No partition with this ID exists.
    NoSuchPartition(i32),
    /// `clear` without the doorbell asserted.
    DoorbellNotAsserted,
    /// An interrupt line that no partition handles.
    UnknownIrq(u32),
    /// `eoi` with a signal that isn't one of the partition's interrupts.
    NotAnIrqSignal(u32),
    /// The manager was entered while already running.
    Reentered,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListCorrupted => write!(f, "list corrupted"),
            Self::ForeignChunk => write!(f, "foreign chunk freed"),
            Self::PoolInit => write!(f, "bad pool configuration"),
            Self::EventCorrupted => write!(f, "event corrupted"),
            Self::EventBusy => write!(f, "event already has a waiter"),
            Self::TooManyThreads => write!(f, "too many threads"),
            Self::ThreadStart(i) => write!(f, "thread {i} failed to start"),
            Self::SchedulerStarted => write!(f, "scheduler already started"),
            Self::NoCurrentThread => write!(f, "no current thread"),
            Self::NoRunningPartition => write!(f, "no running partition"),
            Self::NothingRunnable => write!(f, "no runnable thread"),
            Self::BadConfig(why) => write!(f, "bad config: {why}"),
            Self::AlreadyInitialized => write!(f, "spm already initialized"),
            Self::NotInitialized => write!(f, "spm not initialized"),
            Self::BadSyscallNumber(n) => write!(f, "bad syscall number {n}"),
            Self::NoSuchService(sid) => write!(f, "no service {sid:#x}"),
            Self::ServiceCorrupted => write!(f, "service record corrupted"),
            Self::NotAuthorized(sid) => {
                write!(f, "service {sid:#x} not permitted for caller")
            }
            Self::VersionRejected(v) => write!(f, "version {v} rejected"),
            Self::InvalidHandle(h) => write!(f, "invalid handle {h:#x}"),
            Self::NullHandle => write!(f, "null handle"),
            Self::ConnectionsExhausted => write!(f, "connections exhausted"),
            Self::TooManyVectors => write!(f, "too many vectors"),
            Self::MemoryCheck(addr) => {
                write!(f, "memory check failed at {addr:#x}")
            }
            Self::QueueRejected => write!(f, "message queue rejected message"),
            Self::UnassignedSignals(s) => {
                write!(f, "wait on unassigned signals {s:#x}")
            }
            Self::NotSingleSignal(s) => write!(f, "not a single signal {s:#x}"),
            Self::SignalNotAsserted(s) => {
                write!(f, "signal {s:#x} not asserted")
            }
            Self::NoServiceForSignal(s) => {
                write!(f, "no service for signal {s:#x}")
            }
            Self::PartitionHasNoServices => write!(f, "partition has no services"),
            Self::InvalidMessage(h) => write!(f, "invalid message {h:#x}"),
            Self::WrongMessageType(t) => write!(f, "wrong message type {t}"),
            Self::VectorIndex(i) => write!(f, "vector index {i} out of range"),
            Self::WriteOverflow => write!(f, "write overflows output vector"),
            Self::OutvecMismatch => write!(f, "caller outvec moved"),
            Self::BadConnectStatus(s) => {
                write!(f, "bad status {s} for connect reply")
            }
            Self::NoSuchPartition(id) => write!(f, "no partition {id}"),
            Self::DoorbellNotAsserted => write!(f, "doorbell not asserted"),
            Self::UnknownIrq(line) => write!(f, "unknown irq {line}"),
            Self::NotAnIrqSignal(s) => write!(f, "signal {s:#x} is not an irq"),
            Self::Reentered => write!(f, "spm reentered"),
        }
    }
}
