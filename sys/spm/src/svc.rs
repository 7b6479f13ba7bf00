// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The trap surface.
//!
//! Every trap lands in `syscall_entry` with the caller's live registers in
//! `frame`. Each operation is a function that reads its arguments out of the
//! frame (and, for `call`, the caller's stack), validates everything it is
//! about to trust, and returns the word that goes back in `r0`. Operations
//! with nothing to return put `PSA_SUCCESS` there.
//!
//! Protocol violations don't return at all: they go to `fail::die`. Only the
//! outcomes the PSA client API defines as statuses come back as values.
//!
//! # Argument shapes
//!
//! | Trap          | r0          | r1          | r2       | r3       |
//! |---------------|-------------|-------------|----------|----------|
//! | `Version`     | sid         |             |          |          |
//! | `Connect`     | sid         | minor       |          |          |
//! | `Call`        | handle      | see below   |          |          |
//! | `Close`       | handle      |             |          |          |
//! | `Wait`        | signal mask | timeout     |          |          |
//! | `Get`         | signal      | `*PsaMsg`   |          |          |
//! | `SetRhandle`  | msg handle  | rhandle     |          |          |
//! | `Read`        | msg handle  | invec index | buffer   | len      |
//! | `Skip`        | msg handle  | invec index |          | len      |
//! | `Write`       | msg handle  | outvec index| buffer   | len      |
//! | `Reply`       | msg handle  | status      |          |          |
//! | `Notify`      | partition   |             |          |          |
//! | `Eoi`         | signal      |             |          |          |
//!
//! A secure caller passes `call`'s input vector array and count in `r1` and
//! `r2`, the output vector array in `r3`, and the output count as a fifth
//! argument pushed on its stack just before trapping. The hardware then
//! stacks its exception frame on top, so the count sits 8 words above the
//! saved stack pointer, or 26 with an extended floating-point frame.
//!
//! A non-secure caller instead passes in `r1` and `r2` the addresses of two
//! `PsaInvec`-shaped records, `{ in_vec, in_len }` and `{ out_vec, out_len }`.

use core::mem::size_of;

use abi::{
    PsaInvec, PsaMsg, PsaOutvec, Sysnum, PSA_BLOCK, PSA_DOORBELL,
    PSA_ERROR_CONNECTION_BUSY, PSA_ERROR_CONNECTION_REFUSED,
    PSA_ERROR_DOES_NOT_EXIST, PSA_ERROR_GENERIC_ERROR, PSA_FRAMEWORK_VERSION,
    PSA_IPC_CALL, PSA_IPC_CONNECT, PSA_IPC_DISCONNECT, PSA_MAX_IOVEC,
    PSA_NULL_HANDLE, PSA_SUCCESS, PSA_TIMEOUT_MASK, PSA_VERSION_NONE,
};

use crate::arch::{self, SavedState, BASIC_FRAME_WORDS, EXTENDED_FRAME_WORDS};
use crate::err::Fatal;
use crate::fail::die;
use crate::irq;
use crate::pool::ChunkId;
use crate::spm::{MsgRequest, Spm};
use crate::thread::ArchState;
use crate::umem::{self, Access, Domain};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Syscall { nr: u32, ns: bool },
    Returned(usize),
}

ringbuf::ringbuf!(Trace, 64, Trace::None);

/// Entry point for the trap vector. `nr` is the trap number the caller
/// used and `frame` its live register file.
pub fn syscall_entry(spm: &mut Spm, nr: u32, frame: &mut SavedState) {
    ringbuf::ringbuf_entry!(Trace::Syscall {
        nr,
        ns: frame.caller_is_non_secure(),
    });

    let ret = match Sysnum::try_from(nr) {
        Ok(Sysnum::Schedule) => {
            spm.sched.activate();
            status(PSA_SUCCESS)
        }
        Ok(Sysnum::ThreadExit) => {
            spm.sched.exit_current();
            status(PSA_SUCCESS)
        }
        Ok(Sysnum::FrameworkVersion) => PSA_FRAMEWORK_VERSION as usize,
        Ok(Sysnum::Version) => version(spm, frame),
        Ok(Sysnum::Connect) => connect(spm, frame),
        Ok(Sysnum::Call) => call(spm, frame),
        Ok(Sysnum::Close) => close(spm, frame),
        Ok(Sysnum::Wait) => wait(spm, frame),
        Ok(Sysnum::Get) => get(spm, frame),
        Ok(Sysnum::SetRhandle) => set_rhandle(spm, frame),
        Ok(Sysnum::Read) => read(spm, frame),
        Ok(Sysnum::Skip) => skip(spm, frame),
        Ok(Sysnum::Write) => write(spm, frame),
        Ok(Sysnum::Reply) => reply(spm, frame),
        Ok(Sysnum::Notify) => notify(spm, frame),
        Ok(Sysnum::Clear) => clear(spm),
        Ok(Sysnum::Eoi) => eoi(spm, frame),
        Err(()) => die(Fatal::BadSyscallNumber(nr)),
    };

    ringbuf::ringbuf_entry!(Trace::Returned(ret));
    frame.ret0(ret);
}

/// Sign-extends a PSA status into a register word.
fn status(code: i32) -> usize {
    code as isize as usize
}

fn caller_domain(spm: &Spm, frame: &SavedState) -> Domain {
    if frame.caller_is_non_secure() {
        Domain {
            non_secure: true,
            privileged: false,
        }
    } else {
        spm.partition_domain(spm.running_partition())
    }
}

fn check(
    spm: &Spm,
    base: usize,
    len: usize,
    domain: Domain,
    access: Access,
) {
    if umem::memory_check(&spm.memory, base, len, domain, access).is_err() {
        die(Fatal::MemoryCheck(base));
    }
}

fn version(spm: &mut Spm, frame: &SavedState) -> usize {
    let sid = frame.arg0() as u32;
    let Some(service) = spm.service_by_sid(sid) else {
        return PSA_VERSION_NONE as usize;
    };
    let desc = spm.service(service).desc;
    if frame.caller_is_non_secure() && !desc.non_secure_clients {
        // Indistinguishable from a missing service.
        return PSA_VERSION_NONE as usize;
    }
    desc.minor_version as usize
}

fn connect(spm: &mut Spm, frame: &SavedState) -> usize {
    let args = frame.as_connect_args();
    let ns_caller = frame.caller_is_non_secure();

    let Some(service) = spm.service_by_sid(args.sid) else {
        die(Fatal::NoSuchService(args.sid));
    };
    if ns_caller && !spm.service(service).desc.non_secure_clients {
        die(Fatal::NotAuthorized(args.sid));
    }
    if spm
        .check_client_version(service, args.minor_version)
        .is_err()
    {
        die(Fatal::VersionRejected(args.minor_version));
    }

    let Some(msg) = spm.create_msg(MsgRequest {
        service,
        conn: None,
        msg_type: PSA_IPC_CONNECT,
        ns_caller,
        invec: &[],
        outvec: &[],
        caller_outvec: 0,
    }) else {
        return status(PSA_NULL_HANDLE);
    };
    spm.send_event(msg);
    // The reply overwrites this with the handle.
    status(PSA_SUCCESS)
}

/// Reads the output vector count a secure caller pushed before trapping.
fn stacked_out_len(spm: &Spm, frame: &SavedState, domain: Domain) -> usize {
    let words = if frame.has_extended_frame() {
        EXTENDED_FRAME_WORDS
    } else {
        BASIC_FRAME_WORDS
    };
    let addr = frame.stack_pointer() + words * size_of::<usize>();
    let mut out_len = [0usize];
    if umem::copy_from_caller(&spm.memory, addr, &mut out_len, domain).is_err() {
        die(Fatal::MemoryCheck(addr));
    }
    out_len[0]
}

/// Reads one of the `{ base, len }` wrappers a non-secure caller passes.
fn ns_wrapper(spm: &Spm, addr: usize, domain: Domain) -> PsaInvec {
    let mut wrapper = [PsaInvec::default()];
    if umem::copy_from_caller(&spm.memory, addr, &mut wrapper, domain).is_err() {
        die(Fatal::MemoryCheck(addr));
    }
    wrapper[0]
}

fn call(spm: &mut Spm, frame: &SavedState) -> usize {
    let handle = frame.arg0() as i32;
    let ns_caller = frame.caller_is_non_secure();
    let domain = caller_domain(spm, frame);

    let (in_ptr, in_len, out_ptr, out_len) = if ns_caller {
        let inw = ns_wrapper(spm, frame.arg1(), domain);
        let outw = ns_wrapper(spm, frame.arg2(), domain);
        (inw.base, inw.len, outw.base, outw.len)
    } else {
        (
            frame.arg1(),
            frame.arg2(),
            frame.arg3(),
            stacked_out_len(spm, frame, domain),
        )
    };

    match in_len.checked_add(out_len) {
        Some(n) if n <= PSA_MAX_IOVEC => (),
        _ => die(Fatal::TooManyVectors),
    }

    let Some((conn, service)) = spm.service_by_handle(handle) else {
        die(Fatal::InvalidHandle(handle));
    };

    // Take our own copy of the vector arrays so the caller can't change
    // them once they've been checked.
    let mut invec = [PsaInvec::default(); PSA_MAX_IOVEC];
    let mut outvec = [PsaOutvec::default(); PSA_MAX_IOVEC];
    let invec = &mut invec[..in_len];
    let outvec = &mut outvec[..out_len];
    check(spm, in_ptr, in_len * size_of::<PsaInvec>(), domain, Access::ReadOnly);
    check(
        spm,
        out_ptr,
        out_len * size_of::<PsaOutvec>(),
        domain,
        Access::ReadWrite,
    );
    if umem::copy_from_caller(&spm.memory, in_ptr, invec, domain).is_err() {
        die(Fatal::MemoryCheck(in_ptr));
    }
    if umem::copy_from_caller(&spm.memory, out_ptr, outvec, domain).is_err() {
        die(Fatal::MemoryCheck(out_ptr));
    }
    for v in invec.iter() {
        check(spm, v.base, v.len, domain, Access::ReadOnly);
    }
    for v in outvec.iter() {
        check(spm, v.base, v.len, domain, Access::ReadWrite);
    }

    let Some(msg) = spm.create_msg(MsgRequest {
        service,
        conn: Some(conn),
        msg_type: PSA_IPC_CALL,
        ns_caller,
        invec,
        outvec,
        caller_outvec: out_ptr,
    }) else {
        return status(PSA_ERROR_GENERIC_ERROR);
    };
    spm.send_event(msg);
    status(PSA_SUCCESS)
}

fn close(spm: &mut Spm, frame: &SavedState) -> usize {
    let handle = frame.arg0() as i32;
    if handle == PSA_NULL_HANDLE {
        return status(PSA_SUCCESS);
    }
    let Some((conn, service)) = spm.service_by_handle(handle) else {
        die(Fatal::InvalidHandle(handle));
    };
    if let Some(msg) = spm.create_msg(MsgRequest {
        service,
        conn: Some(conn),
        msg_type: PSA_IPC_DISCONNECT,
        ns_caller: frame.caller_is_non_secure(),
        invec: &[],
        outvec: &[],
        caller_outvec: 0,
    }) {
        spm.send_event(msg);
    }
    status(PSA_SUCCESS)
}

fn wait(spm: &mut Spm, frame: &SavedState) -> usize {
    let args = frame.as_wait_args();
    let index = spm.running_partition();
    let p = &mut spm.partitions[index];
    if args.signal_mask & p.assigned == 0 {
        die(Fatal::UnassignedSignals(args.signal_mask));
    }
    p.signal_mask = args.signal_mask;
    if args.timeout & PSA_TIMEOUT_MASK == PSA_BLOCK
        && p.signals & args.signal_mask == 0
    {
        p.event.wait(&mut spm.sched);
    }
    (p.signals & args.signal_mask) as usize
}

fn get(spm: &mut Spm, frame: &SavedState) -> usize {
    let signal = frame.arg0() as u32;
    let buffer = frame.arg1();
    let index = spm.running_partition();
    let domain = spm.partition_domain(index);

    if !kerncore::is_single_signal(signal) {
        die(Fatal::NotSingleSignal(signal));
    }
    check(spm, buffer, size_of::<PsaMsg>(), domain, Access::ReadWrite);
    if spm.partitions[index].signals & signal == 0 {
        die(Fatal::SignalNotAsserted(signal));
    }
    let Some(service) = spm.service_by_signal(index, signal) else {
        die(Fatal::NoServiceForSignal(signal));
    };

    let Some(s) = spm.services.get_mut(service) else {
        die(Fatal::NoServiceForSignal(signal));
    };
    let Some(msg) = s.queue.dequeue(&mut spm.msgs) else {
        // Signal raced ahead of the queue. Not the caller's fault.
        return status(PSA_ERROR_DOES_NOT_EXIST);
    };
    let drained = s.queue.is_empty();
    let Some(msg) = spm.msgs.id_at(msg) else {
        die(Fatal::QueueRejected);
    };

    let view = [spm.message(msg).msg];
    if umem::copy_to_caller(&spm.memory, buffer, &view, domain).is_err() {
        die(Fatal::MemoryCheck(buffer));
    }
    if drained {
        spm.partitions[index].signals &= !signal;
    }
    status(PSA_SUCCESS)
}

fn set_rhandle(spm: &mut Spm, frame: &SavedState) -> usize {
    let msg = spm.msg_from_handle(frame.arg0() as i32);
    let rhandle = frame.arg1();
    let m = spm.message_mut(msg);
    let msg_type = m.msg.msg_type;
    if msg_type == PSA_IPC_DISCONNECT {
        die(Fatal::WrongMessageType(msg_type));
    }
    m.msg.rhandle = rhandle;
    let (service, conn) = (m.service, m.conn);
    // On CONNECT there's no connection yet; the reply installs it.
    if msg_type >= PSA_IPC_CALL {
        if let Some(conn) = conn {
            spm.set_rhandle(service, conn.to_word(), rhandle);
        }
    }
    status(PSA_SUCCESS)
}

/// Resolves and checks the message and vector index for read/skip/write.
fn call_msg(spm: &Spm, handle: i32, index: u32) -> (ChunkId, usize) {
    let msg = spm.msg_from_handle(handle);
    let msg_type = spm.message(msg).msg.msg_type;
    if msg_type < PSA_IPC_CALL {
        die(Fatal::WrongMessageType(msg_type));
    }
    let i = index as usize;
    if i >= PSA_MAX_IOVEC {
        die(Fatal::VectorIndex(index));
    }
    (msg, i)
}

fn read(spm: &mut Spm, frame: &SavedState) -> usize {
    let args = frame.as_transfer_args();
    let (msg, i) = call_msg(spm, args.msg_handle, args.index);
    let domain = spm.partition_domain(spm.running_partition());

    let m = spm.message(msg);
    let remaining = m.msg.in_size[i];
    if remaining == 0 {
        return 0;
    }
    let (src, src_domain) = (m.invec[i].base, m.caller_domain);
    check(spm, args.buffer, args.len, domain, Access::ReadWrite);

    let bytes = args.len.min(remaining);
    if umem::copy_between(&spm.memory, src, src_domain, args.buffer, domain, bytes)
        .is_err()
    {
        die(Fatal::MemoryCheck(src));
    }
    let m = spm.message_mut(msg);
    m.invec[i].base += bytes;
    m.msg.in_size[i] -= bytes;
    bytes
}

fn skip(spm: &mut Spm, frame: &SavedState) -> usize {
    let args = frame.as_transfer_args();
    let (msg, i) = call_msg(spm, args.msg_handle, args.index);
    let m = spm.message_mut(msg);
    let bytes = args.len.min(m.msg.in_size[i]);
    m.invec[i].base += bytes;
    m.msg.in_size[i] -= bytes;
    bytes
}

fn write(spm: &mut Spm, frame: &SavedState) -> usize {
    let args = frame.as_transfer_args();
    let (msg, i) = call_msg(spm, args.msg_handle, args.index);
    let domain = spm.partition_domain(spm.running_partition());

    let m = spm.message(msg);
    let (written, capacity) = (m.outvec[i].len, m.msg.out_size[i]);
    if args.len > capacity - written {
        die(Fatal::WriteOverflow);
    }
    let (dst, dst_domain) = (m.outvec[i].base + written, m.caller_domain);
    check(spm, args.buffer, args.len, domain, Access::ReadOnly);

    if umem::copy_between(&spm.memory, args.buffer, domain, dst, dst_domain, args.len)
        .is_err()
    {
        die(Fatal::MemoryCheck(dst));
    }
    spm.message_mut(msg).outvec[i].len += args.len;
    status(PSA_SUCCESS)
}

/// Hands the final written lengths back to the caller's own vectors.
fn update_caller_outvec(spm: &Spm, msg: ChunkId) {
    let m = spm.message(msg);
    for i in 0..PSA_MAX_IOVEC {
        if m.msg.out_size[i] == 0 {
            continue;
        }
        let addr = m.caller_outvec + i * size_of::<PsaOutvec>();
        let mut theirs = [PsaOutvec::default()];
        if umem::copy_from_caller(&spm.memory, addr, &mut theirs, m.caller_domain)
            .is_err()
        {
            die(Fatal::MemoryCheck(addr));
        }
        if theirs[0].base != m.outvec[i].base {
            die(Fatal::OutvecMismatch);
        }
        theirs[0].len = m.outvec[i].len;
        if umem::copy_to_caller(&spm.memory, addr, &theirs, m.caller_domain)
            .is_err()
        {
            die(Fatal::MemoryCheck(addr));
        }
    }
}

fn reply(spm: &mut Spm, frame: &SavedState) -> usize {
    let args = frame.as_reply_args();
    let msg = spm.msg_from_handle(args.msg_handle);
    let m = spm.message(msg);
    let (msg_type, service, conn, rhandle) =
        (m.msg.msg_type, m.service, m.conn, m.msg.rhandle);

    let retval = match msg_type {
        PSA_IPC_CONNECT => match args.status {
            PSA_SUCCESS => {
                let Some(handle) = spm.create_conn_handle(service) else {
                    die(Fatal::ConnectionsExhausted);
                };
                spm.set_rhandle(service, handle, rhandle);
                handle
            }
            PSA_ERROR_CONNECTION_REFUSED | PSA_ERROR_CONNECTION_BUSY => {
                args.status
            }
            s => die(Fatal::BadConnectStatus(s)),
        },
        PSA_IPC_DISCONNECT => {
            // The status doesn't matter; the connection goes regardless.
            if let Some(conn) = conn {
                spm.free_conn_handle(service, conn.to_word());
            }
            PSA_SUCCESS
        }
        t if t >= PSA_IPC_CALL => {
            update_caller_outvec(spm, msg);
            args.status
        }
        t => die(Fatal::WrongMessageType(t)),
    };

    spm.complete_msg(msg, status(retval));
    status(PSA_SUCCESS)
}

fn notify(spm: &mut Spm, frame: &SavedState) -> usize {
    let partition_id = frame.arg0() as i32;
    let Some(index) = spm.partition_index(partition_id) else {
        die(Fatal::NoSuchPartition(partition_id));
    };
    spm.assert_signal(index, PSA_DOORBELL);
    status(PSA_SUCCESS)
}

fn clear(spm: &mut Spm) -> usize {
    let index = spm.running_partition();
    let p = &mut spm.partitions[index];
    if p.signals & PSA_DOORBELL == 0 {
        die(Fatal::DoorbellNotAsserted);
    }
    p.signals &= !PSA_DOORBELL;
    status(PSA_SUCCESS)
}

fn eoi(spm: &mut Spm, frame: &SavedState) -> usize {
    let signal = frame.arg0() as u32;
    if !kerncore::is_single_signal(signal) {
        die(Fatal::NotSingleSignal(signal));
    }
    let index = spm.running_partition();
    let id = spm.partitions[index].id();
    let Some(desc) = irq::irq_for_signal(spm.irqs, id, signal) else {
        die(Fatal::NotAnIrqSignal(signal));
    };
    let p = &mut spm.partitions[index];
    if p.signals & signal == 0 {
        die(Fatal::SignalNotAsserted(signal));
    }
    p.signals &= !signal;
    arch::clear_pending_irq(desc.irq);
    arch::enable_irq(desc.irq);
    status(PSA_SUCCESS)
}
