// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The partition manager proper: partition and service registries,
//! connections, and the life of a message.
//!
//! A message is born in `create_msg` when a client connects, calls, or
//! closes. `send_event` queues it on its service, raises the service's signal
//! on the hosting partition and parks the client on the message's `ack`
//! event. The service picks it up with `get`, works on it, and `reply`
//! wakes the client with the result and frees the message.

use abi::{
    IpcError, IrqDesc, PartitionDesc, PartitionFlags, PsaInvec, PsaMsg,
    PsaOutvec, ServiceDesc, VersionPolicy, PSA_DOORBELL, PSA_MAX_IOVEC,
};

use crate::arch::{self, SavedState};
use crate::config::{
    SpmConfig, MAX_CONN_HANDLES, MAX_MESSAGES, MAX_PARTITIONS, MAX_SERVICES,
};
use crate::err::Fatal;
use crate::event::Event;
use crate::fail::die;
use crate::list::{Link, Linked, List};
use crate::msgq::MsgQueue;
use crate::nspm::NsClients;
use crate::pool::{ChunkId, Pool};
use crate::thread::{Scheduler, ThreadId};
use crate::umem::{Domain, MemoryMap};

/// Stamped on every live message.
const MSG_MAGIC: u32 = 0x1515_4343;

/// Runtime state of a partition.
pub struct Partition {
    pub desc: &'static PartitionDesc,
    pub thread: Option<ThreadId>,
    /// Currently asserted signals.
    pub signals: u32,
    /// Signals the partition last asked to be woken for.
    pub signal_mask: u32,
    /// Signals this partition owns: the doorbell plus its service and
    /// interrupt signals.
    pub assigned: u32,
    /// Where the partition's thread parks in `wait`.
    pub event: Event,
    /// Services hosted here, threaded through `Service::link`.
    pub services: List,
}

impl Partition {
    pub fn id(&self) -> i32 {
        self.desc.id
    }

    pub fn is_privileged(&self) -> bool {
        self.desc.flags.is_privileged()
    }
}

pub struct Service {
    pub desc: &'static ServiceDesc,
    /// Index of the hosting partition.
    pub partition: usize,
    pub queue: MsgQueue,
    /// Live connections, threaded through `ConnHandle::link`.
    pub handles: List,
    link: Link,
}

impl Linked for Service {
    fn link(&self) -> &Link {
        &self.link
    }
    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

/// A connection between a client and a service.
pub struct ConnHandle {
    pub service: ChunkId,
    /// Service-private value handed back on every message.
    pub rhandle: usize,
    link: Link,
}

impl Linked for ConnHandle {
    fn link(&self) -> &Link {
        &self.link
    }
    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

/// An in-flight request.
pub struct Message {
    magic: u32,
    pub service: ChunkId,
    /// Connection the message travels on; `None` only for CONNECT.
    pub conn: Option<ChunkId>,
    /// What the service sees through `get`.
    pub msg: PsaMsg,
    /// Caller input vectors. `base` advances as the service reads.
    pub invec: [PsaInvec; PSA_MAX_IOVEC],
    /// Caller output vectors. `len` counts bytes written so far; the
    /// capacity is in `msg.out_size`.
    pub outvec: [PsaOutvec; PSA_MAX_IOVEC],
    /// Address of the caller's own `PsaOutvec` array, updated on reply.
    pub caller_outvec: usize,
    /// Trust domain of the caller's memory.
    pub caller_domain: Domain,
    /// Where the caller waits for the reply.
    pub ack: Event,
    link: Link,
}

impl Linked for Message {
    fn link(&self) -> &Link {
        &self.link
    }
    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

/// Vectors and bookkeeping a new message is built from.
pub struct MsgRequest<'a> {
    pub service: ChunkId,
    pub conn: Option<ChunkId>,
    pub msg_type: i32,
    pub ns_caller: bool,
    pub invec: &'a [PsaInvec],
    pub outvec: &'a [PsaOutvec],
    pub caller_outvec: usize,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Init { partitions: usize, services: usize },
    MsgCreated { handle: i32, msg_type: i32, client: i32 },
    Signal { partition: i32, signals: u32, woke: bool },
    ConnCreated(i32),
    ConnFreed(i32),
}

ringbuf::ringbuf!(Trace, 32, Trace::None);

pub struct Spm {
    pub(crate) sched: Scheduler,
    pub(crate) partitions: heapless::Vec<Partition, MAX_PARTITIONS>,
    pub(crate) services: Pool<Service, MAX_SERVICES>,
    pub(crate) conns: Pool<ConnHandle, MAX_CONN_HANDLES>,
    pub(crate) msgs: Pool<Message, MAX_MESSAGES>,
    pub(crate) ns: NsClients,
    pub(crate) irqs: &'static [IrqDesc],
    pub(crate) memory: MemoryMap,
    ns_thread: ThreadId,
}

impl Spm {
    /// Builds the registries from `config` and starts every partition's
    /// thread. An inconsistent configuration is fatal.
    pub fn init(config: &SpmConfig) -> Self {
        let mut sched = Scheduler::new();
        let mut partitions: heapless::Vec<Partition, MAX_PARTITIONS> =
            heapless::Vec::new();
        let mut services: Pool<Service, MAX_SERVICES> = Pool::new();
        let mut conns: Pool<ConnHandle, MAX_CONN_HANDLES> = Pool::new();
        let mut msgs: Pool<Message, MAX_MESSAGES> = Pool::new();
        let mut ns = NsClients::new();

        if services.init(MAX_SERVICES).is_err() {
            die(Fatal::PoolInit);
        }
        if conns.init(config.conn_handles).is_err()
            || msgs.init(config.messages).is_err()
            || ns.init().is_err()
        {
            die(Fatal::PoolInit);
        }

        let mut ns_thread = None;
        for (i, desc) in config.partitions.iter().enumerate() {
            if partitions.iter().any(|p| p.id() == desc.id) {
                die(Fatal::BadConfig("duplicate partition id"));
            }
            let non_secure = desc.flags.contains(PartitionFlags::NON_SECURE);
            let thread = if desc.flags.contains(PartitionFlags::IPC) || non_secure
            {
                let t = sched.init_thread(
                    desc.entry_point,
                    desc.entry_arg,
                    desc.stack_base,
                    desc.stack_top,
                    desc.priority,
                    i,
                );
                if sched.start(t).is_err() {
                    die(Fatal::ThreadStart(i));
                }
                if non_secure {
                    ns_thread = Some(t);
                }
                Some(t)
            } else {
                None
            };
            let p = Partition {
                desc,
                thread,
                signals: 0,
                signal_mask: 0,
                assigned: PSA_DOORBELL,
                event: Event::new(),
                services: List::new(),
            };
            if partitions.push(p).is_err() {
                die(Fatal::BadConfig("too many partitions"));
            }
        }
        let Some(ns_thread) = ns_thread else {
            die(Fatal::BadConfig("no non-secure partition"));
        };

        for desc in config.services {
            let Some(pidx) = partitions.iter().position(|p| {
                p.id() == desc.partition_id
                    && p.desc.flags.contains(PartitionFlags::IPC)
            }) else {
                die(Fatal::BadConfig("service owner missing"));
            };
            let record = Service {
                desc,
                partition: pidx,
                queue: MsgQueue::new(),
                handles: List::new(),
                link: Link::new(),
            };
            let Some(id) = services.alloc(record) else {
                die(Fatal::BadConfig("too many services"));
            };
            let p = &mut partitions[pidx];
            p.services.insert_tail(&mut services, id.index());
            p.assigned |= desc.signal;
        }

        for irq in config.irqs {
            let Some(p) =
                partitions.iter_mut().find(|p| p.id() == irq.partition_id)
            else {
                die(Fatal::BadConfig("irq owner missing"));
            };
            p.assigned |= irq.signal;
        }

        ringbuf::ringbuf_entry!(Trace::Init {
            partitions: partitions.len(),
            services: config.services.len(),
        });

        Self {
            sched,
            partitions,
            services,
            conns,
            msgs,
            ns,
            irqs: config.irqs,
            memory: config.memory.clone(),
            ns_thread,
        }
    }

    /// Hands the CPU to the non-secure thread. Callable once.
    pub fn start_scheduler(&mut self) {
        self.sched.start_scheduler(self.ns_thread);
    }

    /// The reschedule entry: switches `frame` to the most important
    /// runnable thread and sets thread-mode privilege to match.
    pub fn schedule(&mut self, frame: &mut SavedState) -> Option<ThreadId> {
        let switched = self.sched.schedule(frame);
        let privileged = self.partitions[self.running_partition()].is_privileged();
        arch::set_thread_privilege(privileged);
        switched
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.memory
    }

    pub fn ns_clients(&mut self) -> &mut NsClients {
        &mut self.ns
    }

    /// Index of the partition whose thread is on the CPU.
    pub fn running_partition(&self) -> usize {
        let owner = self.sched.owner(self.sched.require_current());
        if owner >= self.partitions.len() {
            die(Fatal::NoRunningPartition);
        }
        owner
    }

    pub fn current_partition_id(&self) -> i32 {
        self.partitions[self.running_partition()].id()
    }

    pub fn partition_index(&self, id: i32) -> Option<usize> {
        self.partitions.iter().position(|p| p.id() == id)
    }

    pub fn partition(&self, index: usize) -> &Partition {
        &self.partitions[index]
    }

    /// Signals currently asserted on partition `id`.
    pub fn partition_signals(&self, id: i32) -> Option<u32> {
        self.partition_index(id).map(|i| self.partitions[i].signals)
    }

    /// Memory domain for buffers a secure partition hands us.
    pub(crate) fn partition_domain(&self, index: usize) -> Domain {
        Domain::secure(self.partitions[index].is_privileged())
    }

    /// Finds the service of partition `index` behind `signal`.
    pub fn service_by_signal(&self, index: usize, signal: u32) -> Option<ChunkId> {
        let p = &self.partitions[index];
        if p.services.is_empty() {
            die(Fatal::PartitionHasNoServices);
        }
        p.services
            .iter(&self.services)
            .filter_map(|i| self.services.id_at(i))
            .find(|&id| {
                self.services
                    .get(id)
                    .is_some_and(|s| s.desc.signal == signal)
            })
    }

    /// Finds a service by SID among partitions that do IPC.
    pub fn service_by_sid(&self, sid: u32) -> Option<ChunkId> {
        self.partitions
            .iter()
            .filter(|p| p.desc.flags.contains(PartitionFlags::IPC))
            .flat_map(|p| p.services.iter(&self.services))
            .filter_map(|i| self.services.id_at(i))
            .find(|&id| self.services.get(id).is_some_and(|s| s.desc.sid == sid))
    }

    /// Resolves a connection handle word to its connection and service.
    pub fn service_by_handle(&self, handle: i32) -> Option<(ChunkId, ChunkId)> {
        let conn_id = ChunkId::from_word(handle)?;
        let conn = self.conns.get(conn_id)?;
        let service = self.services.get(conn.service)?;
        service
            .handles
            .iter(&self.conns)
            .any(|i| i == conn_id.index())
            .then_some((conn_id, conn.service))
    }

    pub fn service(&self, id: ChunkId) -> &Service {
        match self.services.get(id) {
            Some(s) => s,
            None => die(Fatal::ServiceCorrupted),
        }
    }

    /// Number of messages waiting on service `sid`.
    pub fn queued_messages(&self, sid: u32) -> Option<usize> {
        let id = self.service_by_sid(sid)?;
        Some(self.service(id).queue.len())
    }

    pub fn outstanding_messages(&self) -> usize {
        self.msgs.outstanding()
    }

    pub fn connection_count(&self) -> usize {
        self.conns.outstanding()
    }

    pub fn reschedule_pending(&self) -> bool {
        self.sched.reschedule_pending()
    }

    /// Opens a connection on `service`. Returns `None` when the connection
    /// pool is spent.
    pub fn create_conn_handle(&mut self, service: ChunkId) -> Option<i32> {
        let id = self.conns.alloc(ConnHandle {
            service,
            rhandle: 0,
            link: Link::new(),
        })?;
        match self.services.get_mut(service) {
            Some(s) => s.handles.insert_tail(&mut self.conns, id.index()),
            None => die(Fatal::ServiceCorrupted),
        }
        ringbuf::ringbuf_entry!(Trace::ConnCreated(id.to_word()));
        Some(id.to_word())
    }

    /// Closes connection `handle` of `service`. It must exist.
    pub fn free_conn_handle(&mut self, service: ChunkId, handle: i32) {
        let conn = self.find_conn(service, handle);
        match self.services.get_mut(service) {
            Some(s) => s.handles.remove(&mut self.conns, conn.index()),
            None => die(Fatal::ServiceCorrupted),
        }
        self.conns.free(conn);
        ringbuf::ringbuf_entry!(Trace::ConnFreed(handle));
    }

    fn find_conn(&self, service: ChunkId, handle: i32) -> ChunkId {
        if handle == abi::PSA_NULL_HANDLE {
            die(Fatal::NullHandle);
        }
        let found = ChunkId::from_word(handle).filter(|&id| {
            self.services.get(service).is_some_and(|s| {
                s.handles.iter(&self.conns).any(|i| i == id.index())
            }) && self.conns.get(id).is_some()
        });
        match found {
            Some(id) => id,
            None => die(Fatal::InvalidHandle(handle)),
        }
    }

    pub fn set_rhandle(&mut self, service: ChunkId, handle: i32, rhandle: usize) {
        let conn = self.find_conn(service, handle);
        if let Some(c) = self.conns.get_mut(conn) {
            c.rhandle = rhandle;
        }
    }

    pub fn get_rhandle(&self, service: ChunkId, handle: i32) -> usize {
        let conn = self.find_conn(service, handle);
        self.conns.get(conn).map_or(0, |c| c.rhandle)
    }

    /// Applies `service`'s version policy to a client's minor version.
    pub fn check_client_version(
        &self,
        service: ChunkId,
        minor_version: u32,
    ) -> Result<(), IpcError> {
        check_version(self.service(service).desc, minor_version)
    }

    /// Builds a message for `req` on the running partition's behalf.
    /// Returns `None` when the message pool is spent.
    pub fn create_msg(&mut self, req: MsgRequest<'_>) -> Option<ChunkId> {
        if req.invec.len() > PSA_MAX_IOVEC
            || req.outvec.len() > PSA_MAX_IOVEC
            || req.invec.len() + req.outvec.len() > PSA_MAX_IOVEC
        {
            die(Fatal::TooManyVectors);
        }

        let running = self.running_partition();
        let client_id = if req.ns_caller {
            self.ns.current_client_id()
        } else {
            self.partitions[running].id()
        };
        let caller_domain = if req.ns_caller {
            Domain {
                non_secure: true,
                privileged: false,
            }
        } else {
            self.partition_domain(running)
        };
        let rhandle = req
            .conn
            .map_or(0, |c| self.get_rhandle(req.service, c.to_word()));

        let mut msg = PsaMsg {
            msg_type: req.msg_type,
            client_id,
            rhandle,
            ..PsaMsg::default()
        };
        let mut invec = [PsaInvec::default(); PSA_MAX_IOVEC];
        let mut outvec = [PsaOutvec::default(); PSA_MAX_IOVEC];
        for (i, v) in req.invec.iter().enumerate() {
            invec[i] = *v;
            msg.in_size[i] = v.len;
        }
        for (i, v) in req.outvec.iter().enumerate() {
            // Written length starts at zero whatever the caller passed.
            outvec[i] = PsaOutvec { base: v.base, len: 0 };
            msg.out_size[i] = v.len;
        }

        let id = self.msgs.alloc(Message {
            magic: MSG_MAGIC,
            service: req.service,
            conn: req.conn,
            msg,
            invec,
            outvec,
            caller_outvec: req.caller_outvec,
            caller_domain,
            ack: Event::new(),
            link: Link::new(),
        })?;
        let handle = id.to_word();
        if let Some(m) = self.msgs.get_mut(id) {
            m.msg.handle = handle;
        }
        ringbuf::ringbuf_entry!(Trace::MsgCreated {
            handle,
            msg_type: req.msg_type,
            client: client_id,
        });
        Some(id)
    }

    /// Queues `msg` on its service, signals the hosting partition, and
    /// blocks the caller until the reply.
    pub fn send_event(&mut self, msg: ChunkId) {
        let Some(service) = self.msgs.get(msg).map(|m| m.service) else {
            die(Fatal::InvalidMessage(msg.to_word()));
        };
        let Some(s) = self.services.get_mut(service) else {
            die(Fatal::ServiceCorrupted);
        };
        if s.queue.enqueue(&mut self.msgs, msg.index()).is_err() {
            die(Fatal::QueueRejected);
        }
        let (pidx, signal) = (s.partition, s.desc.signal);
        self.assert_signal(pidx, signal);

        if let Some(m) = self.msgs.get_mut(msg) {
            m.ack.wait(&mut self.sched);
        }
    }

    /// Raises `signal` on partition `index` and wakes it if it's waiting
    /// for any of what's now asserted.
    pub(crate) fn assert_signal(&mut self, index: usize, signal: u32) {
        let p = &mut self.partitions[index];
        p.signals |= signal;
        let wake = p.signals & p.signal_mask;
        if wake != 0 {
            p.event.wake(&mut self.sched, wake as usize);
        }
        ringbuf::ringbuf_entry!(Trace::Signal {
            partition: p.id(),
            signals: p.signals,
            woke: wake != 0,
        });
    }

    /// Resolves a message handle presented by the running partition. Only
    /// messages already taken off their queue by `get` qualify.
    pub fn msg_from_handle(&self, handle: i32) -> ChunkId {
        let running = self.running_partition();
        let found = ChunkId::from_word(handle).filter(|&id| {
            self.msgs.get(id).is_some_and(|m| {
                m.magic == MSG_MAGIC
                    && !m.link.is_linked()
                    && self
                        .services
                        .get(m.service)
                        .is_some_and(|s| s.partition == running)
            })
        });
        match found {
            Some(id) => id,
            None => die(Fatal::InvalidMessage(handle)),
        }
    }

    pub fn message(&self, id: ChunkId) -> &Message {
        match self.msgs.get(id) {
            Some(m) => m,
            None => die(Fatal::InvalidMessage(id.to_word())),
        }
    }

    pub fn message_mut(&mut self, id: ChunkId) -> &mut Message {
        match self.msgs.get_mut(id) {
            Some(m) => m,
            None => die(Fatal::InvalidMessage(id.to_word())),
        }
    }

    /// Wakes the client of `msg` with `retval` and frees the message.
    pub fn complete_msg(&mut self, msg: ChunkId, retval: usize) {
        if let Some(m) = self.msgs.get_mut(msg) {
            m.ack.wake(&mut self.sched, retval);
        }
        self.msgs.free(msg);
    }
}

fn check_version(desc: &ServiceDesc, minor_version: u32) -> Result<(), IpcError> {
    let accepted = match VersionPolicy::try_from(desc.version_policy) {
        Ok(VersionPolicy::Relaxed) => minor_version <= desc.minor_version,
        Ok(VersionPolicy::Strict) => minor_version == desc.minor_version,
        Err(_) => false,
    };
    if accepted {
        Ok(())
    } else {
        Err(IpcError::Version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn service(policy: u32, minor: u32) -> ServiceDesc {
        ServiceDesc {
            name: "test",
            partition_id: 1,
            signal: 1 << 4,
            sid: 1,
            non_secure_clients: true,
            minor_version: minor,
            version_policy: policy,
        }
    }

    #[test]
    fn relaxed_accepts_older_clients() {
        let s = service(VersionPolicy::Relaxed as u32, 2);
        assert_eq!(check_version(&s, 1), Ok(()));
        assert_eq!(check_version(&s, 2), Ok(()));
        assert_eq!(check_version(&s, 3), Err(IpcError::Version));
    }

    #[test]
    fn strict_wants_exact_match() {
        let s = service(VersionPolicy::Strict as u32, 3);
        assert_eq!(check_version(&s, 3), Ok(()));
        assert_eq!(check_version(&s, 2), Err(IpcError::Version));
    }

    proptest! {
        #[test]
        fn version_policy(policy in 0u32..4, svc in any::<u32>(), client in any::<u32>()) {
            let res = check_version(&service(policy, svc), client);
            let expect = match policy {
                0 => client <= svc,
                1 => client == svc,
                _ => false,
            };
            prop_assert_eq!(res.is_ok(), expect);
        }
    }
}
