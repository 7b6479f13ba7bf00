// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A hosted stand-in for the CPU and the trap entry assembly.
//!
//! `World` holds the manager and the live register file of whichever thread
//! is "on the CPU". A test plays that thread: it calls `trap`, which loads
//! the argument registers, enters the manager, and then runs the reschedule
//! handler if the trap armed one, exactly as PendSV would on the way out.
//! Afterwards `frame` may belong to a different thread; `running` says whose.

#![allow(dead_code)]

use std::mem::size_of;

use abi::{
    IrqDesc, PartitionDesc, PartitionFlags, Priority, PsaMsg, PsaOutvec,
    ServiceDesc, Sysnum, VersionPolicy, PSA_BLOCK,
};
use spm::arch::{SavedState, BASIC_FRAME_WORDS};
use spm::config::SpmConfig;
use spm::irq::handle_irq;
use spm::spm::Spm;
use spm::svc::syscall_entry;
use spm::umem::{MemoryMap, RegionName};
use zerocopy::FromBytes;

pub const NS_ID: i32 = 0;
pub const P1_ID: i32 = 256;
pub const P2_ID: i32 = 257;

pub const S1: u32 = 1 << 4;
pub const S2: u32 = 1 << 5;
pub const IRQ_SIGNAL: u32 = 1 << 6;
pub const IRQ_LINE: u32 = 37;

/// A bump allocator over leaked memory standing in for one trust domain's
/// RAM.
pub struct Arena {
    base: usize,
    len: usize,
    next: usize,
}

impl Arena {
    fn new(bytes: usize) -> Self {
        let words = Vec::leak(vec![0usize; bytes / size_of::<usize>()]);
        let base = words.as_mut_ptr() as usize;
        Self {
            base,
            len: bytes,
            next: base,
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// Inclusive last address.
    pub fn limit(&self) -> usize {
        self.base + self.len - 1
    }

    /// Carves out `n` bytes, word aligned.
    pub fn alloc(&mut self, n: usize) -> usize {
        let addr = self.next;
        let step = n.max(1).next_multiple_of(size_of::<usize>());
        self.next += step;
        assert!(self.next <= self.base + self.len, "arena exhausted");
        addr
    }

    pub fn put(&mut self, bytes: &[u8]) -> usize {
        let addr = self.alloc(bytes.len());
        write_bytes(addr, bytes);
        addr
    }

    pub fn put_words(&mut self, words: &[usize]) -> usize {
        let addr = self.alloc(words.len() * size_of::<usize>());
        for (i, w) in words.iter().enumerate() {
            write_bytes(addr + i * size_of::<usize>(), &w.to_ne_bytes());
        }
        addr
    }
}

pub fn read_bytes(addr: usize, n: usize) -> Vec<u8> {
    // Safety: tests only read addresses they got from an `Arena`.
    unsafe { std::slice::from_raw_parts(addr as *const u8, n).to_vec() }
}

pub fn write_bytes(addr: usize, bytes: &[u8]) {
    // Safety: as above.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len())
    }
}

pub fn read_outvec(addr: usize) -> PsaOutvec {
    let bytes = read_bytes(addr, size_of::<PsaOutvec>());
    PsaOutvec::read_from_bytes(&bytes).unwrap()
}

pub fn read_msg(addr: usize) -> PsaMsg {
    let bytes = read_bytes(addr, size_of::<PsaMsg>());
    PsaMsg::read_from_bytes(&bytes).unwrap()
}

/// Partitions and services for one test image.
pub struct Image {
    pub partitions: Vec<(i32, PartitionFlags, Priority)>,
    pub services: Vec<ServiceDesc>,
    pub irqs: Vec<IrqDesc>,
    pub messages: usize,
    pub conn_handles: usize,
}

impl Image {
    /// The non-secure partition plus P1, which hosts nothing yet.
    pub fn new() -> Self {
        Self {
            partitions: vec![
                (NS_ID, PartitionFlags::NON_SECURE, Priority::NS_THREAD),
                (
                    P1_ID,
                    PartitionFlags::IPC | PartitionFlags::APP_ROT,
                    Priority::MEDIUM,
                ),
            ],
            services: Vec::new(),
            irqs: Vec::new(),
            messages: spm::config::MAX_MESSAGES,
            conn_handles: spm::config::MAX_CONN_HANDLES,
        }
    }

    pub fn partition(mut self, id: i32, priority: Priority) -> Self {
        self.partitions.push((
            id,
            PartitionFlags::IPC | PartitionFlags::PSA_ROT,
            priority,
        ));
        self
    }

    pub fn priority(mut self, id: i32, priority: Priority) -> Self {
        for p in &mut self.partitions {
            if p.0 == id {
                p.2 = priority;
            }
        }
        self
    }

    pub fn service(
        mut self,
        partition_id: i32,
        sid: u32,
        signal: u32,
        minor_version: u32,
        policy: VersionPolicy,
    ) -> Self {
        self.services.push(ServiceDesc {
            name: "svc",
            partition_id,
            signal,
            sid,
            non_secure_clients: true,
            minor_version,
            version_policy: policy as u32,
        });
        self
    }

    /// Marks the most recently added service secure-only.
    pub fn secure_only(mut self) -> Self {
        if let Some(s) = self.services.last_mut() {
            s.non_secure_clients = false;
        }
        self
    }

    pub fn irq(mut self, partition_id: i32, line: u32, signal: u32) -> Self {
        self.irqs.push(IrqDesc {
            irq: line,
            partition_id,
            signal,
        });
        self
    }

    pub fn messages(mut self, n: usize) -> Self {
        self.messages = n;
        self
    }

    pub fn boot(self) -> World {
        let mut secure = Arena::new(0x1_0000);
        let mut ns = Arena::new(0x1_0000);

        let partitions: Vec<PartitionDesc> = self
            .partitions
            .iter()
            .map(|&(id, flags, priority)| {
                let arena = if flags.contains(PartitionFlags::NON_SECURE) {
                    &mut ns
                } else {
                    &mut secure
                };
                let stack_base = arena.alloc(0x400);
                PartitionDesc {
                    id,
                    flags,
                    priority,
                    entry_point: 0x1000_0001 + id as usize * 0x100,
                    entry_arg: 0,
                    stack_base,
                    stack_top: stack_base + 0x400,
                }
            })
            .collect();

        let memory = MemoryMap::EMPTY
            .with(RegionName::NsData, ns.base(), ns.limit())
            .with(RegionName::Heap, secure.base(), secure.limit());

        let mut config = SpmConfig::new(
            Vec::leak(partitions),
            Vec::leak(self.services),
            Vec::leak(self.irqs),
            memory,
        );
        config.messages = self.messages;
        config.conn_handles = self.conn_handles;

        let mut spm = Spm::init(&config);
        spm.start_scheduler();
        let first = spm.scheduler().require_current();
        let frame = *spm.scheduler().thread(first).save();
        let mut world = World {
            spm,
            frame,
            secure,
            ns,
        };
        world.reschedule();
        world
    }
}

pub struct World {
    pub spm: Spm,
    /// Live registers of the running thread.
    pub frame: SavedState,
    pub secure: Arena,
    pub ns: Arena,
}

impl World {
    /// Partition id of the thread on the CPU.
    pub fn running(&self) -> i32 {
        self.spm.current_partition_id()
    }

    #[track_caller]
    pub fn expect_running(&self, id: i32) {
        assert_eq!(self.running(), id, "wrong partition on the CPU");
    }

    /// Return value the running thread sees for its last trap.
    pub fn r0(&self) -> usize {
        self.frame.r0
    }

    pub fn r0_status(&self) -> i32 {
        self.frame.r0 as i32
    }

    fn reschedule(&mut self) {
        if self.spm.reschedule_pending() {
            self.spm.schedule(&mut self.frame);
        }
    }

    /// Issues trap `nr` from the running thread. Returns what the trap left
    /// in `r0` before any reschedule.
    pub fn trap(&mut self, nr: Sysnum, args: &[usize]) -> usize {
        self.trap_raw(nr as u32, args)
    }

    /// As `trap`, with a trap number that may not decode.
    pub fn trap_raw(&mut self, nr: u32, args: &[usize]) -> usize {
        let mut a = [0usize; 4];
        a[..args.len()].copy_from_slice(args);
        self.frame.r0 = a[0];
        self.frame.r1 = a[1];
        self.frame.r2 = a[2];
        self.frame.r3 = a[3];
        syscall_entry(&mut self.spm, nr, &mut self.frame);
        let ret = self.frame.r0;
        self.reschedule();
        ret
    }

    /// Takes interrupt `line` on top of whatever is running.
    pub fn interrupt(&mut self, line: u32) {
        spm::arch::raise_irq(line);
        handle_irq(&mut self.spm, line);
        self.reschedule();
    }

    pub fn connect(&mut self, sid: u32, minor: u32) -> usize {
        self.trap(Sysnum::Connect, &[sid as usize, minor as usize])
    }

    pub fn close(&mut self, handle: i32) -> usize {
        self.trap(Sysnum::Close, &[handle as usize])
    }

    pub fn wait(&mut self, mask: u32) -> usize {
        self.trap(Sysnum::Wait, &[mask as usize, PSA_BLOCK as usize])
    }

    pub fn poll(&mut self, mask: u32) -> usize {
        self.trap(Sysnum::Wait, &[mask as usize, 0])
    }

    /// `get` into fresh secure memory; returns the status and the message.
    pub fn get(&mut self, signal: u32) -> (i32, PsaMsg) {
        let buf = self.secure.alloc(size_of::<PsaMsg>());
        let status = self.trap(Sysnum::Get, &[signal as usize, buf]) as i32;
        (status, read_msg(buf))
    }

    pub fn reply(&mut self, handle: i32, status: i32) -> usize {
        self.trap(Sysnum::Reply, &[handle as usize, status as isize as usize])
    }

    pub fn read(&mut self, handle: i32, idx: u32, len: usize) -> Vec<u8> {
        let buf = self.secure.alloc(len);
        let n = self.trap(Sysnum::Read, &[handle as usize, idx as usize, buf, len]);
        read_bytes(buf, n)
    }

    pub fn write(&mut self, handle: i32, idx: u32, data: &[u8]) -> usize {
        let buf = self.secure.put(data);
        self.trap(
            Sysnum::Write,
            &[handle as usize, idx as usize, buf, data.len()],
        )
    }

    /// `call` in the non-secure shape. Returns the trap's immediate `r0`
    /// and the address of the caller's output vector array.
    pub fn ns_call(
        &mut self,
        handle: i32,
        inputs: &[&[u8]],
        out_caps: &[usize],
    ) -> (usize, usize) {
        let (invec, outvec) = vectors(&mut self.ns, inputs, out_caps);
        let inw = self.ns.put_words(&[invec, inputs.len()]);
        let outw = self.ns.put_words(&[outvec, out_caps.len()]);
        let r = self.trap(Sysnum::Call, &[handle as usize, inw, outw]);
        (r, outvec)
    }

    /// `call` in the secure shape, with the output count pushed on the
    /// caller's stack.
    pub fn secure_call(
        &mut self,
        handle: i32,
        inputs: &[&[u8]],
        out_caps: &[usize],
    ) -> (usize, usize) {
        let (invec, outvec) = vectors(&mut self.secure, inputs, out_caps);
        let stack = self.secure.alloc((BASIC_FRAME_WORDS + 1) * size_of::<usize>());
        let slot = stack + BASIC_FRAME_WORDS * size_of::<usize>();
        write_bytes(slot, &out_caps.len().to_ne_bytes());
        self.frame.sp = stack;
        let r = self.trap(
            Sysnum::Call,
            &[handle as usize, invec, inputs.len(), outvec],
        );
        (r, outvec)
    }
}

/// Lays out input data, output buffers and both vector arrays in `arena`.
fn vectors(arena: &mut Arena, inputs: &[&[u8]], out_caps: &[usize]) -> (usize, usize) {
    let mut inwords = Vec::new();
    for data in inputs {
        inwords.push(arena.put(data));
        inwords.push(data.len());
    }
    let mut outwords = Vec::new();
    for &cap in out_caps {
        outwords.push(arena.alloc(cap));
        outwords.push(cap);
    }
    let invec = if inwords.is_empty() { 0 } else { arena.put_words(&inwords) };
    let outvec = if outwords.is_empty() { 0 } else { arena.put_words(&outwords) };
    (invec, outvec)
}

