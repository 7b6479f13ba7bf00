// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-service message queues.
//!
//! A FIFO threaded through the `next` field of each message's link. Not
//! synchronized; only the trap handler touches it.

use abi::IpcError;

use crate::list::LinkStore;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MsgQueue {
    head: Option<usize>,
    tail: Option<usize>,
    count: usize,
}

impl MsgQueue {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            count: 0,
        }
    }

    /// Appends message `index`. Fails if `store` has no such live node or
    /// the node is already queued somewhere.
    pub fn enqueue<S: LinkStore + ?Sized>(
        &mut self,
        store: &mut S,
        index: usize,
    ) -> Result<(), IpcError> {
        let link = store.link_mut(index).ok_or(IpcError::BadParameters)?;
        if link.is_linked() {
            return Err(IpcError::BadParameters);
        }
        link.set_next(None);
        link.set_linked(true);
        if let Some(t) = self.tail {
            store
                .link_mut(t)
                .ok_or(IpcError::BadParameters)?
                .set_next(Some(index));
        } else {
            self.head = Some(index);
        }
        self.tail = Some(index);
        self.count += 1;
        Ok(())
    }

    /// Pops the oldest message. An empty queue is left untouched.
    pub fn dequeue<S: LinkStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Option<usize> {
        let h = self.head?;
        let link = store.link_mut(h)?;
        self.head = link.next();
        link.set_next(None);
        link.set_linked(false);
        if self.head.is_none() {
            self.tail = None;
        }
        self.count -= 1;
        Some(h)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::{Link, Linked};
    use proptest::prelude::*;

    #[derive(Default)]
    struct Msg {
        link: Link,
    }

    impl Linked for Msg {
        fn link(&self) -> &Link {
            &self.link
        }
        fn link_mut(&mut self) -> &mut Link {
            &mut self.link
        }
    }

    #[test]
    fn rejects_missing_and_queued_nodes() {
        let mut store: Vec<Msg> = (0..2).map(|_| Msg::default()).collect();
        let mut q = MsgQueue::new();
        assert_eq!(q.enqueue(&mut store[..], 9), Err(IpcError::BadParameters));
        q.enqueue(&mut store[..], 0).unwrap();
        assert_eq!(q.enqueue(&mut store[..], 0), Err(IpcError::BadParameters));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn empty_dequeue_changes_nothing() {
        let mut store: Vec<Msg> = Vec::new();
        let mut q = MsgQueue::new();
        assert_eq!(q.dequeue(&mut store[..]), None);
        assert_eq!(q, MsgQueue::new());
        assert!(q.is_empty());
    }

    proptest! {
        #[test]
        fn dequeue_order_is_enqueue_order(order in Just((0..16usize).collect::<Vec<_>>()).prop_shuffle(), split in 0usize..16) {
            let mut store: Vec<Msg> = (0..16).map(|_| Msg::default()).collect();
            let mut q = MsgQueue::new();
            let mut out = Vec::new();
            for (n, &i) in order.iter().enumerate() {
                q.enqueue(&mut store[..], i).unwrap();
                if n == split {
                    // Drain part way through, then keep going.
                    while let Some(x) = q.dequeue(&mut store[..]) {
                        out.push(x);
                    }
                    prop_assert!(q.is_empty());
                }
            }
            while let Some(x) = q.dequeue(&mut store[..]) {
                out.push(x);
            }
            prop_assert_eq!(out, order);
            prop_assert_eq!(q.len(), 0);
        }
    }
}
