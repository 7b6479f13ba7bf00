// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Intrusive doubly-linked lists over index arenas.
//!
//! A node embeds a `Link` and lives in some slab (a pool, a fixed array);
//! the list itself only remembers the indices of its ends. Every operation
//! except iteration is O(1) and none allocates.
//!
//! A node may be on at most one list through a given `Link`. Inserting a
//! linked node or removing an unlinked one is a corrupted-state condition
//! and is fatal.

use crate::err::Fatal;
use crate::fail::die;

/// Link fields embedded in a list member.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
}

impl Link {
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub(crate) fn next(&self) -> Option<usize> {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: Option<usize>) {
        self.next = next;
    }

    pub(crate) fn set_linked(&mut self, linked: bool) {
        self.linked = linked;
    }
}

/// A record that embeds a `Link`.
pub trait Linked {
    fn link(&self) -> &Link;
    fn link_mut(&mut self) -> &mut Link;
}

/// Somewhere list nodes can be found by index.
pub trait LinkStore {
    fn link(&self, index: usize) -> Option<&Link>;
    fn link_mut(&mut self, index: usize) -> Option<&mut Link>;
}

impl<T: Linked> LinkStore for [T] {
    fn link(&self, index: usize) -> Option<&Link> {
        self.get(index).map(Linked::link)
    }

    fn link_mut(&mut self, index: usize) -> Option<&mut Link> {
        self.get_mut(index).map(Linked::link_mut)
    }
}

fn node<S: LinkStore + ?Sized>(store: &S, index: usize) -> &Link {
    match store.link(index) {
        Some(l) => l,
        None => die(Fatal::ListCorrupted),
    }
}

fn node_mut<S: LinkStore + ?Sized>(store: &mut S, index: usize) -> &mut Link {
    match store.link_mut(index) {
        Some(l) => l,
        None => die(Fatal::ListCorrupted),
    }
}

/// The ends of a list whose nodes live in some `LinkStore`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct List {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl List {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn first(&self) -> Option<usize> {
        self.head
    }

    pub fn insert_tail<S: LinkStore + ?Sized>(
        &mut self,
        store: &mut S,
        index: usize,
    ) {
        let n = node_mut(store, index);
        if n.linked {
            die(Fatal::ListCorrupted);
        }
        *n = Link {
            prev: self.tail,
            next: None,
            linked: true,
        };
        match self.tail {
            Some(t) => node_mut(store, t).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
    }

    pub fn insert_head<S: LinkStore + ?Sized>(
        &mut self,
        store: &mut S,
        index: usize,
    ) {
        let n = node_mut(store, index);
        if n.linked {
            die(Fatal::ListCorrupted);
        }
        *n = Link {
            prev: None,
            next: self.head,
            linked: true,
        };
        match self.head {
            Some(h) => node_mut(store, h).prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
        self.len += 1;
    }

    /// Unlinks `index`, which must be a member of this list.
    pub fn remove<S: LinkStore + ?Sized>(&mut self, store: &mut S, index: usize) {
        let n = *node(store, index);
        if !n.linked {
            die(Fatal::ListCorrupted);
        }
        match n.prev {
            Some(p) => node_mut(store, p).next = n.next,
            None if self.head == Some(index) => self.head = n.next,
            None => die(Fatal::ListCorrupted),
        }
        match n.next {
            Some(x) => node_mut(store, x).prev = n.prev,
            None => self.tail = n.prev,
        }
        *node_mut(store, index) = Link::new();
        self.len -= 1;
    }

    /// Removes and returns the first node.
    pub fn pop_head<S: LinkStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> Option<usize> {
        let h = self.head?;
        self.remove(store, h);
        Some(h)
    }

    /// Walks the list from head to tail.
    pub fn iter<'a, S: LinkStore + ?Sized>(
        &self,
        store: &'a S,
    ) -> impl Iterator<Item = usize> + 'a {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let here = cursor?;
            cursor = node(store, here).next;
            Some(here)
        })
    }
}
