// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-chunk pools.
//!
//! A `Pool<T, N>` is statically sized for `N` chunks, of which the first
//! `count` are put into service by `init`. Free chunks sit on a free list;
//! `alloc` takes from its head and `free` returns to its tail, so a chunk
//! that was just released is the last to be reused.
//!
//! Chunks are named by `ChunkId`, an index plus the slot's generation at
//! allocation time. Freeing bumps the generation, so an id kept past its
//! `free` no longer resolves and can't alias whatever reuses the slot.

use abi::IpcError;

use crate::err::Fatal;
use crate::fail::die;
use crate::list::{Link, LinkStore, Linked, List};

/// Names a live chunk in a particular pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChunkId {
    index: u16,
    generation: u16,
}

impl ChunkId {
    pub fn index(self) -> usize {
        usize::from(self.index)
    }

    /// Packs the id into a positive, nonzero handle word.
    pub fn to_word(self) -> i32 {
        let index = i32::from(self.index) + 1;
        let generation = i32::from(self.generation & 0x7FFF);
        index | (generation << 16)
    }

    /// Inverse of `to_word`. Zero and negative words never name a chunk.
    pub fn from_word(word: i32) -> Option<Self> {
        if word <= 0 {
            return None;
        }
        let index = (word & 0xFFFF) as u16;
        Some(Self {
            index: index.checked_sub(1)?,
            generation: (word >> 16) as u16,
        })
    }
}

struct Slot<T> {
    free_link: Link,
    generation: u16,
    /// `Some` while the chunk is handed out.
    value: Option<T>,
}

impl<T> Slot<T> {
    const fn new() -> Self {
        Self {
            free_link: Link::new(),
            generation: 0,
            value: None,
        }
    }
}

/// The free list's view of the slots.
struct FreeSlots<'a, T>(&'a mut [Slot<T>]);

impl<T> LinkStore for FreeSlots<'_, T> {
    fn link(&self, index: usize) -> Option<&Link> {
        self.0.get(index).map(|s| &s.free_link)
    }

    fn link_mut(&mut self, index: usize) -> Option<&mut Link> {
        self.0.get_mut(index).map(|s| &mut s.free_link)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Exhausted { capacity: usize },
}

ringbuf::ringbuf!(Trace, 4, Trace::None);

pub struct Pool<T, const N: usize> {
    slots: [Slot<T>; N],
    free: List,
    count: usize,
}

impl<T, const N: usize> Default for Pool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Pool<T, N> {
    /// Makes a pool with no chunks in service. Call `init` before use.
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::new()),
            free: List::new(),
            count: 0,
        }
    }

    /// Clears the pool and puts `count` chunks on the free list.
    pub fn init(&mut self, count: usize) -> Result<(), IpcError> {
        if count == 0 || count > N || count > usize::from(u16::MAX) {
            return Err(IpcError::BadParameters);
        }
        for s in &mut self.slots {
            *s = Slot::new();
        }
        self.free = List::new();
        for i in 0..count {
            self.free.insert_tail(&mut FreeSlots(&mut self.slots), i);
        }
        self.count = count;
        Ok(())
    }

    /// Takes a chunk off the free list and fills it with `value`. Returns
    /// `None` when every chunk is handed out.
    pub fn alloc(&mut self, value: T) -> Option<ChunkId> {
        let Some(index) = self.free.pop_head(&mut FreeSlots(&mut self.slots))
        else {
            ringbuf::ringbuf_entry!(Trace::Exhausted {
                capacity: self.count
            });
            return None;
        };
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        Some(ChunkId {
            index: index as u16,
            generation: slot.generation,
        })
    }

    /// Returns a chunk to the free list, handing back what was in it.
    ///
    /// The id must have come from `alloc` on this pool and not been freed
    /// since; anything else is fatal.
    pub fn free(&mut self, id: ChunkId) -> T {
        let value = match self.slots.get_mut(id.index()) {
            Some(s) if s.generation == id.generation => s.value.take(),
            _ => None,
        };
        let Some(value) = value else {
            die(Fatal::ForeignChunk);
        };
        let slot = &mut self.slots[id.index()];
        slot.generation = slot.generation.wrapping_add(1) & 0x7FFF;
        self.free
            .insert_tail(&mut FreeSlots(&mut self.slots), id.index());
        value
    }

    pub fn get(&self, id: ChunkId) -> Option<&T> {
        let s = self.slots.get(id.index())?;
        if s.generation != id.generation {
            return None;
        }
        s.value.as_ref()
    }

    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut T> {
        let s = self.slots.get_mut(id.index())?;
        if s.generation != id.generation {
            return None;
        }
        s.value.as_mut()
    }

    /// Resolves a raw slot index to the id of the chunk living there.
    pub fn id_at(&self, index: usize) -> Option<ChunkId> {
        let s = self.slots.get(index)?;
        s.value.is_some().then_some(ChunkId {
            index: index as u16,
            generation: s.generation,
        })
    }

    /// Number of chunks in service.
    pub fn capacity(&self) -> usize {
        self.count
    }

    /// Number of chunks currently handed out.
    pub fn outstanding(&self) -> usize {
        self.count - self.free.len()
    }

    /// Walks the chunks currently handed out.
    pub fn iter(&self) -> impl Iterator<Item = (ChunkId, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            let value = s.value.as_ref()?;
            let id = ChunkId {
                index: i as u16,
                generation: s.generation,
            };
            Some((id, value))
        })
    }
}

/// Lets chunks be linked on lists by their slot index. Free slots have no
/// link.
impl<T: Linked, const N: usize> LinkStore for Pool<T, N> {
    fn link(&self, index: usize) -> Option<&Link> {
        self.slots.get(index)?.value.as_ref().map(Linked::link)
    }

    fn link_mut(&mut self, index: usize) -> Option<&mut Link> {
        self.slots.get_mut(index)?.value.as_mut().map(Linked::link_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn init_rejects_bad_counts() {
        let mut p: Pool<u32, 4> = Pool::new();
        assert_eq!(p.init(0), Err(IpcError::BadParameters));
        assert_eq!(p.init(5), Err(IpcError::BadParameters));
        assert_eq!(p.init(4), Ok(()));
        assert_eq!(p.capacity(), 4);
    }

    #[test]
    fn exhaustion_and_reuse_order() {
        let mut p: Pool<u32, 4> = Pool::new();
        p.init(2).unwrap();
        let a = p.alloc(1).unwrap();
        let b = p.alloc(2).unwrap();
        assert_eq!(p.alloc(3), None);
        assert_eq!(p.outstanding(), 2);

        p.free(a);
        let c = p.alloc(4).unwrap();
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert_eq!(p.get(a), None);
        assert_eq!(p.get(c), Some(&4));
        assert_eq!(p.get(b), Some(&2));
    }

    #[test]
    fn freed_chunks_go_to_the_tail() {
        let mut p: Pool<u32, 3> = Pool::new();
        p.init(3).unwrap();
        let a = p.alloc(0).unwrap();
        p.free(a);
        // Slots 1 and 2 were ahead of the freed one.
        assert_eq!(p.alloc(0).unwrap().index(), 1);
        assert_eq!(p.alloc(0).unwrap().index(), 2);
        assert_eq!(p.alloc(0).unwrap().index(), 0);
    }

    #[test]
    #[should_panic(expected = "foreign chunk freed")]
    fn double_free_is_fatal() {
        let mut p: Pool<u32, 2> = Pool::new();
        p.init(2).unwrap();
        let a = p.alloc(1).unwrap();
        p.free(a);
        p.free(a);
    }

    #[test]
    fn handle_words_are_positive_and_resolve() {
        let mut p: Pool<u32, 8> = Pool::new();
        p.init(8).unwrap();
        for _ in 0..8 {
            let id = p.alloc(0).unwrap();
            let w = id.to_word();
            assert!(w > 0);
            assert_eq!(ChunkId::from_word(w), Some(id));
        }
        assert_eq!(ChunkId::from_word(0), None);
        assert_eq!(ChunkId::from_word(-5), None);
        assert_eq!(ChunkId::from_word(0x0001_0000), None);
    }

    proptest! {
        #[test]
        fn live_chunks_never_alias(ops in prop::collection::vec(any::<Option<u8>>(), 0..64)) {
            const CAP: usize = 6;
            let mut p: Pool<u32, 8> = Pool::new();
            p.init(CAP).unwrap();
            let mut live: Vec<ChunkId> = Vec::new();
            for (n, op) in ops.into_iter().enumerate() {
                match op {
                    None => {
                        let got = p.alloc(n as u32);
                        prop_assert_eq!(got.is_none(), live.len() == CAP);
                        if let Some(id) = got {
                            prop_assert!(live.iter().all(|l| l.index() != id.index()));
                            live.push(id);
                        }
                    }
                    Some(i) if !live.is_empty() => {
                        let id = live.swap_remove(usize::from(i) % live.len());
                        p.free(id);
                    }
                    Some(_) => {}
                }
                prop_assert_eq!(p.outstanding(), live.len());
            }
        }
    }
}
