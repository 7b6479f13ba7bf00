// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Non-secure client contexts.
//!
//! Requests from the non-secure world all arrive on one thread, but may be
//! made on behalf of several non-secure clients. The non-secure side loads a
//! context before calling and stores it afterwards; while one is loaded, its
//! client id is the one messages carry. Ids are negative and handed out
//! `-1, -2, ...`, wrapping back to `-1`.

use abi::{IpcError, DEFAULT_NS_CLIENT_ID};

use crate::config::MAX_NS_CLIENTS;
use crate::pool::{ChunkId, Pool};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NsContext {
    pub client_id: i32,
}

pub struct NsClients {
    contexts: Pool<NsContext, MAX_NS_CLIENTS>,
    active: Option<ChunkId>,
    next_id: i32,
}

impl Default for NsClients {
    fn default() -> Self {
        Self::new()
    }
}

impl NsClients {
    pub fn new() -> Self {
        Self {
            contexts: Pool::new(),
            active: None,
            next_id: DEFAULT_NS_CLIENT_ID,
        }
    }

    pub fn init(&mut self) -> Result<(), IpcError> {
        self.contexts.init(MAX_NS_CLIENTS)?;
        self.active = None;
        self.next_id = DEFAULT_NS_CLIENT_ID;
        Ok(())
    }

    /// Makes a context for a new non-secure client. Ids still held by a
    /// live context are passed over once the counter has wrapped.
    pub fn alloc_context(&mut self) -> Option<ChunkId> {
        if self.contexts.outstanding() == self.contexts.capacity() {
            return None;
        }
        let mut client_id = self.next_id;
        while self.contexts.iter().any(|(_, c)| c.client_id == client_id) {
            client_id = next_client_id(client_id);
        }
        let id = self.contexts.alloc(NsContext { client_id })?;
        self.next_id = next_client_id(client_id);
        Some(id)
    }

    pub fn free_context(&mut self, id: ChunkId) -> Result<(), IpcError> {
        if self.contexts.get(id).is_none() {
            return Err(IpcError::BadParameters);
        }
        if self.active == Some(id) {
            self.active = None;
        }
        self.contexts.free(id);
        Ok(())
    }

    /// Marks `id` as the client on whose behalf requests are now made.
    pub fn load_context(&mut self, id: ChunkId) -> Result<(), IpcError> {
        if self.contexts.get(id).is_none() {
            return Err(IpcError::BadParameters);
        }
        self.active = Some(id);
        Ok(())
    }

    /// Ends `id`'s turn. It must be the loaded context.
    pub fn store_context(&mut self, id: ChunkId) -> Result<(), IpcError> {
        if self.active != Some(id) {
            return Err(IpcError::BadParameters);
        }
        self.active = None;
        Ok(())
    }

    /// Client id for messages from the non-secure world.
    pub fn current_client_id(&self) -> i32 {
        self.active
            .and_then(|id| self.contexts.get(id))
            .map_or(DEFAULT_NS_CLIENT_ID, |c| c.client_id)
    }
}

fn next_client_id(id: i32) -> i32 {
    id.checked_sub(1).unwrap_or(DEFAULT_NS_CLIENT_ID)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clients() -> NsClients {
        let mut c = NsClients::new();
        c.init().unwrap();
        c
    }

    #[test]
    fn default_id_when_nothing_is_loaded() {
        let c = clients();
        assert_eq!(c.current_client_id(), -1);
    }

    #[test]
    fn ids_count_down() {
        let mut c = clients();
        let a = c.alloc_context().unwrap();
        let b = c.alloc_context().unwrap();
        c.load_context(b).unwrap();
        assert_eq!(c.current_client_id(), -2);
        c.store_context(b).unwrap();
        c.load_context(a).unwrap();
        assert_eq!(c.current_client_id(), -1);
    }

    #[test]
    fn store_requires_the_active_context() {
        let mut c = clients();
        let a = c.alloc_context().unwrap();
        let b = c.alloc_context().unwrap();
        c.load_context(a).unwrap();
        assert_eq!(c.store_context(b), Err(IpcError::BadParameters));
        c.free_context(a).unwrap();
        assert_eq!(c.current_client_id(), -1);
        assert_eq!(c.load_context(a), Err(IpcError::BadParameters));
    }

    #[test]
    fn wrapped_ids_skip_live_contexts() {
        let mut c = clients();
        let first = c.alloc_context().unwrap();
        let second = c.alloc_context().unwrap();
        c.next_id = i32::MIN;
        let last = c.alloc_context().unwrap();
        // Wraps to -1 and -2, both still held, and lands on -3.
        let wrapped = c.alloc_context().unwrap();

        let id_of = |c: &mut NsClients, id| {
            c.load_context(id).unwrap();
            let client = c.current_client_id();
            c.store_context(id).unwrap();
            client
        };
        assert_eq!(id_of(&mut c, first), -1);
        assert_eq!(id_of(&mut c, second), -2);
        assert_eq!(id_of(&mut c, last), i32::MIN);
        assert_eq!(id_of(&mut c, wrapped), -3);
    }

    #[test]
    fn pool_of_contexts_runs_out() {
        let mut c = clients();
        for _ in 0..MAX_NS_CLIENTS {
            assert!(c.alloc_context().is_some());
        }
        assert_eq!(c.alloc_context(), None);
    }
}
