//! Interning table for [`NodeIdentity`].
//!
//! The table is an explicit context object rather than a process-wide
//! static: a silo creates one at startup and passes it to whatever
//! constructs identities, and each test gets an isolated table.
//!
//! Entries hold weak references. Identities nobody holds any more are
//! reclaimed lazily when the table grows, or eagerly through
//! [`IdentityInterner::purge`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use super::node::{NodeIdentity, NodeKey};
use crate::error::IdentityParseError;

const MIN_PURGE_THRESHOLD: usize = 1024;

/// Canonicalizes structurally equal node identities onto one allocation.
#[derive(Debug)]
pub struct IdentityInterner {
    table: RefCell<HashMap<NodeKey, Weak<NodeKey>>>,
    purge_at: Cell<usize>,
}

impl IdentityInterner {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            table: RefCell::new(HashMap::new()),
            purge_at: Cell::new(MIN_PURGE_THRESHOLD),
        }
    }

    /// Return the canonical identity for these components.
    pub fn intern(
        &self,
        endpoint: SocketAddr,
        generation: i32,
        cluster: Option<&str>,
    ) -> NodeIdentity {
        self.intern_key(NodeKey::new(endpoint, generation, cluster))
    }

    /// Parse `address:port@generation#cluster` into a canonical identity.
    pub fn parse(&self, input: &str) -> Result<NodeIdentity, IdentityParseError> {
        NodeKey::parse(input).map(|key| self.intern_key(key))
    }

    fn intern_key(&self, key: NodeKey) -> NodeIdentity {
        let mut table = self.table.borrow_mut();
        if let Some(existing) = table.get(&key).and_then(Weak::upgrade) {
            return NodeIdentity::from_shared(existing);
        }

        if table.len() >= self.purge_at.get() {
            table.retain(|_, weak| weak.strong_count() > 0);
            self.purge_at
                .set((table.len() * 2).max(MIN_PURGE_THRESHOLD));
        }

        let shared = Rc::new(key.clone());
        table.insert(key, Rc::downgrade(&shared));
        NodeIdentity::from_shared(shared)
    }

    /// Number of identities still alive.
    pub fn len(&self) -> usize {
        self.table
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Whether no identity is alive.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries for identities nobody holds. Returns how many went.
    pub fn purge(&self) -> usize {
        let mut table = self.table.borrow_mut();
        let before = table.len();
        table.retain(|_, weak| weak.strong_count() > 0);
        let purged = before - table.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = table.len(), "purged node identities");
        }
        purged
    }
}

impl Default for IdentityInterner {
    fn default() -> Self {
        Self::new()
    }
}
