//! Consistent-hash ring over silos.
//!
//! Each silo contributes a fixed number of virtual buckets derived from
//! [`NodeIdentity::uniform_hash_codes`]. A hash belongs to the first bucket
//! at or after it, wrapping around. Every process building the ring from
//! the same membership agrees on every owner.

use std::collections::BTreeSet;

use super::node::NodeIdentity;

/// Virtual buckets per silo unless configured otherwise.
pub const DEFAULT_VIRTUAL_BUCKETS: usize = 30;

/// Immutable ring of silo buckets. Rebuild on membership change.
#[derive(Debug, Clone, Default)]
pub struct PartitionRing {
    buckets: Vec<(u32, NodeIdentity)>,
    members: Vec<NodeIdentity>,
}

impl PartitionRing {
    /// Build a ring from live members. Clients and duplicates are ignored.
    pub fn new(members: impl IntoIterator<Item = NodeIdentity>, virtual_buckets: usize) -> Self {
        let members: Vec<NodeIdentity> = members
            .into_iter()
            .filter(|node| !node.is_client())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut buckets: Vec<(u32, NodeIdentity)> = members
            .iter()
            .flat_map(|node| {
                node.uniform_hash_codes(virtual_buckets.max(1))
                    .into_iter()
                    .map(move |hash| (hash, node.clone()))
            })
            .collect();
        buckets.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        Self { buckets, members }
    }

    /// Silo owning `hash`, or `None` when the ring is empty.
    pub fn owner(&self, hash: u32) -> Option<&NodeIdentity> {
        let index = self.buckets.partition_point(|(bucket, _)| *bucket < hash);
        self.buckets
            .get(index)
            .or_else(|| self.buckets.first())
            .map(|(_, node)| node)
    }

    /// Distinct members, ordered by generation.
    pub fn members(&self) -> &[NodeIdentity] {
        &self.members
    }

    /// Number of distinct members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the ring has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
