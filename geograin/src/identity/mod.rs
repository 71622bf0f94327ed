//! Silo identities and consistent hashing.

mod hash;
mod interner;
mod node;
mod ring;

pub use hash::jenkins_hash;
pub use interner::IdentityInterner;
pub use node::{allocate_generation, NodeIdentity, WILDCARD_GENERATION};
pub use ring::{PartitionRing, DEFAULT_VIRTUAL_BUCKETS};
