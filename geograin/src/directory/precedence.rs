//! Tie-breaking between clusters competing for one grain.

use std::fmt;

use super::types::GrainId;
use crate::identity::jenkins_hash;

/// Deterministic precedence between two clusters for one grain.
///
/// Implementations must be a strict total order per grain: the same inputs
/// always give the same answer, and exactly one of `precedes(g, a, b)` and
/// `precedes(g, b, a)` holds for `a != b`. That is what makes ownership
/// decisions independent of the order in which votes arrive.
pub trait ActivationPrecedence: fmt::Debug {
    /// Whether `candidate` takes precedence over `incumbent` for `grain`.
    fn precedes(&self, grain: &GrainId, candidate: &str, incumbent: &str) -> bool;
}

/// Orders clusters by a stable hash of grain and cluster, breaking hash
/// ties by cluster name. Lower wins.
///
/// Different grains favour different clusters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashedPrecedence;

impl HashedPrecedence {
    fn rank(grain: &GrainId, cluster: &str) -> (u32, String) {
        let text = format!("{grain}{cluster}");
        (jenkins_hash(text.as_bytes()), cluster.to_owned())
    }
}

impl ActivationPrecedence for HashedPrecedence {
    fn precedes(&self, grain: &GrainId, candidate: &str, incumbent: &str) -> bool {
        Self::rank(grain, candidate) < Self::rank(grain, incumbent)
    }
}
