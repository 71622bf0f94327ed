//! Core directory types: grain identities, activation addresses, statuses
//! and the responses clusters exchange while voting on ownership.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{jenkins_hash, NodeIdentity};

/// Identity of a grain: its type plus a key within that type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrainId {
    /// Grain type name, e.g. `"Counter"`.
    pub grain_type: String,
    /// Key within the type, e.g. `"alice"`.
    pub key: String,
}

impl GrainId {
    /// Create a grain identity.
    pub fn new(grain_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            grain_type: grain_type.into(),
            key: key.into(),
        }
    }

    /// Stable hash used for ring placement and precedence.
    pub fn uniform_hash(&self) -> u32 {
        jenkins_hash(self.to_string().as_bytes())
    }
}

impl fmt::Display for GrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.grain_type, self.key)
    }
}

/// Tag of one activation of a grain. A re-activation gets a new tag, which
/// tells stale directory entries from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivationId(pub u64);

impl ActivationId {
    /// Create an activation ID from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "act-{:016x}", self.0)
    }
}

/// Full address of an activation: which grain, on which silo, which
/// incarnation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivationAddress {
    /// The grain.
    pub grain: GrainId,
    /// Silo hosting the activation.
    pub silo: NodeIdentity,
    /// The activation tag.
    pub activation: ActivationId,
}

impl ActivationAddress {
    /// Create an activation address.
    pub fn new(grain: GrainId, silo: NodeIdentity, activation: ActivationId) -> Self {
        Self {
            grain,
            silo,
            activation,
        }
    }

    /// Cluster of the hosting silo, if tagged.
    pub fn cluster(&self) -> Option<&str> {
        self.silo.cluster()
    }
}

impl fmt::Display for ActivationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.grain, self.silo, self.activation)
    }
}

/// Multi-cluster status of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationStatus {
    /// This cluster owns the single activation.
    Owned,
    /// Registered locally, but some cluster could not be consulted.
    Doubtful,
    /// Ownership requested, remote votes pending.
    RequestedOwnership,
    /// Lost a concurrent ownership race to another cluster.
    RaceLoser,
    /// Cached pointer to an activation owned by another cluster.
    Cached,
}

/// How a grain's activations are registered across clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegistrationStrategy {
    /// Registration only coordinates within this cluster.
    #[default]
    ClusterLocal,
    /// At most one activation across every cluster.
    GlobalSingleInstance,
}

/// An activation some cluster pointed at while voting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteClaim {
    /// The existing activation, if the cluster reported one.
    pub address: Option<ActivationAddress>,
    /// Directory etag of that entry.
    pub etag: Option<u64>,
    /// Cluster that answered.
    pub cluster: Option<String>,
}

/// One cluster's answer to "may I own this grain?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationResponse {
    /// No activation there, and none wanted.
    Pass,
    /// The cluster has or wants an activation.
    Failed {
        /// The cluster holds the definite owner.
        owned: bool,
        /// What it points at.
        claim: RemoteClaim,
    },
    /// The cluster could not be consulted (timeout or error).
    Faulted {
        /// Cluster that did not answer.
        cluster: Option<String>,
        /// Why.
        reason: String,
    },
}

impl ActivationResponse {
    /// A definite owner in `cluster`.
    pub fn owned_by(address: ActivationAddress, etag: u64, cluster: Option<String>) -> Self {
        ActivationResponse::Failed {
            owned: true,
            claim: RemoteClaim {
                address: Some(address),
                etag: Some(etag),
                cluster,
            },
        }
    }

    /// A competing, not yet definite, activation in `cluster`.
    pub fn candidate(address: ActivationAddress, etag: u64, cluster: Option<String>) -> Self {
        ActivationResponse::Failed {
            owned: false,
            claim: RemoteClaim {
                address: Some(address),
                etag: Some(etag),
                cluster,
            },
        }
    }

    /// A refusal that names no activation.
    pub fn refused(cluster: Option<String>) -> Self {
        ActivationResponse::Failed {
            owned: false,
            claim: RemoteClaim {
                address: None,
                etag: None,
                cluster,
            },
        }
    }

    /// Sentinel for a cluster that never answered.
    pub fn timed_out(cluster: Option<String>) -> Self {
        ActivationResponse::Faulted {
            cluster,
            reason: "timed out".to_string(),
        }
    }

    /// Whether this is a pass.
    pub fn is_pass(&self) -> bool {
        matches!(self, ActivationResponse::Pass)
    }
}
