//! Cluster-local registration: no cross-cluster coordination.

use std::rc::Rc;

use super::partition::DirectoryPartition;
use super::types::{ActivationAddress, ActivationStatus, GrainId};

/// Registers activations in the local partition only.
///
/// Single activations are first-writer-wins at the partition; multiple
/// activations simply accumulate.
#[derive(Debug, Clone)]
pub struct ClusterLocalRegistrar {
    partition: Rc<DirectoryPartition>,
}

impl ClusterLocalRegistrar {
    /// Create a registrar over `partition`.
    pub fn new(partition: Rc<DirectoryPartition>) -> Self {
        Self { partition }
    }

    /// The partition registrations land in.
    pub fn partition(&self) -> &Rc<DirectoryPartition> {
        &self.partition
    }

    /// Register `address`. Returns the address that is registered and the
    /// entry etag.
    ///
    /// With `single_activation`, an existing activation wins and is returned
    /// in place of `address`.
    pub fn register(
        &self,
        address: &ActivationAddress,
        single_activation: bool,
    ) -> (ActivationAddress, u64) {
        if single_activation {
            let (winner, etag) = self
                .partition
                .add_single_activation(address, ActivationStatus::Owned);
            if winner != *address {
                tracing::debug!(requested = %address, winner = %winner, "single activation already registered");
            }
            (winner, etag)
        } else {
            let etag = self.partition.add_activation(address);
            (address.clone(), etag)
        }
    }

    /// Unregister exactly this activation. `force` bypasses the grace period.
    pub fn unregister(&self, address: &ActivationAddress, force: bool) -> bool {
        self.partition.remove_activation(address, force)
    }

    /// Remove every activation of `grain`.
    pub fn delete(&self, grain: &GrainId) -> bool {
        self.partition.remove_grain(grain)
    }
}
