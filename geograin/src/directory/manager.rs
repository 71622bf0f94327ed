//! Strategy table for grain registration.
//!
//! A silo builds one [`RegistrarManager`] at startup. Grains declare a
//! [`RegistrationStrategy`] (or none, meaning cluster-local) and the
//! manager hands back the registrar implementing it. The manager also
//! tracks cluster membership on a [`PartitionRing`] to say which silo's
//! partition is authoritative for a grain.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::cluster_local::ClusterLocalRegistrar;
use super::partition::DirectoryPartition;
use super::registrar::GrainRegistrar;
use super::types::{GrainId, RegistrationStrategy};
use crate::error::RegistrarError;
use crate::identity::{NodeIdentity, PartitionRing, DEFAULT_VIRTUAL_BUCKETS};

/// Maps registration strategies to registrars.
#[derive(Debug)]
pub struct RegistrarManager {
    registrars: HashMap<RegistrationStrategy, GrainRegistrar>,
    ring: RefCell<PartitionRing>,
    virtual_buckets: usize,
}

impl RegistrarManager {
    /// Create a manager with the cluster-local registrar over `partition`.
    pub fn new(partition: Rc<DirectoryPartition>) -> Self {
        let mut registrars = HashMap::new();
        registrars.insert(
            RegistrationStrategy::ClusterLocal,
            GrainRegistrar::ClusterLocal(ClusterLocalRegistrar::new(partition)),
        );
        Self {
            registrars,
            ring: RefCell::new(PartitionRing::default()),
            virtual_buckets: DEFAULT_VIRTUAL_BUCKETS,
        }
    }

    /// Install `registrar` for its strategy, replacing any previous one.
    pub fn with_registrar(mut self, registrar: impl Into<GrainRegistrar>) -> Self {
        let registrar = registrar.into();
        self.registrars.insert(registrar.strategy(), registrar);
        self
    }

    /// Set the virtual buckets each silo gets on the partition ring.
    pub fn with_virtual_buckets(mut self, buckets: usize) -> Self {
        self.virtual_buckets = buckets.max(1);
        self
    }

    /// Registrar for `strategy`.
    pub fn registrar(&self, strategy: RegistrationStrategy) -> Result<&GrainRegistrar, RegistrarError> {
        self.registrars
            .get(&strategy)
            .ok_or(RegistrarError::NoRegistrar(strategy))
    }

    /// Registrar for a grain's declared strategy, cluster-local when it
    /// declares none.
    pub fn registrar_for(
        &self,
        declared: Option<RegistrationStrategy>,
    ) -> Result<&GrainRegistrar, RegistrarError> {
        self.registrar(declared.unwrap_or_default())
    }

    /// Installed strategies.
    pub fn strategies(&self) -> Vec<RegistrationStrategy> {
        self.registrars.keys().copied().collect()
    }

    /// Rebuild the partition ring from the cluster's live silos.
    pub fn update_membership(&self, members: impl IntoIterator<Item = NodeIdentity>) {
        let ring = PartitionRing::new(members, self.virtual_buckets);
        tracing::debug!(members = ring.len(), "directory ring rebuilt");
        *self.ring.borrow_mut() = ring;
    }

    /// Silo whose partition is authoritative for `grain`.
    pub fn partition_owner(&self, grain: &GrainId) -> Option<NodeIdentity> {
        self.ring.borrow().owner(grain.uniform_hash()).cloned()
    }
}
