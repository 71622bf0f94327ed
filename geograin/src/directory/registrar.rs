//! Closed set of registration strategies behind one dispatch type.

use std::rc::Rc;

use super::cluster_local::ClusterLocalRegistrar;
use super::global_single_instance::GlobalSingleInstanceRegistrar;
use super::types::{ActivationAddress, GrainId, RegistrationStrategy};

/// A registrar for one [`RegistrationStrategy`].
#[derive(Debug, Clone)]
pub enum GrainRegistrar {
    /// Registration within this cluster only.
    ClusterLocal(ClusterLocalRegistrar),
    /// One activation across all clusters.
    GlobalSingleInstance(Rc<GlobalSingleInstanceRegistrar>),
}

impl GrainRegistrar {
    /// Strategy this registrar implements.
    pub fn strategy(&self) -> RegistrationStrategy {
        match self {
            GrainRegistrar::ClusterLocal(_) => RegistrationStrategy::ClusterLocal,
            GrainRegistrar::GlobalSingleInstance(_) => RegistrationStrategy::GlobalSingleInstance,
        }
    }

    /// Register `address`. Returns the activation to use and the entry etag.
    pub async fn register(
        &self,
        address: &ActivationAddress,
        single_activation: bool,
    ) -> (ActivationAddress, u64) {
        match self {
            GrainRegistrar::ClusterLocal(registrar) => {
                registrar.register(address, single_activation)
            }
            GrainRegistrar::GlobalSingleInstance(registrar) => {
                registrar.register(address, single_activation).await
            }
        }
    }

    /// Unregister exactly this activation.
    pub fn unregister(&self, address: &ActivationAddress, force: bool) -> bool {
        match self {
            GrainRegistrar::ClusterLocal(registrar) => registrar.unregister(address, force),
            GrainRegistrar::GlobalSingleInstance(registrar) => registrar.unregister(address, force),
        }
    }

    /// Remove every activation of `grain`.
    pub fn delete(&self, grain: &GrainId) -> bool {
        match self {
            GrainRegistrar::ClusterLocal(registrar) => registrar.delete(grain),
            GrainRegistrar::GlobalSingleInstance(registrar) => registrar.delete(grain),
        }
    }
}

impl From<ClusterLocalRegistrar> for GrainRegistrar {
    fn from(registrar: ClusterLocalRegistrar) -> Self {
        GrainRegistrar::ClusterLocal(registrar)
    }
}

impl From<Rc<GlobalSingleInstanceRegistrar>> for GrainRegistrar {
    fn from(registrar: Rc<GlobalSingleInstanceRegistrar>) -> Self {
        GrainRegistrar::GlobalSingleInstance(registrar)
    }
}
