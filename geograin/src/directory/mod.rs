//! Multi-cluster grain directory registration.
//!
//! # Design
//!
//! - [`DirectoryPartition`] is the in-memory map a silo owns.
//! - Registrars implement a [`RegistrationStrategy`] on top of it:
//!   [`ClusterLocalRegistrar`] coordinates only inside the partition,
//!   [`GlobalSingleInstanceRegistrar`] also votes with remote clusters.
//! - [`GrainRegistrar`] is a closed enum over the strategies;
//!   [`RegistrarManager`] maps strategy tags to registrars.
//! - [`GlobalSingleInstanceResponseTracker`] is the pure aggregation of one
//!   voting round, independent of any networking.

mod cluster_local;
mod global_single_instance;
mod manager;
mod partition;
mod precedence;
mod registrar;
mod tracker;
mod types;

pub use cluster_local::ClusterLocalRegistrar;
pub use global_single_instance::{
    DoubtfulActivationMaintainer, GlobalSingleInstanceRegistrar, RemoteClusterDirectory,
};
pub use manager::RegistrarManager;
pub use partition::{DirectoryEntry, DirectoryPartition, RegisteredActivation};
pub use precedence::{ActivationPrecedence, HashedPrecedence};
pub use registrar::GrainRegistrar;
pub use tracker::{GlobalSingleInstanceResponseTracker, OwnershipOutcome};
pub use types::{
    ActivationAddress, ActivationId, ActivationResponse, ActivationStatus, GrainId, RemoteClaim,
    RegistrationStrategy,
};
