//! Common imports for grain code.
//!
//! ```rust,ignore
//! use geograin::prelude::*;
//! ```

pub use std::rc::Rc;

pub use crate::config::{RegistrarConfig, ReplicationConfig};
pub use crate::directory::{
    ActivationAddress, ActivationId, ActivationStatus, ClusterLocalRegistrar, DirectoryPartition,
    GlobalSingleInstanceRegistrar, GrainId, GrainRegistrar, RegistrarManager, RegistrationStrategy,
};
pub use crate::error::{RegistrarError, ReplicationError, StorageError};
pub use crate::identity::{IdentityInterner, NodeIdentity};
pub use crate::replication::{
    AdaptorStatus, ConfirmedViewListener, GrainStorage, InMemoryGrainStorage, LogViewAdaptor,
    ProtocolParticipant, SequencedGrain, UpdateOperation,
};
pub use crate::worker::{BatchWork, BatchWorker, SingleFlightScheduler};
