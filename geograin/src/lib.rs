//! # Geograin
//!
//! Consistency core for replicated virtual actors ("grains") spread over
//! one or more clusters.
//!
//! A grain keeps a tentative copy of its state that every method call
//! mutates locally, queues each mutation as an update object, and flushes the
//! queue in the background through an optimistic-concurrency storage backend.
//! When a grain activates for the first time in a multi-cluster deployment,
//! the registrar decides which cluster owns the authoritative activation.
//!
//! ## Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  replication                     directory                  │
//! │  • LogViewAdaptor                • ClusterLocalRegistrar    │
//! │  • SequencedGrain                • GlobalSingleInstance     │
//! │  • GrainStorage contract           registrar + tracker      │
//! │                                  • RegistrarManager         │
//! ├──────────────────────────┬──────────────────────────────────┤
//! │  worker                  │  identity                        │
//! │  • SingleFlightScheduler │  • NodeIdentity + interner       │
//! │  • BatchWorker           │  • PartitionRing                 │
//! └──────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! ## Single-core
//!
//! Everything here follows a single-threaded cooperative model: shared state
//! lives in `Rc<RefCell<..>>`, async traits are `?Send`, and background work
//! cycles are spawned with [`tokio::task::spawn_local`]. Callers run inside a
//! [`tokio::task::LocalSet`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use geograin::prelude::*;
//!
//! #[derive(Debug, Clone)]
//! struct Increment(u64);
//!
//! impl UpdateOperation<u64> for Increment {
//!     fn apply(&self, state: &mut u64) {
//!         *state += self.0;
//!     }
//! }
//!
//! let storage = Rc::new(InMemoryGrainStorage::new());
//! let adaptor = LogViewAdaptor::<u64, Increment>::new(
//!     GrainId::new("Counter", "alice"),
//!     storage,
//!     ReplicationConfig::default(),
//! );
//! adaptor.activate().await?;
//! adaptor.submit(Increment(5));
//! adaptor.confirm_submitted_entries().await?;
//! assert_eq!(adaptor.confirmed_view(), 5);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod prelude;
pub mod replication;
pub mod worker;

pub use config::{RegistrarConfig, RegistrarConfigBuilder, ReplicationConfig, ReplicationConfigBuilder};
pub use error::{
    AggregationViolation, CycleCancelled, IdentityParseError, RegistrarError, ReplicationError,
    StorageError, WorkerError,
};
