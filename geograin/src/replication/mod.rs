//! Replicated grain state.
//!
//! A grain's state lives in a [`GrainStorage`] and is mutated only through
//! [`UpdateOperation`]s. The [`LogViewAdaptor`] keeps the confirmed view,
//! the queue of pending updates, and the tentative view derived from both.
//! [`SequencedGrain`] layers the update styles a grain method uses on top.
//!
//! # Usage
//!
//! ```rust,ignore
//! let adaptor = LogViewAdaptor::<u64, Increment>::new(grain, storage, config);
//! adaptor.activate().await?;
//! adaptor.submit(Increment(1));
//! assert_eq!(adaptor.tentative_view(), 1);
//! adaptor.confirm_submitted_entries().await?;
//! assert_eq!(adaptor.confirmed_view(), 1);
//! ```

mod adaptor;
mod listener;
mod sequenced;
mod stats;
mod storage;
mod update;

pub use adaptor::{AdaptorStatus, LogViewAdaptor, ProtocolParticipant};
pub use listener::ConfirmedViewListener;
pub use sequenced::SequencedGrain;
pub use stats::{ReplicationStats, StatEvent};
pub use storage::{GrainStorage, InMemoryGrainStorage, VersionedState, WriteRecord};
pub use update::{fold, GrainState, UpdateOperation};
