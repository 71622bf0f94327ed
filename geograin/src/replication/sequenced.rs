//! Grain-facing convenience layer over a [`LogViewAdaptor`].
//!
//! A [`SequencedGrain`] offers the two update styles a grain method needs:
//! queue-and-return ([`update_locally`](SequencedGrain::update_locally)) and
//! wait-until-durable ([`update_globally`](SequencedGrain::update_globally)).
//! In synchronous mode every local update is promoted to a global one.

use std::cell::Cell;
use std::fmt;

use tokio::time::Instant;

use super::adaptor::LogViewAdaptor;
use super::update::{GrainState, UpdateOperation};
use crate::error::ReplicationError;

/// Update helpers bound to one grain's adaptor.
pub struct SequencedGrain<T, U> {
    adaptor: LogViewAdaptor<T, U>,
    synchronous: Cell<bool>,
}

impl<T, U> fmt::Debug for SequencedGrain<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequencedGrain")
            .field("adaptor", &self.adaptor)
            .field("synchronous", &self.synchronous.get())
            .finish()
    }
}

impl<T: GrainState, U: UpdateOperation<T>> SequencedGrain<T, U> {
    /// Wrap an adaptor. Starts in asynchronous mode.
    pub fn new(adaptor: LogViewAdaptor<T, U>) -> Self {
        Self {
            adaptor,
            synchronous: Cell::new(false),
        }
    }

    /// The wrapped adaptor.
    pub fn adaptor(&self) -> &LogViewAdaptor<T, U> {
        &self.adaptor
    }

    /// Promote every local update to a global one.
    pub fn set_synchronous(&self, synchronous: bool) {
        self.synchronous.set(synchronous);
    }

    /// Whether local updates are promoted.
    pub fn is_synchronous(&self) -> bool {
        self.synchronous.get()
    }

    /// Queue `update`. With `save`, also wait for it to be confirmed.
    ///
    /// In synchronous mode this behaves as [`Self::update_globally`].
    pub async fn update_locally(&self, update: U, save: bool) -> Result<(), ReplicationError> {
        if self.synchronous.get() {
            return self.update_globally(update).await;
        }
        self.adaptor.submit(update);
        if save {
            self.adaptor.confirm_submitted_entries().await?;
        }
        Ok(())
    }

    /// Queue `update` and wait until storage holds it.
    pub async fn update_globally(&self, update: U) -> Result<(), ReplicationError> {
        self.adaptor.submit(update);
        self.adaptor.synchronize_now().await
    }

    /// Run `apply` against the latest confirmed state and write the result
    /// conditionally, re-reading and re-running on conflict.
    ///
    /// Queued updates are flushed first so `apply` sees them.
    pub async fn update_globally_with<R, F>(&self, apply: F) -> Result<R, ReplicationError>
    where
        F: Fn(&mut T) -> R,
    {
        self.adaptor.confirm_submitted_entries().await?;

        let attempts = self.adaptor.config().max_write_attempts();
        for attempt in 1..=attempts {
            if let Some(output) = self.adaptor.try_apply_globally(&apply).await? {
                return Ok(output);
            }
            tracing::debug!(grain = %self.adaptor.grain(), attempt, "global update lost a race");
            self.adaptor.synchronize_now().await?;
        }
        Err(ReplicationError::RetriesExhausted { attempts })
    }

    /// Latest state in storage, re-read now.
    pub async fn global_state(&self) -> Result<T, ReplicationError> {
        self.adaptor.synchronize_now().await?;
        Ok(self.adaptor.confirmed_view())
    }

    /// Tentative state, refreshed first if the confirmed view is older
    /// than the configured staleness bound.
    pub async fn local_state(&self) -> Result<T, ReplicationError> {
        if let Some(bound) = self.adaptor.config().staleness_bound() {
            let stale = self
                .adaptor
                .confirmed_at()
                .map_or(true, |at| Instant::now().duration_since(at) > bound);
            if stale {
                self.adaptor.synchronize_now().await?;
            }
        }
        Ok(self.adaptor.tentative_view())
    }

    /// Updates still waiting for confirmation, oldest first.
    pub fn pending_updates(&self) -> Vec<U> {
        self.adaptor.unconfirmed_updates()
    }
}
