//! Log-view replication adaptor.
//!
//! Gives one grain activation a tentative, locally fast view of its state
//! while every confirmed mutation is serialized through a versioned
//! [`GrainStorage`].
//!
//! # Views
//!
//! - **confirmed**: last state storage acknowledged, with its version;
//! - **pending**: FIFO queue of submitted updates not yet confirmed;
//! - **tentative**: confirmed with every pending update applied.
//!
//! `tentative == fold(confirmed, pending)` holds whenever no flush cycle is
//! part-way through applying its result.
//!
//! # Flush cycle
//!
//! Submissions notify a [`SingleFlightScheduler`]. Each cycle takes the
//! whole queue as it stands, then up to
//! [`max_write_attempts`](crate::ReplicationConfig::max_write_attempts)
//! times: reads the stored state, applies the batch in order, and writes
//! it conditionally on the version it read. On success the batch leaves the
//! queue in one step. On conflict it tries again immediately. Any other
//! storage error ends the cycle. Updates submitted while a cycle runs stay
//! queued for the next one.
//!
//! A cycle that fails keeps the queue intact; the next notification retries
//! the same updates.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized → Loading → Ready ⇄ Synchronizing → Deactivating → Closed
//! ```
//!
//! [`LogViewAdaptor::deactivate`] drains the queue before closing.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use tokio::time::Instant;

use super::listener::{ConfirmedViewListener, ListenerSet};
use super::stats::{ReplicationStats, StatEvent};
use super::storage::{GrainStorage, VersionedState};
use super::update::{fold, GrainState, UpdateOperation};
use crate::config::ReplicationConfig;
use crate::directory::GrainId;
use crate::error::{ReplicationError, StorageError};
use crate::worker::SingleFlightScheduler;

/// Lifecycle state of a [`LogViewAdaptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptorStatus {
    /// Created, not activated.
    Uninitialized,
    /// Initial read in progress.
    Loading,
    /// Activated, no flush in progress.
    Ready,
    /// A flush cycle is talking to storage.
    Synchronizing,
    /// Draining before close.
    Deactivating,
    /// Drained and closed.
    Closed,
}

#[derive(Debug)]
struct PendingUpdate<U> {
    seq: u64,
    update: U,
    entered_at: Instant,
}

struct ViewState<T, U> {
    status: AdaptorStatus,
    confirmed: T,
    confirmed_version: u64,
    confirmed_at: Option<Instant>,
    confirmed_changed: bool,
    tentative: T,
    pending: VecDeque<PendingUpdate<U>>,
    next_seq: u64,
    refresh_requested: u64,
    refresh_done: u64,
    last_error: Option<ReplicationError>,
    listeners: ListenerSet<T>,
    stats: Option<ReplicationStats>,
}

impl<T: GrainState, U: UpdateOperation<T>> ViewState<T, U> {
    fn recompute_tentative(&mut self) {
        self.tentative = fold(&self.confirmed, self.pending.iter().map(|p| &p.update));
    }

    /// Take a storage-authoritative view unless it is older than ours.
    fn adopt_confirmed(&mut self, view: T, version: u64) {
        if version < self.confirmed_version {
            return;
        }
        if version != self.confirmed_version {
            self.confirmed_changed = true;
        }
        self.confirmed = view;
        self.confirmed_version = version;
        self.confirmed_at = Some(Instant::now());
        self.recompute_tentative();
    }

    fn record(&mut self, event: StatEvent) {
        if let Some(stats) = self.stats.as_mut() {
            stats.record(event);
        }
    }
}

type Notification<T> = (Vec<Rc<dyn ConfirmedViewListener<T>>>, T, u64);

struct AdaptorInner<T, U> {
    grain: GrainId,
    storage: Rc<dyn GrainStorage>,
    config: ReplicationConfig,
    state: RefCell<ViewState<T, U>>,
}

impl<T: GrainState, U: UpdateOperation<T>> AdaptorInner<T, U> {
    fn decode(read: &VersionedState) -> Result<T, StorageError> {
        match &read.data {
            Some(bytes) => Ok(serde_json::from_slice(bytes)?),
            None => Ok(T::default()),
        }
    }

    async fn read_confirmed(&self) -> Result<(T, u64), ReplicationError> {
        let read = self.storage.read_state(&self.grain).await?;
        let view = Self::decode(&read)?;
        tracing::debug!(grain = %self.grain, version = read.version, "read stored state");
        Ok((view, read.version))
    }

    async fn run_cycle(&self) -> Result<(), ReplicationError> {
        let (batch, refresh_epoch) = {
            let mut state = self.state.borrow_mut();
            let refresh_epoch = state.refresh_requested;
            if state.pending.is_empty() && refresh_epoch <= state.refresh_done {
                return Ok(());
            }
            if state.status == AdaptorStatus::Ready {
                state.status = AdaptorStatus::Synchronizing;
            }
            let batch: Vec<U> = state.pending.iter().map(|p| p.update.clone()).collect();
            (batch, refresh_epoch)
        };

        let result = if batch.is_empty() {
            self.refresh(refresh_epoch).await
        } else {
            self.write_batch(batch, refresh_epoch).await
        };

        {
            let mut state = self.state.borrow_mut();
            if state.status == AdaptorStatus::Synchronizing {
                state.status = AdaptorStatus::Ready;
            }
            state.last_error = result.as_ref().err().cloned();
        }
        self.notify_listeners();
        result
    }

    async fn refresh(&self, refresh_epoch: u64) -> Result<(), ReplicationError> {
        let (view, version) = self.read_confirmed().await?;
        let mut state = self.state.borrow_mut();
        state.adopt_confirmed(view, version);
        state.refresh_done = state.refresh_done.max(refresh_epoch);
        Ok(())
    }

    async fn write_batch(&self, batch: Vec<U>, refresh_epoch: u64) -> Result<(), ReplicationError> {
        let attempts = self.config.max_write_attempts();
        for attempt in 1..=attempts {
            let (view, version) = self.read_confirmed().await?;
            let next = fold(&view, &batch);
            self.state.borrow_mut().adopt_confirmed(view, version);

            let bytes = serde_json::to_vec(&next).map_err(StorageError::from)?;
            match self.storage.write_state(&self.grain, bytes, version).await {
                Ok(new_version) => {
                    self.commit(batch.len(), next, new_version, refresh_epoch);
                    return Ok(());
                }
                Err(err) if err.is_conflict() => {
                    tracing::debug!(grain = %self.grain, attempt, error = %err, "write conflict");
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(
            grain = %self.grain,
            attempts,
            queued = batch.len(),
            "retries exhausted, updates stay queued"
        );
        Err(ReplicationError::RetriesExhausted { attempts })
    }

    fn commit(&self, count: usize, view: T, version: u64, refresh_epoch: u64) {
        let mut state = self.state.borrow_mut();
        let now = Instant::now();
        let count = count.min(state.pending.len());
        let committed: Vec<PendingUpdate<U>> = state.pending.drain(..count).collect();

        state.confirmed = view;
        state.confirmed_version = version;
        state.confirmed_at = Some(now);
        state.confirmed_changed = true;
        state.refresh_done = state.refresh_done.max(refresh_epoch);
        state.recompute_tentative();

        if let Some(stats) = state.stats.as_mut() {
            stats.record(StatEvent::Writeback);
            for update in &committed {
                stats.record_latency(now - update.entered_at);
            }
        }
        tracing::debug!(
            grain = %self.grain,
            version,
            committed = count,
            through_seq = committed.last().map(|update| update.seq),
            remaining = state.pending.len(),
            "batch committed"
        );
    }

    fn notify_listeners(&self) {
        let notification: Option<Notification<T>> = {
            let mut state = self.state.borrow_mut();
            if std::mem::take(&mut state.confirmed_changed) && state.listeners.len() > 0 {
                Some((
                    state.listeners.snapshot(),
                    state.confirmed.clone(),
                    state.confirmed_version,
                ))
            } else {
                None
            }
        };
        if let Some((listeners, view, version)) = notification {
            for listener in listeners {
                listener.on_confirmed_view_changed(&view, version);
            }
        }
    }
}

/// Replicated view of one grain's state.
///
/// Cloning yields another handle on the same activation.
pub struct LogViewAdaptor<T, U> {
    inner: Rc<AdaptorInner<T, U>>,
    worker: SingleFlightScheduler<ReplicationError>,
}

impl<T, U> Clone for LogViewAdaptor<T, U> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            worker: self.worker.clone(),
        }
    }
}

impl<T, U> fmt::Debug for LogViewAdaptor<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("LogViewAdaptor")
            .field("grain", &self.inner.grain)
            .field("status", &state.status)
            .field("confirmed_version", &state.confirmed_version)
            .field("pending", &state.pending.len())
            .field("worker", &self.worker)
            .finish()
    }
}

impl<T: GrainState, U: UpdateOperation<T>> LogViewAdaptor<T, U> {
    /// Create an uninitialized adaptor for `grain`.
    pub fn new(grain: GrainId, storage: Rc<dyn GrainStorage>, config: ReplicationConfig) -> Self {
        let stats = config.collect_stats().then(ReplicationStats::default);
        let inner = Rc::new(AdaptorInner {
            grain: grain.clone(),
            storage,
            config,
            state: RefCell::new(ViewState {
                status: AdaptorStatus::Uninitialized,
                confirmed: T::default(),
                confirmed_version: 0,
                confirmed_at: None,
                confirmed_changed: false,
                tentative: T::default(),
                pending: VecDeque::new(),
                next_seq: 0,
                refresh_requested: 0,
                refresh_done: 0,
                last_error: None,
                listeners: ListenerSet::default(),
                stats,
            }),
        });

        let weak: Weak<AdaptorInner<T, U>> = Rc::downgrade(&inner);
        let worker = SingleFlightScheduler::new(format!("log-view-{grain}"), move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.run_cycle().await,
                    None => Ok(()),
                }
            }
        });

        Self { inner, worker }
    }

    /// Read the initial state from storage and become ready.
    pub async fn activate(&self) -> Result<(), ReplicationError> {
        self.transition(&[AdaptorStatus::Uninitialized], AdaptorStatus::Loading)?;

        match self.inner.read_confirmed().await {
            Ok((view, version)) => {
                let mut state = self.inner.state.borrow_mut();
                state.adopt_confirmed(view, version);
                state.confirmed_changed = false;
                state.status = AdaptorStatus::Ready;
                tracing::info!(grain = %self.inner.grain, version, "log view activated");
                Ok(())
            }
            Err(err) => {
                let mut state = self.inner.state.borrow_mut();
                state.status = AdaptorStatus::Uninitialized;
                state.last_error = Some(err.clone());
                tracing::warn!(grain = %self.inner.grain, error = %err, "activation read failed");
                Err(err)
            }
        }
    }

    /// Drain every pending update to storage, then close.
    ///
    /// On a failed drain the adaptor goes back to its previous state and the
    /// updates stay queued.
    pub async fn deactivate(&self) -> Result<(), ReplicationError> {
        let previous = {
            let mut state = self.inner.state.borrow_mut();
            match state.status {
                AdaptorStatus::Closed => return Ok(()),
                AdaptorStatus::Deactivating | AdaptorStatus::Loading => {
                    return Err(ReplicationError::InvalidState {
                        from: state.status,
                        to: AdaptorStatus::Deactivating,
                    });
                }
                current => {
                    state.status = AdaptorStatus::Deactivating;
                    current
                }
            }
        };

        if let Err(err) = self.confirm_submitted_entries().await {
            let mut state = self.inner.state.borrow_mut();
            state.status = match previous {
                AdaptorStatus::Synchronizing => AdaptorStatus::Ready,
                other => other,
            };
            tracing::warn!(grain = %self.inner.grain, error = %err, "deactivation drain failed");
            return Err(err);
        }

        let mut state = self.inner.state.borrow_mut();
        state.listeners.clear();
        state.status = AdaptorStatus::Closed;
        tracing::info!(
            grain = %self.inner.grain,
            version = state.confirmed_version,
            "log view deactivated"
        );
        Ok(())
    }

    /// Queue `update`, apply it to the tentative view, and schedule a flush.
    ///
    /// Never blocks and never fails. The queue is unbounded. Once the
    /// adaptor is closed, updates are dropped with a warning.
    pub fn submit(&self, update: U) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.status == AdaptorStatus::Closed {
                tracing::warn!(grain = %self.inner.grain, ?update, "update dropped after deactivation");
                return;
            }
            update.apply(&mut state.tentative);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push_back(PendingUpdate {
                seq,
                update,
                entered_at: Instant::now(),
            });
            state.record(StatEvent::Submit);
            tracing::trace!(grain = %self.inner.grain, seq, "update queued");
        }
        self.worker.notify();
    }

    /// Flush every pending update and re-read storage.
    ///
    /// When nothing was submitted meanwhile, the tentative view equals the
    /// confirmed view afterwards.
    pub async fn synchronize_now(&self) -> Result<(), ReplicationError> {
        {
            let mut state = self.inner.state.borrow_mut();
            state.record(StatEvent::SynchronizeNow);
            state.refresh_requested += 1;
        }
        self.worker.notify_and_wait().await
    }

    /// Wait until the pending queue is empty and no flush cycle is running.
    ///
    /// Updates submitted while waiting are waited for too. Fails with the
    /// error of the first failed cycle it waited on.
    pub async fn confirm_submitted_entries(&self) -> Result<(), ReplicationError> {
        self.inner
            .state
            .borrow_mut()
            .record(StatEvent::ConfirmSubmittedEntries);

        loop {
            let drained = self.inner.state.borrow().pending.is_empty();
            let cycle = match (drained, self.worker.is_idle()) {
                (true, true) => return Ok(()),
                (false, true) => self.worker.notify_and_wait(),
                (_, false) => self.worker.wait_for_current_work(),
            };
            cycle.await?;
        }
    }

    /// Apply `update` straight to the stored state, conditional on the
    /// confirmed version this adaptor last saw.
    ///
    /// Returns `false` when another write got there first.
    pub async fn try_append(&self, update: U) -> Result<bool, ReplicationError> {
        let applied = self
            .try_apply_globally(move |state| update.apply(state))
            .await?;
        Ok(applied.is_some())
    }

    /// Like [`Self::try_append`], with a closure whose result is returned on
    /// success.
    pub async fn try_apply_globally<R>(
        &self,
        apply: impl FnOnce(&mut T) -> R,
    ) -> Result<Option<R>, ReplicationError> {
        let (mut next, expected) = {
            let state = self.inner.state.borrow();
            if matches!(
                state.status,
                AdaptorStatus::Uninitialized | AdaptorStatus::Loading | AdaptorStatus::Closed
            ) {
                return Err(ReplicationError::InvalidState {
                    from: state.status,
                    to: AdaptorStatus::Ready,
                });
            }
            (state.confirmed.clone(), state.confirmed_version)
        };

        let output = apply(&mut next);
        let bytes = serde_json::to_vec(&next).map_err(StorageError::from)?;
        match self
            .inner
            .storage
            .write_state(&self.inner.grain, bytes, expected)
            .await
        {
            Ok(version) => {
                self.inner.state.borrow_mut().adopt_confirmed(next, version);
                self.inner.notify_listeners();
                Ok(Some(output))
            }
            Err(err) if err.is_conflict() => {
                tracing::debug!(grain = %self.inner.grain, error = %err, "conditional append lost");
                self.inner.state.borrow_mut().refresh_requested += 1;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn transition(
        &self,
        allowed: &[AdaptorStatus],
        to: AdaptorStatus,
    ) -> Result<AdaptorStatus, ReplicationError> {
        let mut state = self.inner.state.borrow_mut();
        let from = state.status;
        if !allowed.contains(&from) {
            return Err(ReplicationError::InvalidState { from, to });
        }
        state.status = to;
        Ok(from)
    }

    /// Confirmed view with all pending updates applied.
    pub fn tentative_view(&self) -> T {
        let mut state = self.inner.state.borrow_mut();
        state.record(StatEvent::TentativeView);
        state.tentative.clone()
    }

    /// Last view acknowledged by storage.
    pub fn confirmed_view(&self) -> T {
        let mut state = self.inner.state.borrow_mut();
        state.record(StatEvent::ConfirmedView);
        state.confirmed.clone()
    }

    /// Version of the confirmed view.
    pub fn confirmed_version(&self) -> u64 {
        self.inner.state.borrow().confirmed_version
    }

    /// Snapshot of the pending queue, oldest first.
    pub fn unconfirmed_updates(&self) -> Vec<U> {
        self.inner
            .state
            .borrow()
            .pending
            .iter()
            .map(|p| p.update.clone())
            .collect()
    }

    /// When storage last confirmed the view, if ever.
    pub fn confirmed_at(&self) -> Option<Instant> {
        self.inner.state.borrow().confirmed_at
    }

    /// Lifecycle state.
    pub fn status(&self) -> AdaptorStatus {
        self.inner.state.borrow().status
    }

    /// Error of the last failed cycle, cleared by the next successful one.
    pub fn last_error(&self) -> Option<ReplicationError> {
        self.inner.state.borrow().last_error.clone()
    }

    /// Whether no flush cycle is running.
    pub fn is_idle(&self) -> bool {
        self.worker.is_idle()
    }

    /// The grain this adaptor replicates.
    pub fn grain(&self) -> &GrainId {
        &self.inner.grain
    }

    /// Adaptor configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.inner.config
    }

    /// Subscribe to confirmed-view changes. Returns false if already
    /// subscribed.
    pub fn subscribe(&self, listener: Rc<dyn ConfirmedViewListener<T>>) -> bool {
        self.inner.state.borrow_mut().listeners.subscribe(listener)
    }

    /// Unsubscribe. Returns false if not subscribed.
    pub fn unsubscribe(&self, listener: &Rc<dyn ConfirmedViewListener<T>>) -> bool {
        self.inner.state.borrow_mut().listeners.unsubscribe(listener)
    }

    /// Start collecting statistics, keeping any already collected.
    pub fn enable_stats(&self) {
        let mut state = self.inner.state.borrow_mut();
        if state.stats.is_none() {
            state.stats = Some(ReplicationStats::default());
        }
    }

    /// Stop collecting statistics and drop them.
    pub fn disable_stats(&self) {
        self.inner.state.borrow_mut().stats = None;
    }

    /// Statistics collected so far, if enabled.
    pub fn stats(&self) -> Option<ReplicationStats> {
        self.inner.state.borrow().stats.clone()
    }
}

/// Lifecycle hooks the hosting runtime calls around an activation.
///
/// The host calls `deactivate` before dropping the activation and never
/// calls other methods concurrently with either hook.
#[async_trait::async_trait(?Send)]
pub trait ProtocolParticipant: fmt::Debug {
    /// Called once when the activation starts.
    async fn activate(&self) -> Result<(), ReplicationError>;

    /// Called once before the activation is dropped.
    async fn deactivate(&self) -> Result<(), ReplicationError>;
}

#[async_trait::async_trait(?Send)]
impl<T: GrainState, U: UpdateOperation<T>> ProtocolParticipant for LogViewAdaptor<T, U> {
    async fn activate(&self) -> Result<(), ReplicationError> {
        LogViewAdaptor::activate(self).await
    }

    async fn deactivate(&self) -> Result<(), ReplicationError> {
        LogViewAdaptor::deactivate(self).await
    }
}
