//! Trait-driven batch worker.
//!
//! A [`BatchWorker`] drives a [`BatchWork`] implementation through a
//! [`SingleFlightScheduler`]. Producers record work in the implementation's
//! own state, then call [`BatchWorker::notify`]; the worker runs `work()`
//! once per batch, never concurrently with itself.

use std::fmt;
use std::rc::Rc;

use super::scheduler::{CycleHandle, SingleFlightScheduler};
use crate::error::WorkerError;

/// A unit of batched work.
///
/// `work()` should drain whatever has accumulated since the last call.
#[async_trait::async_trait(?Send)]
pub trait BatchWork: fmt::Debug {
    /// Process one batch.
    async fn work(&self) -> Result<(), WorkerError>;
}

/// Single-flight driver for a [`BatchWork`].
#[derive(Debug)]
pub struct BatchWorker<W: BatchWork + 'static> {
    work: Rc<W>,
    scheduler: SingleFlightScheduler<WorkerError>,
}

impl<W: BatchWork + 'static> BatchWorker<W> {
    /// Create an idle worker.
    pub fn new(name: impl Into<String>, work: W) -> Self {
        let work = Rc::new(work);
        let target = Rc::clone(&work);
        let scheduler = SingleFlightScheduler::new(name, move || {
            let target = Rc::clone(&target);
            async move { target.work().await }
        });
        Self { work, scheduler }
    }

    /// The wrapped work.
    pub fn work(&self) -> &W {
        &self.work
    }

    /// Request a batch without waiting.
    pub fn notify(&self) {
        self.scheduler.notify();
    }

    /// Request a batch and wait for the batch that incorporates it.
    pub fn notify_and_wait(&self) -> CycleHandle<WorkerError> {
        self.scheduler.notify_and_wait()
    }

    /// Wait until everything requested so far has been processed.
    pub fn wait_for_current_work(&self) -> CycleHandle<WorkerError> {
        self.scheduler.wait_for_current_work()
    }

    /// Wait until no batch is running or pending.
    pub async fn wait_for_quiescence(&self) {
        self.scheduler.wait_for_quiescence().await;
    }

    /// Whether no batch is running.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }
}
