//! Single-flight work scheduling.
//!
//! A [`SingleFlightScheduler`] wraps a factory producing one asynchronous
//! unit of work and guarantees that at most one instance of it runs at a
//! time. Notifications arriving while a cycle runs collapse into a sticky
//! "more work" flag that starts exactly one follow-up cycle when the
//! current one finishes.
//!
//! # Design
//!
//! - Bookkeeping lives in a `RefCell` that is never held across an `.await`.
//! - Each cycle is driven by a `spawn_local` task. The driver runs the work,
//!   then the completion step (start the next cycle or go idle), and only
//!   then resolves the cycle's handle. A waiter that sees a cycle finish
//!   therefore also sees the scheduler's state updated for it.
//! - Waiters for the *next* cycle hold a shared future fed through a
//!   oneshot. The sender fires after the state borrow is released, so a
//!   waiter that notifies again from its continuation cannot re-enter a
//!   live borrow.
//! - A failed cycle is logged and handed to its waiters. It never blocks
//!   the next cycle. A panicking cycle counts as failed with
//!   [`CycleCancelled`].
//!
//! # State machine
//!
//! ```text
//! Idle ──notify──▶ Running ──done, more work──▶ Running
//!                     │
//!                     └──done, no more work──▶ Idle
//! ```

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use tokio::sync::oneshot;

use crate::error::CycleCancelled;

/// Handle on one work cycle. Resolves with the cycle's result once the
/// cycle and its completion step have both run.
pub type CycleHandle<E> = Shared<LocalBoxFuture<'static, Result<(), E>>>;

type WorkFactory<E> = Rc<dyn Fn() -> LocalBoxFuture<'static, Result<(), E>>>;

/// Promise for the cycle that will start after the current one.
struct NextCycle<E> {
    sender: oneshot::Sender<CycleHandle<E>>,
    completion: CycleHandle<E>,
}

impl<E> NextCycle<E>
where
    E: Clone + From<CycleCancelled> + 'static,
{
    fn new() -> Self {
        let (sender, receiver) = oneshot::channel::<CycleHandle<E>>();
        let completion = async move {
            match receiver.await {
                Ok(cycle) => cycle.await,
                Err(_) => Err(E::from(CycleCancelled)),
            }
        }
        .boxed_local()
        .shared();
        Self { sender, completion }
    }
}

struct SchedulerState<E> {
    current: Option<CycleHandle<E>>,
    more_work: bool,
    next_cycle: Option<NextCycle<E>>,
    cycles_started: u64,
}

struct Inner<E> {
    name: String,
    factory: WorkFactory<E>,
    state: RefCell<SchedulerState<E>>,
}

/// Runs at most one instance of a unit of work at a time, coalescing
/// notifications into a single follow-up cycle.
///
/// Cloning yields another handle on the same scheduler.
///
/// # Single-core
///
/// Cycles are spawned with [`tokio::task::spawn_local`]; every method that
/// may start a cycle must be called from inside a [`tokio::task::LocalSet`].
pub struct SingleFlightScheduler<E> {
    inner: Rc<Inner<E>>,
}

impl<E> Clone for SingleFlightScheduler<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for SingleFlightScheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("SingleFlightScheduler")
            .field("name", &self.inner.name)
            .field("running", &state.current.is_some())
            .field("more_work", &state.more_work)
            .field("cycles_started", &state.cycles_started)
            .finish()
    }
}

impl<E> SingleFlightScheduler<E>
where
    E: Clone + fmt::Display + From<CycleCancelled> + 'static,
{
    /// Create an idle scheduler around a work factory.
    ///
    /// The factory is called once per cycle, when the cycle starts.
    pub fn new<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<(), E>> + 'static,
    {
        let factory: WorkFactory<E> = Rc::new(move || factory().boxed_local());
        Self {
            inner: Rc::new(Inner {
                name: name.into(),
                factory,
                state: RefCell::new(SchedulerState {
                    current: None,
                    more_work: false,
                    next_cycle: None,
                    cycles_started: 0,
                }),
            }),
        }
    }

    /// Request a work cycle without waiting for it.
    ///
    /// Starts a cycle when idle; otherwise flags that another cycle must
    /// follow the running one.
    pub fn notify(&self) {
        let mut state = self.inner.state.borrow_mut();
        if state.current.is_some() {
            state.more_work = true;
        } else {
            start_cycle(&self.inner, &mut state);
        }
    }

    /// Request a work cycle and return a handle on the cycle that will
    /// incorporate this request.
    ///
    /// The request takes effect immediately, before the handle is polled.
    /// When a cycle is already running, the handle covers that cycle and
    /// the one after it.
    pub fn notify_and_wait(&self) -> CycleHandle<E> {
        let mut state = self.inner.state.borrow_mut();
        if state.current.is_some() {
            state.more_work = true;
            state
                .next_cycle
                .get_or_insert_with(NextCycle::new)
                .completion
                .clone()
        } else {
            start_cycle(&self.inner, &mut state)
        }
    }

    /// Wait until everything requested so far has been serviced.
    ///
    /// Resolves with the running cycle when no follow-up is flagged, with
    /// the follow-up cycle when one is, and immediately when idle.
    pub fn wait_for_current_work(&self) -> CycleHandle<E> {
        let mut state = self.inner.state.borrow_mut();
        if state.more_work {
            state
                .next_cycle
                .get_or_insert_with(NextCycle::new)
                .completion
                .clone()
        } else {
            match &state.current {
                Some(current) => current.clone(),
                None => futures::future::ready(Ok(())).boxed_local().shared(),
            }
        }
    }

    /// Wait until no cycle is running and none is pending.
    ///
    /// Cycle failures are not reported here; they went to the cycle's own
    /// waiters.
    pub async fn wait_for_quiescence(&self) {
        loop {
            let current = self.inner.state.borrow().current.clone();
            match current {
                Some(cycle) => {
                    let _ = cycle.await;
                }
                None => return,
            }
        }
    }

    /// Whether no cycle is running right now.
    pub fn is_idle(&self) -> bool {
        self.inner.state.borrow().current.is_none()
    }

    /// Number of cycles started since creation.
    pub fn cycles_started(&self) -> u64 {
        self.inner.state.borrow().cycles_started
    }
}

/// Start a cycle while the caller holds the state borrow.
///
/// The driver is spawned, not polled, so nothing re-enters `state` before
/// the borrow is released.
fn start_cycle<E>(inner: &Rc<Inner<E>>, state: &mut SchedulerState<E>) -> CycleHandle<E>
where
    E: Clone + fmt::Display + From<CycleCancelled> + 'static,
{
    let (done_tx, done_rx) = oneshot::channel::<Result<(), E>>();
    let handle: CycleHandle<E> = async move {
        done_rx
            .await
            .unwrap_or_else(|_| Err(E::from(CycleCancelled)))
    }
    .boxed_local()
    .shared();

    state.current = Some(handle.clone());
    state.cycles_started += 1;
    let cycle = state.cycles_started;

    let factory = Rc::clone(&inner.factory);
    let weak: Weak<Inner<E>> = Rc::downgrade(inner);
    let name = inner.name.clone();

    tokio::task::spawn_local(async move {
        tracing::debug!(worker = %name, cycle, "work cycle started");
        let result = match AssertUnwindSafe(factory()).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(worker = %name, cycle, "work cycle panicked");
                Err(E::from(CycleCancelled))
            }
        };
        match &result {
            Ok(()) => tracing::debug!(worker = %name, cycle, "work cycle finished"),
            Err(err) => tracing::warn!(worker = %name, cycle, error = %err, "work cycle failed"),
        }
        if let Some(inner) = weak.upgrade() {
            check_for_more_work(&inner);
        }
        let _ = done_tx.send(result);
    });

    handle
}

/// Completion step: start the flagged follow-up cycle or go idle.
fn check_for_more_work<E>(inner: &Rc<Inner<E>>)
where
    E: Clone + fmt::Display + From<CycleCancelled> + 'static,
{
    let signal = {
        let mut state = inner.state.borrow_mut();
        if state.more_work {
            state.more_work = false;
            let next = start_cycle(inner, &mut state);
            state.next_cycle.take().map(|waiters| (waiters.sender, next))
        } else {
            state.current = None;
            None
        }
    };

    if let Some((sender, next)) = signal {
        let _ = sender.send(next);
    }
}
