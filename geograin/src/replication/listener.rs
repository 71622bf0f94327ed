//! Subscribers to confirmed-view changes.

use std::fmt;
use std::rc::Rc;

/// Informed after a flush cycle in which the confirmed view changed.
///
/// Tentative updates never reach listeners.
pub trait ConfirmedViewListener<T>: fmt::Debug {
    /// The confirmed view is now `view` at `version`.
    fn on_confirmed_view_changed(&self, view: &T, version: u64);
}

/// Listener set keyed by allocation identity.
#[derive(Debug)]
pub(crate) struct ListenerSet<T> {
    listeners: Vec<Rc<dyn ConfirmedViewListener<T>>>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

fn same<T>(a: &Rc<dyn ConfirmedViewListener<T>>, b: &Rc<dyn ConfirmedViewListener<T>>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

impl<T> ListenerSet<T> {
    /// Returns false if already subscribed.
    pub(crate) fn subscribe(&mut self, listener: Rc<dyn ConfirmedViewListener<T>>) -> bool {
        if self.listeners.iter().any(|l| same(l, &listener)) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Returns false if not subscribed.
    pub(crate) fn unsubscribe(&mut self, listener: &Rc<dyn ConfirmedViewListener<T>>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !same(l, listener));
        before != self.listeners.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Rc<dyn ConfirmedViewListener<T>>> {
        self.listeners.clone()
    }

    pub(crate) fn clear(&mut self) {
        self.listeners.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}
