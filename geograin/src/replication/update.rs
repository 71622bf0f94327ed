//! Grain state and update operations.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Durable state of one grain.
///
/// Blanket-implemented: any cloneable, defaultable, serde-serializable
/// value qualifies. `Default` is the state of a grain never written.
pub trait GrainState: Clone + Default + Serialize + DeserializeOwned + 'static {}

impl<T> GrainState for T where T: Clone + Default + Serialize + DeserializeOwned + 'static {}

/// One state transition, queued until storage confirms it.
///
/// Updates are immutable commands: applying the same update to equal
/// states must give equal results, since an update can be applied several
/// times (tentatively, then once per write attempt).
pub trait UpdateOperation<T>: Clone + fmt::Debug + 'static {
    /// Apply the transition to `state`.
    fn apply(&self, state: &mut T);
}

/// `base` with every update applied in order.
pub fn fold<'a, T, U>(base: &T, updates: impl IntoIterator<Item = &'a U>) -> T
where
    T: Clone,
    U: UpdateOperation<T>,
{
    let mut state = base.clone();
    for update in updates {
        update.apply(&mut state);
    }
    state
}
