//! Unidirectional state runtime: actions are broadcast by a [`Dispatcher`] to
//! every registered [`Store`], and stores notify their subscribers after each
//! state transition.

use std::{fmt, sync::Mutex, sync::MutexGuard, sync::PoisonError};

mod dispatcher;
mod store;

pub use dispatcher::{DispatchError, Dispatcher, DEFAULT_CASCADE_LIMIT};
pub use store::{Model, Store, Subscription};

/// An immutable event broadcast through a [`Dispatcher`].
///
/// `Kind` is a cheap tag that stores inspect to decide whether they react,
/// without matching on the full payload.
pub trait Action: fmt::Debug + Send + Sync + 'static {
    type Kind: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Receiver side of a broadcast. [`Store`] is the canonical implementation.
pub trait Handler<A: Action>: Send + Sync {
    fn name(&self) -> &str;
    fn handle(&self, action: &A);
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
