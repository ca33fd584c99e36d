use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, Weak},
    thread::{self, ThreadId},
};

use thiserror::Error;
use tracing::{error, trace};

use crate::{lock, Action, Handler};

/// Maximum number of broadcasts a single top-level dispatch may cascade into.
pub const DEFAULT_CASCADE_LIMIT: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch cascade exceeded {limit} broadcasts while delivering {kind}; {dropped} queued actions dropped")]
    CascadeLimit {
        limit: usize,
        kind: String,
        dropped: usize,
    },
}

struct DispatchState<A> {
    owner: Option<ThreadId>,
    pending: VecDeque<A>,
}

/// Synchronous broadcast bus.
///
/// Handlers are held weakly: the dispatcher never keeps a store alive. A
/// dispatch issued from inside a handler is queued and delivered after the
/// current broadcast completes, so handlers never recurse into each other.
pub struct Dispatcher<A: Action> {
    handlers: Mutex<Vec<Weak<dyn Handler<A>>>>,
    state: Mutex<DispatchState<A>>,
    turn: Mutex<()>,
    cascade_limit: usize,
}

impl<A: Action> Default for Dispatcher<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Action> Dispatcher<A> {
    pub fn new() -> Self {
        Self::with_cascade_limit(DEFAULT_CASCADE_LIMIT)
    }

    pub fn with_cascade_limit(cascade_limit: usize) -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            state: Mutex::new(DispatchState {
                owner: None,
                pending: VecDeque::new(),
            }),
            turn: Mutex::new(()),
            cascade_limit: cascade_limit.max(1),
        }
    }

    /// Adds `handler` to the broadcast set. Returns `false` if this exact
    /// handler was already registered.
    pub fn register<H>(&self, handler: &Arc<H>) -> bool
    where
        H: Handler<A> + 'static,
    {
        let handler: Arc<dyn Handler<A>> = handler.clone();
        let target = Arc::as_ptr(&handler) as *const ();
        let mut handlers = lock(&self.handlers);
        handlers.retain(|existing| existing.strong_count() > 0);
        if handlers
            .iter()
            .any(|existing| Weak::as_ptr(existing) as *const () == target)
        {
            return false;
        }
        trace!(handler = handler.name(), "dispatch: registered handler");
        handlers.push(Arc::downgrade(&handler));
        true
    }

    pub fn unregister<H>(&self, handler: &Arc<H>) -> bool
    where
        H: Handler<A> + 'static,
    {
        let target = Arc::as_ptr(handler) as *const ();
        let mut handlers = lock(&self.handlers);
        let before = handlers.len();
        handlers.retain(|existing| {
            existing.strong_count() > 0 && Weak::as_ptr(existing) as *const () != target
        });
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.handlers)
            .iter()
            .filter(|handler| handler.strong_count() > 0)
            .count()
    }

    /// Delivers `action` to every live handler in registration order.
    ///
    /// Called from inside a handler, the action is queued behind the current
    /// broadcast and this returns immediately. Called from another thread
    /// while a broadcast is running, it blocks until that broadcast and its
    /// queued follow-ups are done.
    ///
    /// Handlers run on the caller's thread while a blocking turn lock is
    /// held, so they must not block or await. From async code, a long
    /// handler stalls every other worker that dispatches.
    pub fn dispatch(&self, action: A) -> Result<(), DispatchError> {
        let current = thread::current().id();
        {
            let mut state = lock(&self.state);
            if state.owner == Some(current) {
                trace!(kind = ?action.kind(), "dispatch: queued re-entrant action");
                state.pending.push_back(action);
                return Ok(());
            }
        }

        let _turn = lock(&self.turn);
        let _owner = OwnerGuard::claim(&self.state, current);
        self.drain(action)
    }

    fn drain(&self, first: A) -> Result<(), DispatchError> {
        let mut delivered = 0;
        let mut next = Some(first);
        while let Some(action) = next {
            if delivered == self.cascade_limit {
                let dropped = {
                    let mut state = lock(&self.state);
                    let dropped = state.pending.len() + 1;
                    state.pending.clear();
                    dropped
                };
                let kind = format!("{:?}", action.kind());
                error!(
                    limit = self.cascade_limit,
                    kind = %kind,
                    dropped,
                    "dispatch: cascade limit reached, probable dispatch cycle"
                );
                return Err(DispatchError::CascadeLimit {
                    limit: self.cascade_limit,
                    kind,
                    dropped,
                });
            }
            self.broadcast(&action);
            delivered += 1;
            next = lock(&self.state).pending.pop_front();
        }
        Ok(())
    }

    fn broadcast(&self, action: &A) {
        let handlers: Vec<Arc<dyn Handler<A>>> = {
            let mut handlers = lock(&self.handlers);
            handlers.retain(|handler| handler.strong_count() > 0);
            handlers.iter().filter_map(Weak::upgrade).collect()
        };
        trace!(kind = ?action.kind(), handlers = handlers.len(), "dispatch: broadcast");
        for handler in handlers {
            handler.handle(action);
        }
    }
}

/// Marks the current thread as the dispatching one and releases the mark on
/// drop, even if a handler panics.
struct OwnerGuard<'a, A> {
    state: &'a Mutex<DispatchState<A>>,
}

impl<'a, A> OwnerGuard<'a, A> {
    fn claim(state: &'a Mutex<DispatchState<A>>, owner: ThreadId) -> Self {
        lock(state).owner = Some(owner);
        Self { state }
    }
}

impl<A> Drop for OwnerGuard<'_, A> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        state.owner = None;
        state.pending.clear();
    }
}
