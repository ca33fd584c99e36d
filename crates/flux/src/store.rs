use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
};

use tracing::trace;

use crate::{lock, Action, Dispatcher, Handler};

/// State held by a [`Store`]. The model is the state itself; `reduce` is the
/// only place it changes.
pub trait Model: Clone + Send + Sync + 'static {
    type Action: Action;

    const NAME: &'static str;

    /// Whether this model is interested in actions of `kind`. Uninterested
    /// actions never reach `reduce`.
    fn reacts_to(kind: <Self::Action as Action>::Kind) -> bool;

    /// Applies `action`, returning `true` if the state changed.
    fn reduce(&mut self, action: &Self::Action) -> bool;
}

type Callback<M> = Arc<dyn Fn(&Arc<M>) + Send + Sync>;

pub struct Store<M: Model> {
    state: Mutex<Arc<M>>,
    subscribers: Mutex<Vec<(u64, Callback<M>)>>,
    next_subscriber: AtomicU64,
}

impl<M: Model> Store<M> {
    pub fn new(model: M) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Arc::new(model)),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(0),
        })
    }

    /// Creates the store and registers it with `dispatcher`.
    pub fn attach(model: M, dispatcher: &Dispatcher<M::Action>) -> Arc<Self> {
        let store = Self::new(model);
        dispatcher.register(&store);
        store
    }

    /// Current snapshot. Later transitions never alter a returned snapshot.
    pub fn get_state(&self) -> Arc<M> {
        Arc::clone(&lock(&self.state))
    }

    /// Registers `callback` to run after every state transition of this
    /// store. The callback receives the post-transition snapshot.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&Arc<M>) + Send + Sync + 'static,
    {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push((id, Arc::new(callback)));
        let store: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(store) = store.upgrade() {
                lock(&store.subscribers).retain(|(existing, _)| *existing != id);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn notify(&self, snapshot: &Arc<M>) {
        let callbacks: Vec<(u64, Callback<M>)> = lock(&self.subscribers).clone();
        for (id, callback) in callbacks {
            // an earlier callback in this pass may have unsubscribed this one
            let live = lock(&self.subscribers)
                .iter()
                .any(|(existing, _)| *existing == id);
            if live {
                callback(snapshot);
            }
        }
    }
}

impl<M: Model> Handler<M::Action> for Store<M> {
    fn name(&self) -> &str {
        M::NAME
    }

    fn handle(&self, action: &M::Action) {
        if !M::reacts_to(action.kind()) {
            return;
        }
        let snapshot = {
            let mut state = lock(&self.state);
            if !Arc::make_mut(&mut *state).reduce(action) {
                return;
            }
            Arc::clone(&state)
        };
        trace!(store = M::NAME, kind = ?action.kind(), "dispatch: store updated");
        self.notify(&snapshot);
    }
}

/// Keeps a store subscription alive. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keeps the subscription for the lifetime of the store.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}
