//! Reducer-driven store bound to a sync client.
//!
//! The store holds application state as JSON and advances it through a
//! reducer. [`StoreCreator`] is the configured store-creation function from
//! the bootstrap: it binds synchronization settings once and can then
//! produce a store from any reducer.

use crate::client::{Client, ClientError, ClientOptions};
use crate::transport::{Transport, WsTransport};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use sync_types::Action;

/// Application state held by the store.
pub type State = Value;

type Subscriber = Box<dyn Fn(&State) + Send + Sync>;
type ReducerFn = Box<dyn Fn(&State, &Action) -> State + Send + Sync>;

struct StoreInner {
    state: Mutex<State>,
    reducer: ReducerFn,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl StoreInner {
    fn apply(&self, action: &Action) {
        let next = {
            let mut state = self.state.lock().unwrap();
            let next = (self.reducer)(&state, action);
            *state = next.clone();
            next
        };
        for subscriber in self.subscribers.lock().unwrap().iter() {
            subscriber(&next);
        }
    }
}

/// Local state advanced by a reducer and synchronized through the
/// underlying client.
pub struct Store<T: Transport> {
    inner: Arc<StoreInner>,
    client: Arc<Client<T>>,
}

impl<T: Transport> Store<T> {
    /// The sync client underlying this store.
    pub fn client(&self) -> &Arc<Client<T>> {
        &self.client
    }

    /// A clone of the current state.
    pub fn get_state(&self) -> State {
        self.inner.state.lock().unwrap().clone()
    }

    /// Register a callback invoked with the new state after every applied
    /// action. Callbacks run in registration order.
    pub fn subscribe(&self, subscriber: impl Fn(&State) + Send + Sync + 'static) {
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .push(Box::new(subscriber));
    }

    /// Apply an action locally and queue it for synchronization.
    pub fn dispatch(&self, action: Action) -> Result<(), ClientError> {
        self.inner.apply(&action);
        self.client.add(action)
    }

    /// Apply an action locally without synchronizing it.
    pub fn dispatch_local(&self, action: &Action) {
        self.inner.apply(action);
    }
}

/// Store-creation function bound to synchronization settings.
///
/// Construct once with the client options, then create the store from the
/// application reducer.
pub struct StoreCreator {
    options: ClientOptions,
}

impl StoreCreator {
    /// Bind a creator to the given synchronization settings.
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }

    /// The settings this creator was bound to.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Create a store over a WebSocket transport.
    pub fn create(
        &self,
        initial: State,
        reducer: impl Fn(&State, &Action) -> State + Send + Sync + 'static,
    ) -> Store<WsTransport> {
        self.create_with_transport(initial, reducer, WsTransport::new())
    }

    /// Create a store over an explicit transport (used in tests).
    pub fn create_with_transport<T: Transport>(
        &self,
        initial: State,
        reducer: impl Fn(&State, &Action) -> State + Send + Sync + 'static,
        transport: T,
    ) -> Store<T> {
        let client = Arc::new(Client::new(self.options.clone(), transport));
        let inner = Arc::new(StoreInner {
            state: Mutex::new(initial),
            reducer: Box::new(reducer),
            subscribers: Mutex::new(Vec::new()),
        });

        // Actions arriving from the server flow through the same reducer
        // as local dispatches.
        let applier = inner.clone();
        client.on_action(move |action| applier.apply(action));

        Store { inner, client }
    }
}
