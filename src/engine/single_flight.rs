//! Single-flight: concurrent calls for the same entity share one execution.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;

use crate::keys::EntityKey;

/// One in-flight execution and the token that cancels it.
pub(crate) struct Flight<T: Clone> {
    pub future: Shared<BoxFuture<'static, T>>,
    pub cancel: CancellationToken,
}

impl<T: Clone> Clone for Flight<T> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

type Calls<T> = DashMap<EntityKey, Flight<T>>;

pub(crate) struct SingleFlight<T: Clone> {
    calls: Arc<Calls<T>>,
}

/// Removes the flight from the map when its future finishes or is dropped.
struct Landing<T: Clone> {
    calls: Arc<Calls<T>>,
    key: EntityKey,
}

impl<T: Clone> Drop for Landing<T> {
    fn drop(&mut self) {
        self.calls.remove(&self.key);
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            calls: Arc::new(DashMap::new()),
        }
    }

    /// Joins the flight in progress for `key`, or starts one with `start`.
    ///
    /// The returned flag is true when this call started the flight; the
    /// starter is responsible for driving it (e.g. spawning the future).
    pub fn join_or_start<F, Fut>(
        &self,
        key: &EntityKey,
        cancel: CancellationToken,
        start: F,
    ) -> (Flight<T>, bool)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        match self.calls.entry(key.clone()) {
            Entry::Occupied(occupied) => (occupied.get().clone(), false),
            Entry::Vacant(vacant) => {
                let work = start(cancel.clone());
                let landing = Landing {
                    calls: Arc::clone(&self.calls),
                    key: key.clone(),
                };
                let future = async move {
                    let _landing = landing;
                    work.await
                }
                .boxed()
                .shared();

                let flight = Flight { future, cancel };
                vacant.insert(flight.clone());
                (flight, true)
            }
        }
    }

    /// Number of flights currently in progress.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}
