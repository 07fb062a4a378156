//! Loader Registry
//!
//! Maps a namespace to the data loader that fetches its entities from the
//! source of truth.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{CacheError, Result};

// == Cacheable ==
/// A value that can live in the cache.
///
/// Every type stored under one namespace shares one serialized shape.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Namespace the type's entities belong to.
    const NAMESPACE: &'static str;

    /// Key of this value inside its namespace.
    fn key(&self) -> String;
}

// == Data Loader ==
/// Fetches one entity from the source of truth.
///
/// Loaders may be called several times for the same key and must not rely on
/// the cache for memoization.
#[async_trait]
pub trait DataLoader: Send + Sync + 'static {
    type Value: Cacheable;

    async fn load(&self, key: &str) -> anyhow::Result<Self::Value>;
}

/// Loader built from an async closure, see [`loader_fn`].
pub struct LoaderFn<F, T> {
    f: F,
    _value: PhantomData<fn() -> T>,
}

/// Wraps an async closure taking the entity key as a [`DataLoader`].
///
/// ```ignore
/// cache.register_loader("dish", loader_fn(|key: String| async move {
///     db.find_dish(&key).await
/// }))?;
/// ```
pub fn loader_fn<T, F, Fut>(f: F) -> LoaderFn<F, T>
where
    T: Cacheable,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send,
{
    LoaderFn {
        f,
        _value: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> DataLoader for LoaderFn<F, T>
where
    T: Cacheable,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send,
{
    type Value = T;

    async fn load(&self, key: &str) -> anyhow::Result<T> {
        (self.f)(key.to_string()).await
    }
}

// == Erased Loader ==
/// Namespace-level view of a loader: key in, serialized payload out.
#[async_trait]
pub(crate) trait PayloadLoader: Send + Sync {
    async fn load_payload(&self, key: &str) -> Result<String>;
}

struct Erased<L>(L);

#[async_trait]
impl<L: DataLoader> PayloadLoader for Erased<L> {
    async fn load_payload(&self, key: &str) -> Result<String> {
        let value = self.0.load(key).await.map_err(CacheError::Loader)?;
        let loaded_key = value.key();
        if loaded_key != key {
            debug!(
                namespace = L::Value::NAMESPACE,
                requested = %key,
                loaded = %loaded_key,
                "loader returned a value keyed differently"
            );
        }
        Ok(serde_json::to_string(&value)?)
    }
}

// == Loader Registry ==
/// Namespace to loader bindings, safe to use from any task.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: DashMap<String, Arc<dyn PayloadLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `loader` to `namespace`.
    ///
    /// Fails with `LoaderAlreadyRegistered` if the namespace is already bound.
    pub fn register<L: DataLoader>(&self, namespace: impl Into<String>, loader: L) -> Result<()> {
        match self.loaders.entry(namespace.into()) {
            Entry::Occupied(occupied) => Err(CacheError::LoaderAlreadyRegistered(
                occupied.key().clone(),
            )),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Erased(loader)));
                Ok(())
            }
        }
    }

    /// Returns the loader bound to `namespace`.
    pub(crate) fn lookup(&self, namespace: &str) -> Result<Arc<dyn PayloadLoader>> {
        self.loaders
            .get(namespace)
            .map(|loader| Arc::clone(loader.value()))
            .ok_or_else(|| CacheError::LoaderNotFound(namespace.to_string()))
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.loaders.contains_key(namespace)
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}
