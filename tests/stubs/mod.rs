#![allow(unused)]

use docloader::{Fetcher, Model, ValueOf};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{atomic, Arc, RwLock};

#[derive(Debug, Default, Clone)]
pub struct Counter {
    count: Arc<atomic::AtomicUsize>,
}

impl Counter {
    fn new() -> Self {
        Counter::default()
    }

    fn inc(&self) {
        self.count.fetch_add(1, atomic::Ordering::SeqCst);
    }

    fn count(&self) -> usize {
        self.count.load(atomic::Ordering::SeqCst)
    }
}

/// Counts calls, and the keys passed in each call.
pub struct Calls<K> {
    total_calls: Counter,
    calls_per_key: Arc<RwLock<HashMap<K, Counter>>>,
    batches: Arc<RwLock<Vec<Vec<K>>>>,
}

impl<K> Calls<K>
where
    K: Clone + Hash + Eq,
{
    fn new() -> Self {
        Calls {
            total_calls: Counter::new(),
            calls_per_key: Default::default(),
            batches: Default::default(),
        }
    }

    fn record(&self, keys: &[K]) {
        self.total_calls.inc();
        let mut calls_per_key = self.calls_per_key.write().unwrap();
        for key in keys {
            calls_per_key.entry(key.clone()).or_default().inc();
        }
        self.batches.write().unwrap().push(keys.to_vec());
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.count()
    }

    pub fn calls_for_key(&self, key: &K) -> usize {
        let calls_per_key = self.calls_per_key.read().unwrap();
        calls_per_key
            .get(key)
            .map(|count| count.count())
            .unwrap_or_default()
    }

    /// The keys of every call, in call order.
    pub fn batches(&self) -> Vec<Vec<K>> {
        self.batches.read().unwrap().clone()
    }
}

impl<K> Clone for Calls<K> {
    fn clone(&self) -> Self {
        Calls {
            total_calls: self.total_calls.clone(),
            calls_per_key: self.calls_per_key.clone(),
            batches: self.batches.clone(),
        }
    }
}

pub struct ObserveFetcher<F>
where
    F: Fetcher,
{
    fetcher: Arc<F>,
    pub calls: Calls<F::Key>,
}

impl<F> ObserveFetcher<F>
where
    F: Fetcher,
{
    pub fn new(fetcher: F) -> Self {
        ObserveFetcher {
            fetcher: Arc::new(fetcher),
            calls: Calls::new(),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.calls.total_calls()
    }

    pub fn calls_for_key(&self, key: &F::Key) -> usize {
        self.calls.calls_for_key(key)
    }
}

impl<F> Clone for ObserveFetcher<F>
where
    F: Fetcher,
{
    fn clone(&self) -> Self {
        ObserveFetcher {
            fetcher: self.fetcher.clone(),
            calls: self.calls.clone(),
        }
    }
}

impl<F> Fetcher for ObserveFetcher<F>
where
    F: Fetcher + Send + Sync,
{
    type Key = F::Key;
    type Value = F::Value;
    type Error = F::Error;

    async fn fetch(&self, keys: &[Self::Key]) -> Result<Vec<Self::Value>, Self::Error> {
        self.calls.record(keys);
        self.fetcher.fetch(keys).await
    }
}

/// Wraps a `Model`, counting every query sent to it.
pub struct ObserveModel<M>
where
    M: Model,
{
    model: Arc<M>,
    pub calls: Calls<ValueOf<M>>,
}

impl<M> ObserveModel<M>
where
    M: Model,
{
    pub fn new(model: Arc<M>) -> Arc<Self> {
        Arc::new(ObserveModel {
            model,
            calls: Calls::new(),
        })
    }

    pub fn inner(&self) -> &Arc<M> {
        &self.model
    }

    pub fn total_calls(&self) -> usize {
        self.calls.total_calls()
    }

    pub fn calls_for_key(&self, key: &ValueOf<M>) -> usize {
        self.calls.calls_for_key(key)
    }
}

impl<M> Model for ObserveModel<M>
where
    M: Model,
{
    type Document = M::Document;
    type Error = M::Error;

    fn name(&self) -> &str {
        self.model.name()
    }

    async fn find_in(
        &self,
        field: &docloader::FieldOf<M>,
        values: &[ValueOf<M>],
    ) -> Result<Vec<Self::Document>, Self::Error> {
        self.calls.record(values);
        self.model.find_in(field, values).await
    }
}

/// A fetcher returning each key as its own value.
pub struct FetchIdent;

impl Fetcher for FetchIdent {
    type Key = u64;
    type Value = u64;
    type Error = anyhow::Error;

    async fn fetch(&self, keys: &[u64]) -> anyhow::Result<Vec<u64>> {
        Ok(keys.to_vec())
    }
}
