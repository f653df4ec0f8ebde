use chashmap::CHashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Holds every value a [`BatchLoader`](crate::BatchLoader) has loaded so far.
/// Clones share the same underlying map.
#[derive(Clone)]
pub(crate) struct CacheStore<K, V> {
    map: Arc<CHashMap<K, V>>,
}

impl<K, V> CacheStore<K, V>
where
    K: Hash + PartialEq,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        let map = Arc::new(CHashMap::new());
        CacheStore { map }
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).as_deref().cloned()
    }

    pub(crate) fn insert(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    /// Insert a value unless one is already stored for the key.
    pub(crate) fn insert_missing(&self, key: K, value: V) {
        self.map.upsert(key, || value, |_| {});
    }

    pub(crate) fn remove(&self, key: &K) {
        self.map.remove(key);
    }

    pub(crate) fn clear(&self) {
        self.map.clear();
    }
}

/// The state of one `load`/`load_many` call: the requested keys in order,
/// and the values resolved so far for each position.
pub(crate) struct CacheLookup<K, V> {
    keys: Vec<K>,
    entries: Vec<Option<V>>,
}

impl<K, V> CacheLookup<K, V>
where
    K: Clone + Hash + PartialEq,
    V: Clone,
{
    pub(crate) fn new(keys: Vec<K>) -> Self {
        let entries = keys.iter().map(|_| None).collect();
        CacheLookup { keys, entries }
    }

    pub(crate) fn pending_keys(&self) -> Vec<K> {
        self.keys
            .iter()
            .zip(&self.entries)
            .filter_map(|(key, entry)| match entry {
                None => Some(key.clone()),
                Some(_) => None,
            })
            .collect()
    }

    /// Fill every unresolved position from the cache store (if any), then
    /// report whether anything is left to fetch.
    pub(crate) fn lookup(&mut self, cache_store: Option<&CacheStore<K, V>>) -> CacheLookupState<V> {
        if let Some(cache_store) = cache_store {
            for (key, entry) in self.keys.iter().zip(self.entries.iter_mut()) {
                if entry.is_none() {
                    *entry = cache_store.get(key);
                }
            }
        }

        if self.entries.iter().all(Option::is_some) {
            CacheLookupState::Done(self.entries.drain(..).flatten().collect())
        } else {
            CacheLookupState::Pending
        }
    }

    /// Fill the unresolved positions, in order, with freshly fetched values.
    /// `fetched` must line up with [`pending_keys`](Self::pending_keys).
    pub(crate) fn resolve(self, fetched: Vec<V>) -> Vec<V> {
        let mut fetched = fetched.into_iter();
        self.entries
            .into_iter()
            .filter_map(|entry| entry.or_else(|| fetched.next()))
            .collect()
    }
}

pub(crate) enum CacheLookupState<V> {
    Done(Vec<V>),
    Pending,
}

/// Return the value stored for `key`, creating and storing it first if the
/// map has none. Creation happens under the map's lock for that key, so
/// concurrent callers always observe a single instance.
pub(crate) fn get_or_create<K, V>(map: &CHashMap<K, V>, key: K, create: impl FnOnce(&K) -> V) -> V
where
    K: Clone + Hash + PartialEq,
    V: Clone,
{
    if let Some(existing) = map.get(&key) {
        return existing.clone();
    }

    // `alter` always runs its closure, so this returns on the first pass
    let mut create = Some(create);
    loop {
        let mut stored = None;
        map.alter(key.clone(), |existing| {
            let value = existing.or_else(|| create.take().map(|create| create(&key)));
            stored = value.clone();
            value
        });
        if let Some(value) = stored {
            return value;
        }
    }
}
