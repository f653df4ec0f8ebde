use crate::cache::{CacheLookup, CacheLookupState, CacheStore};
use crate::Fetcher;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

/// Batches and caches loads from some datastore. A `BatchLoader` can be
/// used with any type that implements [`Fetcher`]. `BatchLoader`s are
/// asynchronous and designed to be passed and shared between threads or tasks.
/// Cloning a `BatchLoader` is shallow and will use the same [`Fetcher`] and
/// the same cache.
///
/// Each time a `BatchLoader` receives keys that aren't cached, it first waits
/// for more keys to build a batch. The batch is dispatched after a delay or
/// once enough keys have been queued, whichever comes first. See
/// [`BatchLoaderBuilder`] for options to tweak latency, batch sizes and
/// caching.
///
/// ## Load semantics
///
/// The [`Fetcher`] returns one value per key, positionally. Every caller
/// folded into a batch receives the values at the positions of its own keys,
/// so a value type of `Option<T>` lets a fetcher report misses without
/// failing the batch.
///
/// If the underlying [`Fetcher`] returns an error, then all pending
/// [`load`](BatchLoader::load) and [`load_many`](BatchLoader::load_many)
/// requests in that batch fail with [`LoadError::Fetch`], all sharing the
/// same error. Nothing from a failed batch is cached, so subsequent calls
/// with the same keys **will retry**.
///
/// With caching enabled (the default), successfully loaded values are kept
/// until [`clear`](BatchLoader::clear) or [`clear_all`](BatchLoader::clear_all)
/// is called, and a key requested by several callers in one batch is only
/// passed to the [`Fetcher`] once. With caching disabled, every requested key
/// is passed to the [`Fetcher`] as-is, duplicates included.
pub struct BatchLoader<F>
where
    F: Fetcher,
{
    label: Cow<'static, str>,
    cache_store: Option<CacheStore<F::Key, F::Value>>,
    _fetch_task: Arc<tokio::task::JoinHandle<()>>,
    fetch_request_tx: tokio::sync::mpsc::Sender<FetchRequest<F>>,
}

impl<F> BatchLoader<F>
where
    F: Fetcher + Send + Sync + 'static,
{
    /// Create a new `BatchLoader` that uses the given [`Fetcher`] to retrieve
    /// data. Returns a [`BatchLoaderBuilder`], which can be used to customize
    /// the `BatchLoader`. Call [`.finish()`](BatchLoaderBuilder::finish) to
    /// create the `BatchLoader`. `finish` spawns the dispatch task, so it must
    /// be called from within a tokio runtime.
    ///
    /// # Examples
    ///
    /// ```
    /// # use docloader::{BatchLoader, Fetcher};
    /// struct Squares;
    ///
    /// impl Fetcher for Squares {
    ///     type Key = u64;
    ///     type Value = u64;
    ///     type Error = std::convert::Infallible;
    ///
    ///     async fn fetch(&self, keys: &[u64]) -> Result<Vec<u64>, Self::Error> {
    ///         Ok(keys.iter().map(|key| key * key).collect())
    ///     }
    /// }
    ///
    /// # #[tokio::main] async fn main() -> anyhow::Result<()> {
    /// let loader = BatchLoader::build(Squares)
    ///     .eager_batch_size(Some(50))
    ///     .delay_duration(tokio::time::Duration::from_millis(5))
    ///     .finish();
    /// assert_eq!(loader.load_many(&[2, 3]).await?, vec![4, 9]);
    /// # Ok(()) }
    /// ```
    pub fn build(fetcher: F) -> BatchLoaderBuilder<F> {
        BatchLoaderBuilder {
            fetcher,
            options: LoaderOptions::default(),
            label: "unlabeled-batch-loader".into(),
        }
    }

    /// The label used to identify this loader in log messages.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Load the value with the associated key, either by calling the
    /// [`Fetcher`] or by loading the cached value.
    ///
    /// See the type-level docs for [`BatchLoader`](#load-semantics) for more
    /// detailed loading semantics.
    #[tracing::instrument(skip_all, fields(batch_loader = %self.label))]
    pub async fn load(&self, key: F::Key) -> Result<F::Value, LoadError<F::Error>> {
        let mut values = self.load_keys(vec![key]).await?;
        match values.pop() {
            Some(value) => Ok(value),
            None => Err(LoadError::Dropped),
        }
    }

    /// Load all the values for the given keys, either by calling the
    /// [`Fetcher`] or by loading cached values. Values are returned in the
    /// same order as the input keys. Returns an error if the batch fails.
    ///
    /// See the type-level docs for [`BatchLoader`](#load-semantics) for more
    /// detailed loading semantics.
    #[tracing::instrument(skip_all, fields(batch_loader = %self.label, num_keys = keys.len()))]
    pub async fn load_many(&self, keys: &[F::Key]) -> Result<Vec<F::Value>, LoadError<F::Error>> {
        self.load_keys(keys.to_vec()).await
    }

    /// Store a value for the key without calling the [`Fetcher`]. An already
    /// cached value is kept. Does nothing when caching is disabled.
    pub fn prime(&self, key: F::Key, value: F::Value) {
        if let Some(cache_store) = &self.cache_store {
            cache_store.insert_missing(key, value);
        }
    }

    /// Forget the cached value for the key, so the next load fetches it again.
    pub fn clear(&self, key: &F::Key) {
        if let Some(cache_store) = &self.cache_store {
            cache_store.remove(key);
        }
    }

    /// Forget every cached value.
    pub fn clear_all(&self) {
        if let Some(cache_store) = &self.cache_store {
            cache_store.clear();
        }
    }

    async fn load_keys(&self, keys: Vec<F::Key>) -> Result<Vec<F::Value>, LoadError<F::Error>> {
        let mut cache_lookup = CacheLookup::new(keys);

        match cache_lookup.lookup(self.cache_store.as_ref()) {
            CacheLookupState::Done(values) => {
                tracing::debug!(batch_loader = %self.label, "all keys have already been looked up");
                return Ok(values);
            }
            CacheLookupState::Pending => {}
        }
        let pending_keys = cache_lookup.pending_keys();

        let (result_tx, result_rx) = tokio::sync::oneshot::channel();

        tracing::debug!(
            num_pending_keys = pending_keys.len(),
            batch_loader = %self.label,
            "sending a batch of keys to fetch",
        );
        let fetch_request = FetchRequest {
            keys: pending_keys,
            result_tx,
        };
        self.fetch_request_tx
            .send(fetch_request)
            .await
            .map_err(|_| LoadError::SendError)?;

        match result_rx.await {
            Ok(Ok(fetched)) => {
                tracing::debug!(batch_loader = %self.label, "fetch response returned successfully");
                Ok(cache_lookup.resolve(fetched))
            }
            Ok(Err(load_error)) => {
                tracing::info!(batch_loader = %self.label, "error returned while fetching keys: {load_error}");
                Err(load_error)
            }
            Err(_) => {
                tracing::info!(batch_loader = %self.label, "batch was dropped before sending a result");
                Err(LoadError::Dropped)
            }
        }
    }
}

impl<F> Clone for BatchLoader<F>
where
    F: Fetcher,
{
    fn clone(&self) -> Self {
        BatchLoader {
            cache_store: self.cache_store.clone(),
            _fetch_task: self._fetch_task.clone(),
            fetch_request_tx: self.fetch_request_tx.clone(),
            label: self.label.clone(),
        }
    }
}

/// Batching and caching options shared by every [`BatchLoader`]. A
/// [`Registry`](crate::Registry) hands the same options to every loader it
/// creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOptions {
    /// The maximum amount of time to wait for more keys before calling the
    /// [`Fetcher`], counted from the first request of a batch.
    pub delay_duration: tokio::time::Duration,

    /// The number of queued keys that dispatches a batch without waiting for
    /// the delay. `None` always waits for the delay.
    pub eager_batch_size: Option<usize>,

    /// Whether loaded values are cached and keys deduplicated.
    pub cache: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            delay_duration: tokio::time::Duration::from_millis(10),
            eager_batch_size: Some(100),
            cache: true,
        }
    }
}

/// Used to configure a new [`BatchLoader`]. A `BatchLoaderBuilder` is
/// returned from [`BatchLoader::build`].
pub struct BatchLoaderBuilder<F>
where
    F: Fetcher + Send + Sync + 'static,
{
    fetcher: F,
    options: LoaderOptions,
    label: Cow<'static, str>,
}

impl<F> BatchLoaderBuilder<F>
where
    F: Fetcher + Send + Sync + 'static,
{
    /// Replace all options at once.
    pub fn options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    /// The maximum amount of time the [`BatchLoader`] will wait to queue up
    /// more keys before calling the [`Fetcher`], counted from the first
    /// request of the batch.
    pub fn delay_duration(mut self, delay: tokio::time::Duration) -> Self {
        self.options.delay_duration = delay;
        self
    }

    /// The maximum number of keys to wait for before eagerly calling the
    /// [`Fetcher`]. A value of `Some(n)` will load the batch once `n` or more
    /// keys have been queued (or once the timeout set by
    /// [`delay_duration`](BatchLoaderBuilder::delay_duration) is reached,
    /// whichever comes first). A value of `None` will never eagerly dispatch
    /// the queue, and the [`BatchLoader`] will always wait for the timeout set
    /// by [`delay_duration`](BatchLoaderBuilder::delay_duration).
    ///
    /// Note that `eager_batch_size` **does not** set an upper limit on the
    /// batch! For example, if [`BatchLoader::load_many`] is called with more
    /// than `eager_batch_size` items, then the batch will be sent immediately
    /// with _all_ of the provided keys.
    pub fn eager_batch_size(mut self, eager_batch_size: Option<usize>) -> Self {
        self.options.eager_batch_size = eager_batch_size;
        self
    }

    /// Enable or disable the per-key cache.
    pub fn cache(mut self, cache: bool) -> Self {
        self.options.cache = cache;
        self
    }

    /// Set a label for the [`BatchLoader`]. This is only used to improve
    /// diagnostic messages, such as log messages.
    pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Create and return a [`BatchLoader`] with the given options.
    pub fn finish(self) -> BatchLoader<F> {
        let cache_store = if self.options.cache {
            Some(CacheStore::new())
        } else {
            None
        };

        let (fetch_request_tx, mut fetch_request_rx) =
            tokio::sync::mpsc::channel::<FetchRequest<F>>(1);
        let label = self.label.clone();

        let fetch_task = tokio::spawn({
            let cache_store = cache_store.clone();
            async move {
                'task: loop {
                    // Wait for some keys to come in
                    let mut batch = Batch::new(self.options.cache);

                    tracing::trace!(batch_loader = %self.label, "waiting for keys to fetch...");
                    match fetch_request_rx.recv().await {
                        Some(fetch_request) => {
                            tracing::trace!(batch_loader = %self.label, num_fetch_request_keys = fetch_request.keys.len(), "received initial fetch request");
                            batch.push(fetch_request);
                        }
                        None => {
                            // Every loader handle was dropped, so we're done
                            break 'task;
                        }
                    };

                    // Wait for more keys, until the delay after the first request runs out
                    let deadline = tokio::time::Instant::now() + self.options.delay_duration;
                    let delay = tokio::time::sleep_until(deadline);
                    tokio::pin!(delay);

                    'wait_for_more_keys: loop {
                        let should_run_batch_now = match self.options.eager_batch_size {
                            Some(eager_batch_size) => batch.keys.len() >= eager_batch_size,
                            None => false,
                        };
                        if should_run_batch_now {
                            tracing::trace!(
                                batch_loader = %self.label,
                                num_pending_keys = batch.keys.len(),
                                eager_batch_size = ?self.options.eager_batch_size,
                                "batch filled up, ready to fetch keys now",
                            );

                            break 'wait_for_more_keys;
                        }

                        tokio::select! {
                            fetch_request = fetch_request_rx.recv() => {
                                match fetch_request {
                                    Some(fetch_request) => {
                                        tracing::trace!(batch_loader = %self.label, num_fetch_request_keys = fetch_request.keys.len(), "retrieved additional fetch request");
                                        batch.push(fetch_request);
                                    }
                                    None => {
                                        tracing::debug!(batch_loader = %self.label, num_pending_keys = batch.keys.len(), "fetch channel closed");
                                        break 'wait_for_more_keys;
                                    }
                                }
                            }
                            _ = &mut delay => {
                                tracing::trace!(
                                    batch_loader = %self.label,
                                    num_pending_keys = batch.keys.len(),
                                    "delay reached while waiting for more keys to fetch"
                                );
                                break 'wait_for_more_keys;
                            }
                        };
                    }

                    tracing::trace!(batch_loader = %self.label, num_pending_keys = batch.keys.len(), num_pending_requests = batch.requests.len(), "fetching keys");
                    let result = self.fetcher.fetch(&batch.keys).await;
                    batch.complete(result, cache_store.as_ref());
                }
            }
        });

        BatchLoader {
            label,
            cache_store,
            _fetch_task: Arc::new(fetch_task),
            fetch_request_tx,
        }
    }
}

type FetchResult<F> = Result<Vec<<F as Fetcher>::Value>, LoadError<<F as Fetcher>::Error>>;

struct FetchRequest<F>
where
    F: Fetcher,
{
    keys: Vec<F::Key>,
    result_tx: tokio::sync::oneshot::Sender<FetchResult<F>>,
}

/// The keys collected for one call to the [`Fetcher`], and for each folded
/// request the positions of its keys within the batch.
struct Batch<F>
where
    F: Fetcher,
{
    keys: Vec<F::Key>,
    positions: Option<HashMap<F::Key, usize>>,
    requests: Vec<(Vec<usize>, tokio::sync::oneshot::Sender<FetchResult<F>>)>,
}

impl<F> Batch<F>
where
    F: Fetcher,
{
    fn new(deduplicate: bool) -> Self {
        Batch {
            keys: vec![],
            positions: deduplicate.then(HashMap::new),
            requests: vec![],
        }
    }

    fn push(&mut self, fetch_request: FetchRequest<F>) {
        let mut indices = Vec::with_capacity(fetch_request.keys.len());
        for key in fetch_request.keys {
            let index = match &mut self.positions {
                Some(positions) => *positions.entry(key.clone()).or_insert_with(|| {
                    self.keys.push(key);
                    self.keys.len() - 1
                }),
                None => {
                    self.keys.push(key);
                    self.keys.len() - 1
                }
            };
            indices.push(index);
        }
        self.requests.push((indices, fetch_request.result_tx));
    }

    fn complete(
        self,
        result: Result<Vec<F::Value>, F::Error>,
        cache_store: Option<&CacheStore<F::Key, F::Value>>,
    ) {
        let values = match result {
            Ok(values) if values.len() == self.keys.len() => values,
            Ok(values) => {
                let (expected, actual) = (self.keys.len(), values.len());
                for (_, result_tx) in self.requests {
                    // Ignore error if receiver was already closed
                    let _ = result_tx.send(Err(LoadError::ResultCount { expected, actual }));
                }
                return;
            }
            Err(error) => {
                let error = Arc::new(error);
                for (_, result_tx) in self.requests {
                    let _ = result_tx.send(Err(LoadError::Fetch(error.clone())));
                }
                return;
            }
        };

        if let Some(cache_store) = cache_store {
            for (key, value) in self.keys.into_iter().zip(&values) {
                cache_store.insert(key, value.clone());
            }
        }

        for (indices, result_tx) in self.requests {
            let request_values = indices.iter().map(|&index| values[index].clone()).collect();
            let _ = result_tx.send(Ok(request_values));
        }
    }
}

/// Error indicating that loading one or more values from a [`BatchLoader`]
/// failed.
#[derive(Debug, thiserror::Error)]
pub enum LoadError<E> {
    /// The [`Fetcher`] returned an error while loading the batch. Every
    /// caller in the batch holds the same error.
    #[error("error while fetching from batch: {0}")]
    Fetch(Arc<E>),

    /// The [`Fetcher`] returned a different number of values than the number
    /// of keys in the batch.
    #[error("fetcher returned {actual} values for a batch of {expected} keys")]
    ResultCount { expected: usize, actual: usize },

    /// The request could not be sent to the [`BatchLoader`].
    #[error("error sending fetch request")]
    SendError,

    /// The batch was dropped before a result was sent back, for example
    /// because the [`Fetcher`] panicked.
    #[error("batch was dropped before completing")]
    Dropped,
}
