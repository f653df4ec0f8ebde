use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;

/// A trait for loading a batch of values from some datastore. Implementing
/// `Fetcher` allows loads to be batched by using a
/// [`BatchLoader`](crate::BatchLoader). See the [`BatchLoader`](crate::BatchLoader)
/// docs for details about batching and error semantics.
pub trait Fetcher {
    /// The key used to look up a value.
    type Key: Clone + Hash + Eq + Send + Sync;

    /// The value loaded for each key.
    type Value: Clone + Send + Sync;

    /// The error indicating that loading a batch failed.
    type Error: Debug + Display + Send + Sync + 'static;

    /// Load a value for each key in the batch. If `Ok(_)` is returned, the
    /// `Vec` must have exactly one element per key, where each element is
    /// the value for the key at the same index. Returning a `Vec` of any
    /// other length fails the whole batch with
    /// [`LoadError::ResultCount`](crate::LoadError::ResultCount). If `Err(_)`
    /// is returned, every caller waiting on the batch receives a
    /// [`LoadError::Fetch`](crate::LoadError::Fetch) holding the same error.
    fn fetch(
        &self,
        keys: &[Self::Key],
    ) -> impl Future<Output = Result<Vec<Self::Value>, Self::Error>> + Send;
}
