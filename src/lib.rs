//! Batching loaders for document store models, keyed by model and by field.
//!
//! A [`Registry`] hands out one [`ModelLoader`] per model, and each
//! [`ModelLoader`] hands out one [`BatchLoader`] per field. Lookups issued
//! against the same field loader around the same time are folded into a
//! single "field in [...]" query, which avoids N+1 query patterns when
//! resolving graph-shaped queries.

pub(crate) mod batch_loader;
pub(crate) mod cache;
pub(crate) mod fetcher;
pub(crate) mod model_loader;
#[cfg(feature = "mongodb")]
pub(crate) mod mongo;
pub(crate) mod registry;
pub(crate) mod store;

pub use batch_loader::{BatchLoader, BatchLoaderBuilder, LoadError, LoaderOptions};
pub use fetcher::Fetcher;
pub use model_loader::{FieldFetcher, FieldLoader, FieldManyFetcher, FieldManyLoader, ModelLoader};
#[cfg(feature = "mongodb")]
pub use mongo::MongoModel;
pub use registry::{Registry, RegistryBuilder};
pub use store::{Document, FieldOf, Model, ValueOf};
