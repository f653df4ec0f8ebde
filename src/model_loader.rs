use crate::cache::get_or_create;
use crate::store::{Document, FieldOf, Model, ValueOf};
use crate::{BatchLoader, Fetcher, LoaderOptions};
use chashmap::CHashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// A [`BatchLoader`] resolving a field value to the matching document, or
/// `None` if no document matches.
pub type FieldLoader<M> = BatchLoader<FieldFetcher<M>>;

/// A [`BatchLoader`] resolving a field value to every matching document.
pub type FieldManyLoader<M> = BatchLoader<FieldManyFetcher<M>>;

/// Hands out one [`FieldLoader`] per field of a single [`Model`]. Loaders are
/// created on first use and then reused for the lifetime of the
/// `ModelLoader`, so every resolver asking for the same field shares one
/// batch queue.
///
/// A `ModelLoader` is usually obtained from a [`Registry`](crate::Registry),
/// but can also be created directly for a single model.
pub struct ModelLoader<M>
where
    M: Model,
{
    model: Arc<M>,
    options: LoaderOptions,
    loaders: CHashMap<FieldOf<M>, Arc<FieldLoader<M>>>,
    many_loaders: CHashMap<FieldOf<M>, Arc<FieldManyLoader<M>>>,
}

impl<M> ModelLoader<M>
where
    M: Model,
{
    pub fn new(model: Arc<M>) -> Self {
        ModelLoader::with_options(model, LoaderOptions::default())
    }

    /// Create a `ModelLoader` whose field loaders all use `options`.
    pub fn with_options(model: Arc<M>, options: LoaderOptions) -> Self {
        ModelLoader {
            model,
            options,
            loaders: CHashMap::new(),
            many_loaders: CHashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    /// The model handle this loader was created with.
    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    /// Get the loader keyed on `field`, creating it on first use. Repeated
    /// calls with the same field return the same loader.
    ///
    /// If several documents hold the same value for `field`, the loader
    /// resolves to one of them (currently the last one the store returns).
    /// Only use fields that are effectively unique, or use
    /// [`loader_many`](ModelLoader::loader_many).
    ///
    /// Must be called from within a tokio runtime.
    pub fn loader(&self, field: FieldOf<M>) -> Arc<FieldLoader<M>> {
        get_or_create(&self.loaders, field, |field| {
            tracing::debug!(model = self.name(), field = field.as_ref(), "creating field loader");
            let fetcher = FieldFetcher {
                model: self.model.clone(),
                field: field.clone(),
            };
            let loader = BatchLoader::build(fetcher)
                .options(self.options.clone())
                .label(self.label(field))
                .finish();
            Arc::new(loader)
        })
    }

    /// Get the loader resolving `field` to every matching document, creating
    /// it on first use. Repeated calls with the same field return the same
    /// loader.
    ///
    /// Must be called from within a tokio runtime.
    pub fn loader_many(&self, field: FieldOf<M>) -> Arc<FieldManyLoader<M>> {
        get_or_create(&self.many_loaders, field, |field| {
            tracing::debug!(model = self.name(), field = field.as_ref(), "creating one-to-many field loader");
            let fetcher = FieldManyFetcher {
                model: self.model.clone(),
                field: field.clone(),
            };
            let loader = BatchLoader::build(fetcher)
                .options(self.options.clone())
                .label(self.label(field))
                .finish();
            Arc::new(loader)
        })
    }

    /// Forget every field loader. Loaders handed out earlier keep working,
    /// but later calls to [`loader`](ModelLoader::loader) create new ones.
    pub fn clear(&self) {
        self.loaders.clear();
        self.many_loaders.clear();
    }

    fn label(&self, field: &FieldOf<M>) -> String {
        format!("{}.{}", self.name(), field.as_ref())
    }
}

/// Loads documents of a [`Model`] by the value of one field.
pub struct FieldFetcher<M>
where
    M: Model,
{
    model: Arc<M>,
    field: FieldOf<M>,
}

impl<M> Fetcher for FieldFetcher<M>
where
    M: Model,
{
    type Key = ValueOf<M>;
    type Value = Option<M::Document>;
    type Error = M::Error;

    async fn fetch(&self, keys: &[Self::Key]) -> Result<Vec<Self::Value>, Self::Error> {
        let documents = self.model.find_in(&self.field, keys).await?;

        let mut by_value = HashMap::with_capacity(documents.len());
        for document in documents {
            if let Some(value) = document.field_value(&self.field) {
                by_value.insert(value, document);
            }
        }

        Ok(keys.iter().map(|key| by_value.get(key).cloned()).collect())
    }
}

/// Loads all documents of a [`Model`] sharing a value of one field.
pub struct FieldManyFetcher<M>
where
    M: Model,
{
    model: Arc<M>,
    field: FieldOf<M>,
}

impl<M> Fetcher for FieldManyFetcher<M>
where
    M: Model,
{
    type Key = ValueOf<M>;
    type Value = Vec<M::Document>;
    type Error = M::Error;

    async fn fetch(&self, keys: &[Self::Key]) -> Result<Vec<Self::Value>, Self::Error> {
        let documents = self.model.find_in(&self.field, keys).await?;

        let mut by_value: HashMap<_, Vec<_>> = HashMap::new();
        for document in documents {
            if let Some(value) = document.field_value(&self.field) {
                by_value.entry(value).or_default().push(document);
            }
        }

        Ok(keys
            .iter()
            .map(|key| by_value.get(key).cloned().unwrap_or_default())
            .collect())
    }
}
