use crate::cache::get_or_create;
use crate::{LoaderOptions, Model, ModelLoader};
use chashmap::CHashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Hands out one [`ModelLoader`] per model. The first request for a model
/// creates its loader, bound to the model handle passed in; every later
/// request for a model with the same name (and Rust type) returns that same
/// loader, even when a different handle is passed.
///
/// Each `Registry` owns its loaders, so separate registries never share
/// batches or cached values. In a web service, creating one `Registry` per
/// request keeps cached documents from outliving the request.
///
/// ```
/// # use docloader::{Document, Model, Registry};
/// # use std::sync::Arc;
/// # #[derive(Clone)] struct User { user_id: String }
/// # impl Document for User {
/// #     type Field = &'static str;
/// #     type Value = String;
/// #     fn field_value(&self, _: &&'static str) -> Option<String> { Some(self.user_id.clone()) }
/// # }
/// # struct Users(Vec<User>);
/// # impl Model for Users {
/// #     type Document = User;
/// #     type Error = std::convert::Infallible;
/// #     fn name(&self) -> &str { "user" }
/// #     async fn find_in(&self, _: &&'static str, values: &[String]) -> Result<Vec<User>, Self::Error> {
/// #         Ok(self.0.iter().filter(|user| values.contains(&user.user_id)).cloned().collect())
/// #     }
/// # }
/// # #[tokio::main] async fn main() -> anyhow::Result<()> {
/// let users = Arc::new(Users(vec![User { user_id: "testUser1".into() }]));
/// let registry = Registry::new();
///
/// let loader = registry.model_loader(&users).loader("userId");
/// let user = loader.load("testUser1".to_string()).await?;
/// assert_eq!(user.map(|user| user.user_id).as_deref(), Some("testUser1"));
/// # Ok(()) }
/// ```
pub struct Registry {
    options: LoaderOptions,
    loaders: CHashMap<ModelKey, Arc<dyn Any + Send + Sync>>,
}

impl Registry {
    /// Create a `Registry` whose loaders use the default [`LoaderOptions`].
    pub fn new() -> Self {
        Registry::build().finish()
    }

    /// Returns a [`RegistryBuilder`] to customize the options of every loader
    /// the registry creates.
    pub fn build() -> RegistryBuilder {
        RegistryBuilder {
            options: LoaderOptions::default(),
        }
    }

    /// Get the loader for `model`, creating it on first use.
    pub fn model_loader<M>(&self, model: &Arc<M>) -> Arc<ModelLoader<M>>
    where
        M: Model,
    {
        let key = ModelKey {
            name: model.name().to_owned(),
            model_type: TypeId::of::<M>(),
        };
        let loader = get_or_create(&self.loaders, key, |key| {
            tracing::debug!(model = %key.name, "creating model loader");
            let loader = ModelLoader::with_options(model.clone(), self.options.clone());
            Arc::new(loader) as Arc<dyn Any + Send + Sync>
        });

        match loader.downcast::<ModelLoader<M>>() {
            Ok(loader) => loader,
            Err(_) => unreachable!("model loaders are keyed by their model type"),
        }
    }

    /// The number of models with a loader.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every model loader. Loaders handed out earlier keep working,
    /// but later calls to [`model_loader`](Registry::model_loader) create new
    /// ones.
    pub fn clear(&self) {
        self.loaders.clear();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ModelKey {
    name: String,
    model_type: TypeId,
}

/// Used to configure a new [`Registry`]. A `RegistryBuilder` is returned from
/// [`Registry::build`].
pub struct RegistryBuilder {
    options: LoaderOptions,
}

impl RegistryBuilder {
    /// Replace all loader options at once.
    pub fn options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    /// See [`BatchLoaderBuilder::delay_duration`](crate::BatchLoaderBuilder::delay_duration).
    pub fn delay_duration(mut self, delay: tokio::time::Duration) -> Self {
        self.options.delay_duration = delay;
        self
    }

    /// See [`BatchLoaderBuilder::eager_batch_size`](crate::BatchLoaderBuilder::eager_batch_size).
    pub fn eager_batch_size(mut self, eager_batch_size: Option<usize>) -> Self {
        self.options.eager_batch_size = eager_batch_size;
        self
    }

    /// See [`BatchLoaderBuilder::cache`](crate::BatchLoaderBuilder::cache).
    pub fn cache(mut self, cache: bool) -> Self {
        self.options.cache = cache;
        self
    }

    pub fn finish(self) -> Registry {
        Registry {
            options: self.options,
            loaders: CHashMap::new(),
        }
    }
}
