use crate::{Document, Model};
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson};
use mongodb::Collection;
use serde::de::DeserializeOwned;

/// A [`Model`] backed by a MongoDB collection. Lookups run a single
/// `find` with an `$in` filter on the requested field.
pub struct MongoModel<T>
where
    T: Send + Sync,
{
    collection: Collection<T>,
}

impl<T> MongoModel<T>
where
    T: Send + Sync,
{
    pub fn new(collection: Collection<T>) -> Self {
        MongoModel { collection }
    }

    pub fn collection(&self) -> &Collection<T> {
        &self.collection
    }
}

impl<T> From<Collection<T>> for MongoModel<T>
where
    T: Send + Sync,
{
    fn from(collection: Collection<T>) -> Self {
        MongoModel::new(collection)
    }
}

impl<T> Model for MongoModel<T>
where
    T: Document + DeserializeOwned + Unpin,
    T::Value: Into<Bson>,
{
    type Document = T;
    type Error = mongodb::error::Error;

    fn name(&self) -> &str {
        self.collection.name()
    }

    async fn find_in(&self, field: &T::Field, values: &[T::Value]) -> Result<Vec<T>, Self::Error> {
        let values = values.iter().cloned().map(Into::into).collect();
        let filter = in_filter(field.as_ref(), values);

        tracing::trace!(collection = self.collection.name(), %filter, "finding documents");
        let cursor = self.collection.find(filter).await?;
        cursor.try_collect().await
    }
}

/// Matches every document whose `field` equals one of `values`.
fn in_filter(field: &str, values: Vec<Bson>) -> mongodb::bson::Document {
    doc! { field: { "$in": values } }
}
