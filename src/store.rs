use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;

/// A record stored in a [`Model`]'s collection.
///
/// `Field` names the fields a loader may be keyed on, usually a field-less
/// enum (or a plain string when the set of fields is open). `Value` is what
/// those fields hold; records are matched to requested keys by comparing
/// `Value`s.
pub trait Document: Clone + Send + Sync + 'static {
    type Field: Clone + Hash + Eq + AsRef<str> + Send + Sync + 'static;
    type Value: Clone + Hash + Eq + Send + Sync + 'static;

    /// The value of the given field on this record, or `None` if the record
    /// doesn't have one.
    fn field_value(&self, field: &Self::Field) -> Option<Self::Value>;
}

/// A handle to a collection of homogeneous documents in the backing store.
pub trait Model: Send + Sync + 'static {
    type Document: Document;
    type Error: Debug + Display + Send + Sync + 'static;

    /// A stable name that uniquely identifies the collection.
    fn name(&self) -> &str;

    /// Find every document whose `field` holds one of `values`. Documents
    /// may be returned in any order.
    fn find_in(
        &self,
        field: &<Self::Document as Document>::Field,
        values: &[<Self::Document as Document>::Value],
    ) -> impl Future<Output = Result<Vec<Self::Document>, Self::Error>> + Send;
}

/// The field type of a model's documents.
pub type FieldOf<M> = <<M as Model>::Document as Document>::Field;
/// The field value type of a model's documents.
pub type ValueOf<M> = <<M as Model>::Document as Document>::Value;
