#![allow(unused)]

use docloader::{Document, Model};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

pub struct Database {
    pub users: Arc<Collection<User>>,
    pub posts: Arc<Collection<Post>>,
}

impl Database {
    pub fn fake() -> Self {
        let users: Vec<_> = (0..1000)
            .map(|n| User {
                id: Uuid::new_v4(),
                user_id: format!("testUser{n}"),
                name: fakeit::name::full(),
            })
            .collect();
        let posts: Vec<_> = users
            .iter()
            .enumerate()
            .flat_map(|(n, user)| {
                (0..(n % 3)).map(move |_| Post {
                    id: Uuid::new_v4(),
                    user_id: user.user_id.clone(),
                    body: fakeit::words::sentence(3),
                })
            })
            .collect();

        Database {
            users: Collection::new("user", users),
            posts: Collection::new("post", posts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
}

impl User {
    pub fn new(user_id: &str) -> Self {
        User {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            name: fakeit::name::full(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserField {
    Id,
    UserId,
    Name,
}

impl AsRef<str> for UserField {
    fn as_ref(&self) -> &str {
        match self {
            UserField::Id => "_id",
            UserField::UserId => "userId",
            UserField::Name => "name",
        }
    }
}

impl Document for User {
    type Field = UserField;
    type Value = Key;

    fn field_value(&self, field: &UserField) -> Option<Key> {
        let value = match field {
            UserField::Id => Key::Id(self.id),
            UserField::UserId => Key::from(&*self.user_id),
            UserField::Name => Key::from(&*self.name),
        };
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub user_id: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostField {
    Id,
    UserId,
}

impl AsRef<str> for PostField {
    fn as_ref(&self) -> &str {
        match self {
            PostField::Id => "_id",
            PostField::UserId => "userId",
        }
    }
}

impl Document for Post {
    type Field = PostField;
    type Value = Key;

    fn field_value(&self, field: &PostField) -> Option<Key> {
        let value = match field {
            PostField::Id => Key::Id(self.id),
            PostField::UserId => Key::from(&*self.user_id),
        };
        Some(value)
    }
}

/// A value a document can be looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Id(Uuid),
    Text(String),
}

impl From<Uuid> for Key {
    fn from(id: Uuid) -> Self {
        Key::Id(id)
    }
}

impl From<&str> for Key {
    fn from(text: &str) -> Self {
        Key::Text(text.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// An in-memory collection of documents.
pub struct Collection<T> {
    name: String,
    documents: RwLock<Vec<T>>,
    failure: RwLock<Option<String>>,
    reversed: AtomicBool,
}

impl<T> Collection<T>
where
    T: Document,
{
    pub fn new(name: &str, documents: Vec<T>) -> Arc<Self> {
        Arc::new(Collection {
            name: name.to_string(),
            documents: RwLock::new(documents),
            failure: RwLock::new(None),
            reversed: AtomicBool::new(false),
        })
    }

    pub fn insert(&self, document: T) {
        self.documents.write().unwrap().push(document);
    }

    pub fn documents(&self) -> Vec<T> {
        self.documents.read().unwrap().clone()
    }

    /// Make every query fail with the given message, or succeed again with
    /// `None`.
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.write().unwrap() = message.map(str::to_string);
    }

    /// Return query results in the reverse of insertion order.
    pub fn reverse_results(&self, reversed: bool) {
        self.reversed.store(reversed, Ordering::SeqCst);
    }
}

impl<T> Model for Collection<T>
where
    T: Document,
{
    type Document = T;
    type Error = StoreError;

    fn name(&self) -> &str {
        &self.name
    }

    async fn find_in(&self, field: &T::Field, values: &[T::Value]) -> Result<Vec<T>, StoreError> {
        // Let other tasks run, like a round trip to a real store would
        tokio::task::yield_now().await;

        if let Some(message) = self.failure.read().unwrap().clone() {
            return Err(StoreError::Unavailable(message));
        }

        let mut found: Vec<T> = self
            .documents
            .read()
            .unwrap()
            .iter()
            .filter(|document| {
                document
                    .field_value(field)
                    .map_or(false, |value| values.contains(&value))
            })
            .cloned()
            .collect();
        if self.reversed.load(Ordering::SeqCst) {
            found.reverse();
        }

        Ok(found)
    }
}
