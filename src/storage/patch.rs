use super::KeyedCollection;
use crate::core::{IdentityKey, Keyed, Result, derive_key_from_record};
use std::sync::Arc;
use tracing::trace;

/// A single described change to a [`KeyedCollection`].
#[derive(Debug)]
pub enum Mutation<T> {
    /// Map the key to the record, overwriting or appending.
    ///
    /// The key must be the record's derived key. Build inserts with
    /// [`Mutation::insert`], which derives it; debug builds check it in
    /// [`apply`].
    Insert(IdentityKey, Arc<T>),
    /// Drop the key. Absent keys are a no-op.
    Delete(IdentityKey),
}

impl<T: Keyed> Mutation<T> {
    /// Insert keyed by the record's own identity.
    pub fn insert(record: T) -> Result<Self> {
        let key = derive_key_from_record(&record)?;
        Ok(Self::Insert(key, Arc::new(record)))
    }
}

impl<T> Mutation<T> {
    pub fn delete(key: IdentityKey) -> Self {
        Self::Delete(key)
    }

    pub fn key(&self) -> &IdentityKey {
        match self {
            Self::Insert(key, _) | Self::Delete(key) => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(..) => "insert",
            Self::Delete(_) => "delete",
        }
    }
}

impl<T> Clone for Mutation<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Insert(key, value) => Self::Insert(key.clone(), Arc::clone(value)),
            Self::Delete(key) => Self::Delete(key.clone()),
        }
    }
}

/// Produce the next collection value. `collection` is never modified and
/// every entry not named by `mutation` is shared with the result.
pub fn apply<T: Keyed>(collection: &KeyedCollection<T>, mutation: &Mutation<T>) -> KeyedCollection<T> {
    trace!(kind = mutation.kind(), key = %mutation.key(), "applying patch");
    match mutation {
        Mutation::Insert(key, value) => {
            debug_assert!(
                derive_key_from_record(value.as_ref()).is_ok_and(|derived| &derived == key),
                "insert under '{}' does not match the record's own key",
                key
            );
            collection.with_entry(key.clone(), Arc::clone(value))
        }
        Mutation::Delete(key) => collection.without(key),
    }
}

pub fn apply_all<'a, T, I>(collection: &KeyedCollection<T>, mutations: I) -> KeyedCollection<T>
where
    T: Keyed + 'a,
    I: IntoIterator<Item = &'a Mutation<T>>,
{
    mutations
        .into_iter()
        .fold(collection.clone(), |acc, mutation| apply(&acc, mutation))
}
