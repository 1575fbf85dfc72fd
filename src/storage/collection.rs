use crate::core::{IdentityKey, Keyed, Result, derive_key_from_record};
use im::{HashMap, OrdMap};
use std::fmt;
use std::sync::Arc;

struct Entry<T> {
    seq: u64,
    value: Arc<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            value: Arc::clone(&self.value),
        }
    }
}

/// Immutable map from [`IdentityKey`] to a shared record.
///
/// Cloning is O(1) and every `with_*`/`without` call returns a NEW
/// collection that shares all untouched nodes and entries with the old
/// one. The old value stays valid and unchanged.
///
/// Iteration follows insertion order. Overwriting a key keeps its slot.
pub struct KeyedCollection<T> {
    entries: HashMap<IdentityKey, Entry<T>>,
    /// insertion sequence -> key
    order: OrdMap<u64, IdentityKey>,
    next_seq: u64,
}

impl<T> KeyedCollection<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: OrdMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&T> {
        self.entries.get(key).map(|entry| entry.value.as_ref())
    }

    /// The shared handle of an entry, for identity comparisons.
    pub fn get_shared(&self, key: &IdentityKey) -> Option<&Arc<T>> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.order.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IdentityKey, &Arc<T>)> {
        self.order
            .values()
            .filter_map(|key| self.entries.get(key).map(|entry| (key, &entry.value)))
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<T>> {
        self.iter().map(|(_, value)| value)
    }

    /// True when both values share the same underlying storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.entries.ptr_eq(&other.entries) && self.order.ptr_eq(&other.order)
    }

    /// Returns a NEW collection where `key` maps to `value`.
    pub fn with_entry(&self, key: IdentityKey, value: Arc<T>) -> Self {
        let mut next = self.clone();
        match next.entries.get(&key).map(|entry| entry.seq) {
            Some(seq) => {
                next.entries.insert(key, Entry { seq, value });
            }
            None => {
                let seq = next.next_seq;
                next.next_seq += 1;
                next.order.insert(seq, key.clone());
                next.entries.insert(key, Entry { seq, value });
            }
        }
        next
    }

    /// Returns a NEW collection without `key`. Absent keys yield a
    /// collection sharing this one's storage.
    pub fn without(&self, key: &IdentityKey) -> Self {
        let Some(seq) = self.entries.get(key).map(|entry| entry.seq) else {
            return self.clone();
        };

        let mut next = self.clone();
        next.entries.remove(key);
        next.order.remove(&seq);
        next
    }
}

impl<T: Clone> KeyedCollection<T> {
    /// Every value, in iteration order. This is the full-list payload
    /// sent to the remote store.
    pub fn to_vec(&self) -> Vec<T> {
        self.values().map(|value| value.as_ref().clone()).collect()
    }
}

impl<T: Keyed> KeyedCollection<T> {
    /// Build a collection, deriving each key from the record itself.
    /// A later record with the same identity overwrites an earlier one.
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
    {
        let mut collection = Self::new();
        for record in records {
            let key = derive_key_from_record(&record)?;
            collection = collection.with_entry(key, Arc::new(record));
        }
        Ok(collection)
    }
}

impl<T> Clone for KeyedCollection<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            order: self.order.clone(),
            next_seq: self.next_seq,
        }
    }
}

impl<T> Default for KeyedCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Map equality: same keys with equal values, order ignored.
impl<T: PartialEq> PartialEq for KeyedCollection<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(key, entry)| other.get(key) == Some(entry.value.as_ref()))
    }
}

impl<T: Eq> Eq for KeyedCollection<T> {}

impl<T: fmt::Debug> fmt::Debug for KeyedCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
