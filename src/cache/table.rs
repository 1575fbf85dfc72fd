use super::{Topic, TopicStatus};
use crate::core::{Result, SyncError};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{Level, event};
use uuid::Uuid;

pub(crate) type SharedFetch<V> = Shared<BoxFuture<'static, Result<V>>>;

struct Fetched<V> {
    value: V,
    at: Instant,
}

/// Optimistic value layered over the authoritative one.
struct Overlay<V> {
    value: V,
    mutation_id: Uuid,
    /// Clock tick at which the mutation's commit resolved
    settled_at: Option<u64>,
}

struct InFlight<V> {
    generation: u64,
    started_at: u64,
    future: SharedFetch<V>,
}

struct Slot<V> {
    authoritative: Option<Fetched<V>>,
    overlay: Option<Overlay<V>>,
    stale: bool,
    in_flight: Option<InFlight<V>>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            authoritative: None,
            overlay: None,
            stale: false,
            in_flight: None,
        }
    }

    fn visible(&self) -> Option<&V> {
        self.overlay
            .as_ref()
            .map(|overlay| &overlay.value)
            .or_else(|| self.authoritative.as_ref().map(|fetched| &fetched.value))
    }

    fn is_fresh(&self, stale_after: Option<Duration>) -> bool {
        !self.stale
            && self.authoritative.as_ref().is_some_and(|fetched| {
                stale_after.is_none_or(|max| fetched.at.elapsed() <= max)
            })
    }

    fn status(&self, stale_after: Option<Duration>) -> TopicStatus {
        match (self.visible(), &self.in_flight) {
            (None, Some(_)) => TopicStatus::Loading,
            (None, None) => TopicStatus::Absent,
            (Some(_), _) if self.is_fresh(stale_after) => TopicStatus::Fresh,
            (Some(_), _) => TopicStatus::Stale,
        }
    }

    fn has_pending_overlay(&self) -> bool {
        self.overlay
            .as_ref()
            .is_some_and(|overlay| overlay.settled_at.is_none())
    }

    /// Safe to drop when trimming to capacity.
    fn is_evictable(&self) -> bool {
        self.in_flight.is_none() && !self.has_pending_overlay()
    }
}

struct Inner<K: Hash + Eq, V> {
    /// Unbounded; trimmed to `capacity` only after a fetch is stored
    slots: LruCache<K, Slot<V>>,
    capacity: NonZeroUsize,
    /// Logical clock ordering fetch starts against overlay settlement
    clock: u64,
    next_generation: u64,
}

/// One family of topics (the catalog, or every owner's cart) sharing a
/// bounded LRU of slots.
///
/// Each slot keeps the authoritative value and an optional optimistic
/// overlay as separate layers. Readers see the overlay when present.
/// The lock is never held across an await.
///
/// The bound is enforced when a fetched value is stored, never when a
/// fetch starts, so a failing fetch cannot push out another topic.
/// Slots with a fetch in flight or an uncommitted overlay are never
/// evicted; the table may exceed its capacity until they settle.
pub(crate) struct TopicTable<K: Hash + Eq, V> {
    topic_of: fn(&K) -> Topic,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TopicTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(topic_of: fn(&K) -> Topic, capacity: NonZeroUsize) -> Self {
        Self {
            topic_of,
            inner: Mutex::new(Inner {
                slots: LruCache::unbounded(),
                capacity,
                clock: 0,
                next_generation: 0,
            }),
        }
    }

    /// Visible value without fetching.
    pub fn peek(&self, key: &K) -> Result<Option<V>> {
        let inner = self.inner.lock()?;
        Ok(inner.slots.peek(key).and_then(|slot| slot.visible().cloned()))
    }

    pub fn status(&self, key: &K, stale_after: Option<Duration>) -> Result<TopicStatus> {
        let inner = self.inner.lock()?;
        Ok(inner
            .slots
            .peek(key)
            .map_or(TopicStatus::Absent, |slot| slot.status(stale_after)))
    }

    /// Visible value, fetching first when the authoritative layer is
    /// missing or stale. Concurrent readers share one in-flight fetch.
    pub async fn read<F>(&self, key: &K, stale_after: Option<Duration>, fetch: F) -> Result<V>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V>>,
    {
        let (generation, started_at, future) = {
            let mut guard = self.inner.lock()?;
            let inner = &mut *guard;
            inner.clock += 1;
            let now = inner.clock;

            let slot = inner.slots.get_or_insert_mut(key.clone(), Slot::new);
            if slot.is_fresh(stale_after)
                && let Some(value) = slot.visible()
            {
                return Ok(value.clone());
            }

            match &slot.in_flight {
                Some(in_flight) => (
                    in_flight.generation,
                    in_flight.started_at,
                    in_flight.future.clone(),
                ),
                None => {
                    inner.next_generation += 1;
                    let generation = inner.next_generation;
                    let future = fetch().shared();
                    let topic = (self.topic_of)(key);
                    event!(Level::DEBUG, topic = %topic, generation, "fetch started");
                    slot.in_flight = Some(InFlight {
                        generation,
                        started_at: now,
                        future: future.clone(),
                    });
                    (generation, now, future)
                }
            }
        };

        let result = future.await;
        self.complete(key, generation, started_at, result)
    }

    fn complete(&self, key: &K, generation: u64, started_at: u64, result: Result<V>) -> Result<V> {
        let topic = (self.topic_of)(key);
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;
        inner.clock += 1;

        let Some(slot) = inner.slots.peek_mut(key) else {
            // evicted while fetching
            return result;
        };
        let current = slot
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation);

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                if current {
                    slot.in_flight = None;
                    event!(Level::WARN, topic = %topic, error = %err, "fetch failed");
                    if slot.visible().is_none() {
                        inner.slots.pop(key);
                    }
                }
                return Err(err);
            }
        };

        if !current {
            // detached by an invalidation: hand the value to waiters only
            event!(Level::DEBUG, topic = %topic, generation, "detached fetch not stored");
            return Ok(slot
                .overlay
                .as_ref()
                .map_or(value, |overlay| overlay.value.clone()));
        }

        slot.in_flight = None;
        slot.stale = false;
        slot.authoritative = Some(Fetched {
            value: value.clone(),
            at: Instant::now(),
        });
        let superseded = slot
            .overlay
            .as_ref()
            .is_some_and(|overlay| overlay.settled_at.is_some_and(|at| at < started_at));
        if superseded {
            slot.overlay = None;
        }
        event!(Level::DEBUG, topic = %topic, generation, superseded, "fetch stored");

        let visible = slot
            .overlay
            .as_ref()
            .map_or(value, |overlay| overlay.value.clone());

        trim_to_capacity(inner, key, self.topic_of);
        Ok(visible)
    }

    /// Mark matching topics stale and detach their in-flight fetches, so
    /// the next read starts a new one.
    pub fn invalidate_where<P>(&self, predicate: P) -> Result<usize>
    where
        P: Fn(&K) -> bool,
    {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;
        inner.clock += 1;

        let mut count = 0;
        for (key, slot) in inner.slots.iter_mut() {
            if predicate(key) {
                slot.stale = true;
                slot.in_flight = None;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Replace the visible value with `compose(visible)` as an overlay.
    /// Read, compose and publish happen under one lock.
    pub fn compose_overlay<F>(&self, key: &K, mutation_id: Uuid, compose: F) -> Result<V>
    where
        F: FnOnce(&V) -> V,
    {
        let mut inner = self.inner.lock()?;
        let not_loaded = || SyncError::TopicNotLoaded((self.topic_of)(key).to_string());

        let slot = inner.slots.get_mut(key).ok_or_else(not_loaded)?;
        let next = compose(slot.visible().ok_or_else(not_loaded)?);
        slot.overlay = Some(Overlay {
            value: next.clone(),
            mutation_id,
            settled_at: None,
        });
        Ok(next)
    }

    /// Record that `mutation_id`'s commit resolved. Only the newest
    /// overlay can be settled; an older mutation's outcome leaves a newer
    /// local intent pending.
    pub fn settle_overlay(&self, key: &K, mutation_id: Uuid) -> Result<bool> {
        let mut guard = self.inner.lock()?;
        let inner = &mut *guard;
        inner.clock += 1;
        let now = inner.clock;

        let Some(overlay) = inner
            .slots
            .peek_mut(key)
            .and_then(|slot| slot.overlay.as_mut())
        else {
            return Ok(false);
        };
        if overlay.mutation_id != mutation_id || overlay.settled_at.is_some() {
            return Ok(false);
        }
        overlay.settled_at = Some(now);
        Ok(true)
    }

    pub fn discard_overlay(&self, key: &K) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        Ok(inner
            .slots
            .peek_mut(key)
            .and_then(|slot| slot.overlay.take())
            .is_some())
    }

    pub fn in_flight(&self) -> Result<Vec<SharedFetch<V>>> {
        let inner = self.inner.lock()?;
        Ok(inner
            .slots
            .iter()
            .filter_map(|(_, slot)| slot.in_flight.as_ref().map(|f| f.future.clone()))
            .collect())
    }

    /// Keys that currently have something to show.
    pub fn loaded_keys(&self) -> Result<Vec<K>> {
        let inner = self.inner.lock()?;
        Ok(inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.visible().is_some())
            .map(|(key, _)| key.clone())
            .collect())
    }

    pub fn evict(&self, key: &K) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        Ok(inner.slots.pop(key).is_some())
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.lock()?.slots.clear();
        Ok(())
    }
}

/// Evict least recently used slots until the table fits its capacity,
/// skipping `keep` and any slot that is still loading or holds an
/// uncommitted overlay.
fn trim_to_capacity<K, V>(inner: &mut Inner<K, V>, keep: &K, topic_of: fn(&K) -> Topic)
where
    K: Hash + Eq + Clone,
{
    let excess = inner.slots.len().saturating_sub(inner.capacity.get());
    if excess == 0 {
        return;
    }

    let victims: Vec<K> = inner
        .slots
        .iter()
        .rev()
        .filter(|(key, slot)| *key != keep && slot.is_evictable())
        .map(|(key, _)| key.clone())
        .take(excess)
        .collect();
    for key in &victims {
        inner.slots.pop(key);
        event!(Level::DEBUG, topic = %topic_of(key), "evicted topic");
    }

    if victims.len() < excess {
        event!(
            Level::DEBUG,
            len = inner.slots.len(),
            capacity = inner.capacity.get(),
            "over capacity while topics are pinned"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OwnerId;

    fn table(capacity: usize) -> TopicTable<OwnerId, Vec<u32>> {
        TopicTable::new(
            |owner| Topic::Cart(owner.clone()),
            NonZeroUsize::new(capacity).unwrap(),
        )
    }

    fn fetch_of(value: Vec<u32>) -> impl FnOnce() -> BoxFuture<'static, Result<Vec<u32>>> {
        move || async move { Ok(value) }.boxed()
    }

    fn owner(name: &str) -> OwnerId {
        OwnerId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_read_caches_until_invalidated() {
        let table = table(4);
        let alice = owner("alice");

        assert_eq!(table.read(&alice, None, fetch_of(vec![1])).await.unwrap(), vec![1]);
        // fresh: the fetch closure is not used
        assert_eq!(table.read(&alice, None, fetch_of(vec![2])).await.unwrap(), vec![1]);

        assert_eq!(table.invalidate_where(|_| true).unwrap(), 1);
        assert_eq!(table.status(&alice, None).unwrap(), TopicStatus::Stale);
        assert_eq!(table.read(&alice, None, fetch_of(vec![2])).await.unwrap(), vec![2]);
        assert_eq!(table.status(&alice, None).unwrap(), TopicStatus::Fresh);
    }

    #[tokio::test]
    async fn test_failed_first_fetch_caches_nothing() {
        let table = table(4);
        let alice = owner("alice");

        let failing = || {
            async {
                Err::<Vec<u32>, _>(SyncError::FetchFailed {
                    topic: "cart/alice".into(),
                    message: "down".into(),
                })
            }
            .boxed()
        };
        assert!(table.read(&alice, None, failing).await.is_err());
        assert_eq!(table.status(&alice, None).unwrap(), TopicStatus::Absent);
        assert_eq!(table.peek(&alice).unwrap(), None);

        // retry
        assert_eq!(table.read(&alice, None, fetch_of(vec![7])).await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_unsettled_overlay_survives_refetch() {
        let table = table(4);
        let alice = owner("alice");
        table.read(&alice, None, fetch_of(vec![1])).await.unwrap();

        let id = Uuid::new_v4();
        let next = table
            .compose_overlay(&alice, id, |current| {
                let mut next = current.clone();
                next.push(2);
                next
            })
            .unwrap();
        assert_eq!(next, vec![1, 2]);

        table.invalidate_where(|_| true).unwrap();
        let seen = table.read(&alice, None, fetch_of(vec![1])).await.unwrap();
        assert_eq!(seen, vec![1, 2]);

        assert!(table.settle_overlay(&alice, id).unwrap());
        table.invalidate_where(|_| true).unwrap();
        let seen = table.read(&alice, None, fetch_of(vec![1, 2, 3])).await.unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_settle_ignores_superseded_mutation() {
        let table = table(4);
        let alice = owner("alice");
        table.read(&alice, None, fetch_of(vec![])).await.unwrap();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        table.compose_overlay(&alice, first, |v| v.clone()).unwrap();
        table.compose_overlay(&alice, second, |v| v.clone()).unwrap();

        assert!(!table.settle_overlay(&alice, first).unwrap());
        assert!(table.settle_overlay(&alice, second).unwrap());
    }

    #[test]
    fn test_compose_requires_loaded_topic() {
        let table = table(4);
        let result = table.compose_overlay(&owner("ghost"), Uuid::new_v4(), |v| v.clone());
        assert!(matches!(result, Err(SyncError::TopicNotLoaded(_))));
    }

    #[tokio::test]
    async fn test_lru_evicts_oldest_owner() {
        let table = table(2);
        for name in ["a", "b", "c"] {
            table.read(&owner(name), None, fetch_of(vec![])).await.unwrap();
        }
        assert_eq!(table.status(&owner("a"), None).unwrap(), TopicStatus::Absent);
        assert_eq!(table.loaded_keys().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_does_not_evict() {
        let table = table(1);
        let (alice, bob) = (owner("alice"), owner("bob"));
        table.read(&alice, None, fetch_of(vec![1])).await.unwrap();

        let failing = || async { Err::<Vec<u32>, _>(SyncError::Timeout("slow".into())) }.boxed();
        assert!(table.read(&bob, None, failing).await.is_err());

        assert_eq!(table.peek(&alice).unwrap(), Some(vec![1]));
        assert_eq!(table.status(&bob, None).unwrap(), TopicStatus::Absent);
        assert_eq!(table.loaded_keys().unwrap(), vec![alice]);
    }

    #[tokio::test]
    async fn test_pending_overlay_is_never_evicted() {
        let table = table(1);
        let (alice, bob, carol) = (owner("alice"), owner("bob"), owner("carol"));
        table.read(&alice, None, fetch_of(vec![1])).await.unwrap();
        let id = Uuid::new_v4();
        table.compose_overlay(&alice, id, |_| vec![1, 2]).unwrap();

        table.read(&bob, None, fetch_of(vec![3])).await.unwrap();
        assert_eq!(table.peek(&alice).unwrap(), Some(vec![1, 2]));
        assert_eq!(table.peek(&bob).unwrap(), Some(vec![3]));

        // once settled, alice is an ordinary eviction candidate again
        table.settle_overlay(&alice, id).unwrap();
        table.read(&carol, None, fetch_of(vec![4])).await.unwrap();
        assert_eq!(table.loaded_keys().unwrap(), vec![carol]);
    }
}
