use super::table::TopicTable;
use super::{Scope, Topic, TopicStatus};
use crate::config::SyncConfig;
use crate::core::{CatalogItem, OwnerId, Record, Result, SyncError};
use crate::remote::{CartSource, CatalogSource, call_with_timeout};
use crate::storage::KeyedCollection;
use futures::future::{BoxFuture, FutureExt, join_all};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

pub type Catalog = KeyedCollection<CatalogItem>;
pub type Cart = KeyedCollection<Record>;

/// Value of a topic read through [`CacheStore::read`].
#[derive(Debug, Clone, PartialEq)]
pub enum TopicValue {
    Catalog(Catalog),
    Cart(Cart),
}

/// Process-wide cache of the catalog and of every owner's cart.
///
/// Create one per session and share it behind an `Arc`. Values only
/// change through a fetch, an invalidation, or the optimistic overlay
/// path used by the mutation coordinator.
pub struct CacheStore {
    config: SyncConfig,
    catalog_source: Arc<dyn CatalogSource>,
    cart_source: Arc<dyn CartSource>,
    catalog: TopicTable<(), Catalog>,
    carts: TopicTable<OwnerId, Cart>,
    refreshing: AtomicUsize,
}

impl CacheStore {
    pub fn new(
        config: SyncConfig,
        catalog_source: Arc<dyn CatalogSource>,
        cart_source: Arc<dyn CartSource>,
    ) -> Result<Self> {
        config.validate()?;
        let capacity = config.max_cached_owners;

        Ok(Self {
            config,
            catalog_source,
            cart_source,
            catalog: TopicTable::new(|_| Topic::Catalog, NonZeroUsize::MIN),
            carts: TopicTable::new(|owner| Topic::Cart(owner.clone()), capacity),
            refreshing: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The catalog, fetching it first when absent or stale.
    pub async fn read_catalog(&self) -> Result<Catalog> {
        self.catalog
            .read(&(), self.config.stale_after, || self.fetch_catalog())
            .await
    }

    /// The owner's visible cart, fetching first when absent or stale.
    pub async fn read_cart(&self, owner: &OwnerId) -> Result<Cart> {
        self.carts
            .read(owner, self.config.stale_after, || self.fetch_cart(owner))
            .await
    }

    pub async fn read(&self, topic: &Topic) -> Result<TopicValue> {
        match topic {
            Topic::Catalog => self.read_catalog().await.map(TopicValue::Catalog),
            Topic::Cart(owner) => self.read_cart(owner).await.map(TopicValue::Cart),
        }
    }

    pub fn peek_catalog(&self) -> Result<Option<Catalog>> {
        self.catalog.peek(&())
    }

    pub fn peek_cart(&self, owner: &OwnerId) -> Result<Option<Cart>> {
        self.carts.peek(owner)
    }

    pub fn status(&self, topic: &Topic) -> Result<TopicStatus> {
        match topic {
            Topic::Catalog => self.catalog.status(&(), self.config.stale_after),
            Topic::Cart(owner) => self.carts.status(owner, self.config.stale_after),
        }
    }

    /// Mark every topic in `scope` stale. Returns how many were cached.
    pub fn invalidate(&self, scope: &Scope) -> Result<usize> {
        let mut count = 0;
        if scope.covers_catalog() {
            count += self.catalog.invalidate_where(|_| true)?;
        }
        count += self.carts.invalidate_where(|owner| scope.covers_cart(owner))?;
        event!(Level::DEBUG, ?scope, count, "invalidated");
        Ok(count)
    }

    /// Manual refresh: wait for in-flight fetches, invalidate everything,
    /// then refetch every topic that had a value. Fails with the first
    /// fetch error; topics that refetched fine keep their new value.
    pub async fn refresh_all(&self) -> Result<()> {
        let _refreshing = RefreshGuard::enter(&self.refreshing);

        async {
            let catalog_pending = self.catalog.in_flight()?;
            let carts_pending = self.carts.in_flight()?;
            futures::join!(join_all(catalog_pending), join_all(carts_pending));

            let reload_catalog = !self.catalog.loaded_keys()?.is_empty();
            let owners = self.carts.loaded_keys()?;
            let invalidated = self.invalidate(&Scope::All)?;
            event!(Level::DEBUG, invalidated, owners = owners.len(), "refreshing data");

            let catalog = async {
                if reload_catalog {
                    self.read_catalog().await.map(|_| ())
                } else {
                    Ok(())
                }
            };
            let carts = join_all(owners.iter().map(|owner| self.read_cart(owner)));
            let (catalog, carts) = futures::join!(catalog, carts);

            catalog?;
            for cart in carts {
                cart?;
            }
            Ok::<(), SyncError>(())
        }
        .instrument(info_span!("refresh_all"))
        .await
    }

    /// True while a [`CacheStore::refresh_all`] is pending.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst) > 0
    }

    pub fn evict(&self, topic: &Topic) -> Result<bool> {
        match topic {
            Topic::Catalog => self.catalog.evict(&()),
            Topic::Cart(owner) => self.carts.evict(owner),
        }
    }

    /// Drop every cached topic.
    pub fn clear(&self) -> Result<()> {
        self.catalog.clear()?;
        self.carts.clear()
    }

    /// Drop the owner's optimistic layer, exposing the authoritative cart.
    pub fn discard_cart_overlay(&self, owner: &OwnerId) -> Result<bool> {
        self.carts.discard_overlay(owner)
    }

    pub(crate) fn compose_cart<F>(&self, owner: &OwnerId, mutation_id: Uuid, compose: F) -> Result<Cart>
    where
        F: FnOnce(&Cart) -> Cart,
    {
        self.carts.compose_overlay(owner, mutation_id, compose)
    }

    pub(crate) fn settle_cart(&self, owner: &OwnerId, mutation_id: Uuid) -> Result<bool> {
        self.carts.settle_overlay(owner, mutation_id)
    }

    fn fetch_catalog(&self) -> BoxFuture<'static, Result<Catalog>> {
        let source = Arc::clone(&self.catalog_source);
        let limit = self.config.fetch_timeout;
        async move {
            let items = call_with_timeout(limit, fetch_error(Topic::Catalog), source.fetch_catalog()).await?;
            KeyedCollection::from_records(items)
        }
        .boxed()
    }

    fn fetch_cart(&self, owner: &OwnerId) -> BoxFuture<'static, Result<Cart>> {
        let source = Arc::clone(&self.cart_source);
        let limit = self.config.fetch_timeout;
        let owner = owner.clone();
        async move {
            let topic = Topic::Cart(owner.clone());
            let records = call_with_timeout(limit, fetch_error(topic), source.fetch_cart(&owner)).await?;
            KeyedCollection::from_records(records)
        }
        .boxed()
    }
}

/// Wrap any remote error that is not already a fetch failure.
fn fetch_error(topic: Topic) -> impl FnOnce(SyncError) -> SyncError {
    move |err| match err {
        SyncError::FetchFailed { .. } => err,
        SyncError::Timeout(message) => SyncError::Timeout(format!("fetch of '{}' {}", topic, message)),
        other => SyncError::FetchFailed {
            topic: topic.to_string(),
            message: other.to_string(),
        },
    }
}

struct RefreshGuard<'a>(&'a AtomicUsize);

impl<'a> RefreshGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
