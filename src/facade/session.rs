use crate::cache::{CacheStore, Cart};
use crate::config::SyncConfig;
use crate::coordinator::{MutationCoordinator, MutationHandle};
use crate::core::{CatalogItem, IdentityKey, OwnerId, Record, Result, derive_key_from_record};
use crate::remote::{CartCommitter, CartSource, CatalogSource};
use crate::storage::Mutation;
use std::sync::Arc;
use tracing::debug;

/// A catalog item as shown to one owner.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub key: IdentityKey,
    pub item: Arc<CatalogItem>,
    pub in_cart: bool,
}

/// The actions one owner's shopping view performs against the cache.
///
/// Several sessions may share one [`CacheStore`].
pub struct ShopSession {
    coordinator: MutationCoordinator,
    owner: OwnerId,
}

impl ShopSession {
    pub fn new(store: Arc<CacheStore>, committer: Arc<dyn CartCommitter>, owner: OwnerId) -> Self {
        Self {
            coordinator: MutationCoordinator::new(store, committer),
            owner,
        }
    }

    /// Build a fresh store over a single remote that serves every call.
    pub fn connect<R>(config: SyncConfig, remote: Arc<R>, owner: OwnerId) -> Result<Self>
    where
        R: CatalogSource + CartSource + CartCommitter + 'static,
    {
        let store = CacheStore::new(config, remote.clone(), remote.clone())?;
        Ok(Self::new(Arc::new(store), remote, owner))
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        self.coordinator.store()
    }

    /// Every catalog item in order, flagged when it is in the cart.
    /// Suspends until both the catalog and the cart are available.
    pub async fn catalog_view(&self) -> Result<Vec<CatalogEntry>> {
        let store = self.store();
        let (catalog, cart) = futures::try_join!(store.read_catalog(), store.read_cart(&self.owner))?;

        Ok(catalog
            .iter()
            .map(|(key, item)| CatalogEntry {
                key: key.clone(),
                item: Arc::clone(item),
                in_cart: cart.contains(key),
            })
            .collect())
    }

    pub async fn cart(&self) -> Result<Cart> {
        self.store().read_cart(&self.owner).await
    }

    pub fn add_item(&self, item: &CatalogItem) -> Result<MutationHandle> {
        let record = item.to_record(&self.owner);
        let patch = Mutation::insert(record)?;
        debug!(owner = %self.owner, key = %patch.key(), "adding item to cart");
        self.coordinator.mutate(&self.owner, patch)
    }

    pub fn remove_key(&self, key: &IdentityKey) -> Result<MutationHandle> {
        debug!(owner = %self.owner, key = %key, "removing item from cart");
        self.coordinator
            .mutate(&self.owner, Mutation::delete(key.clone()))
    }

    /// Remove a catalog item from the cart.
    pub fn remove_item(&self, item: &CatalogItem) -> Result<MutationHandle> {
        self.remove_key(&derive_key_from_record(item)?)
    }

    /// Remove an entry listed in the cart.
    pub fn remove_record(&self, record: &Record) -> Result<MutationHandle> {
        self.remove_key(&derive_key_from_record(record)?)
    }

    /// Roll the cart back to its last authoritative value.
    pub fn discard_local_changes(&self) -> Result<bool> {
        self.store().discard_cart_overlay(&self.owner)
    }

    /// Manual refresh of every cached topic.
    pub async fn refresh(&self) -> Result<()> {
        debug!(owner = %self.owner, "refreshing data");
        self.store().refresh_all().await
    }

    pub fn is_refreshing(&self) -> bool {
        self.store().is_refreshing()
    }
}
