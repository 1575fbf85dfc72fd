use super::{CartCommitter, CartSource, CatalogSource};
use crate::core::{CatalogItem, OwnerId, Record, Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::debug;

/// One accepted commit, in acceptance order.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitLogEntry {
    pub owner: OwnerId,
    pub cart: Vec<Record>,
    pub accepted_at: DateTime<Utc>,
}

/// In-process remote store.
///
/// Holds the authoritative catalog and carts behind async locks. Commits
/// replace the owner's cart wholesale, so the last accepted commit wins.
/// Failures, latency and paused commits can be injected for testing.
pub struct MemoryRemote {
    catalog: RwLock<Vec<CatalogItem>>,
    carts: RwLock<HashMap<OwnerId, Vec<Record>>>,
    commit_log: RwLock<Vec<CommitLogEntry>>,
    fetch_delay: RwLock<Option<Duration>>,
    failing_fetches: AtomicUsize,
    failing_commits: AtomicUsize,
    catalog_fetches: AtomicUsize,
    cart_fetches: AtomicUsize,
    commit_attempts: AtomicUsize,
    /// `true` while commits are held back
    paused: watch::Sender<bool>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            catalog: RwLock::new(Vec::new()),
            carts: RwLock::new(HashMap::new()),
            commit_log: RwLock::new(Vec::new()),
            fetch_delay: RwLock::new(None),
            failing_fetches: AtomicUsize::new(0),
            failing_commits: AtomicUsize::new(0),
            catalog_fetches: AtomicUsize::new(0),
            cart_fetches: AtomicUsize::new(0),
            commit_attempts: AtomicUsize::new(0),
            paused,
        }
    }

    /// Seed the catalog from a JSON array of catalog items.
    pub fn from_json(catalog_json: &str) -> Result<Self> {
        let items: Vec<CatalogItem> = serde_json::from_str(catalog_json)?;
        Ok(Self::new().with_catalog(items))
    }

    pub fn with_catalog(mut self, items: Vec<CatalogItem>) -> Self {
        *self.catalog.get_mut() = items;
        self
    }

    pub fn with_cart(mut self, owner: OwnerId, cart: Vec<Record>) -> Self {
        self.carts.get_mut().insert(owner, cart);
        self
    }

    pub async fn set_catalog(&self, items: Vec<CatalogItem>) {
        *self.catalog.write().await = items;
    }

    /// Replace a cart out of band, as another client would.
    pub async fn set_cart(&self, owner: OwnerId, cart: Vec<Record>) {
        self.carts.write().await.insert(owner, cart);
    }

    pub async fn cart(&self, owner: &OwnerId) -> Vec<Record> {
        self.carts.read().await.get(owner).cloned().unwrap_or_default()
    }

    pub async fn commit_log(&self) -> Vec<CommitLogEntry> {
        self.commit_log.read().await.clone()
    }

    pub async fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.write().await = delay;
    }

    /// Make the next `n` fetches (catalog or cart) fail.
    pub fn fail_next_fetches(&self, n: usize) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Hold every commit until [`MemoryRemote::resume_commits`].
    pub fn pause_commits(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume_commits(&self) {
        self.paused.send_replace(false);
    }

    pub fn catalog_fetches(&self) -> usize {
        self.catalog_fetches.load(Ordering::SeqCst)
    }

    pub fn cart_fetches(&self) -> usize {
        self.cart_fetches.load(Ordering::SeqCst)
    }

    pub fn commit_attempts(&self) -> usize {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn simulate_latency(&self) {
        let delay = *self.fetch_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogSource for MemoryRemote {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogItem>> {
        self.catalog_fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if Self::take_failure(&self.failing_fetches) {
            return Err(SyncError::FetchFailed {
                topic: "catalog".into(),
                message: "remote unavailable".into(),
            });
        }
        Ok(self.catalog.read().await.clone())
    }
}

#[async_trait]
impl CartSource for MemoryRemote {
    async fn fetch_cart(&self, owner: &OwnerId) -> Result<Vec<Record>> {
        self.cart_fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if Self::take_failure(&self.failing_fetches) {
            return Err(SyncError::FetchFailed {
                topic: format!("cart/{}", owner),
                message: "remote unavailable".into(),
            });
        }
        Ok(self.cart(owner).await)
    }
}

#[async_trait]
impl CartCommitter for MemoryRemote {
    async fn commit_cart(&self, owner: &OwnerId, cart: Vec<Record>) -> Result<()> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);

        let mut paused = self.paused.subscribe();
        paused
            .wait_for(|held| !*held)
            .await
            .map_err(|e| SyncError::CommitFailed {
                owner: owner.to_string(),
                message: e.to_string(),
            })?;

        if Self::take_failure(&self.failing_commits) {
            return Err(SyncError::CommitFailed {
                owner: owner.to_string(),
                message: "remote rejected the cart".into(),
            });
        }

        debug!(owner = %owner, items = cart.len(), "remote accepted cart");
        self.carts.write().await.insert(owner.clone(), cart.clone());
        self.commit_log.write().await.push(CommitLogEntry {
            owner: owner.clone(),
            cart,
            accepted_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("alice").unwrap()
    }

    #[tokio::test]
    async fn test_from_json_seeds_catalog() {
        let remote = MemoryRemote::from_json(
            r#"[{"collection_id":"col1","item_id":"nft1","image_url":"https://img/1.png"},
                {"collection_id":"col1","item_id":"nft2"}]"#,
        )
        .unwrap();

        let catalog = remote.fetch_catalog().await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].image_url.as_deref(), Some("https://img/1.png"));
        assert_eq!(remote.catalog_fetches(), 1);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            MemoryRemote::from_json("{not json"),
            Err(SyncError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_replaces_cart() {
        let remote = MemoryRemote::new()
            .with_cart(owner(), vec![Record::new("c", "old", "alice")]);

        let next = vec![Record::new("c", "new", "alice")];
        remote.commit_cart(&owner(), next.clone()).await.unwrap();

        assert_eq!(remote.cart(&owner()).await, next);
        assert_eq!(remote.commit_log().await.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let remote = MemoryRemote::new();
        remote.fail_next_commits(1);

        assert!(remote.commit_cart(&owner(), vec![]).await.is_err());
        assert!(remote.commit_cart(&owner(), vec![]).await.is_ok());
        assert_eq!(remote.commit_attempts(), 2);
    }
}
