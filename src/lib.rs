// ============================================================================
// cartsync Library
// ============================================================================

pub mod core;
pub mod storage;
pub mod cache;
pub mod coordinator;
pub mod remote;
pub mod facade;
pub mod config;

// Re-export main types for convenience
pub use crate::core::{
    CatalogItem, IdentityKey, Keyed, OwnerId, Record, Result, SyncError, derive_key,
    derive_key_from_record,
};
pub use storage::{KeyedCollection, Mutation, apply, apply_all};
pub use cache::{CacheStore, Cart, Catalog, Scope, Topic, TopicStatus, TopicValue};
pub use coordinator::{MutationCoordinator, MutationHandle, PendingMutation};
pub use remote::{CartCommitter, CartSource, CatalogSource, MemoryRemote};
pub use facade::{CatalogEntry, ShopSession};
pub use config::SyncConfig;

// ============================================================================
// Quick start
// ============================================================================

/// Open a session for `owner` over an in-memory remote.
///
/// # Examples
///
/// ```
/// use cartsync::{CatalogItem, OwnerId};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = vec![
///     CatalogItem::new("col1", "nft1"),
///     CatalogItem::new("col1", "nft2"),
/// ];
/// let session = cartsync::in_memory(catalog, OwnerId::new("alice")?)?;
///
/// let view = session.catalog_view().await?;
/// assert!(view.iter().all(|entry| !entry.in_cart));
///
/// let handle = session.add_item(&view[0].item)?;
/// // visible before the commit resolves
/// assert_eq!(session.cart().await?.len(), 1);
/// handle.outcome().await?;
/// # Ok(())
/// # }
/// ```
pub fn in_memory(catalog: Vec<CatalogItem>, owner: OwnerId) -> Result<ShopSession> {
    let remote = std::sync::Arc::new(MemoryRemote::new().with_catalog(catalog));
    ShopSession::connect(SyncConfig::default(), remote, owner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_session() {
        let owner = OwnerId::new("alice").unwrap();
        let session = in_memory(vec![CatalogItem::new("col1", "nft1")], owner).unwrap();

        let view = session.catalog_view().await.unwrap();
        assert_eq!(view.len(), 1);
        assert!(!view[0].in_cart);
    }

    #[tokio::test]
    async fn test_add_then_view_shows_flag() {
        let owner = OwnerId::new("alice").unwrap();
        let session = in_memory(vec![CatalogItem::new("col1", "nft1")], owner).unwrap();

        let view = session.catalog_view().await.unwrap();
        session.add_item(&view[0].item).unwrap().outcome().await.unwrap();

        let view = session.catalog_view().await.unwrap();
        assert!(view[0].in_cart);
    }
}
