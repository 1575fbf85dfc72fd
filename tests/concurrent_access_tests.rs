/// Concurrent access tests
///
/// Many tasks reading and mutating through one shared cache store
/// Run with: cargo test --test concurrent_access_tests

use cartsync::{CacheStore, CatalogItem, MemoryRemote, OwnerId, ShopSession, SyncConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

fn catalog(n: usize) -> Vec<CatalogItem> {
    (0..n)
        .map(|i| CatalogItem::new("col1", format!("nft{}", i)))
        .collect()
}

fn shared(remote: &Arc<MemoryRemote>) -> Arc<CacheStore> {
    Arc::new(CacheStore::new(SyncConfig::default(), remote.clone(), remote.clone()).unwrap())
}

#[tokio::test]
async fn test_concurrent_reads() {
    let remote = Arc::new(MemoryRemote::new().with_catalog(catalog(100)));
    remote.set_fetch_delay(Some(Duration::from_millis(20))).await;
    let store = shared(&remote);

    let num_tasks = 10;
    let barrier = Arc::new(Barrier::new(num_tasks));
    let mut handles = vec![];

    for task_id in 0..num_tasks {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for _ in 0..50 {
                let catalog = store.read_catalog().await.unwrap();
                assert_eq!(catalog.len(), 100, "Task {} read incorrect count", task_id);
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(remote.catalog_fetches(), 1);
}

#[tokio::test]
async fn test_concurrent_owners() {
    let remote = Arc::new(MemoryRemote::new().with_catalog(catalog(10)));
    let store = shared(&remote);

    let mut handles = vec![];
    for task_id in 0..5 {
        let store = Arc::clone(&store);
        let remote = Arc::clone(&remote);

        handles.push(tokio::spawn(async move {
            let owner = OwnerId::new(format!("owner{}", task_id)).unwrap();
            let session = ShopSession::new(store, remote, owner);
            let view = session.catalog_view().await.unwrap();

            // each owner adds a different pair of items
            for entry in view.iter().skip(task_id * 2).take(2) {
                session.add_item(&entry.item).unwrap().outcome().await.unwrap();
            }
            session.cart().await.unwrap()
        }));
    }

    for (task_id, handle) in handles.into_iter().enumerate() {
        let cart = handle.await.unwrap();
        assert_eq!(cart.len(), 2, "owner{} cart", task_id);
        let owner = OwnerId::new(format!("owner{}", task_id)).unwrap();
        assert!(cart.values().all(|record| record.owner_id == owner.as_str()));
    }
    assert_eq!(remote.commit_attempts(), 10);
}

#[tokio::test]
async fn test_reads_during_refresh() {
    let remote = Arc::new(MemoryRemote::new().with_catalog(catalog(20)));
    let store = shared(&remote);
    store.read_catalog().await.unwrap();
    remote.set_fetch_delay(Some(Duration::from_millis(10))).await;

    let refresher = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for _ in 0..5 {
                store.refresh_all().await.unwrap();
            }
        })
    };

    let mut readers = vec![];
    for _ in 0..4 {
        let store = Arc::clone(&store);
        readers.push(tokio::spawn(async move {
            for _ in 0..20 {
                assert_eq!(store.read_catalog().await.unwrap().len(), 20);
                tokio::task::yield_now().await;
            }
        }));
    }

    refresher.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert!(!store.is_refreshing());
}
