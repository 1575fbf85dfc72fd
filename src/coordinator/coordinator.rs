use super::{MutationHandle, PendingMutation};
use crate::cache::{CacheStore, Scope};
use crate::core::{OwnerId, Record, Result, SyncError};
use crate::remote::{CartCommitter, call_with_timeout};
use crate::storage::{Mutation, apply};
use std::sync::Arc;
use tracing::{Level, event};
use uuid::Uuid;

/// Applies cart mutations locally first, then commits them remotely.
///
/// Each mutation is composed from the owner's currently visible cart,
/// so back-to-back mutations stack even while their commits are still
/// in flight. Commits are neither serialized nor retried: each carries
/// the full cart and the remote store keeps whichever it accepts last.
pub struct MutationCoordinator {
    store: Arc<CacheStore>,
    committer: Arc<dyn CartCommitter>,
}

impl MutationCoordinator {
    pub fn new(store: Arc<CacheStore>, committer: Arc<dyn CartCommitter>) -> Self {
        Self { store, committer }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Publish `patch` applied to the owner's visible cart, then start
    /// exactly one remote commit of the result in the background.
    ///
    /// Must be called inside a tokio runtime. The owner's cart must have
    /// been read at least once.
    pub fn mutate(&self, owner: &OwnerId, patch: Mutation<Record>) -> Result<MutationHandle> {
        let id = Uuid::new_v4();
        let snapshot = self
            .store
            .compose_cart(owner, id, |current| apply(current, &patch))?;
        let pending = PendingMutation::new(id, owner.clone(), snapshot);

        event!(
            Level::DEBUG,
            owner = %owner,
            mutation = %id,
            kind = patch.kind(),
            key = %patch.key(),
            items = pending.snapshot.len(),
            "optimistic cart published"
        );

        let task = tokio::spawn(commit(
            Arc::clone(&self.store),
            Arc::clone(&self.committer),
            pending.clone(),
        ));
        Ok(MutationHandle::new(pending, task))
    }
}

async fn commit(
    store: Arc<CacheStore>,
    committer: Arc<dyn CartCommitter>,
    pending: PendingMutation,
) -> Result<()> {
    let owner = &pending.owner_id;
    let limit = store.config().commit_timeout;

    let outcome = call_with_timeout(
        limit,
        commit_error(owner),
        committer.commit_cart(owner, pending.payload()),
    )
    .await;

    // The overlay stays visible either way. Settling only lets the next
    // authoritative read replace it.
    if let Err(err) = store.settle_cart(owner, pending.id) {
        event!(Level::WARN, owner = %owner, mutation = %pending.id, error = %err, "could not settle overlay");
    }

    match outcome {
        Ok(()) => {
            store.invalidate(&Scope::Carts)?;
            event!(Level::INFO, owner = %owner, mutation = %pending.id, "cart committed");
            Ok(())
        }
        Err(err) => {
            event!(Level::WARN, owner = %owner, mutation = %pending.id, error = %err, "cart commit failed");
            Err(err)
        }
    }
}

fn commit_error(owner: &OwnerId) -> impl FnOnce(SyncError) -> SyncError + use<> {
    let owner = owner.to_string();
    move |err| match err {
        SyncError::CommitFailed { .. } => err,
        SyncError::Timeout(message) => SyncError::Timeout(format!("commit for '{}' {}", owner, message)),
        other => SyncError::CommitFailed {
            owner,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Topic;
    use crate::config::SyncConfig;
    use crate::core::{IdentityKey, derive_key};
    use crate::remote::MemoryRemote;

    fn setup(remote: Arc<MemoryRemote>) -> MutationCoordinator {
        let store = CacheStore::new(SyncConfig::new(), remote.clone(), remote.clone()).unwrap();
        MutationCoordinator::new(Arc::new(store), remote)
    }

    fn key(item: &str) -> IdentityKey {
        derive_key(item, "col1").unwrap()
    }

    #[tokio::test]
    async fn test_mutate_requires_loaded_cart() {
        let coordinator = setup(Arc::new(MemoryRemote::new()));
        let owner = OwnerId::new("alice").unwrap();

        let result = coordinator.mutate(&owner, Mutation::delete(key("nft1")));
        assert!(matches!(result, Err(SyncError::TopicNotLoaded(_))));
    }

    #[tokio::test]
    async fn test_successful_commit_invalidates_carts() {
        let remote = Arc::new(MemoryRemote::new());
        let coordinator = setup(remote.clone());
        let owner = OwnerId::new("alice").unwrap();
        coordinator.store().read_cart(&owner).await.unwrap();

        let handle = coordinator
            .mutate(&owner, Mutation::insert(Record::new("col1", "nft1", "alice")).unwrap())
            .unwrap();
        handle.outcome().await.unwrap();

        assert_eq!(
            coordinator.store().status(&Topic::Cart(owner.clone())).unwrap(),
            crate::cache::TopicStatus::Stale
        );
        assert_eq!(remote.cart(&owner).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_local_value() {
        let remote = Arc::new(MemoryRemote::new());
        let coordinator = setup(remote.clone());
        let owner = OwnerId::new("alice").unwrap();
        coordinator.store().read_cart(&owner).await.unwrap();
        remote.fail_next_commits(1);

        let handle = coordinator
            .mutate(&owner, Mutation::insert(Record::new("col1", "nft1", "alice")).unwrap())
            .unwrap();
        let err = handle.outcome().await.unwrap_err();
        assert!(matches!(err, SyncError::CommitFailed { .. }));

        let visible = coordinator.store().peek_cart(&owner).unwrap().unwrap();
        assert!(visible.contains(&key("nft1")));
        assert!(remote.cart(&owner).await.is_empty());
    }
}
