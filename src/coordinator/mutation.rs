use crate::cache::Cart;
use crate::core::{OwnerId, Record, Result, SyncError};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One optimistic change on its way to the remote store: the full next
/// cart, not a diff.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub snapshot: Cart,
    pub created_at: DateTime<Utc>,
}

impl PendingMutation {
    pub(crate) fn new(id: Uuid, owner_id: OwnerId, snapshot: Cart) -> Self {
        Self {
            id,
            owner_id,
            snapshot,
            created_at: Utc::now(),
        }
    }

    /// The commit body: every record of the snapshot, in order.
    pub fn payload(&self) -> Vec<Record> {
        self.snapshot.to_vec()
    }
}

/// Handle to a mutation whose commit is running in the background.
///
/// Dropping the handle does not cancel the commit.
pub struct MutationHandle {
    pending: PendingMutation,
    task: JoinHandle<Result<()>>,
}

impl MutationHandle {
    pub(crate) fn new(pending: PendingMutation, task: JoinHandle<Result<()>>) -> Self {
        Self { pending, task }
    }

    pub fn pending(&self) -> &PendingMutation {
        &self.pending
    }

    /// The locally visible cart this mutation produced.
    pub fn snapshot(&self) -> &Cart {
        &self.pending.snapshot
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the remote commit to resolve.
    pub async fn outcome(self) -> Result<()> {
        let owner = self.pending.owner_id;
        self.task.await.map_err(|err| SyncError::CommitFailed {
            owner: owner.to_string(),
            message: err.to_string(),
        })?
    }
}
